// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Resolves the on-disk locations `apm` reads and writes: the layer cache,
//! bundled module resources, repo source lists, and the host's image
//! history database. Root and unprivileged invocations resolve to different
//! system-vs-user paths, mirroring `boulder::env::Env`.

use std::path::PathBuf;

use fs_err as fs;
use nix::unistd::Uid;
use thiserror::Error;

pub struct Env {
    pub cache_dir: PathBuf,
    pub resources_dir: PathBuf,
    pub repos_dir: PathBuf,
    pub history_db: PathBuf,
}

impl Env {
    pub fn new(cache_dir: Option<PathBuf>, data_dir: Option<PathBuf>, resources_dir: Option<PathBuf>) -> Result<Self, Error> {
        let is_root = Uid::effective().is_root();

        let cache_dir = match cache_dir {
            Some(dir) => dir,
            None if is_root => PathBuf::from("/var/cache/apm"),
            None => dirs::cache_dir().ok_or(Error::UserCache)?.join("apm"),
        };

        let data_dir = match data_dir {
            Some(dir) => dir,
            None if is_root => PathBuf::from("/var/lib/apm"),
            None => dirs::data_dir().ok_or(Error::UserData)?.join("apm"),
        };

        let resources_dir = resources_dir.unwrap_or_else(|| PathBuf::from("/usr/share/apm/resources"));
        let repos_dir = data_dir.join("repos");
        let history_db = data_dir.join("history.db");

        fs::create_dir_all(&cache_dir)?;
        fs::create_dir_all(&data_dir)?;
        fs::create_dir_all(&repos_dir)?;

        Ok(Self {
            cache_dir,
            resources_dir,
            repos_dir,
            history_db,
        })
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot find cache dir, $XDG_CACHE_HOME or $HOME env not set")]
    UserCache,
    #[error("cannot find data dir, $XDG_DATA_HOME or $HOME env not set")]
    UserData,
    #[error("io")]
    Io(#[from] std::io::Error),
}
