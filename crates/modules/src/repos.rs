// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use apm_manifest::body::ReposBody;
use apm_package::{AptBackend, PackageService};
use fs_err as fs;

use crate::{combine_or_skip_already_installed, io_err, Error};

const CA_CERTIFICATES: &str = "ca-certificates";

/// Repo management the `repos` module handler invokes, kept separate from
/// [`apm_package::AptBackend`] since it edits source lists rather than
/// installed packages. An implementer backs this with the distribution's
/// actual repository tooling; [`FsRepoService`] is a plain file-based one.
pub trait RepoService: Send + Sync {
    fn clean(&self) -> std::io::Result<()>;
    fn clean_temporary(&self) -> std::io::Result<()>;
    fn set_branch(&self, branch: &str, date: Option<&str>) -> std::io::Result<()>;
    fn add_custom(&self, entries: &[String]) -> std::io::Result<()>;
    fn add_tasks(&self, tasks: &[String]) -> std::io::Result<()>;
}

/// Writes repo configuration under a directory laid out like APT's
/// `sources.list.d`: one file per concern, so each call is independently
/// idempotent and inspectable.
pub struct FsRepoService {
    pub sources_dir: std::path::PathBuf,
}

impl RepoService for FsRepoService {
    fn clean(&self) -> std::io::Result<()> {
        if self.sources_dir.exists() {
            fs::remove_dir_all(&self.sources_dir)?;
        }
        fs::create_dir_all(&self.sources_dir)
    }

    fn clean_temporary(&self) -> std::io::Result<()> {
        let temp = self.sources_dir.join("temporary");
        if temp.exists() {
            fs::remove_dir_all(&temp)?;
        }
        Ok(())
    }

    fn set_branch(&self, branch: &str, date: Option<&str>) -> std::io::Result<()> {
        fs::create_dir_all(&self.sources_dir)?;
        let contents = match date {
            Some(date) => format!("branch={branch}\ndate={date}\n"),
            None => format!("branch={branch}\n"),
        };
        fs::write(self.sources_dir.join("branch.conf"), contents)
    }

    fn add_custom(&self, entries: &[String]) -> std::io::Result<()> {
        fs::create_dir_all(&self.sources_dir)?;
        fs::write(self.sources_dir.join("custom.list"), entries.join("\n"))
    }

    fn add_tasks(&self, tasks: &[String]) -> std::io::Result<()> {
        fs::create_dir_all(&self.sources_dir)?;
        fs::write(self.sources_dir.join("tasks.list"), tasks.join("\n"))
    }
}

pub(crate) fn execute<B: AptBackend>(
    body: &ReposBody,
    packages: &PackageService<B>,
    repos: &dyn RepoService,
) -> Result<serde_json::Value, Error> {
    if body.clean {
        repos.clean().map_err(|e| io_err("repos clean", e))?;
    } else if body.clean_temporary {
        repos.clean_temporary().map_err(|e| io_err("repos clean-temporary", e))?;
    }

    if let Some(branch) = &body.branch {
        repos
            .set_branch(branch, body.date.as_deref())
            .map_err(|e| io_err("repos set-branch", e))?;
    }

    if !body.custom.is_empty() {
        repos.add_custom(&body.custom).map_err(|e| io_err("repos add-custom", e))?;
    }
    if !body.tasks.is_empty() {
        repos.add_tasks(&body.tasks).map_err(|e| io_err("repos add-tasks", e))?;
    }

    if !body.no_update {
        packages.update()?;
        combine_or_skip_already_installed(packages, &[CA_CERTIFICATES.to_owned()], &[])?;
    }

    Ok(serde_json::json!({ "branch": body.branch, "no_update": body.no_update }))
}
