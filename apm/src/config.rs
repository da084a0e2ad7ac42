// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Shared manifest-loading step for the `system image build` and
//! `system apply` subcommands: read, apply `APM_BUILD_*` overrides,
//! validate, then flatten.

use std::path::Path;

use apm_flatten::Flattened;
use apm_manifest::Config;
use fs_err as fs;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("read manifest {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parse manifest")]
    Load(#[from] apm_manifest::LoadError),
    #[error("validate manifest")]
    Validate(#[from] apm_manifest::ValidationError),
    #[error("flatten manifest")]
    Flatten(#[from] apm_flatten::Error),
}

/// Loads `path`, applies this process's `APM_BUILD_*` environment overrides,
/// validates, and flattens. Returns both the (overridden) [`Config`], for
/// callers that need to persist it (image history), and the [`Flattened`]
/// module list the executor consumes.
pub async fn load(path: &Path) -> Result<(Config, Flattened), Error> {
    let text = fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.display().to_string(),
        source,
    })?;

    let mut config = Config::parse(&text)?;
    config.apply_env_overrides(&std::env::vars().collect());
    config.validate()?;

    let flattened = apm_flatten::load_config(config.clone(), path).await?;

    Ok((config, flattened))
}
