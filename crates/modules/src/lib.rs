// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Module-body handlers: one function per `type` in [`apm_manifest::body::ModuleBody`],
//! each enforcing its own preconditions and returning a JSON output value the
//! executor stores under the module's `id`, per spec.md §4.7.

mod branding;
mod fs_ops;
mod git;
mod kernel;
mod network;
mod packages;
mod repos;
mod shell;
mod systemd;

use std::path::Path;

use apm_manifest::body::ModuleBody;
use apm_package::{AptBackend, PackageService};
use thiserror::Error;

pub use repos::{FsRepoService, RepoService};

#[derive(Debug, Error)]
pub enum Error {
    #[error("{path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("package operation")]
    Package(#[from] apm_package::Error),
    #[error("invalid regex in replace module")]
    Regex(#[from] regex::Error),
    #[error("invalid package name pattern")]
    Pattern(#[from] apm_fnmatch::Error),
    #[error("run subprocess: {0}")]
    Subprocess(String),
}

pub(crate) fn io_err(path: impl AsRef<Path>, source: std::io::Error) -> Error {
    Error::Io {
        path: path.as_ref().display().to_string(),
        source,
    }
}

/// Installs `install` and removes `remove` as one coalesced transaction,
/// degrading an `AlreadyInstalled` backend error to a logged skip rather
/// than failing the module, per spec.md §7's "already-installed equivalents
/// … degrade to a logged skip" rule.
pub(crate) fn combine_or_skip_already_installed<B: AptBackend>(
    packages: &PackageService<B>,
    install: &[String],
    remove: &[String],
) -> Result<(), Error> {
    match packages.combine_install_remove_packages(&apm_package::combine_ops(install, remove), false, false) {
        Ok(_) => Ok(()),
        Err(apm_package::Error::AlreadyInstalled(pkg)) => {
            log::warn!("already installed, skipping: {pkg}");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Working directories an already-resolved module body executes against.
/// `base_dir` is the manifest's directory (for relative `source` paths);
/// `resources_dir` is the directory `shell`/`git` commands run from.
pub struct HandlerCtx<'a> {
    pub base_dir: &'a Path,
    pub resources_dir: &'a Path,
}

/// Executes one already-placeholder-resolved module body, dispatching to its
/// handler. `include` is a no-op here: the flattener has already inlined it
/// by the time a `FlatModule` reaches the executor.
pub fn dispatch<B: AptBackend>(
    body: &ModuleBody,
    ctx: &HandlerCtx<'_>,
    packages: &apm_package::PackageService<B>,
    repos: &dyn RepoService,
) -> Result<serde_json::Value, Error> {
    match body {
        ModuleBody::Packages(b) => packages::execute(b, packages),
        ModuleBody::Copy(b) => fs_ops::copy(b, ctx),
        ModuleBody::Move(b) => fs_ops::mov(b),
        ModuleBody::Merge(b) => fs_ops::merge(b, ctx),
        ModuleBody::Mkdir(b) => fs_ops::mkdir(b),
        ModuleBody::Remove(b) => fs_ops::remove(b),
        ModuleBody::Link(b) => fs_ops::link(b),
        ModuleBody::Replace(b) => fs_ops::replace(b),
        ModuleBody::Shell(b) => shell::execute(b, ctx),
        ModuleBody::Git(b) => git::execute(b, ctx, packages),
        ModuleBody::Systemd(b) => systemd::execute(b),
        ModuleBody::Include(_) => {
            log::debug!("include module reached the executor; flattening should have resolved it");
            Ok(serde_json::Value::Null)
        }
        ModuleBody::Repos(b) => repos::execute(b, packages, repos),
        ModuleBody::Kernel(b) => kernel::execute(b, packages),
        ModuleBody::Branding(b) => branding::execute(b, packages),
        ModuleBody::Network(b) => network::execute(b),
    }
}
