// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::process::{Command, Stdio};

use apm_manifest::body::GitBody;
use apm_package::{AptBackend, PackageService};

use crate::{shell, Error, HandlerCtx};

/// `_ctx` is accepted for dispatch-signature uniformity but unused: the
/// clone always runs inside its own temp directory, not `resourcesDir`.
pub(crate) fn execute<B: AptBackend>(
    body: &GitBody,
    _ctx: &HandlerCtx<'_>,
    packages: &PackageService<B>,
) -> Result<serde_json::Value, Error> {
    if !body.deps.is_empty() {
        packages.combine_install_remove_packages(&apm_package::combine_ops(&body.deps, &[]), false, false)?;
    }
    if !body.build_deps.is_empty() {
        packages.combine_install_remove_packages(&apm_package::combine_ops(&body.build_deps, &[]), false, false)?;
    }

    let result = clone_and_run(body);

    if !body.build_deps.is_empty() {
        // Best-effort cleanup: report the clone/command error over a
        // cleanup failure, but still attempt the removal either way.
        let cleanup = packages.combine_install_remove_packages(&apm_package::combine_ops(&[], &body.build_deps), false, false);
        if result.is_ok() {
            cleanup?;
        }
    }

    result
}

fn clone_and_run(body: &GitBody) -> Result<serde_json::Value, Error> {
    let dir = tempfile::tempdir().map_err(|e| crate::io_err("mkdtemp", e))?;

    let mut clone = Command::new("git");
    clone.arg("clone").arg("--depth=1");
    if let Some(r#ref) = &body.r#ref {
        clone.arg("--branch").arg(r#ref);
    }
    clone.arg(&body.url).arg(dir.path());
    if body.quiet {
        clone.stdout(Stdio::null()).stderr(Stdio::null());
    }

    let status = clone
        .status()
        .map_err(|e| Error::Subprocess(format!("spawn git clone: {e}")))?;
    if !status.success() {
        return Err(Error::Subprocess(format!("git clone {} failed", body.url)));
    }

    shell::run(&body.command, dir.path(), body.quiet)
}
