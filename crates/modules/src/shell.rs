// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::process::{Command, Stdio};

use apm_manifest::body::ShellBody;

use crate::{Error, HandlerCtx};

pub(crate) fn execute(body: &ShellBody, ctx: &HandlerCtx<'_>) -> Result<serde_json::Value, Error> {
    run(&body.command, ctx.resources_dir, body.quiet)
}

/// Runs `command` through `/bin/sh -c`, used by both the `shell` module and
/// the command step of `git` clones.
pub(crate) fn run(command: &str, cwd: &std::path::Path, quiet: bool) -> Result<serde_json::Value, Error> {
    let stdout = if quiet { Stdio::null() } else { Stdio::inherit() };

    let status = Command::new("/bin/sh")
        .arg("-c")
        .arg(command)
        .current_dir(cwd)
        .stdout(stdout)
        .stderr(Stdio::inherit())
        .status()
        .map_err(|e| Error::Subprocess(format!("spawn /bin/sh: {e}")))?;

    if !status.success() {
        return Err(Error::Subprocess(format!(
            "command exited with {}: {command}",
            status.code().map(|c| c.to_string()).unwrap_or_else(|| "signal".to_owned())
        )));
    }

    Ok(serde_json::json!({ "exit_code": status.code() }))
}
