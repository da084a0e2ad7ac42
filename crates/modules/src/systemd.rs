// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::process::Command;

use apm_manifest::body::SystemdBody;

use crate::Error;

pub(crate) fn execute(body: &SystemdBody) -> Result<serde_json::Value, Error> {
    let action = if body.masked {
        "mask"
    } else if body.enabled {
        "enable"
    } else {
        "disable"
    };

    for target in &body.targets {
        let mut command = Command::new("systemctl");
        if body.global {
            command.arg("--global");
        }
        command.arg(action).arg(target);

        let status = command
            .status()
            .map_err(|e| Error::Subprocess(format!("spawn systemctl: {e}")))?;
        if !status.success() {
            return Err(Error::Subprocess(format!("systemctl {action} {target} failed")));
        }
    }

    Ok(serde_json::json!({ "action": action, "targets": body.targets }))
}
