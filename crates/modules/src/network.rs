// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use apm_manifest::body::NetworkBody;
use fs_err as fs;

use crate::{io_err, Error};

const HOSTNAME_FILE: &str = "/etc/hostname";
const HOSTS_FILE: &str = "/etc/hosts";

pub(crate) fn execute(body: &NetworkBody) -> Result<serde_json::Value, Error> {
    fs::write(HOSTNAME_FILE, format!("{}\n", body.hostname)).map_err(|e| io_err(HOSTNAME_FILE, e))?;

    let hosts = format!(
        "127.0.0.1\tlocalhost\n\
         127.0.1.1\t{hostname}\n\
         ::1\tlocalhost {hostname} ip6-localhost ip6-loopback\n",
        hostname = body.hostname,
    );
    fs::write(HOSTS_FILE, hosts).map_err(|e| io_err(HOSTS_FILE, e))?;

    Ok(serde_json::json!({ "hostname": body.hostname }))
}
