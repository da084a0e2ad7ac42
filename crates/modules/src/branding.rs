// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::os::unix::fs::symlink;
use std::path::Path;

use apm_manifest::body::BrandingBody;
use apm_package::{AptBackend, PackageService};
use chrono::Utc;
use fs_err as fs;

use crate::kernel::maybe_rebuild_initrd;
use crate::{combine_or_skip_already_installed, io_err, Error};

const OS_RELEASE: &str = "/usr/lib/os-release";
const OS_RELEASE_LINK: &str = "/etc/os-release";
const ATOMIC_MARKER: &str = "/usr/bin/bootc";
const PLYMOUTH_CONF: &str = "/etc/plymouth/plymouthd.conf";
const PLYMOUTH_KARGS: &str = "/usr/lib/bootc/kargs.d/00-plymouth.toml";
const PLYMOUTH_DRACUT_CONF: &str = "/usr/lib/dracut/dracut.conf.d/00-plymouth.conf";

pub(crate) fn execute<B: AptBackend>(body: &BrandingBody, packages: &PackageService<B>) -> Result<serde_json::Value, Error> {
    let Some(name) = &body.name else {
        return Ok(serde_json::json!({ "changed": false }));
    };

    let matches = packages.search(&format!("branding-{name}-"))?;
    let install: Vec<String> = matches.into_iter().map(|p| p.name).collect();
    if !install.is_empty() {
        combine_or_skip_already_installed(packages, &install, &[])?;
    }

    if body.subpackages.iter().any(|s| s == "release") && Path::new(ATOMIC_MARKER).exists() {
        write_os_release(name, body.build_type.as_deref())?;
    }

    let mut theme_changed = false;
    if let Some(theme) = &body.plymouth_theme {
        theme_changed = apply_plymouth_theme(theme, packages)?;
    }

    let initrd_rebuilt = if theme_changed {
        maybe_rebuild_initrd(Some("auto"), &current_kernel_version())?
    } else {
        false
    };

    Ok(serde_json::json!({
        "installed": install,
        "theme_changed": theme_changed,
        "initrd_rebuilt": initrd_rebuilt,
    }))
}

fn write_os_release(name: &str, build_type: Option<&str>) -> Result<(), Error> {
    let build_type = build_type.unwrap_or("unknown");
    let date = Utc::now().format("%Y%m%d").to_string();

    let contents = format!(
        "NAME=\"{name}\"\n\
         VERSION=\"{date}\"\n\
         VERSION_ID=\"{date}\"\n\
         RELEASE_TYPE=\"{build_type}\"\n\
         PRETTY_NAME=\"{name} {build_type}\"\n\
         CPE_NAME=\"cpe:/o:{name}:{name}:{date}\"\n\
         ID={name}\n\
         IMAGE_ID={name}-{build_type}\n\
         IMAGE_VERSION={date}\n"
    );

    if let Some(parent) = Path::new(OS_RELEASE).parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    fs::write(OS_RELEASE, contents).map_err(|e| io_err(OS_RELEASE, e))?;

    let link = Path::new(OS_RELEASE_LINK);
    if link.exists() || link.symlink_metadata().is_ok() {
        fs::remove_file(link).map_err(|e| io_err(link, e))?;
    }
    symlink(OS_RELEASE, link).map_err(|e| io_err(link, e))?;

    Ok(())
}

fn apply_plymouth_theme<B: AptBackend>(theme: &str, packages: &PackageService<B>) -> Result<bool, Error> {
    let package = format!("plymouth-theme-{theme}");
    let already_installed = packages.get_info(&package)?.is_some_and(|p| p.installed);
    if !already_installed {
        packages.combine_install_remove_packages(&apm_package::combine_ops(&[package], &[]), false, false)?;
    }

    let current = fs::read_to_string(PLYMOUTH_CONF).unwrap_or_default();
    let desired_line = format!("Theme={theme}");
    if current.lines().any(|l| l.trim() == desired_line) {
        return Ok(false);
    }

    if let Some(parent) = Path::new(PLYMOUTH_CONF).parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    fs::write(PLYMOUTH_CONF, format!("[Daemon]\n{desired_line}\n")).map_err(|e| io_err(PLYMOUTH_CONF, e))?;

    if let Some(parent) = Path::new(PLYMOUTH_KARGS).parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    fs::write(PLYMOUTH_KARGS, "kargs = [\"splash\", \"quiet\"]\n").map_err(|e| io_err(PLYMOUTH_KARGS, e))?;

    if let Some(parent) = Path::new(PLYMOUTH_DRACUT_CONF).parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    fs::write(PLYMOUTH_DRACUT_CONF, "add_dracutmodules+=\" plymouth \"\n").map_err(|e| io_err(PLYMOUTH_DRACUT_CONF, e))?;

    Ok(true)
}

fn current_kernel_version() -> String {
    std::process::Command::new("uname")
        .arg("-r")
        .output()
        .ok()
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_owned())
        .unwrap_or_default()
}
