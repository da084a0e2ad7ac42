// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::path::Path;
use std::process::Command;
use std::str::FromStr;

use apm_fnmatch::Pattern;
use apm_manifest::body::KernelBody;
use apm_package::{AptBackend, PackageInfo, PackageService};
use fs_err as fs;

use crate::{io_err, Error};

const MODULES_ROOT: &str = "/usr/lib/modules";

pub(crate) fn execute<B: AptBackend>(body: &KernelBody, packages: &PackageService<B>) -> Result<serde_json::Value, Error> {
    let Some(flavour) = &body.flavour else {
        return Ok(serde_json::json!({ "changed": false }));
    };

    let Some(target) = latest_matching(packages, flavour)? else {
        // No candidate package; keep whatever kernel is currently installed.
        return Ok(serde_json::json!({ "changed": false }));
    };

    let inherited = inherited_modules(&body.modules);

    let mut install = vec![target.name.clone()];
    if body.include_headers {
        install.push(format!("kernel-{flavour}-headers"));
    }

    let current = installed_kernels(packages, flavour)?;
    let remove: Vec<String> = current.into_iter().map(|p| p.name).collect();

    if Path::new(MODULES_ROOT).exists() {
        for entry in fs::read_dir(MODULES_ROOT).map_err(|e| io_err(MODULES_ROOT, e))?.flatten() {
            let path = entry.path();
            if path.is_dir() {
                fs::remove_dir_all(&path).map_err(|e| io_err(&path, e))?;
            }
        }
    }

    packages.combine_install_remove_packages(&apm_package::combine_ops(&install, &remove), false, false)?;

    let module_dir = Path::new(MODULES_ROOT).join(&target.version);
    fs::create_dir_all(&module_dir).map_err(|e| io_err(&module_dir, e))?;

    let vmlinuz = Path::new("/boot").join(format!("vmlinuz-{}", target.version));
    if vmlinuz.exists() {
        fs::copy(&vmlinuz, module_dir.join("vmlinuz")).map_err(|e| io_err(&module_dir, e))?;
    }

    let rebuilt = maybe_rebuild_initrd(body.rebuild_initrd_method.as_deref(), &target.version)?;

    Ok(serde_json::json!({
        "changed": true,
        "version": target.version,
        "modules": inherited,
        "initrd_rebuilt": rebuilt,
    }))
}

/// Search for `kernel-<flavour>` hits, excluding the `-headers`/`-firmware`
/// companion packages that the same search substring also turns up.
fn latest_matching<B: AptBackend>(packages: &PackageService<B>, flavour: &str) -> Result<Option<PackageInfo>, Error> {
    let candidates = kernel_candidates(packages, flavour)?;
    Ok(candidates.into_iter().max_by(|a, b| compare_versions(&a.version, &b.version)))
}

fn kernel_candidates<B: AptBackend>(packages: &PackageService<B>, flavour: &str) -> Result<Vec<PackageInfo>, Error> {
    let companion = Pattern::from_str(&format!("kernel-{flavour}-(kind:*)"))?;

    Ok(packages
        .search(&format!("kernel-{flavour}"))?
        .into_iter()
        .filter(|p| {
            let Some(m) = companion.match_path(&p.name) else {
                return true;
            };
            !matches!(m.variables.get("kind").map(String::as_str), Some("headers") | Some("firmware"))
        })
        .collect())
}

fn installed_kernels<B: AptBackend>(packages: &PackageService<B>, flavour: &str) -> Result<Vec<PackageInfo>, Error> {
    Ok(packages
        .search(&format!("kernel-{flavour}"))?
        .into_iter()
        .filter(|p| p.installed)
        .collect())
}

fn inherited_modules(requested: &[String]) -> Vec<String> {
    let mut modules = requested.to_vec();
    modules.sort();
    modules.dedup();
    modules
}

fn compare_versions(a: &str, b: &str) -> std::cmp::Ordering {
    let parse = |v: &str| -> Vec<u64> { v.split(['.', '-']).filter_map(|p| p.parse().ok()).collect() };
    parse(a).cmp(&parse(b))
}

/// Rebuilds the initramfs for `version` when the manifest asks for `dracut`,
/// or for `auto` when `dracut` is on `PATH`.
pub(crate) fn maybe_rebuild_initrd(method: Option<&str>, version: &str) -> Result<bool, Error> {
    let use_dracut = match method {
        Some("dracut") => true,
        Some("auto") | None => which_dracut(),
        Some("make-initrd") => {
            run_initrd_tool("make-initrd", version)?;
            return Ok(true);
        }
        _ => false,
    };

    if use_dracut {
        run_initrd_tool("dracut", version)?;
    }

    Ok(use_dracut)
}

fn which_dracut() -> bool {
    Command::new("sh")
        .arg("-c")
        .arg("command -v dracut")
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn run_initrd_tool(tool: &str, version: &str) -> Result<(), Error> {
    let status = Command::new(tool)
        .arg("--force")
        .arg(format!("/boot/initramfs-{version}.img"))
        .arg(version)
        .status()
        .map_err(|e| Error::Subprocess(format!("spawn {tool}: {e}")))?;

    if !status.success() {
        return Err(Error::Subprocess(format!("{tool} failed for kernel {version}")));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn compares_dotted_versions_numerically() {
        assert_eq!(compare_versions("6.9.1", "6.10.0"), std::cmp::Ordering::Less);
    }
}
