// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Concrete [`AptBackend`] shelling out to `apt-get`/`apt-cache`/`dpkg-query`,
//! the native binding spec.md §1 leaves opaque. Mirrors `apm-container`'s
//! subprocess-driver shape: a thin wrapper around [`Command`] with its own
//! `Error` type, no attempt at an in-process libapt binding.

use std::process::{Command, Stdio};

use apm_package::{AptBackend, ChangePlan, Error, PackageInfo, ProgressFn, ProgressKind};
use regex::Regex;

#[derive(Debug, Default)]
pub struct ShellAptBackend {
    binary: Option<String>,
}

impl ShellAptBackend {
    fn apt_get(&self) -> &str {
        self.binary.as_deref().unwrap_or("apt-get")
    }

    fn run(&self, args: &[&str]) -> Result<String, Error> {
        let output = Command::new(self.apt_get())
            .args(args)
            .env("DEBIAN_FRONTEND", "noninteractive")
            .stderr(Stdio::inherit())
            .output()
            .map_err(|source| Error::Backend(format!("spawn `{} {}`: {source}", self.apt_get(), args.join(" "))))?;

        if !output.status.success() {
            return Err(Error::Backend(format!(
                "`{} {}` exited with status {:?}",
                self.apt_get(),
                args.join(" "),
                output.status.code()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn simulate(&self, args: &[&str]) -> Result<ChangePlan, Error> {
        let mut full = vec!["-s", "-y"];
        full.extend_from_slice(args);
        parse_simulation(&self.run(&full)?)
    }

    fn apply(&self, args: &[&str], progress: &ProgressFn<'_>) -> Result<ChangePlan, Error> {
        let mut full = vec!["-y"];
        full.extend_from_slice(args);
        let output = self.run(&full)?;
        let plan = parse_simulation(&output)?;

        for package in plan.new_installed.iter().chain(plan.upgraded.iter()) {
            progress(package, ProgressKind::InstallProgress, 1, 1);
        }

        Ok(plan)
    }
}

fn parse_simulation(output: &str) -> Result<ChangePlan, Error> {
    let inst = Regex::new(r"^Inst (\S+) \[(\S+)\] \((\S+)").map_err(|e| Error::Backend(e.to_string()))?;
    let inst_new = Regex::new(r"^Inst (\S+) \((\S+)").map_err(|e| Error::Backend(e.to_string()))?;
    let remv = Regex::new(r"^Remv (\S+)").map_err(|e| Error::Backend(e.to_string()))?;

    let mut plan = ChangePlan::default();

    for line in output.lines() {
        if let Some(caps) = inst.captures(line) {
            plan.upgraded.push(caps[1].to_owned());
        } else if let Some(caps) = inst_new.captures(line) {
            plan.new_installed.push(caps[1].to_owned());
        } else if let Some(caps) = remv.captures(line) {
            plan.removed.push(caps[1].to_owned());
        }
    }

    Ok(plan)
}

fn is_installed(name: &str) -> bool {
    Command::new("dpkg-query")
        .args(["-W", "-f=${Status}", name])
        .stderr(Stdio::null())
        .output()
        .map(|o| o.status.success() && String::from_utf8_lossy(&o.stdout).contains("install ok installed"))
        .unwrap_or(false)
}

impl AptBackend for ShellAptBackend {
    fn simulate_install(&self, pkgs: &[String]) -> Result<ChangePlan, Error> {
        let mut args = vec!["install"];
        args.extend(pkgs.iter().map(String::as_str));
        self.simulate(&args)
    }

    fn simulate_remove(&self, pkgs: &[String], purge: bool, depends: bool) -> Result<ChangePlan, Error> {
        let action = if purge { "purge" } else { "remove" };
        let mut args = vec![action];
        if depends {
            args.push("--auto-remove");
        }
        args.extend(pkgs.iter().map(String::as_str));
        self.simulate(&args)
    }

    fn simulate_autoremove(&self) -> Result<ChangePlan, Error> {
        self.simulate(&["autoremove"])
    }

    fn simulate_reinstall(&self, pkgs: &[String]) -> Result<ChangePlan, Error> {
        let mut args = vec!["install", "--reinstall"];
        args.extend(pkgs.iter().map(String::as_str));
        self.simulate(&args)
    }

    fn simulate_change(&self, install: &[String], remove: &[String], purge: bool, depends: bool) -> Result<ChangePlan, Error> {
        let mut args: Vec<String> = vec!["install".to_owned()];
        if depends {
            args.push("--auto-remove".to_owned());
        }
        if purge {
            args.push("--purge".to_owned());
        }
        args.extend(install.iter().cloned());
        args.extend(remove.iter().map(|p| format!("{p}-")));
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.simulate(&arg_refs)
    }

    fn simulate_dist_upgrade(&self) -> Result<ChangePlan, Error> {
        self.simulate(&["dist-upgrade"])
    }

    fn install_packages(&self, pkgs: &[String], progress: &ProgressFn<'_>) -> Result<ChangePlan, Error> {
        let mut args = vec!["install"];
        args.extend(pkgs.iter().map(String::as_str));
        self.apply(&args, progress)
    }

    fn remove_packages(&self, pkgs: &[String], purge: bool, depends: bool, progress: &ProgressFn<'_>) -> Result<ChangePlan, Error> {
        let action = if purge { "purge" } else { "remove" };
        let mut args = vec![action];
        if depends {
            args.push("--auto-remove");
        }
        args.extend(pkgs.iter().map(String::as_str));
        self.apply(&args, progress)
    }

    fn reinstall_packages(&self, pkgs: &[String], progress: &ProgressFn<'_>) -> Result<ChangePlan, Error> {
        let mut args = vec!["install", "--reinstall"];
        args.extend(pkgs.iter().map(String::as_str));
        self.apply(&args, progress)
    }

    fn combine_install_remove_packages(
        &self,
        ops: &[String],
        purge: bool,
        depends: bool,
        progress: &ProgressFn<'_>,
    ) -> Result<ChangePlan, Error> {
        let mut args = vec!["install".to_owned()];
        if depends {
            args.push("--auto-remove".to_owned());
        }
        if purge {
            args.push("--purge".to_owned());
        }
        for op in ops {
            if let Some(pkg) = op.strip_suffix('+') {
                args.push(pkg.to_owned());
            } else if let Some(pkg) = op.strip_suffix('-') {
                args.push(format!("{pkg}-"));
            }
        }
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.apply(&arg_refs, progress)
    }

    fn dist_upgrade(&self, progress: &ProgressFn<'_>) -> Result<ChangePlan, Error> {
        self.apply(&["dist-upgrade"], progress)
    }

    fn update(&self, progress: &ProgressFn<'_>) -> Result<(), Error> {
        self.run(&["update"])?;
        progress("apt", ProgressKind::DownloadComplete, 1, 1);
        Ok(())
    }

    fn get_info(&self, name: &str) -> Result<Option<PackageInfo>, Error> {
        let output = Command::new("apt-cache")
            .args(["show", name])
            .stderr(Stdio::null())
            .output()
            .map_err(|source| Error::Backend(format!("spawn apt-cache show: {source}")))?;

        if !output.status.success() {
            return Ok(None);
        }

        let text = String::from_utf8_lossy(&output.stdout);
        let mut version = None;
        let mut summary = String::new();
        for line in text.lines() {
            if let Some(v) = line.strip_prefix("Version: ") {
                version = Some(v.to_owned());
            } else if let Some(s) = line.strip_prefix("Description: ").or_else(|| line.strip_prefix("Summary: ")) {
                summary = s.to_owned();
            }
        }

        let Some(version) = version else { return Ok(None) };

        Ok(Some(PackageInfo {
            name: name.to_owned(),
            version,
            summary,
            installed: is_installed(name),
        }))
    }

    fn search(&self, substr: &str) -> Result<Vec<PackageInfo>, Error> {
        let output = Command::new("apt-cache")
            .args(["search", substr])
            .stderr(Stdio::null())
            .output()
            .map_err(|source| Error::Backend(format!("spawn apt-cache search: {source}")))?;

        if !output.status.success() {
            return Ok(Vec::new());
        }

        let text = String::from_utf8_lossy(&output.stdout);
        let mut results = Vec::new();
        for line in text.lines() {
            let Some((name, summary)) = line.split_once(" - ") else { continue };
            results.push(PackageInfo {
                name: name.to_owned(),
                version: String::new(),
                summary: summary.to_owned(),
                installed: is_installed(name),
            });
        }

        Ok(results)
    }
}
