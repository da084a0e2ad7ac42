// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! `buildah` subprocess driver: keeps the builder-style API of the original
//! namespace-isolation container wrapper (`Container::new(root).bind(..)
//! .work_dir(..)`), but `run` now shells out to `buildah` instead of
//! entering raw Linux namespaces, per the concrete subprocess surface
//! mandated for the image-build path.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use fs_err as fs;
use thiserror::Error;

/// Describes one `buildah run` invocation: the command to execute inside
/// the working container, its bind mounts, and its working directory.
#[derive(Debug, Clone, Default)]
pub struct Container {
    work_dir: Option<PathBuf>,
    binds: Vec<(PathBuf, PathBuf, BindMode)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindMode {
    ReadOnly,
    ReadWrite,
}

impl Container {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(work_dir.into());
        self
    }

    pub fn bind(mut self, host: impl Into<PathBuf>, guest: impl Into<PathBuf>, mode: BindMode) -> Self {
        self.binds.push((host.into(), guest.into(), mode));
        self
    }
}

/// A `buildah` subprocess driver bound to a specific binary (normally just
/// `buildah` on `$PATH`).
#[derive(Debug, Clone)]
pub struct Driver {
    binary: PathBuf,
}

impl Default for Driver {
    fn default() -> Self {
        Self { binary: PathBuf::from("buildah") }
    }
}

impl Driver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self { binary: binary.into() }
    }

    /// `buildah from <image>`, returning a handle to the working container.
    pub fn from_image(&self, image: &str) -> Result<WorkingContainer, Error> {
        let id = self.run_capturing(&["from", image])?;
        Ok(WorkingContainer {
            driver: self.clone(),
            id,
            removed: false,
        })
    }

    /// `buildah tag <image> <tag>` — used when every module in the chain
    /// hits the layer cache and no new container needs to be created.
    pub fn tag(&self, image: &str, tag: &str) -> Result<(), Error> {
        self.run_checked(&["tag", image, tag])
    }

    fn run_checked(&self, args: &[&str]) -> Result<(), Error> {
        self.run_capturing(args).map(|_| ())
    }

    fn run_capturing(&self, args: &[&str]) -> Result<String, Error> {
        let output = Command::new(&self.binary)
            .args(args)
            .stderr(Stdio::inherit())
            .output()
            .map_err(|source| Error::Spawn {
                command: describe(&self.binary, args),
                source,
            })?;

        if !output.status.success() {
            return Err(Error::ExitStatus {
                command: describe(&self.binary, args),
                status: output.status.code(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
    }
}

/// A live `buildah` working container, removed on `Drop` if not already
/// removed explicitly — mirrors the "always `buildah rm`, even on error"
/// rule from the build driver's failure policy.
pub struct WorkingContainer {
    driver: Driver,
    id: String,
    removed: bool,
}

impl WorkingContainer {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// `buildah run` with the container's bind mounts and working
    /// directory, executing `command` (e.g. the `apm` re-entry invocation).
    pub fn run(&self, container: &Container, command: &[String]) -> Result<(), Error> {
        let mut args: Vec<String> = vec!["run".to_owned()];

        for (host, guest, mode) in &container.binds {
            let host = fs::canonicalize(host).unwrap_or_else(|_| host.clone());
            let suffix = match mode {
                BindMode::ReadOnly => ":ro",
                BindMode::ReadWrite => "",
            };
            args.push("-v".to_owned());
            args.push(format!("{}:{}{suffix}", host.display(), guest.display()));
        }

        if let Some(dir) = &container.work_dir {
            args.push("--workingdir".to_owned());
            args.push(dir.display().to_string());
        }

        args.push(self.id.clone());
        args.push("--".to_owned());
        args.extend(command.iter().cloned());

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.driver.run_checked(&arg_refs)
    }

    /// `buildah commit --rm=false <id> [tag]`, returning the produced
    /// layer/image id.
    pub fn commit(&self, tag: Option<&str>) -> Result<String, Error> {
        let mut args = vec!["commit", "--rm=false", &self.id];
        if let Some(tag) = tag {
            args.push(tag);
        }
        self.driver.run_capturing(&args)
    }

    /// `buildah rm <id>`. Safe to call more than once.
    pub fn remove(&mut self) -> Result<(), Error> {
        if self.removed {
            return Ok(());
        }
        self.removed = true;
        self.driver.run_checked(&["rm", &self.id])
    }
}

impl Drop for WorkingContainer {
    fn drop(&mut self) {
        let _ = self.remove();
    }
}

fn describe(binary: &Path, args: &[&str]) -> String {
    format!("{} {}", binary.display(), args.join(" "))
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("spawn `{command}`")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` exited with status {status:?}")]
    ExitStatus { command: String, status: Option<i32> },
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bind_mount_args_render_with_mode_suffix() {
        let container = Container::new()
            .bind("/host/config.yml", "/cfg/config.yml", BindMode::ReadOnly)
            .work_dir("/srv/module");
        assert_eq!(container.binds.len(), 1);
        assert_eq!(container.binds[0].2, BindMode::ReadOnly);
        assert_eq!(container.work_dir.as_deref(), Some(Path::new("/srv/module")));
    }
}
