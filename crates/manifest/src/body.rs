// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Closed set of module body variants, discriminated by the manifest's
/// `type` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ModuleBody {
    Packages(PackagesBody),
    Copy(CopyBody),
    Move(MoveBody),
    Merge(MergeBody),
    Mkdir(MkdirBody),
    Remove(RemoveBody),
    Link(LinkBody),
    Replace(ReplaceBody),
    Shell(ShellBody),
    Git(GitBody),
    Systemd(SystemdBody),
    Include(IncludeBody),
    Repos(ReposBody),
    Kernel(KernelBody),
    Branding(BrandingBody),
    Network(NetworkBody),
}

impl ModuleBody {
    /// Kebab-case name of this variant, as used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            ModuleBody::Packages(_) => "packages",
            ModuleBody::Copy(_) => "copy",
            ModuleBody::Move(_) => "move",
            ModuleBody::Merge(_) => "merge",
            ModuleBody::Mkdir(_) => "mkdir",
            ModuleBody::Remove(_) => "remove",
            ModuleBody::Link(_) => "link",
            ModuleBody::Replace(_) => "replace",
            ModuleBody::Shell(_) => "shell",
            ModuleBody::Git(_) => "git",
            ModuleBody::Systemd(_) => "systemd",
            ModuleBody::Include(_) => "include",
            ModuleBody::Repos(_) => "repos",
            ModuleBody::Kernel(_) => "kernel",
            ModuleBody::Branding(_) => "branding",
            ModuleBody::Network(_) => "network",
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            ModuleBody::Packages(b) => b.validate(),
            ModuleBody::Copy(b) => b.validate(),
            ModuleBody::Move(b) => b.validate(),
            ModuleBody::Merge(b) => b.validate(),
            ModuleBody::Mkdir(b) => b.validate(),
            ModuleBody::Remove(b) => b.validate(),
            ModuleBody::Link(b) => b.validate(),
            ModuleBody::Replace(b) => b.validate(),
            ModuleBody::Shell(b) => b.validate(),
            ModuleBody::Git(b) => b.validate(),
            ModuleBody::Systemd(b) => b.validate(),
            ModuleBody::Include(b) => b.validate(),
            ModuleBody::Repos(b) => b.validate(),
            ModuleBody::Kernel(b) => b.validate(),
            ModuleBody::Branding(b) => b.validate(),
            ModuleBody::Network(b) => b.validate(),
        }
    }

    pub fn is_include(&self) -> bool {
        matches!(self, ModuleBody::Include(_))
    }
}

fn require(type_name: &'static str, field: &'static str, present: bool) -> Result<(), ValidationError> {
    if present {
        Ok(())
    } else {
        Err(ValidationError::Required { body_type: type_name, field })
    }
}

fn needs(
    type_name: &'static str,
    field: &'static str,
    field_set: bool,
    needs_field: &'static str,
    needs_set: bool,
) -> Result<(), ValidationError> {
    if field_set && !needs_set {
        Err(ValidationError::Needs {
            body_type: type_name,
            field,
            needs: needs_field,
        })
    } else {
        Ok(())
    }
}

fn conflicts(
    type_name: &'static str,
    field: &'static str,
    field_set: bool,
    other_field: &'static str,
    other_set: bool,
) -> Result<(), ValidationError> {
    if field_set && other_set {
        Err(ValidationError::Conflicts {
            body_type: type_name,
            field,
            conflicts_with: other_field,
        })
    } else {
        Ok(())
    }
}

fn require_absolute(type_name: &'static str, field: &'static str, path: &str) -> Result<(), ValidationError> {
    if path.starts_with('/') {
        Ok(())
    } else {
        Err(ValidationError::NotAbsolute { body_type: type_name, field })
    }
}

const ALLOWED_REPO_BRANCHES: &[&str] = &["current", "unstable", "volatile"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct PackagesBody {
    #[serde(default)]
    pub install: Vec<String>,
    #[serde(default)]
    pub remove: Vec<String>,
    #[serde(default)]
    pub update: bool,
    #[serde(default)]
    pub upgrade: bool,
}

impl PackagesBody {
    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct CopyBody {
    pub source: String,
    pub destination: String,
    #[serde(default)]
    pub replace: bool,
}

impl CopyBody {
    fn validate(&self) -> Result<(), ValidationError> {
        require("copy", "source", !self.source.is_empty())?;
        require("copy", "destination", !self.destination.is_empty())?;
        require_absolute("copy", "destination", &self.destination)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct MoveBody {
    pub source: String,
    pub destination: String,
    #[serde(default)]
    pub replace: bool,
    #[serde(default, rename = "create-link")]
    pub create_link: bool,
}

impl MoveBody {
    fn validate(&self) -> Result<(), ValidationError> {
        require("move", "source", !self.source.is_empty())?;
        require("move", "destination", !self.destination.is_empty())?;
        require_absolute("move", "source", &self.source)?;
        require_absolute("move", "destination", &self.destination)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct MergeBody {
    pub source: String,
    pub destination: String,
    #[serde(default, rename = "create-file-perm")]
    pub create_file_perm: Option<String>,
    #[serde(default)]
    pub prepend: bool,
}

impl MergeBody {
    fn validate(&self) -> Result<(), ValidationError> {
        require("merge", "source", !self.source.is_empty())?;
        require("merge", "destination", !self.destination.is_empty())?;
        require_absolute("merge", "destination", &self.destination)?;
        if let Some(perm) = &self.create_file_perm {
            parse_perm(perm).ok_or(ValidationError::InvalidPerm {
                body_type: "merge",
                field: "create-file-perm",
            })?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct MkdirBody {
    pub targets: Vec<String>,
    pub perm: String,
}

impl MkdirBody {
    fn validate(&self) -> Result<(), ValidationError> {
        require("mkdir", "targets", !self.targets.is_empty())?;
        require("mkdir", "perm", !self.perm.is_empty())?;
        for target in &self.targets {
            require_absolute("mkdir", "targets", target)?;
        }
        parse_perm(&self.perm).ok_or(ValidationError::InvalidPerm {
            body_type: "mkdir",
            field: "perm",
        })?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct RemoveBody {
    pub targets: Vec<String>,
    #[serde(default)]
    pub inside: bool,
}

impl RemoveBody {
    fn validate(&self) -> Result<(), ValidationError> {
        require("remove", "targets", !self.targets.is_empty())?;
        for target in &self.targets {
            require_absolute("remove", "targets", target)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct LinkBody {
    pub target: String,
    pub to: String,
    #[serde(default)]
    pub replace: bool,
}

impl LinkBody {
    fn validate(&self) -> Result<(), ValidationError> {
        require("link", "target", !self.target.is_empty())?;
        require("link", "to", !self.to.is_empty())?;
        require_absolute("link", "target", &self.target)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct ReplaceBody {
    pub target: String,
    pub pattern: String,
    pub repl: String,
}

impl ReplaceBody {
    fn validate(&self) -> Result<(), ValidationError> {
        require("replace", "target", !self.target.is_empty())?;
        require("replace", "pattern", !self.pattern.is_empty())?;
        require_absolute("replace", "target", &self.target)?;
        regex::Regex::new(&self.pattern).map_err(|_| ValidationError::InvalidRegex {
            body_type: "replace",
            field: "pattern",
        })?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct ShellBody {
    pub command: String,
    #[serde(default)]
    pub quiet: bool,
}

impl ShellBody {
    fn validate(&self) -> Result<(), ValidationError> {
        require("shell", "command", !self.command.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct GitBody {
    pub url: String,
    pub command: String,
    #[serde(default)]
    pub deps: Vec<String>,
    #[serde(default, rename = "build-deps")]
    pub build_deps: Vec<String>,
    #[serde(default)]
    pub r#ref: Option<String>,
    #[serde(default)]
    pub quiet: bool,
}

impl GitBody {
    fn validate(&self) -> Result<(), ValidationError> {
        require("git", "url", !self.url.is_empty())?;
        require("git", "command", !self.command.is_empty())?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct SystemdBody {
    pub targets: Vec<String>,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub masked: bool,
    #[serde(default)]
    pub global: bool,
}

impl SystemdBody {
    fn validate(&self) -> Result<(), ValidationError> {
        require("systemd", "targets", !self.targets.is_empty())?;
        conflicts("systemd", "enabled", self.enabled, "masked", self.masked)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct IncludeBody {
    pub targets: Vec<String>,
}

impl IncludeBody {
    fn validate(&self) -> Result<(), ValidationError> {
        require("include", "targets", !self.targets.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct ReposBody {
    #[serde(default)]
    pub clean: bool,
    #[serde(default)]
    pub custom: Vec<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub tasks: Vec<String>,
    #[serde(default, rename = "no-update")]
    pub no_update: bool,
    #[serde(default, rename = "clean-temporary")]
    pub clean_temporary: bool,
}

impl ReposBody {
    fn validate(&self) -> Result<(), ValidationError> {
        needs(
            "repos",
            "date",
            self.date.is_some(),
            "branch",
            self.branch.is_some(),
        )?;
        conflicts("repos", "clean", self.clean, "clean-temporary", self.clean_temporary)?;
        if let Some(branch) = &self.branch {
            if !ALLOWED_REPO_BRANCHES.contains(&branch.as_str()) {
                return Err(ValidationError::UnknownBranch {
                    branch: branch.clone(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct KernelBody {
    #[serde(default)]
    pub flavour: Option<String>,
    #[serde(default)]
    pub modules: Vec<String>,
    #[serde(default, rename = "include-headers")]
    pub include_headers: bool,
    #[serde(default, rename = "rebuild-initrd-method")]
    pub rebuild_initrd_method: Option<String>,
}

impl KernelBody {
    fn validate(&self) -> Result<(), ValidationError> {
        if let Some(method) = &self.rebuild_initrd_method {
            if !["auto", "none", "dracut", "make-initrd"].contains(&method.as_str()) {
                return Err(ValidationError::InvalidEnum {
                    body_type: "kernel",
                    field: "rebuild-initrd-method",
                    value: method.clone(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct BrandingBody {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub subpackages: Vec<String>,
    #[serde(default, rename = "plymouth-theme")]
    pub plymouth_theme: Option<String>,
    #[serde(default, rename = "build-type")]
    pub build_type: Option<String>,
}

impl BrandingBody {
    fn validate(&self) -> Result<(), ValidationError> {
        needs(
            "branding",
            "subpackages",
            !self.subpackages.is_empty(),
            "name",
            self.name.is_some(),
        )?;
        needs(
            "branding",
            "build-type",
            self.build_type.is_some(),
            "name",
            self.name.is_some(),
        )?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct NetworkBody {
    pub hostname: String,
}

impl NetworkBody {
    fn validate(&self) -> Result<(), ValidationError> {
        require("network", "hostname", !self.hostname.is_empty())
    }
}

/// Parses an `rwx`-style permission string (`"0755"` or `"755"`) into a mode
/// mask, rejecting anything above `0o777`.
pub fn parse_perm(s: &str) -> Option<u32> {
    let trimmed = s.trim_start_matches("0o");
    let value = u32::from_str_radix(trimmed, 8).ok()?;
    (value <= 0o777).then_some(value)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_perm_strings() {
        assert_eq!(parse_perm("755"), Some(0o755));
        assert_eq!(parse_perm("0755"), Some(0o755));
        assert_eq!(parse_perm("7777"), None);
    }

    #[test]
    fn systemd_conflict_rejected() {
        let body = SystemdBody {
            targets: vec!["foo.service".into()],
            enabled: true,
            masked: true,
            global: false,
        };
        assert!(matches!(body.validate(), Err(ValidationError::Conflicts { .. })));
    }

    #[test]
    fn repos_date_needs_branch() {
        let body = ReposBody {
            date: Some("2024-01-01".into()),
            ..Default::default()
        };
        assert!(matches!(body.validate(), Err(ValidationError::Needs { .. })));
    }

    #[test]
    fn copy_destination_must_be_absolute() {
        let body = CopyBody {
            source: "src".into(),
            destination: "relative/path".into(),
            replace: false,
        };
        assert!(matches!(body.validate(), Err(ValidationError::NotAbsolute { .. })));
    }
}
