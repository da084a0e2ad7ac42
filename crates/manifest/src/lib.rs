// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Typed manifest model: `Config`/`Module`/`ModuleBody`, strict YAML/JSON
//! decoding, and tag-driven structural validation.

use std::collections::{HashMap, HashSet};

use serde::de::{self, DeserializeOwned};
use serde::{Deserialize, Serialize};

pub mod body;
mod error;

pub use body::ModuleBody;
pub use error::{LoadError, ValidationError};

/// Top-level manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub image: String,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub modules: Vec<Module>,
}

/// A single declarative step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Module {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, rename = "if")]
    pub if_: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(flatten)]
    pub body: ModuleBody,
    #[serde(default)]
    pub output: HashMap<String, String>,
}

/// Hand-rolled in place of `#[derive(Deserialize)]` with `#[serde(flatten)]`
/// on `body`: serde does not enforce `deny_unknown_fields` through a
/// flattened, internally-tagged enum (flatten buffers the remaining fields
/// into a generic map before the enum ever sees them, so an unknown body key
/// sails through silently). Decoding the remaining map directly into
/// `ModuleBody` — no flatten involved — lets each variant's
/// `deny_unknown_fields` do its job.
impl<'de> Deserialize<'de> for Module {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let mut value = serde_json::Value::deserialize(deserializer)?;
        let map = value
            .as_object_mut()
            .ok_or_else(|| de::Error::custom("module must be a mapping"))?;

        let name = take_field(map, "name")?;
        let id = take_field(map, "id")?;
        let if_ = take_field(map, "if")?;
        let env = take_field(map, "env")?.unwrap_or_default();
        let output = take_field(map, "output")?.unwrap_or_default();

        let body = serde_json::from_value(serde_json::Value::Object(std::mem::take(map))).map_err(de::Error::custom)?;

        Ok(Module {
            name,
            id,
            if_,
            env,
            body,
            output,
        })
    }
}

fn take_field<T, E>(map: &mut serde_json::Map<String, serde_json::Value>, key: &str) -> Result<Option<T>, E>
where
    T: DeserializeOwned,
    E: de::Error,
{
    map.remove(key).map(serde_json::from_value).transpose().map_err(de::Error::custom)
}

impl Module {
    /// Human label used in error annotations: name, else `id=...`, else
    /// `type=...`.
    pub fn label(&self) -> String {
        if let Some(name) = &self.name {
            name.clone()
        } else if let Some(id) = &self.id {
            format!("id={id}")
        } else {
            format!("type={}", self.body.type_name())
        }
    }
}

const ID_PATTERN_FIRST: fn(char) -> bool = |c| c.is_ascii_alphabetic();
const ID_PATTERN_REST: fn(char) -> bool = |c| c.is_ascii_alphanumeric() || c == '_';

fn is_valid_id(id: &str) -> bool {
    let mut chars = id.chars();
    match chars.next() {
        Some(c) if ID_PATTERN_FIRST(c) => {}
        _ => return false,
    }
    chars.all(ID_PATTERN_REST)
}

impl Config {
    /// Parses a manifest from YAML or JSON text, selecting the format by
    /// sniffing the first non-whitespace byte (`{` → JSON, else YAML).
    pub fn parse(source: &str) -> Result<Config, LoadError> {
        let trimmed = source.trim_start();
        let label = "<inline>".to_owned();
        if trimmed.starts_with('{') {
            serde_json::from_str(source).map_err(|source| LoadError::Json { path: label, source })
        } else {
            serde_yaml::from_str(source).map_err(|source| LoadError::Yaml { path: label, source })
        }
    }

    /// Applies the `APM_BUILD_*` environment-variable overrides documented
    /// in spec.md §6. Each overwrites its corresponding field only when the
    /// variable is set and non-empty.
    pub fn apply_env_overrides(&mut self, env: &HashMap<String, String>) {
        if let Some(image) = non_empty(env, "APM_BUILD_IMAGE") {
            self.image = image;
        }
        for module in &mut self.modules {
            match &mut module.body {
                ModuleBody::Branding(b) => {
                    if let Some(v) = non_empty(env, "APM_BUILD_BUILD_TYPE") {
                        b.build_type = Some(v);
                    }
                    if let Some(v) = non_empty(env, "APM_BUILD_NAME") {
                        b.name = Some(v);
                    }
                }
                ModuleBody::Network(n) => {
                    if let Some(v) = non_empty(env, "APM_BUILD_HOSTNAME") {
                        n.hostname = v;
                    }
                }
                ModuleBody::Kernel(k) => {
                    if let Some(v) = non_empty(env, "APM_BUILD_KERNEL_FLAVOUR") {
                        k.flavour = Some(v);
                    }
                }
                ModuleBody::Repos(r) => {
                    if let Some(v) = non_empty(env, "APM_BUILD_REPO_BRANCH") {
                        r.branch = Some(v);
                    }
                    if let Some(v) = non_empty(env, "APM_BUILD_REPO_DATE") {
                        r.date = Some(v);
                    }
                }
                _ => {}
            }
        }
    }

    /// Validates every module: id pattern, id uniqueness, and per-body
    /// tag-driven rules. Does not recurse into `include` targets — that is
    /// the flattener's job, performed after each included `Config` is
    /// parsed and validated on its own.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut seen_ids = HashSet::new();

        for module in &self.modules {
            if let Some(id) = &module.id {
                if !is_valid_id(id) {
                    return Err(ValidationError::InvalidId(id.clone()));
                }
                if !seen_ids.insert(id.clone()) {
                    return Err(ValidationError::DuplicateId(id.clone()));
                }
            }

            module.body.validate()?;
        }

        Ok(())
    }
}

fn non_empty(env: &HashMap<String, String>, key: &str) -> Option<String> {
    env.get(key).filter(|v| !v.is_empty()).cloned()
}

#[cfg(test)]
mod test {
    use super::*;

    const MANIFEST: &str = r#"
image: "alt:sisyphus"
env:
  FOO: bar
modules:
  - type: copy
    id: stepOne
    source: /tmp/src.txt
    destination: /tmp/dst.txt
  - type: systemd
    targets: ["foo.service"]
    enabled: true
"#;

    #[test]
    fn parses_and_validates() {
        let config = Config::parse(MANIFEST).unwrap();
        assert_eq!(config.image, "alt:sisyphus");
        assert_eq!(config.modules.len(), 2);
        config.validate().unwrap();
    }

    #[test]
    fn rejects_duplicate_ids() {
        let mut config = Config::parse(MANIFEST).unwrap();
        config.modules[1].id = Some("stepOne".into());
        assert!(matches!(config.validate(), Err(ValidationError::DuplicateId(_))));
    }

    #[test]
    fn rejects_invalid_id() {
        let mut config = Config::parse(MANIFEST).unwrap();
        config.modules[0].id = Some("1bad".into());
        assert!(matches!(config.validate(), Err(ValidationError::InvalidId(_))));
    }

    #[test]
    fn rejects_unknown_fields() {
        let bad = r#"
image: "alt:sisyphus"
modules:
  - type: copy
    source: /tmp/src.txt
    destination: /tmp/dst.txt
    bogus: true
"#;
        assert!(Config::parse(bad).is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = Config::parse(MANIFEST).unwrap();
        let overrides = HashMap::from([("APM_BUILD_IMAGE".to_owned(), "alt:p11".to_owned())]);
        config.apply_env_overrides(&overrides);
        assert_eq!(config.image, "alt:p11");
    }

    #[test]
    fn yaml_roundtrip_is_stable() {
        let config = Config::parse(MANIFEST).unwrap();
        let serialized = serde_yaml::to_string(&config).unwrap();
        let reparsed = Config::parse(&serialized).unwrap();
        assert_eq!(config, reparsed);
    }
}
