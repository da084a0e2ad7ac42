// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Manifest loader and flattener: recursively inlines `include` modules from
//! local paths, directories, and URLs, producing a flat, ordered execution
//! list with per-module source file, working directory, and inherited env.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use apm_manifest::{body::ModuleBody, Config, Module};
use fs_err as fs;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Load(#[from] apm_manifest::LoadError),
    #[error("read include target {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("fetch include URL {url}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("include cycle detected: {0}")]
    Cycle(String),
}

/// A module after `include`s are recursively inlined.
#[derive(Debug, Clone)]
pub struct FlatModule {
    pub module: Module,
    pub source_file: String,
    pub base_dir: PathBuf,
    pub env: HashMap<String, String>,
}

/// Flattened manifest: the base image reference, root env, and the ordered
/// list of executable modules.
#[derive(Debug, Clone)]
pub struct Flattened {
    pub image: String,
    pub root_env: HashMap<String, String>,
    pub modules: Vec<FlatModule>,
}

/// Loads `path`, validates it, and recursively flattens its `include`s.
pub async fn load(path: &Path) -> Result<Flattened, Error> {
    let text = fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.display().to_string(),
        source,
    })?;
    let config = Config::parse(&text)?;
    config.validate()?;

    load_config(config, path).await
}

/// Like [`load`], but takes an already-parsed and validated [`Config`] (for
/// example one that has had `APM_BUILD_*` env overrides applied) instead of
/// reading and parsing `path` itself. `path` is still used to seed the
/// include-cycle stack and resolve relative include targets.
pub async fn load_config(config: Config, path: &Path) -> Result<Flattened, Error> {
    let base_dir = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
    let client = reqwest::Client::new();
    let mut modules = Vec::new();
    let mut stack = vec![canonical_label(path)];

    flatten_modules(
        &config.modules,
        path.display().to_string(),
        base_dir,
        config.env.clone(),
        &mut modules,
        &mut stack,
        &client,
    )
    .await?;

    Ok(Flattened {
        image: config.image,
        root_env: config.env,
        modules,
    })
}

fn merge_env(parent: &HashMap<String, String>, child: &HashMap<String, String>) -> HashMap<String, String> {
    let mut merged = parent.clone();
    merged.extend(child.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

fn is_url(target: &str) -> bool {
    target.starts_with("http://") || target.starts_with("https://")
}

fn canonical_label(path: &Path) -> String {
    fs::canonicalize(path)
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| path.display().to_string())
}

fn resolve_local_target(target: &str, base_dir: &Path) -> PathBuf {
    let candidate = Path::new(target);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base_dir.join(candidate)
    }
}

#[allow(clippy::too_many_arguments)]
fn flatten_modules<'a>(
    modules: &'a [Module],
    source_file: String,
    base_dir: PathBuf,
    env: HashMap<String, String>,
    out: &'a mut Vec<FlatModule>,
    stack: &'a mut Vec<String>,
    client: &'a reqwest::Client,
) -> Pin<Box<dyn Future<Output = Result<(), Error>> + Send + 'a>> {
    Box::pin(async move {
        for module in modules {
            let module_env = merge_env(&env, &module.env);

            let ModuleBody::Include(body) = &module.body else {
                out.push(FlatModule {
                    module: module.clone(),
                    source_file: source_file.clone(),
                    base_dir: base_dir.clone(),
                    env: module_env,
                });
                continue;
            };

            for target in &body.targets {
                if is_url(target) {
                    push_cycle_guard(stack, target.clone())?;

                    let response = client
                        .get(target)
                        .send()
                        .await
                        .and_then(|r| r.error_for_status())
                        .map_err(|source| Error::Http {
                            url: target.clone(),
                            source,
                        })?;
                    let text = response.text().await.map_err(|source| Error::Http {
                        url: target.clone(),
                        source,
                    })?;

                    let included = Config::parse(&text)?;
                    included.validate()?;
                    let merged = merge_env(&module_env, &included.env);

                    flatten_modules(
                        &included.modules,
                        target.clone(),
                        base_dir.clone(),
                        merged,
                        out,
                        stack,
                        client,
                    )
                    .await?;

                    stack.pop();
                    continue;
                }

                let resolved_path = resolve_local_target(target, &base_dir);
                let label = canonical_label(&resolved_path);
                push_cycle_guard(stack, label)?;

                if resolved_path.is_dir() {
                    let mut files: Vec<PathBuf> = fs::read_dir(&resolved_path)
                        .map_err(|source| Error::Io {
                            path: resolved_path.display().to_string(),
                            source,
                        })?
                        .filter_map(Result::ok)
                        .map(|entry| entry.path())
                        .filter(|p| {
                            matches!(
                                p.extension().and_then(|e| e.to_str()),
                                Some("yml") | Some("yaml")
                            )
                        })
                        .collect();
                    files.sort();

                    for file in files {
                        include_one_file(&file, &module_env, out, stack, client).await?;
                    }
                } else {
                    include_one_file(&resolved_path, &module_env, out, stack, client).await?;
                }

                stack.pop();
            }
        }

        Ok(())
    })
}

fn push_cycle_guard(stack: &mut Vec<String>, label: String) -> Result<(), Error> {
    if stack.contains(&label) {
        let mut chain = stack.clone();
        chain.push(label);
        return Err(Error::Cycle(chain.join(" → ")));
    }
    stack.push(label);
    Ok(())
}

async fn include_one_file<'a>(
    path: &'a Path,
    parent_env: &'a HashMap<String, String>,
    out: &'a mut Vec<FlatModule>,
    stack: &'a mut Vec<String>,
    client: &'a reqwest::Client,
) -> Result<(), Error> {
    let text = fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.display().to_string(),
        source,
    })?;
    let included = Config::parse(&text)?;
    included.validate()?;
    let merged = merge_env(parent_env, &included.env);
    let base_dir = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();

    flatten_modules(
        &included.modules,
        path.display().to_string(),
        base_dir,
        merged,
        out,
        stack,
        client,
    )
    .await
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs as stdfs;

    #[tokio::test]
    async fn flattens_nested_includes_in_order() {
        let dir = tempfile::tempdir().unwrap();

        stdfs::write(
            dir.path().join("child.yml"),
            r#"
image: "unused"
env:
  CHILD: "1"
modules:
  - type: shell
    command: "echo child"
"#,
        )
        .unwrap();

        stdfs::write(
            dir.path().join("root.yml"),
            r#"
image: "alt:sisyphus"
env:
  ROOT: "1"
modules:
  - type: shell
    command: "echo first"
  - type: include
    targets: ["child.yml"]
  - type: shell
    command: "echo last"
"#,
        )
        .unwrap();

        let flattened = load(&dir.path().join("root.yml")).await.unwrap();
        assert_eq!(flattened.modules.len(), 3);
        assert_eq!(flattened.modules[1].env.get("CHILD").map(String::as_str), Some("1"));
        assert_eq!(flattened.modules[1].env.get("ROOT").map(String::as_str), Some("1"));
    }

    #[tokio::test]
    async fn detects_include_cycle() {
        let dir = tempfile::tempdir().unwrap();

        stdfs::write(
            dir.path().join("a.yml"),
            r#"
image: "alt:sisyphus"
modules:
  - type: include
    targets: ["b.yml"]
"#,
        )
        .unwrap();

        stdfs::write(
            dir.path().join("b.yml"),
            r#"
image: "alt:sisyphus"
modules:
  - type: include
    targets: ["a.yml"]
"#,
        )
        .unwrap();

        let err = load(&dir.path().join("a.yml")).await.unwrap_err();
        assert!(matches!(err, Error::Cycle(_)));
    }

    #[tokio::test]
    async fn directory_include_enumerates_sorted_yaml_files() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("modules.d");
        stdfs::create_dir(&sub).unwrap();

        stdfs::write(
            sub.join("b.yml"),
            "image: unused\nmodules:\n  - type: shell\n    command: echo b\n",
        )
        .unwrap();
        stdfs::write(
            sub.join("a.yaml"),
            "image: unused\nmodules:\n  - type: shell\n    command: echo a\n",
        )
        .unwrap();

        stdfs::write(
            dir.path().join("root.yml"),
            r#"
image: "alt:sisyphus"
modules:
  - type: include
    targets: ["modules.d"]
"#,
        )
        .unwrap();

        let flattened = load(&dir.path().join("root.yml")).await.unwrap();
        assert_eq!(flattened.modules.len(), 2);
        let ModuleBody::Shell(first) = &flattened.modules[0].module.body else {
            panic!("expected shell module")
        };
        assert_eq!(first.command, "echo a");
    }
}
