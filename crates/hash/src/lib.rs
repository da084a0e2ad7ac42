// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Module content hashing: combines the resolved body, env, prior-hash
//! (chain-of-hashes per spec.md §9's resolved open question), source file
//! path and referenced file/directory content into one SHA-256 digest.

use std::collections::BTreeMap;
use std::path::Path;

use apm_expr::Lookup;
use apm_manifest::{body::ModuleBody, Module};
use fs_err as fs;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("resolve placeholder in module body")]
    Expr(#[from] apm_expr::Error),
    #[error("read content for hashing: {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("serialize module body for hashing")]
    Serialize(#[from] serde_json::Error),
}

/// A module is cacheable only when its identity does not depend on runtime
/// state: no `if` condition, and no `${{ Modules.* }}` reference anywhere in
/// its body.
pub fn is_cacheable(module: &Module) -> bool {
    if module.if_.is_some() {
        return false;
    }
    let Ok(value) = serde_json::to_value(&module.body) else {
        return false;
    };
    !references_module_output(&value)
}

fn references_module_output(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::String(s) => apm_expr::references_module_output(s),
        serde_json::Value::Array(items) => items.iter().any(references_module_output),
        serde_json::Value::Object(map) => map.values().any(references_module_output),
        _ => false,
    }
}

/// Computes the content-addressed hash for one module, hex-encoded.
///
/// `prior` is the previous module's hash in the chain (or the base image
/// reference for the first module).
pub fn compute(
    module: &Module,
    ctx: &impl Lookup,
    env: &BTreeMap<String, String>,
    prior: &str,
    source_file: &Path,
    base_dir: &Path,
) -> Result<String, Error> {
    let resolved_body = resolve_value(serde_json::to_value(&module.body)?, ctx)?;
    let content = content_hash(&module.body, base_dir)?;

    let input = serde_json::json!({
        "type": module.body.type_name(),
        "body": resolved_body,
        "env": env,
        "prior": prior,
        "source": source_file.to_string_lossy(),
        "content": content,
    });

    // serde_json's default `Map` is BTreeMap-backed (no `preserve_order`
    // feature requested), so this serialization is already canonical.
    let canonical = serde_json::to_vec(&input)?;

    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    Ok(hex::encode(hasher.finalize()))
}

fn resolve_value(value: serde_json::Value, ctx: &impl Lookup) -> Result<serde_json::Value, apm_expr::Error> {
    Ok(match value {
        serde_json::Value::String(s) => serde_json::Value::String(apm_expr::resolve_placeholders(&s, ctx)?),
        serde_json::Value::Array(items) => {
            let mut resolved = Vec::with_capacity(items.len());
            for item in items {
                resolved.push(resolve_value(item, ctx)?);
            }
            serde_json::Value::Array(resolved)
        }
        serde_json::Value::Object(map) => {
            let mut resolved = serde_json::Map::new();
            for (k, v) in map {
                resolved.insert(k, resolve_value(v, ctx)?);
            }
            serde_json::Value::Object(resolved)
        }
        other => other,
    })
}

fn content_hash(body: &ModuleBody, base_dir: &Path) -> Result<String, Error> {
    match body {
        ModuleBody::Copy(b) => hash_source_path(&b.source, base_dir),
        ModuleBody::Merge(b) => hash_source_path(&b.source, base_dir),
        ModuleBody::Shell(b) => {
            if looks_like_script_path(&b.command) {
                hash_source_path(&b.command, base_dir)
            } else {
                Ok(String::new())
            }
        }
        _ => Ok(String::new()),
    }
}

fn looks_like_script_path(command: &str) -> bool {
    let is_path_like = command.starts_with('/') || command.starts_with("./");
    is_path_like && !command.contains(char::is_whitespace)
}

fn hash_source_path(source: &str, base_dir: &Path) -> Result<String, Error> {
    let path = if Path::new(source).is_absolute() {
        Path::new(source).to_path_buf()
    } else {
        base_dir.join(source)
    };

    if path.is_dir() {
        hash_directory(&path)
    } else {
        hash_file(&path)
    }
}

fn hash_file(path: &Path) -> Result<String, Error> {
    let bytes = fs::read(path).map_err(|source| Error::Io {
        path: path.display().to_string(),
        source,
    })?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// SHA-256 of a sorted concatenation of `relPath:fileSHA256` entries,
/// traversed with `jwalk` for deterministic, parallel directory scanning.
fn hash_directory(dir: &Path) -> Result<String, Error> {
    let mut entries = Vec::new();

    for entry in jwalk::WalkDir::new(dir).sort(true) {
        let entry = entry.map_err(|source| Error::Io {
            path: dir.display().to_string(),
            source: std::io::Error::new(std::io::ErrorKind::Other, source),
        })?;

        if !entry.file_type().is_file() {
            continue;
        }

        let rel = entry
            .path()
            .strip_prefix(dir)
            .unwrap_or(entry.path().as_path())
            .to_string_lossy()
            .into_owned();
        let file_hash = hash_file(entry.path().as_path())?;
        entries.push(format!("{rel}:{file_hash}"));
    }

    entries.sort();

    let mut hasher = Sha256::new();
    hasher.update(entries.join("\n").as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod test {
    use super::*;
    use apm_manifest::body::CopyBody;
    use std::collections::HashMap as Map;

    struct EmptyCtx;
    impl Lookup for EmptyCtx {
        fn lookup(&self, _path: &[&str]) -> Option<apm_expr::Value> {
            None
        }
    }

    fn copy_module(source: &str, destination: &str) -> Module {
        Module {
            name: None,
            id: None,
            if_: None,
            env: Map::new(),
            body: ModuleBody::Copy(CopyBody {
                source: source.into(),
                destination: destination.into(),
                replace: false,
            }),
            output: Map::new(),
        }
    }

    #[test]
    fn stable_hash_for_identical_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("src.txt");
        fs::write(&file, "hello").unwrap();

        let module = copy_module(file.to_str().unwrap(), "/tmp/dst.txt");
        let env = BTreeMap::new();

        let first = compute(&module, &EmptyCtx, &env, "base", Path::new("manifest.yml"), dir.path()).unwrap();
        let second = compute(&module, &EmptyCtx, &env, "base", Path::new("manifest.yml"), dir.path()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn hash_changes_when_file_content_changes() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("src.txt");
        fs::write(&file, "hello").unwrap();

        let module = copy_module(file.to_str().unwrap(), "/tmp/dst.txt");
        let env = BTreeMap::new();

        let before = compute(&module, &EmptyCtx, &env, "base", Path::new("manifest.yml"), dir.path()).unwrap();

        fs::write(&file, "goodbye").unwrap();
        let after = compute(&module, &EmptyCtx, &env, "base", Path::new("manifest.yml"), dir.path()).unwrap();

        assert_ne!(before, after);
    }

    #[test]
    fn module_with_if_is_not_cacheable() {
        let mut module = copy_module("src.txt", "/tmp/dst.txt");
        module.if_ = Some("true".into());
        assert!(!is_cacheable(&module));
    }

    #[test]
    fn module_referencing_output_is_not_cacheable() {
        let module = copy_module("${{ Modules.base.Output.path }}", "/tmp/dst.txt");
        assert!(!is_cacheable(&module));
    }

    #[test]
    fn plain_module_is_cacheable() {
        let module = copy_module("src.txt", "/tmp/dst.txt");
        assert!(is_cacheable(&module));
    }
}
