// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::{Path, PathBuf};

use apm_manifest::body::{parse_perm, CopyBody, LinkBody, MergeBody, MkdirBody, MoveBody, RemoveBody, ReplaceBody};
use fs_err as fs;

use crate::{io_err, Error, HandlerCtx};

fn resolve(path: &str, base_dir: &Path) -> PathBuf {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base_dir.join(candidate)
    }
}

pub(crate) fn copy(body: &CopyBody, ctx: &HandlerCtx<'_>) -> Result<serde_json::Value, Error> {
    let source = resolve(&body.source, ctx.base_dir);
    let destination = Path::new(&body.destination);

    if destination.exists() && !body.replace {
        return Ok(serde_json::json!({ "skipped": true }));
    }

    let meta = fs::metadata(&source).map_err(|e| io_err(&source, e))?;
    if meta.is_dir() {
        copy_dir(&source, destination)?;
    } else {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        fs::copy(&source, destination).map_err(|e| io_err(destination, e))?;
    }

    Ok(serde_json::json!({ "destination": body.destination }))
}

fn copy_dir(source: &Path, destination: &Path) -> Result<(), Error> {
    fs::create_dir_all(destination).map_err(|e| io_err(destination, e))?;

    for entry in fs::read_dir(source).map_err(|e| io_err(source, e))?.flatten() {
        let path = entry.path();
        let Some(file_name) = path.file_name() else { continue };
        let dest = destination.join(file_name);
        let meta = entry.metadata().map_err(|e| io_err(&path, e))?;

        if meta.is_dir() {
            copy_dir(&path, &dest)?;
        } else if meta.is_file() {
            fs::copy(&path, &dest).map_err(|e| io_err(&dest, e))?;
        } else if meta.is_symlink() {
            let target = fs::read_link(&path).map_err(|e| io_err(&path, e))?;
            symlink(target, &dest).map_err(|e| io_err(&dest, e))?;
        }
    }

    Ok(())
}

pub(crate) fn mov(body: &MoveBody) -> Result<serde_json::Value, Error> {
    let source = Path::new(&body.source);
    let destination = Path::new(&body.destination);

    if destination.exists() && !body.replace {
        return Ok(serde_json::json!({ "skipped": true }));
    }
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }

    fs::rename(source, destination).map_err(|e| io_err(source, e))?;

    if body.create_link {
        symlink(destination, source).map_err(|e| io_err(source, e))?;
    }

    Ok(serde_json::json!({ "destination": body.destination }))
}

pub(crate) fn merge(body: &MergeBody, ctx: &HandlerCtx<'_>) -> Result<serde_json::Value, Error> {
    let source = resolve(&body.source, ctx.base_dir);
    let destination = Path::new(&body.destination);

    let addition = fs::read_to_string(&source).map_err(|e| io_err(&source, e))?;

    if !destination.exists() {
        if let Some(perm) = &body.create_file_perm {
            let mode = parse_perm(perm).unwrap_or(0o644);
            fs::write(destination, "").map_err(|e| io_err(destination, e))?;
            fs::set_permissions(destination, std::fs::Permissions::from_mode(mode)).map_err(|e| io_err(destination, e))?;
        }
    }

    let existing = fs::read_to_string(destination).unwrap_or_default();
    let merged = if body.prepend {
        format!("{addition}{existing}")
    } else {
        format!("{existing}{addition}")
    };

    fs::write(destination, merged).map_err(|e| io_err(destination, e))?;

    Ok(serde_json::json!({ "destination": body.destination }))
}

pub(crate) fn mkdir(body: &MkdirBody) -> Result<serde_json::Value, Error> {
    let mode = parse_perm(&body.perm).unwrap_or(0o755);

    for target in &body.targets {
        let path = Path::new(target);
        fs::create_dir_all(path).map_err(|e| io_err(path, e))?;
        fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(|e| io_err(path, e))?;
    }

    Ok(serde_json::json!({ "created": body.targets }))
}

pub(crate) fn remove(body: &RemoveBody) -> Result<serde_json::Value, Error> {
    for target in &body.targets {
        let path = Path::new(target);
        if !path.exists() {
            continue;
        }

        if body.inside {
            for entry in fs::read_dir(path).map_err(|e| io_err(path, e))?.flatten() {
                let entry_path = entry.path();
                let meta = entry.metadata().map_err(|e| io_err(&entry_path, e))?;
                if meta.is_dir() {
                    fs::remove_dir_all(&entry_path).map_err(|e| io_err(&entry_path, e))?;
                } else {
                    fs::remove_file(&entry_path).map_err(|e| io_err(&entry_path, e))?;
                }
            }
        } else if path.is_dir() {
            fs::remove_dir_all(path).map_err(|e| io_err(path, e))?;
        } else {
            fs::remove_file(path).map_err(|e| io_err(path, e))?;
        }
    }

    Ok(serde_json::json!({ "removed": body.targets }))
}

pub(crate) fn link(body: &LinkBody) -> Result<serde_json::Value, Error> {
    let target = Path::new(&body.target);

    if body.replace && target.exists() {
        if target.is_dir() && !target.is_symlink() {
            fs::remove_dir_all(target).map_err(|e| io_err(target, e))?;
        } else {
            fs::remove_file(target).map_err(|e| io_err(target, e))?;
        }
    }

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }

    let to = Path::new(&body.to);
    let link_value = if to.is_absolute() {
        let dir = target.parent().unwrap_or_else(|| Path::new("/"));
        relative_from(dir, to)
    } else {
        to.to_path_buf()
    };

    symlink(&link_value, target).map_err(|e| io_err(target, e))?;

    Ok(serde_json::json!({ "target": body.target, "to": link_value.to_string_lossy() }))
}

/// Shortest relative path from `from` to `to`, both assumed absolute and
/// lexically normalized (no `..`/`.` components, no symlink resolution).
fn relative_from(from: &Path, to: &Path) -> PathBuf {
    let from_components: Vec<_> = from.components().collect();
    let to_components: Vec<_> = to.components().collect();

    let common = from_components
        .iter()
        .zip(to_components.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut result = PathBuf::new();
    for _ in common..from_components.len() {
        result.push("..");
    }
    for component in &to_components[common..] {
        result.push(component.as_os_str());
    }
    result
}

pub(crate) fn replace(body: &ReplaceBody) -> Result<serde_json::Value, Error> {
    let target = Path::new(&body.target);
    let pattern = regex::Regex::new(&body.pattern)?;

    let meta = fs::metadata(target).map_err(|e| io_err(target, e))?;
    let content = fs::read_to_string(target).map_err(|e| io_err(target, e))?;

    let replaced: String = content
        .lines()
        .map(|line| pattern.replace_all(line, body.repl.as_str()).into_owned())
        .collect::<Vec<_>>()
        .join("\n");
    let replaced = if content.ends_with('\n') {
        format!("{replaced}\n")
    } else {
        replaced
    };

    fs::write(target, replaced).map_err(|e| io_err(target, e))?;
    fs::set_permissions(target, meta.permissions()).map_err(|e| io_err(target, e))?;

    Ok(serde_json::json!({ "target": body.target }))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn relative_from_computes_shortest_path() {
        let from = Path::new("/usr/bin");
        let to = Path::new("/usr/lib/foo");
        assert_eq!(relative_from(from, to), PathBuf::from("../lib/foo"));
    }

    #[test]
    fn merge_appends_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("src.txt");
        let destination = dir.path().join("dst.txt");
        fs::write(&source, "world\n").unwrap();
        fs::write(&destination, "hello\n").unwrap();

        let body = MergeBody {
            source: source.to_string_lossy().into_owned(),
            destination: destination.to_string_lossy().into_owned(),
            create_file_perm: None,
            prepend: false,
        };
        let ctx = HandlerCtx {
            base_dir: dir.path(),
            resources_dir: dir.path(),
        };
        merge(&body, &ctx).unwrap();

        assert_eq!(fs::read_to_string(&destination).unwrap(), "hello\nworld\n");
    }

    #[test]
    fn replace_preserves_permissions() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("file.txt");
        fs::write(&target, "foo=1\nbar=2\n").unwrap();
        fs::set_permissions(&target, std::fs::Permissions::from_mode(0o640)).unwrap();

        let body = ReplaceBody {
            target: target.to_string_lossy().into_owned(),
            pattern: r"^foo=\d+$".to_owned(),
            repl: "foo=9".to_owned(),
        };
        replace(&body).unwrap();

        assert_eq!(fs::read_to_string(&target).unwrap(), "foo=9\nbar=2\n");
        let mode = fs::metadata(&target).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o640);
    }
}
