// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Persistent `hash -> layer id` map backing the image build's layer cache.
//! One JSON file per cache directory, rewritten atomically (temp file +
//! rename) on every `set`, per the redesign note in spec.md §9 — a safer
//! variant of the source's wholesale-rewrite approach.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs_err as fs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const FILE_NAME: &str = "layers.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entry {
    pub layer_id: String,
    pub base_image: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("read layer cache at {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parse layer cache at {path}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("write layer cache at {path}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// `hash -> LayerCacheEntry` map persisted under `<cache_dir>/layers.json`.
#[derive(Debug, Clone)]
pub struct LayerCache {
    path: PathBuf,
    entries: HashMap<String, Entry>,
}

impl LayerCache {
    /// Loads the cache file if present, otherwise starts empty.
    pub fn load(cache_dir: impl AsRef<Path>) -> Result<Self, Error> {
        let path = cache_dir.as_ref().join(FILE_NAME);

        let entries = if path.exists() {
            let raw = fs::read_to_string(&path).map_err(|source| Error::Read {
                path: path.display().to_string(),
                source,
            })?;
            serde_json::from_str(&raw).map_err(|source| Error::Parse {
                path: path.display().to_string(),
                source,
            })?
        } else {
            HashMap::new()
        };

        Ok(Self { path, entries })
    }

    pub fn get(&self, hash: &str) -> Option<&Entry> {
        self.entries.get(hash)
    }

    /// Records `hash -> layer_id` and persists the whole map atomically.
    pub fn set(&mut self, hash: String, layer_id: String, base_image: String) -> Result<(), Error> {
        self.entries.insert(
            hash,
            Entry {
                layer_id,
                base_image,
                created_at: Utc::now(),
            },
        );
        self.persist()
    }

    pub fn clear(&mut self) -> Result<(), Error> {
        self.entries.clear();
        self.persist()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Entry)> {
        self.entries.iter()
    }

    fn persist(&self) -> Result<(), Error> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| Error::Write {
                path: self.path.display().to_string(),
                source,
            })?;
        }

        let serialized = serde_json::to_vec_pretty(&self.entries).map_err(|source| Error::Parse {
            path: self.path.display().to_string(),
            source,
        })?;

        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, &serialized).map_err(|source| Error::Write {
            path: tmp_path.display().to_string(),
            source,
        })?;
        fs::rename(&tmp_path, &self.path).map_err(|source| Error::Write {
            path: self.path.display().to_string(),
            source,
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn set_then_get_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = LayerCache::load(dir.path()).unwrap();

        cache.set("abc".into(), "layer1".into(), "alt:sisyphus".into()).unwrap();

        let reloaded = LayerCache::load(dir.path()).unwrap();
        assert_eq!(reloaded.get("abc").unwrap().layer_id, "layer1");
    }

    #[test]
    fn clear_empties_persisted_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = LayerCache::load(dir.path()).unwrap();
        cache.set("abc".into(), "layer1".into(), "alt:sisyphus".into()).unwrap();
        cache.clear().unwrap();

        let reloaded = LayerCache::load(dir.path()).unwrap();
        assert!(reloaded.is_empty());
    }

    #[test]
    fn missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LayerCache::load(dir.path()).unwrap();
        assert!(cache.is_empty());
    }
}
