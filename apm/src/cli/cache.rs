// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! `apm cache clear`/`apm cache list`: direct inspection and maintenance of
//! the image build's persisted layer cache.

use std::path::PathBuf;

use apm_cache::LayerCache;
use clap::{Parser, Subcommand};
use thiserror::Error;

use crate::env::Env;

#[derive(Debug, Parser)]
pub struct Command {
    #[command(subcommand)]
    subcommand: Action,
}

#[derive(Debug, Subcommand)]
enum Action {
    /// Remove every entry from the layer cache
    Clear {
        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },
    /// List the layer cache's entries
    List {
        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("layer cache")]
    Cache(#[from] apm_cache::Error),
}

pub fn handle(command: Command, env: Env) -> Result<(), Error> {
    match command.subcommand {
        Action::Clear { cache_dir } => {
            let dir = cache_dir.unwrap_or(env.cache_dir);
            let mut cache = LayerCache::load(&dir)?;
            let count = cache.len();
            cache.clear()?;
            println!("cleared {count} layer cache entries from {}", dir.display());
        }
        Action::List { cache_dir } => {
            let dir = cache_dir.unwrap_or(env.cache_dir);
            let cache = LayerCache::load(&dir)?;
            if cache.is_empty() {
                println!("layer cache at {} is empty", dir.display());
            }
            for (hash, entry) in cache.iter() {
                println!("{hash}  {}  {}  ({})", entry.layer_id, entry.base_image, entry.created_at);
            }
        }
    }
    Ok(())
}
