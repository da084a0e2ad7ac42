// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! `apm system apply`: runs a manifest's full module chain directly against
//! the running host (spec.md §4.8's "apply" mode), appending an image
//! history row when the resolved config changed since the last apply.

use std::collections::HashMap;
use std::path::PathBuf;

use apm_executor::Executor;
use apm_history::HistoryDb;
use apm_modules::FsRepoService;
use apm_package::PackageService;
use clap::Parser;
use thiserror::Error;

use crate::apt::ShellAptBackend;
use crate::config;
use crate::env::Env;
use crate::publisher::ConsolePublisher;

#[derive(Debug, Parser)]
#[command(about = "Apply a manifest directly to the running host")]
pub struct Command {
    /// Path to the manifest to apply
    #[arg(long)]
    config: PathBuf,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("load manifest")]
    Config(#[from] config::Error),
    #[error("run module")]
    Executor(#[from] apm_executor::Error),
    #[error("image history")]
    History(#[from] apm_history::Error),
    #[error("serialize manifest for image history")]
    Serialize(#[from] serde_yaml::Error),
}

pub async fn handle(command: Command, env: Env) -> Result<(), Error> {
    let Command { config: config_path } = command;
    let (config, flattened) = config::load(&config_path).await?;

    let publisher: Box<dyn apm_package::Publisher> = Box::new(ConsolePublisher::default());
    let executor = Executor::new(
        PackageService::new(ShellAptBackend::default(), publisher),
        Box::new(FsRepoService {
            sources_dir: env.repos_dir.clone(),
        }),
    );

    let process_env: HashMap<String, String> = std::env::vars().collect();
    executor.run(&flattened, &process_env)?;

    let history = HistoryDb::new(&env.history_db.to_string_lossy())?;
    let serialized = serde_yaml::to_string(&config)?;
    if history.record_if_changed(&flattened.image, &serialized)? {
        log::info!("recorded new image history entry for {}", flattened.image);
    }

    println!("applied {}", config_path.display());
    Ok(())
}
