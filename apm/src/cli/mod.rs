// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::path::{Path, PathBuf};

use clap::{Args, CommandFactory, Parser};
use clap_complete::generate_to;
use clap_complete::shells::{Bash, Fish, Zsh};
use clap_mangen::Man;
use fs_err::{self as fs, File};
use thiserror::Error;

mod cache;
mod system;

use crate::env::{self, Env};

#[derive(Debug, Parser)]
#[command(name = "apm", about = "Atomic-image package manager build engine")]
pub struct Command {
    #[command(flatten)]
    pub global: Global,
    #[command(subcommand)]
    pub subcommand: Option<Subcommand>,
}

#[derive(Debug, Args)]
pub struct Global {
    #[arg(long, global = true, hide = true)]
    pub generate_manpages: Option<PathBuf>,
    #[arg(long, global = true, hide = true)]
    pub generate_completions: Option<PathBuf>,
}

#[derive(Debug, clap::Subcommand)]
pub enum Subcommand {
    /// Build or apply a manifest against a system image
    System(system::Command),
    /// Inspect or clear the image build's layer cache
    Cache(cache::Command),
}

pub async fn process() -> Result<(), Error> {
    let command = Command::parse();
    let Command { global, subcommand } = command;

    if let Some(dir) = global.generate_manpages {
        generate_manpages(&dir)?;
        return Ok(());
    }

    if let Some(dir) = global.generate_completions {
        generate_completions(&dir)?;
        return Ok(());
    }

    let env = Env::new(None, None, None)?;

    match subcommand {
        Some(Subcommand::System(c)) => system::handle(c, env).await?,
        Some(Subcommand::Cache(c)) => cache::handle(c, env)?,
        None => {
            Command::command().print_help().ok();
            println!();
        }
    }

    Ok(())
}

fn generate_manpages(dir: &Path) -> Result<(), Error> {
    fs::create_dir_all(dir)?;
    let main_cmd = Command::command();

    let main_man = Man::new(main_cmd.clone());
    let mut buffer = File::create(dir.join("apm.1"))?;
    main_man.render(&mut buffer)?;

    for sub in main_cmd.get_subcommands() {
        let sub_man = Man::new(sub.clone());
        let mut buffer = File::create(dir.join(format!("apm-{}.1", sub.get_name())))?;
        sub_man.render(&mut buffer)?;

        for nested in sub.get_subcommands() {
            let nested_man = Man::new(nested.clone());
            let mut buffer = File::create(dir.join(format!("apm-{}-{}.1", sub.get_name(), nested.get_name())))?;
            nested_man.render(&mut buffer)?;
        }
    }

    Ok(())
}

fn generate_completions(dir: &Path) -> Result<(), Error> {
    fs::create_dir_all(dir)?;
    let mut cmd = Command::command();
    generate_to(Bash, &mut cmd, "apm", dir)?;
    generate_to(Fish, &mut cmd, "apm", dir)?;
    generate_to(Zsh, &mut cmd, "apm", dir)?;
    Ok(())
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("system")]
    System(#[from] system::Error),
    #[error("cache")]
    Cache(#[from] cache::Error),
    #[error("env")]
    Env(#[from] env::Error),
    #[error("io")]
    Io(#[from] std::io::Error),
}
