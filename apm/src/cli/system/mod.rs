// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use clap::{Parser, Subcommand};
use thiserror::Error;

use crate::env::Env;

pub mod apply;
pub mod image;

#[derive(Debug, Parser)]
pub struct Command {
    #[command(subcommand)]
    subcommand: Action,
}

#[derive(Debug, Subcommand)]
enum Action {
    /// Build a container image from a manifest
    Image(image::Command),
    /// Apply a manifest directly to the running host
    Apply(apply::Command),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("image")]
    Image(#[from] image::Error),
    #[error("apply")]
    Apply(#[from] apply::Error),
}

pub async fn handle(command: Command, env: Env) -> Result<(), Error> {
    match command.subcommand {
        Action::Image(c) => image::handle(c, env).await?,
        Action::Apply(c) => apply::handle(c, env).await?,
    }
    Ok(())
}
