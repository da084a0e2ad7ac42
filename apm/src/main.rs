// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::error::Error as _;

use apm_tui::Stylize;

mod apt;
mod cli;
mod config;
mod env;
mod publisher;

#[tokio::main]
async fn main() {
    env_logger::init();

    if let Err(error) = cli::process().await {
        report_error(error);
        std::process::exit(1);
    }
}

fn report_error(error: cli::Error) {
    let message = sources(&error).join(": ");
    eprintln!("{}: {message}", "Error".red());
}

fn sources(error: &cli::Error) -> Vec<String> {
    let mut chain = vec![error.to_string()];
    let mut source = error.source();
    while let Some(err) = source.take() {
        chain.push(err.to_string());
        source = err.source();
    }
    chain
}
