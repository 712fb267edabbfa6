// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 firmament contributors

//! firmament - Docker cluster build and deploy
//!
//! Build, link and start a cluster of containers, then deploy their apps.

use clap::Parser;
use miette::Result;
use std::process::ExitCode;
use std::sync::Mutex;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use firmament::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    init_tracing(&cli)?;
    firmament::utils::configure_colors();

    // Change to specified directory if provided
    if let Some(ref dir) = cli.directory {
        std::env::set_current_dir(dir).map_err(|e| {
            miette::miette!("Failed to change to directory '{}': {}", dir.display(), e)
        })?;
    }

    // Dispatch to command handlers
    match cli.command {
        Commands::Build {
            input,
            deploy_tool,
            no_progress,
        } => {
            firmament::cli::build::run(input, deploy_tool, no_progress, cli.docker, cli.verbose)
                .await
        }
        Commands::Template { output, full, yes } => {
            firmament::cli::template::run(output, full, yes).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Validate { config } => {
            firmament::cli::validate::run(config, cli.verbose).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Graph { config, format } => {
            firmament::cli::graph::run(config, format, cli.verbose).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// `FIRMAMENT_LOG` overrides the level flags entirely
fn init_tracing(cli: &Cli) -> Result<()> {
    let level = if cli.verbose {
        "debug"
    } else {
        cli.log_level.as_str()
    };
    let filter = EnvFilter::try_from_env("FIRMAMENT_LOG")
        .unwrap_or_else(|_| EnvFilter::new(format!("firmament={}", level)));

    let registry = tracing_subscriber::registry().with(filter);

    match &cli.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| {
                    miette::miette!("Failed to open log file '{}': {}", path.display(), e)
                })?;

            registry
                .with(
                    fmt::layer()
                        .with_target(false)
                        .with_ansi(false)
                        .with_writer(Mutex::new(file)),
                )
                .init();
        }
        None => registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init(),
    }

    Ok(())
}
