// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 firmament contributors

//! CLI command definitions and handlers
//!
//! Defines the command-line interface for firmament.

pub mod build;
pub mod graph;
pub mod template;
pub mod validate;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::pipeline::{DEFAULT_CONFIG_FILE, DEFAULT_DEPLOY_TOOL};

/// Docker cluster build and deploy tool
///
/// Builds, links and starts a cluster of containers described in a JSON file,
/// then deploys the applications attached to them.
#[derive(Parser, Debug)]
#[clap(
    name = "firmament",
    version,
    about = "Build, start and deploy a cluster of linked Docker containers",
    long_about = None,
    after_help = "Examples:\n\
        firmament template              Write a starter firmament.json\n\
        firmament validate              Check firmament.json for problems\n\
        firmament graph --format dot    Show the container link graph\n\
        firmament build -i cluster      Build and start cluster.json\n\n\
        See 'firmament <command> --help' for more information on a specific command."
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[clap(short, long, global = true)]
    pub verbose: bool,

    /// Change to directory before executing
    #[clap(short = 'C', long, global = true, value_name = "DIR")]
    pub directory: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[clap(
        long,
        global = true,
        env = "FIRMAMENT_LOG_LEVEL",
        default_value = "info",
        value_name = "LEVEL"
    )]
    pub log_level: String,

    /// Write logs to a file instead of stderr
    #[clap(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Docker daemon address, e.g. unix:///var/run/docker.sock or tcp://host:2375
    /// (default: DOCKER_HOST, then the local socket)
    #[clap(long, global = true, env = "FIRMAMENT_DOCKER", value_name = "HOST")]
    pub docker: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build images, start containers and deploy attached applications
    #[clap(visible_alias = "b")]
    Build {
        /// Cluster file (".json" is appended when missing)
        #[clap(short, long, default_value = DEFAULT_CONFIG_FILE)]
        input: String,

        /// Program run as `<tool> build` and `<tool> deploy <url>` in each checkout
        #[clap(
            long,
            env = "FIRMAMENT_DEPLOY_TOOL",
            default_value = DEFAULT_DEPLOY_TOOL,
            value_name = "PROGRAM"
        )]
        deploy_tool: String,

        /// Disable pull and build progress bars
        #[clap(long)]
        no_progress: bool,
    },

    /// Write a starter cluster file
    #[clap(visible_alias = "t")]
    Template {
        /// Output file (".json" is appended when missing)
        #[clap(short, long, default_value = DEFAULT_CONFIG_FILE)]
        output: String,

        /// Fill in every supported container option
        #[clap(short, long)]
        full: bool,

        /// Overwrite an existing file without asking
        #[clap(short, long)]
        yes: bool,
    },

    /// Validate a cluster file
    Validate {
        /// Cluster file to validate
        #[clap(default_value = DEFAULT_CONFIG_FILE)]
        config: String,
    },

    /// Show the container link graph
    Graph {
        /// Cluster file
        #[clap(default_value = DEFAULT_CONFIG_FILE)]
        config: String,

        /// Output format
        #[clap(short, long, value_enum, default_value_t = GraphFormat::Text)]
        format: GraphFormat,
    },
}

/// Graph output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GraphFormat {
    /// Resolved startup order
    Text,
    Dot,
    Mermaid,
}
