// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 firmament contributors

//! Graph command - show container links as a graph

use miette::Result;

use super::GraphFormat;
use crate::pipeline::{Cluster, DependencyGraph};

/// Run the graph command
pub async fn run(config: String, format: GraphFormat, _verbose: bool) -> Result<()> {
    let cwd = std::env::current_dir()
        .map_err(|e| miette::miette!("Failed to get current directory: {}", e))?;
    let cluster = Cluster::from_file(&Cluster::resolve_path(&config, &cwd))?;

    let graph = DependencyGraph::from_specs(&cluster.containers)?;

    let output = match format {
        GraphFormat::Text => graph.to_text()?,
        GraphFormat::Dot => graph.to_dot(),
        GraphFormat::Mermaid => graph.to_mermaid(),
    };

    print!("{}", output);

    Ok(())
}
