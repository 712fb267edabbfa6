// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 firmament contributors

//! Template command - write a starter cluster file

use colored::Colorize;
use miette::Result;
use std::io::{self, BufRead, Write};
use std::path::Path;

use crate::errors::{FirmamentError, FirmamentResult};
use crate::pipeline::Cluster;
use crate::utils::{plural, print_success};

/// Run the template command
pub async fn run(output: String, full: bool, yes: bool) -> Result<()> {
    let cwd = std::env::current_dir()
        .map_err(|e| miette::miette!("Failed to get current directory: {}", e))?;
    let path = Cluster::resolve_path(&output, &cwd);

    if path.exists() && !yes {
        print!(
            "Config file '{}' already exists. Overwrite? [Y/n] ",
            path.display()
        );
        io::stdout().flush().ok();

        if !confirm_overwrite(&mut io::stdin().lock()) {
            println!("{}", "Canceling JSON template creation!".yellow());
            return Ok(());
        }
    }

    let cluster = write_template(&path, full)?;
    print_success(&format!(
        "Wrote {} template with {} to {}",
        if full { "full" } else { "basic" },
        plural(cluster.containers.len(), "container"),
        path.display()
    ));

    Ok(())
}

/// Read one answer line. End of input or a failed read declines.
fn confirm_overwrite(reader: &mut impl BufRead) -> bool {
    let mut input = String::new();
    match reader.read_line(&mut input) {
        Ok(0) => false,
        Ok(_) => accepts_overwrite(&input),
        Err(e) => {
            tracing::warn!("could not read answer from stdin: {}", e);
            false
        }
    }
}

/// Empty answers count as yes
fn accepts_overwrite(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "" | "y" | "yes")
}

/// Serialize the starter cluster to `path`
pub fn write_template(path: &Path, full: bool) -> FirmamentResult<Cluster> {
    let cluster = Cluster::template(full);
    let json = cluster.to_json()?;

    std::fs::write(path, format!("{}\n", json)).map_err(|e| FirmamentError::FileWriteError {
        path: path.to_path_buf(),
        error: e.to_string(),
    })?;

    Ok(cluster)
}
