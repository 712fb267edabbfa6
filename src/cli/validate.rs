// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 firmament contributors

//! Validate command - check a cluster file

use colored::Colorize;
use miette::Result;

use crate::pipeline::{Cluster, ClusterValidator, DependencyGraph};
use crate::utils::{plural, print_error, print_section, print_success, print_warning};

/// Run the validate command
pub async fn run(config: String, verbose: bool) -> Result<()> {
    println!("{}", "Validating cluster...".bold());
    println!();

    let cwd = std::env::current_dir()
        .map_err(|e| miette::miette!("Failed to get current directory: {}", e))?;
    let config_path = Cluster::resolve_path(&config, &cwd);

    let cluster = match Cluster::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            print_error("Failed to load cluster file");
            println!();
            return Err(e.into());
        }
    };

    print_success(&format!("{} is valid JSON", config_path.display()));

    let validation = ClusterValidator::validate(&cluster);
    let missing_files = ClusterValidator::validate_files(&cluster, &cwd);

    if !validation.errors.is_empty() {
        print_section(&"Errors".red().to_string());
        for error in &validation.errors {
            print_error(error);
        }
    }

    if !missing_files.is_empty() {
        print_section(&"Missing files".yellow().to_string());
        for missing in &missing_files {
            print_warning(missing);
        }
    }

    if !validation.warnings.is_empty() {
        print_section(&"Warnings".yellow().to_string());
        for warning in &validation.warnings {
            print_warning(warning);
        }
    }

    if verbose {
        print_section(&format!(
            "Cluster summary ({})",
            plural(cluster.containers.len(), "container")
        ));
        for container in &cluster.containers {
            let links = if container.links().is_empty() {
                String::new()
            } else {
                format!(" [links: {}]", container.links().join(", "))
            };
            let apps = if container.attached_apps.is_empty() {
                String::new()
            } else {
                format!(" [apps: {}]", container.attached_apps.len())
            };
            println!(
                "    - {} ({}){}{}",
                container.name,
                container.image,
                links.dimmed(),
                apps.dimmed()
            );
        }

        if validation.is_valid() {
            let resolved =
                DependencyGraph::from_specs(&cluster.containers).and_then(|g| g.resolve());
            if let Ok(order) = resolved {
                println!("  Startup order: {}", order.join(" → "));
            }
        }
    }

    println!();

    if !validation.is_valid() {
        return Err(miette::miette!(
            "Cluster validation failed with {}",
            plural(validation.errors.len(), "error")
        ));
    }

    if validation.has_warnings() || !missing_files.is_empty() {
        println!("{}", "Cluster is valid but has warnings.".yellow().bold());
    } else {
        println!("{}", "Cluster is valid!".green().bold());
    }

    Ok(())
}
