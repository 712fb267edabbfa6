// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 firmament contributors

//! Build command - run the full cluster pipeline

use colored::Colorize;
use miette::Result;
use std::process::ExitCode;
use std::sync::Arc;

use crate::executors::ShellRunner;
use crate::errors::FirmamentError;
use crate::pipeline::{
    check_unique_names, Cluster, OrchestratorOptions, PipelineOrchestrator, PipelineOutcome,
};
use crate::runtime::DockerRuntime;
use crate::utils::{
    plural, print_info, print_section, print_warning, ProgressReporter, SilentProgress,
    TerminalProgress,
};

/// Run the build command
pub async fn run(
    input: String,
    deploy_tool: String,
    no_progress: bool,
    docker: Option<String>,
    verbose: bool,
) -> Result<ExitCode> {
    let cwd = std::env::current_dir()
        .map_err(|e| miette::miette!("Failed to get current directory: {}", e))?;
    let config_path = Cluster::resolve_path(&input, &cwd);

    let cluster = Cluster::from_file(&config_path)?;
    print_info(&format!(
        "Loaded {} from {}",
        plural(cluster.containers.len(), "container"),
        config_path.display()
    ));

    check_unique_names(&cluster.containers)?;

    let host = docker.as_deref();
    let runtime = DockerRuntime::connect(host).await.map_err(|e| {
        FirmamentError::container_operation("connect", host.unwrap_or("local daemon"), e)
    })?;

    let progress: Arc<dyn ProgressReporter> = if no_progress {
        Arc::new(SilentProgress)
    } else {
        Arc::new(TerminalProgress::new())
    };

    let orchestrator = PipelineOrchestrator::new(
        Arc::new(runtime),
        Arc::new(ShellRunner::new()),
        progress,
        OrchestratorOptions {
            working_dir: cwd,
            deploy_tool,
        },
    );

    let mut outcome = orchestrator.build(&cluster.containers).await?;
    let code = outcome.exit_code();

    if verbose {
        print_details(&outcome);
    }

    if !outcome.deployment_failures.is_empty() {
        print_section("Deployment failures");
        for failure in &outcome.deployment_failures {
            print_warning(&failure.to_string());
        }
    }

    if let Some(abort) = outcome.aborted.take() {
        eprintln!();
        eprintln!("{:?}", miette::Report::new(abort.error));
    }

    Ok(ExitCode::from(code))
}

fn print_details(outcome: &PipelineOutcome) {
    print_section("Summary");

    let list = |items: &[String]| {
        if items.is_empty() {
            "-".dimmed().to_string()
        } else {
            items.join(", ")
        }
    };

    println!("  Missing images:  {}", list(&outcome.missing_images));
    println!("  Pulled:          {}", list(&outcome.pulled_images));
    println!("  Built:           {}", list(&outcome.built_images));
    println!("  Startup order:   {}", list(&outcome.startup_order));
    println!("  Started:         {}", list(&outcome.started_containers));
    println!("  Deployed apps:   {}", list(&outcome.deployed_apps));

    for failure in &outcome.pull_failures {
        print_warning(&failure.to_string());
    }
}
