// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 firmament contributors

//! Error types
//!
//! Every failure the pipeline can report is a [`FirmamentError`]. Variants
//! carry `miette` diagnostic codes and help text so that aborted runs
//! print something the operator can act on.

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

use crate::runtime::RuntimeError;

/// Result type for firmament operations
pub type FirmamentResult<T> = Result<T, FirmamentError>;

/// Main error type for firmament
#[derive(Error, Debug, Diagnostic)]
pub enum FirmamentError {
    // ─────────────────────────────────────────────────────────────────────────
    // Cluster Specification Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Container name '{name}' is used by more than one container")]
    #[diagnostic(
        code(firmament::duplicate_name),
        help("Container names must be unique within a cluster specification")
    )]
    DuplicateName { name: String },

    #[error(
        "Circular dependency '{dependency}' is required by '{dependent}': {}",
        .path.join(" -> ")
    )]
    #[diagnostic(
        code(firmament::circular_dependency),
        help("Review the HostConfig.Links of these containers to remove the cycle")
    )]
    CircularDependency {
        dependency: String,
        dependent: String,
        path: Vec<String>,
    },

    #[error("Container '{container}' links to unknown container '{dependency}'")]
    #[diagnostic(
        code(firmament::unresolved_dependency),
        help("Check that '{dependency}' is defined in the same cluster specification")
    )]
    UnresolvedDependency {
        container: String,
        dependency: String,
    },

    #[error("Invalid cluster specification: {reason}")]
    #[diagnostic(code(firmament::invalid_config))]
    InvalidConfig {
        reason: String,
        #[help]
        help: Option<String>,
    },

    #[error("Cluster specification not found: {path}")]
    #[diagnostic(
        code(firmament::config_not_found),
        help("Create one with 'firmament template' or pass --input")
    )]
    ConfigNotFound { path: PathBuf },

    // ─────────────────────────────────────────────────────────────────────────
    // Image Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Unable to pull image '{image}': {reason}")]
    #[diagnostic(code(firmament::image_acquisition_failure))]
    ImageAcquisitionFailure { image: String, reason: String },

    #[error("Unable to build image '{image}' from '{context}': {reason}")]
    #[diagnostic(code(firmament::image_build_failure))]
    ImageBuildFailure {
        image: String,
        context: String,
        reason: String,
    },

    #[error("{} image build(s) failed", .failures.len())]
    #[diagnostic(
        code(firmament::image_builds_failed),
        help("Fix the DockerFilePath entries of the listed images, or make the images pullable")
    )]
    ImageBuildsFailed {
        #[related]
        failures: Vec<FirmamentError>,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Container Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Container {operation} failed for '{target}': {reason}")]
    #[diagnostic(code(firmament::container_operation_failure))]
    ContainerOperationFailure {
        operation: String,
        target: String,
        reason: String,
        #[help]
        help: Option<String>,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Deployment Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Deployment of '{app}' failed at step '{step}': {reason}")]
    #[diagnostic(code(firmament::deployment_step_failure))]
    DeploymentStepFailure {
        app: String,
        step: String,
        reason: String,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Tool Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Tool '{tool}' not found")]
    #[diagnostic(code(firmament::tool_not_found), help("{suggestion}"))]
    ToolNotFound { tool: String, suggestion: String },

    #[error("'{program}' exited with code {exit_code}")]
    #[diagnostic(code(firmament::task_failed))]
    TaskFailed {
        program: String,
        exit_code: i32,
        stderr: String,
        #[help]
        help: Option<String>,
    },

    #[error("Failed to run '{program}': {error}")]
    #[diagnostic(code(firmament::task_spawn_failed))]
    TaskSpawnFailed {
        program: String,
        error: String,
        #[help]
        help: Option<String>,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // File / IO Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Failed to read file '{path}': {error}")]
    #[diagnostic(code(firmament::file_read_error))]
    FileReadError { path: PathBuf, error: String },

    #[error("Failed to write file '{path}': {error}")]
    #[diagnostic(code(firmament::file_write_error))]
    FileWriteError { path: PathBuf, error: String },

    #[error("IO error: {message}")]
    #[diagnostic(code(firmament::io_error))]
    Io { message: String },

    #[error("JSON parsing error: {message}")]
    #[diagnostic(code(firmament::json_error))]
    Json { message: String },
}

impl From<std::io::Error> for FirmamentError {
    fn from(e: std::io::Error) -> Self {
        Self::Io { message: e.to_string() }
    }
}

impl From<serde_json::Error> for FirmamentError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json { message: e.to_string() }
    }
}

impl FirmamentError {
    /// Create a tool not found error with installation suggestion
    pub fn tool_not_found(tool: &str) -> Self {
        let suggestion = match tool {
            "git" => "Install git and ensure it's in your PATH".to_string(),
            _ => format!("Install {} and ensure it's in your PATH", tool),
        };

        Self::ToolNotFound {
            tool: tool.to_string(),
            suggestion,
        }
    }

    /// Wrap a runtime client failure as a container operation failure
    pub fn container_operation(operation: &str, target: &str, err: RuntimeError) -> Self {
        let help = match &err {
            RuntimeError::Unavailable { .. } => Some(
                "Is the Docker daemon running? Point --docker or DOCKER_HOST at its socket.".into(),
            ),
            RuntimeError::NoSuchContainer { .. } => None,
            RuntimeError::Failed { message, .. } => Self::parse_docker_error(message),
        };

        Self::ContainerOperationFailure {
            operation: operation.to_string(),
            target: target.to_string(),
            reason: err.to_string(),
            help,
        }
    }

    fn parse_docker_error(message: &str) -> Option<String> {
        let help = if message.contains("is already in use by container") {
            "A container with this name still exists. Remove it with 'docker rm -f'."
        } else if message.contains("port is already allocated") {
            "A host port in HostConfig.PortBindings is already bound by another process."
        } else if message.contains("Cannot link to a non running container") {
            "A linked container is not running. Check its logs with 'docker logs'."
        } else if message.contains("permission denied") {
            "The current user may not be allowed to talk to the Docker daemon."
        } else {
            return None;
        };

        Some(help.to_string())
    }
}
