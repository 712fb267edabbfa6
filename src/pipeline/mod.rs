// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 firmament contributors

//! Cluster definitions and the build pipeline
//!
//! This module defines the container specification schema, the link
//! dependency resolver, static validation and the staged orchestrator.

mod dag;
mod definition;
mod orchestrator;
mod validation;

pub use dag::DependencyGraph;
pub use definition::*;
pub use orchestrator::{
    check_unique_names, FailurePolicy, OrchestratorOptions, PipelineAbort, PipelineOrchestrator,
    PipelineOutcome, RunStatus, StageKind, DEFAULT_DEPLOY_TOOL,
};
pub use validation::{ClusterValidator, ValidationResult};
