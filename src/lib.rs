// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 firmament contributors

//! # firmament - Docker cluster build and deploy
//!
//! `firmament` brings up a cluster of linked Docker containers from a JSON
//! description and deploys the applications attached to them.
//!
//! ## Features
//!
//! - **Dependency ordering** - Containers are created after everything they link to
//! - **Image acquisition** - Missing images are pulled, falling back to a local build
//! - **Application deployment** - Git checkout, build scripts and deploy per app
//! - **Failure policies** - Each stage decides whether its failures abort the run
//!
//! ## Quick Start
//!
//! ```bash
//! # Write a starter cluster file
//! firmament template
//!
//! # Check it
//! firmament validate
//!
//! # Bring the cluster up
//! firmament build
//! ```

pub mod cli;
pub mod errors;
pub mod executors;
pub mod pipeline;
pub mod runtime;
pub mod utils;

// Re-export commonly used types
pub use errors::{FirmamentError, FirmamentResult};
pub use pipeline::{
    Cluster, ContainerSpec, DependencyGraph, PipelineOrchestrator, PipelineOutcome,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
