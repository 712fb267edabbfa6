// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 firmament contributors

//! Container runtime client
//!
//! The orchestrator never talks to a container engine directly. It drives a
//! [`ContainerRuntime`], which owns all image and container state.

mod docker;

pub use docker::DockerRuntime;

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

use crate::pipeline::ContainerSpec;
use crate::utils::ProgressReporter;

/// Failure reported by a container runtime
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("no such container: {}", .names.join(", "))]
    NoSuchContainer { names: Vec<String> },

    /// The daemon rejected a request or reported an error mid-stream.
    /// `status` is the HTTP status when there was one.
    #[error("{operation} failed: {message}")]
    Failed {
        operation: String,
        status: Option<u16>,
        message: String,
    },

    #[error("container runtime unavailable: {message}")]
    Unavailable { message: String },
}

/// A locally available image
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageSummary {
    pub id: String,
    pub repo_tags: Vec<String>,
}

impl ImageSummary {
    /// Whether any tag of this image matches `image`
    pub fn has_tag(&self, image: &str) -> bool {
        let wanted = normalize_image_ref(image);
        self.repo_tags
            .iter()
            .any(|tag| normalize_image_ref(tag) == wanted)
    }
}

/// Append the implicit `:latest` tag to untagged, undigested references
pub fn normalize_image_ref(image: &str) -> String {
    let last_segment = image.rsplit('/').next().unwrap_or(image);
    if image.contains('@') || last_segment.contains(':') {
        image.to_string()
    } else {
        format!("{}:latest", image)
    }
}

/// Operations the pipeline needs from a container engine
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Force-remove containers by name.
    ///
    /// Returns [`RuntimeError::NoSuchContainer`] when the only problem was
    /// that some of the containers did not exist.
    async fn remove_containers(&self, names: &[String]) -> Result<(), RuntimeError>;

    /// List local images; `all` includes intermediate layers
    async fn list_images(&self, all: bool) -> Result<Vec<ImageSummary>, RuntimeError>;

    /// Pull an image, forwarding progress events
    async fn pull_image(
        &self,
        image: &str,
        progress: &dyn ProgressReporter,
    ) -> Result<(), RuntimeError>;

    /// Build and tag an image from a build context directory or Dockerfile
    async fn build_image(
        &self,
        context: &Path,
        image: &str,
        progress: &dyn ProgressReporter,
    ) -> Result<(), RuntimeError>;

    /// Create (but do not start) a container, returning its id
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    /// Start or stop the named containers in the given order
    async fn start_or_stop_containers(
        &self,
        names: &[String],
        start: bool,
    ) -> Result<(), RuntimeError>;
}
