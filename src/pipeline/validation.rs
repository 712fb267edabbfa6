// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 firmament contributors

//! Cluster validation
//!
//! Static checks over a cluster before anything touches the container
//! runtime.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::errors::FirmamentError;
use crate::pipeline::{AppDeploySpec, Cluster, ContainerSpec, DependencyGraph};

/// Cluster validator
pub struct ClusterValidator;

impl ClusterValidator {
    /// Validate a cluster definition
    pub fn validate(cluster: &Cluster) -> ValidationResult {
        let mut result = ValidationResult::new();

        if cluster.containers.is_empty() {
            result.add_error("Cluster has no containers defined");
        }

        let mut seen_names = HashSet::new();
        let mut duplicates = false;
        for container in &cluster.containers {
            if !seen_names.insert(container.name.as_str()) {
                duplicates = true;
                result.add_error(&format!("Duplicate container name: '{}'", container.name));
            }
        }

        for container in &cluster.containers {
            Self::validate_container(container, &mut result);
        }

        Self::check_shared_images(cluster, &mut result);

        // The graph rejects duplicates itself; those are already reported
        if !duplicates {
            let resolved =
                DependencyGraph::from_specs(&cluster.containers).and_then(|g| g.resolve());
            match resolved {
                Ok(_) => {}
                Err(FirmamentError::CircularDependency { path, .. }) => {
                    result.add_error(&format!("Circular dependency: {}", path.join(" → ")));
                }
                Err(FirmamentError::UnresolvedDependency {
                    container,
                    dependency,
                }) => {
                    result.add_error(&format!(
                        "Container '{}' links to unknown container '{}'",
                        container, dependency
                    ));
                }
                Err(e) => result.add_error(&format!("Dependency graph error: {}", e)),
            }
        }

        result
    }

    fn validate_container(container: &ContainerSpec, result: &mut ValidationResult) {
        let name = &container.name;

        if name.trim().is_empty() {
            result.add_error("Container with empty name");
        }
        if container.image.trim().is_empty() {
            result.add_error(&format!("Container '{}': Image is empty", name));
        }

        for link in container.links() {
            match link.split_once(':') {
                Some((target, _)) if target.is_empty() => {
                    result.add_error(&format!("Container '{}': Malformed link '{}'", name, link));
                }
                Some((_, alias)) if alias.is_empty() => {
                    result.add_warning(&format!(
                        "Container '{}': Link '{}' has an empty alias",
                        name, link
                    ));
                }
                None if link.is_empty() => {
                    result.add_error(&format!("Container '{}': Empty link", name));
                }
                _ => {}
            }
        }

        for app in &container.attached_apps {
            Self::validate_app(name, app, result);
        }
    }

    fn validate_app(container: &str, app: &AppDeploySpec, result: &mut ValidationResult) {
        let label = if app.service_name.is_empty() {
            format!("Container '{}': Application", container)
        } else {
            format!("Container '{}': Application '{}'", container, app.service_name)
        };

        if app.service_name.trim().is_empty() {
            result.add_error(&format!("{} has no ServiceName", label));
        }
        if app.git_url.trim().is_empty() {
            result.add_error(&format!("{} has no GitUrl", label));
        }
        if app.git_branch.trim().is_empty() {
            result.add_error(&format!("{} has no GitSrcBranchName", label));
        }
        if app.deploy_target.trim().is_empty() {
            result.add_error(&format!("{} has no StrongLoopServerUrl", label));
        }

        for (i, script) in app.scripts.iter().enumerate() {
            if script.command.trim().is_empty() {
                result.add_error(&format!("{}: Script {} has an empty Command", label, i + 1));
            }
            if Path::new(&script.relative_working_dir).is_absolute() {
                result.add_warning(&format!(
                    "{}: Script {} working directory '{}' is absolute and escapes the checkout",
                    label,
                    i + 1,
                    script.relative_working_dir
                ));
            }
        }
    }

    /// Warn when containers sharing an image declare different build sources
    fn check_shared_images(cluster: &Cluster, result: &mut ValidationResult) {
        let mut sources: HashMap<&str, (&str, &Path)> = HashMap::new();

        for container in &cluster.containers {
            let Some(source) = container.build_source.as_deref() else {
                continue;
            };

            match sources.get(container.image.as_str()) {
                Some((first, first_source)) if *first_source != source => {
                    result.add_warning(&format!(
                        "Image '{}' has build sources in '{}' and '{}'; only '{}' ({}) is used",
                        container.image,
                        first,
                        container.name,
                        first,
                        first_source.display()
                    ));
                }
                Some(_) => {}
                None => {
                    sources.insert(&container.image, (&container.name, source));
                }
            }
        }
    }

    /// Check that declared build sources exist (runtime validation)
    pub fn validate_files(cluster: &Cluster, base_path: &Path) -> Vec<String> {
        let mut missing = Vec::new();

        for container in &cluster.containers {
            if let Some(source) = &container.build_source {
                if !base_path.join(source).exists() {
                    missing.push(format!(
                        "Container '{}': Build source not found: {}",
                        container.name,
                        source.display()
                    ));
                }
            }
        }

        missing
    }
}

/// Result of cluster validation
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, message: &str) {
        self.errors.push(message.to_string());
    }

    pub fn add_warning(&mut self, message: &str) {
        self.warnings.push(message.to_string());
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}
