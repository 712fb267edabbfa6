// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 firmament contributors

//! Cluster definition structures
//!
//! Defines the schema for firmament.json files. Field names follow the
//! Docker Engine API (`Image`, `HostConfig.Links`, ...) so that container
//! descriptors can be copied from `docker inspect` output.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::errors::{FirmamentError, FirmamentResult};

/// Default cluster specification file name
pub const DEFAULT_CONFIG_FILE: &str = "firmament.json";

const JSON_EXTENSION: &str = ".json";

/// A batch of container specifications
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cluster {
    pub containers: Vec<ContainerSpec>,
}

impl Cluster {
    /// Load a cluster from a JSON file
    pub fn from_file(path: &Path) -> FirmamentResult<Self> {
        if !path.exists() {
            return Err(FirmamentError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| FirmamentError::FileReadError {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::from_json(&content)
    }

    /// Parse a cluster from a JSON string
    pub fn from_json(json: &str) -> FirmamentResult<Self> {
        serde_json::from_str(json).map_err(|e| FirmamentError::InvalidConfig {
            reason: e.to_string(),
            help: Some(
                "A cluster file is a JSON array of objects with at least 'name' and 'Image'"
                    .to_string(),
            ),
        })
    }

    /// Serialize the cluster as pretty-printed JSON
    pub fn to_json(&self) -> FirmamentResult<String> {
        serde_json::to_string_pretty(self).map_err(Into::into)
    }

    /// Get a container by name
    pub fn get(&self, name: &str) -> Option<&ContainerSpec> {
        self.containers.iter().find(|c| c.name == name)
    }

    /// Get all container names in declaration order
    pub fn names(&self) -> Vec<&str> {
        self.containers.iter().map(|c| c.name.as_str()).collect()
    }

    /// Resolve a config file argument against `cwd`, normalizing the
    /// `.json` extension (`web` -> `web.json`, `web.JSON` -> `web.json`).
    pub fn resolve_path(filename: &str, cwd: &Path) -> PathBuf {
        let split = filename.len().saturating_sub(JSON_EXTENSION.len());
        let normalized = if filename.len() >= JSON_EXTENSION.len()
            && filename.is_char_boundary(split)
            && filename[split..].eq_ignore_ascii_case(JSON_EXTENSION)
        {
            format!("{}{}", &filename[..split], JSON_EXTENSION)
        } else {
            format!("{}{}", filename, JSON_EXTENSION)
        };

        cwd.join(normalized)
    }

    /// Starter cluster written by `firmament template`.
    ///
    /// The full template additionally fills every supported creation option
    /// with a reasonable default.
    pub fn template(full: bool) -> Self {
        let mut mongo = ContainerSpec::new("mongo", "mongo:4.4");
        let mut web = ContainerSpec::new("web", "firmament/web:latest");
        web.build_source = Some(PathBuf::from("docker/web"));
        web.host_config.links = vec!["mongo:mongo".to_string()];
        web.host_config.port_bindings.insert(
            "3000/tcp".to_string(),
            vec![PortBinding {
                host_ip: None,
                host_port: "3000".to_string(),
            }],
        );
        web.attached_apps = vec![AppDeploySpec {
            service_name: "web-api".to_string(),
            git_url: "https://github.com/example/web-api.git".to_string(),
            git_branch: "master".to_string(),
            scripts: vec![BuildStep {
                command: "npm".to_string(),
                args: vec!["install".to_string()],
                relative_working_dir: ".".to_string(),
            }],
            deploy_target: "http://localhost:8701".to_string(),
        }];

        if full {
            mongo.env = vec!["MONGO_INITDB_DATABASE=web".to_string()];
            mongo
                .exposed_ports
                .insert("27017/tcp".to_string(), serde_json::json!({}));
            mongo.host_config.binds = vec!["/data/db:/data/db".to_string()];

            web.env = vec!["NODE_ENV=production".to_string(), "PORT=3000".to_string()];
            web.cmd = vec!["npm".to_string(), "start".to_string()];
            web.exposed_ports
                .insert("3000/tcp".to_string(), serde_json::json!({}));
            web.host_config.binds = vec!["/tmp/web-logs:/var/log/web".to_string()];
        }

        Self {
            containers: vec![mongo, web],
        }
    }
}

/// One desired container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Container name (must be unique within a cluster)
    pub name: String,

    /// Image reference, used for pull, build and create
    #[serde(rename = "Image")]
    pub image: String,

    /// Build context used when the image is not available locally
    #[serde(rename = "DockerFilePath", default, skip_serializing_if = "Option::is_none")]
    pub build_source: Option<PathBuf>,

    /// Environment variables (`KEY=value`)
    #[serde(rename = "Env", default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,

    /// Command override
    #[serde(rename = "Cmd", default, skip_serializing_if = "Vec::is_empty")]
    pub cmd: Vec<String>,

    /// Exposed ports, keyed by `port/proto`
    #[serde(rename = "ExposedPorts", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub exposed_ports: BTreeMap<String, serde_json::Value>,

    #[serde(rename = "HostConfig", default)]
    pub host_config: HostConfig,

    /// Applications deployed after the container starts
    #[serde(rename = "ExpressApps", default, skip_serializing_if = "Vec::is_empty")]
    pub attached_apps: Vec<AppDeploySpec>,
}

impl ContainerSpec {
    /// Create a pull-only container with no links
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            build_source: None,
            env: Vec::new(),
            cmd: Vec::new(),
            exposed_ports: BTreeMap::new(),
            host_config: HostConfig::default(),
            attached_apps: Vec::new(),
        }
    }

    /// Link declarations (`name:alias`)
    pub fn links(&self) -> &[String] {
        &self.host_config.links
    }

    /// Names of the containers this one links to, in declaration order
    pub fn dependencies(&self) -> Vec<String> {
        self.links()
            .iter()
            .map(|link| link_target(link).to_string())
            .collect()
    }

    /// Whether the image can be built when it cannot be pulled
    pub fn is_buildable(&self) -> bool {
        self.build_source.is_some()
    }
}

/// Container-level host options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostConfig {
    /// Links to other containers (`name:alias`)
    #[serde(rename = "Links", default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<String>,

    /// Port bindings, keyed by container `port/proto`
    #[serde(rename = "PortBindings", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub port_bindings: BTreeMap<String, Vec<PortBinding>>,

    /// Volume binds (`host:container[:mode]`)
    #[serde(rename = "Binds", default, skip_serializing_if = "Vec::is_empty")]
    pub binds: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortBinding {
    #[serde(rename = "HostIp", default, skip_serializing_if = "Option::is_none")]
    pub host_ip: Option<String>,

    #[serde(rename = "HostPort")]
    pub host_port: String,
}

/// An application checked out, built and deployed after its container starts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppDeploySpec {
    #[serde(rename = "ServiceName")]
    pub service_name: String,

    #[serde(rename = "GitUrl")]
    pub git_url: String,

    #[serde(rename = "GitSrcBranchName")]
    pub git_branch: String,

    /// Build steps run inside the checkout, in order
    #[serde(rename = "Scripts", default)]
    pub scripts: Vec<BuildStep>,

    /// Server the deploy tool publishes to
    #[serde(rename = "StrongLoopServerUrl")]
    pub deploy_target: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildStep {
    #[serde(rename = "Command")]
    pub command: String,

    #[serde(rename = "Args", default)]
    pub args: Vec<String>,

    /// Working directory relative to the checkout root
    #[serde(rename = "RelativeWorkingDir", default = "default_working_dir")]
    pub relative_working_dir: String,
}

fn default_working_dir() -> String {
    ".".to_string()
}

/// The container name part of a `name:alias` link
pub fn link_target(link: &str) -> &str {
    match link.split_once(':') {
        Some((target, _)) => target,
        None => link,
    }
}
