// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 firmament contributors

//! Docker Engine API runtime
//!
//! Talks to the daemon through `bollard`. Pull and build streams are
//! decoded event by event and forwarded to the progress reporter.

use async_trait::async_trait;
use bollard::models::{BuildInfo, CreateImageInfo, HostConfig, PortBinding as EnginePortBinding};
use bollard::query_parameters::{
    ListImagesOptions, RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::{Docker, API_DEFAULT_VERSION};
use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use futures_util::stream::{Stream, StreamExt};
use http_body_util::{Either, Full};
use std::collections::HashMap;
use std::path::Path;

use super::{ContainerRuntime, ImageSummary, RuntimeError};
use crate::pipeline::ContainerSpec;
use crate::utils::ProgressReporter;

/// Seconds before a request to the daemon times out
const REQUEST_TIMEOUT: u64 = 120;

/// Container runtime backed by the Docker Engine API
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect to the daemon and check that it answers.
    ///
    /// `host` accepts `unix://`, `tcp://` and `http://` addresses or a bare
    /// socket path. Without one, `DOCKER_HOST` and then the platform default
    /// socket are used.
    pub async fn connect(host: Option<&str>) -> Result<Self, RuntimeError> {
        let connected = match host {
            Some(addr) if addr.starts_with("tcp://") || addr.starts_with("http://") => {
                Docker::connect_with_http(addr, REQUEST_TIMEOUT, API_DEFAULT_VERSION)
            }
            Some(addr) => Docker::connect_with_socket(
                addr.trim_start_matches("unix://"),
                REQUEST_TIMEOUT,
                API_DEFAULT_VERSION,
            ),
            None => Docker::connect_with_local_defaults(),
        };

        let docker = connected.map_err(|e| RuntimeError::Unavailable {
            message: e.to_string(),
        })?;

        docker.ping().await.map_err(|e| RuntimeError::Unavailable {
            message: e.to_string(),
        })?;

        tracing::debug!("connected to docker daemon");
        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn remove_containers(&self, names: &[String]) -> Result<(), RuntimeError> {
        let mut missing = Vec::new();

        for name in names {
            let options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };

            match self.docker.remove_container(name, Some(options)).await {
                Ok(()) => tracing::debug!("removed container {}", name),
                Err(e) if is_not_found(&e) => missing.push(name.clone()),
                Err(e) => return Err(request_failed("remove", e)),
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(RuntimeError::NoSuchContainer { names: missing })
        }
    }

    async fn list_images(&self, all: bool) -> Result<Vec<ImageSummary>, RuntimeError> {
        let options = ListImagesOptions {
            all,
            ..Default::default()
        };

        let images = self
            .docker
            .list_images(Some(options))
            .await
            .map_err(|e| request_failed("list images", e))?;

        Ok(images.into_iter().map(image_summary).collect())
    }

    async fn pull_image(
        &self,
        image: &str,
        progress: &dyn ProgressReporter,
    ) -> Result<(), RuntimeError> {
        let (from_image, tag) = split_image_ref(image);
        tracing::debug!("pulling {} (tag '{}')", from_image, tag);

        #[allow(deprecated)]
        let options = bollard::image::CreateImageOptions {
            from_image,
            tag,
            ..Default::default()
        };

        #[allow(deprecated)]
        let stream = self.docker.create_image(Some(options), None, None);

        drain(stream, "pull", |info| forward_pull(image, info, progress)).await
    }

    async fn build_image(
        &self,
        context: &Path,
        image: &str,
        progress: &dyn ProgressReporter,
    ) -> Result<(), RuntimeError> {
        // A Dockerfile path builds with its directory as the context
        let (context_dir, dockerfile) = if context.is_file() {
            let name = context
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "Dockerfile".to_string());
            (context.parent().unwrap_or(context), name)
        } else {
            (context, "Dockerfile".to_string())
        };

        let archive = archive_context(context_dir).map_err(|e| RuntimeError::Failed {
            operation: "build".to_string(),
            status: None,
            message: format!(
                "failed to archive build context {}: {}",
                context_dir.display(),
                e
            ),
        })?;
        tracing::debug!(
            "build context {} is {} bytes",
            context_dir.display(),
            archive.len()
        );

        #[allow(deprecated)]
        let options = bollard::image::BuildImageOptions {
            dockerfile,
            t: image.to_string(),
            rm: true,
            forcerm: true,
            ..Default::default()
        };

        let body = Full::new(Bytes::from(archive));
        let stream = self.docker.build_image(options, None, Some(Either::Left(body)));

        drain(stream, "build", |info| forward_build(image, info, progress)).await
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        #[allow(deprecated)]
        let options = bollard::container::CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), container_config(spec))
            .await
            .map_err(|e| request_failed("create", e))?;

        for warning in &response.warnings {
            tracing::warn!("{}: {}", spec.name, warning);
        }

        Ok(response.id)
    }

    async fn start_or_stop_containers(
        &self,
        names: &[String],
        start: bool,
    ) -> Result<(), RuntimeError> {
        for name in names {
            let result = if start {
                self.docker
                    .start_container(name, None::<StartContainerOptions>)
                    .await
            } else {
                self.docker
                    .stop_container(name, None::<StopContainerOptions>)
                    .await
            };

            result.map_err(|e| request_failed(if start { "start" } else { "stop" }, e))?;
        }

        Ok(())
    }
}

fn is_not_found(err: &bollard::errors::Error) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

fn request_failed(operation: &str, err: bollard::errors::Error) -> RuntimeError {
    match err {
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } => RuntimeError::Failed {
            operation: operation.to_string(),
            status: Some(status_code),
            message,
        },
        other => RuntimeError::Failed {
            operation: operation.to_string(),
            status: None,
            message: other.to_string(),
        },
    }
}

/// Consume a daemon event stream, stopping at the first failed event
async fn drain<S, T, F>(stream: S, operation: &str, mut forward: F) -> Result<(), RuntimeError>
where
    S: Stream<Item = Result<T, bollard::errors::Error>>,
    F: FnMut(T) -> Result<(), RuntimeError>,
{
    futures_util::pin_mut!(stream);

    while let Some(event) = stream.next().await {
        forward(event.map_err(|e| request_failed(operation, e))?)?;
    }

    Ok(())
}

/// Pass one pull event to the reporter, keyed by layer id
fn forward_pull(
    image: &str,
    info: CreateImageInfo,
    progress: &dyn ProgressReporter,
) -> Result<(), RuntimeError> {
    let error = info
        .error_detail
        .and_then(|detail| detail.message)
        .or(info.error);
    if let Some(message) = error {
        return Err(RuntimeError::Failed {
            operation: "pull".to_string(),
            status: None,
            message,
        });
    }

    let Some(status) = info.status else {
        return Ok(());
    };

    let (current, total) = info
        .progress_detail
        .map(|detail| (to_u64(detail.current), to_u64(detail.total)))
        .unwrap_or((0, 0));

    let task_id = info.id.as_deref().unwrap_or(image);
    progress.report(task_id, &status, current, total);
    Ok(())
}

/// Pass one build event to the reporter, keyed by image
fn forward_build(
    image: &str,
    info: BuildInfo,
    progress: &dyn ProgressReporter,
) -> Result<(), RuntimeError> {
    let error = info
        .error_detail
        .and_then(|detail| detail.message)
        .or(info.error);
    if let Some(message) = error {
        return Err(RuntimeError::Failed {
            operation: "build".to_string(),
            status: None,
            message,
        });
    }

    if let Some(output) = info.stream {
        for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let (current, total) = build_step(line).unwrap_or((0, 0));
            progress.report(image, line, current, total);
        }
    } else if let Some(status) = info.status {
        let (current, total) = info
            .progress_detail
            .map(|detail| (to_u64(detail.current), to_u64(detail.total)))
            .unwrap_or((0, 0));
        progress.report(info.id.as_deref().unwrap_or(image), &status, current, total);
    }

    Ok(())
}

fn to_u64(value: Option<i64>) -> u64 {
    value.and_then(|v| u64::try_from(v).ok()).unwrap_or(0)
}

/// `(current, total)` from a classic builder `Step n/m : ...` line
fn build_step(line: &str) -> Option<(u64, u64)> {
    let rest = line.strip_prefix("Step ")?;
    let step = rest.split_whitespace().next()?;
    let (current, total) = step.split_once('/')?;
    Some((current.parse().ok()?, total.parse().ok()?))
}

/// Split a reference into the `fromImage` and `tag` the create endpoint takes
fn split_image_ref(image: &str) -> (&str, &str) {
    if image.contains('@') {
        return (image, "");
    }

    let name_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[name_start..].rfind(':') {
        Some(i) => (&image[..name_start + i], &image[name_start + i + 1..]),
        None => (image, "latest"),
    }
}

fn image_summary(image: bollard::models::ImageSummary) -> ImageSummary {
    ImageSummary {
        id: image.id,
        repo_tags: image
            .repo_tags
            .into_iter()
            .filter(|tag| !tag.contains("<none>"))
            .collect(),
    }
}

/// Gzipped tarball of a build context directory
fn archive_context(dir: &Path) -> std::io::Result<Vec<u8>> {
    let mut data = Vec::new();
    {
        let encoder = GzEncoder::new(&mut data, Compression::default());
        let mut tar = tar::Builder::new(encoder);
        tar.append_dir_all(".", dir)?;
        tar.into_inner()?.finish()?;
    }
    Ok(data)
}

/// Engine API create body for a container spec
#[allow(deprecated)]
fn container_config(spec: &ContainerSpec) -> bollard::container::Config<String> {
    let non_empty = |items: &[String]| (!items.is_empty()).then(|| items.to_vec());

    let exposed_ports = spec
        .exposed_ports
        .keys()
        .map(|port| (port.clone(), HashMap::new()))
        .collect::<HashMap<_, _>>();

    let port_bindings = spec
        .host_config
        .port_bindings
        .iter()
        .map(|(port, bindings)| {
            let bindings = bindings
                .iter()
                .map(|binding| EnginePortBinding {
                    host_ip: binding.host_ip.clone().filter(|ip| !ip.is_empty()),
                    host_port: Some(binding.host_port.clone()).filter(|p| !p.is_empty()),
                })
                .collect();
            (port.clone(), Some(bindings))
        })
        .collect::<HashMap<_, _>>();

    let host_config = HostConfig {
        links: non_empty(&spec.host_config.links),
        port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
        binds: non_empty(&spec.host_config.binds),
        ..Default::default()
    };

    bollard::container::Config {
        image: Some(spec.image.clone()),
        env: non_empty(&spec.env),
        cmd: non_empty(&spec.cmd),
        exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
        host_config: Some(host_config),
        ..Default::default()
    }
}
