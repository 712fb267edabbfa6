// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 firmament contributors

//! Pipeline orchestrator
//!
//! Drives a cluster through six sequential stages: stale container removal,
//! missing image detection, image pull, image build, dependency-ordered
//! create and start, and attached application deployment. Each stage has a
//! [`FailurePolicy`] deciding whether its failures abort the run.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use colored::Colorize;
use tracing::Instrument;

use crate::errors::FirmamentError;
use crate::executors::{ShellTask, TaskRunner};
use crate::pipeline::{AppDeploySpec, ContainerSpec, DependencyGraph};
use crate::runtime::{ContainerRuntime, RuntimeError};
use crate::utils::{plural, print_header, ProgressReporter, StageProgress};

/// Default program for the post-checkout build and deploy actions
pub const DEFAULT_DEPLOY_TOOL: &str = "slc";

/// Pipeline stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    RemoveStale,
    DetectMissingImages,
    PullImages,
    BuildImages,
    CreateAndStart,
    DeployApps,
}

/// How a stage treats the failures of its individual operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// The first failure aborts the run
    FailFast,
    /// Failures are recorded and handed to the next stage
    CarryForward,
    /// Every operation is attempted, then any failure aborts the run
    CollectThenFail,
    /// Failures are logged and never abort
    LogAndContinue,
}

impl StageKind {
    pub const ALL: [StageKind; 6] = [
        StageKind::RemoveStale,
        StageKind::DetectMissingImages,
        StageKind::PullImages,
        StageKind::BuildImages,
        StageKind::CreateAndStart,
        StageKind::DeployApps,
    ];

    pub fn policy(self) -> FailurePolicy {
        match self {
            Self::RemoveStale | Self::DetectMissingImages | Self::CreateAndStart => {
                FailurePolicy::FailFast
            }
            Self::PullImages => FailurePolicy::CarryForward,
            Self::BuildImages => FailurePolicy::CollectThenFail,
            Self::DeployApps => FailurePolicy::LogAndContinue,
        }
    }

    /// Short identifier used in logs
    pub fn name(self) -> &'static str {
        match self {
            Self::RemoveStale => "remove-stale",
            Self::DetectMissingImages => "detect-missing-images",
            Self::PullImages => "pull-images",
            Self::BuildImages => "build-images",
            Self::CreateAndStart => "create-and-start",
            Self::DeployApps => "deploy-apps",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::RemoveStale => "Removing stale containers",
            Self::DetectMissingImages => "Detecting missing images",
            Self::PullImages => "Pulling images",
            Self::BuildImages => "Building images",
            Self::CreateAndStart => "Creating and starting containers",
            Self::DeployApps => "Deploying attached applications",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Orchestrator options
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Base for build contexts and application checkouts
    pub working_dir: PathBuf,
    /// Program run as `<tool> build` and `<tool> deploy <target>`
    pub deploy_tool: String,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::from("."),
            deploy_tool: DEFAULT_DEPLOY_TOOL.to_string(),
        }
    }
}

/// The stage that aborted a run and why
#[derive(Debug)]
pub struct PipelineAbort {
    pub stage: StageKind,
    pub error: FirmamentError,
}

/// Overall result of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Succeeded,
    /// Every stage completed but some deployment steps failed
    CompletedWithFailures,
    Aborted,
}

/// Result of driving a cluster through the pipeline
#[derive(Debug, Default)]
pub struct PipelineOutcome {
    /// Stages that ran to completion
    pub completed_stages: Vec<StageKind>,
    /// Images absent locally before the pull stage
    pub missing_images: Vec<String>,
    pub pulled_images: Vec<String>,
    pub built_images: Vec<String>,
    /// Resolved creation order, also the start order
    pub startup_order: Vec<String>,
    pub started_containers: Vec<String>,
    pub pull_failures: Vec<FirmamentError>,
    /// Applications whose every step succeeded
    pub deployed_apps: Vec<String>,
    pub deployment_failures: Vec<FirmamentError>,
    pub aborted: Option<PipelineAbort>,
    pub duration: Duration,
}

impl PipelineOutcome {
    pub fn status(&self) -> RunStatus {
        if self.aborted.is_some() {
            RunStatus::Aborted
        } else if !self.deployment_failures.is_empty() {
            RunStatus::CompletedWithFailures
        } else {
            RunStatus::Succeeded
        }
    }

    /// Process exit code: 0 success, 1 aborted, 2 deployment failures
    pub fn exit_code(&self) -> u8 {
        match self.status() {
            RunStatus::Succeeded => 0,
            RunStatus::Aborted => 1,
            RunStatus::CompletedWithFailures => 2,
        }
    }
}

/// Pipeline-local bookkeeping shared between stages
struct PipelineState<'a> {
    batch: &'a [ContainerSpec],
    /// Images still missing; set by detection, narrowed by pull
    missing: Vec<String>,
    outcome: PipelineOutcome,
}

/// Drives a batch of container specs through the pipeline
pub struct PipelineOrchestrator {
    runtime: Arc<dyn ContainerRuntime>,
    runner: Arc<dyn TaskRunner>,
    progress: Arc<dyn ProgressReporter>,
    options: OrchestratorOptions,
}

impl PipelineOrchestrator {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        runner: Arc<dyn TaskRunner>,
        progress: Arc<dyn ProgressReporter>,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            runtime,
            runner,
            progress,
            options,
        }
    }

    /// Run the pipeline over a batch.
    ///
    /// Returns `Err` only when the batch itself is unusable (duplicate
    /// names), before anything touches the runtime. Stage failures are
    /// reported in [`PipelineOutcome::aborted`].
    pub async fn build(&self, batch: &[ContainerSpec]) -> Result<PipelineOutcome, FirmamentError> {
        let start = Instant::now();

        check_unique_names(batch)?;

        println!();
        print_header(&format!("Cluster: {}", plural(batch.len(), "container")));

        let mut state = PipelineState {
            batch,
            missing: Vec::new(),
            outcome: PipelineOutcome::default(),
        };
        let mut display = StageProgress::new(
            StageKind::ALL
                .iter()
                .map(|s| s.description().to_string())
                .collect(),
        );

        for stage in StageKind::ALL {
            display.start();

            let span = tracing::info_span!("stage", name = stage.name());
            let result = self.run_stage(stage, &mut state).instrument(span).await;

            match result {
                Ok(0) => display.complete(),
                Ok(tolerated) => display.complete_with_warnings(tolerated),
                Err(error) => {
                    tracing::error!(stage = stage.name(), "{}", error);
                    display.fail(&error.to_string());
                    state.outcome.aborted = Some(PipelineAbort { stage, error });
                    break;
                }
            }
            state.outcome.completed_stages.push(stage);
        }

        let mut outcome = state.outcome;
        outcome.duration = start.elapsed();
        print_summary(&outcome);

        Ok(outcome)
    }

    /// Run one stage, returning the number of failures it tolerated
    async fn run_stage(
        &self,
        stage: StageKind,
        state: &mut PipelineState<'_>,
    ) -> Result<usize, FirmamentError> {
        tracing::debug!(policy = ?stage.policy(), "starting stage");

        match stage {
            StageKind::RemoveStale => self.remove_stale(state).await,
            StageKind::DetectMissingImages => self.detect_missing_images(state).await,
            StageKind::PullImages => self.pull_images(state).await,
            StageKind::BuildImages => self.build_images(state).await,
            StageKind::CreateAndStart => self.create_and_start(state).await,
            StageKind::DeployApps => self.deploy_apps(state).await,
        }
    }

    async fn remove_stale(&self, state: &mut PipelineState<'_>) -> Result<usize, FirmamentError> {
        let names: Vec<String> = state.batch.iter().map(|c| c.name.clone()).collect();

        match self.runtime.remove_containers(&names).await {
            Ok(()) => {}
            Err(RuntimeError::NoSuchContainer { names: absent }) => {
                tracing::debug!("not present, nothing to remove: {}", absent.join(", "));
            }
            Err(e) => {
                return Err(FirmamentError::container_operation(
                    "remove",
                    &names.join(", "),
                    e,
                ))
            }
        }

        Ok(0)
    }

    async fn detect_missing_images(
        &self,
        state: &mut PipelineState<'_>,
    ) -> Result<usize, FirmamentError> {
        let local = self
            .runtime
            .list_images(false)
            .await
            .map_err(|e| FirmamentError::container_operation("list", "local images", e))?;

        let mut seen = HashSet::new();
        let missing: Vec<String> = state
            .batch
            .iter()
            .map(|c| c.image.as_str())
            .filter(|image| seen.insert(*image))
            .filter(|image| !local.iter().any(|i| i.has_tag(image)))
            .map(String::from)
            .collect();

        if missing.is_empty() {
            tracing::info!("all images available locally");
        } else {
            tracing::info!("missing images: {}", missing.join(", "));
        }

        state.outcome.missing_images = missing.clone();
        state.missing = missing;
        Ok(0)
    }

    async fn pull_images(&self, state: &mut PipelineState<'_>) -> Result<usize, FirmamentError> {
        let mut still_missing = Vec::new();

        for image in std::mem::take(&mut state.missing) {
            tracing::info!("pulling {}", image);

            match self.runtime.pull_image(&image, self.progress.as_ref()).await {
                Ok(()) => state.outcome.pulled_images.push(image),
                Err(e) => {
                    let failure = FirmamentError::ImageAcquisitionFailure {
                        image: image.clone(),
                        reason: e.to_string(),
                    };
                    tracing::warn!("{}", failure);
                    state.outcome.pull_failures.push(failure);
                    still_missing.push(image);
                }
            }
        }
        self.progress.finish();

        state.missing = still_missing;
        Ok(state.outcome.pull_failures.len())
    }

    async fn build_images(&self, state: &mut PipelineState<'_>) -> Result<usize, FirmamentError> {
        let mut failures = Vec::new();

        for image in &state.missing {
            let Some(source) = state
                .batch
                .iter()
                .filter(|c| c.image == *image)
                .find_map(|c| c.build_source.as_ref())
            else {
                failures.push(FirmamentError::ImageBuildFailure {
                    image: image.clone(),
                    context: "<none>".to_string(),
                    reason: "image could not be pulled and no DockerFilePath is declared"
                        .to_string(),
                });
                continue;
            };

            let context = self.options.working_dir.join(source);
            tracing::info!("building {} from {}", image, context.display());

            match self
                .runtime
                .build_image(&context, image, self.progress.as_ref())
                .await
            {
                Ok(()) => state.outcome.built_images.push(image.clone()),
                Err(e) => failures.push(FirmamentError::ImageBuildFailure {
                    image: image.clone(),
                    context: context.display().to_string(),
                    reason: e.to_string(),
                }),
            }
        }
        self.progress.finish();

        if failures.is_empty() {
            state.missing.clear();
            return Ok(0);
        }

        for failure in &failures {
            tracing::error!("{}", failure);
        }
        Err(FirmamentError::ImageBuildsFailed { failures })
    }

    async fn create_and_start(
        &self,
        state: &mut PipelineState<'_>,
    ) -> Result<usize, FirmamentError> {
        let order = DependencyGraph::from_specs(state.batch)?.resolve()?;
        tracing::info!("startup order: {}", order.join(" -> "));
        state.outcome.startup_order = order.clone();

        for name in &order {
            let Some(spec) = state.batch.iter().find(|c| c.name == *name) else {
                continue;
            };

            let id = self
                .runtime
                .create_container(spec)
                .await
                .map_err(|e| FirmamentError::container_operation("create", name, e))?;

            tracing::info!(id = %short_id(&id), "Container \"{}\" created.", name);
        }

        self.runtime
            .start_or_stop_containers(&order, true)
            .await
            .map_err(|e| FirmamentError::container_operation("start", &order.join(", "), e))?;

        state.outcome.started_containers = order;
        Ok(0)
    }

    async fn deploy_apps(&self, state: &mut PipelineState<'_>) -> Result<usize, FirmamentError> {
        for spec in state.batch {
            for app in &spec.attached_apps {
                let span =
                    tracing::info_span!("app", container = %spec.name, app = %app.service_name);
                let failures = self.deploy_app(app).instrument(span).await;

                if failures.is_empty() {
                    state.outcome.deployed_apps.push(app.service_name.clone());
                }
                state.outcome.deployment_failures.extend(failures);
            }
        }

        Ok(state.outcome.deployment_failures.len())
    }

    /// Check out, build and deploy one application. Every step is
    /// attempted even when an earlier one failed.
    async fn deploy_app(&self, app: &AppDeploySpec) -> Vec<FirmamentError> {
        let checkout = self.checkout_dir(&app.service_name);
        let mut failures = Vec::new();

        for (step, task) in self.deploy_steps(app, &checkout) {
            let dir = task.working_dir.as_deref().unwrap_or(checkout.as_path());
            tracing::info!(dir = %dir.display(), "{}: {}", step, task.display());

            match self.runner.run(&task).await {
                Ok(output) => {
                    tracing::debug!("{} finished in {:.2}s", step, output.duration.as_secs_f64());
                }
                Err(e) => {
                    let failure = FirmamentError::DeploymentStepFailure {
                        app: app.service_name.clone(),
                        step,
                        reason: e.to_string(),
                    };
                    tracing::warn!("{}", failure);
                    failures.push(failure);
                }
            }
        }

        failures
    }

    fn deploy_steps(&self, app: &AppDeploySpec, checkout: &Path) -> Vec<(String, ShellTask)> {
        let mut steps = vec![(
            "clone".to_string(),
            ShellTask::git_clone(&app.git_url, &app.git_branch, checkout)
                .in_dir(&self.options.working_dir),
        )];

        for (i, script) in app.scripts.iter().enumerate() {
            steps.push((
                format!("script {} ({})", i + 1, script.command),
                ShellTask::new(&script.command, script.args.clone())
                    .in_dir(checkout.join(&script.relative_working_dir)),
            ));
        }

        let tool = &self.options.deploy_tool;
        steps.push((
            "build".to_string(),
            ShellTask::new(tool, vec!["build".to_string()]).in_dir(checkout),
        ));
        steps.push((
            "deploy".to_string(),
            ShellTask::new(tool, vec!["deploy".to_string(), app.deploy_target.clone()])
                .in_dir(checkout),
        ));

        steps
    }

    /// Fresh checkout directory named after the app and the current time
    fn checkout_dir(&self, service_name: &str) -> PathBuf {
        let mut stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();

        loop {
            let dir = self
                .options
                .working_dir
                .join(format!("{}{}", service_name, stamp));
            if !dir.exists() {
                return dir;
            }
            stamp += 1;
        }
    }
}

/// Reject a batch in which two containers share a name
pub fn check_unique_names(batch: &[ContainerSpec]) -> Result<(), FirmamentError> {
    let mut seen = HashSet::new();
    for spec in batch {
        if !seen.insert(spec.name.as_str()) {
            return Err(FirmamentError::DuplicateName {
                name: spec.name.clone(),
            });
        }
    }
    Ok(())
}

fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

fn print_summary(outcome: &PipelineOutcome) {
    let secs = outcome.duration.as_secs_f64();
    println!();

    match (&outcome.aborted, outcome.status()) {
        (Some(abort), _) => println!(
            "{}",
            format!("Pipeline aborted at stage '{}' after {:.2}s", abort.stage, secs).red()
        ),
        (None, RunStatus::CompletedWithFailures) => println!(
            "{}",
            format!(
                "Pipeline completed in {:.2}s with {}",
                secs,
                plural(outcome.deployment_failures.len(), "deployment failure")
            )
            .yellow()
        ),
        _ => println!(
            "{}",
            format!("Pipeline completed successfully in {:.2}s", secs).green()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::TaskOutput;
    use crate::pipeline::BuildStep;
    use crate::runtime::ImageSummary;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeRuntime {
        local_images: Vec<String>,
        unpullable: HashSet<String>,
        unbuildable: HashSet<String>,
        fail_create: Option<String>,
        remove_error: Option<RuntimeError>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeRuntime {
        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn calls_starting_with(&self, prefix: &str) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter(|c| c.starts_with(prefix))
                .collect()
        }
    }

    #[async_trait]
    impl ContainerRuntime for FakeRuntime {
        async fn remove_containers(&self, names: &[String]) -> Result<(), RuntimeError> {
            self.record(format!("rm {}", names.join(",")));
            match &self.remove_error {
                Some(e) => Err(e.clone()),
                None => Ok(()),
            }
        }

        async fn list_images(&self, all: bool) -> Result<Vec<ImageSummary>, RuntimeError> {
            self.record(format!("images all={}", all));
            Ok(self
                .local_images
                .iter()
                .enumerate()
                .map(|(i, tag)| ImageSummary {
                    id: format!("sha256:{}", i),
                    repo_tags: vec![tag.clone()],
                })
                .collect())
        }

        async fn pull_image(
            &self,
            image: &str,
            progress: &dyn ProgressReporter,
        ) -> Result<(), RuntimeError> {
            self.record(format!("pull {}", image));
            progress.report("layer0", "Downloading", 5, 10);
            progress.report(image, "Pulling", 0, 0);

            if self.unpullable.contains(image) {
                Err(RuntimeError::Failed {
                    operation: "pull".into(),
                    status: Some(404),
                    message: "manifest unknown".into(),
                })
            } else {
                Ok(())
            }
        }

        async fn build_image(
            &self,
            context: &Path,
            image: &str,
            progress: &dyn ProgressReporter,
        ) -> Result<(), RuntimeError> {
            self.record(format!("build {} {}", image, context.display()));
            progress.report(image, "Step 1/2", 1, 2);

            if self.unbuildable.contains(image) {
                Err(RuntimeError::Failed {
                    operation: "build".into(),
                    status: None,
                    message: "Dockerfile not found".into(),
                })
            } else {
                Ok(())
            }
        }

        async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
            self.record(format!("create {}", spec.name));
            if self.fail_create.as_deref() == Some(spec.name.as_str()) {
                return Err(RuntimeError::Failed {
                    operation: "create".into(),
                    status: Some(500),
                    message: "port is already allocated".into(),
                });
            }
            Ok(format!("{}0123456789abcdef", spec.name))
        }

        async fn start_or_stop_containers(
            &self,
            names: &[String],
            start: bool,
        ) -> Result<(), RuntimeError> {
            self.record(format!("{} {}", if start { "start" } else { "stop" }, names.join(",")));
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeRunner {
        /// Tasks whose program or any argument equals one of these fail
        fail_on: Vec<String>,
        tasks: Mutex<Vec<ShellTask>>,
    }

    impl FakeRunner {
        fn tasks(&self) -> Vec<ShellTask> {
            self.tasks.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TaskRunner for FakeRunner {
        async fn run(&self, task: &ShellTask) -> Result<TaskOutput, FirmamentError> {
            self.tasks.lock().unwrap().push(task.clone());

            let fails = self
                .fail_on
                .iter()
                .any(|f| *f == task.program || task.args.contains(f));
            if fails {
                Err(FirmamentError::TaskFailed {
                    program: task.program.clone(),
                    exit_code: 128,
                    stderr: "fatal".into(),
                    help: None,
                })
            } else {
                Ok(TaskOutput {
                    stdout: String::new(),
                    stderr: String::new(),
                    duration: Duration::from_millis(1),
                })
            }
        }
    }

    #[derive(Default)]
    struct RecordingProgress {
        events: Mutex<Vec<(String, String, u64, u64)>>,
        finished: Mutex<usize>,
    }

    impl ProgressReporter for RecordingProgress {
        fn report(&self, task_id: &str, status: &str, current: u64, total: u64) {
            self.events
                .lock()
                .unwrap()
                .push((task_id.into(), status.into(), current, total));
        }

        fn finish(&self) {
            *self.finished.lock().unwrap() += 1;
        }
    }

    struct Harness {
        runtime: Arc<FakeRuntime>,
        runner: Arc<FakeRunner>,
        progress: Arc<RecordingProgress>,
        orchestrator: PipelineOrchestrator,
    }

    fn harness(runtime: FakeRuntime, runner: FakeRunner) -> Harness {
        let runtime = Arc::new(runtime);
        let runner = Arc::new(runner);
        let progress = Arc::new(RecordingProgress::default());
        let orchestrator = PipelineOrchestrator::new(
            runtime.clone(),
            runner.clone(),
            progress.clone(),
            OrchestratorOptions {
                working_dir: PathBuf::from("/work"),
                deploy_tool: "slc".into(),
            },
        );

        Harness {
            runtime,
            runner,
            progress,
            orchestrator,
        }
    }

    fn spec(name: &str, image: &str, links: &[&str]) -> ContainerSpec {
        let mut spec = ContainerSpec::new(name, image);
        spec.host_config.links = links.iter().map(|l| l.to_string()).collect();
        spec
    }

    fn buildable(name: &str, image: &str, source: &str) -> ContainerSpec {
        let mut spec = spec(name, image, &[]);
        spec.build_source = Some(PathBuf::from(source));
        spec
    }

    fn app(name: &str, url: &str) -> AppDeploySpec {
        AppDeploySpec {
            service_name: name.into(),
            git_url: url.into(),
            git_branch: "master".into(),
            scripts: vec![BuildStep {
                command: "npm".into(),
                args: vec!["install".into()],
                relative_working_dir: "server".into(),
            }],
            deploy_target: "http://localhost:8701".into(),
        }
    }

    #[test]
    fn test_stage_policies() {
        use FailurePolicy::*;

        let policies: Vec<_> = StageKind::ALL.iter().map(|s| s.policy()).collect();
        assert_eq!(
            policies,
            vec![FailFast, FailFast, CarryForward, CollectThenFail, FailFast, LogAndContinue]
        );
    }

    #[tokio::test]
    async fn test_happy_path_runs_stages_in_order() {
        let h = harness(
            FakeRuntime {
                local_images: vec!["mysql:latest".into(), "web:1".into()],
                ..Default::default()
            },
            FakeRunner::default(),
        );
        let batch = vec![spec("web", "web:1", &["db:db"]), spec("db", "mysql", &[])];

        let outcome = h.orchestrator.build(&batch).await.unwrap();

        assert_eq!(outcome.status(), RunStatus::Succeeded);
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(outcome.completed_stages, StageKind::ALL.to_vec());
        assert!(outcome.missing_images.is_empty());
        assert_eq!(outcome.startup_order, vec!["db", "web"]);
        assert_eq!(outcome.started_containers, vec!["db", "web"]);
        assert_eq!(
            h.runtime.calls(),
            vec![
                "rm web,db",
                "images all=false",
                "create db",
                "create web",
                "start db,web"
            ]
        );
        assert!(h.runner.tasks().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_names_fail_before_any_stage() {
        let h = harness(FakeRuntime::default(), FakeRunner::default());
        let batch = vec![spec("a", "x", &[]), spec("a", "y", &[])];

        let result = h.orchestrator.build(&batch).await;

        assert!(matches!(result, Err(FirmamentError::DuplicateName { name }) if name == "a"));
        assert!(h.runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_images_are_deduplicated() {
        let h = harness(FakeRuntime::default(), FakeRunner::default());
        let batch = vec![
            spec("a", "redis:7", &[]),
            spec("b", "redis:7", &[]),
            spec("c", "nginx", &[]),
        ];

        let outcome = h.orchestrator.build(&batch).await.unwrap();

        assert_eq!(outcome.missing_images, vec!["redis:7", "nginx"]);
        assert_eq!(outcome.pulled_images, vec!["redis:7", "nginx"]);
        assert_eq!(
            h.runtime.calls_starting_with("pull"),
            vec!["pull redis:7", "pull nginx"]
        );
        assert!(h.runtime.calls_starting_with("build").is_empty());
    }

    #[tokio::test]
    async fn test_pull_progress_is_forwarded() {
        let h = harness(FakeRuntime::default(), FakeRunner::default());
        let batch = vec![spec("a", "redis", &[])];

        h.orchestrator.build(&batch).await.unwrap();

        let events = h.progress.events.lock().unwrap().clone();
        assert!(events.contains(&("layer0".into(), "Downloading".into(), 5, 10)));
        assert!(events.contains(&("redis".into(), "Pulling".into(), 0, 0)));
        assert!(*h.progress.finished.lock().unwrap() >= 2);
    }

    #[tokio::test]
    async fn test_failed_pull_falls_back_to_build() {
        let h = harness(
            FakeRuntime {
                unpullable: ["web:dev".to_string()].into(),
                ..Default::default()
            },
            FakeRunner::default(),
        );
        let batch = vec![spec("other", "web:dev", &[]), buildable("web", "web:dev", "docker/web")];

        let outcome = h.orchestrator.build(&batch).await.unwrap();

        assert_eq!(outcome.status(), RunStatus::Succeeded);
        assert_eq!(outcome.pull_failures.len(), 1);
        assert!(matches!(
            &outcome.pull_failures[0],
            FirmamentError::ImageAcquisitionFailure { image, .. } if image == "web:dev"
        ));
        assert_eq!(outcome.built_images, vec!["web:dev"]);
        assert_eq!(
            h.runtime.calls_starting_with("build"),
            vec!["build web:dev /work/docker/web"]
        );
    }

    #[tokio::test]
    async fn test_all_build_failures_reported_before_abort() {
        let h = harness(
            FakeRuntime {
                unpullable: ["a", "b", "c"].iter().map(|s| s.to_string()).collect(),
                unbuildable: ["a", "b"].iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            },
            FakeRunner::default(),
        );
        let batch = vec![
            buildable("a", "a", "ctx/a"),
            buildable("b", "b", "ctx/b"),
            buildable("c", "c", "ctx/c"),
        ];

        let outcome = h.orchestrator.build(&batch).await.unwrap();

        assert_eq!(h.runtime.calls_starting_with("build").len(), 3);
        assert_eq!(outcome.built_images, vec!["c"]);
        assert_eq!(outcome.exit_code(), 1);

        let abort = outcome.aborted.expect("run should abort");
        assert_eq!(abort.stage, StageKind::BuildImages);
        match abort.error {
            FirmamentError::ImageBuildsFailed { failures } => {
                let images: Vec<_> = failures
                    .iter()
                    .map(|f| match f {
                        FirmamentError::ImageBuildFailure { image, .. } => image.as_str(),
                        other => panic!("unexpected failure {other:?}"),
                    })
                    .collect();
                assert_eq!(images, vec!["a", "b"]);
            }
            other => panic!("expected collected build failures, got {other:?}"),
        }
        assert!(h.runtime.calls_starting_with("create").is_empty());
    }

    #[tokio::test]
    async fn test_unpullable_image_without_build_source_fails_build_stage() {
        let h = harness(
            FakeRuntime {
                unpullable: ["private/app".to_string()].into(),
                ..Default::default()
            },
            FakeRunner::default(),
        );
        let batch = vec![spec("app", "private/app", &[])];

        let outcome = h.orchestrator.build(&batch).await.unwrap();

        let abort = outcome.aborted.unwrap();
        assert_eq!(abort.stage, StageKind::BuildImages);
        assert!(h.runtime.calls_starting_with("build").is_empty());
    }

    #[tokio::test]
    async fn test_absent_stale_containers_are_not_an_error() {
        let h = harness(
            FakeRuntime {
                local_images: vec!["x:latest".into()],
                remove_error: Some(RuntimeError::NoSuchContainer {
                    names: vec!["a".into()],
                }),
                ..Default::default()
            },
            FakeRunner::default(),
        );

        let outcome = h.orchestrator.build(&[spec("a", "x", &[])]).await.unwrap();
        assert_eq!(outcome.status(), RunStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_removal_failure_aborts_run() {
        let h = harness(
            FakeRuntime {
                remove_error: Some(RuntimeError::Unavailable {
                    message: "daemon down".into(),
                }),
                ..Default::default()
            },
            FakeRunner::default(),
        );

        let outcome = h.orchestrator.build(&[spec("a", "x", &[])]).await.unwrap();

        let abort = outcome.aborted.unwrap();
        assert_eq!(abort.stage, StageKind::RemoveStale);
        assert!(matches!(abort.error, FirmamentError::ContainerOperationFailure { .. }));
        assert!(outcome.completed_stages.is_empty());
        assert_eq!(h.runtime.calls(), vec!["rm a"]);
    }

    #[tokio::test]
    async fn test_cycle_aborts_before_creating_anything() {
        let h = harness(
            FakeRuntime {
                local_images: vec!["x:latest".into()],
                ..Default::default()
            },
            FakeRunner::default(),
        );
        let batch = vec![spec("a", "x", &["b:b"]), spec("b", "x", &["a:a"])];

        let outcome = h.orchestrator.build(&batch).await.unwrap();

        let abort = outcome.aborted.unwrap();
        assert_eq!(abort.stage, StageKind::CreateAndStart);
        match abort.error {
            FirmamentError::CircularDependency { path, .. } => {
                assert!(path.contains(&"a".to_string()));
                assert!(path.contains(&"b".to_string()));
            }
            other => panic!("expected cycle, got {other:?}"),
        }
        assert!(h.runtime.calls_starting_with("create").is_empty());
    }

    #[tokio::test]
    async fn test_unknown_link_aborts() {
        let h = harness(
            FakeRuntime {
                local_images: vec!["x:latest".into()],
                ..Default::default()
            },
            FakeRunner::default(),
        );

        let outcome = h
            .orchestrator
            .build(&[spec("web", "x", &["ghost:db"])])
            .await
            .unwrap();

        assert!(matches!(
            outcome.aborted.unwrap().error,
            FirmamentError::UnresolvedDependency { dependency, .. } if dependency == "ghost"
        ));
    }

    #[tokio::test]
    async fn test_create_failure_aborts_without_starting() {
        let h = harness(
            FakeRuntime {
                local_images: vec!["x:latest".into()],
                fail_create: Some("web".into()),
                ..Default::default()
            },
            FakeRunner::default(),
        );
        let mut web = spec("web", "x", &["db:db"]);
        web.attached_apps = vec![app("api", "https://example.com/api.git")];
        let batch = vec![web, spec("db", "x", &[])];

        let outcome = h.orchestrator.build(&batch).await.unwrap();

        assert_eq!(outcome.aborted.unwrap().stage, StageKind::CreateAndStart);
        assert_eq!(outcome.startup_order, vec!["db", "web"]);
        assert!(outcome.started_containers.is_empty());
        assert_eq!(
            h.runtime.calls_starting_with("create"),
            vec!["create db", "create web"]
        );
        assert!(h.runtime.calls_starting_with("start").is_empty());
        assert!(h.runner.tasks().is_empty());
    }

    #[tokio::test]
    async fn test_deployment_failures_do_not_block_other_apps() {
        let h = harness(
            FakeRuntime {
                local_images: vec!["x:latest".into()],
                ..Default::default()
            },
            FakeRunner {
                fail_on: vec!["https://example.com/broken.git".into()],
                ..Default::default()
            },
        );
        let mut web = spec("web", "x", &[]);
        web.attached_apps = vec![
            app("broken", "https://example.com/broken.git"),
            app("orders", "https://example.com/orders.git"),
        ];
        let mut api = spec("api", "x", &[]);
        api.attached_apps = vec![app("billing", "https://example.com/billing.git")];

        let outcome = h.orchestrator.build(&[web, api]).await.unwrap();

        assert_eq!(outcome.status(), RunStatus::CompletedWithFailures);
        assert_eq!(outcome.exit_code(), 2);
        assert_eq!(outcome.completed_stages.len(), 6);
        assert_eq!(outcome.deployed_apps, vec!["orders", "billing"]);
        assert_eq!(outcome.deployment_failures.len(), 1);
        assert!(matches!(
            &outcome.deployment_failures[0],
            FirmamentError::DeploymentStepFailure { app, step, .. }
                if app == "broken" && step == "clone"
        ));

        // clone, npm install, slc build, slc deploy for each of the three apps
        let tasks = h.runner.tasks();
        assert_eq!(tasks.len(), 12);
        let programs: Vec<_> = tasks.iter().map(|t| t.program.as_str()).collect();
        assert_eq!(
            programs,
            vec![
                "git", "npm", "slc", "slc", "git", "npm", "slc", "slc", "git", "npm", "slc", "slc"
            ]
        );
    }

    #[tokio::test]
    async fn test_deploy_steps_run_in_checkout() {
        let h = harness(
            FakeRuntime {
                local_images: vec!["x:latest".into()],
                ..Default::default()
            },
            FakeRunner::default(),
        );
        let mut web = spec("web", "x", &[]);
        web.attached_apps = vec![app("orders", "https://example.com/orders.git")];

        h.orchestrator.build(&[web]).await.unwrap();

        let tasks = h.runner.tasks();
        let clone = &tasks[0];
        assert_eq!(clone.working_dir.as_deref(), Some(Path::new("/work")));
        assert_eq!(&clone.args[..4], &["clone", "-b", "master", "--single-branch"]);

        let checkout = PathBuf::from(clone.args.last().unwrap());
        assert!(checkout.starts_with("/work"));
        assert!(checkout
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("orders"));

        assert_eq!(tasks[1].working_dir, Some(checkout.join("server")));
        assert_eq!(tasks[2].args, vec!["build"]);
        assert_eq!(tasks[2].working_dir.as_deref(), Some(checkout.as_path()));
        assert_eq!(tasks[3].args, vec!["deploy", "http://localhost:8701"]);
    }
}
