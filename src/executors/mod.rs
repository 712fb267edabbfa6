// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 firmament contributors

//! External task execution
//!
//! Source checkouts, application build steps and deploy actions all run
//! through the [`TaskRunner`] trait.

mod shell;

pub use shell::ShellRunner;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::FirmamentError;

/// An external command to run to completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellTask {
    /// Program to execute
    pub program: String,

    /// Program arguments
    pub args: Vec<String>,

    /// Working directory; the runner's current directory when unset
    pub working_dir: Option<PathBuf>,
}

impl ShellTask {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: None,
        }
    }

    /// Set the working directory
    pub fn in_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.working_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Single-branch clone of `branch` from `url` into `destination`
    pub fn git_clone(url: &str, branch: &str, destination: &Path) -> Self {
        Self::new(
            "git",
            vec![
                "clone".to_string(),
                "-b".to_string(),
                branch.to_string(),
                "--single-branch".to_string(),
                url.to_string(),
                destination.to_string_lossy().to_string(),
            ],
        )
    }

    /// Command line for logs
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Output of a task that succeeded
#[derive(Debug, Clone)]
pub struct TaskOutput {
    /// Standard output
    pub stdout: String,

    /// Standard error
    pub stderr: String,

    /// Execution duration
    pub duration: Duration,
}

/// Trait for external task runners
#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// Run a task to completion.
    ///
    /// A task that cannot be started or exits non-zero is an error; no
    /// output is interpreted beyond that.
    async fn run(&self, task: &ShellTask) -> Result<TaskOutput, FirmamentError>;
}
