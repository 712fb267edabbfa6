// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 firmament contributors

//! Shell task runner
//!
//! Runs external programs through `tokio::process`.

use async_trait::async_trait;
use std::time::Instant;
use tokio::process::Command;

use super::{ShellTask, TaskOutput, TaskRunner};
use crate::errors::FirmamentError;

/// Runs tasks as child processes, capturing their output
pub struct ShellRunner;

impl ShellRunner {
    /// Create a new shell runner
    pub fn new() -> Self {
        Self
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskRunner for ShellRunner {
    async fn run(&self, task: &ShellTask) -> Result<TaskOutput, FirmamentError> {
        let start = Instant::now();

        // Bare program names must resolve on PATH
        let bare = !task.program.contains(std::path::MAIN_SEPARATOR);
        if bare && which::which(&task.program).is_err() {
            return Err(FirmamentError::tool_not_found(&task.program));
        }

        let mut cmd = Command::new(&task.program);
        cmd.args(&task.args);
        if let Some(ref dir) = task.working_dir {
            cmd.current_dir(dir);
        }

        tracing::debug!(dir = ?task.working_dir, "running {}", task.display());

        let output = cmd.output().await.map_err(|e| {
            let help = match (&task.working_dir, e.kind()) {
                (Some(dir), std::io::ErrorKind::NotFound) if !dir.exists() => {
                    Some(format!("Working directory '{}' does not exist", dir.display()))
                }
                (_, std::io::ErrorKind::NotFound) => {
                    Some(format!("'{}' may not be installed or on your PATH", task.program))
                }
                _ => None,
            };

            FirmamentError::TaskSpawnFailed {
                program: task.program.clone(),
                error: e.to_string(),
                help,
            }
        })?;

        let duration = start.elapsed();
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if output.status.success() {
            Ok(TaskOutput {
                stdout,
                stderr,
                duration,
            })
        } else {
            let exit_code = output.status.code().unwrap_or(-1);
            let help = stderr
                .lines()
                .rev()
                .find(|line| !line.trim().is_empty())
                .map(|line| line.trim().to_string());

            Err(FirmamentError::TaskFailed {
                program: task.program.clone(),
                exit_code,
                stderr,
                help,
            })
        }
    }
}
