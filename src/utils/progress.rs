// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 firmament contributors

//! Progress reporting
//!
//! Image pulls and builds emit `(task id, status, current, total)` events.
//! A [`ProgressReporter`] renders them; [`StageProgress`] prints the
//! pipeline's stage lines.

use colored::Colorize;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

/// Sink for progress events of long-running acquisition operations.
///
/// Implementations must accept many updates for the same task id and
/// interleaved updates for different task ids. Reporting never fails the
/// caller.
pub trait ProgressReporter: Send + Sync {
    /// Record one progress event. A `total` of zero means indeterminate.
    fn report(&self, task_id: &str, status: &str, current: u64, total: u64);

    /// Drop all per-task display state
    fn finish(&self) {}
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
        .template("{spinner:.blue} {prefix:.bold} {msg}")
        .expect("Invalid spinner template")
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{prefix:.bold} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
        .expect("Invalid progress bar template")
        .progress_chars("█▓░")
}

/// Statuses after which a task gets no further updates
fn is_final_status(status: &str) -> bool {
    let status = status.trim();
    status == "Pull complete"
        || status == "Already exists"
        || status.starts_with("Digest:")
        || status.starts_with("Status:")
        || status.starts_with("Successfully built")
        || status.starts_with("Successfully tagged")
}

/// Renders one bar per task id on the terminal
pub struct TerminalProgress {
    multi: MultiProgress,
    bars: Mutex<HashMap<String, ProgressBar>>,
}

impl TerminalProgress {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
        }
    }

    /// Reporter that keeps all state but never draws
    pub fn hidden() -> Self {
        Self {
            multi: MultiProgress::with_draw_target(ProgressDrawTarget::hidden()),
            bars: Mutex::new(HashMap::new()),
        }
    }

    /// Number of task ids seen since the last [`ProgressReporter::finish`]
    pub fn task_count(&self) -> usize {
        self.bars.lock().map(|bars| bars.len()).unwrap_or(0)
    }
}

impl Default for TerminalProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for TerminalProgress {
    fn report(&self, task_id: &str, status: &str, current: u64, total: u64) {
        let Ok(mut bars) = self.bars.lock() else {
            return;
        };

        let bar = bars.entry(task_id.to_string()).or_insert_with(|| {
            let pb = self.multi.add(ProgressBar::new_spinner());
            pb.set_style(spinner_style());
            pb.set_prefix(task_id.to_string());
            pb
        });

        if bar.is_finished() {
            return;
        }

        if total > 0 {
            if bar.length() != Some(total) {
                bar.set_style(bar_style());
                bar.set_length(total);
            }
            bar.set_position(current.min(total));
        } else {
            bar.tick();
        }

        if is_final_status(status) {
            bar.finish_with_message(status.to_string());
        } else {
            bar.set_message(status.to_string());
        }
    }

    fn finish(&self) {
        if let Ok(mut bars) = self.bars.lock() {
            for (_, bar) in bars.drain() {
                bar.finish_and_clear();
            }
        }
        let _ = self.multi.clear();
    }
}

/// Discards progress events, keeping them only as trace logs
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn report(&self, task_id: &str, status: &str, current: u64, total: u64) {
        tracing::trace!(task = task_id, current, total, "{}", status);
    }
}

/// Prints one line per pipeline stage as it starts and ends
pub struct StageProgress {
    stages: Vec<String>,
    current: usize,
    started: Option<Instant>,
}

impl StageProgress {
    pub fn new(stages: Vec<String>) -> Self {
        Self {
            stages,
            current: 0,
            started: None,
        }
    }

    fn label(&self) -> Option<String> {
        self.stages
            .get(self.current)
            .map(|stage| format!("[{}/{}] {}", self.current + 1, self.stages.len(), stage))
    }

    fn elapsed(&self) -> f64 {
        self.started.map(|s| s.elapsed().as_secs_f64()).unwrap_or_default()
    }

    pub fn start(&mut self) {
        self.started = Some(Instant::now());
        if let Some(label) = self.label() {
            println!("  {} {}...", "→".blue(), label);
        }
    }

    pub fn complete(&mut self) {
        if let Some(label) = self.label() {
            println!("  {} {} ({:.2}s)", "✓".green(), label.bold(), self.elapsed());
        }
        self.current += 1;
    }

    /// Stage finished but recorded non-fatal failures
    pub fn complete_with_warnings(&mut self, warnings: usize) {
        if let Some(label) = self.label() {
            println!(
                "  {} {} - {} failure{} recorded",
                "⚠".yellow(),
                label.bold(),
                warnings,
                if warnings == 1 { "" } else { "s" }
            );
        }
        self.current += 1;
    }

    pub fn fail(&mut self, error: &str) {
        if let Some(label) = self.label() {
            println!("  {} {} - {}", "✗".red(), label.bold(), error.dimmed());
        }
    }

    pub fn is_complete(&self) -> bool {
        self.current >= self.stages.len()
    }
}
