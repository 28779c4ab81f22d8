//! Scheduler types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// When a named task runs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TaskSchedule {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds between runs, measured from the previous tick.
    pub interval_secs: u64,
    /// Run once right after the scheduler starts.
    #[serde(default)]
    pub run_on_start: bool,
}

fn default_true() -> bool {
    true
}

impl TaskSchedule {
    pub fn every_secs(interval_secs: u64) -> Self {
        Self {
            enabled: true,
            interval_secs,
            run_on_start: false,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn on_start(mut self) -> Self {
        self.run_on_start = true;
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

/// Result of one finished run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskRunResult {
    pub success: bool,
    /// Task summary on success, error chain on failure.
    pub message: String,
}

/// Observable state of one task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskStatus {
    pub name: String,
    pub schedule: TaskSchedule,
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_result: Option<TaskRunResult>,
    pub run_count: u64,
    /// Ticks and run-now requests merged into an already running run.
    pub skipped_count: u64,
}

/// Answer to a run-now request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunNowOutcome {
    Started,
    /// The task was already running; the request was merged into it.
    AlreadyRunning,
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Unknown task: {0}")]
    UnknownTask(String),

    #[error("Task already registered: {0}")]
    AlreadyRegistered(String),
}
