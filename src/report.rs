//! Read-only views over a job for the display collaborator.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::dispatch::ledger::{Task, TaskState};

/// Overall classification of a finished job.
///
/// `PartialFailure` means quorum was satisfied but some work was orphaned
/// or timed out along the way; per minhosts semantics it still counts as an
/// overall success for the caller, with the detail carried in the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobOutcome {
    Success,
    PartialFailure,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Success | JobOutcome::PartialFailure)
    }
}

impl std::fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobOutcome::Success => write!(f, "success"),
            JobOutcome::PartialFailure => write!(f, "partial_failure"),
        }
    }
}

/// Periodic rendering snapshot. Non-mutating; safe to take at any time.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub elapsed_secs: f64,
    pub pending: usize,
    pub total_tasks: usize,
    pub hosts_lost: usize,
    pub hosts_total: usize,
}

/// Final per-task outcome line in the manifest.
#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    pub task_id: Uuid,
    pub host: String,
    pub payload: String,
    pub state: TaskState,
    pub result: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Task> for TaskRecord {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.id,
            host: task.host_id.clone(),
            payload: task.payload.clone(),
            state: task.state,
            result: task.result.clone(),
            completed_at: task.completed_at,
        }
    }
}

/// Manifest of a concluded job: what completed, what was lost along the
/// way, and how it is classified.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub outcome: Option<JobOutcome>,
    pub aborted: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub completed: Vec<TaskRecord>,
    pub orphaned: Vec<TaskRecord>,
    pub timed_out: Vec<TaskRecord>,
    pub hosts_lost: Vec<String>,
}

impl JobReport {
    pub fn is_success(&self) -> bool {
        self.outcome.map(|o| o.is_success()).unwrap_or(false)
    }
}
