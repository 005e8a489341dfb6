use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DispatchError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Pending,
    Completed,
    TimedOut,
    Orphaned,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        *self != TaskState::Pending
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Pending => write!(f, "pending"),
            TaskState::Completed => write!(f, "completed"),
            TaskState::TimedOut => write!(f, "timed_out"),
            TaskState::Orphaned => write!(f, "orphaned"),
        }
    }
}

/// A dispatched unit of work, assigned to exactly one host for its lifetime.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: Uuid,
    pub host_id: String,
    pub payload: String,
    pub state: TaskState,
    pub dispatched_at: Instant,
    /// Task-level deadline, independent of the host-level clock. `None`
    /// means the task has no deadline and waits indefinitely.
    pub deadline: Option<Instant>,
    pub result: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Tracks outstanding tasks and their per-task liveness state.
///
/// State is monotonic once terminal: `Completed` only via an explicit
/// completion message, `TimedOut` only via deadline expiry, `Orphaned` only
/// when the assigned host is declared lost (or the job aborted) while the
/// task is still pending. Tasks are removed only when the job concludes.
#[derive(Debug, Default)]
pub struct TaskLedger {
    tasks: HashMap<Uuid, Task>,
}

impl TaskLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly dispatched task in `Pending` state. A `None` timeout
    /// dispatches the task without a deadline.
    pub fn dispatch(
        &mut self,
        task_id: Uuid,
        host: &str,
        payload: String,
        now: Instant,
        task_timeout: Option<Duration>,
    ) -> Result<()> {
        if self.tasks.contains_key(&task_id) {
            return Err(DispatchError::DuplicateTask(task_id));
        }
        self.tasks.insert(
            task_id,
            Task {
                id: task_id,
                host_id: host.to_string(),
                payload,
                state: TaskState::Pending,
                dispatched_at: now,
                deadline: task_timeout.map(|t| now + t),
                result: None,
                completed_at: None,
            },
        );
        Ok(())
    }

    /// Apply a completion message. Returns whether the task transitioned.
    ///
    /// A duplicate completion, or a completion arriving after the task
    /// already timed out or was orphaned, is a tolerated no-op: the channel
    /// is unreliable and late messages are expected.
    pub fn complete(&mut self, task_id: Uuid, result: Option<String>) -> Result<bool> {
        let task = self
            .tasks
            .get_mut(&task_id)
            .ok_or(DispatchError::UnknownTask(task_id))?;
        if task.state.is_terminal() {
            tracing::debug!(task_id = %task_id, state = %task.state, "Ignoring late completion");
            return Ok(false);
        }
        task.state = TaskState::Completed;
        task.result = result;
        task.completed_at = Some(Utc::now());
        tracing::info!(task_id = %task_id, host = %task.host_id, "Task completed");
        Ok(true)
    }

    /// Expire a single task's deadline: `Pending -> TimedOut` when `now`
    /// is strictly past the deadline, so a completion processed at the same
    /// instant always wins. Deadline-free tasks never expire. Returns
    /// whether a transition occurred.
    pub fn check_task_timeout(&mut self, task_id: Uuid, now: Instant) -> Result<bool> {
        let task = self
            .tasks
            .get_mut(&task_id)
            .ok_or(DispatchError::UnknownTask(task_id))?;
        if task.state == TaskState::Pending && task.deadline.is_some_and(|d| now > d) {
            tracing::info!(task_id = %task_id, host = %task.host_id, "Task timed out");
            task.state = TaskState::TimedOut;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Run the task-timeout check across all pending tasks.
    pub fn check_task_timeouts(&mut self, now: Instant) -> Vec<Uuid> {
        let ids: Vec<Uuid> = self.tasks.keys().copied().collect();
        ids.into_iter()
            .filter(|id| self.check_task_timeout(*id, now).unwrap_or(false))
            .collect()
    }

    /// Orphan every pending task assigned to `host`. Called exactly once,
    /// synchronously, when the host is declared lost. Returns the number of
    /// tasks orphaned.
    pub fn orphan_tasks_of(&mut self, host: &str) -> usize {
        let mut orphaned = 0;
        for task in self.tasks.values_mut() {
            if task.host_id == host && task.state == TaskState::Pending {
                task.state = TaskState::Orphaned;
                orphaned += 1;
                tracing::warn!(task_id = %task.id, host, "Task orphaned");
            }
        }
        orphaned
    }

    /// Orphan every pending task regardless of host. Used on job abort.
    pub fn orphan_all_pending(&mut self) -> usize {
        let mut orphaned = 0;
        for task in self.tasks.values_mut() {
            if task.state == TaskState::Pending {
                task.state = TaskState::Orphaned;
                orphaned += 1;
            }
        }
        orphaned
    }

    pub fn pending_count(&self) -> usize {
        self.tasks
            .values()
            .filter(|t| t.state == TaskState::Pending)
            .count()
    }

    /// Number of hosts whose every assigned task is `Completed`. This is
    /// the live count compared against minhosts: a host contributes to
    /// quorum only when its full task set has finished.
    pub fn completed_host_count(&self) -> usize {
        self.group_by_host()
            .values()
            .filter(|states| states.iter().all(|s| **s == TaskState::Completed))
            .count()
    }

    /// Hosts that could still complete their full task set: none of their
    /// tasks has timed out or been orphaned. Quorum is unreachable once
    /// fewer than minhosts of these remain.
    pub fn quorum_feasible_hosts(&self) -> usize {
        self.group_by_host()
            .values()
            .filter(|states| {
                states
                    .iter()
                    .all(|s| matches!(s, TaskState::Pending | TaskState::Completed))
            })
            .count()
    }

    fn group_by_host(&self) -> HashMap<&str, Vec<&TaskState>> {
        let mut by_host: HashMap<&str, Vec<&TaskState>> = HashMap::new();
        for task in self.tasks.values() {
            by_host
                .entry(task.host_id.as_str())
                .or_default()
                .push(&task.state);
        }
        by_host
    }

    pub fn host_has_pending(&self, host: &str) -> bool {
        self.tasks
            .values()
            .any(|t| t.host_id == host && t.state == TaskState::Pending)
    }

    /// Hosts with at least one pending task.
    pub fn hosts_with_pending(&self) -> HashSet<String> {
        self.tasks
            .values()
            .filter(|t| t.state == TaskState::Pending)
            .map(|t| t.host_id.clone())
            .collect()
    }

    pub fn get(&self, task_id: &Uuid) -> Option<&Task> {
        self.tasks.get(task_id)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
