//! Tracked tasks

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::notify::TaskOwner;
use crate::now_ms;

/// Status of a tracked task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created but not yet running
    Pending,
    /// In flight
    Running,
    /// Finished within its timeout
    Completed,
    /// Finished with an error (or a failed fallback)
    Failed,
    /// Exceeded its timeout with no usable fallback
    TimedOut,
    /// Timed out, but the fallback produced a result
    Recovered,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::TimedOut => write!(f, "timed_out"),
            Self::Recovered => write!(f, "recovered"),
        }
    }
}

impl TaskStatus {
    /// Whether this status ends the task's life in the registry
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::TimedOut | Self::Recovered
        )
    }
}

/// A task being tracked by the orchestrator
#[derive(Debug, Clone)]
pub struct TrackedTask {
    pub id: String,
    pub owner: TaskOwner,
    pub operation_type: String,
    /// Monotonic start, for elapsed-time checks
    pub started: Instant,
    /// Wall-clock start (Unix milliseconds), for snapshots
    pub started_at_ms: i64,
    pub timeout: Duration,
    pub status: TaskStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    /// In-flight progress notice to clean up on recovery
    pub notice_id: Option<i64>,
    pub error: Option<String>,
}

impl TrackedTask {
    pub fn new(
        owner: TaskOwner,
        operation_type: impl Into<String>,
        timeout: Duration,
        max_retries: u32,
        notice_id: Option<i64>,
    ) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            owner,
            operation_type: operation_type.into(),
            started: Instant::now(),
            started_at_ms: now_ms(),
            timeout,
            status: TaskStatus::Running,
            retry_count: 0,
            max_retries,
            notice_id,
            error: None,
        }
    }

    /// Time since the task started
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Whether the task has outlived its timeout while still running
    pub fn is_timed_out(&self) -> bool {
        self.status == TaskStatus::Running && self.elapsed() > self.timeout
    }

    /// Whether the task has outlived `timeout * threshold`, i.e. the
    /// orchestrator's own timeout should already have fired
    pub fn is_stuck(&self, threshold: f64) -> bool {
        self.status == TaskStatus::Running
            && self.elapsed().as_secs_f64() > self.timeout.as_secs_f64() * threshold
    }

    /// Serializable view for introspection
    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id.clone(),
            owner: self.owner,
            operation_type: self.operation_type.clone(),
            status: self.status,
            started_at_ms: self.started_at_ms,
            elapsed_secs: self.elapsed().as_secs_f64(),
            timeout_secs: self.timeout.as_secs_f64(),
            retry_count: self.retry_count,
            error: self.error.clone(),
        }
    }
}

/// Read-only view of a tracked task
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub id: String,
    pub owner: TaskOwner,
    pub operation_type: String,
    pub status: TaskStatus,
    pub started_at_ms: i64,
    pub elapsed_secs: f64,
    pub timeout_secs: f64,
    pub retry_count: u32,
    pub error: Option<String>,
}
