//! Dead letter queue types and configuration.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a dead-lettered task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DlqStatus {
    /// As recorded; awaiting manual intervention.
    Failed,
    /// An operator asked for a retry; the caller re-submits the work.
    RetryPending,
}

/// One recorded permanent failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqEntry {
    pub task_name: String,
    pub task_id: String,
    /// Arguments the task was invoked with, for replay.
    pub args: serde_json::Value,
    pub error: String,
    pub traceback: Option<String>,
    /// Retries attempted before giving up.
    pub retry_count: u32,
    pub metadata: Option<serde_json::Value>,
    pub failed_at: DateTime<Utc>,
    pub status: DlqStatus,
    pub retry_attempted: bool,
}

/// Dead letter queue tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DlqConfig {
    /// Payload records expire after this many days.
    pub retention_days: u32,
    /// Task names whose failure raises a high-severity alert.
    pub critical_tasks: HashSet<String>,
}

impl Default for DlqConfig {
    fn default() -> Self {
        Self {
            retention_days: 30,
            critical_tasks: HashSet::new(),
        }
    }
}

impl DlqConfig {
    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }

    pub fn with_critical_task(mut self, task_name: impl Into<String>) -> Self {
        self.critical_tasks.insert(task_name.into());
        self
    }
}

/// Admin snapshot of the queue.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DlqStatistics {
    pub total_failed_tasks: u64,
    pub failed_last_24h: u64,
    pub by_task_name: HashMap<String, u64>,
    pub oldest_failure: Option<DateTime<Utc>>,
    pub newest_failure: Option<DateTime<Utc>>,
}
