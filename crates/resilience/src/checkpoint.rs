//! Step-level checkpoints for resumable multi-stage tasks.
//!
//! A long task (fetch source → call provider → post-process → persist)
//! marks each step as it completes; when the task is retried after a crash
//! or provider failure, finished steps are skipped. Steps live in one hash
//! per (task_type, task_id) namespace; task metadata is a separate key with
//! its own TTL.
//!
//! Step records are plain upserts with no state machine; the latest write
//! wins. A failed step is not terminal: a later completion simply
//! overwrites it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use taskward_core::{Clock, SystemClock, TaskKey};
use taskward_store::{StateStore, StoreError};

const KEY_PREFIX: &str = "taskward:checkpoint";

/// Outcome recorded for a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Complete,
    Failed,
}

/// Persisted record for one step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointStepRecord {
    pub status: StepStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub metadata: Option<serde_json::Value>,
    pub error: Option<String>,
    pub retry_count: u32,
}

/// Checkpoint tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Lifetime of the step ledger, set when the first step is written.
    pub step_ttl: Duration,
    /// Lifetime of task metadata, independent of the steps.
    pub metadata_ttl: Duration,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            step_ttl: Duration::from_secs(7 * 24 * 3600),
            metadata_ttl: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

impl CheckpointConfig {
    pub fn with_step_ttl(mut self, ttl: Duration) -> Self {
        self.step_ttl = ttl;
        self
    }

    pub fn with_metadata_ttl(mut self, ttl: Duration) -> Self {
        self.metadata_ttl = ttl;
        self
    }
}

/// Step-completion ledger for one (task_type, task_id).
pub struct TaskCheckpoint {
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    task: TaskKey,
    config: CheckpointConfig,
    steps_key: String,
    metadata_key: String,
}

impl TaskCheckpoint {
    pub fn new(store: Arc<dyn StateStore>, task: TaskKey, config: CheckpointConfig) -> Self {
        Self::with_clock(store, task, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn StateStore>,
        task: TaskKey,
        config: CheckpointConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let steps_key = format!("{KEY_PREFIX}:{}", task.key_fragment());
        let metadata_key = format!("{steps_key}:meta");
        Self {
            store,
            clock,
            task,
            config,
            steps_key,
            metadata_key,
        }
    }

    pub fn task(&self) -> &TaskKey {
        &self.task
    }

    /// Whether a step has been completed. A retried task checks this before
    /// redoing work; "unknown" (including a down store) reads as incomplete,
    /// which merely redoes idempotent work.
    pub fn is_step_complete(&self, step: &str) -> bool {
        self.step_record(step)
            .map(|record| record.status == StepStatus::Complete)
            .unwrap_or(false)
    }

    /// Upsert a completed-step record. Returns whether it was persisted.
    pub fn mark_step_complete(&self, step: &str, metadata: Option<serde_json::Value>) -> bool {
        let record = CheckpointStepRecord {
            status: StepStatus::Complete,
            completed_at: Some(self.clock.now()),
            failed_at: None,
            metadata,
            error: None,
            retry_count: 0,
        };
        self.write_step(step, &record)
    }

    /// Upsert a failed-step record (non-terminal; a later completion
    /// overwrites it). Returns whether it was persisted.
    pub fn mark_step_failed(&self, step: &str, error: &str, retry_count: u32) -> bool {
        let record = CheckpointStepRecord {
            status: StepStatus::Failed,
            completed_at: None,
            failed_at: Some(self.clock.now()),
            metadata: None,
            error: Some(error.to_string()),
            retry_count,
        };
        self.write_step(step, &record)
    }

    /// The stored record for a step, if any.
    pub fn step_record(&self, step: &str) -> Option<CheckpointStepRecord> {
        match self.try_step_record(step) {
            Ok(record) => record,
            Err(e) => {
                self.skip_on_store_error("step_record", &e);
                None
            }
        }
    }

    /// Metadata attached when the step was completed.
    pub fn step_metadata(&self, step: &str) -> Option<serde_json::Value> {
        self.step_record(step).and_then(|record| record.metadata)
    }

    /// All step records in the namespace.
    pub fn all_steps(&self) -> HashMap<String, CheckpointStepRecord> {
        match self.try_all_steps() {
            Ok(steps) => steps,
            Err(e) => {
                self.skip_on_store_error("all_steps", &e);
                HashMap::new()
            }
        }
    }

    /// Names of completed steps, sorted.
    pub fn completed_steps(&self) -> Vec<String> {
        self.steps_with_status(StepStatus::Complete)
    }

    /// Names of failed steps, sorted.
    pub fn failed_steps(&self) -> Vec<String> {
        self.steps_with_status(StepStatus::Failed)
    }

    /// `floor(100 * completed / total_steps)`; 0 for zero total.
    pub fn progress_percent(&self, total_steps: usize) -> u32 {
        if total_steps == 0 {
            return 0;
        }
        let completed = self.completed_steps().len();
        (100 * completed / total_steps) as u32
    }

    /// Whether any step record exists; callers use this to decide
    /// resume-vs-restart.
    pub fn has_checkpoint(&self) -> bool {
        match self.store.hlen(&self.steps_key) {
            Ok(len) => len > 0,
            Err(e) => {
                self.skip_on_store_error("has_checkpoint", &e);
                false
            }
        }
    }

    /// Drop all step records and task metadata for the namespace.
    pub fn clear(&self) -> bool {
        let result = self
            .store
            .delete(&self.steps_key)
            .and_then(|_| self.store.delete(&self.metadata_key));
        match result {
            Ok(_) => true,
            Err(e) => {
                self.skip_on_store_error("clear", &e);
                false
            }
        }
    }

    /// Attach free-form task-level metadata (own TTL, independent of
    /// steps). Returns whether it was persisted.
    pub fn set_metadata(&self, blob: &serde_json::Value) -> bool {
        let raw = match serde_json::to_string(blob) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(task = %self.task, error = %e, "unserializable checkpoint metadata dropped");
                return false;
            }
        };
        match self
            .store
            .set(&self.metadata_key, &raw, Some(self.config.metadata_ttl))
        {
            Ok(()) => true,
            Err(e) => {
                self.skip_on_store_error("set_metadata", &e);
                false
            }
        }
    }

    /// Task-level metadata, if present.
    pub fn metadata(&self) -> Option<serde_json::Value> {
        let raw = match self.store.get(&self.metadata_key) {
            Ok(raw) => raw?,
            Err(e) => {
                self.skip_on_store_error("metadata", &e);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(task = %self.task, error = %e, "corrupt checkpoint metadata, treating as absent");
                None
            }
        }
    }

    // -- named degradation path -------------------------------------------

    /// Fail silent: a checkpoint that cannot be read or written reports
    /// "incomplete"/absent and lets the caller redo work.
    fn skip_on_store_error(&self, op: &str, err: &StoreError) {
        warn!(
            task = %self.task,
            op,
            error = %err,
            "state store unavailable, checkpoint degraded"
        );
    }

    // -- internals ---------------------------------------------------------

    fn write_step(&self, step: &str, record: &CheckpointStepRecord) -> bool {
        let result = (|| -> Result<(), StoreError> {
            let raw = serde_json::to_string(record)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            let first_write = !self.store.exists(&self.steps_key)?;
            self.store.hset(&self.steps_key, step, &raw)?;
            if first_write {
                self.store.expire(&self.steps_key, self.config.step_ttl)?;
            }
            Ok(())
        })();
        match result {
            Ok(()) => true,
            Err(e) => {
                self.skip_on_store_error("write_step", &e);
                false
            }
        }
    }

    fn try_step_record(&self, step: &str) -> Result<Option<CheckpointStepRecord>, StoreError> {
        let Some(raw) = self.store.hget(&self.steps_key, step)? else {
            return Ok(None);
        };
        Ok(self.decode_step(step, &raw))
    }

    fn try_all_steps(&self) -> Result<HashMap<String, CheckpointStepRecord>, StoreError> {
        let fields = self.store.hget_all(&self.steps_key)?;
        Ok(fields
            .into_iter()
            .filter_map(|(step, raw)| {
                self.decode_step(&step, &raw).map(|record| (step, record))
            })
            .collect())
    }

    fn decode_step(&self, step: &str, raw: &str) -> Option<CheckpointStepRecord> {
        match serde_json::from_str(raw) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(
                    task = %self.task,
                    step,
                    error = %e,
                    "corrupt checkpoint step record, treating as absent"
                );
                None
            }
        }
    }

    fn steps_with_status(&self, status: StepStatus) -> Vec<String> {
        let mut steps: Vec<String> = self
            .all_steps()
            .into_iter()
            .filter(|(_, record)| record.status == status)
            .map(|(step, _)| step)
            .collect();
        steps.sort();
        steps
    }
}

impl std::fmt::Debug for TaskCheckpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskCheckpoint")
            .field("task", &self.task)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
