//! The dead letter queue.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, warn};

use taskward_core::{Clock, SystemClock};
use taskward_store::{StateStore, StoreError};

use super::types::{DlqConfig, DlqEntry, DlqStatistics, DlqStatus};

const INDEX_KEY: &str = "taskward:dlq:index";
const ENTRY_KEY_PREFIX: &str = "taskward:dlq:entry";

const SECS_PER_DAY: u64 = 24 * 3600;

/// Durable, queryable record of permanently failed tasks.
///
/// Index members are `task_name:task_id:failed_at_millis`; task names and
/// ids must not themselves contain `:`. Lookups by task id walk the index
/// linearly, which is fine at dead-letter volumes.
pub struct DeadLetterQueue {
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    config: DlqConfig,
}

impl DeadLetterQueue {
    pub fn new(store: Arc<dyn StateStore>, config: DlqConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn StateStore>,
        config: DlqConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Record a task that exhausted its retries. Returns whether the entry
    /// was persisted.
    #[allow(clippy::too_many_arguments)]
    pub fn add_failed_task(
        &self,
        task_name: &str,
        task_id: &str,
        args: serde_json::Value,
        error_message: &str,
        traceback: Option<String>,
        retry_count: u32,
        metadata: Option<serde_json::Value>,
    ) -> bool {
        let result = self.try_add_failed_task(
            task_name,
            task_id,
            args,
            error_message,
            traceback,
            retry_count,
            metadata,
        );
        match result {
            Ok(()) => true,
            Err(e) => {
                // Losing a dead letter means losing the only trace of a
                // permanently failed task; log loudly, but never raise.
                error!(
                    task_name,
                    task_id,
                    error = %e,
                    "state store unavailable, dead letter NOT recorded"
                );
                false
            }
        }
    }

    /// Newest-first page of entries, optionally filtered by task name.
    pub fn failed_tasks(
        &self,
        limit: usize,
        offset: usize,
        task_name: Option<&str>,
    ) -> Vec<DlqEntry> {
        match self.try_failed_tasks(limit, offset, task_name) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "state store unavailable, returning no dead letters");
                Vec::new()
            }
        }
    }

    /// The entry for a task id, if any. With multiple failures of the same
    /// task, returns the oldest recorded entry.
    pub fn failed_task(&self, task_id: &str) -> Option<DlqEntry> {
        match self.find_member(task_id) {
            Ok(Some(member)) => self.load_entry(&member).ok().flatten(),
            Ok(None) => None,
            Err(e) => {
                warn!(task_id, error = %e, "state store unavailable, dead letter lookup failed");
                None
            }
        }
    }

    /// Flag an entry for retry. The queue itself never re-submits work;
    /// callers watch for `RetryPending` entries and act.
    pub fn retry_task(&self, task_id: &str) -> bool {
        let result = (|| -> Result<bool, StoreError> {
            let Some(member) = self.find_member(task_id)? else {
                return Ok(false);
            };
            let Some(mut entry) = self.load_entry(&member)? else {
                return Ok(false);
            };
            entry.retry_attempted = true;
            entry.status = DlqStatus::RetryPending;
            self.save_entry(&member, &entry)?;
            Ok(true)
        })();
        match result {
            Ok(flagged) => flagged,
            Err(e) => {
                warn!(task_id, error = %e, "state store unavailable, retry flag not set");
                false
            }
        }
    }

    /// Remove an entry (index and payload). Returns whether one existed.
    pub fn remove_task(&self, task_id: &str) -> bool {
        let result = (|| -> Result<bool, StoreError> {
            let Some(member) = self.find_member(task_id)? else {
                return Ok(false);
            };
            self.store.zrem(INDEX_KEY, &member)?;
            self.store.delete(&entry_key(&member))?;
            Ok(true)
        })();
        match result {
            Ok(removed) => removed,
            Err(e) => {
                warn!(task_id, error = %e, "state store unavailable, dead letter not removed");
                false
            }
        }
    }

    /// Totals, 24h count, per-task-name breakdown, oldest/newest failure.
    pub fn statistics(&self) -> DlqStatistics {
        match self.try_statistics() {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "state store unavailable, dead letter statistics empty");
                DlqStatistics::default()
            }
        }
    }

    /// Remove entries older than `days` days. Returns how many index
    /// entries were removed.
    pub fn cleanup_old_entries(&self, days: u32) -> u64 {
        match self.try_cleanup(days) {
            Ok(removed) => removed,
            Err(e) => {
                warn!(error = %e, "state store unavailable, dead letter cleanup skipped");
                0
            }
        }
    }

    // -- internals ---------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    fn try_add_failed_task(
        &self,
        task_name: &str,
        task_id: &str,
        args: serde_json::Value,
        error_message: &str,
        traceback: Option<String>,
        retry_count: u32,
        metadata: Option<serde_json::Value>,
    ) -> Result<(), StoreError> {
        let now = self.clock.now();
        let member = format!("{task_name}:{task_id}:{}", now.timestamp_millis());

        let entry = DlqEntry {
            task_name: task_name.to_string(),
            task_id: task_id.to_string(),
            args,
            error: error_message.to_string(),
            traceback,
            retry_count,
            metadata,
            failed_at: now,
            status: DlqStatus::Failed,
            retry_attempted: false,
        };

        // Payload first, index second: an index member without a payload is
        // pruned lazily, a payload without an index member is just garbage
        // that the TTL collects.
        self.save_entry(&member, &entry)?;
        self.store
            .zadd(INDEX_KEY, &member, self.clock.epoch_secs())?;

        if self.config.critical_tasks.contains(task_name) {
            error!(
                task_name,
                task_id,
                retry_count,
                error = error_message,
                critical = true,
                "CRITICAL task permanently failed"
            );
        } else {
            warn!(
                task_name,
                task_id,
                retry_count,
                error = error_message,
                "task moved to dead letter queue"
            );
        }
        Ok(())
    }

    fn try_failed_tasks(
        &self,
        limit: usize,
        offset: usize,
        task_name: Option<&str>,
    ) -> Result<Vec<DlqEntry>, StoreError> {
        let members = self.store.zrevrange(INDEX_KEY, 0, -1)?;

        let mut entries = Vec::new();
        let mut skipped = 0usize;
        for member in members {
            if let Some(filter) = task_name {
                match split_member(&member) {
                    Some((name, _, _)) if name == filter => {}
                    _ => continue,
                }
            }
            let Some(entry) = self.load_entry(&member)? else {
                // payload TTL lapsed; drop the dangling index member
                self.store.zrem(INDEX_KEY, &member)?;
                continue;
            };
            if skipped < offset {
                skipped += 1;
                continue;
            }
            entries.push(entry);
            if entries.len() >= limit {
                break;
            }
        }
        Ok(entries)
    }

    /// Linear scan over the index for a member carrying this task id.
    fn find_member(&self, task_id: &str) -> Result<Option<String>, StoreError> {
        let members = self.store.zrange(INDEX_KEY, 0, -1)?;
        Ok(members.into_iter().find(|member| {
            matches!(split_member(member), Some((_, id, _)) if id == task_id)
        }))
    }

    fn try_statistics(&self) -> Result<DlqStatistics, StoreError> {
        let total = self.store.zcard(INDEX_KEY)?;
        let day_ago = self.clock.epoch_secs() - SECS_PER_DAY as f64;
        let last_24h = self.store.zcount(INDEX_KEY, day_ago, f64::INFINITY)?;

        let mut by_task_name = std::collections::HashMap::new();
        for member in self.store.zrange(INDEX_KEY, 0, -1)? {
            if let Some((name, _, _)) = split_member(&member) {
                *by_task_name.entry(name.to_string()).or_insert(0u64) += 1;
            }
        }

        let oldest_failure = self
            .store
            .zrange(INDEX_KEY, 0, 0)?
            .first()
            .and_then(|m| member_failed_at(m));
        let newest_failure = self
            .store
            .zrevrange(INDEX_KEY, 0, 0)?
            .first()
            .and_then(|m| member_failed_at(m));

        Ok(DlqStatistics {
            total_failed_tasks: total,
            failed_last_24h: last_24h,
            by_task_name,
            oldest_failure,
            newest_failure,
        })
    }

    fn try_cleanup(&self, days: u32) -> Result<u64, StoreError> {
        let cutoff = self.clock.epoch_secs() - (days as u64 * SECS_PER_DAY) as f64;

        let doomed = self
            .store
            .zrange_by_score(INDEX_KEY, f64::NEG_INFINITY, cutoff)?;
        for (member, _) in &doomed {
            self.store.delete(&entry_key(member))?;
        }
        let removed = self
            .store
            .zrem_range_by_score(INDEX_KEY, f64::NEG_INFINITY, cutoff)?;
        Ok(removed)
    }

    fn load_entry(&self, member: &str) -> Result<Option<DlqEntry>, StoreError> {
        let Some(raw) = self.store.get(&entry_key(member))? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                warn!(member, error = %e, "corrupt dead letter payload, treating as absent");
                Ok(None)
            }
        }
    }

    fn save_entry(&self, member: &str, entry: &DlqEntry) -> Result<(), StoreError> {
        let raw = serde_json::to_string(entry)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let key = entry_key(member);
        // keep the original retention horizon when rewriting (retry flag)
        let ttl = self
            .store
            .ttl(&key)?
            .unwrap_or(Duration::from_secs(self.config.retention_days as u64 * SECS_PER_DAY));
        self.store.set(&key, &raw, Some(ttl))
    }
}

impl std::fmt::Debug for DeadLetterQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeadLetterQueue")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn entry_key(member: &str) -> String {
    format!("{ENTRY_KEY_PREFIX}:{member}")
}

/// `task_name:task_id:failed_at_millis` → (name, id, millis).
fn split_member(member: &str) -> Option<(&str, &str, i64)> {
    let mut parts = member.rsplitn(3, ':');
    let millis = parts.next()?.parse().ok()?;
    let task_id = parts.next()?;
    let task_name = parts.next()?;
    Some((task_name, task_id, millis))
}

fn member_failed_at(member: &str) -> Option<DateTime<Utc>> {
    let (_, _, millis) = split_member(member)?;
    DateTime::from_timestamp_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskward_core::ManualClock;
    use taskward_store::{InMemoryStateStore, UnavailableStateStore};

    fn dlq_with(config: DlqConfig) -> (DeadLetterQueue, Arc<ManualClock>, Arc<InMemoryStateStore>) {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(InMemoryStateStore::with_clock(clock.clone()));
        (
            DeadLetterQueue::with_clock(store.clone(), config, clock.clone()),
            clock,
            store,
        )
    }

    fn add(dlq: &DeadLetterQueue, name: &str, id: &str) {
        assert!(dlq.add_failed_task(
            name,
            id,
            serde_json::json!({ "chapter": 3 }),
            "provider timed out",
            Some("worker.rs:42".to_string()),
            5,
            None,
        ));
    }

    #[test]
    fn newest_entries_come_first() {
        let (dlq, clock, _) = dlq_with(DlqConfig::default());

        add(&dlq, "chapter_generation", "t1");
        clock.advance(Duration::from_secs(10));
        add(&dlq, "pdf_extraction", "t2");

        let page = dlq.failed_tasks(1, 0, None);
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].task_id, "t2");

        let page = dlq.failed_tasks(10, 1, None);
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].task_id, "t1");
    }

    #[test]
    fn filter_by_task_name() {
        let (dlq, clock, _) = dlq_with(DlqConfig::default());
        add(&dlq, "chapter_generation", "t1");
        clock.advance(Duration::from_secs(1));
        add(&dlq, "pdf_extraction", "t2");
        clock.advance(Duration::from_secs(1));
        add(&dlq, "chapter_generation", "t3");

        let chapters = dlq.failed_tasks(10, 0, Some("chapter_generation"));
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].task_id, "t3");
        assert_eq!(chapters[1].task_id, "t1");
    }

    #[test]
    fn repeated_failures_of_one_task_each_get_an_entry() {
        let (dlq, clock, _) = dlq_with(DlqConfig::default());
        add(&dlq, "chapter_generation", "t1");
        clock.advance(Duration::from_secs(5));
        add(&dlq, "chapter_generation", "t1");

        assert_eq!(dlq.statistics().total_failed_tasks, 2);
    }

    #[test]
    fn retry_then_remove_flow() {
        let (dlq, _clock, _) = dlq_with(DlqConfig::default());
        add(&dlq, "chapter_generation", "t1");

        let entry = dlq.failed_task("t1").unwrap();
        assert_eq!(entry.status, DlqStatus::Failed);
        assert!(!entry.retry_attempted);

        assert!(dlq.retry_task("t1"));
        let entry = dlq.failed_task("t1").unwrap();
        assert_eq!(entry.status, DlqStatus::RetryPending);
        assert!(entry.retry_attempted);

        assert!(dlq.remove_task("t1"));
        assert!(dlq.failed_task("t1").is_none());
        assert!(!dlq.retry_task("t1"));
        assert!(!dlq.remove_task("t1"));
    }

    #[test]
    fn statistics_break_down_by_name_and_age() {
        let (dlq, clock, _) = dlq_with(DlqConfig::default());

        add(&dlq, "chapter_generation", "t1");
        let oldest_at = clock.now();
        clock.advance(Duration::from_secs(2 * SECS_PER_DAY));
        add(&dlq, "chapter_generation", "t2");
        clock.advance(Duration::from_secs(3600));
        add(&dlq, "pdf_extraction", "t3");

        let stats = dlq.statistics();
        assert_eq!(stats.total_failed_tasks, 3);
        assert_eq!(stats.failed_last_24h, 2);
        assert_eq!(stats.by_task_name["chapter_generation"], 2);
        assert_eq!(stats.by_task_name["pdf_extraction"], 1);
        assert_eq!(stats.oldest_failure.unwrap(), oldest_at);
        assert_eq!(stats.newest_failure.unwrap(), clock.now());
    }

    #[test]
    fn cleanup_removes_only_old_entries() {
        let (dlq, clock, _) = dlq_with(DlqConfig::default());

        add(&dlq, "chapter_generation", "old1");
        add(&dlq, "chapter_generation", "old2");
        clock.advance(Duration::from_secs(10 * SECS_PER_DAY));
        add(&dlq, "chapter_generation", "fresh");

        let before = dlq.statistics().total_failed_tasks;
        let removed = dlq.cleanup_old_entries(7);
        assert_eq!(removed, 2);
        assert_eq!(dlq.statistics().total_failed_tasks, before - 2);

        assert!(dlq.failed_task("old1").is_none());
        assert!(dlq.failed_task("fresh").is_some());
    }

    #[test]
    fn expired_payloads_are_pruned_from_the_index() {
        let (dlq, clock, _) = dlq_with(DlqConfig::default().with_retention_days(1));

        add(&dlq, "chapter_generation", "t1");
        clock.advance(Duration::from_secs(SECS_PER_DAY + 60));
        add(&dlq, "chapter_generation", "t2");

        // t1's payload TTL lapsed; listing skips it and prunes the index
        let entries = dlq.failed_tasks(10, 0, None);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].task_id, "t2");
        assert_eq!(dlq.statistics().total_failed_tasks, 1);
    }

    #[test]
    fn critical_tasks_still_record_normally() {
        let (dlq, _clock, _) =
            dlq_with(DlqConfig::default().with_critical_task("chapter_generation"));
        add(&dlq, "chapter_generation", "t1");
        assert_eq!(dlq.statistics().total_failed_tasks, 1);
    }

    #[test]
    fn store_outage_is_silent() {
        let dlq = DeadLetterQueue::new(Arc::new(UnavailableStateStore), DlqConfig::default());

        assert!(!dlq.add_failed_task(
            "chapter_generation",
            "t1",
            serde_json::json!(null),
            "boom",
            None,
            3,
            None,
        ));
        assert!(dlq.failed_tasks(10, 0, None).is_empty());
        assert!(dlq.failed_task("t1").is_none());
        assert!(!dlq.retry_task("t1"));
        assert!(!dlq.remove_task("t1"));
        assert_eq!(dlq.statistics().total_failed_tasks, 0);
        assert_eq!(dlq.cleanup_old_entries(7), 0);
    }
}
