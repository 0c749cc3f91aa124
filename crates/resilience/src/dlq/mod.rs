//! Dead letter queue for tasks that exhausted all retries.
//!
//! ## Design
//!
//! - A time-ordered index (score = failure time) plus one payload record
//!   per failure, expiring after the retention period
//! - Repeated failures of the same logical task each get their own entry;
//!   the history is the point
//! - The queue records and reports; it never re-submits work. Retrying is
//!   the caller's job, flagged via `retry_task`
//! - Critical task names additionally raise a high-severity alert on
//!   arrival
//! - Recording is fail-silent: a down store loses the dead letter (logged
//!   at error), it never fails the worker

pub mod queue;
pub mod types;

pub use queue::DeadLetterQueue;
pub use types::{DlqConfig, DlqEntry, DlqStatistics, DlqStatus};
