//! The `StateStore` trait: operations the flow-control layer consumes from
//! the shared key-value store.
//!
//! The trait is deliberately synchronous: the only suspension point in this
//! layer is the network round trip to the store, and callers decide whether
//! that happens on a blocking thread or inside `spawn_blocking`. Individual
//! operations (counter increments, sorted-set inserts, hash-field sets) are
//! atomic on the server; multi-operation sequences are not, and components
//! must not assume otherwise.

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;

/// Error talking to the shared store.
///
/// Components never propagate these to callers: each maps any store error to
/// its documented fail-open or fail-silent default.
#[derive(Debug, Error, Clone)]
pub enum StoreError {
    /// Could not reach the store (connect/socket/timeout).
    #[error("store connection error: {0}")]
    Connection(String),

    /// The store rejected or failed a command.
    #[error("store command error: {0}")]
    Command(String),

    /// A stored value could not be encoded/decoded.
    #[error("store serialization error: {0}")]
    Serialization(String),
}

/// Key-value store operations with per-key TTL, hashes, sorted sets, and
/// atomic counters.
///
/// Sorted-set scores are `f64` seconds since the Unix epoch throughout this
/// workspace; `f64::NEG_INFINITY` / `f64::INFINITY` express open bounds.
pub trait StateStore: Send + Sync {
    // -- strings -----------------------------------------------------------

    /// Get a string value.
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Set a string value, optionally with a TTL. A plain set (no TTL)
    /// clears any existing expiry, matching Redis `SET`.
    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Delete a key of any type. Returns whether it existed.
    fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Whether a key exists (and has not expired).
    fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Set a TTL on an existing key. Returns false if the key is missing.
    fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Remaining TTL, or `None` if the key is missing or has no expiry.
    fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError>;

    // -- atomic counters ---------------------------------------------------

    /// Atomically add `by` to an integer value (0 if missing) and return the
    /// new value.
    fn incr(&self, key: &str, by: i64) -> Result<i64, StoreError>;

    /// Atomically subtract `by` from an integer value and return the new
    /// value.
    fn decr(&self, key: &str, by: i64) -> Result<i64, StoreError>;

    // -- hashes ------------------------------------------------------------

    /// Set a hash field. Returns true if the field was newly created.
    fn hset(&self, key: &str, field: &str, value: &str) -> Result<bool, StoreError>;

    /// Get a hash field.
    fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;

    /// All fields of a hash (empty map if the key is missing).
    fn hget_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    /// Delete a hash field. Returns whether it existed.
    fn hdel(&self, key: &str, field: &str) -> Result<bool, StoreError>;

    /// Number of fields in a hash (0 if the key is missing).
    fn hlen(&self, key: &str) -> Result<u64, StoreError>;

    // -- sorted sets -------------------------------------------------------

    /// Insert a member with a score, or update the score of an existing
    /// member. Returns true if the member was newly inserted.
    fn zadd(&self, key: &str, member: &str, score: f64) -> Result<bool, StoreError>;

    /// Members ordered by ascending score, by inclusive rank range.
    /// Negative indices count from the end, as in Redis (`-1` = last).
    fn zrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, StoreError>;

    /// Members ordered by descending score, by inclusive rank range.
    fn zrevrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, StoreError>;

    /// `(member, score)` pairs with `min <= score <= max`, ascending.
    fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<Vec<(String, f64)>, StoreError>;

    /// Number of members with `min <= score <= max`.
    fn zcount(&self, key: &str, min: f64, max: f64) -> Result<u64, StoreError>;

    /// Total number of members (0 if the key is missing).
    fn zcard(&self, key: &str) -> Result<u64, StoreError>;

    /// Remove a member. Returns whether it existed.
    fn zrem(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// Remove all members with `min <= score <= max`; returns how many.
    fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> Result<u64, StoreError>;

    // -- patterns ----------------------------------------------------------

    /// All live keys matching a glob pattern (`*` wildcard only).
    fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    /// Delete all keys matching a glob pattern; returns how many.
    fn delete_pattern(&self, pattern: &str) -> Result<u64, StoreError>;
}
