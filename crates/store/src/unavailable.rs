//! A state store whose every operation fails.
//!
//! Used by tests to prove the fail-open contract: no component may propagate
//! a store error or block the business call path when the store is down.

use std::collections::HashMap;
use std::time::Duration;

use crate::r#trait::{StateStore, StoreError};

/// Always-down [`StateStore`].
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableStateStore;

impl UnavailableStateStore {
    fn down<T>() -> Result<T, StoreError> {
        Err(StoreError::Connection(
            "state store unavailable".to_string(),
        ))
    }
}

impl StateStore for UnavailableStateStore {
    fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Self::down()
    }

    fn set(&self, _key: &str, _value: &str, _ttl: Option<Duration>) -> Result<(), StoreError> {
        Self::down()
    }

    fn delete(&self, _key: &str) -> Result<bool, StoreError> {
        Self::down()
    }

    fn exists(&self, _key: &str) -> Result<bool, StoreError> {
        Self::down()
    }

    fn expire(&self, _key: &str, _ttl: Duration) -> Result<bool, StoreError> {
        Self::down()
    }

    fn ttl(&self, _key: &str) -> Result<Option<Duration>, StoreError> {
        Self::down()
    }

    fn incr(&self, _key: &str, _by: i64) -> Result<i64, StoreError> {
        Self::down()
    }

    fn decr(&self, _key: &str, _by: i64) -> Result<i64, StoreError> {
        Self::down()
    }

    fn hset(&self, _key: &str, _field: &str, _value: &str) -> Result<bool, StoreError> {
        Self::down()
    }

    fn hget(&self, _key: &str, _field: &str) -> Result<Option<String>, StoreError> {
        Self::down()
    }

    fn hget_all(&self, _key: &str) -> Result<HashMap<String, String>, StoreError> {
        Self::down()
    }

    fn hdel(&self, _key: &str, _field: &str) -> Result<bool, StoreError> {
        Self::down()
    }

    fn hlen(&self, _key: &str) -> Result<u64, StoreError> {
        Self::down()
    }

    fn zadd(&self, _key: &str, _member: &str, _score: f64) -> Result<bool, StoreError> {
        Self::down()
    }

    fn zrange(&self, _key: &str, _start: isize, _stop: isize) -> Result<Vec<String>, StoreError> {
        Self::down()
    }

    fn zrevrange(
        &self,
        _key: &str,
        _start: isize,
        _stop: isize,
    ) -> Result<Vec<String>, StoreError> {
        Self::down()
    }

    fn zrange_by_score(
        &self,
        _key: &str,
        _min: f64,
        _max: f64,
    ) -> Result<Vec<(String, f64)>, StoreError> {
        Self::down()
    }

    fn zcount(&self, _key: &str, _min: f64, _max: f64) -> Result<u64, StoreError> {
        Self::down()
    }

    fn zcard(&self, _key: &str) -> Result<u64, StoreError> {
        Self::down()
    }

    fn zrem(&self, _key: &str, _member: &str) -> Result<bool, StoreError> {
        Self::down()
    }

    fn zrem_range_by_score(&self, _key: &str, _min: f64, _max: f64) -> Result<u64, StoreError> {
        Self::down()
    }

    fn scan_keys(&self, _pattern: &str) -> Result<Vec<String>, StoreError> {
        Self::down()
    }

    fn delete_pattern(&self, _pattern: &str) -> Result<u64, StoreError> {
        Self::down()
    }
}
