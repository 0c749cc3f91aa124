//! In-memory state store.
//!
//! Intended for tests/dev. Not optimized for performance: every operation
//! takes the write lock, and TTL expiry is evaluated lazily on access
//! against the injected [`Clock`] so tests can travel in time.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};

use taskward_core::{Clock, SystemClock};

use crate::r#trait::{StateStore, StoreError};

#[derive(Debug, Clone)]
enum Value {
    String(String),
    Hash(HashMap<String, String>),
    SortedSet(HashMap<String, f64>),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Hash(_) => "hash",
            Value::SortedSet(_) => "zset",
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

/// In-memory [`StateStore`] with faithful TTL, hash, sorted-set, and
/// counter semantics.
pub struct InMemoryStateStore {
    entries: RwLock<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryStateStore {
    /// Create a store on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a store on an explicit clock (tests share a `ManualClock`
    /// with the component under test).
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

fn wrong_type(key: &str, value: &Value) -> StoreError {
    StoreError::Command(format!(
        "WRONGTYPE operation against {} key {key}",
        value.type_name()
    ))
}

/// Look up a key, removing it first if its TTL has lapsed.
fn live<'a>(
    entries: &'a mut HashMap<String, Entry>,
    now: DateTime<Utc>,
    key: &str,
) -> Option<&'a mut Entry> {
    let expired = entries
        .get(key)
        .and_then(|e| e.expires_at)
        .is_some_and(|at| at <= now);
    if expired {
        entries.remove(key);
        return None;
    }
    entries.get_mut(key)
}

/// Map an inclusive Redis-style rank range (negative = from the end) onto
/// `[start, stop]` indices, or `None` if the range selects nothing.
fn normalize_range(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }
    let len = len as isize;
    let mut start = if start < 0 { len + start } else { start };
    let mut stop = if stop < 0 { len + stop } else { stop };
    if start < 0 {
        start = 0;
    }
    if stop >= len {
        stop = len - 1;
    }
    if start > stop || start >= len || stop < 0 {
        return None;
    }
    Some((start as usize, stop as usize))
}

/// Glob matching with `*` as the only metacharacter.
fn glob_match(pattern: &str, text: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == text;
    }
    let parts: Vec<&str> = pattern.split('*').collect();

    let first = parts[0];
    let last = parts[parts.len() - 1];
    if !text.starts_with(first) {
        return false;
    }
    let mut rest = &text[first.len()..];
    if rest.len() < last.len() || !rest.ends_with(last) {
        return false;
    }
    rest = &rest[..rest.len() - last.len()];

    for part in &parts[1..parts.len() - 1] {
        if part.is_empty() {
            continue;
        }
        match rest.find(part) {
            Some(i) => rest = &rest[i + part.len()..],
            None => return false,
        }
    }
    true
}

impl InMemoryStateStore {
    /// Members of a sorted set ordered by `(score, member)`, Redis-style.
    fn sorted_members(set: &HashMap<String, f64>) -> Vec<(String, f64)> {
        let mut members: Vec<(String, f64)> = set.iter().map(|(m, s)| (m.clone(), *s)).collect();
        members.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        members
    }

    fn with_zset<T>(
        &self,
        key: &str,
        f: impl FnOnce(Option<&mut HashMap<String, f64>>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut entries = self.entries.write().unwrap();
        match live(&mut entries, self.clock.now(), key) {
            None => f(None),
            Some(entry) => match &mut entry.value {
                Value::SortedSet(set) => f(Some(set)),
                other => Err(wrong_type(key, other)),
            },
        }
    }

    fn with_hash<T>(
        &self,
        key: &str,
        f: impl FnOnce(Option<&mut HashMap<String, String>>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut entries = self.entries.write().unwrap();
        match live(&mut entries, self.clock.now(), key) {
            None => f(None),
            Some(entry) => match &mut entry.value {
                Value::Hash(hash) => f(Some(hash)),
                other => Err(wrong_type(key, other)),
            },
        }
    }
}

impl StateStore for InMemoryStateStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut entries = self.entries.write().unwrap();
        match live(&mut entries, self.clock.now(), key) {
            None => Ok(None),
            Some(entry) => match &entry.value {
                Value::String(s) => Ok(Some(s.clone())),
                other => Err(wrong_type(key, other)),
            },
        }
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let now = self.clock.now();
        let expires_at = ttl.map(|d| now + chrono::Duration::from_std(d).unwrap_or_default());
        let mut entries = self.entries.write().unwrap();
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::String(value.to_string()),
                expires_at,
            },
        );
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.write().unwrap();
        let existed = live(&mut entries, self.clock.now(), key).is_some();
        entries.remove(key);
        Ok(existed)
    }

    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.write().unwrap();
        Ok(live(&mut entries, self.clock.now(), key).is_some())
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut entries = self.entries.write().unwrap();
        match live(&mut entries, now, key) {
            None => Ok(false),
            Some(entry) => {
                entry.expires_at = Some(now + chrono::Duration::from_std(ttl).unwrap_or_default());
                Ok(true)
            }
        }
    }

    fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let now = self.clock.now();
        let mut entries = self.entries.write().unwrap();
        Ok(live(&mut entries, now, key)
            .and_then(|e| e.expires_at)
            .and_then(|at| (at - now).to_std().ok()))
    }

    fn incr(&self, key: &str, by: i64) -> Result<i64, StoreError> {
        let now = self.clock.now();
        let mut entries = self.entries.write().unwrap();
        if live(&mut entries, now, key).is_none() {
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::String(by.to_string()),
                    expires_at: None,
                },
            );
            return Ok(by);
        }
        let entry = entries.get_mut(key).unwrap();
        match &mut entry.value {
            Value::String(s) => {
                let current: i64 = s
                    .parse()
                    .map_err(|_| StoreError::Command(format!("value at {key} is not an integer")))?;
                let next = current + by;
                *s = next.to_string();
                Ok(next)
            }
            other => Err(wrong_type(key, other)),
        }
    }

    fn decr(&self, key: &str, by: i64) -> Result<i64, StoreError> {
        self.incr(key, -by)
    }

    fn hset(&self, key: &str, field: &str, value: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.write().unwrap();
        if live(&mut entries, self.clock.now(), key).is_none() {
            let mut hash = HashMap::new();
            hash.insert(field.to_string(), value.to_string());
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Hash(hash),
                    expires_at: None,
                },
            );
            return Ok(true);
        }
        let entry = entries.get_mut(key).unwrap();
        match &mut entry.value {
            Value::Hash(hash) => Ok(hash.insert(field.to_string(), value.to_string()).is_none()),
            other => Err(wrong_type(key, other)),
        }
    }

    fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        self.with_hash(key, |hash| {
            Ok(hash.and_then(|h| h.get(field).cloned()))
        })
    }

    fn hget_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        self.with_hash(key, |hash| Ok(hash.cloned().unwrap_or_default()))
    }

    fn hdel(&self, key: &str, field: &str) -> Result<bool, StoreError> {
        self.with_hash(key, |hash| {
            Ok(hash.is_some_and(|h| h.remove(field).is_some()))
        })
    }

    fn hlen(&self, key: &str) -> Result<u64, StoreError> {
        self.with_hash(key, |hash| Ok(hash.map(|h| h.len() as u64).unwrap_or(0)))
    }

    fn zadd(&self, key: &str, member: &str, score: f64) -> Result<bool, StoreError> {
        let mut entries = self.entries.write().unwrap();
        if live(&mut entries, self.clock.now(), key).is_none() {
            let mut set = HashMap::new();
            set.insert(member.to_string(), score);
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::SortedSet(set),
                    expires_at: None,
                },
            );
            return Ok(true);
        }
        let entry = entries.get_mut(key).unwrap();
        match &mut entry.value {
            Value::SortedSet(set) => Ok(set.insert(member.to_string(), score).is_none()),
            other => Err(wrong_type(key, other)),
        }
    }

    fn zrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, StoreError> {
        self.with_zset(key, |set| {
            let Some(set) = set else { return Ok(vec![]) };
            let members = Self::sorted_members(set);
            Ok(match normalize_range(members.len(), start, stop) {
                Some((a, b)) => members[a..=b].iter().map(|(m, _)| m.clone()).collect(),
                None => vec![],
            })
        })
    }

    fn zrevrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, StoreError> {
        self.with_zset(key, |set| {
            let Some(set) = set else { return Ok(vec![]) };
            let mut members = Self::sorted_members(set);
            members.reverse();
            Ok(match normalize_range(members.len(), start, stop) {
                Some((a, b)) => members[a..=b].iter().map(|(m, _)| m.clone()).collect(),
                None => vec![],
            })
        })
    }

    fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<Vec<(String, f64)>, StoreError> {
        self.with_zset(key, |set| {
            let Some(set) = set else { return Ok(vec![]) };
            Ok(Self::sorted_members(set)
                .into_iter()
                .filter(|(_, s)| *s >= min && *s <= max)
                .collect())
        })
    }

    fn zcount(&self, key: &str, min: f64, max: f64) -> Result<u64, StoreError> {
        self.with_zset(key, |set| {
            let Some(set) = set else { return Ok(0) };
            Ok(set.values().filter(|s| **s >= min && **s <= max).count() as u64)
        })
    }

    fn zcard(&self, key: &str) -> Result<u64, StoreError> {
        self.with_zset(key, |set| Ok(set.map(|s| s.len() as u64).unwrap_or(0)))
    }

    fn zrem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        self.with_zset(key, |set| {
            Ok(set.is_some_and(|s| s.remove(member).is_some()))
        })
    }

    fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> Result<u64, StoreError> {
        self.with_zset(key, |set| {
            let Some(set) = set else { return Ok(0) };
            let doomed: Vec<String> = set
                .iter()
                .filter(|(_, s)| **s >= min && **s <= max)
                .map(|(m, _)| m.clone())
                .collect();
            for member in &doomed {
                set.remove(member);
            }
            Ok(doomed.len() as u64)
        })
    }

    fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let now = self.clock.now();
        let mut entries = self.entries.write().unwrap();
        entries.retain(|_, e| e.expires_at.is_none_or(|at| at > now));
        let mut keys: Vec<String> = entries
            .keys()
            .filter(|k| glob_match(pattern, k))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn delete_pattern(&self, pattern: &str) -> Result<u64, StoreError> {
        let now = self.clock.now();
        let mut entries = self.entries.write().unwrap();
        entries.retain(|_, e| e.expires_at.is_none_or(|at| at > now));
        let before = entries.len();
        entries.retain(|k, _| !glob_match(pattern, k));
        Ok((before - entries.len()) as u64)
    }
}
