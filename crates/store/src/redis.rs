//! Redis-backed state store.
//!
//! One `redis::Client` per store, one connection per operation, every
//! operation a raw command invocation. Scores travel as `f64` epoch seconds;
//! open score bounds map to `-inf`/`+inf`. `scan_keys` uses cursored `SCAN`
//! (never `KEYS`) so large keyspaces don't block the server.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::r#trait::{StateStore, StoreError};

#[derive(Debug, Clone)]
pub struct RedisStateStore {
    client: Arc<redis::Client>,
}

impl RedisStateStore {
    /// Connect to a Redis URL (e.g. `redis://localhost:6379`).
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self {
            client: Arc::new(client),
        })
    }

    /// Wrap an existing client (shared connection settings).
    pub fn from_client(client: Arc<redis::Client>) -> Self {
        Self { client }
    }

    fn conn(&self) -> Result<redis::Connection, StoreError> {
        self.client
            .get_connection()
            .map_err(|e| StoreError::Connection(e.to_string()))
    }
}

fn command_err(op: &str, e: redis::RedisError) -> StoreError {
    StoreError::Command(format!("{op} failed: {e}"))
}

/// Render a score bound the way Redis range commands expect it.
fn score_arg(score: f64) -> String {
    if score == f64::INFINITY {
        "+inf".to_string()
    } else if score == f64::NEG_INFINITY {
        "-inf".to_string()
    } else {
        score.to_string()
    }
}

impl StateStore for RedisStateStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn()?;
        redis::cmd("GET")
            .arg(key)
            .query(&mut conn)
            .map_err(|e| command_err("GET", e))
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl.as_millis() as u64);
        }
        cmd.query(&mut conn).map_err(|e| command_err("SET", e))
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn()?;
        let removed: i64 = redis::cmd("DEL")
            .arg(key)
            .query(&mut conn)
            .map_err(|e| command_err("DEL", e))?;
        Ok(removed > 0)
    }

    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn()?;
        let n: i64 = redis::cmd("EXISTS")
            .arg(key)
            .query(&mut conn)
            .map_err(|e| command_err("EXISTS", e))?;
        Ok(n > 0)
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn()?;
        let set: i64 = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ttl.as_millis() as u64)
            .query(&mut conn)
            .map_err(|e| command_err("PEXPIRE", e))?;
        Ok(set > 0)
    }

    fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let mut conn = self.conn()?;
        let millis: i64 = redis::cmd("PTTL")
            .arg(key)
            .query(&mut conn)
            .map_err(|e| command_err("PTTL", e))?;
        // -2 = missing key, -1 = no expiry
        if millis < 0 {
            return Ok(None);
        }
        Ok(Some(Duration::from_millis(millis as u64)))
    }

    fn incr(&self, key: &str, by: i64) -> Result<i64, StoreError> {
        let mut conn = self.conn()?;
        redis::cmd("INCRBY")
            .arg(key)
            .arg(by)
            .query(&mut conn)
            .map_err(|e| command_err("INCRBY", e))
    }

    fn decr(&self, key: &str, by: i64) -> Result<i64, StoreError> {
        let mut conn = self.conn()?;
        redis::cmd("DECRBY")
            .arg(key)
            .arg(by)
            .query(&mut conn)
            .map_err(|e| command_err("DECRBY", e))
    }

    fn hset(&self, key: &str, field: &str, value: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn()?;
        let added: i64 = redis::cmd("HSET")
            .arg(key)
            .arg(field)
            .arg(value)
            .query(&mut conn)
            .map_err(|e| command_err("HSET", e))?;
        Ok(added > 0)
    }

    fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn()?;
        redis::cmd("HGET")
            .arg(key)
            .arg(field)
            .query(&mut conn)
            .map_err(|e| command_err("HGET", e))
    }

    fn hget_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let mut conn = self.conn()?;
        redis::cmd("HGETALL")
            .arg(key)
            .query(&mut conn)
            .map_err(|e| command_err("HGETALL", e))
    }

    fn hdel(&self, key: &str, field: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn()?;
        let removed: i64 = redis::cmd("HDEL")
            .arg(key)
            .arg(field)
            .query(&mut conn)
            .map_err(|e| command_err("HDEL", e))?;
        Ok(removed > 0)
    }

    fn hlen(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn()?;
        redis::cmd("HLEN")
            .arg(key)
            .query(&mut conn)
            .map_err(|e| command_err("HLEN", e))
    }

    fn zadd(&self, key: &str, member: &str, score: f64) -> Result<bool, StoreError> {
        let mut conn = self.conn()?;
        let added: i64 = redis::cmd("ZADD")
            .arg(key)
            .arg(score)
            .arg(member)
            .query(&mut conn)
            .map_err(|e| command_err("ZADD", e))?;
        Ok(added > 0)
    }

    fn zrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn()?;
        redis::cmd("ZRANGE")
            .arg(key)
            .arg(start as i64)
            .arg(stop as i64)
            .query(&mut conn)
            .map_err(|e| command_err("ZRANGE", e))
    }

    fn zrevrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn()?;
        redis::cmd("ZREVRANGE")
            .arg(key)
            .arg(start as i64)
            .arg(stop as i64)
            .query(&mut conn)
            .map_err(|e| command_err("ZREVRANGE", e))
    }

    fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<Vec<(String, f64)>, StoreError> {
        let mut conn = self.conn()?;
        redis::cmd("ZRANGEBYSCORE")
            .arg(key)
            .arg(score_arg(min))
            .arg(score_arg(max))
            .arg("WITHSCORES")
            .query(&mut conn)
            .map_err(|e| command_err("ZRANGEBYSCORE", e))
    }

    fn zcount(&self, key: &str, min: f64, max: f64) -> Result<u64, StoreError> {
        let mut conn = self.conn()?;
        redis::cmd("ZCOUNT")
            .arg(key)
            .arg(score_arg(min))
            .arg(score_arg(max))
            .query(&mut conn)
            .map_err(|e| command_err("ZCOUNT", e))
    }

    fn zcard(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn()?;
        redis::cmd("ZCARD")
            .arg(key)
            .query(&mut conn)
            .map_err(|e| command_err("ZCARD", e))
    }

    fn zrem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn()?;
        let removed: i64 = redis::cmd("ZREM")
            .arg(key)
            .arg(member)
            .query(&mut conn)
            .map_err(|e| command_err("ZREM", e))?;
        Ok(removed > 0)
    }

    fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> Result<u64, StoreError> {
        let mut conn = self.conn()?;
        redis::cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg(score_arg(min))
            .arg(score_arg(max))
            .query(&mut conn)
            .map_err(|e| command_err("ZREMRANGEBYSCORE", e))
    }

    fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn()?;
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query(&mut conn)
                .map_err(|e| command_err("SCAN", e))?;
            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(keys)
    }

    fn delete_pattern(&self, pattern: &str) -> Result<u64, StoreError> {
        let keys = self.scan_keys(pattern)?;
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn()?;
        let removed: i64 = redis::cmd("DEL")
            .arg(&keys[..])
            .query(&mut conn)
            .map_err(|e| command_err("DEL", e))?;
        Ok(removed as u64)
    }
}
