use crate::Result;
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Key/value and sorted-set operations backing every height, pointer and
/// cache entry. Scores are chain heights.
#[async_trait]
pub trait IndexStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<u64>;

    async fn exists(&self, key: &str) -> Result<bool>;

    async fn expire(&self, key: &str, seconds: u64) -> Result<bool>;

    /// Glob lookup; `*` matches any run of characters.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()>;

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>>;

    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<u64>;

    async fn zrem(&self, key: &str, member: &str) -> Result<u64>;

    async fn zremrangebyscore(&self, key: &str, min: i64, max: i64) -> Result<u64>;

    async fn zrangebyscore(&self, key: &str, min: i64, max: i64) -> Result<Vec<String>>;

    async fn zrangebyscore_withscores(
        &self,
        key: &str,
        min: i64,
        max: i64,
    ) -> Result<Vec<(String, i64)>>;

    async fn zrevrange_withscores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<(String, i64)>>;
}

pub struct RedisIndexStore {
    conn: ConnectionManager,
}

impl RedisIndexStore {
    pub async fn new(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        tracing::info!("Connected to redis index store at {}", url);
        Ok(Self { conn })
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

fn with_int_scores(rows: Vec<(String, f64)>) -> Vec<(String, i64)> {
    rows.into_iter()
        .map(|(member, score)| (member, score as i64))
        .collect()
}

#[async_trait]
impl IndexStore for RedisIndexStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.conn().get(key).await?)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let _: () = self.conn().set(key, value).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<u64> {
        Ok(self.conn().del(key).await?)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.conn().exists(key).await?)
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<bool> {
        let mut conn = self.conn();
        let applied: bool = redis::cmd("EXPIRE")
            .arg(key)
            .arg(seconds)
            .query_async(&mut conn)
            .await?;
        Ok(applied)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        Ok(self.conn().keys(pattern).await?)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let _: () = self.conn().hset(key, field, value).await?;
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        Ok(self.conn().hgetall(key).await?)
    }

    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<u64> {
        Ok(self.conn().zadd(key, member, score).await?)
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<u64> {
        Ok(self.conn().zrem(key, member).await?)
    }

    async fn zremrangebyscore(&self, key: &str, min: i64, max: i64) -> Result<u64> {
        Ok(self.conn().zrembyscore(key, min, max).await?)
    }

    async fn zrangebyscore(&self, key: &str, min: i64, max: i64) -> Result<Vec<String>> {
        Ok(self.conn().zrangebyscore(key, min, max).await?)
    }

    async fn zrangebyscore_withscores(
        &self,
        key: &str,
        min: i64,
        max: i64,
    ) -> Result<Vec<(String, i64)>> {
        let rows: Vec<(String, f64)> = self
            .conn()
            .zrangebyscore_withscores(key, min, max)
            .await?;
        Ok(with_int_scores(rows))
    }

    async fn zrevrange_withscores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<(String, i64)>> {
        let rows: Vec<(String, f64)> = self.conn().zrevrange_withscores(key, start, stop).await?;
        Ok(with_int_scores(rows))
    }
}

#[derive(Default)]
struct MemoryState {
    strings: HashMap<String, String>,
    hashes: HashMap<String, HashMap<String, String>>,
    // Kept ordered by (score, member), matching redis iteration order.
    zsets: HashMap<String, Vec<(String, i64)>>,
    expiries: HashMap<String, Instant>,
}

impl MemoryState {
    fn purge_expired(&mut self) {
        let now = Instant::now();
        let expired: Vec<String> = self
            .expiries
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, _)| key.clone())
            .collect();

        for key in expired {
            self.remove(&key);
        }
    }

    fn remove(&mut self, key: &str) -> bool {
        self.expiries.remove(key);
        let removed_string = self.strings.remove(key).is_some();
        let removed_hash = self.hashes.remove(key).is_some();
        let removed_zset = self.zsets.remove(key).is_some();
        removed_string || removed_hash || removed_zset
    }

    fn contains(&self, key: &str) -> bool {
        self.strings.contains_key(key)
            || self.hashes.contains_key(key)
            || self.zsets.contains_key(key)
    }

    fn drop_empty_zset(&mut self, key: &str) {
        if self.zsets.get(key).is_some_and(|members| members.is_empty()) {
            self.zsets.remove(key);
        }
    }
}

/// Process-local index store with the same ordering and expiry semantics as
/// the redis backend. Used by tests and single-process deployments.
#[derive(Default)]
pub struct MemoryIndexStore {
    state: Mutex<MemoryState>,
}

impl MemoryIndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, apply: impl FnOnce(&mut MemoryState) -> T) -> T {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.purge_expired();
        apply(&mut state)
    }
}

#[async_trait]
impl IndexStore for MemoryIndexStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.with_state(|state| state.strings.get(key).cloned()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.with_state(|state| {
            state.remove(key);
            state.strings.insert(key.to_string(), value.to_string());
        });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<u64> {
        Ok(self.with_state(|state| u64::from(state.remove(key))))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.with_state(|state| state.contains(key)))
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<bool> {
        Ok(self.with_state(|state| {
            if !state.contains(key) {
                return false;
            }
            state.expiries.insert(
                key.to_string(),
                Instant::now() + Duration::from_secs(seconds),
            );
            true
        }))
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        Ok(self.with_state(|state| {
            let mut keys: Vec<String> = state
                .strings
                .keys()
                .chain(state.hashes.keys())
                .chain(state.zsets.keys())
                .filter(|key| glob_match(pattern, key))
                .cloned()
                .collect();
            keys.sort();
            keys
        }))
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.with_state(|state| {
            state
                .hashes
                .entry(key.to_string())
                .or_default()
                .insert(field.to_string(), value.to_string());
        });
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        Ok(self.with_state(|state| state.hashes.get(key).cloned().unwrap_or_default()))
    }

    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<u64> {
        Ok(self.with_state(|state| {
            let members = state.zsets.entry(key.to_string()).or_default();
            let existed = match members.iter().position(|(m, _)| m == member) {
                Some(index) => {
                    members.remove(index);
                    true
                }
                None => false,
            };

            let position = members
                .iter()
                .position(|(m, s)| (*s, m.as_str()) > (score, member))
                .unwrap_or(members.len());
            members.insert(position, (member.to_string(), score));

            if existed { 0 } else { 1 }
        }))
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<u64> {
        Ok(self.with_state(|state| {
            let removed = match state.zsets.get_mut(key) {
                Some(members) => {
                    let before = members.len();
                    members.retain(|(m, _)| m != member);
                    (before - members.len()) as u64
                }
                None => 0,
            };
            state.drop_empty_zset(key);
            removed
        }))
    }

    async fn zremrangebyscore(&self, key: &str, min: i64, max: i64) -> Result<u64> {
        Ok(self.with_state(|state| {
            let removed = match state.zsets.get_mut(key) {
                Some(members) => {
                    let before = members.len();
                    members.retain(|(_, score)| *score < min || *score > max);
                    (before - members.len()) as u64
                }
                None => 0,
            };
            state.drop_empty_zset(key);
            removed
        }))
    }

    async fn zrangebyscore(&self, key: &str, min: i64, max: i64) -> Result<Vec<String>> {
        let rows = self.zrangebyscore_withscores(key, min, max).await?;
        Ok(rows.into_iter().map(|(member, _)| member).collect())
    }

    async fn zrangebyscore_withscores(
        &self,
        key: &str,
        min: i64,
        max: i64,
    ) -> Result<Vec<(String, i64)>> {
        Ok(self.with_state(|state| {
            state
                .zsets
                .get(key)
                .map(|members| {
                    members
                        .iter()
                        .filter(|(_, score)| *score >= min && *score <= max)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        }))
    }

    async fn zrevrange_withscores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<(String, i64)>> {
        Ok(self.with_state(|state| {
            let Some(members) = state.zsets.get(key) else {
                return Vec::new();
            };
            let len = members.len() as isize;
            let start = if start < 0 { (len + start).max(0) } else { start };
            let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
            if start > stop || start >= len {
                return Vec::new();
            }

            members
                .iter()
                .rev()
                .skip(start as usize)
                .take((stop - start + 1) as usize)
                .cloned()
                .collect()
        }))
    }
}

fn glob_match(pattern: &str, candidate: &str) -> bool {
    let Some((head, rest)) = pattern.split_once('*') else {
        return pattern == candidate;
    };
    let Some(remainder) = candidate.strip_prefix(head) else {
        return false;
    };
    if rest.is_empty() {
        return true;
    }
    (0..=remainder.len())
        .filter(|offset| remainder.is_char_boundary(*offset))
        .any(|offset| glob_match(rest, &remainder[offset..]))
}
