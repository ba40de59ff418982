//! Key-Value Store
//!
//! The small slice of Redis that the admission pipeline needs: sorted sets for
//! sliding windows, float counters for cost totals, capped lists for recent
//! context and usage logs, hashes for pass/fail counters.
//!
//! `RedisStore` is the production backend. `InMemoryKv` implements the same
//! semantics in-process and is used for tests and when Redis is down at
//! startup (the bot then runs with per-process state).

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Errors from the key-value layer
#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("connection timed out after {0:?}")]
    Timeout(Duration),

    #[error("wrong value type at key {0}")]
    WrongType(String),

    #[error("value at {key} is not a number: {value}")]
    NotANumber { key: String, value: String },

    #[error("store offline")]
    Offline,
}

pub type KvResult<T> = std::result::Result<T, KvError>;

/// Async key-value operations used by the services
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Backend name for stats output
    fn backend(&self) -> &'static str;

    async fn ping(&self) -> KvResult<()>;

    async fn get(&self, key: &str) -> KvResult<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> KvResult<()>;
    async fn mget(&self, keys: &[String]) -> KvResult<Vec<Option<String>>>;
    async fn incr_by_float(&self, key: &str, delta: f64) -> KvResult<f64>;

    async fn zadd(&self, key: &str, member: &str, score: f64) -> KvResult<()>;
    async fn zrem(&self, key: &str, member: &str) -> KvResult<bool>;
    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> KvResult<u64>;
    async fn zrem_range_by_rank(&self, key: &str, start: isize, stop: isize) -> KvResult<u64>;
    async fn zcard(&self, key: &str) -> KvResult<u64>;
    async fn zrange_with_scores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> KvResult<Vec<(String, f64)>>;

    /// Drop members scored at or below `max_score` and count what is left.
    async fn zprune_count(&self, key: &str, max_score: f64) -> KvResult<u64> {
        self.zrem_range_by_score(key, f64::NEG_INFINITY, max_score).await?;
        self.zcard(key).await
    }

    async fn lpush(&self, key: &str, value: &str) -> KvResult<u64>;
    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> KvResult<()>;
    async fn lrange(&self, key: &str, start: isize, stop: isize) -> KvResult<Vec<String>>;

    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> KvResult<i64>;
    async fn hget_all(&self, key: &str) -> KvResult<HashMap<String, String>>;

    async fn expire(&self, key: &str, secs: u64) -> KvResult<()>;
    async fn del(&self, keys: &[String]) -> KvResult<u64>;
    /// Keys matching a glob pattern (`*` wildcard)
    async fn keys(&self, pattern: &str) -> KvResult<Vec<String>>;
}

/// Shared handle used across services
pub type SharedKv = Arc<dyn KvStore>;

// ============ Redis ============

/// Redis backend over a reconnecting connection manager
#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
}

impl RedisStore {
    /// Connect with a bounded wait
    pub async fn connect(url: &str, timeout: Duration) -> KvResult<Self> {
        let client = redis::Client::open(url)?;
        let manager = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| KvError::Timeout(timeout))??;
        info!("Connected to Redis at {}", crate::config::redact_credentials(url));
        Ok(Self { manager })
    }

    fn con(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

#[async_trait]
impl KvStore for RedisStore {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn ping(&self) -> KvResult<()> {
        let mut con = self.con();
        let _: String = redis::cmd("PING").query_async(&mut con).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        let mut con = self.con();
        let value: Option<String> = con.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> KvResult<()> {
        let mut con = self.con();
        let _: () = con.set(key, value).await?;
        Ok(())
    }

    async fn mget(&self, keys: &[String]) -> KvResult<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut con = self.con();
        let values: Vec<Option<String>> = redis::cmd("MGET").arg(keys).query_async(&mut con).await?;
        Ok(values)
    }

    async fn incr_by_float(&self, key: &str, delta: f64) -> KvResult<f64> {
        let mut con = self.con();
        let value: f64 = redis::cmd("INCRBYFLOAT")
            .arg(key)
            .arg(delta)
            .query_async(&mut con)
            .await?;
        Ok(value)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> KvResult<()> {
        let mut con = self.con();
        let _: i64 = con.zadd(key, member, score).await?;
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> KvResult<bool> {
        let mut con = self.con();
        let removed: u64 = con.zrem(key, member).await?;
        Ok(removed > 0)
    }

    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> KvResult<u64> {
        let mut con = self.con();
        let removed: u64 = redis::cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg(score_arg(min))
            .arg(score_arg(max))
            .query_async(&mut con)
            .await?;
        Ok(removed)
    }

    async fn zrem_range_by_rank(&self, key: &str, start: isize, stop: isize) -> KvResult<u64> {
        let mut con = self.con();
        let removed: u64 = con.zremrangebyrank(key, start, stop).await?;
        Ok(removed)
    }

    async fn zcard(&self, key: &str) -> KvResult<u64> {
        let mut con = self.con();
        let count: u64 = con.zcard(key).await?;
        Ok(count)
    }

    async fn zrange_with_scores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> KvResult<Vec<(String, f64)>> {
        let mut con = self.con();
        let entries: Vec<(String, f64)> = con.zrange_withscores(key, start, stop).await?;
        Ok(entries)
    }

    async fn zprune_count(&self, key: &str, max_score: f64) -> KvResult<u64> {
        let mut con = self.con();
        let (count,): (u64,) = redis::pipe()
            .atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(score_arg(max_score))
            .ignore()
            .cmd("ZCARD")
            .arg(key)
            .query_async(&mut con)
            .await?;
        Ok(count)
    }

    async fn lpush(&self, key: &str, value: &str) -> KvResult<u64> {
        let mut con = self.con();
        let len: u64 = con.lpush(key, value).await?;
        Ok(len)
    }

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> KvResult<()> {
        let mut con = self.con();
        let _: () = con.ltrim(key, start, stop).await?;
        Ok(())
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> KvResult<Vec<String>> {
        let mut con = self.con();
        let values: Vec<String> = con.lrange(key, start, stop).await?;
        Ok(values)
    }

    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> KvResult<i64> {
        let mut con = self.con();
        let value: i64 = con.hincr(key, field, delta).await?;
        Ok(value)
    }

    async fn hget_all(&self, key: &str) -> KvResult<HashMap<String, String>> {
        let mut con = self.con();
        let map: HashMap<String, String> = con.hgetall(key).await?;
        Ok(map)
    }

    async fn expire(&self, key: &str, secs: u64) -> KvResult<()> {
        let mut con = self.con();
        let _: bool = con.expire(key, secs as i64).await?;
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> KvResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut con = self.con();
        let removed: u64 = con.del(keys).await?;
        Ok(removed)
    }

    async fn keys(&self, pattern: &str) -> KvResult<Vec<String>> {
        let mut con = self.con();
        let keys: Vec<String> = con.keys(pattern).await?;
        Ok(keys)
    }
}

fn score_arg(score: f64) -> String {
    if score == f64::NEG_INFINITY {
        "-inf".to_string()
    } else if score == f64::INFINITY {
        "+inf".to_string()
    } else {
        score.to_string()
    }
}

// ============ In-process ============

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    List(VecDeque<String>),
    /// Kept sorted by (score, member)
    ZSet(Vec<(String, f64)>),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value) -> Self {
        Self { value, expires_at: None }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|t| t <= now).unwrap_or(false)
    }
}

/// In-process store with Redis semantics for the operations above
#[derive(Default)]
pub struct InMemoryKv {
    entries: Mutex<HashMap<String, Entry>>,
    offline: AtomicBool,
}

impl InMemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedKv {
        Arc::new(Self::new())
    }

    /// Make every operation fail with `KvError::Offline` (outage drills)
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Run `f` against a live (non-expired) entry map.
    fn with_entries<T>(
        &self,
        f: impl FnOnce(&mut HashMap<String, Entry>) -> KvResult<T>,
    ) -> KvResult<T> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(KvError::Offline);
        }
        let mut entries = self.entries.lock();
        let now = Instant::now();
        entries.retain(|_, e| !e.is_expired(now));
        f(&mut entries)
    }
}

/// Resolve Redis-style inclusive indices (negative counts from the end).
fn resolve_range(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len || stop < 0 {
        return None;
    }
    Some((start as usize, stop as usize))
}

/// Glob matching with `*` (any run) and `?` (one char)
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

#[async_trait]
impl KvStore for InMemoryKv {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> KvResult<()> {
        self.with_entries(|_| Ok(()))
    }

    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        self.with_entries(|entries| match entries.get(key).map(|e| &e.value) {
            None => Ok(None),
            Some(Value::Str(s)) => Ok(Some(s.clone())),
            Some(_) => Err(KvError::WrongType(key.to_string())),
        })
    }

    async fn set(&self, key: &str, value: &str) -> KvResult<()> {
        self.with_entries(|entries| {
            entries.insert(key.to_string(), Entry::new(Value::Str(value.to_string())));
            Ok(())
        })
    }

    async fn mget(&self, keys: &[String]) -> KvResult<Vec<Option<String>>> {
        self.with_entries(|entries| {
            Ok(keys
                .iter()
                .map(|k| match entries.get(k).map(|e| &e.value) {
                    Some(Value::Str(s)) => Some(s.clone()),
                    _ => None,
                })
                .collect())
        })
    }

    async fn incr_by_float(&self, key: &str, delta: f64) -> KvResult<f64> {
        self.with_entries(|entries| {
            let entry = entries
                .entry(key.to_string())
                .or_insert_with(|| Entry::new(Value::Str("0".to_string())));
            match &mut entry.value {
                Value::Str(s) => {
                    let current: f64 = s.parse().map_err(|_| KvError::NotANumber {
                        key: key.to_string(),
                        value: s.clone(),
                    })?;
                    let next = current + delta;
                    *s = next.to_string();
                    Ok(next)
                }
                _ => Err(KvError::WrongType(key.to_string())),
            }
        })
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> KvResult<()> {
        self.with_entries(|entries| {
            let entry = entries
                .entry(key.to_string())
                .or_insert_with(|| Entry::new(Value::ZSet(Vec::new())));
            match &mut entry.value {
                Value::ZSet(set) => {
                    set.retain(|(m, _)| m != member);
                    set.push((member.to_string(), score));
                    set.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
                    Ok(())
                }
                _ => Err(KvError::WrongType(key.to_string())),
            }
        })
    }

    async fn zrem(&self, key: &str, member: &str) -> KvResult<bool> {
        self.with_entries(|entries| match entries.get_mut(key).map(|e| &mut e.value) {
            None => Ok(false),
            Some(Value::ZSet(set)) => {
                let before = set.len();
                set.retain(|(m, _)| m != member);
                Ok(set.len() < before)
            }
            Some(_) => Err(KvError::WrongType(key.to_string())),
        })
    }

    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> KvResult<u64> {
        self.with_entries(|entries| match entries.get_mut(key).map(|e| &mut e.value) {
            None => Ok(0),
            Some(Value::ZSet(set)) => {
                let before = set.len();
                set.retain(|(_, s)| *s < min || *s > max);
                Ok((before - set.len()) as u64)
            }
            Some(_) => Err(KvError::WrongType(key.to_string())),
        })
    }

    async fn zrem_range_by_rank(&self, key: &str, start: isize, stop: isize) -> KvResult<u64> {
        self.with_entries(|entries| match entries.get_mut(key).map(|e| &mut e.value) {
            None => Ok(0),
            Some(Value::ZSet(set)) => match resolve_range(set.len(), start, stop) {
                Some((s, e)) => {
                    set.drain(s..=e);
                    Ok((e - s + 1) as u64)
                }
                None => Ok(0),
            },
            Some(_) => Err(KvError::WrongType(key.to_string())),
        })
    }

    async fn zcard(&self, key: &str) -> KvResult<u64> {
        self.with_entries(|entries| match entries.get(key).map(|e| &e.value) {
            None => Ok(0),
            Some(Value::ZSet(set)) => Ok(set.len() as u64),
            Some(_) => Err(KvError::WrongType(key.to_string())),
        })
    }

    async fn zrange_with_scores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> KvResult<Vec<(String, f64)>> {
        self.with_entries(|entries| match entries.get(key).map(|e| &e.value) {
            None => Ok(Vec::new()),
            Some(Value::ZSet(set)) => Ok(resolve_range(set.len(), start, stop)
                .map(|(s, e)| set[s..=e].to_vec())
                .unwrap_or_default()),
            Some(_) => Err(KvError::WrongType(key.to_string())),
        })
    }

    async fn lpush(&self, key: &str, value: &str) -> KvResult<u64> {
        self.with_entries(|entries| {
            let entry = entries
                .entry(key.to_string())
                .or_insert_with(|| Entry::new(Value::List(VecDeque::new())));
            match &mut entry.value {
                Value::List(list) => {
                    list.push_front(value.to_string());
                    Ok(list.len() as u64)
                }
                _ => Err(KvError::WrongType(key.to_string())),
            }
        })
    }

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> KvResult<()> {
        self.with_entries(|entries| match entries.get_mut(key).map(|e| &mut e.value) {
            None => Ok(()),
            Some(Value::List(list)) => {
                match resolve_range(list.len(), start, stop) {
                    Some((s, e)) => {
                        list.truncate(e + 1);
                        list.drain(..s);
                    }
                    None => list.clear(),
                }
                Ok(())
            }
            Some(_) => Err(KvError::WrongType(key.to_string())),
        })
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> KvResult<Vec<String>> {
        self.with_entries(|entries| match entries.get(key).map(|e| &e.value) {
            None => Ok(Vec::new()),
            Some(Value::List(list)) => Ok(resolve_range(list.len(), start, stop)
                .map(|(s, e)| list.range(s..=e).cloned().collect())
                .unwrap_or_default()),
            Some(_) => Err(KvError::WrongType(key.to_string())),
        })
    }

    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> KvResult<i64> {
        self.with_entries(|entries| {
            let entry = entries
                .entry(key.to_string())
                .or_insert_with(|| Entry::new(Value::Hash(HashMap::new())));
            match &mut entry.value {
                Value::Hash(hash) => {
                    let slot = hash.entry(field.to_string()).or_insert_with(|| "0".to_string());
                    let current: i64 = slot.parse().map_err(|_| KvError::NotANumber {
                        key: key.to_string(),
                        value: slot.clone(),
                    })?;
                    let next = current + delta;
                    *slot = next.to_string();
                    Ok(next)
                }
                _ => Err(KvError::WrongType(key.to_string())),
            }
        })
    }

    async fn hget_all(&self, key: &str) -> KvResult<HashMap<String, String>> {
        self.with_entries(|entries| match entries.get(key).map(|e| &e.value) {
            None => Ok(HashMap::new()),
            Some(Value::Hash(hash)) => Ok(hash.clone()),
            Some(_) => Err(KvError::WrongType(key.to_string())),
        })
    }

    async fn expire(&self, key: &str, secs: u64) -> KvResult<()> {
        self.with_entries(|entries| {
            if secs == 0 {
                entries.remove(key);
            } else if let Some(entry) = entries.get_mut(key) {
                entry.expires_at = Some(Instant::now() + Duration::from_secs(secs));
            }
            Ok(())
        })
    }

    async fn del(&self, keys: &[String]) -> KvResult<u64> {
        self.with_entries(|entries| {
            Ok(keys.iter().filter(|k| entries.remove(k.as_str()).is_some()).count() as u64)
        })
    }

    async fn keys(&self, pattern: &str) -> KvResult<Vec<String>> {
        self.with_entries(|entries| {
            let mut keys: Vec<String> = entries
                .keys()
                .filter(|k| glob_match(pattern, k))
                .cloned()
                .collect();
            keys.sort();
            Ok(keys)
        })
    }
}

/// Connect to Redis, falling back to the in-process store when unreachable
pub async fn connect_or_fallback(url: &str) -> SharedKv {
    match RedisStore::connect(url, Duration::from_secs(3)).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            warn!("Redis unavailable ({}), using in-process store", e);
            InMemoryKv::shared()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_match() {
        assert!(glob_match("rate_limit:*:42", "rate_limit:user:42"));
        assert!(glob_match("cost:user:42:*", "cost:user:42:daily:2024-01-01"));
        assert!(!glob_match("rate_limit:*:42", "rate_limit:user:420"));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("a?c", "abc"));
        assert!(!glob_match("a?c", "ac"));
    }

    #[test]
    fn test_resolve_range() {
        assert_eq!(resolve_range(5, 0, -1), Some((0, 4)));
        assert_eq!(resolve_range(5, -2, -1), Some((3, 4)));
        assert_eq!(resolve_range(5, 0, 100), Some((0, 4)));
        assert_eq!(resolve_range(5, 3, 1), None);
        assert_eq!(resolve_range(0, 0, -1), None);
        assert_eq!(resolve_range(3, 0, -1001), None);
    }

    #[tokio::test]
    async fn test_sorted_set_window() {
        let kv = InMemoryKv::new();
        kv.zadd("z", "a", 10.0).await.unwrap();
        kv.zadd("z", "b", 20.0).await.unwrap();
        kv.zadd("z", "c", 30.0).await.unwrap();

        assert_eq!(kv.zprune_count("z", 15.0).await.unwrap(), 2);
        let first = kv.zrange_with_scores("z", 0, 0).await.unwrap();
        assert_eq!(first, vec![("b".to_string(), 20.0)]);
    }

    #[tokio::test]
    async fn test_zrem_by_rank_keeps_newest() {
        let kv = InMemoryKv::new();
        for i in 0..5 {
            kv.zadd("perf", &format!("m{}", i), i as f64).await.unwrap();
        }
        // Keep the last 3
        kv.zrem_range_by_rank("perf", 0, -4).await.unwrap();
        let left: Vec<String> = kv
            .zrange_with_scores("perf", 0, -1)
            .await
            .unwrap()
            .into_iter()
            .map(|(m, _)| m)
            .collect();
        assert_eq!(left, vec!["m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn test_list_push_trim() {
        let kv = InMemoryKv::new();
        for i in 0..12 {
            kv.lpush("l", &i.to_string()).await.unwrap();
        }
        kv.ltrim("l", 0, 9).await.unwrap();
        let items = kv.lrange("l", 0, -1).await.unwrap();
        assert_eq!(items.len(), 10);
        assert_eq!(items[0], "11");
        assert_eq!(items[9], "2");
    }

    #[tokio::test]
    async fn test_float_counter_and_mget() {
        let kv = InMemoryKv::new();
        kv.incr_by_float("c", 1.5).await.unwrap();
        let total = kv.incr_by_float("c", 2.25).await.unwrap();
        assert!((total - 3.75).abs() < 1e-9);

        let values = kv.mget(&["c".to_string(), "missing".to_string()]).await.unwrap();
        assert_eq!(values[1], None);
        assert_eq!(values[0].as_deref().map(|v| v.parse::<f64>().unwrap()), Some(3.75));
    }

    #[tokio::test]
    async fn test_wrong_type() {
        let kv = InMemoryKv::new();
        kv.lpush("l", "x").await.unwrap();
        assert!(matches!(kv.incr_by_float("l", 1.0).await, Err(KvError::WrongType(_))));
    }

    #[tokio::test]
    async fn test_expire_zero_deletes_and_keys_pattern() {
        let kv = InMemoryKv::new();
        kv.set("rate_limit:user:1", "x").await.unwrap();
        kv.set("rate_limit:voice:1", "x").await.unwrap();
        kv.set("rate_limit:user:2", "x").await.unwrap();

        let keys = kv.keys("rate_limit:*:1").await.unwrap();
        assert_eq!(keys.len(), 2);

        kv.expire("rate_limit:user:2", 0).await.unwrap();
        assert_eq!(kv.get("rate_limit:user:2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_offline_store_errors() {
        let kv = InMemoryKv::new();
        kv.set("k", "v").await.unwrap();
        kv.set_offline(true);
        assert!(matches!(kv.get("k").await, Err(KvError::Offline)));
        assert!(kv.ping().await.is_err());
        kv.set_offline(false);
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_hash_counters() {
        let kv = InMemoryKv::new();
        kv.hincr_by("h", "pass", 1).await.unwrap();
        kv.hincr_by("h", "pass", 1).await.unwrap();
        kv.hincr_by("h", "fail", 1).await.unwrap();
        let all = kv.hget_all("h").await.unwrap();
        assert_eq!(all.get("pass").map(String::as_str), Some("2"));
        assert_eq!(all.get("fail").map(String::as_str), Some("1"));
    }
}
