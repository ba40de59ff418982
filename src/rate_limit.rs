//! Rate Limiting
//!
//! Sliding-window limiter over the key-value store's sorted sets.
//!
//! Each bucket lives at `rate_limit:{type}:{key}`; members are unique per
//! request and scored with the request time in seconds. Store errors fail
//! open: a broken Redis must not take the bot down.

use crate::kv::{KvError, SharedKv};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, warn};

/// Limit buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitType {
    User,
    Global,
    Voice,
    Gpt,
}

impl LimitType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Global => "global",
            Self::Voice => "voice",
            Self::Gpt => "gpt",
        }
    }
}

impl fmt::Display for LimitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requests allowed per window
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Limit {
    pub requests: u32,
    pub window_secs: u64,
}

/// Limits for every bucket
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub user: Limit,
    pub global: Limit,
    pub voice: Limit,
    pub gpt: Limit,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            user: Limit { requests: 10, window_secs: 60 },
            global: Limit { requests: 100, window_secs: 60 },
            voice: Limit { requests: 3, window_secs: 60 },
            gpt: Limit { requests: 5, window_secs: 60 },
        }
    }
}

impl RateLimitConfig {
    /// Defaults with the per-user and global request counts overridden
    pub fn with_limits(per_user: u32, global: u32) -> Self {
        let mut config = Self::default();
        config.user.requests = per_user;
        config.global.requests = global;
        config
    }

    pub fn get(&self, limit_type: LimitType) -> Limit {
        match limit_type {
            LimitType::User => self.user,
            LimitType::Global => self.global,
            LimitType::Voice => self.voice,
            LimitType::Gpt => self.gpt,
        }
    }
}

/// What a chat event costs in rate-limit terms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Message,
    AiCommand,
    Voice,
}

impl Action {
    pub fn limit_type(&self) -> LimitType {
        match self {
            Self::Message => LimitType::User,
            Self::AiCommand => LimitType::Gpt,
            Self::Voice => LimitType::Voice,
        }
    }
}

/// Outcome of an admission check
#[derive(Debug, Clone)]
pub struct RateLimitResult {
    pub allowed: bool,
    /// Bucket that denied the request
    pub limited_by: Option<LimitType>,
    /// Seconds until the denying bucket frees a slot
    pub retry_after_secs: u64,
}

impl RateLimitResult {
    fn allowed() -> Self {
        Self {
            allowed: true,
            limited_by: None,
            retry_after_secs: 0,
        }
    }

    fn denied(limit_type: LimitType, retry_after_secs: u64) -> Self {
        Self {
            allowed: false,
            limited_by: Some(limit_type),
            retry_after_secs,
        }
    }
}

/// Limiter counters for `/stats`
#[derive(Debug, Default)]
pub struct RateLimitStats {
    pub checks: AtomicU64,
    pub denied: AtomicU64,
    pub store_errors: AtomicU64,
}

/// Key used for the shared global bucket
pub const GLOBAL_KEY: &str = "all";

/// Sliding-window rate limiter
pub struct RateLimiter {
    kv: SharedKv,
    config: RateLimitConfig,
    stats: RateLimitStats,
}

fn now_secs() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Outcome of taking one slot from a bucket
enum Slot {
    Taken { bucket: String, member: String },
    Denied,
    /// Store failed; allowed without a slot
    Unchecked,
}

fn bucket_key(limit_type: LimitType, key: &str) -> String {
    format!("rate_limit:{}:{}", limit_type, key)
}

impl RateLimiter {
    pub fn new(kv: SharedKv, config: RateLimitConfig) -> Self {
        Self {
            kv,
            config,
            stats: RateLimitStats::default(),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn stats(&self) -> &RateLimitStats {
        &self.stats
    }

    /// Check and consume one slot. Fails open on store errors.
    pub async fn is_allowed(&self, key: &str, limit_type: LimitType) -> bool {
        !matches!(self.consume(key, limit_type).await, Slot::Denied)
    }

    async fn consume(&self, key: &str, limit_type: LimitType) -> Slot {
        self.stats.checks.fetch_add(1, Ordering::Relaxed);
        let limit = self.config.get(limit_type);
        let bucket = bucket_key(limit_type, key);
        let now = now_secs();

        let result = async {
            let count = self
                .kv
                .zprune_count(&bucket, now - limit.window_secs as f64)
                .await?;
            if count >= limit.requests as u64 {
                return Ok(None);
            }
            let member = format!("{:.6}-{}", now, uuid::Uuid::new_v4().simple());
            self.kv.zadd(&bucket, &member, now).await?;
            self.kv.expire(&bucket, limit.window_secs + 1).await?;
            Ok::<Option<String>, KvError>(Some(member))
        }
        .await;

        match result {
            Ok(Some(member)) => {
                debug!("Rate limit ok for {} ({})", key, limit_type);
                Slot::Taken { bucket, member }
            }
            Ok(None) => {
                self.stats.denied.fetch_add(1, Ordering::Relaxed);
                warn!("Rate limit exceeded for {} ({})", key, limit_type);
                Slot::Denied
            }
            Err(e) => {
                self.stats.store_errors.fetch_add(1, Ordering::Relaxed);
                error!("Rate limit check failed for {} ({}): {}", key, limit_type, e);
                Slot::Unchecked
            }
        }
    }

    /// Give back a slot taken by `consume`
    async fn release(&self, slot: Slot) {
        if let Slot::Taken { bucket, member } = slot {
            if let Err(e) = self.kv.zrem(&bucket, &member).await {
                error!("Rate limit refund failed for {}: {}", bucket, e);
            }
        }
    }

    /// Slots left in the window. Returns 0 on store errors.
    pub async fn remaining(&self, key: &str, limit_type: LimitType) -> u32 {
        let limit = self.config.get(limit_type);
        let bucket = bucket_key(limit_type, key);
        match self
            .kv
            .zprune_count(&bucket, now_secs() - limit.window_secs as f64)
            .await
        {
            Ok(count) => (limit.requests as u64).saturating_sub(count) as u32,
            Err(e) => {
                error!("Rate limit remaining failed for {}: {}", key, e);
                0
            }
        }
    }

    /// Unix time (seconds) when the oldest request leaves the window.
    /// Returns now when the bucket is empty or the store fails.
    pub async fn reset_time(&self, key: &str, limit_type: LimitType) -> f64 {
        let limit = self.config.get(limit_type);
        let now = now_secs();
        match self
            .kv
            .zrange_with_scores(&bucket_key(limit_type, key), 0, 0)
            .await
        {
            Ok(oldest) => oldest
                .first()
                .map(|(_, score)| score + limit.window_secs as f64)
                .unwrap_or(now),
            Err(e) => {
                error!("Rate limit reset time failed for {}: {}", key, e);
                now
            }
        }
    }

    /// Delete every bucket for a user
    pub async fn clear_user_limits(&self, user_id: &str) -> bool {
        let pattern = format!("rate_limit:*:{}", user_id);
        let result = async {
            let keys = self.kv.keys(&pattern).await?;
            self.kv.del(&keys).await
        }
        .await;

        match result {
            Ok(n) => {
                debug!("Cleared {} rate limit buckets for {}", n, user_id);
                true
            }
            Err(e) => {
                error!("Failed to clear rate limits for {}: {}", user_id, e);
                false
            }
        }
    }

    /// Admission for a chat event: the action's bucket, then the global one
    pub async fn check_action(&self, user_id: &str, action: Action) -> RateLimitResult {
        let limit_type = action.limit_type();
        let user_slot = self.consume(user_id, limit_type).await;
        if matches!(user_slot, Slot::Denied) {
            return RateLimitResult::denied(limit_type, self.retry_after(user_id, limit_type).await);
        }
        if !self.is_allowed(GLOBAL_KEY, LimitType::Global).await {
            self.release(user_slot).await;
            return RateLimitResult::denied(
                LimitType::Global,
                self.retry_after(GLOBAL_KEY, LimitType::Global).await,
            );
        }
        RateLimitResult::allowed()
    }

    async fn retry_after(&self, key: &str, limit_type: LimitType) -> u64 {
        let reset = self.reset_time(key, limit_type).await;
        (reset - now_secs()).max(0.0).ceil() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{InMemoryKv, KvStore};
    use std::sync::Arc;

    fn limiter_with(config: RateLimitConfig) -> (Arc<InMemoryKv>, RateLimiter) {
        let kv = Arc::new(InMemoryKv::new());
        let limiter = RateLimiter::new(kv.clone(), config);
        (kv, limiter)
    }

    #[tokio::test]
    async fn test_allows_under_limit_then_blocks() {
        let (_, limiter) = limiter_with(RateLimitConfig::default());

        for i in 0..10 {
            assert!(
                limiter.is_allowed("42", LimitType::User).await,
                "Request {} should be allowed",
                i
            );
        }
        assert!(!limiter.is_allowed("42", LimitType::User).await);
        assert_eq!(limiter.remaining("42", LimitType::User).await, 0);
        assert_eq!(limiter.stats().denied.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_burst_in_same_instant_counts_every_request() {
        let (kv, limiter) = limiter_with(RateLimitConfig::default());
        for _ in 0..3 {
            limiter.is_allowed("7", LimitType::Voice).await;
        }
        assert_eq!(kv.zcard("rate_limit:voice:7").await.unwrap(), 3);
        assert!(!limiter.is_allowed("7", LimitType::Voice).await);
    }

    #[tokio::test]
    async fn test_user_isolation() {
        let (_, limiter) = limiter_with(RateLimitConfig::default());
        for _ in 0..5 {
            limiter.is_allowed("a", LimitType::Gpt).await;
        }
        assert!(!limiter.is_allowed("a", LimitType::Gpt).await);
        assert!(limiter.is_allowed("b", LimitType::Gpt).await);
        assert_eq!(limiter.remaining("b", LimitType::Gpt).await, 4);
    }

    #[tokio::test]
    async fn test_old_entries_leave_window() {
        let (kv, limiter) = limiter_with(RateLimitConfig::default());
        let old = now_secs() - 120.0;
        for i in 0..10 {
            kv.zadd("rate_limit:user:9", &format!("old-{}", i), old).await.unwrap();
        }
        assert!(limiter.is_allowed("9", LimitType::User).await);
        assert_eq!(limiter.remaining("9", LimitType::User).await, 9);
    }

    #[tokio::test]
    async fn test_reset_time() {
        let (_, limiter) = limiter_with(RateLimitConfig::default());
        let before = now_secs();
        let empty = limiter.reset_time("1", LimitType::User).await;
        assert!(empty >= before && empty - before < 5.0);

        limiter.is_allowed("1", LimitType::User).await;
        let reset = limiter.reset_time("1", LimitType::User).await;
        assert!(reset >= before + 60.0 && reset < before + 65.0);
    }

    #[tokio::test]
    async fn test_store_failure_fails_open() {
        let (kv, limiter) = limiter_with(RateLimitConfig::default());
        kv.set_offline(true);
        assert!(limiter.is_allowed("1", LimitType::User).await);
        assert_eq!(limiter.remaining("1", LimitType::User).await, 0);
        assert_eq!(limiter.stats().store_errors.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_clear_user_limits() {
        let (kv, limiter) = limiter_with(RateLimitConfig::default());
        limiter.is_allowed("5", LimitType::User).await;
        limiter.is_allowed("5", LimitType::Gpt).await;
        limiter.is_allowed("55", LimitType::User).await;

        assert!(limiter.clear_user_limits("5").await);
        assert_eq!(kv.zcard("rate_limit:user:5").await.unwrap(), 0);
        assert_eq!(kv.zcard("rate_limit:gpt:5").await.unwrap(), 0);
        assert_eq!(kv.zcard("rate_limit:user:55").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_check_action_consumes_global_bucket() {
        let (_, limiter) = limiter_with(RateLimitConfig::with_limits(10, 2));
        assert!(limiter.check_action("1", Action::Message).await.allowed);
        assert!(limiter.check_action("2", Action::AiCommand).await.allowed);

        let denied = limiter.check_action("3", Action::Message).await;
        assert!(!denied.allowed);
        assert_eq!(denied.limited_by, Some(LimitType::Global));
        assert!(denied.retry_after_secs <= 61);
    }

    #[tokio::test]
    async fn test_global_denial_refunds_user_slot() {
        let (kv, limiter) = limiter_with(RateLimitConfig::with_limits(10, 1));
        assert!(limiter.check_action("1", Action::Message).await.allowed);

        for _ in 0..3 {
            let denied = limiter.check_action("2", Action::Message).await;
            assert_eq!(denied.limited_by, Some(LimitType::Global));
        }
        assert_eq!(kv.zcard("rate_limit:user:2").await.unwrap(), 0);
        assert_eq!(limiter.remaining("2", LimitType::User).await, 10);
        assert_eq!(kv.zcard("rate_limit:global:all").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_action_mapping() {
        assert_eq!(Action::Message.limit_type(), LimitType::User);
        assert_eq!(Action::AiCommand.limit_type(), LimitType::Gpt);
        assert_eq!(Action::Voice.limit_type(), LimitType::Voice);
    }
}
