//! Performance Monitor
//!
//! Times operations against response-time targets and keeps the last 1000
//! durations per operation in the key-value store (`perf:{op}:times`) along
//! with pass/fail counters (`perf:{op}:counts`). Samples are scored by when
//! they were recorded; the member is `{duration}|{id}`.

use crate::kv::{KvError, SharedKv};
use anyhow::Result;
use futures_util::future::try_join_all;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Target for operations without their own entry
pub const DEFAULT_TARGET_SECS: f64 = 3.0;

const TARGETS: &[(&str, f64)] = &[
    ("text_response", 2.5),
    ("voice_processing", 1.2),
    ("memory_search", 0.5),
    ("model_inference", 1.5),
];

const MAX_SAMPLES: isize = 1000;
const STATS_WINDOW: isize = 100;

pub fn target_for(operation: &str) -> f64 {
    TARGETS
        .iter()
        .find(|(name, _)| *name == operation)
        .map(|(_, t)| *t)
        .unwrap_or(DEFAULT_TARGET_SECS)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PerfStatus {
    NoData,
    Healthy,
    Degraded,
}

/// Stats over the most recent 100 samples
#[derive(Debug, Clone, Serialize)]
pub struct OperationStats {
    pub operation: String,
    pub target: f64,
    pub avg_time: f64,
    pub p95_time: f64,
    pub sample_count: usize,
    /// Percentage of runs within target, over all recorded runs
    pub success_rate: f64,
    pub total_operations: u64,
    pub status: PerfStatus,
}

pub struct PerformanceMonitor {
    kv: SharedKv,
    /// Last sample score, keeps scores strictly increasing
    last_score: AtomicI64,
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

impl PerformanceMonitor {
    pub fn new(kv: SharedKv) -> Self {
        Self {
            kv,
            last_score: AtomicI64::new(0),
        }
    }

    /// Run `fut` and record how long it took
    pub async fn track<F, T>(&self, operation: &str, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        let start = Instant::now();
        let output = fut.await;
        self.record(operation, start.elapsed()).await;
        output
    }

    fn next_score(&self) -> i64 {
        let now = chrono::Utc::now().timestamp_micros();
        let prev = self
            .last_score
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |last| Some(now.max(last + 1)))
            .unwrap_or(now);
        now.max(prev + 1)
    }

    /// Record one duration. Store errors are logged and swallowed.
    pub async fn record(&self, operation: &str, duration: Duration) {
        let secs = duration.as_secs_f64();
        let target = target_for(operation);
        let passed = secs <= target;

        let result = async {
            let times = format!("perf:{}:times", operation);
            let member = format!("{:.6}|{}", secs, uuid::Uuid::new_v4().simple());
            self.kv.zadd(&times, &member, self.next_score() as f64).await?;
            self.kv.zrem_range_by_rank(&times, 0, -(MAX_SAMPLES + 1)).await?;
            let field = if passed { "pass" } else { "fail" };
            self.kv.hincr_by(&format!("perf:{}:counts", operation), field, 1).await?;
            Ok::<(), KvError>(())
        }
        .await;

        if let Err(e) = result {
            error!("Performance recording failed for {}: {}", operation, e);
        }

        if passed {
            debug!("{} within target: {:.2}s <= {:.2}s", operation, secs, target);
        } else {
            warn!("{} exceeded target: {:.2}s > {:.2}s", operation, secs, target);
        }
    }

    pub async fn stats(&self, operation: &str) -> Result<OperationStats> {
        let target = target_for(operation);
        let recent = self
            .kv
            .zrange_with_scores(&format!("perf:{}:times", operation), -STATS_WINDOW, -1)
            .await?;
        let counts = self.kv.hget_all(&format!("perf:{}:counts", operation)).await?;

        let count = |field: &str| counts.get(field).and_then(|v| v.parse::<u64>().ok()).unwrap_or(0);
        let pass = count("pass");
        let total = pass + count("fail");

        if recent.is_empty() {
            return Ok(OperationStats {
                operation: operation.to_string(),
                target,
                avg_time: 0.0,
                p95_time: 0.0,
                sample_count: 0,
                success_rate: 0.0,
                total_operations: total,
                status: PerfStatus::NoData,
            });
        }

        let mut durations: Vec<f64> = recent
            .iter()
            .filter_map(|(member, _)| member.split('|').next()?.parse().ok())
            .collect();
        if durations.is_empty() {
            anyhow::bail!("No readable samples for {}", operation);
        }
        durations.sort_by(|a, b| a.total_cmp(b));
        let avg = durations.iter().sum::<f64>() / durations.len() as f64;
        let p95 = durations[(durations.len() as f64 * 0.95) as usize];
        let success_rate = if total > 0 {
            pass as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        Ok(OperationStats {
            operation: operation.to_string(),
            target,
            avg_time: round3(avg),
            p95_time: round3(p95),
            sample_count: durations.len(),
            success_rate: (success_rate * 10.0).round() / 10.0,
            total_operations: total,
            status: if avg <= target {
                PerfStatus::Healthy
            } else {
                PerfStatus::Degraded
            },
        })
    }

    /// Stats for every operation with a target
    pub async fn all_stats(&self) -> Result<Vec<OperationStats>> {
        try_join_all(TARGETS.iter().map(|(operation, _)| self.stats(operation))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{InMemoryKv, KvStore};
    use std::sync::Arc;

    #[test]
    fn test_targets() {
        assert_eq!(target_for("text_response"), 2.5);
        assert_eq!(target_for("memory_search"), 0.5);
        assert_eq!(target_for("something_else"), DEFAULT_TARGET_SECS);
    }

    #[tokio::test]
    async fn test_track_returns_output_and_records() {
        let monitor = PerformanceMonitor::new(InMemoryKv::shared());
        let value = monitor.track("text_response", async { 42 }).await;
        assert_eq!(value, 42);

        let stats = monitor.stats("text_response").await.unwrap();
        assert_eq!(stats.sample_count, 1);
        assert_eq!(stats.total_operations, 1);
        assert_eq!(stats.success_rate, 100.0);
        assert_eq!(stats.status, PerfStatus::Healthy);
    }

    #[tokio::test]
    async fn test_stats_with_slow_samples() {
        let monitor = PerformanceMonitor::new(InMemoryKv::shared());
        for ms in [100, 200, 300] {
            monitor.record("memory_search", Duration::from_millis(ms)).await;
        }
        monitor.record("memory_search", Duration::from_secs(3)).await;

        let stats = monitor.stats("memory_search").await.unwrap();
        assert_eq!(stats.sample_count, 4);
        assert_eq!(stats.p95_time, 3.0);
        assert_eq!(stats.avg_time, 0.9);
        assert_eq!(stats.success_rate, 75.0);
        assert_eq!(stats.status, PerfStatus::Degraded);
    }

    #[tokio::test]
    async fn test_stats_follow_most_recent_samples() {
        let monitor = PerformanceMonitor::new(InMemoryKv::shared());
        for _ in 0..100 {
            monitor.record("text_response", Duration::from_secs(5)).await;
        }
        assert_eq!(monitor.stats("text_response").await.unwrap().status, PerfStatus::Degraded);

        for _ in 0..100 {
            monitor.record("text_response", Duration::from_millis(100)).await;
        }
        let stats = monitor.stats("text_response").await.unwrap();
        assert_eq!(stats.sample_count, 100);
        assert_eq!(stats.avg_time, 0.1);
        assert_eq!(stats.p95_time, 0.1);
        assert_eq!(stats.status, PerfStatus::Healthy);
        assert_eq!(stats.total_operations, 200);
        assert_eq!(stats.success_rate, 50.0);
    }

    #[tokio::test]
    async fn test_no_data_and_store_failure() {
        let kv = Arc::new(InMemoryKv::new());
        let monitor = PerformanceMonitor::new(kv.clone());
        let stats = monitor.stats("voice_processing").await.unwrap();
        assert_eq!(stats.status, PerfStatus::NoData);
        assert_eq!(monitor.all_stats().await.unwrap().len(), 4);

        kv.set_offline(true);
        // Recording swallows the error, stats surface it
        assert_eq!(monitor.track("text_response", async { "ok" }).await, "ok");
        assert!(monitor.stats("text_response").await.is_err());
    }

    #[tokio::test]
    async fn test_keeps_last_thousand_samples() {
        let kv = Arc::new(InMemoryKv::new());
        let monitor = PerformanceMonitor::new(kv.clone());
        for _ in 0..1005 {
            monitor.record("model_inference", Duration::from_millis(1)).await;
        }
        assert_eq!(kv.zcard("perf:model_inference:times").await.unwrap(), 1000);
    }
}
