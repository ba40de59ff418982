//! Cost Guard
//!
//! Running INR totals for hosted-model spend, per user and globally, per UTC
//! day and month. Budget checks fail closed when the store is unavailable.

use crate::kv::{KvError, SharedKv};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

const DAILY_TTL_SECS: u64 = 86_400 * 2;
const MONTHLY_TTL_SECS: u64 = 86_400 * 35;
const USAGE_LOG_LEN: isize = 1000;
const HISTORY_LEN: usize = 10;

/// Spend limits in INR
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CostLimits {
    pub daily_user: f64,
    pub monthly_user: f64,
    pub daily_global: f64,
    pub monthly_global: f64,
}

impl Default for CostLimits {
    fn default() -> Self {
        Self {
            daily_user: 50.0,
            monthly_user: 500.0,
            daily_global: 5000.0,
            monthly_global: 20000.0,
        }
    }
}

/// Price per token in INR
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenPrice {
    pub input: f64,
    pub output: f64,
}

const GPT_4O: TokenPrice = TokenPrice {
    input: 0.000005,
    output: 0.000015,
};

const GPT_4O_MINI: TokenPrice = TokenPrice {
    input: 0.0000015,
    output: 0.0000006,
};

/// Pricing table lookup. Unknown models are billed as gpt-4o.
pub fn price_for(model: &str) -> TokenPrice {
    match model {
        "gpt-4o-mini" => GPT_4O_MINI,
        _ => GPT_4O,
    }
}

/// Spend so far in the current periods
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CurrentCosts {
    pub user_daily: f64,
    pub user_monthly: f64,
    pub global_daily: f64,
    pub global_monthly: f64,
}

/// Result of a budget check
#[derive(Debug, Clone)]
pub struct BudgetCheck {
    pub allowed: bool,
    pub reason: String,
}

impl BudgetCheck {
    fn ok() -> Self {
        Self {
            allowed: true,
            reason: "Budget available".to_string(),
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
        }
    }
}

/// One entry of `usage:log:{user}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub user_id: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_inr: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct PeriodAmounts {
    pub daily: f64,
    pub monthly: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct UsageStats {
    pub costs: CurrentCosts,
    pub limits: PeriodAmounts,
    pub remaining: PeriodAmounts,
    /// Most recent first
    pub usage_history: Vec<UsageRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GlobalStats {
    pub costs: PeriodAmounts,
    pub limits: PeriodAmounts,
    pub remaining: PeriodAmounts,
}

/// Counter keys for one user at one instant
struct PeriodKeys {
    user_daily: String,
    user_monthly: String,
    global_daily: String,
    global_monthly: String,
}

impl PeriodKeys {
    fn at(user_id: &str, now: DateTime<Utc>) -> Self {
        let today = now.format("%Y-%m-%d");
        let month = now.format("%Y-%m");
        Self {
            user_daily: format!("cost:user:{}:daily:{}", user_id, today),
            user_monthly: format!("cost:user:{}:monthly:{}", user_id, month),
            global_daily: format!("cost:global:daily:{}", today),
            global_monthly: format!("cost:global:monthly:{}", month),
        }
    }

    fn all(&self) -> [String; 4] {
        [
            self.user_daily.clone(),
            self.user_monthly.clone(),
            self.global_daily.clone(),
            self.global_monthly.clone(),
        ]
    }
}

fn parse_amount(value: Option<&String>) -> f64 {
    value.and_then(|v| v.parse().ok()).unwrap_or(0.0)
}

/// Tracks and limits hosted API spend
pub struct CostGuard {
    kv: SharedKv,
    limits: CostLimits,
}

impl CostGuard {
    pub fn new(kv: SharedKv, limits: CostLimits) -> Self {
        Self { kv, limits }
    }

    pub fn limits(&self) -> &CostLimits {
        &self.limits
    }

    async fn load_costs(&self, user_id: &str) -> Result<CurrentCosts, KvError> {
        let keys = PeriodKeys::at(user_id, Utc::now()).all();
        let values = self.kv.mget(&keys).await?;
        Ok(CurrentCosts {
            user_daily: parse_amount(values.first().and_then(Option::as_ref)),
            user_monthly: parse_amount(values.get(1).and_then(Option::as_ref)),
            global_daily: parse_amount(values.get(2).and_then(Option::as_ref)),
            global_monthly: parse_amount(values.get(3).and_then(Option::as_ref)),
        })
    }

    /// Whether `estimated_cost` more fits in every budget
    pub async fn check_budget(&self, user_id: &str, estimated_cost: f64) -> BudgetCheck {
        let costs = match self.load_costs(user_id).await {
            Ok(costs) => costs,
            Err(e) => {
                error!("Budget check failed: {}", e);
                return BudgetCheck::deny("Budget check failed");
            }
        };

        let limits = &self.limits;
        if costs.user_daily + estimated_cost > limits.daily_user {
            return BudgetCheck::deny(format!("Daily limit exceeded (₹{})", limits.daily_user));
        }
        if costs.user_monthly + estimated_cost > limits.monthly_user {
            return BudgetCheck::deny(format!(
                "Monthly limit exceeded (₹{})",
                limits.monthly_user
            ));
        }
        if costs.global_daily + estimated_cost > limits.daily_global {
            return BudgetCheck::deny("System daily limit exceeded");
        }
        if costs.global_monthly + estimated_cost > limits.monthly_global {
            return BudgetCheck::deny("System monthly limit exceeded");
        }
        BudgetCheck::ok()
    }

    /// Add a completed call to every counter. Returns its cost, or 0.0 when
    /// the store rejects the write.
    pub async fn record_usage(
        &self,
        user_id: &str,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
    ) -> f64 {
        let price = price_for(model);
        let cost = input_tokens as f64 * price.input + output_tokens as f64 * price.output;
        let now = Utc::now();
        let keys = PeriodKeys::at(user_id, now);

        let record = UsageRecord {
            user_id: user_id.to_string(),
            model: model.to_string(),
            input_tokens,
            output_tokens,
            cost_inr: cost,
            timestamp: now,
        };

        let result = async {
            for (key, ttl) in [
                (&keys.user_daily, DAILY_TTL_SECS),
                (&keys.user_monthly, MONTHLY_TTL_SECS),
                (&keys.global_daily, DAILY_TTL_SECS),
                (&keys.global_monthly, MONTHLY_TTL_SECS),
            ] {
                self.kv.incr_by_float(key, cost).await?;
                self.kv.expire(key, ttl).await?;
            }

            let log_key = format!("usage:log:{}", user_id);
            let entry = serde_json::to_string(&record).unwrap_or_default();
            self.kv.lpush(&log_key, &entry).await?;
            self.kv.ltrim(&log_key, 0, USAGE_LOG_LEN - 1).await?;
            Ok::<(), KvError>(())
        }
        .await;

        match result {
            Ok(()) => {
                info!("Recorded usage: {} | {} | ₹{:.4}", user_id, model, cost);
                cost
            }
            Err(e) => {
                error!("Failed to record usage: {}", e);
                0.0
            }
        }
    }

    /// Current period totals (zeros when the store is unavailable)
    pub async fn current_costs(&self, user_id: &str) -> CurrentCosts {
        self.load_costs(user_id).await.unwrap_or_else(|e| {
            error!("Failed to get current costs: {}", e);
            CurrentCosts::default()
        })
    }

    /// Totals, limits and recent history for one user
    pub async fn usage_stats(&self, user_id: &str) -> Result<UsageStats> {
        let costs = self
            .load_costs(user_id)
            .await
            .context("Failed to read cost counters")?;
        let logs = self
            .kv
            .lrange(&format!("usage:log:{}", user_id), 0, 99)
            .await
            .context("Failed to read usage log")?;

        let usage_history = logs
            .iter()
            .filter_map(|line| serde_json::from_str::<UsageRecord>(line).ok())
            .take(HISTORY_LEN)
            .collect();

        Ok(UsageStats {
            costs,
            limits: PeriodAmounts {
                daily: self.limits.daily_user,
                monthly: self.limits.monthly_user,
            },
            remaining: PeriodAmounts {
                daily: (self.limits.daily_user - costs.user_daily).max(0.0),
                monthly: (self.limits.monthly_user - costs.user_monthly).max(0.0),
            },
            usage_history,
        })
    }

    /// Rough cost of sending `text` and getting as many tokens back
    pub fn estimate_cost(&self, text: &str, model: &str) -> f64 {
        let tokens = (text.chars().count() / 4) as f64;
        let price = price_for(model);
        tokens * price.input + tokens * price.output
    }

    /// Drop a user's counters and usage log
    pub async fn reset_user_costs(&self, user_id: &str, admin_user: &str) -> bool {
        let result = async {
            let mut keys = self.kv.keys(&format!("cost:user:{}:*", user_id)).await?;
            keys.push(format!("usage:log:{}", user_id));
            self.kv.del(&keys).await
        }
        .await;

        match result {
            Ok(n) => {
                info!("Reset costs for user {} by {} ({} keys)", user_id, admin_user, n);
                true
            }
            Err(e) => {
                warn!("Failed to reset user costs for {}: {}", user_id, e);
                false
            }
        }
    }

    /// System-wide totals for the current day and month
    pub async fn global_stats(&self) -> Result<GlobalStats> {
        let keys = PeriodKeys::at("-", Utc::now());
        let values = self
            .kv
            .mget(&[keys.global_daily, keys.global_monthly])
            .await
            .context("Failed to read global cost counters")?;

        let costs = PeriodAmounts {
            daily: parse_amount(values.first().and_then(Option::as_ref)),
            monthly: parse_amount(values.get(1).and_then(Option::as_ref)),
        };
        Ok(GlobalStats {
            costs,
            limits: PeriodAmounts {
                daily: self.limits.daily_global,
                monthly: self.limits.monthly_global,
            },
            remaining: PeriodAmounts {
                daily: (self.limits.daily_global - costs.daily).max(0.0),
                monthly: (self.limits.monthly_global - costs.monthly).max(0.0),
            },
        })
    }
}
