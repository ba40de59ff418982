//! Service Wiring
//!
//! Builds every component from `Config` and hands the bundle to the
//! gateway and the health server. Unreachable backends degrade the bundle
//! instead of failing startup: Redis falls back to the in-process store,
//! Ollama to the hashing embedder, ChromaDB to recent-context only and the
//! LoRA server to "not available".

use crate::ai::AiRouter;
use crate::config::Config;
use crate::cost_guard::{CostGuard, CostLimits};
use crate::embeddings::Embedder;
use crate::kv::{self, SharedKv};
use crate::lora::LoraService;
use crate::memory::{MemoryService, VectorStore};
use crate::model_cache::ModelManager;
use crate::perf::PerformanceMonitor;
use crate::rate_limit::{RateLimitConfig, RateLimiter};
use crate::reasoning::ReasoningService;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Everything a request handler may need
pub struct Services {
    pub config: Config,
    pub kv: SharedKv,
    pub rate_limiter: Arc<RateLimiter>,
    pub cost_guard: Arc<CostGuard>,
    pub perf: Arc<PerformanceMonitor>,
    pub models: Arc<ModelManager>,
    pub memory: Arc<MemoryService>,
    pub lora: Arc<LoraService>,
    pub ai: Arc<AiRouter>,
    pub started_at: DateTime<Utc>,
}

/// Component health for `/health` and the HTTP status route
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub kv_backend: &'static str,
    pub kv_connected: bool,
    pub memory_enabled: bool,
    pub lora_enabled: bool,
    pub hosted_ai: bool,
    pub uptime_secs: i64,
}

impl Services {
    /// Connect to every backend, degrading where one is unreachable
    pub async fn initialize(config: Config) -> Result<Arc<Self>> {
        let kv = kv::connect_or_fallback(&config.database.redis_url).await;
        info!("Key-value store: {}", kv.backend());

        let models = Arc::new(ModelManager::new(&config.ai.embedding_url, &config.ai.embedding_model));
        models.warm_up().await;
        let embedder = models.embedder_or_fallback().await;

        let memory = Arc::new(
            MemoryService::connect(&config.database.chroma_url(), kv.clone(), embedder).await,
        );

        let services = Self::assemble(config, kv, memory, models)?;
        services.lora.initialize().await;

        info!("Services initialized");
        Ok(Arc::new(services))
    }

    /// Offline wiring over the given store and vector backend
    pub fn with_backends(
        config: Config,
        kv: SharedKv,
        vector_store: Option<Arc<dyn VectorStore>>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        let memory = Arc::new(MemoryService::new(vector_store, kv.clone(), embedder));
        let models = Arc::new(ModelManager::new(&config.ai.embedding_url, &config.ai.embedding_model));
        Self::assemble(config, kv, memory, models)
    }

    fn assemble(
        config: Config,
        kv: SharedKv,
        memory: Arc<MemoryService>,
        models: Arc<ModelManager>,
    ) -> Result<Self> {
        let rate_limiter = Arc::new(RateLimiter::new(
            kv.clone(),
            RateLimitConfig::with_limits(
                config.performance.rate_limit_per_user,
                config.performance.rate_limit_global,
            ),
        ));
        let cost_guard = Arc::new(CostGuard::new(
            kv.clone(),
            CostLimits {
                monthly_global: config.performance.max_monthly_cost,
                ..CostLimits::default()
            },
        ));
        let perf = Arc::new(PerformanceMonitor::new(kv.clone()));
        let lora = Arc::new(LoraService::new(
            &config.ai.lora_server_url,
            config.ai.lora_adapters_path.clone(),
            config.ai.max_tokens,
            config.ai.temperature,
        )?);
        let reasoning = Arc::new(ReasoningService::new(memory.clone()));
        let ai = Arc::new(AiRouter::new(
            &config.ai,
            lora.clone(),
            reasoning,
            cost_guard.clone(),
            perf.clone(),
            models.clone(),
        )?);

        Ok(Self {
            config,
            kv,
            rate_limiter,
            cost_guard,
            perf,
            models,
            memory,
            lora,
            ai,
            started_at: Utc::now(),
        })
    }

    pub async fn health(&self) -> HealthReport {
        let kv_connected = self.kv.ping().await.is_ok();
        let memory_enabled = self.memory.is_enabled();
        HealthReport {
            status: if kv_connected && memory_enabled { "healthy" } else { "degraded" },
            kv_backend: self.kv.backend(),
            kv_connected,
            memory_enabled,
            lora_enabled: self.lora.is_enabled(),
            hosted_ai: self.config.ai.has_openai(),
            uptime_secs: (Utc::now() - self.started_at).num_seconds(),
        }
    }
}
