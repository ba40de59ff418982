//! Eva Bot
//!
//! Telegram companion bot with long-term memory, tone adapters and a
//! local-first AI router.
//!
//! # Features
//!
//! - **Routing**: local vLLM with a LoRA adapter per tone, hosted OpenAI fallback
//! - **Memory**: ChromaDB vector search plus a recent-context cache in Redis
//! - **Reasoning**: context analysis and prompt construction per message
//! - **Guards**: sliding-window rate limits and an INR cost budget
//! - **Monitoring**: latency tracking against per-operation targets
//!
//! # Architecture
//!
//! ```text
//! Telegram ──► Gateway ──► AiRouter ──► vLLM (+ LoRA)
//!                 │           │    └──► OpenAI
//!                 │           └── Reasoning ──► Memory (ChromaDB + Redis)
//!                 ├── RateLimiter (Redis)
//!                 ├── CostGuard (Redis)
//!                 └── PerformanceMonitor (Redis)
//! ```

pub mod ai;
pub mod config;
pub mod cost_guard;
pub mod embeddings;
pub mod gateway;
pub mod health;
pub mod kv;
pub mod llm;
pub mod lora;
pub mod memory;
pub mod model_cache;
pub mod perf;
pub mod personality;
pub mod rate_limit;
pub mod reasoning;
pub mod services;
pub mod telegram;

pub use ai::{AiResponse, AiRouter, ResponseSource};
pub use config::Config;
pub use cost_guard::{BudgetCheck, CostGuard, CostLimits};
pub use embeddings::{Embedder, EmbeddingModel, HashingEmbedder};
pub use gateway::{ChatUser, Command, Gateway, Reply};
pub use kv::{InMemoryKv, KvError, KvStore, RedisStore, SharedKv};
pub use lora::LoraService;
pub use memory::{InMemoryVectorStore, InteractionType, Memory, MemoryService, VectorStore};
pub use perf::PerformanceMonitor;
pub use personality::Tone;
pub use rate_limit::{Action, RateLimitConfig, RateLimitResult, RateLimiter};
pub use reasoning::ReasoningService;
pub use services::Services;
