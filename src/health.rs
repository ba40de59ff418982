//! Health Server
//!
//! Small axum server for load balancers and operators: `/health` reports
//! component status, `/live` only answers that the process is up and `/stats` dumps
//! gateway, memory, cost, LoRA and performance counters as JSON.

use crate::gateway::Gateway;
use anyhow::{Context, Result};
use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use serde::Serialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub timestamp: String,
    pub components: crate::services::HealthReport,
}

/// Component health. Degraded still answers 200: the bot keeps serving.
pub async fn health_check(State(gateway): State<Arc<Gateway>>) -> Json<HealthResponse> {
    let components = gateway.services().health().await;
    Json(HealthResponse {
        status: components.status,
        version: env!("CARGO_PKG_VERSION"),
        timestamp: chrono::Utc::now().to_rfc3339(),
        components,
    })
}

pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

pub async fn stats(State(gateway): State<Arc<Gateway>>) -> Result<Json<Value>, StatusCode> {
    let services = gateway.services();
    let counters = gateway.stats();
    let limiter = services.rate_limiter.stats();

    let performance = services.perf.all_stats().await.map_err(|e| {
        error!("Performance stats failed: {:#}", e);
        StatusCode::SERVICE_UNAVAILABLE
    })?;
    let costs = services.cost_guard.global_stats().await.map_err(|e| {
        error!("Cost stats failed: {:#}", e);
        StatusCode::SERVICE_UNAVAILABLE
    })?;

    Ok(Json(json!({
        "gateway": {
            "messages": counters.messages.load(Ordering::Relaxed),
            "commands": counters.commands.load(Ordering::Relaxed),
            "inline_queries": counters.inline_queries.load(Ordering::Relaxed),
            "voice_messages": counters.voice_messages.load(Ordering::Relaxed),
            "rate_limited": counters.rate_limited.load(Ordering::Relaxed),
            "budget_denied": counters.budget_denied.load(Ordering::Relaxed),
        },
        "rate_limiter": {
            "checks": limiter.checks.load(Ordering::Relaxed),
            "denied": limiter.denied.load(Ordering::Relaxed),
            "store_errors": limiter.store_errors.load(Ordering::Relaxed),
        },
        "memory": services.memory.stats().await,
        "costs": costs,
        "lora": services.lora.stats().await,
        "models": services.models.info(),
        "performance": performance,
        "config": services.config.summary(),
    })))
}

pub fn health_router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/live", get(liveness))
        .route("/stats", get(stats))
        .layer(TraceLayer::new_for_http())
        .with_state(gateway)
}

/// Serve until the task is dropped
pub async fn serve(gateway: Arc<Gateway>, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind health server on {}", addr))?;
    info!("Health server listening on {}", addr);

    axum::serve(listener, health_router(gateway))
        .await
        .context("Health server failed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::embeddings::HashingEmbedder;
    use crate::kv::InMemoryKv;
    use crate::memory::InMemoryVectorStore;
    use crate::services::Services;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn gateway(kv: Arc<InMemoryKv>) -> Arc<Gateway> {
        let services = Services::with_backends(
            Config::for_tests(),
            kv,
            Some(Arc::new(InMemoryVectorStore::new())),
            Arc::new(HashingEmbedder::default()),
        )
        .unwrap();
        Arc::new(Gateway::new(Arc::new(services)))
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_health_and_live() {
        let app = health_router(gateway(Arc::new(InMemoryKv::new())));
        let (status, json) = get_json(app.clone(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["components"]["kv_backend"], "memory");

        let (status, _) = get_json(app, "/live").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_stats_payload() {
        let app = health_router(gateway(Arc::new(InMemoryKv::new())));
        let (status, json) = get_json(app, "/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["gateway"]["messages"], 0);
        assert_eq!(json["performance"].as_array().map(Vec::len), Some(4));
        assert_eq!(json["costs"]["limits"]["monthly"], 20000.0);
        assert_eq!(json["config"]["has_token"], true);
    }

    #[tokio::test]
    async fn test_stats_unavailable_when_store_down() {
        let kv = Arc::new(InMemoryKv::new());
        let app = health_router(gateway(kv.clone()));
        kv.set_offline(true);
        let (status, _) = get_json(app.clone(), "/stats").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (_, json) = get_json(app, "/health").await;
        assert_eq!(json["status"], "degraded");
    }
}
