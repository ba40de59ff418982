//! Model Cache
//!
//! Loaded model handles keyed by name. Concurrent requests for a name that
//! is still loading wait on the same load; failed loads are not cached.

use crate::embeddings::{EmbeddingModel, Embedder, HashingEmbedder};
use anyhow::Result;
use moka::future::Cache;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Coalescing cache of loaded handles
pub struct ModelCache<T: Clone + Send + Sync + 'static> {
    models: Cache<String, T>,
    loads: AtomicU64,
    failures: AtomicU64,
}

impl<T: Clone + Send + Sync + 'static> Default for ModelCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> ModelCache<T> {
    pub fn new() -> Self {
        Self {
            models: Cache::builder().max_capacity(64).build(),
            loads: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Cached handle for `name`, or the result of running `loader` once.
    pub async fn get_or_load<F, Fut>(&self, name: &str, loader: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let loads = &self.loads;
        self.models
            .try_get_with(name.to_string(), async move {
                loads.fetch_add(1, Ordering::Relaxed);
                info!("Loading model: {}", name);
                loader().await
            })
            .await
            .map_err(|e| {
                self.failures.fetch_add(1, Ordering::Relaxed);
                anyhow::anyhow!("Failed to load model {}: {:#}", name, e)
            })
    }

    /// Names of loaded handles, sorted
    pub fn loaded(&self) -> Vec<String> {
        let mut names: Vec<String> = self.models.iter().map(|(k, _)| k.to_string()).collect();
        names.sort();
        names
    }

    /// Number of loader invocations so far
    pub fn load_count(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

/// Snapshot for `/stats`
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub loaded_models: Vec<String>,
    pub loads: u64,
    pub failures: u64,
    pub embedding_model: String,
    pub embedding_url: String,
}

/// Embedding model handles shared by the memory layer
pub struct ModelManager {
    cache: ModelCache<Arc<dyn Embedder>>,
    embedding_url: String,
    embedding_model: String,
}

impl ModelManager {
    pub fn new(embedding_url: &str, embedding_model: &str) -> Self {
        Self {
            cache: ModelCache::new(),
            embedding_url: embedding_url.to_string(),
            embedding_model: embedding_model.to_string(),
        }
    }

    /// The configured embedding model, loaded on first use
    pub async fn embedding_model(&self) -> Result<Arc<dyn Embedder>> {
        let url = self.embedding_url.clone();
        let model = self.embedding_model.clone();
        self.cache
            .get_or_load(&self.embedding_model, || async move {
                let loaded = EmbeddingModel::load(&url, &model).await?;
                Ok(Arc::new(loaded) as Arc<dyn Embedder>)
            })
            .await
    }

    /// Embedding model, or the offline hashing model when the server is down
    pub async fn embedder_or_fallback(&self) -> Arc<dyn Embedder> {
        match self.embedding_model().await {
            Ok(model) => model,
            Err(e) => {
                warn!("{:#}; using hashing embedder", e);
                self.cache
                    .get_or_load(HashingEmbedder::MODEL_NAME, || async {
                        Ok(Arc::new(HashingEmbedder::default()) as Arc<dyn Embedder>)
                    })
                    .await
                    .unwrap_or_else(|_| Arc::new(HashingEmbedder::default()))
            }
        }
    }

    /// Pre-load the embedding model. Failure is logged, not returned.
    pub async fn warm_up(&self) {
        info!("Warming up models...");
        match self.embedding_model().await {
            Ok(model) => info!("Model warm-up completed ({})", model.model_name()),
            Err(e) => error!("Model warm-up failed: {:#}", e),
        }
    }

    pub fn info(&self) -> ModelInfo {
        ModelInfo {
            loaded_models: self.cache.loaded(),
            loads: self.cache.load_count(),
            failures: self.cache.failure_count(),
            embedding_model: self.embedding_model.clone(),
            embedding_url: self.embedding_url.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_requests_load_once() {
        let cache: Arc<ModelCache<Arc<String>>> = Arc::new(ModelCache::new());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_load("encoder", || async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(Arc::new("weights".to_string()))
                    })
                    .await
            }));
        }

        for handle in handles {
            let model = handle.await.unwrap().unwrap();
            assert_eq!(model.as_str(), "weights");
        }
        assert_eq!(cache.load_count(), 1);
        assert_eq!(cache.loaded(), vec!["encoder".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_load_is_not_cached() {
        let cache: ModelCache<u32> = ModelCache::new();

        let err = cache
            .get_or_load("broken", || async { anyhow::bail!("disk on fire") })
            .await;
        assert!(err.unwrap_err().to_string().contains("disk on fire"));
        assert!(cache.loaded().is_empty());

        let ok = cache.get_or_load("broken", || async { Ok(7) }).await.unwrap();
        assert_eq!(ok, 7);
        assert_eq!(cache.load_count(), 2);
        assert_eq!(cache.failure_count(), 1);
    }

    #[tokio::test]
    async fn test_manager_falls_back_when_server_down() {
        let manager = ModelManager::new("http://127.0.0.1:9", "nomic-embed-text");
        manager.warm_up().await;

        let embedder = manager.embedder_or_fallback().await;
        assert_eq!(embedder.model_name(), "hashing-bow");
        assert!(manager.info().loaded_models.contains(&"hashing-bow".to_string()));
    }
}
