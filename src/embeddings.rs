//! Text Embeddings
//!
//! Embeddings come from an Ollama-compatible server. Query embeddings are
//! cached (LRU, 1 hour TTL). When the server cannot be reached the memory
//! layer falls back to `HashingEmbedder`, a lexical feature-hashing model.

use anyhow::{Context, Result};
use async_trait::async_trait;
use moka::future::Cache;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::{debug, info};

/// Anything that turns text into a vector
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
    fn dimension(&self) -> usize;
    fn model_name(&self) -> &str;
}

/// Vector width of the embedding models Eva is deployed with
pub fn model_dimension(model: &str) -> usize {
    match model {
        "all-minilm" | "all-minilm-l6-v2" | "all-MiniLM-L6-v2" => 384,
        "mxbai-embed-large" => 1024,
        // nomic-embed-text, all-mpnet-base-v2
        _ => 768,
    }
}

/// Cosine of the angle between `a` and `b`; 0.0 for mismatched or zero vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let (dot, aa, bb) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(dot, aa, bb), (x, y)| {
            (dot + x * y, aa + x * x, bb + y * y)
        });
    let denom = (aa * bb).sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

#[derive(Debug, Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f32>,
}

/// Ollama-backed embedding model
pub struct EmbeddingModel {
    url: String,
    model: String,
    dimension: usize,
    client: reqwest::Client,
    cache: Cache<String, Vec<f32>>,
}

impl EmbeddingModel {
    pub fn new(url: &str, model: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let cache = Cache::builder()
            .max_capacity(1000)
            .time_to_live(Duration::from_secs(3600))
            .build();

        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            dimension: model_dimension(model),
            client,
            cache,
        })
    }

    /// Create and verify the server answers
    pub async fn load(url: &str, model: &str) -> Result<Self> {
        let embedder = Self::new(url, model)?;
        if !embedder.check_availability().await {
            anyhow::bail!("Embedding server unreachable at {}", embedder.url);
        }
        info!("Embedding model ready: {} @ {}", model, embedder.url);
        Ok(embedder)
    }

    pub async fn check_availability(&self) -> bool {
        match self
            .client
            .get(format!("{}/api/tags", self.url))
            .timeout(Duration::from_secs(2))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    async fn embed_uncached(&self, text: &str) -> Result<Vec<f32>> {
        let response = self
            .client
            .post(format!("{}/api/embeddings", self.url))
            .json(&serde_json::json!({
                "model": self.model,
                "prompt": text
            }))
            .send()
            .await
            .with_context(|| format!("Embedding request to {} failed", self.url))?;

        if !response.status().is_success() {
            let status = response.status();
            anyhow::bail!("Ollama returned {} for {}", status, self.model);
        }

        let result: OllamaEmbeddingResponse = response
            .json()
            .await
            .context("Malformed embedding payload")?;
        Ok(result.embedding)
    }
}

#[async_trait]
impl Embedder for EmbeddingModel {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let cache_key = text.trim().to_string();

        if let Some(cached) = self.cache.get(&cache_key).await {
            debug!("Embedding cache hit");
            return Ok(cached);
        }

        let embedding = self.embed_uncached(text).await?;
        self.cache.insert(cache_key, embedding.clone()).await;
        Ok(embedding)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Feature-hashing bag of words. Deterministic and offline; similarity is
/// lexical overlap only.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub const MODEL_NAME: &'static str = "hashing-bow";

    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn bucket(&self, token: &str) -> (usize, f32) {
        let digest = Sha256::digest(token.as_bytes());
        let idx = u64::from_le_bytes([
            digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
        ]) as usize
            % self.dimension;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        (idx, sign)
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
        {
            let (idx, sign) = self.bucket(&token);
            vector[idx] += sign;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        debug!("Hashed embedding for {} chars", text.len());
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        Self::MODEL_NAME
    }
}
