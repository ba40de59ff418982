//! Conversation Memory
//!
//! Long-term memories live in a vector store (ChromaDB in production) and are
//! searched by embedding similarity. The last few interactions per user are
//! also kept in the key-value store under `recent_context:{hash}` so the chat
//! path can build context without a vector query.
//!
//! User ids never reach either store in clear: they are replaced by
//! `hash_user_id`.

use crate::embeddings::{cosine_similarity, Embedder};
use crate::kv::SharedKv;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const COLLECTION_NAME: &str = "eva_memories";
const RECENT_CONTEXT_LEN: isize = 10;
const RECENT_CONTEXT_TTL_SECS: u64 = 86_400;

/// What kind of exchange a memory records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionType {
    Message,
    UserMessage,
    BotResponse,
    System,
    ToneChange,
    Analysis,
    Insight,
    VoiceInput,
}

impl InteractionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::UserMessage => "user_message",
            Self::BotResponse => "bot_response",
            Self::System => "system",
            Self::ToneChange => "tone_change",
            Self::Analysis => "analysis",
            Self::Insight => "insight",
            Self::VoiceInput => "voice_input",
        }
    }
}

impl fmt::Display for InteractionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Privacy-preserving user key: first 16 hex chars of sha256("eva_user_" + id)
pub fn hash_user_id(user_id: &str) -> String {
    let digest = Sha256::digest(format!("eva_user_{}", user_id).as_bytes());
    hex::encode(digest)[..16].to_string()
}

fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn memory_id(user_id: &str, text: &str, interaction_type: InteractionType, timestamp: &str) -> String {
    let head: String = text.chars().take(100).collect();
    let digest = Sha256::digest(format!("{}_{}_{}_{}", user_id, head, interaction_type, timestamp).as_bytes());
    hex::encode(digest)[..32].to_string()
}

/// Metadata stored next to each vector
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryMetadata {
    /// Hashed user id
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub interaction_type: String,
    #[serde(default)]
    pub importance: f64,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub text_length: usize,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Record written to a vector store
#[derive(Debug, Clone)]
pub struct MemoryRecord {
    pub id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub metadata: MemoryMetadata,
}

/// Record read back from a vector store
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    pub text: String,
    pub metadata: MemoryMetadata,
    /// Query distance; absent for plain listings
    pub distance: Option<f32>,
}

/// Metadata filter shared by all vector stores
#[derive(Debug, Clone, Default)]
pub struct MemoryFilter {
    pub user_id: Option<String>,
    pub min_importance: Option<f64>,
}

impl MemoryFilter {
    pub fn user(hashed_user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(hashed_user_id.into()),
            min_importance: None,
        }
    }

    pub fn min_importance(mut self, importance: f64) -> Self {
        self.min_importance = Some(importance);
        self
    }

    pub fn matches(&self, metadata: &MemoryMetadata) -> bool {
        self.user_id.as_ref().map_or(true, |u| *u == metadata.user_id)
            && self.min_importance.map_or(true, |m| metadata.importance >= m)
    }

    /// Chroma `where` clause
    fn to_where(&self) -> Option<Value> {
        let mut clauses = Vec::new();
        if let Some(user) = &self.user_id {
            clauses.push(json!({"user_id": {"$eq": user}}));
        }
        if let Some(min) = self.min_importance {
            clauses.push(json!({"importance": {"$gte": min}}));
        }
        match clauses.len() {
            0 => None,
            1 => clauses.pop(),
            _ => Some(json!({"$and": clauses})),
        }
    }
}

/// Semantic store of memories
#[async_trait]
pub trait VectorStore: Send + Sync {
    fn name(&self) -> &'static str;
    async fn add(&self, record: MemoryRecord) -> Result<()>;
    /// Nearest `n` records to `embedding` matching `filter`
    async fn query(&self, embedding: &[f32], n: usize, filter: &MemoryFilter) -> Result<Vec<VectorHit>>;
    /// Most recent `n` records matching `filter`, newest first
    async fn recent(&self, filter: &MemoryFilter, n: usize) -> Result<Vec<VectorHit>>;
    /// Delete matching records, returning how many were removed
    async fn delete(&self, filter: &MemoryFilter) -> Result<usize>;
    async fn count(&self) -> Result<usize>;
}

// ============ ChromaDB ============

#[derive(Debug, Deserialize)]
struct ChromaCollection {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ChromaQueryResponse {
    ids: Vec<Vec<String>>,
    #[serde(default)]
    documents: Option<Vec<Vec<Option<String>>>>,
    #[serde(default)]
    metadatas: Option<Vec<Vec<Option<Value>>>>,
    #[serde(default)]
    distances: Option<Vec<Vec<Option<f32>>>>,
}

#[derive(Debug, Deserialize)]
struct ChromaGetResponse {
    ids: Vec<String>,
    #[serde(default)]
    documents: Option<Vec<Option<String>>>,
    #[serde(default)]
    metadatas: Option<Vec<Option<Value>>>,
}

fn parse_metadata(value: Option<Value>) -> MemoryMetadata {
    value
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default()
}

/// ChromaDB over its REST API
pub struct ChromaStore {
    client: reqwest::Client,
    base_url: String,
    collection_id: String,
}

impl ChromaStore {
    /// Get or create the memories collection
    pub async fn connect(base_url: &str, embedding_model: &str, dimension: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;
        let base_url = base_url.trim_end_matches('/').to_string();

        let response = client
            .post(format!("{}/api/v1/collections", base_url))
            .json(&json!({
                "name": COLLECTION_NAME,
                "get_or_create": true,
                "metadata": {
                    "description": "Eva conversation memories with embeddings",
                    "embedding_model": embedding_model,
                    "embedding_dimension": dimension,
                    "hnsw:space": "cosine"
                }
            }))
            .send()
            .await
            .context("Failed to reach ChromaDB")?;

        if !response.status().is_success() {
            anyhow::bail!("ChromaDB collection setup failed: {}", response.status());
        }
        let collection: ChromaCollection = response
            .json()
            .await
            .context("Failed to parse ChromaDB collection")?;

        info!("Using ChromaDB collection {} ({})", COLLECTION_NAME, collection.id);
        Ok(Self {
            client,
            base_url,
            collection_id: collection.id,
        })
    }

    fn url(&self, op: &str) -> String {
        format!("{}/api/v1/collections/{}/{}", self.base_url, self.collection_id, op)
    }

    async fn post<T: serde::de::DeserializeOwned>(&self, op: &str, body: Value) -> Result<T> {
        let response = self
            .client
            .post(self.url(op))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("ChromaDB {} request failed", op))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("ChromaDB {} error {}: {}", op, status, text);
        }
        response
            .json()
            .await
            .with_context(|| format!("Failed to parse ChromaDB {} response", op))
    }

    async fn get(&self, filter: &MemoryFilter, include: &[&str]) -> Result<ChromaGetResponse> {
        let mut body = json!({ "include": include });
        if let Some(clause) = filter.to_where() {
            body["where"] = clause;
        }
        self.post("get", body).await
    }
}

#[async_trait]
impl VectorStore for ChromaStore {
    fn name(&self) -> &'static str {
        "chromadb"
    }

    async fn add(&self, record: MemoryRecord) -> Result<()> {
        let metadata = serde_json::to_value(&record.metadata)?;
        let _: Value = self
            .post(
                "add",
                json!({
                    "ids": [record.id],
                    "embeddings": [record.embedding],
                    "documents": [record.text],
                    "metadatas": [metadata],
                }),
            )
            .await?;
        Ok(())
    }

    async fn query(&self, embedding: &[f32], n: usize, filter: &MemoryFilter) -> Result<Vec<VectorHit>> {
        let mut body = json!({
            "query_embeddings": [embedding],
            "n_results": n,
            "include": ["documents", "metadatas", "distances"],
        });
        if let Some(clause) = filter.to_where() {
            body["where"] = clause;
        }
        let result: ChromaQueryResponse = self.post("query", body).await?;

        let ids = result.ids.into_iter().next().unwrap_or_default();
        let mut documents = result.documents.and_then(|d| d.into_iter().next()).unwrap_or_default();
        let mut metadatas = result.metadatas.and_then(|m| m.into_iter().next()).unwrap_or_default();
        let mut distances = result.distances.and_then(|d| d.into_iter().next()).unwrap_or_default();
        documents.resize(ids.len(), None);
        metadatas.resize(ids.len(), None);
        distances.resize(ids.len(), None);

        Ok(ids
            .into_iter()
            .zip(documents)
            .zip(metadatas.into_iter().zip(distances))
            .map(|((id, text), (metadata, distance))| VectorHit {
                id,
                text: text.unwrap_or_default(),
                metadata: parse_metadata(metadata),
                distance: Some(distance.unwrap_or(1.0)),
            })
            .collect())
    }

    async fn recent(&self, filter: &MemoryFilter, n: usize) -> Result<Vec<VectorHit>> {
        let result = self.get(filter, &["documents", "metadatas"]).await?;
        let len = result.ids.len();
        let mut documents = result.documents.unwrap_or_default();
        let mut metadatas = result.metadatas.unwrap_or_default();
        documents.resize(len, None);
        metadatas.resize(len, None);

        let mut hits: Vec<VectorHit> = result
            .ids
            .into_iter()
            .zip(documents.into_iter().zip(metadatas))
            .map(|(id, (text, metadata))| VectorHit {
                id,
                text: text.unwrap_or_default(),
                metadata: parse_metadata(metadata),
                distance: None,
            })
            .collect();
        hits.sort_by(|a, b| b.metadata.timestamp.cmp(&a.metadata.timestamp));
        hits.truncate(n);
        Ok(hits)
    }

    async fn delete(&self, filter: &MemoryFilter) -> Result<usize> {
        let ids = self.get(filter, &[]).await?.ids;
        if ids.is_empty() {
            return Ok(0);
        }
        let _: Value = self.post("delete", json!({ "ids": ids })).await?;
        Ok(ids.len())
    }

    async fn count(&self) -> Result<usize> {
        let response = self
            .client
            .get(self.url("count"))
            .send()
            .await
            .context("ChromaDB count request failed")?;
        if !response.status().is_success() {
            anyhow::bail!("ChromaDB count error {}", response.status());
        }
        response.json().await.context("Failed to parse ChromaDB count")
    }
}

// ============ In-process ============

/// Brute-force cosine store
#[derive(Default)]
pub struct InMemoryVectorStore {
    records: RwLock<Vec<MemoryRecord>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn hit(record: &MemoryRecord, distance: Option<f32>) -> VectorHit {
        VectorHit {
            id: record.id.clone(),
            text: record.text.clone(),
            metadata: record.metadata.clone(),
            distance,
        }
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn name(&self) -> &'static str {
        "in-memory"
    }

    async fn add(&self, record: MemoryRecord) -> Result<()> {
        let mut records = self.records.write();
        records.retain(|r| r.id != record.id);
        records.push(record);
        Ok(())
    }

    async fn query(&self, embedding: &[f32], n: usize, filter: &MemoryFilter) -> Result<Vec<VectorHit>> {
        let records = self.records.read();
        let mut hits: Vec<VectorHit> = records
            .iter()
            .filter(|r| filter.matches(&r.metadata))
            .map(|r| Self::hit(r, Some(1.0 - cosine_similarity(embedding, &r.embedding))))
            .collect();
        hits.sort_by(|a, b| a.distance.unwrap_or(1.0).total_cmp(&b.distance.unwrap_or(1.0)));
        hits.truncate(n);
        Ok(hits)
    }

    async fn recent(&self, filter: &MemoryFilter, n: usize) -> Result<Vec<VectorHit>> {
        let records = self.records.read();
        let mut hits: Vec<VectorHit> = records
            .iter()
            .filter(|r| filter.matches(&r.metadata))
            .map(|r| Self::hit(r, None))
            .collect();
        hits.sort_by(|a, b| b.metadata.timestamp.cmp(&a.metadata.timestamp));
        hits.truncate(n);
        Ok(hits)
    }

    async fn delete(&self, filter: &MemoryFilter) -> Result<usize> {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|r| !filter.matches(&r.metadata));
        Ok(before - records.len())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.records.read().len())
    }
}

// ============ Service ============

/// A memory as handed to the chat pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    #[serde(default)]
    pub id: String,
    pub text: String,
    #[serde(rename = "type", default)]
    pub interaction_type: String,
    #[serde(default)]
    pub importance: f64,
    #[serde(default)]
    pub timestamp: String,
    /// 1 - distance, only for search results
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub similarity: Option<f32>,
}

impl Memory {
    fn from_hit(hit: VectorHit) -> Self {
        Self {
            id: hit.id,
            text: hit.text,
            interaction_type: if hit.metadata.interaction_type.is_empty() {
                "unknown".to_string()
            } else {
                hit.metadata.interaction_type
            },
            importance: hit.metadata.importance,
            timestamp: hit.metadata.timestamp,
            similarity: hit.distance.map(|d| 1.0 - d),
        }
    }

    pub fn is_bot_response(&self) -> bool {
        self.interaction_type == InteractionType::BotResponse.as_str()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    pub enabled: bool,
    pub vector_store: String,
    pub collection_count: usize,
    pub embedding_model: String,
    pub kv_backend: String,
    pub stored: u64,
    pub searches: u64,
    pub failures: u64,
}

/// Vector memories plus the recent-context cache
pub struct MemoryService {
    store: Option<Arc<dyn VectorStore>>,
    kv: SharedKv,
    embedder: Arc<dyn Embedder>,
    stored: AtomicU64,
    searches: AtomicU64,
    failures: AtomicU64,
}

impl MemoryService {
    /// `store` is `None` when the vector database is unavailable; the service
    /// then only keeps recent context.
    pub fn new(store: Option<Arc<dyn VectorStore>>, kv: SharedKv, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            store,
            kv,
            embedder,
            stored: AtomicU64::new(0),
            searches: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Connect to ChromaDB, degrading to recent-context only on failure
    pub async fn connect(chroma_url: &str, kv: SharedKv, embedder: Arc<dyn Embedder>) -> Self {
        let store = match ChromaStore::connect(chroma_url, embedder.model_name(), embedder.dimension()).await {
            Ok(store) => Some(Arc::new(store) as Arc<dyn VectorStore>),
            Err(e) => {
                error!("Failed to initialize vector store: {:#}", e);
                warn!("Memory service disabled - ChromaDB not available");
                None
            }
        };
        Self::new(store, kv, embedder)
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Persist one interaction. Returns whether it reached the vector store.
    pub async fn store_memory(
        &self,
        user_id: &str,
        text: &str,
        interaction_type: InteractionType,
        importance: f64,
        metadata: Option<Map<String, Value>>,
    ) -> bool {
        let hashed = hash_user_id(user_id);
        let timestamp = now_timestamp();
        let id = memory_id(user_id, text, interaction_type, &timestamp);

        self.cache_recent(
            &hashed,
            &Memory {
                id: id.clone(),
                text: text.to_string(),
                interaction_type: interaction_type.to_string(),
                importance,
                timestamp: timestamp.clone(),
                similarity: None,
            },
        )
        .await;

        let Some(store) = &self.store else {
            debug!("Memory storage skipped - vector store not available");
            return false;
        };

        let result = async {
            let embedding = self.embedder.embed(text).await?;
            let record = MemoryRecord {
                id,
                text: text.to_string(),
                embedding,
                metadata: MemoryMetadata {
                    user_id: hashed.clone(),
                    interaction_type: interaction_type.to_string(),
                    importance,
                    timestamp,
                    text_length: text.chars().count(),
                    extra: metadata.unwrap_or_default(),
                },
            };
            store.add(record).await
        }
        .await;

        match result {
            Ok(()) => {
                self.stored.fetch_add(1, Ordering::Relaxed);
                debug!("Memory stored for user {} | {}", hashed, interaction_type);
                true
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                error!("Failed to store memory: {:#}", e);
                false
            }
        }
    }

    async fn cache_recent(&self, hashed_user: &str, memory: &Memory) {
        let key = format!("recent_context:{}", hashed_user);
        let result = async {
            let entry = serde_json::to_string(memory)?;
            self.kv.lpush(&key, &entry).await?;
            self.kv.ltrim(&key, 0, RECENT_CONTEXT_LEN - 1).await?;
            self.kv.expire(&key, RECENT_CONTEXT_TTL_SECS).await?;
            Ok::<(), anyhow::Error>(())
        }
        .await;
        if let Err(e) = result {
            debug!("Failed to cache recent memory: {:#}", e);
        }
    }

    /// Semantic search over a user's memories, most important first
    pub async fn search_memories(
        &self,
        user_id: &str,
        query: &str,
        limit: usize,
        min_importance: f64,
    ) -> Vec<Memory> {
        let Some(store) = &self.store else {
            debug!("Memory search skipped - vector store not available");
            return Vec::new();
        };
        self.searches.fetch_add(1, Ordering::Relaxed);

        let filter = MemoryFilter::user(hash_user_id(user_id)).min_importance(min_importance);
        let result = async {
            let embedding = self.embedder.embed(query).await?;
            store.query(&embedding, limit * 2, &filter).await
        }
        .await;

        match result {
            Ok(hits) => {
                let mut memories: Vec<Memory> = hits.into_iter().map(Memory::from_hit).collect();
                memories.sort_by(|a, b| {
                    b.importance
                        .total_cmp(&a.importance)
                        .then_with(|| b.timestamp.cmp(&a.timestamp))
                });
                memories.truncate(limit);
                debug!("Found {} memories for user {}", memories.len(), filter.user_id.as_deref().unwrap_or(""));
                memories
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                error!("Failed to search memories: {:#}", e);
                Vec::new()
            }
        }
    }

    /// Latest interactions, newest first
    pub async fn get_recent_context(&self, user_id: &str, limit: usize) -> Vec<Memory> {
        if limit == 0 {
            return Vec::new();
        }
        let hashed = hash_user_id(user_id);

        match self
            .kv
            .lrange(&format!("recent_context:{}", hashed), 0, limit as isize - 1)
            .await
        {
            Ok(items) if !items.is_empty() => {
                return items
                    .iter()
                    .filter_map(|item| serde_json::from_str::<Memory>(item).ok())
                    .collect();
            }
            Ok(_) => {}
            Err(e) => warn!("Recent context cache unavailable: {}", e),
        }

        let Some(store) = &self.store else {
            return Vec::new();
        };
        match store.recent(&MemoryFilter::user(hashed), limit).await {
            Ok(hits) => hits.into_iter().map(Memory::from_hit).collect(),
            Err(e) => {
                error!("Vector store fallback failed: {:#}", e);
                Vec::new()
            }
        }
    }

    /// Remove every memory and cached context for a user
    pub async fn delete_user_data(&self, user_id: &str) -> usize {
        let hashed = hash_user_id(user_id);

        if let Err(e) = self.kv.del(&[format!("recent_context:{}", hashed)]).await {
            warn!("Failed to clear recent context: {}", e);
        }

        let Some(store) = &self.store else {
            return 0;
        };
        match store.delete(&MemoryFilter::user(hashed.clone())).await {
            Ok(n) => {
                info!("Deleted {} memories for user {}", n, hashed);
                n
            }
            Err(e) => {
                error!("Failed to delete user data: {:#}", e);
                0
            }
        }
    }

    pub async fn stats(&self) -> MemoryStats {
        let collection_count = match &self.store {
            Some(store) => store.count().await.unwrap_or_else(|e| {
                warn!("Failed to count memories: {:#}", e);
                0
            }),
            None => 0,
        };
        MemoryStats {
            enabled: self.is_enabled(),
            vector_store: self.store.as_ref().map(|s| s.name()).unwrap_or("disabled").to_string(),
            collection_count,
            embedding_model: self.embedder.model_name().to_string(),
            kv_backend: self.kv.backend().to_string(),
            stored: self.stored.load(Ordering::Relaxed),
            searches: self.searches.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashingEmbedder;
    use crate::kv::InMemoryKv;

    fn service() -> MemoryService {
        MemoryService::new(
            Some(Arc::new(InMemoryVectorStore::new())),
            InMemoryKv::shared(),
            Arc::new(HashingEmbedder::default()),
        )
    }

    #[test]
    fn test_hash_user_id() {
        let hashed = hash_user_id("12345");
        assert_eq!(hashed.len(), 16);
        assert!(hashed.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hashed, hash_user_id("12345"));
        assert_ne!(hashed, hash_user_id("12346"));
    }

    #[test]
    fn test_filter_where_clause() {
        assert!(MemoryFilter::default().to_where().is_none());
        assert_eq!(
            MemoryFilter::user("abc").to_where().unwrap(),
            json!({"user_id": {"$eq": "abc"}})
        );
        let both = MemoryFilter::user("abc").min_importance(0.3).to_where().unwrap();
        assert_eq!(both["$and"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_metadata_flattens_extra_fields() {
        let mut extra = Map::new();
        extra.insert("tone".to_string(), json!("formal"));
        let metadata = MemoryMetadata {
            user_id: "u".to_string(),
            interaction_type: "message".to_string(),
            importance: 0.5,
            timestamp: "t".to_string(),
            text_length: 3,
            extra,
        };
        let value = serde_json::to_value(&metadata).unwrap();
        assert_eq!(value["tone"], "formal");
        let back: MemoryMetadata = serde_json::from_value(value).unwrap();
        assert_eq!(back.extra.get("tone"), Some(&json!("formal")));
    }

    #[tokio::test]
    async fn test_store_and_search_scoped_to_user() {
        let memory = service();
        assert!(memory.store_memory("1", "I love hiking in the alps", InteractionType::UserMessage, 0.5, None).await);
        assert!(memory.store_memory("1", "My cat is called Miso", InteractionType::UserMessage, 0.9, None).await);
        assert!(memory.store_memory("2", "hiking is boring", InteractionType::UserMessage, 0.5, None).await);

        let results = memory.search_memories("1", "hiking", 5, 0.0).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|m| !m.text.contains("boring")));
        // Ordered by importance, not similarity
        assert_eq!(results[0].text, "My cat is called Miso");
        assert!(results.iter().all(|m| m.similarity.is_some()));
    }

    #[tokio::test]
    async fn test_search_min_importance() {
        let memory = service();
        memory.store_memory("1", "low", InteractionType::Message, 0.1, None).await;
        memory.store_memory("1", "high", InteractionType::Insight, 0.8, None).await;

        let results = memory.search_memories("1", "anything", 5, 0.5).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].interaction_type, "insight");
    }

    #[tokio::test]
    async fn test_recent_context_newest_first_and_capped() {
        let memory = service();
        for i in 0..12 {
            memory.store_memory("1", &format!("message {}", i), InteractionType::UserMessage, 0.5, None).await;
        }
        let recent = memory.get_recent_context("1", 3).await;
        let texts: Vec<&str> = recent.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["message 11", "message 10", "message 9"]);
        assert_eq!(memory.get_recent_context("1", 50).await.len(), 10);
    }

    #[tokio::test]
    async fn test_recent_context_falls_back_to_vector_store() {
        let store = Arc::new(InMemoryVectorStore::new());
        let kv = InMemoryKv::shared();
        let memory = MemoryService::new(Some(store), kv.clone(), Arc::new(HashingEmbedder::default()));

        memory.store_memory("1", "first", InteractionType::UserMessage, 0.5, None).await;
        memory.store_memory("1", "second", InteractionType::BotResponse, 0.4, None).await;
        kv.del(&[format!("recent_context:{}", hash_user_id("1"))]).await.unwrap();

        let recent = memory.get_recent_context("1", 3).await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].text, "second");
        assert!(recent[0].is_bot_response());
    }

    #[tokio::test]
    async fn test_without_vector_store() {
        let memory = MemoryService::new(None, InMemoryKv::shared(), Arc::new(HashingEmbedder::default()));
        assert!(!memory.store_memory("1", "hello", InteractionType::UserMessage, 0.5, None).await);
        assert!(memory.search_memories("1", "hello", 5, 0.0).await.is_empty());
        // Recent context still works
        assert_eq!(memory.get_recent_context("1", 3).await.len(), 1);
        assert!(!memory.stats().await.enabled);
    }

    #[tokio::test]
    async fn test_delete_user_data() {
        let memory = service();
        memory.store_memory("1", "a", InteractionType::Message, 0.5, None).await;
        memory.store_memory("1", "b", InteractionType::Message, 0.5, None).await;
        memory.store_memory("2", "c", InteractionType::Message, 0.5, None).await;

        assert_eq!(memory.delete_user_data("1").await, 2);
        assert!(memory.get_recent_context("1", 3).await.is_empty());
        assert_eq!(memory.stats().await.collection_count, 1);
    }
}
