//! Vector store abstraction over an external nearest-neighbour index.
//!
//! [`VectorIndex`] is the narrow contract the concrete index must satisfy:
//! primitive metadata only, cosine distance, parallel-array query results.
//! [`VectorStore`] layers text embedding, input validation, metadata
//! flattening and distance-to-similarity conversion on top of it.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info};

use crate::config::RagConfig;
use crate::document::{Chunk, Metadata, SearchResult, content_id};
use crate::embedding::EmbeddingProvider;
use crate::embedding_cache::{CacheStats, CachedEmbeddingService, EmbeddingServiceCache, lock};
use crate::error::{RagError, Result};

/// A metadata value the index can store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    /// Boolean flag.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// Text.
    Str(String),
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&MetadataValue> for Value {
    fn from(value: &MetadataValue) -> Self {
        match value {
            MetadataValue::Bool(b) => Value::Bool(*b),
            MetadataValue::Int(i) => Value::from(*i),
            MetadataValue::Float(f) => Value::from(*f),
            MetadataValue::Str(s) => Value::String(s.clone()),
        }
    }
}

/// Primitive-only metadata as stored by the index.
pub type IndexMetadata = BTreeMap<String, MetadataValue>;

/// Equality filter: every listed key must match exactly.
pub type MetadataFilter = BTreeMap<String, MetadataValue>;

fn flatten_value(value: &Value) -> MetadataValue {
    match value {
        Value::String(s) => MetadataValue::Str(s.clone()),
        Value::Bool(b) => MetadataValue::Bool(*b),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => MetadataValue::Int(i),
            (None, Some(f)) => MetadataValue::Float(f),
            (None, None) => MetadataValue::Str(n.to_string()),
        },
        Value::Array(items) => MetadataValue::Str(
            items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(", "),
        ),
        other => MetadataValue::Str(other.to_string()),
    }
}

/// Reduce arbitrary JSON metadata to primitives.
///
/// Lists become `", "`-joined strings; nulls and objects are stringified.
pub fn sanitize_metadata(metadata: &Metadata) -> IndexMetadata {
    metadata.iter().map(|(k, v)| (k.clone(), flatten_value(v))).collect()
}

fn to_metadata(metadata: &IndexMetadata) -> Metadata {
    metadata.iter().map(|(k, v)| (k.clone(), Value::from(v))).collect()
}

/// Whether `metadata` satisfies every entry in `filter`.
pub fn matches_filter(metadata: &IndexMetadata, filter: &MetadataFilter) -> bool {
    filter.iter().all(|(key, expected)| metadata.get(key) == Some(expected))
}

/// A record as written to the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    /// Record identifier.
    pub id: String,
    /// Stored text.
    pub document: String,
    /// Embedding of `document`.
    pub embedding: Vec<f32>,
    /// Primitive metadata.
    pub metadata: IndexMetadata,
}

/// Nearest-neighbour results as parallel arrays of equal length.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResponse {
    /// Record identifiers.
    pub ids: Vec<String>,
    /// Record texts.
    pub documents: Vec<String>,
    /// Record metadata.
    pub metadatas: Vec<IndexMetadata>,
    /// Cosine distances, ascending.
    pub distances: Vec<f32>,
}

impl QueryResponse {
    fn is_consistent(&self) -> bool {
        let n = self.ids.len();
        self.documents.len() == n && self.metadatas.len() == n && self.distances.len() == n
    }
}

/// The external nearest-neighbour index.
///
/// Distances are cosine distances (`1 - cosine similarity`).
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Backend name for errors and stats.
    fn backend(&self) -> &str;

    /// Insert or replace records by id.
    async fn upsert(&self, records: Vec<IndexRecord>) -> Result<()>;

    /// Return up to `top_k` records closest to `embedding`, nearest first.
    async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<QueryResponse>;

    /// Fetch records by id, skipping unknown ids.
    async fn get(&self, ids: &[String]) -> Result<Vec<IndexRecord>>;

    /// Ids of every record matching `filter`.
    async fn find_ids(&self, filter: &MetadataFilter) -> Result<Vec<String>>;

    /// Delete records by id, returning how many existed.
    async fn delete(&self, ids: &[String]) -> Result<usize>;

    /// Number of stored records.
    async fn count(&self) -> Result<usize>;

    /// Remove every record.
    async fn clear(&self) -> Result<()>;
}

/// Snapshot returned by [`VectorStore::get_stats`].
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    /// Logical collection name.
    pub collection: String,
    /// Index backend name.
    pub backend: String,
    /// Stored records.
    pub count: usize,
    /// Embedding model name.
    pub embedding_model: String,
    /// Embedding dimensionality.
    pub dimensions: usize,
    /// Embedding cache statistics.
    pub cache: CacheStats,
}

/// Similarity search over text, backed by a [`VectorIndex`].
///
/// # Example
///
/// ```rust,ignore
/// use ctxlab_rag::{VectorStore, InMemoryIndex};
///
/// let store = VectorStore::new("docs", Arc::new(InMemoryIndex::new()), embeddings);
/// let ids = store.add(&texts, None, None).await?;
/// let hits = store.search("query", 5, 0.3, None).await?;
/// ```
pub struct VectorStore {
    collection: String,
    index: Arc<dyn VectorIndex>,
    embeddings: Arc<CachedEmbeddingService>,
}

impl fmt::Debug for VectorStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VectorStore")
            .field("collection", &self.collection)
            .field("backend", &self.index.backend())
            .field("embeddings", &self.embeddings)
            .finish()
    }
}

impl VectorStore {
    /// Create a store for `collection` over `index`, embedding with `embeddings`.
    pub fn new(
        collection: impl Into<String>,
        index: Arc<dyn VectorIndex>,
        embeddings: Arc<CachedEmbeddingService>,
    ) -> Self {
        Self { collection: collection.into(), index, embeddings }
    }

    /// Create a store for the configured collection, embedding with the
    /// configured model served by `services`.
    ///
    /// # Errors
    ///
    /// Propagates model load failures from `services`.
    pub async fn from_config(
        config: &RagConfig,
        index: Arc<dyn VectorIndex>,
        services: &EmbeddingServiceCache,
    ) -> Result<Self> {
        let embeddings = services.get_service(&config.embedding_model).await?;
        Ok(Self::new(config.collection.clone(), index, embeddings))
    }

    /// Logical collection name.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// The embedding service used for documents and queries.
    pub fn embeddings(&self) -> &Arc<CachedEmbeddingService> {
        &self.embeddings
    }

    fn index_error(&self, operation: &str, e: RagError) -> RagError {
        error!(collection = %self.collection, operation, error = %e, "vector index operation failed");
        match e {
            RagError::VectorStoreError { .. } => e,
            other => RagError::VectorStoreError {
                backend: self.index.backend().to_string(),
                message: format!("{operation} failed: {other}"),
            },
        }
    }

    fn embedding_error(&self, operation: &str, e: RagError) -> RagError {
        error!(collection = %self.collection, operation, error = %e, "embedding unavailable, index untouched");
        e
    }

    /// Embed and store `texts`.
    ///
    /// When `ids` is omitted, each id is derived from the text's content hash
    /// and its position in the batch.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ValidationError`] before writing anything if `ids` or
    /// `metadatas` is supplied with a length different from `texts`,
    /// [`RagError::EmbeddingError`] without writing anything if the texts cannot
    /// be embedded, and [`RagError::VectorStoreError`] if the index rejects the write.
    pub async fn add(
        &self,
        texts: &[String],
        metadatas: Option<&[Metadata]>,
        ids: Option<&[String]>,
    ) -> Result<Vec<String>> {
        if let Some(ids) = ids {
            if ids.len() != texts.len() {
                return Err(RagError::ValidationError(format!(
                    "ids length ({}) does not match texts length ({})",
                    ids.len(),
                    texts.len()
                )));
            }
        }
        if let Some(metadatas) = metadatas {
            if metadatas.len() != texts.len() {
                return Err(RagError::ValidationError(format!(
                    "metadatas length ({}) does not match texts length ({})",
                    metadatas.len(),
                    texts.len()
                )));
            }
        }
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = match ids {
            Some(ids) => ids.to_vec(),
            None => texts
                .iter()
                .enumerate()
                .map(|(i, text)| format!("{}_{i}", &content_id(text)[..16]))
                .collect(),
        };

        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let embeddings = self
            .embeddings
            .try_embed_texts(&refs)
            .await
            .map_err(|e| self.embedding_error("add", e))?;

        let records = ids
            .iter()
            .zip(texts)
            .zip(embeddings)
            .enumerate()
            .map(|(i, ((id, text), embedding))| IndexRecord {
                id: id.clone(),
                document: text.clone(),
                embedding,
                metadata: metadatas.map(|m| sanitize_metadata(&m[i])).unwrap_or_default(),
            })
            .collect();

        self.index.upsert(records).await.map_err(|e| self.index_error("add", e))?;
        info!(collection = %self.collection, added = ids.len(), "added records");
        Ok(ids)
    }

    /// Store chunks under their own ids and metadata.
    pub async fn add_chunks(&self, chunks: &[Chunk]) -> Result<Vec<String>> {
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let metadatas: Vec<Metadata> = chunks.iter().map(|c| c.metadata.clone()).collect();
        let ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
        self.add(&texts, Some(&metadatas), Some(&ids)).await
    }

    /// Search for records similar to `query`.
    ///
    /// Fetches `top_k` nearest candidates, converts each cosine distance to
    /// `similarity = 1 - distance` clamped to `[0, 1]`, then drops candidates
    /// below `similarity_threshold`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ValidationError`] for a threshold outside `[0, 1]`,
    /// [`RagError::EmbeddingError`] if the query cannot be embedded, and
    /// [`RagError::VectorStoreError`] if the index fails or answers with
    /// mismatched arrays.
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        similarity_threshold: f32,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchResult>> {
        if !(0.0..=1.0).contains(&similarity_threshold) {
            return Err(RagError::ValidationError(format!(
                "similarity_threshold ({similarity_threshold}) must be within [0, 1]"
            )));
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let embedding = self
            .embeddings
            .try_embed_text(query)
            .await
            .map_err(|e| self.embedding_error("search", e))?;
        let response = self
            .index
            .query(&embedding, top_k, filter)
            .await
            .map_err(|e| self.index_error("search", e))?;
        if !response.is_consistent() {
            return Err(self.index_error(
                "search",
                RagError::VectorStoreError {
                    backend: self.index.backend().to_string(),
                    message: "query returned arrays of unequal length".to_string(),
                },
            ));
        }

        let candidates = response.ids.len();
        let results: Vec<SearchResult> = response
            .ids
            .into_iter()
            .zip(response.documents)
            .zip(response.metadatas)
            .zip(response.distances)
            .map(|(((id, text), metadata), distance)| SearchResult {
                id,
                text,
                metadata: to_metadata(&metadata),
                score: (1.0 - distance).clamp(0.0, 1.0),
            })
            .filter(|r| r.score >= similarity_threshold)
            .collect();

        debug!(
            collection = %self.collection,
            candidates,
            returned = results.len(),
            similarity_threshold,
            "search completed"
        );
        Ok(results)
    }

    /// Fetch records directly by id; each result has score `1.0`.
    pub async fn get_by_ids(&self, ids: &[String]) -> Result<Vec<SearchResult>> {
        let records = self.index.get(ids).await.map_err(|e| self.index_error("get", e))?;
        Ok(records
            .into_iter()
            .map(|r| SearchResult {
                id: r.id,
                text: r.document,
                metadata: to_metadata(&r.metadata),
                score: 1.0,
            })
            .collect())
    }

    /// Delete records by id, returning how many were removed.
    pub async fn delete_by_ids(&self, ids: &[String]) -> Result<usize> {
        let removed = self.index.delete(ids).await.map_err(|e| self.index_error("delete", e))?;
        info!(collection = %self.collection, removed, "deleted records by id");
        Ok(removed)
    }

    /// Delete every record matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ValidationError`] for an empty filter; clearing the
    /// collection must go through [`clear`](Self::clear).
    pub async fn delete_by_metadata(&self, filter: &MetadataFilter) -> Result<usize> {
        if filter.is_empty() {
            return Err(RagError::ValidationError(
                "delete_by_metadata requires a non-empty filter; use clear() to remove everything"
                    .to_string(),
            ));
        }
        let ids = self.index.find_ids(filter).await.map_err(|e| self.index_error("find", e))?;
        if ids.is_empty() {
            return Ok(0);
        }
        self.delete_by_ids(&ids).await
    }

    /// Number of stored records.
    pub async fn count(&self) -> Result<usize> {
        self.index.count().await.map_err(|e| self.index_error("count", e))
    }

    /// Remove every record.
    pub async fn clear(&self) -> Result<()> {
        self.index.clear().await.map_err(|e| self.index_error("clear", e))?;
        info!(collection = %self.collection, "cleared collection");
        Ok(())
    }

    /// Collection, index and embedding cache statistics.
    pub async fn get_stats(&self) -> Result<StoreStats> {
        Ok(StoreStats {
            collection: self.collection.clone(),
            backend: self.index.backend().to_string(),
            count: self.count().await?,
            embedding_model: self.embeddings.model_name().to_string(),
            dimensions: EmbeddingProvider::dimensions(self.embeddings.as_ref()),
            cache: self.embeddings.stats(),
        })
    }
}

/// Parameters a [`VectorStoreRegistry`] pins on first use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorStoreSettings {
    /// Logical collection name.
    pub collection: String,
    /// Embedding model name.
    pub embedding_model: String,
}

/// Owns the process's [`VectorStore`], pinned to the settings of its first use.
///
/// A later request with the same settings returns the same store; a request
/// with different settings is rejected rather than silently replacing it. Tests
/// start over by constructing a fresh registry.
#[derive(Default)]
pub struct VectorStoreRegistry {
    pinned: Mutex<Option<(VectorStoreSettings, Arc<VectorStore>)>>,
}

impl VectorStoreSettings {
    /// The collection and embedding model named by `config`.
    pub fn from_config(config: &RagConfig) -> Self {
        Self { collection: config.collection.clone(), embedding_model: config.embedding_model.clone() }
    }
}

impl VectorStoreRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the pinned store, building it with `build` on first use.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if a store is already pinned with
    /// different settings, or whatever `build` returns.
    pub fn get_or_init<F>(&self, settings: VectorStoreSettings, build: F) -> Result<Arc<VectorStore>>
    where
        F: FnOnce(&VectorStoreSettings) -> Result<VectorStore>,
    {
        let mut pinned = lock(&self.pinned);
        if let Some((existing, store)) = pinned.as_ref() {
            if *existing == settings {
                return Ok(Arc::clone(store));
            }
            return Err(RagError::ConfigError(format!(
                "vector store already initialised with collection '{}' and model '{}'; \
                 refusing re-initialisation with collection '{}' and model '{}'",
                existing.collection,
                existing.embedding_model,
                settings.collection,
                settings.embedding_model
            )));
        }
        let store = Arc::new(build(&settings)?);
        *pinned = Some((settings, Arc::clone(&store)));
        Ok(store)
    }

    /// The pinned store, if any.
    pub fn get(&self) -> Option<Arc<VectorStore>> {
        lock(&self.pinned).as_ref().map(|(_, store)| Arc::clone(store))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn sanitize_flattens_lists_and_stringifies_composites() {
        let mut metadata = Metadata::new();
        metadata.insert("tags".into(), json!(["rust", "rag", 3]));
        metadata.insert("page".into(), json!(4));
        metadata.insert("ratio".into(), json!(0.25));
        metadata.insert("draft".into(), json!(false));
        metadata.insert("extra".into(), json!({"k": "v"}));
        metadata.insert("missing".into(), Value::Null);

        let flat = sanitize_metadata(&metadata);
        assert_eq!(flat["tags"], MetadataValue::Str("rust, rag, 3".into()));
        assert_eq!(flat["page"], MetadataValue::Int(4));
        assert_eq!(flat["ratio"], MetadataValue::Float(0.25));
        assert_eq!(flat["draft"], MetadataValue::Bool(false));
        assert_eq!(flat["extra"], MetadataValue::Str("{\"k\":\"v\"}".into()));
        assert_eq!(flat["missing"], MetadataValue::Str("null".into()));
    }

    #[test]
    fn filter_requires_every_key() {
        let mut metadata = IndexMetadata::new();
        metadata.insert("source".into(), "a.txt".into());
        metadata.insert("page".into(), MetadataValue::Int(1));

        let mut filter = MetadataFilter::new();
        filter.insert("source".into(), "a.txt".into());
        assert!(matches_filter(&metadata, &filter));
        filter.insert("page".into(), MetadataValue::Int(2));
        assert!(!matches_filter(&metadata, &filter));
    }
}
