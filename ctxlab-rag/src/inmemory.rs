//! In-memory vector index using cosine distance.
//!
//! This module provides [`InMemoryIndex`], a [`VectorIndex`] backed by a
//! `HashMap` protected by a `tokio::sync::RwLock`. It is suitable for
//! development, testing, and small experiments.

use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::vectorstore::{IndexRecord, MetadataFilter, QueryResponse, VectorIndex, matches_filter};

/// An in-memory index with brute-force cosine search.
///
/// All operations are async-safe via `tokio::sync::RwLock`. Ties in distance are
/// broken by id so query results are deterministic.
///
/// # Example
///
/// ```rust,ignore
/// use ctxlab_rag::{InMemoryIndex, VectorIndex};
///
/// let index = InMemoryIndex::new();
/// index.upsert(records).await?;
/// ```
#[derive(Debug, Default)]
pub struct InMemoryIndex {
    records: RwLock<HashMap<String, IndexRecord>>,
}

impl InMemoryIndex {
    /// Create a new empty index.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    fn backend(&self) -> &str {
        "InMemory"
    }

    async fn upsert(&self, records: Vec<IndexRecord>) -> Result<()> {
        let mut store = self.records.write().await;
        for record in records {
            store.insert(record.id.clone(), record);
        }
        Ok(())
    }

    async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<QueryResponse> {
        let store = self.records.read().await;

        let mut scored: Vec<(f32, &IndexRecord)> = store
            .values()
            .filter(|r| filter.is_none_or(|f| matches_filter(&r.metadata, f)))
            .map(|r| (1.0 - cosine_similarity(&r.embedding, embedding), r))
            .collect();

        scored.sort_by(|a, b| {
            a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal).then_with(|| a.1.id.cmp(&b.1.id))
        });
        scored.truncate(top_k);

        let mut response = QueryResponse::default();
        for (distance, record) in scored {
            response.ids.push(record.id.clone());
            response.documents.push(record.document.clone());
            response.metadatas.push(record.metadata.clone());
            response.distances.push(distance);
        }
        Ok(response)
    }

    async fn get(&self, ids: &[String]) -> Result<Vec<IndexRecord>> {
        let store = self.records.read().await;
        Ok(ids.iter().filter_map(|id| store.get(id).cloned()).collect())
    }

    async fn find_ids(&self, filter: &MetadataFilter) -> Result<Vec<String>> {
        let store = self.records.read().await;
        let mut ids: Vec<String> = store
            .values()
            .filter(|r| matches_filter(&r.metadata, filter))
            .map(|r| r.id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn delete(&self, ids: &[String]) -> Result<usize> {
        let mut store = self.records.write().await;
        Ok(ids.iter().filter(|id| store.remove(id.as_str()).is_some()).count())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.records.read().await.len())
    }

    async fn clear(&self) -> Result<()> {
        self.records.write().await.clear();
        Ok(())
    }
}
