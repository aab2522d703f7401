//! LRU-cached embedding services.
//!
//! Two cache layers live here:
//!
//! - [`CachedEmbeddingService`] memoises vectors per exact input text for one model.
//! - [`EmbeddingServiceCache`] keeps at most `max_models` services alive, evicting
//!   the least recently used one and releasing its model before loading another.
//!
//! On the lookup paths embedding failures are soft: the service logs them and
//! answers with a zero vector of the model's dimensionality. The `try_` variants
//! report the same failures as errors for callers that must not store or query
//! with a placeholder. Model load failures are always hard.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use lru::LruCache;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::RagConfig;
use crate::embedding::{EmbeddingModelLoader, EmbeddingProvider};
use crate::error::{RagError, Result};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Point-in-time statistics of a [`CachedEmbeddingService`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    /// Model served by this cache.
    pub model_name: String,
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that required the model.
    pub misses: u64,
    /// Entries dropped to make room.
    pub evictions: u64,
    /// Entries currently cached.
    pub size: usize,
    /// Maximum number of entries.
    pub capacity: usize,
    /// `hits / (hits + misses)`, or `0.0` before any lookup.
    pub hit_rate: f64,
    /// Whether the model handle is still held.
    pub model_loaded: bool,
}

struct CacheState {
    entries: LruCache<String, Vec<f32>>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl CacheState {
    fn insert(&mut self, text: String, vector: Vec<f32>) {
        if let Some((evicted, _)) = self.entries.push(text.clone(), vector) {
            if evicted != text {
                self.evictions += 1;
                debug!(evicted_len = evicted.len(), "evicted least recently used embedding");
            }
        }
    }
}

/// An embedding model wrapped with a per-text LRU cache.
///
/// All cache mutations happen under one mutex which is never held across the
/// model call.
///
/// # Example
///
/// ```rust,ignore
/// use ctxlab_rag::CachedEmbeddingService;
///
/// let service = CachedEmbeddingService::new("mini-lm", Arc::new(model), 1024)?;
/// let vector = service.embed_text("hello").await;
/// let again = service.embed_text("hello").await; // served from cache
/// ```
pub struct CachedEmbeddingService {
    model_name: String,
    dimensions: usize,
    model: Mutex<Option<Arc<dyn EmbeddingProvider>>>,
    state: Mutex<CacheState>,
}

impl std::fmt::Debug for CachedEmbeddingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedEmbeddingService")
            .field("model_name", &self.model_name)
            .field("dimensions", &self.dimensions)
            .finish_non_exhaustive()
    }
}

impl CachedEmbeddingService {
    /// Wrap `model` with a cache holding up to `cache_size` vectors.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if `cache_size` is zero.
    pub fn new(
        model_name: impl Into<String>,
        model: Arc<dyn EmbeddingProvider>,
        cache_size: usize,
    ) -> Result<Self> {
        let capacity = NonZeroUsize::new(cache_size).ok_or_else(|| {
            RagError::ConfigError("embedding cache_size must be greater than zero".to_string())
        })?;
        Ok(Self {
            model_name: model_name.into(),
            dimensions: model.dimensions(),
            model: Mutex::new(Some(model)),
            state: Mutex::new(CacheState {
                entries: LruCache::new(capacity),
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
        })
    }

    /// Name of the wrapped model.
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    fn zero_vector(&self) -> Vec<f32> {
        vec![0.0; self.dimensions]
    }

    fn model(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        lock(&self.model).clone().ok_or_else(|| self.failure("model was released by cleanup"))
    }

    fn failure(&self, message: impl Into<String>) -> RagError {
        RagError::EmbeddingError { provider: self.model_name.clone(), message: message.into() }
    }

    /// Embed one text, consulting the cache first.
    ///
    /// A hit promotes the entry to most recently used. A miss calls the model and
    /// caches the result. Failures yield a zero vector and are not cached.
    pub async fn embed_text(&self, text: &str) -> Vec<f32> {
        match self.try_embed_text(text).await {
            Ok(vector) => vector,
            Err(e) => {
                warn!(model = %self.model_name, error = %e, "embedding failed, returning zero vector");
                self.zero_vector()
            }
        }
    }

    /// Embed one text like [`embed_text`](Self::embed_text), but report failures.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmbeddingError`] if the model fails, returns a vector
    /// of the wrong dimensionality, or was released by [`cleanup`](Self::cleanup).
    pub async fn try_embed_text(&self, text: &str) -> Result<Vec<f32>> {
        {
            let mut state = lock(&self.state);
            if let Some(vector) = state.entries.get(text).cloned() {
                state.hits += 1;
                return Ok(vector);
            }
            state.misses += 1;
        }

        let vector = self.model()?.embed(text).await.map_err(|e| self.wrap(e))?;
        if vector.len() != self.dimensions {
            return Err(self.failure(format!(
                "expected {} dimensions, model returned {}",
                self.dimensions,
                vector.len()
            )));
        }
        lock(&self.state).insert(text.to_string(), vector.clone());
        Ok(vector)
    }

    fn wrap(&self, e: RagError) -> RagError {
        match e {
            RagError::EmbeddingError { .. } => e,
            other => self.failure(other.to_string()),
        }
    }

    /// Serve cached texts and compute the rest in one batched call.
    ///
    /// Slots stay `None` for texts the model did not produce; the error says why.
    async fn lookup_batch(&self, texts: &[&str]) -> (Vec<Option<Vec<f32>>>, Result<()>) {
        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut pending: Vec<&str> = Vec::new();
        let mut pending_slots: Vec<Vec<usize>> = Vec::new();

        {
            let mut state = lock(&self.state);
            let mut slot_of: HashMap<&str, usize> = HashMap::new();
            for (i, text) in texts.iter().enumerate() {
                if let Some(vector) = state.entries.get(*text).cloned() {
                    state.hits += 1;
                    results[i] = Some(vector);
                    continue;
                }
                state.misses += 1;
                match slot_of.get(text) {
                    Some(&slot) => pending_slots[slot].push(i),
                    None => {
                        slot_of.insert(*text, pending.len());
                        pending.push(*text);
                        pending_slots.push(vec![i]);
                    }
                }
            }
        }

        if pending.is_empty() {
            return (results, Ok(()));
        }
        debug!(model = %self.model_name, uncached = pending.len(), total = texts.len(), "embedding batch");

        let model = match self.model() {
            Ok(model) => model,
            Err(e) => return (results, Err(e)),
        };
        let vectors = match model.embed_batch(&pending).await {
            Ok(vectors) => vectors,
            Err(e) => return (results, Err(self.wrap(e))),
        };
        if vectors.len() != pending.len() || vectors.iter().any(|v| v.len() != self.dimensions) {
            let message = format!(
                "batch of {} returned {} vectors, expected {} dimensions each",
                pending.len(),
                vectors.len(),
                self.dimensions
            );
            return (results, Err(self.failure(message)));
        }

        let mut state = lock(&self.state);
        for ((text, slots), vector) in pending.iter().zip(&pending_slots).zip(vectors) {
            for &slot in slots {
                results[slot] = Some(vector.clone());
            }
            state.insert(text.to_string(), vector);
        }
        (results, Ok(()))
    }

    /// Embed many texts, computing all cache misses in one batched model call.
    ///
    /// Results come back in input order. Duplicate uncached texts are computed once.
    /// If the model fails, uncached texts get zero vectors.
    pub async fn embed_texts(&self, texts: &[&str]) -> Vec<Vec<f32>> {
        let (results, outcome) = self.lookup_batch(texts).await;
        if let Err(e) = outcome {
            warn!(model = %self.model_name, error = %e, "batch embedding failed, returning zero vectors");
        }
        results.into_iter().map(|v| v.unwrap_or_else(|| self.zero_vector())).collect()
    }

    /// Embed many texts like [`embed_texts`](Self::embed_texts), but report failures.
    ///
    /// Vectors computed before a failure are not cached partially: either the
    /// whole uncached batch is stored or none of it is.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmbeddingError`] if any uncached text cannot be embedded.
    pub async fn try_embed_texts(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let (results, outcome) = self.lookup_batch(texts).await;
        outcome?;
        results
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| self.failure("batch left texts unembedded"))
    }

    /// Whether `text` is cached, without touching recency.
    pub fn is_cached(&self, text: &str) -> bool {
        lock(&self.state).entries.contains(text)
    }

    /// Cached texts from most to least recently used.
    pub fn cached_texts(&self) -> Vec<String> {
        lock(&self.state).entries.iter().map(|(k, _)| k.clone()).collect()
    }

    /// Current cache statistics.
    pub fn stats(&self) -> CacheStats {
        let state = lock(&self.state);
        let lookups = state.hits + state.misses;
        CacheStats {
            model_name: self.model_name.clone(),
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            size: state.entries.len(),
            capacity: state.entries.cap().get(),
            hit_rate: if lookups == 0 { 0.0 } else { state.hits as f64 / lookups as f64 },
            model_loaded: lock(&self.model).is_some(),
        }
    }

    /// Drop every cached vector, keeping counters and the model.
    pub fn clear_cache(&self) {
        lock(&self.state).entries.clear();
    }

    /// Release resources: clear the cache and drop the model handle.
    pub fn cleanup(&self) {
        self.clear_cache();
        lock(&self.model).take();
        info!(model = %self.model_name, "released embedding model");
    }
}

#[async_trait]
impl EmbeddingProvider for CachedEmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_text(text).await)
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(self.embed_texts(texts).await)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Keeps one [`CachedEmbeddingService`] per model name, bounded by LRU.
///
/// When a new model is requested at capacity, the least recently used service is
/// evicted and its [`cleanup`](CachedEmbeddingService::cleanup) runs before the new
/// model is loaded, so at most `max_models` models are ever resident.
pub struct EmbeddingServiceCache {
    loader: Arc<dyn EmbeddingModelLoader>,
    cache_size: usize,
    services: tokio::sync::Mutex<LruCache<String, Arc<CachedEmbeddingService>>>,
}

impl EmbeddingServiceCache {
    /// Create a cache holding at most `max_models` services of `cache_size` entries each.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if either bound is zero.
    pub fn new(
        loader: Arc<dyn EmbeddingModelLoader>,
        max_models: usize,
        cache_size: usize,
    ) -> Result<Self> {
        let capacity = NonZeroUsize::new(max_models).ok_or_else(|| {
            RagError::ConfigError("max_models must be greater than zero".to_string())
        })?;
        if cache_size == 0 {
            return Err(RagError::ConfigError(
                "embedding cache_size must be greater than zero".to_string(),
            ));
        }
        Ok(Self { loader, cache_size, services: tokio::sync::Mutex::new(LruCache::new(capacity)) })
    }

    /// Create a cache bounded by `max_cached_models` and `embedding_cache_size`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if either bound is zero.
    pub fn from_config(loader: Arc<dyn EmbeddingModelLoader>, config: &RagConfig) -> Result<Self> {
        Self::new(loader, config.max_cached_models, config.embedding_cache_size)
    }

    /// Return the service for `model_name`, loading the model on first use.
    ///
    /// # Errors
    ///
    /// Propagates model load failures from the [`EmbeddingModelLoader`].
    pub async fn get_service(&self, model_name: &str) -> Result<Arc<CachedEmbeddingService>> {
        let mut services = self.services.lock().await;
        if let Some(service) = services.get(model_name) {
            return Ok(Arc::clone(service));
        }

        if services.len() >= services.cap().get() {
            if let Some((evicted_name, evicted)) = services.pop_lru() {
                evicted.cleanup();
                info!(evicted = %evicted_name, requested = model_name, "evicted embedding service");
            }
        }

        let model = self.loader.load(model_name).await?;
        let service = Arc::new(CachedEmbeddingService::new(model_name, model, self.cache_size)?);
        services.put(model_name.to_string(), Arc::clone(&service));
        info!(model = model_name, resident = services.len(), "loaded embedding service");
        Ok(service)
    }

    /// Names of resident models, most recently used first.
    pub async fn loaded_models(&self) -> Vec<String> {
        self.services.lock().await.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Statistics for every resident service, most recently used first.
    pub async fn stats(&self) -> Vec<CacheStats> {
        self.services.lock().await.iter().map(|(_, service)| service.stats()).collect()
    }

    /// Evict and clean up every resident service.
    pub async fn clear(&self) {
        let mut services = self.services.lock().await;
        while let Some((_, service)) = services.pop_lru() {
            service.cleanup();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Deterministic model: vector is `[len, first byte, calls]`-shaped.
    struct CountingModel {
        calls: AtomicUsize,
        batch_calls: AtomicUsize,
        fail_on: Option<&'static str>,
    }

    impl CountingModel {
        fn new() -> Self {
            Self { calls: AtomicUsize::new(0), batch_calls: AtomicUsize::new(0), fail_on: None }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for CountingModel {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_on == Some(text) {
                return Err(RagError::EmbeddingError {
                    provider: "counting".into(),
                    message: "boom".into(),
                });
            }
            Ok(vec![text.len() as f32, 1.0, 0.5])
        }

        async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            self.batch_calls.fetch_add(1, Ordering::SeqCst);
            if texts.iter().any(|t| self.fail_on == Some(*t)) {
                return Err(RagError::EmbeddingError {
                    provider: "counting".into(),
                    message: "batch boom".into(),
                });
            }
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0, 0.5]).collect())
        }

        fn dimensions(&self) -> usize {
            3
        }
    }

    #[tokio::test]
    async fn hit_skips_the_model() {
        let model = Arc::new(CountingModel::new());
        let service = CachedEmbeddingService::new("m", model.clone(), 4).unwrap();

        let first = service.embed_text("hello").await;
        let second = service.embed_text("hello").await;
        assert_eq!(first, second);
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);

        let stats = service.stats();
        assert_eq!((stats.hits, stats.misses, stats.size), (1, 1, 1));
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn hit_promotes_to_most_recently_used() {
        let service = CachedEmbeddingService::new("m", Arc::new(CountingModel::new()), 2).unwrap();
        service.embed_text("a").await;
        service.embed_text("b").await;
        service.embed_text("a").await;
        service.embed_text("c").await;

        assert!(service.is_cached("a"));
        assert!(!service.is_cached("b"));
        assert_eq!(service.cached_texts(), vec!["c".to_string(), "a".to_string()]);
        assert_eq!(service.stats().evictions, 1);
    }

    #[tokio::test]
    async fn failure_returns_zero_vector_and_is_not_cached() {
        let model = Arc::new(CountingModel { fail_on: Some("bad"), ..CountingModel::new() });
        let service = CachedEmbeddingService::new("m", model, 4).unwrap();
        assert_eq!(service.embed_text("bad").await, vec![0.0; 3]);
        assert!(!service.is_cached("bad"));
    }

    #[tokio::test]
    async fn batch_preserves_order_and_uses_one_call() {
        let model = Arc::new(CountingModel::new());
        let service = CachedEmbeddingService::new("m", model.clone(), 8).unwrap();
        service.embed_text("bb").await;

        let vectors = service.embed_texts(&["a", "bb", "ccc", "a"]).await;
        assert_eq!(vectors.iter().map(|v| v[0]).collect::<Vec<_>>(), vec![1.0, 2.0, 3.0, 1.0]);
        assert_eq!(model.batch_calls.load(Ordering::SeqCst), 1);
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
        assert!(service.is_cached("ccc"));
    }

    #[tokio::test]
    async fn batch_failure_zero_fills_only_uncached() {
        let model = Arc::new(CountingModel { fail_on: Some("bad"), ..CountingModel::new() });
        let service = CachedEmbeddingService::new("m", model, 8).unwrap();
        service.embed_text("ok").await;

        let vectors = service.embed_texts(&["ok", "bad"]).await;
        assert_eq!(vectors[0], vec![2.0, 1.0, 0.5]);
        assert_eq!(vectors[1], vec![0.0; 3]);
    }

    #[tokio::test]
    async fn try_variants_report_failures_instead_of_zero_vectors() {
        let model = Arc::new(CountingModel { fail_on: Some("bad"), ..CountingModel::new() });
        let service = CachedEmbeddingService::new("m", model, 8).unwrap();
        service.embed_text("ok").await;

        let err = service.try_embed_text("bad").await.unwrap_err();
        assert!(matches!(err, RagError::EmbeddingError { ref provider, .. } if provider == "m"));
        assert!(service.try_embed_texts(&["ok", "bad"]).await.is_err());
        assert!(!service.is_cached("bad"));

        let vectors = service.try_embed_texts(&["ok", "new", "new"]).await.unwrap();
        assert_eq!(vectors.len(), 3);
        assert_eq!(vectors[1], vectors[2]);
        assert!(service.is_cached("new"));
    }

    #[tokio::test]
    async fn try_embed_after_cleanup_is_an_error() {
        let service = CachedEmbeddingService::new("m", Arc::new(CountingModel::new()), 4).unwrap();
        service.cleanup();
        assert!(matches!(
            service.try_embed_text("x").await,
            Err(RagError::EmbeddingError { .. })
        ));
    }

    #[tokio::test]
    async fn cleanup_drops_model_and_cache() {
        let service = CachedEmbeddingService::new("m", Arc::new(CountingModel::new()), 4).unwrap();
        service.embed_text("x").await;
        service.cleanup();

        let stats = service.stats();
        assert_eq!(stats.size, 0);
        assert!(!stats.model_loaded);
        assert_eq!(service.embed_text("x").await, vec![0.0; 3]);
    }

    #[test]
    fn zero_cache_size_is_rejected() {
        let err = CachedEmbeddingService::new("m", Arc::new(CountingModel::new()), 0);
        assert!(matches!(err, Err(RagError::ConfigError(_))));
    }

    struct Loader {
        loads: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingModelLoader for Loader {
        async fn load(&self, model_name: &str) -> Result<Arc<dyn EmbeddingProvider>> {
            if model_name == "missing" {
                return Err(RagError::ModelLoadError {
                    model: model_name.into(),
                    message: "not found".into(),
                });
            }
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(CountingModel::new()))
        }
    }

    #[tokio::test]
    async fn service_cache_evicts_and_cleans_up_lru_model() {
        let loader = Arc::new(Loader { loads: AtomicUsize::new(0) });
        let cache = EmbeddingServiceCache::new(loader.clone(), 2, 16).unwrap();

        let a = cache.get_service("a").await.unwrap();
        let b = cache.get_service("b").await.unwrap();
        let a_again = cache.get_service("a").await.unwrap();
        assert!(Arc::ptr_eq(&a, &a_again));
        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);

        let b_stats_before = b.stats();
        assert!(b_stats_before.model_loaded);

        cache.get_service("c").await.unwrap();
        assert_eq!(cache.loaded_models().await, vec!["c".to_string(), "a".to_string()]);
        assert!(!b.stats().model_loaded);
        assert!(a.stats().model_loaded);
    }

    #[tokio::test]
    async fn model_load_failure_is_fatal() {
        let cache =
            EmbeddingServiceCache::new(Arc::new(Loader { loads: AtomicUsize::new(0) }), 1, 4).unwrap();
        let err = cache.get_service("missing").await.unwrap_err();
        assert!(matches!(err, RagError::ModelLoadError { .. }));
    }
}
