//! Property tests checking the embedding cache against a plain recency list.

use std::sync::Arc;

use async_trait::async_trait;
use ctxlab_rag::{CachedEmbeddingService, EmbeddingProvider, Result};
use proptest::prelude::*;

struct LengthModel;

#[async_trait]
impl EmbeddingProvider for LengthModel {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(vec![text.len() as f32, 1.0])
    }

    fn dimensions(&self) -> usize {
        2
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn matches_recency_model(capacity in 1usize..5, keys in proptest::collection::vec(0u8..8, 0..40)) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let service = CachedEmbeddingService::new("m", Arc::new(LengthModel), capacity).unwrap();

        // Most recently used first.
        let mut expected: Vec<String> = Vec::new();
        let mut hits = 0u64;
        for key in keys {
            let text = format!("text-{key}");
            runtime.block_on(service.embed_text(&text));
            if let Some(pos) = expected.iter().position(|t| *t == text) {
                expected.remove(pos);
                hits += 1;
            }
            expected.insert(0, text);
            expected.truncate(capacity);
        }

        prop_assert_eq!(service.cached_texts(), expected);
        prop_assert_eq!(service.stats().hits, hits);
    }
}
