//! Typed experiment configuration.
//!
//! One [`ExperimentConfig`] carries a section per technique. Every section has
//! working defaults, so a JSON file only needs the fields it changes.
//! [`ExperimentConfig::validate`] checks all sections in one pass and reports
//! every problem with its dotted path.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use ctxlab_rag::RagConfig;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::comparison::{MetricDirection, MetricExtractor};
use crate::error::{EvalError, Result};
use crate::metrics::{HALLUCINATION, LATENCY_MS, RELEVANCE, ROUGE_L, ROUGE1, ROUGE2};

/// Baseline retrieve-then-generate settings.
pub type NaiveRagConfig = RagConfig;

fn unit_interval(errors: &mut Vec<String>, path: &str, value: f64) {
    if !(0.0..=1.0).contains(&value) {
        errors.push(format!("{path} ({value}) must be within [0, 1]"));
    }
}

fn positive(errors: &mut Vec<String>, path: &str, value: usize) {
    if value == 0 {
        errors.push(format!("{path} must be greater than zero"));
    }
}

/// Context compression settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Fraction of context tokens to keep.
    pub target_ratio: f64,
    /// Hard cap on compressed context tokens.
    pub max_tokens: usize,
    /// Never drop sentences that mention a query term.
    pub preserve_query_terms: bool,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self { target_ratio: 0.5, max_tokens: 2048, preserve_query_terms: true }
    }
}

impl CompressionConfig {
    fn validate_into(&self, errors: &mut Vec<String>) {
        if !(self.target_ratio > 0.0 && self.target_ratio <= 1.0) {
            errors.push(format!(
                "compression.target_ratio ({}) must be within (0, 1]",
                self.target_ratio
            ));
        }
        positive(errors, "compression.max_tokens", self.max_tokens);
    }
}

/// Second-stage reranking settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankingConfig {
    /// Candidates fetched before reranking.
    pub initial_k: usize,
    /// Candidates kept after reranking.
    pub final_k: usize,
    /// Reranker model name.
    pub model: String,
}

impl Default for RerankingConfig {
    fn default() -> Self {
        Self { initial_k: 20, final_k: 5, model: "cross-encoder/ms-marco-MiniLM-L-6-v2".to_string() }
    }
}

impl RerankingConfig {
    fn validate_into(&self, errors: &mut Vec<String>) {
        positive(errors, "reranking.final_k", self.final_k);
        if self.final_k > self.initial_k {
            errors.push(format!(
                "reranking.final_k ({}) must not exceed reranking.initial_k ({})",
                self.final_k, self.initial_k
            ));
        }
        if self.model.trim().is_empty() {
            errors.push("reranking.model must not be empty".to_string());
        }
    }
}

/// Dense plus keyword retrieval settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HybridSearchConfig {
    /// Weight of the dense (embedding) score.
    pub dense_weight: f64,
    /// Weight of the sparse (keyword) score.
    pub sparse_weight: f64,
    /// Results returned after fusion.
    pub top_k: usize,
}

impl Default for HybridSearchConfig {
    fn default() -> Self {
        Self { dense_weight: 0.7, sparse_weight: 0.3, top_k: 5 }
    }
}

impl HybridSearchConfig {
    fn validate_into(&self, errors: &mut Vec<String>) {
        unit_interval(errors, "hybrid_search.dense_weight", self.dense_weight);
        unit_interval(errors, "hybrid_search.sparse_weight", self.sparse_weight);
        let total = self.dense_weight + self.sparse_weight;
        if (total - 1.0).abs() > 1e-6 {
            errors.push(format!("hybrid_search weights must sum to 1 (got {total})"));
        }
        positive(errors, "hybrid_search.top_k", self.top_k);
    }
}

/// Semantic response cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CachingConfig {
    /// Query similarity needed to reuse a cached response.
    pub similarity_threshold: f64,
    /// Cached responses kept.
    pub max_entries: usize,
    /// Seconds before a cached response expires.
    pub ttl_seconds: u64,
}

impl Default for CachingConfig {
    fn default() -> Self {
        Self { similarity_threshold: 0.95, max_entries: 1000, ttl_seconds: 3600 }
    }
}

impl CachingConfig {
    fn validate_into(&self, errors: &mut Vec<String>) {
        unit_interval(errors, "caching.similarity_threshold", self.similarity_threshold);
        positive(errors, "caching.max_entries", self.max_entries);
        if self.ttl_seconds == 0 {
            errors.push("caching.ttl_seconds must be greater than zero".to_string());
        }
    }
}

/// Conversation memory settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Turns kept verbatim.
    pub window_size: usize,
    /// Turns kept in total before the oldest are dropped.
    pub max_turns: usize,
    /// Token count that triggers summarisation of older turns.
    pub summary_threshold_tokens: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self { window_size: 5, max_turns: 20, summary_threshold_tokens: 2000 }
    }
}

impl MemoryConfig {
    fn validate_into(&self, errors: &mut Vec<String>) {
        positive(errors, "memory.window_size", self.window_size);
        if self.window_size > self.max_turns {
            errors.push(format!(
                "memory.window_size ({}) must not exceed memory.max_turns ({})",
                self.window_size, self.max_turns
            ));
        }
        positive(errors, "memory.summary_threshold_tokens", self.summary_threshold_tokens);
    }
}

/// Settings shared by batch and paired evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Metrics to report.
    pub metrics: Vec<String>,
    /// Direction per metric; unlisted metrics are higher-is-better.
    pub directions: BTreeMap<String, MetricDirection>,
    /// Per-call timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// Randomize A/B order per test case.
    pub randomize_order: bool,
    /// Seed for the order randomization.
    pub seed: Option<u64>,
    /// Directory reports are written to.
    pub output_dir: PathBuf,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            metrics: [ROUGE1, ROUGE2, ROUGE_L, RELEVANCE, HALLUCINATION, LATENCY_MS]
                .map(str::to_string)
                .to_vec(),
            directions: BTreeMap::from([
                (HALLUCINATION.to_string(), MetricDirection::Lower),
                (LATENCY_MS.to_string(), MetricDirection::Lower),
            ]),
            timeout_secs: Some(60),
            randomize_order: true,
            seed: None,
            output_dir: PathBuf::from("results"),
        }
    }
}

impl EvaluationConfig {
    /// The per-call timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// One extractor per listed metric, in order and without repeats.
    ///
    /// `latency_ms` reads the output latency; every other name reads the
    /// technique-reported metric of that name.
    pub fn extractors(&self) -> Vec<MetricExtractor> {
        let mut seen = BTreeSet::new();
        self.metrics
            .iter()
            .filter(|name| seen.insert(name.as_str()))
            .map(|name| match name.as_str() {
                LATENCY_MS => MetricExtractor::latency(),
                other => MetricExtractor::field(other),
            })
            .collect()
    }

    /// Where a report called `file_name` is written.
    pub fn report_path(&self, file_name: impl AsRef<Path>) -> PathBuf {
        self.output_dir.join(file_name)
    }

    fn validate_into(&self, errors: &mut Vec<String>) {
        if self.metrics.is_empty() {
            errors.push("evaluation.metrics must list at least one metric".to_string());
        }
        for name in &self.metrics {
            if name.trim().is_empty() {
                errors.push("evaluation.metrics must not contain empty names".to_string());
            }
        }
        if self.timeout_secs == Some(0) {
            errors.push("evaluation.timeout_secs must be greater than zero when set".to_string());
        }
        if self.output_dir.as_os_str().is_empty() {
            errors.push("evaluation.output_dir must not be empty".to_string());
        }
    }
}

/// Configuration for a full experiment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Experiment name used in reports.
    pub name: String,
    /// Baseline retrieval settings.
    pub naive_rag: NaiveRagConfig,
    /// Compression settings.
    pub compression: CompressionConfig,
    /// Reranking settings.
    pub reranking: RerankingConfig,
    /// Hybrid search settings.
    pub hybrid_search: HybridSearchConfig,
    /// Response cache settings.
    pub caching: CachingConfig,
    /// Conversation memory settings.
    pub memory: MemoryConfig,
    /// Evaluation settings.
    pub evaluation: EvaluationConfig,
}

impl ExperimentConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| EvalError::io(path, e))?;
        let config = Self::from_json_str(&text)?;
        info!(path = %path.display(), name = %config.name, "loaded experiment config");
        Ok(config)
    }

    /// Check every section and return one message per problem.
    pub fn validate(&self) -> Vec<String> {
        let mut errors: Vec<String> = self
            .naive_rag
            .validate()
            .into_iter()
            .map(|e| format!("naive_rag.{e}"))
            .collect();
        self.compression.validate_into(&mut errors);
        self.reranking.validate_into(&mut errors);
        self.hybrid_search.validate_into(&mut errors);
        self.caching.validate_into(&mut errors);
        self.memory.validate_into(&mut errors);
        self.evaluation.validate_into(&mut errors);
        errors
    }

    /// Return the config if valid, or [`EvalError::InvalidConfig`] listing every problem.
    pub fn into_validated(self) -> Result<Self> {
        let errors = self.validate();
        if errors.is_empty() { Ok(self) } else { Err(EvalError::InvalidConfig(errors)) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(ExperimentConfig::default().validate().is_empty());
    }

    #[test]
    fn evaluation_section_drives_extractors_and_report_paths() {
        let evaluation = EvaluationConfig {
            metrics: vec!["latency_ms".into(), "accuracy".into(), "latency_ms".into()],
            output_dir: PathBuf::from("out/run-1"),
            ..Default::default()
        };
        let names: Vec<_> = evaluation.extractors().iter().map(|e| e.name().to_string()).collect();
        assert_eq!(names, vec!["latency_ms", "accuracy"]);
        assert_eq!(evaluation.report_path("paired.json"), Path::new("out/run-1/paired.json"));
    }

    #[test]
    fn every_problem_is_reported_with_its_path() {
        let mut config = ExperimentConfig::default();
        config.naive_rag.chunk_overlap = config.naive_rag.chunk_size;
        config.compression.target_ratio = 0.0;
        config.reranking.final_k = 50;
        config.hybrid_search.dense_weight = 0.9;
        config.memory.window_size = 30;
        config.evaluation.timeout_secs = Some(0);

        let errors = config.validate();
        assert_eq!(errors.len(), 6, "{errors:?}");
        assert!(errors[0].starts_with("naive_rag.chunk_overlap"));
        assert!(errors.iter().any(|e| e.starts_with("compression.target_ratio")));
        assert!(errors.iter().any(|e| e.starts_with("reranking.final_k")));
        assert!(errors.iter().any(|e| e.starts_with("hybrid_search weights")));
        assert!(errors.iter().any(|e| e.starts_with("memory.window_size")));
        assert!(errors.iter().any(|e| e.starts_with("evaluation.timeout_secs")));

        let Err(EvalError::InvalidConfig(listed)) = config.into_validated() else {
            panic!("expected InvalidConfig");
        };
        assert_eq!(listed, errors);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = ExperimentConfig::from_json_str(
            r#"{"name": "rerank-vs-naive", "reranking": {"final_k": 3}, "evaluation": {"seed": 7}}"#,
        )
        .unwrap();
        assert_eq!(config.name, "rerank-vs-naive");
        assert_eq!(config.reranking.final_k, 3);
        assert_eq!(config.reranking.initial_k, 20);
        assert_eq!(config.evaluation.seed, Some(7));
        assert_eq!(config.evaluation.directions[LATENCY_MS], MetricDirection::Lower);
        assert!(config.into_validated().is_ok());
    }

    #[test]
    fn malformed_json_is_a_serialization_error() {
        assert!(matches!(
            ExperimentConfig::from_json_str("{not json"),
            Err(EvalError::Serialization(_))
        ));
    }
}
