//! Evaluation harness for ctxlab experiments.
//!
//! This crate provides:
//! - Response metrics: ROUGE-1/2/L, query relevance and a hallucination heuristic
//! - A [`MetricsCollector`] that aggregates everything it has scored
//! - A [`BatchEvaluator`] that runs one technique and records failures
//! - A [`PairedComparison`] engine that runs two techniques on every case and
//!   reports direction-aware improvements
//! - Typed experiment configuration and JSON persistence
//!
//! # Example
//!
//! ```rust,ignore
//! use ctxlab_eval::{MetricDirection, MetricExtractor, PairedComparison};
//!
//! let directions = [("latency_ms".to_string(), MetricDirection::Lower)].into();
//! let report = PairedComparison::new()
//!     .run(&cases, &baseline, &candidate, &[MetricExtractor::latency()], &directions)
//!     .await;
//! assert!(report.results["latency_ms"].percent_improvement > 0.0);
//! ```

pub mod batch;
pub mod comparison;
pub mod config;
pub mod error;
pub mod metrics;
pub mod persistence;
pub mod technique;

pub use batch::{BatchEvaluator, BatchReport, BatchSummary};
pub use comparison::{
    CaseRecord, MetricDirection, MetricExtractor, PairedComparison, PairedComparisonReport,
    PairedComparisonResult, SystemLabel, percent_improvement,
};
pub use config::{
    CachingConfig, CompressionConfig, EvaluationConfig, ExperimentConfig, HybridSearchConfig,
    MemoryConfig, NaiveRagConfig, RerankingConfig,
};
pub use error::{EvalError, Result};
pub use metrics::{
    AggregateMetrics, EvaluationResult, HallucinationAssessment, MetricComparison, MetricResult,
    MetricSummary, MetricsCollector, RougeScore,
};
pub use persistence::{RunHistory, RunRecord, read_json_report, write_json_report};
pub use technique::{FailureKind, FailureRecord, FnTechnique, Technique, TechniqueOutput, TestCase};
