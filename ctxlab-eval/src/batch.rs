//! Running one technique over a batch of test cases.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::metrics::{AggregateMetrics, EvaluationResult, MetricsCollector};
use crate::technique::{FailureRecord, Technique, TestCase, invoke};

/// Counts and aggregate metrics of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Technique evaluated.
    pub technique: String,
    /// Test cases attempted.
    pub total: usize,
    /// Test cases scored.
    pub successful: usize,
    /// Test cases that failed.
    pub failed: usize,
    /// `successful / total`, or `0.0` for an empty batch.
    pub success_rate: f64,
    /// Aggregate over the successful cases.
    pub metrics: AggregateMetrics,
}

/// Full outcome of a batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Counts and aggregates.
    pub summary: BatchSummary,
    /// Per-case results, in test case order.
    pub results: Vec<EvaluationResult>,
    /// Failed cases, in test case order.
    pub failures: Vec<FailureRecord>,
    /// When the batch started.
    pub started_at: DateTime<Utc>,
    /// When the batch finished.
    pub finished_at: DateTime<Utc>,
}

/// Evaluates a technique case by case, continuing past failures.
///
/// Successful cases are scored with, and recorded into, the shared
/// [`MetricsCollector`]; each report aggregates only its own batch.
///
/// # Example
///
/// ```rust,ignore
/// use ctxlab_eval::{BatchEvaluator, MetricsCollector};
///
/// let evaluator = BatchEvaluator::new(Arc::new(MetricsCollector::new()))
///     .with_timeout(Duration::from_secs(30));
/// let report = evaluator.run(&technique, &cases).await;
/// println!("success rate: {:.1}%", report.summary.success_rate * 100.0);
/// ```
#[derive(Debug)]
pub struct BatchEvaluator {
    collector: Arc<MetricsCollector>,
    timeout: Option<Duration>,
}

impl BatchEvaluator {
    /// Create an evaluator recording into `collector`, with no timeout.
    pub fn new(collector: Arc<MetricsCollector>) -> Self {
        Self { collector, timeout: None }
    }

    /// Limit each technique call to `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The shared collector.
    pub fn collector(&self) -> &Arc<MetricsCollector> {
        &self.collector
    }

    /// Run `technique` on every case in order.
    pub async fn run(&self, technique: &dyn Technique, test_cases: &[TestCase]) -> BatchReport {
        let started_at = Utc::now();
        info!(technique = technique.name(), cases = test_cases.len(), "starting batch");

        let mut results = Vec::with_capacity(test_cases.len());
        let mut failures = Vec::new();
        for case in test_cases {
            match invoke(technique, case, self.timeout).await {
                Ok(output) => {
                    let context = output.context.as_deref().unwrap_or(&case.context);
                    results.push(self.collector.evaluate(
                        &case.query,
                        &output.response,
                        case.ground_truth.as_deref(),
                        context,
                        output.latency_ms.unwrap_or_default(),
                    ));
                }
                Err(failure) => {
                    warn!(
                        test_case_id = %failure.test_case_id,
                        technique = %failure.technique,
                        error_kind = %failure.error_kind,
                        message = %failure.message,
                        "test case failed"
                    );
                    failures.push(failure);
                }
            }
        }

        let total = test_cases.len();
        let successful = results.len();
        let summary = BatchSummary {
            technique: technique.name().to_string(),
            total,
            successful,
            failed: failures.len(),
            success_rate: if total == 0 { 0.0 } else { successful as f64 / total as f64 },
            metrics: AggregateMetrics::from_results(&results),
        };
        info!(
            technique = %summary.technique,
            total,
            successful,
            failed = summary.failed,
            success_rate = summary.success_rate,
            "batch finished"
        );

        BatchReport { summary, results, failures, started_at, finished_at: Utc::now() }
    }
}
