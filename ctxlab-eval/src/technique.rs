//! Systems under test and the failures they can produce.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One evaluation input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    /// Stable identifier used in reports.
    pub id: String,
    /// The question put to the system.
    pub query: String,
    /// Reference answer, when one exists.
    #[serde(default)]
    pub ground_truth: Option<String>,
    /// Context supplied with the query.
    #[serde(default)]
    pub context: String,
}

impl TestCase {
    /// Create a test case with no ground truth and no context.
    pub fn new(id: impl Into<String>, query: impl Into<String>) -> Self {
        Self { id: id.into(), query: query.into(), ground_truth: None, context: String::new() }
    }

    /// Attach a reference answer.
    pub fn with_ground_truth(mut self, ground_truth: impl Into<String>) -> Self {
        self.ground_truth = Some(ground_truth.into());
        self
    }

    /// Attach context.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }
}

/// What a system returned for one [`TestCase`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TechniqueOutput {
    /// The generated answer.
    pub response: String,
    /// Latency reported by the system; filled with wall-clock time when absent.
    #[serde(default)]
    pub latency_ms: Option<f64>,
    /// Context the system actually used, overriding the test case's context
    /// for hallucination checks.
    #[serde(default)]
    pub context: Option<String>,
    /// Extra named measurements (cost, retrieved count, ...).
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
}

impl TechniqueOutput {
    /// Create an output with only a response.
    pub fn new(response: impl Into<String>) -> Self {
        Self { response: response.into(), ..Default::default() }
    }

    /// Set the reported latency.
    pub fn with_latency_ms(mut self, latency_ms: f64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }

    /// Set the context the system used.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Record a named measurement.
    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    /// Reject outputs that cannot be scored.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.response.trim().is_empty() {
            return Err("response is empty".to_string());
        }
        if let Some(latency) = self.latency_ms {
            if !latency.is_finite() || latency < 0.0 {
                return Err(format!("latency_ms must be a non-negative number, got {latency}"));
            }
        }
        if let Some((name, value)) = self.metrics.iter().find(|(_, v)| !v.is_finite()) {
            return Err(format!("metric '{name}' is not finite: {value}"));
        }
        Ok(())
    }
}

/// A system under test.
///
/// # Example
///
/// ```rust,ignore
/// use ctxlab_eval::{Technique, TechniqueOutput, TestCase};
///
/// struct Echo;
///
/// #[async_trait]
/// impl Technique for Echo {
///     fn name(&self) -> &str { "echo" }
///     async fn run(&self, case: &TestCase) -> Result<TechniqueOutput> {
///         Ok(TechniqueOutput::new(case.query.clone()))
///     }
/// }
/// ```
#[async_trait]
pub trait Technique: Send + Sync {
    /// Name used in reports and run history.
    fn name(&self) -> &str;

    /// Answer one test case.
    async fn run(&self, case: &TestCase) -> Result<TechniqueOutput>;
}

/// Adapts an async closure into a [`Technique`].
pub struct FnTechnique<F> {
    name: String,
    run: F,
}

impl<F> FnTechnique<F> {
    /// Wrap `run` under `name`.
    pub fn new<Fut>(name: impl Into<String>, run: F) -> Self
    where
        F: Fn(TestCase) -> Fut + Send + Sync,
        Fut: Future<Output = Result<TechniqueOutput>> + Send,
    {
        Self { name: name.into(), run }
    }
}

impl<F> fmt::Debug for FnTechnique<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTechnique").field("name", &self.name).finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut> Technique for FnTechnique<F>
where
    F: Fn(TestCase) -> Fut + Send + Sync,
    Fut: Future<Output = Result<TechniqueOutput>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, case: &TestCase) -> Result<TechniqueOutput> {
        (self.run)(case.clone()).await
    }
}

/// Why a test case produced no scorable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The call did not finish within the configured timeout.
    Timeout,
    /// The system returned an error.
    TechniqueError,
    /// The system returned something that cannot be scored.
    InvalidOutput,
    /// The system panicked.
    Panic,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Timeout => "timeout",
            Self::TechniqueError => "technique_error",
            Self::InvalidOutput => "invalid_output",
            Self::Panic => "panic",
        })
    }
}

/// One recorded failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// The failing test case.
    pub test_case_id: String,
    /// The system that failed.
    pub technique: String,
    /// Failure category.
    pub error_kind: FailureKind,
    /// Human-readable detail.
    pub message: String,
    /// When the failure was recorded.
    pub timestamp: DateTime<Utc>,
}

impl FailureRecord {
    pub(crate) fn new(
        case: &TestCase,
        technique: &str,
        error_kind: FailureKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            test_case_id: case.id.clone(),
            technique: technique.to_string(),
            error_kind,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Run `technique` on `case`, applying `timeout` and output validation.
///
/// A panic inside the technique is caught and reported as [`FailureKind::Panic`].
/// A missing `latency_ms` is filled with the measured wall-clock time.
pub(crate) async fn invoke(
    technique: &dyn Technique,
    case: &TestCase,
    timeout: Option<Duration>,
) -> std::result::Result<TechniqueOutput, FailureRecord> {
    let started = Instant::now();
    let call = AssertUnwindSafe(technique.run(case)).catch_unwind();
    let caught = match timeout {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(caught) => caught,
            Err(_) => {
                return Err(FailureRecord::new(
                    case,
                    technique.name(),
                    FailureKind::Timeout,
                    format!("no output within {} ms", limit.as_millis()),
                ));
            }
        },
        None => call.await,
    };
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

    let outcome = caught.map_err(|payload| {
        FailureRecord::new(
            case,
            technique.name(),
            FailureKind::Panic,
            format!("panicked: {}", panic_message(payload.as_ref())),
        )
    })?;
    let mut output = outcome.map_err(|e| {
        FailureRecord::new(case, technique.name(), FailureKind::TechniqueError, e.to_string())
    })?;
    output
        .validate()
        .map_err(|m| FailureRecord::new(case, technique.name(), FailureKind::InvalidOutput, m))?;
    output.latency_ms.get_or_insert(elapsed_ms);
    Ok(output)
}
