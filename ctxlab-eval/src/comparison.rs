//! Paired A/B comparison of two systems over the same test cases.
//!
//! Both systems answer every test case. The order in which they run is drawn
//! at random per case (unless disabled) so warm caches and similar ordering
//! effects do not consistently favour one side. A case where either system
//! fails is dropped from both samples, keeping the design paired.
//!
//! Percent improvement is sign-normalised: a positive value always means
//! system B did better, whether the metric is higher-is-better or
//! lower-is-better.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::EvaluationConfig;
use crate::error::EvalError;
use crate::technique::{FailureRecord, Technique, TechniqueOutput, TestCase, invoke};

/// Which way a metric improves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricDirection {
    /// Larger values are better (accuracy, relevance).
    #[default]
    Higher,
    /// Smaller values are better (latency, cost, hallucination).
    Lower,
}

impl MetricDirection {
    /// The serialized name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Higher => "higher",
            Self::Lower => "lower",
        }
    }

    /// Whether `candidate` beats `baseline` in this direction.
    fn prefers(&self, candidate: f64, baseline: f64) -> bool {
        match self {
            Self::Higher => candidate > baseline,
            Self::Lower => candidate < baseline,
        }
    }
}

impl fmt::Display for MetricDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricDirection {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "higher" => Ok(Self::Higher),
            "lower" => Ok(Self::Lower),
            other => Err(EvalError::InvalidConfig(vec![format!(
                "unknown metric direction '{other}' (valid: higher, lower)"
            )])),
        }
    }
}

/// Relative change from `mean_a` to `mean_b` in percent, positive when B is better.
///
/// Returns `0.0` when `mean_a` is zero.
pub fn percent_improvement(mean_a: f64, mean_b: f64, direction: MetricDirection) -> f64 {
    if mean_a == 0.0 {
        return 0.0;
    }
    let relative = (mean_b - mean_a) / mean_a.abs() * 100.0;
    match direction {
        MetricDirection::Higher => relative,
        MetricDirection::Lower => -relative,
    }
}

/// Arithmetic mean; `0.0` for an empty sample.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation; `0.0` when fewer than two values.
pub fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

type ExtractFn = Arc<dyn Fn(&TechniqueOutput) -> Option<f64> + Send + Sync>;

/// Pulls one named value out of a [`TechniqueOutput`].
#[derive(Clone)]
pub struct MetricExtractor {
    name: String,
    extract: ExtractFn,
}

impl fmt::Debug for MetricExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricExtractor").field("name", &self.name).finish_non_exhaustive()
    }
}

impl MetricExtractor {
    /// Extract with an arbitrary function; `None` skips the case for this metric.
    pub fn new<F>(name: impl Into<String>, extract: F) -> Self
    where
        F: Fn(&TechniqueOutput) -> Option<f64> + Send + Sync + 'static,
    {
        Self { name: name.into(), extract: Arc::new(extract) }
    }

    /// Read `output.metrics[name]`.
    pub fn field(name: impl Into<String>) -> Self {
        let name = name.into();
        let key = name.clone();
        Self::new(name, move |output| output.metrics.get(&key).copied())
    }

    /// Read the output latency as `latency_ms`.
    pub fn latency() -> Self {
        Self::new(crate::metrics::LATENCY_MS, |output| output.latency_ms)
    }

    /// The metric name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Apply the extractor.
    pub fn extract(&self, output: &TechniqueOutput) -> Option<f64> {
        (self.extract)(output)
    }
}

/// One of the two compared systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SystemLabel {
    /// The baseline.
    A,
    /// The candidate.
    B,
}

/// Statistics for one metric across all complete pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairedComparisonResult {
    /// Metric name.
    pub metric: String,
    /// Mean for system A.
    pub mean_a: f64,
    /// Sample standard deviation for system A.
    pub std_a: f64,
    /// Sample size for system A.
    pub n_a: usize,
    /// Mean for system B.
    pub mean_b: f64,
    /// Sample standard deviation for system B.
    pub std_b: f64,
    /// Sample size for system B.
    pub n_b: usize,
    /// `mean_b - mean_a`.
    pub difference: f64,
    /// Positive when system B is better.
    pub percent_improvement: f64,
    /// Direction used to sign `percent_improvement`.
    pub direction: MetricDirection,
    /// Human-readable verdict.
    pub interpretation: String,
    /// Pairs where B beat A.
    pub wins: usize,
    /// Pairs where A beat B.
    pub losses: usize,
    /// Pairs with equal values.
    pub ties: usize,
}

impl PairedComparisonResult {
    fn from_pairs(metric: &str, a: &[f64], b: &[f64], direction: MetricDirection) -> Self {
        let mean_a = mean(a);
        let mean_b = mean(b);
        let percent = percent_improvement(mean_a, mean_b, direction);

        let (mut wins, mut losses, mut ties) = (0, 0, 0);
        for (va, vb) in a.iter().zip(b) {
            if direction.prefers(*vb, *va) {
                wins += 1;
            } else if direction.prefers(*va, *vb) {
                losses += 1;
            } else {
                ties += 1;
            }
        }

        let interpretation = if percent > 0.0 {
            format!("system B is better by {percent:.2}% ({direction} is better)")
        } else if percent < 0.0 {
            format!("system A is better by {:.2}% ({direction} is better)", -percent)
        } else {
            format!("no difference ({direction} is better)")
        };

        Self {
            metric: metric.to_string(),
            mean_a,
            std_a: sample_std(a),
            n_a: a.len(),
            mean_b,
            std_b: sample_std(b),
            n_b: b.len(),
            difference: mean_b - mean_a,
            percent_improvement: percent,
            direction,
            interpretation,
            wins,
            losses,
            ties,
        }
    }
}

/// Per-case record of a complete pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseRecord {
    /// The test case.
    pub test_case_id: String,
    /// The system that ran first.
    pub first: SystemLabel,
    /// Values extracted from system A.
    pub values_a: BTreeMap<String, f64>,
    /// Values extracted from system B.
    pub values_b: BTreeMap<String, f64>,
}

/// Everything a paired run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairedComparisonReport {
    /// Name of system A.
    pub system_a: String,
    /// Name of system B.
    pub system_b: String,
    /// Test cases attempted.
    pub total_cases: usize,
    /// Cases where both systems produced scorable output.
    pub complete_pairs: usize,
    /// Per-metric statistics.
    pub results: BTreeMap<String, PairedComparisonResult>,
    /// Per-case records for complete pairs.
    pub cases: Vec<CaseRecord>,
    /// Failures from either system.
    pub failures: Vec<FailureRecord>,
}

/// Runs two systems on every test case and compares their metrics.
///
/// # Example
///
/// ```rust,ignore
/// use ctxlab_eval::{MetricDirection, MetricExtractor, PairedComparison};
///
/// let engine = PairedComparison::new().with_seed(7);
/// let report = engine
///     .run(&cases, &baseline, &candidate, &[MetricExtractor::latency()], &directions)
///     .await;
/// println!("{}", report.results["latency_ms"].interpretation);
/// ```
pub struct PairedComparison {
    randomize_order: bool,
    rng: Mutex<StdRng>,
    timeout: Option<Duration>,
}

impl Default for PairedComparison {
    fn default() -> Self {
        Self { randomize_order: true, rng: Mutex::new(StdRng::from_entropy()), timeout: None }
    }
}

impl fmt::Debug for PairedComparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PairedComparison")
            .field("randomize_order", &self.randomize_order)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl PairedComparison {
    /// Create an engine with randomized order and no timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an engine from the evaluation section of an experiment config.
    pub fn from_config(config: &EvaluationConfig) -> Self {
        let mut engine = Self::new().randomize_order(config.randomize_order);
        if let Some(seed) = config.seed {
            engine = engine.with_seed(seed);
        }
        if let Some(timeout) = config.timeout() {
            engine = engine.with_timeout(timeout);
        }
        engine
    }

    /// Seed the order randomization for reproducible runs.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    /// Enable or disable order randomization; when disabled A always runs first.
    pub fn randomize_order(mut self, randomize: bool) -> Self {
        self.randomize_order = randomize;
        self
    }

    /// Apply a timeout to every system call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn first_system(&self) -> SystemLabel {
        if !self.randomize_order {
            return SystemLabel::A;
        }
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        if rng.gen_bool(0.5) { SystemLabel::A } else { SystemLabel::B }
    }

    /// Run both systems on every case and compare each extracted metric.
    ///
    /// Metrics absent from `directions` are treated as higher-is-better. When
    /// several extractors share a name, only the first is used.
    pub async fn run(
        &self,
        test_cases: &[TestCase],
        system_a: &dyn Technique,
        system_b: &dyn Technique,
        extractors: &[MetricExtractor],
        directions: &BTreeMap<String, MetricDirection>,
    ) -> PairedComparisonReport {
        info!(
            system_a = system_a.name(),
            system_b = system_b.name(),
            cases = test_cases.len(),
            randomize_order = self.randomize_order,
            "starting paired comparison"
        );

        let mut samples: BTreeMap<&str, (Vec<f64>, Vec<f64>)> = BTreeMap::new();
        let mut active: Vec<&MetricExtractor> = Vec::with_capacity(extractors.len());
        for extractor in extractors {
            if samples.contains_key(extractor.name()) {
                warn!(metric = extractor.name(), "ignoring duplicate metric extractor");
                continue;
            }
            samples.insert(extractor.name(), (Vec::new(), Vec::new()));
            active.push(extractor);
        }
        let mut cases = Vec::new();
        let mut failures = Vec::new();

        for case in test_cases {
            let first = self.first_system();
            let (outcome_a, outcome_b) = match first {
                SystemLabel::A => {
                    let a = invoke(system_a, case, self.timeout).await;
                    let b = invoke(system_b, case, self.timeout).await;
                    (a, b)
                }
                SystemLabel::B => {
                    let b = invoke(system_b, case, self.timeout).await;
                    let a = invoke(system_a, case, self.timeout).await;
                    (a, b)
                }
            };

            let (output_a, output_b) = match (outcome_a, outcome_b) {
                (Ok(a), Ok(b)) => (a, b),
                (a, b) => {
                    for failure in [a.err(), b.err()].into_iter().flatten() {
                        warn!(
                            test_case_id = %failure.test_case_id,
                            technique = %failure.technique,
                            error_kind = %failure.error_kind,
                            message = %failure.message,
                            "dropping incomplete pair"
                        );
                        failures.push(failure);
                    }
                    continue;
                }
            };

            let mut values_a = BTreeMap::new();
            let mut values_b = BTreeMap::new();
            for extractor in &active {
                let (Some(va), Some(vb)) = (extractor.extract(&output_a), extractor.extract(&output_b))
                else {
                    continue;
                };
                if let Some((sample_a, sample_b)) = samples.get_mut(extractor.name()) {
                    sample_a.push(va);
                    sample_b.push(vb);
                }
                values_a.insert(extractor.name().to_string(), va);
                values_b.insert(extractor.name().to_string(), vb);
            }
            debug!(test_case_id = %case.id, first = ?first, "completed pair");
            cases.push(CaseRecord { test_case_id: case.id.clone(), first, values_a, values_b });
        }

        let results: BTreeMap<String, PairedComparisonResult> = samples
            .into_iter()
            .map(|(name, (a, b))| {
                let direction = directions.get(name).copied().unwrap_or_default();
                (name.to_string(), PairedComparisonResult::from_pairs(name, &a, &b, direction))
            })
            .collect();

        for result in results.values() {
            info!(
                metric = %result.metric,
                mean_a = result.mean_a,
                mean_b = result.mean_b,
                percent_improvement = result.percent_improvement,
                direction = %result.direction,
                "paired metric compared"
            );
        }

        PairedComparisonReport {
            system_a: system_a.name().to_string(),
            system_b: system_b.name().to_string(),
            total_cases: test_cases.len(),
            complete_pairs: cases.len(),
            results,
            cases,
            failures,
        }
    }
}
