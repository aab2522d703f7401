//! Response quality metrics and their aggregation.
//!
//! Every evaluation scores:
//!
//! - `rouge1`, `rouge2`, `rougeL`: unigram, bigram and longest-common-subsequence
//!   overlap against the ground truth (only when one is given). The value is the
//!   F1 score; precision and recall ride along in the metadata.
//! - `relevance`: Jaccard similarity of query and response word sets.
//! - `hallucination`: a three-check heuristic, each check worth one third. All
//!   checks require insufficient context, so well-grounded answers score `0.0`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{LazyLock, Mutex, MutexGuard, PoisonError};

use ctxlab_rag::{RegexTokenizer, Tokenizer};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::comparison::{MetricDirection, percent_improvement};

/// ROUGE-1 metric name.
pub const ROUGE1: &str = "rouge1";
/// ROUGE-2 metric name.
pub const ROUGE2: &str = "rouge2";
/// ROUGE-L metric name.
pub const ROUGE_L: &str = "rougeL";
/// Relevance metric name.
pub const RELEVANCE: &str = "relevance";
/// Hallucination metric name.
pub const HALLUCINATION: &str = "hallucination";
/// Pseudo-metric name for mean latency in comparisons.
pub const LATENCY_MS: &str = "latency_ms";
/// Pseudo-metric name for mean token count in comparisons.
pub const TOKEN_COUNT: &str = "token_count";

/// Context shorter than this many characters cannot ground an answer.
pub const MIN_CONTEXT_CHARS: usize = 50;
/// Responses longer than this many characters count as long.
pub const LONG_RESPONSE_CHARS: usize = 50;

static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\w+").expect("word pattern is valid"));

static OVERCLAIM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(absolutely|definitely|certainly|undoubtedly|unquestionably|guaranteed|without (a|any) doubt|always|never)\b|\b100%",
    )
    .expect("overclaim pattern is valid")
});

static HEDGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(might|may|maybe|perhaps|possibly|probably|likely|unclear|uncertain|not sure|i think|i believe|it seems|appears to|could be|approximately|roughly)\b",
    )
    .expect("hedge pattern is valid")
});

static SPECIFIC_CLAIM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d").expect("digit pattern is valid"));

fn words(text: &str) -> Vec<String> {
    WORD.find_iter(text).map(|m| m.as_str().to_lowercase()).collect()
}

/// Precision, recall and F1 of one overlap measure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RougeScore {
    /// Overlap divided by candidate size.
    pub precision: f64,
    /// Overlap divided by reference size.
    pub recall: f64,
    /// Harmonic mean of precision and recall.
    pub f1: f64,
}

impl RougeScore {
    fn from_counts(overlap: usize, candidate_total: usize, reference_total: usize) -> Self {
        let ratio = |total: usize| if total == 0 { 0.0 } else { overlap as f64 / total as f64 };
        let precision = ratio(candidate_total);
        let recall = ratio(reference_total);
        let f1 = if precision + recall == 0.0 {
            0.0
        } else {
            2.0 * precision * recall / (precision + recall)
        };
        Self { precision, recall, f1 }
    }

    fn metadata(&self) -> BTreeMap<String, Value> {
        BTreeMap::from([
            ("precision".to_string(), json!(self.precision)),
            ("recall".to_string(), json!(self.recall)),
        ])
    }
}

fn ngram_counts(tokens: &[String], n: usize) -> HashMap<&[String], usize> {
    let mut counts = HashMap::new();
    if n == 0 {
        return counts;
    }
    for gram in tokens.windows(n) {
        *counts.entry(gram).or_insert(0) += 1;
    }
    counts
}

/// Clipped n-gram overlap between `candidate` and `reference` (ROUGE-N).
pub fn rouge_n(candidate: &str, reference: &str, n: usize) -> RougeScore {
    let candidate = words(candidate);
    let reference = words(reference);
    let candidate_counts = ngram_counts(&candidate, n);
    let reference_counts = ngram_counts(&reference, n);

    let overlap = candidate_counts
        .iter()
        .map(|(gram, count)| (*count).min(reference_counts.get(gram).copied().unwrap_or(0)))
        .sum();
    RougeScore::from_counts(
        overlap,
        candidate_counts.values().sum(),
        reference_counts.values().sum(),
    )
}

fn lcs_len(a: &[String], b: &[String]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for x in a {
        for (j, y) in b.iter().enumerate() {
            curr[j + 1] = if x == y { prev[j] + 1 } else { prev[j + 1].max(curr[j]) };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Longest-common-subsequence overlap (ROUGE-L).
pub fn rouge_l(candidate: &str, reference: &str) -> RougeScore {
    let candidate = words(candidate);
    let reference = words(reference);
    RougeScore::from_counts(lcs_len(&candidate, &reference), candidate.len(), reference.len())
}

/// Case-insensitive Jaccard similarity of the word sets of `query` and `response`.
///
/// Returns `0.0` when the query has no words.
pub fn relevance(query: &str, response: &str) -> f64 {
    let query: HashSet<String> = words(query).into_iter().collect();
    if query.is_empty() {
        return 0.0;
    }
    let response: HashSet<String> = words(response).into_iter().collect();
    let shared = query.intersection(&response).count();
    let union = query.union(&response).count();
    shared as f64 / union as f64
}

/// Outcome of the hallucination heuristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HallucinationAssessment {
    /// High-confidence phrasing without grounding.
    pub overclaiming: bool,
    /// Numbers, dates or statistics without grounding.
    pub specific_claims: bool,
    /// A long answer with no hedging and no grounding.
    pub long_unhedged: bool,
    /// Whether the context was long enough to ground the answer.
    pub context_sufficient: bool,
}

impl HallucinationAssessment {
    /// Number of checks that fired.
    pub fn triggered(&self) -> usize {
        [self.overclaiming, self.specific_claims, self.long_unhedged].iter().filter(|c| **c).count()
    }

    /// Fired checks out of three, in `[0, 1]`.
    pub fn score(&self) -> f64 {
        self.triggered() as f64 / 3.0
    }
}

/// Run the three hallucination checks on `response` given `context`.
pub fn assess_hallucination(response: &str, context: &str) -> HallucinationAssessment {
    let context_sufficient = context.trim().chars().count() >= MIN_CONTEXT_CHARS;
    let ungrounded = !context_sufficient;
    HallucinationAssessment {
        overclaiming: ungrounded && OVERCLAIM.is_match(response),
        specific_claims: ungrounded && SPECIFIC_CLAIM.is_match(response),
        long_unhedged: ungrounded
            && response.chars().count() > LONG_RESPONSE_CHARS
            && !HEDGE.is_match(response),
        context_sufficient,
    }
}

/// A single metric value with supporting detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricResult {
    /// The score.
    pub value: f64,
    /// Metric-specific detail.
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl MetricResult {
    fn new(value: f64, metadata: BTreeMap<String, Value>) -> Self {
        Self { value, metadata }
    }
}

/// Everything measured for one response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// The query.
    pub query: String,
    /// The evaluated response.
    pub response: String,
    /// Reference answer, if any.
    pub ground_truth: Option<String>,
    /// Named metrics.
    pub metrics: BTreeMap<String, MetricResult>,
    /// Response latency in milliseconds.
    pub latency_ms: f64,
    /// Tokens in the response.
    pub token_count: usize,
}

impl EvaluationResult {
    /// The value of metric `name`, if it was computed.
    pub fn value(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).map(|m| m.value)
    }
}

/// Score one response without recording it.
pub fn score_response(
    query: &str,
    response: &str,
    ground_truth: Option<&str>,
    context: &str,
    latency_ms: f64,
) -> EvaluationResult {
    let mut metrics = BTreeMap::new();

    if let Some(reference) = ground_truth {
        for (name, score) in [
            (ROUGE1, rouge_n(response, reference, 1)),
            (ROUGE2, rouge_n(response, reference, 2)),
            (ROUGE_L, rouge_l(response, reference)),
        ] {
            metrics.insert(name.to_string(), MetricResult::new(score.f1, score.metadata()));
        }
    }

    metrics.insert(RELEVANCE.to_string(), MetricResult::new(relevance(query, response), BTreeMap::new()));

    let assessment = assess_hallucination(response, context);
    let detail = BTreeMap::from([
        ("overclaiming".to_string(), json!(assessment.overclaiming)),
        ("specific_claims".to_string(), json!(assessment.specific_claims)),
        ("long_unhedged".to_string(), json!(assessment.long_unhedged)),
        ("context_sufficient".to_string(), json!(assessment.context_sufficient)),
        ("checks_triggered".to_string(), json!(assessment.triggered())),
    ]);
    metrics.insert(HALLUCINATION.to_string(), MetricResult::new(assessment.score(), detail));

    EvaluationResult {
        query: query.to_string(),
        response: response.to_string(),
        ground_truth: ground_truth.map(str::to_string),
        metrics,
        latency_ms,
        token_count: RegexTokenizer.count(response),
    }
}

/// Mean, minimum and maximum of one metric.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    /// Arithmetic mean.
    pub mean: f64,
    /// Smallest value.
    pub min: f64,
    /// Largest value.
    pub max: f64,
    /// Results that carried this metric.
    pub count: usize,
}

/// Aggregate view over a set of evaluation results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateMetrics {
    /// Results aggregated.
    pub count: usize,
    /// Per-metric summaries, over the results that carry the metric.
    pub metrics: BTreeMap<String, MetricSummary>,
    /// Mean latency across all results.
    pub latency_ms_mean: f64,
    /// Mean response token count across all results.
    pub token_count_mean: f64,
}

impl AggregateMetrics {
    /// Aggregate `results` from scratch.
    pub fn from_results(results: &[EvaluationResult]) -> Self {
        if results.is_empty() {
            return Self::default();
        }

        let mut metrics: BTreeMap<String, MetricSummary> = BTreeMap::new();
        for result in results {
            for (name, metric) in &result.metrics {
                let summary = metrics.entry(name.clone()).or_insert(MetricSummary {
                    mean: 0.0,
                    min: f64::INFINITY,
                    max: f64::NEG_INFINITY,
                    count: 0,
                });
                summary.mean += metric.value;
                summary.min = summary.min.min(metric.value);
                summary.max = summary.max.max(metric.value);
                summary.count += 1;
            }
        }
        for summary in metrics.values_mut() {
            summary.mean /= summary.count as f64;
        }

        let n = results.len() as f64;
        Self {
            count: results.len(),
            metrics,
            latency_ms_mean: results.iter().map(|r| r.latency_ms).sum::<f64>() / n,
            token_count_mean: results.iter().map(|r| r.token_count as f64).sum::<f64>() / n,
        }
    }

    /// Mean of every metric plus `latency_ms` and `token_count`.
    pub fn means(&self) -> BTreeMap<String, f64> {
        let mut means: BTreeMap<String, f64> =
            self.metrics.iter().map(|(name, s)| (name.clone(), s.mean)).collect();
        if self.count > 0 {
            means.insert(LATENCY_MS.to_string(), self.latency_ms_mean);
            means.insert(TOKEN_COUNT.to_string(), self.token_count_mean);
        }
        means
    }
}

/// Baseline-versus-candidate comparison of one aggregate mean.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricComparison {
    /// Baseline mean.
    pub mean_a: f64,
    /// Candidate mean.
    pub mean_b: f64,
    /// `mean_b - mean_a`.
    pub difference: f64,
    /// Signed so that positive favours the candidate.
    pub percent_improvement: f64,
    /// Direction used for the sign.
    pub direction: MetricDirection,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scores responses and keeps every result for aggregation.
///
/// # Example
///
/// ```rust,ignore
/// use ctxlab_eval::MetricsCollector;
///
/// let collector = MetricsCollector::new();
/// collector.evaluate("What is Rust?", "A systems language.", Some("Rust is a language."), "", 120.0);
/// let summary = collector.aggregate();
/// ```
#[derive(Debug, Default)]
pub struct MetricsCollector {
    results: Mutex<Vec<EvaluationResult>>,
}

impl MetricsCollector {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Score a response and record the result.
    pub fn evaluate(
        &self,
        query: &str,
        response: &str,
        ground_truth: Option<&str>,
        context: &str,
        latency_ms: f64,
    ) -> EvaluationResult {
        let result = score_response(query, response, ground_truth, context, latency_ms);
        debug!(
            metric_count = result.metrics.len(),
            latency_ms,
            token_count = result.token_count,
            "evaluated response"
        );
        lock(&self.results).push(result.clone());
        result
    }

    /// Record an already-scored result.
    pub fn record(&self, result: EvaluationResult) {
        lock(&self.results).push(result);
    }

    /// All recorded results, oldest first.
    pub fn results(&self) -> Vec<EvaluationResult> {
        lock(&self.results).clone()
    }

    /// Number of recorded results.
    pub fn len(&self) -> usize {
        lock(&self.results).len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every recorded result.
    pub fn clear(&self) {
        lock(&self.results).clear();
    }

    /// Aggregate everything recorded so far.
    pub fn aggregate(&self) -> AggregateMetrics {
        AggregateMetrics::from_results(&lock(&self.results))
    }

    /// Compare this collector (baseline) against `other` (candidate) on every
    /// mean both have.
    ///
    /// Metrics absent from `directions` are treated as higher-is-better.
    pub fn compare(
        &self,
        other: &MetricsCollector,
        directions: &BTreeMap<String, MetricDirection>,
    ) -> BTreeMap<String, MetricComparison> {
        let baseline = self.aggregate().means();
        let candidate = other.aggregate().means();
        baseline
            .into_iter()
            .filter_map(|(name, mean_a)| {
                let mean_b = *candidate.get(&name)?;
                let direction = directions.get(&name).copied().unwrap_or_default();
                let comparison = MetricComparison {
                    mean_a,
                    mean_b,
                    difference: mean_b - mean_a,
                    percent_improvement: percent_improvement(mean_a, mean_b, direction),
                    direction,
                };
                Some((name, comparison))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn rouge_scores_identical_text_perfectly() {
        let text = "the cat sat on the mat";
        for score in [rouge_n(text, text, 1), rouge_n(text, text, 2), rouge_l(text, text)] {
            assert!(close(score.f1, 1.0));
        }
    }

    #[test]
    fn rouge_clips_repeated_ngrams() {
        let score = rouge_n("the the the", "the cat", 1);
        assert!(close(score.precision, 1.0 / 3.0));
        assert!(close(score.recall, 0.5));
    }

    #[test]
    fn rouge_l_rewards_in_order_matches() {
        let score = rouge_l("police killed the gunman", "police kill the gunman");
        assert!(close(score.precision, 0.75));
        assert!(close(score.recall, 0.75));
        assert_eq!(rouge_n("", "anything", 2), RougeScore::default());
    }

    #[test]
    fn relevance_is_case_insensitive_jaccard() {
        assert!(close(relevance("Rust Memory", "rust has memory safety"), 2.0 / 4.0));
        assert_eq!(relevance("", "anything"), 0.0);
        assert_eq!(relevance("?!", "anything"), 0.0);
    }

    #[test]
    fn hallucination_fires_all_checks_without_context() {
        let response = "I'm absolutely certain the answer is $99.99 in 2024";
        let assessment = assess_hallucination(response, "");
        assert!(assessment.overclaiming);
        assert!(assessment.specific_claims);
        assert!(assessment.long_unhedged);
        assert_eq!(assessment.score(), 1.0);

        let context = "The product page lists the price as $99.99 for the 2024 edition.";
        assert!(context.len() >= MIN_CONTEXT_CHARS);
        assert_eq!(assess_hallucination(response, context).score(), 0.0);
    }

    #[test]
    fn hedging_disarms_the_length_check() {
        let response = "It might be around the middle of the afternoon, but I am not sure of it";
        let assessment = assess_hallucination(response, "");
        assert!(!assessment.long_unhedged);
        assert!(!assessment.overclaiming);
        assert_eq!(assessment.score(), 0.0);
    }

    #[test]
    fn rouge_only_with_ground_truth() {
        let without = score_response("q", "answer", None, "", 1.0);
        assert!(without.value(ROUGE1).is_none());
        assert!(without.value(RELEVANCE).is_some());
        assert!(without.value(HALLUCINATION).is_some());

        let with = score_response("q", "answer", Some("answer"), "", 1.0);
        assert_eq!(with.value(ROUGE1), Some(1.0));
        assert_eq!(with.metrics[ROUGE1].metadata["precision"], json!(1.0));
    }

    #[test]
    fn aggregate_recomputes_from_history() {
        let collector = MetricsCollector::new();
        for latency in [100.0, 200.0, 300.0] {
            collector.evaluate("what is rust", "rust is a language", None, "", latency);
        }
        let aggregate = collector.aggregate();
        assert_eq!(aggregate.count, 3);
        assert_eq!(aggregate.latency_ms_mean, 200.0);
        let relevance = aggregate.metrics[RELEVANCE];
        assert_eq!(relevance.count, 3);
        assert!(close(relevance.min, relevance.max));

        collector.clear();
        assert_eq!(collector.aggregate(), AggregateMetrics::default());
    }

    #[test]
    fn compare_normalises_sign_by_direction() {
        let baseline = MetricsCollector::new();
        let candidate = MetricsCollector::new();
        baseline.evaluate("q", "a b", None, "", 500.0);
        candidate.evaluate("q", "a b", None, "", 300.0);

        let defaulted = baseline.compare(&candidate, &BTreeMap::new());
        assert!(close(defaulted[LATENCY_MS].percent_improvement, -40.0));

        let directions = BTreeMap::from([(LATENCY_MS.to_string(), MetricDirection::Lower)]);
        let latency = baseline.compare(&candidate, &directions)[LATENCY_MS];
        assert!(close(latency.difference, -200.0));
        assert!(close(latency.percent_improvement, 40.0));
        assert_eq!(latency.direction, MetricDirection::Lower);
    }
}
