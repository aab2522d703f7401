use std::sync::Arc;
use std::time::Duration;

use ctxlab_eval::metrics::{HALLUCINATION, RELEVANCE, ROUGE1};
use ctxlab_eval::{
    BatchEvaluator, BatchReport, EvalError, FailureKind, FnTechnique, MetricsCollector, RunHistory,
    RunRecord, TechniqueOutput, TestCase, read_json_report, write_json_report,
};

fn test_cases() -> Vec<TestCase> {
    vec![
        TestCase::new("ok-1", "what is the capital of france")
            .with_ground_truth("the capital of france is paris")
            .with_context("France is a country in Europe. Its capital and largest city is Paris."),
        TestCase::new("slow", "how long is a piece of string"),
        TestCase::new("error", "divide by zero"),
        TestCase::new("ok-2", "name a prime number").with_ground_truth("seven is prime"),
    ]
}

fn technique() -> impl ctxlab_eval::Technique {
    FnTechnique::new("scripted", |case: TestCase| async move {
        match case.id.as_str() {
            "slow" => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(TechniqueOutput::new("eventually"))
            }
            "error" => Err(EvalError::Technique("arithmetic overflow".into())),
            "ok-1" => Ok(TechniqueOutput::new("the capital of france is paris").with_latency_ms(100.0)),
            _ => Ok(TechniqueOutput::new("seven is a prime number").with_latency_ms(300.0)),
        }
    })
}

#[tokio::test(start_paused = true)]
async fn batch_records_failures_and_continues() {
    let collector = Arc::new(MetricsCollector::new());
    let evaluator = BatchEvaluator::new(Arc::clone(&collector)).with_timeout(Duration::from_secs(5));
    let report = evaluator.run(&technique(), &test_cases()).await;

    let summary = &report.summary;
    assert_eq!(summary.technique, "scripted");
    assert_eq!((summary.total, summary.successful, summary.failed), (4, 2, 2));
    assert_eq!(summary.success_rate, 0.5);
    assert_eq!(summary.metrics.latency_ms_mean, 200.0);

    let kinds: Vec<_> = report.failures.iter().map(|f| (f.test_case_id.as_str(), f.error_kind)).collect();
    assert_eq!(kinds, vec![("slow", FailureKind::Timeout), ("error", FailureKind::TechniqueError)]);
    assert!(report.failures[1].message.contains("arithmetic overflow"));

    let first = &report.results[0];
    assert_eq!(first.value(ROUGE1), Some(1.0));
    assert_eq!(first.value(HALLUCINATION), Some(0.0));
    assert!(first.value(RELEVANCE).unwrap() > 0.5);

    assert_eq!(collector.len(), 2);
    assert!(report.started_at <= report.finished_at);
}

#[tokio::test]
async fn a_panicking_case_is_recorded_and_the_batch_continues() {
    let fragile = FnTechnique::new("fragile", |case: TestCase| async move {
        if case.id == "bad" {
            panic!("unexpected empty retrieval set");
        }
        Ok(TechniqueOutput::new("a perfectly ordinary answer").with_latency_ms(10.0))
    });
    let cases = [TestCase::new("ok", "q1"), TestCase::new("bad", "q2"), TestCase::new("ok2", "q3")];

    let collector = Arc::new(MetricsCollector::new());
    let report = BatchEvaluator::new(Arc::clone(&collector)).run(&fragile, &cases).await;

    assert_eq!((report.summary.total, report.summary.successful, report.summary.failed), (3, 2, 1));
    assert_eq!(report.failures[0].test_case_id, "bad");
    assert_eq!(report.failures[0].error_kind, FailureKind::Panic);
    assert!(report.failures[0].message.contains("unexpected empty retrieval set"));
    assert_eq!(collector.len(), 2);
}

#[tokio::test]
async fn empty_batch_has_zero_success_rate() {
    let evaluator = BatchEvaluator::new(Arc::new(MetricsCollector::new()));
    let report = evaluator.run(&technique(), &[]).await;
    assert_eq!(report.summary.total, 0);
    assert_eq!(report.summary.success_rate, 0.0);
    assert!(report.results.is_empty());
}

#[tokio::test]
async fn output_context_overrides_case_context() {
    let grounded = FnTechnique::new("grounded", |_case: TestCase| async {
        Ok(TechniqueOutput::new("It is absolutely 42 and has always been exactly 42 since 1970")
            .with_context("The retrieved passage states clearly that the answer is 42, since 1970."))
    });
    let evaluator = BatchEvaluator::new(Arc::new(MetricsCollector::new()));
    let report = evaluator.run(&grounded, &[TestCase::new("q", "what is the answer")]).await;
    assert_eq!(report.results[0].value(HALLUCINATION), Some(0.0));
}

#[tokio::test(start_paused = true)]
async fn reports_and_history_round_trip_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let evaluator = BatchEvaluator::new(Arc::new(MetricsCollector::new()))
        .with_timeout(Duration::from_secs(1));
    let report = evaluator.run(&technique(), &test_cases()).await;

    let report_path = dir.path().join("nested").join("batch.json");
    write_json_report(&report_path, &report).unwrap();
    let text = std::fs::read_to_string(&report_path).unwrap();
    assert!(text.contains("\n  \"summary\""), "report is not pretty-printed");
    assert!(text.contains("\"error_kind\": \"timeout\""));
    let restored: BatchReport = read_json_report(&report_path).unwrap();
    assert_eq!(restored.failures, report.failures);
    assert_eq!(restored.summary.successful, 2);

    let history_path = dir.path().join("history.json");
    let mut history = RunHistory::load(&history_path).unwrap();
    assert!(history.runs().is_empty());
    let first = history.record(RunRecord::from_report(&report));
    let second = history.record(RunRecord::from_report(&report));
    assert_ne!(first, second);
    history.save(&history_path).unwrap();

    let loaded = RunHistory::load(&history_path).unwrap();
    let ids: Vec<_> = loaded.runs().iter().map(|r| r.run_id).collect();
    assert_eq!(ids, vec![first, second]);
    assert_eq!(loaded.for_technique("scripted").count(), 2);
    assert_eq!(loaded.for_technique("other").count(), 0);
    assert_eq!(loaded.latest("scripted").unwrap().run_id, second);
    assert_eq!(loaded.get(first).unwrap().summary.total, 4);
}

#[test]
fn unreadable_report_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = read_json_report::<BatchReport>(dir.path().join("missing.json")).unwrap_err();
    assert!(matches!(err, EvalError::Io { .. }));
}
