//! Property tests for metric ranges and sign normalisation.

use ctxlab_eval::metrics::{assess_hallucination, relevance, rouge_l, rouge_n, score_response};
use ctxlab_eval::{MetricDirection, percent_improvement};
use proptest::prelude::*;

fn arb_text() -> impl Strategy<Value = String> {
    proptest::collection::vec("[a-zA-Z0-9]{1,7}", 0..30).prop_map(|w| w.join(" "))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn scores_stay_in_unit_interval(candidate in arb_text(), reference in arb_text(), context in arb_text()) {
        for score in [rouge_n(&candidate, &reference, 1), rouge_n(&candidate, &reference, 2), rouge_l(&candidate, &reference)] {
            prop_assert!((0.0..=1.0).contains(&score.precision));
            prop_assert!((0.0..=1.0).contains(&score.recall));
            prop_assert!((0.0..=1.0).contains(&score.f1));
        }
        prop_assert!((0.0..=1.0).contains(&relevance(&candidate, &reference)));

        let result = score_response(&candidate, &reference, Some(&candidate), &context, 1.0);
        for metric in result.metrics.values() {
            prop_assert!((0.0..=1.0).contains(&metric.value));
        }
    }

    #[test]
    fn sufficient_context_never_hallucinates(response in ".{0,200}", context in "[a-z ]{50,120}") {
        prop_assume!(context.trim().chars().count() >= 50);
        prop_assert_eq!(assess_hallucination(&response, &context).score(), 0.0);
    }

    #[test]
    fn positive_improvement_means_b_is_better(mean_a in -1e6f64..1e6, mean_b in -1e6f64..1e6) {
        prop_assume!(mean_a != 0.0);
        let higher = percent_improvement(mean_a, mean_b, MetricDirection::Higher);
        let lower = percent_improvement(mean_a, mean_b, MetricDirection::Lower);
        prop_assert_eq!(higher, -lower);
        if mean_b > mean_a {
            prop_assert!(higher > 0.0);
            prop_assert!(lower < 0.0);
        } else if mean_b < mean_a {
            prop_assert!(higher < 0.0);
            prop_assert!(lower > 0.0);
        }
    }
}
