//! Property tests for the scoring engine's pure decision layer: for any
//! submission sequence the stored score obeys the update-mode contract, and
//! the sorted-set namespace never crosses tenant boundaries.

use proptest::prelude::*;

use podium::models::{SortOrder, UpdateMode};
use podium::scoring::{apply, WriteDecision};
use podium::store::{meta_key, score_key};

/// Replay a submission sequence through the decision function the way the
/// engine applies it to the store.
fn replay(mode: UpdateMode, order: SortOrder, scores: &[f64]) -> Option<f64> {
    let mut stored: Option<f64> = None;
    for &incoming in scores {
        match apply(mode, order, stored, incoming) {
            WriteDecision::Set(value) => stored = Some(value),
            WriteDecision::Incr(delta) => stored = Some(stored.unwrap_or(0.0) + delta),
            WriteDecision::Skip => {}
        }
    }
    stored
}

fn score_strategy() -> impl Strategy<Value = f64> {
    // Finite, representable scores well inside f64's exact integer range.
    (-1_000_000i64..1_000_000i64).prop_map(|n| n as f64)
}

fn id_strategy() -> impl Strategy<Value = String> {
    "[a-z0-9-]{1,24}"
}

proptest! {
    #[test]
    fn best_desc_stores_the_maximum(scores in prop::collection::vec(score_strategy(), 1..50)) {
        let stored = replay(UpdateMode::Best, SortOrder::Desc, &scores).unwrap();
        let max = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        prop_assert_eq!(stored, max);
    }

    #[test]
    fn best_asc_stores_the_minimum(scores in prop::collection::vec(score_strategy(), 1..50)) {
        let stored = replay(UpdateMode::Best, SortOrder::Asc, &scores).unwrap();
        let min = scores.iter().cloned().fold(f64::INFINITY, f64::min);
        prop_assert_eq!(stored, min);
    }

    #[test]
    fn replace_stores_the_last_submission(scores in prop::collection::vec(score_strategy(), 1..50)) {
        let stored = replay(UpdateMode::Replace, SortOrder::Desc, &scores).unwrap();
        prop_assert_eq!(stored, *scores.last().unwrap());
    }

    #[test]
    fn increment_composes_additively(scores in prop::collection::vec(score_strategy(), 1..50)) {
        let stored = replay(UpdateMode::Increment, SortOrder::Desc, &scores).unwrap();
        let sum: f64 = scores.iter().sum();
        prop_assert_eq!(stored, sum);
    }

    #[test]
    fn best_mode_never_increments(
        current in prop::option::of(score_strategy()),
        incoming in score_strategy(),
    ) {
        let decision = apply(UpdateMode::Best, SortOrder::Desc, current, incoming);
        prop_assert!(!matches!(decision, WriteDecision::Incr(_)));
    }

    #[test]
    fn best_tie_never_writes(score in score_strategy()) {
        prop_assert_eq!(
            apply(UpdateMode::Best, SortOrder::Desc, Some(score), score),
            WriteDecision::Skip
        );
        prop_assert_eq!(
            apply(UpdateMode::Best, SortOrder::Asc, Some(score), score),
            WriteDecision::Skip
        );
    }

    #[test]
    fn namespaces_are_disjoint_across_triples(
        t1 in id_strategy(), p1 in id_strategy(), l1 in id_strategy(),
        t2 in id_strategy(), p2 in id_strategy(), l2 in id_strategy(),
    ) {
        prop_assume!((t1.clone(), p1.clone(), l1.clone()) != (t2.clone(), p2.clone(), l2.clone()));
        prop_assert_ne!(score_key(&t1, &p1, &l1), score_key(&t2, &p2, &l2));
        prop_assert_ne!(meta_key(&t1, &p1, &l1), meta_key(&t2, &p2, &l2));
    }

    #[test]
    fn score_and_meta_keys_never_collide(
        t in id_strategy(), p in id_strategy(), l in id_strategy(),
        t2 in id_strategy(), p2 in id_strategy(), l2 in id_strategy(),
    ) {
        prop_assert_ne!(score_key(&t, &p, &l), meta_key(&t2, &p2, &l2));
    }
}

#[test]
fn best_mode_scenario_preserves_high_score() {
    // alice submits 50, 30, 80 on a best/desc board.
    let stored = replay(UpdateMode::Best, SortOrder::Desc, &[50.0, 30.0, 80.0]).unwrap();
    assert_eq!(stored, 80.0);
}

#[test]
fn increment_scenario_accumulates() {
    // bob submits +10 then +5 on an empty board.
    let stored = replay(UpdateMode::Increment, SortOrder::Desc, &[10.0, 5.0]).unwrap();
    assert_eq!(stored, 15.0);
}
