//! Property-based tests for composite futures.
//!
//! Each case is a list of slot outcomes (`Some(value)` succeeds, `None`
//! fails) plus the order in which the slots complete. The properties:
//! - the composite decides at most once, at the first qualifying event
//! - ALL reports the first failure in completion order
//! - ANY reports the last failure when nothing succeeded
//! - reduce folds in index order whatever the completion order

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use proptest::prelude::*;

use promise_composite::{Completable, Promise, all, reduce};

// ────────────────────────────────────────────────────────────────────
// Strategies
// ────────────────────────────────────────────────────────────────────

/// Slot outcomes together with a completion order over their indices.
fn arb_case() -> impl Strategy<Value = (Vec<Option<i32>>, Vec<usize>)> {
    prop::collection::vec(prop::option::weighted(0.7, any::<i32>()), 0..8).prop_flat_map(
        |outcomes| {
            let order: Vec<usize> = (0..outcomes.len()).collect();
            (Just(outcomes), Just(order).prop_shuffle())
        },
    )
}

fn settle(promise: &Promise<i32>, index: usize, outcome: Option<i32>) {
    match outcome {
        Some(value) => promise.ok(value),
        None => promise.err(anyhow::anyhow!("fail-{index}")),
    };
}

fn counting_observer(composite: &impl Completable) -> Arc<AtomicUsize> {
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);
    composite.observe(Box::new(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));
    fired
}

// ────────────────────────────────────────────────────────────────────
// ALL
// ────────────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// ALL is undecided until the first failure or the last success.
    #[test]
    fn prop_all_decides_at_first_qualifying_event((outcomes, order) in arb_case()) {
        let promises: Vec<Promise<i32>> = outcomes.iter().map(|_| Promise::new()).collect();
        let composite = all(promises.iter().map(Promise::get_future));
        let fired = counting_observer(&composite);

        let mut first_failure = None;
        for (step, &index) in order.iter().enumerate() {
            prop_assert_eq!(composite.is_complete(), first_failure.is_some());
            settle(&promises[index], index, outcomes[index]);
            if outcomes[index].is_none() && first_failure.is_none() {
                first_failure = Some(index);
            }
            let everything_done = step + 1 == order.len();
            prop_assert_eq!(
                composite.is_complete(),
                first_failure.is_some() || everything_done
            );
        }

        prop_assert!(composite.is_complete());
        prop_assert_eq!(fired.load(Ordering::SeqCst), 1);
        match first_failure {
            Some(index) => {
                prop_assert!(composite.failed());
                let expected = format!("fail-{index}");
                prop_assert_eq!(composite.cause().unwrap().to_string(), expected);
            }
            None => {
                prop_assert!(composite.succeeded());
                let values: Vec<Option<i32>> =
                    composite.list::<i32>().into_iter().map(|v| v.map(|v| *v)).collect();
                prop_assert_eq!(values, outcomes.clone());
            }
        }
    }

    /// Per-slot reads agree with what each slot did, regardless of policy outcome.
    #[test]
    fn prop_slot_snapshots_match_inputs((outcomes, order) in arb_case()) {
        let promises: Vec<Promise<i32>> = outcomes.iter().map(|_| Promise::new()).collect();
        let composite = all(promises.iter().map(Promise::get_future));
        for &index in &order {
            settle(&promises[index], index, outcomes[index]);
        }

        prop_assert_eq!(composite.size(), outcomes.len());
        prop_assert_eq!(composite.completed_count(), outcomes.len());
        for (index, outcome) in outcomes.iter().enumerate() {
            prop_assert!(composite.is_complete_at(index).unwrap());
            prop_assert_eq!(composite.succeeded_at(index).unwrap(), outcome.is_some());
            prop_assert_eq!(composite.failed_at(index).unwrap(), outcome.is_none());
            prop_assert_eq!(composite.result::<i32>(index).unwrap().map(|v| *v), *outcome);
        }
        prop_assert!(composite.result::<i32>(outcomes.len()).is_err());
    }
}

// ────────────────────────────────────────────────────────────────────
// ANY
// ────────────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// ANY is undecided until the first success or the last failure.
    #[test]
    fn prop_any_decides_at_first_qualifying_event((outcomes, order) in arb_case()) {
        let promises: Vec<Promise<i32>> = outcomes.iter().map(|_| Promise::new()).collect();
        let composite = promise_composite::any(promises.iter().map(Promise::get_future));
        let fired = counting_observer(&composite);

        let mut any_success = false;
        let mut last_failure = None;
        for (step, &index) in order.iter().enumerate() {
            prop_assert_eq!(composite.is_complete(), any_success);
            settle(&promises[index], index, outcomes[index]);
            match outcomes[index] {
                Some(_) => any_success = true,
                None => last_failure = Some(index),
            }
            let everything_done = step + 1 == order.len();
            prop_assert_eq!(composite.is_complete(), any_success || everything_done);
        }

        prop_assert_eq!(fired.load(Ordering::SeqCst), 1);
        if any_success || outcomes.is_empty() {
            prop_assert!(composite.succeeded());
        } else {
            prop_assert!(composite.failed());
            let expected = format!("fail-{}", last_failure.unwrap());
            prop_assert_eq!(composite.cause().unwrap().to_string(), expected);
        }
    }
}

// ────────────────────────────────────────────────────────────────────
// reduce
// ────────────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// reduce is a left fold over index order, never completion order.
    #[test]
    fn prop_reduce_is_index_ordered_left_fold((outcomes, order) in arb_case()) {
        let promises: Vec<Promise<i32>> = outcomes.iter().map(|_| Promise::new()).collect();
        let folded = reduce(
            Vec::new(),
            |mut acc: Vec<i32>, value: &i32| {
                acc.push(*value);
                acc
            },
            promises.iter().map(Promise::get_future),
        );

        let mut first_failure = None;
        for &index in &order {
            settle(&promises[index], index, outcomes[index]);
            if outcomes[index].is_none() && first_failure.is_none() {
                first_failure = Some(index);
            }
        }

        match first_failure {
            Some(index) => {
                prop_assert!(folded.failed());
                let expected = format!("fail-{index}");
                prop_assert_eq!(folded.cause().unwrap().to_string(), expected);
            }
            None => {
                let expected: Vec<i32> = outcomes.iter().flatten().copied().collect();
                let value = folded.value().unwrap();
                prop_assert_eq!(value.as_ref(), &expected);
            }
        }
    }
}
