//! Property tests for the metric store
//!
//! Counter accumulation and snapshot reset semantics must hold for arbitrary
//! update sequences, including concurrent writers.

use proptest::prelude::*;
use std::sync::Arc;
use trapmetrics::MetricStore;
use trapmetrics::store::ResetSettings;

proptest! {
    #[test]
    fn counter_equals_sum_of_deltas(deltas in prop::collection::vec(0u64..1_000_000, 0..200)) {
        let store = MetricStore::default();
        for delta in &deltas {
            store.add_counter("requests", *delta);
        }

        let expected: u64 = deltas.iter().sum();
        if deltas.is_empty() {
            prop_assert_eq!(store.counter("requests"), None);
        } else {
            prop_assert_eq!(store.counter("requests"), Some(expected));
        }
    }

    #[test]
    fn counter_saturates_instead_of_wrapping(a in (u64::MAX / 2)..=u64::MAX, b in (u64::MAX / 2)..=u64::MAX) {
        let store = MetricStore::default();
        store.add_counter("big", a);
        store.add_counter("big", b);
        prop_assert_eq!(store.counter("big"), Some(a.saturating_add(b)));
    }

    #[test]
    fn snapshot_splits_deltas_across_flushes(
        before in prop::collection::vec(1u64..1000, 1..50),
        after in prop::collection::vec(1u64..1000, 1..50),
    ) {
        let store = MetricStore::new(ResetSettings::all(true));
        for delta in &before {
            store.add_counter("requests", *delta);
        }
        let first = store.snapshot();
        for delta in &after {
            store.add_counter("requests", *delta);
        }
        let second = store.snapshot();

        prop_assert_eq!(first.counters["requests"], before.iter().sum::<u64>());
        prop_assert_eq!(second.counters["requests"], after.iter().sum::<u64>());
    }

    #[test]
    fn histogram_count_matches_recorded_samples(samples in prop::collection::vec(0.0f64..10_000.0, 1..100)) {
        let store = MetricStore::default();
        for sample in &samples {
            store.record_histogram("latency", *sample);
        }
        let histogram = store.histogram("latency").unwrap();
        prop_assert_eq!(histogram.count(), samples.len() as u64);
    }
}

#[test]
fn concurrent_increments_are_not_lost() {
    let store = Arc::new(MetricStore::default());
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = store.clone();
            std::thread::spawn(move || {
                for _ in 0..1_000 {
                    store.increment("requests");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(store.counter("requests"), Some(8_000));
}

#[test]
fn no_reset_snapshot_keeps_every_category() {
    let store = MetricStore::new(ResetSettings::all(false));
    store.add_counter("c", 1);
    store.set_gauge("g", 2);
    store.record_histogram("h", 3.0);
    store.set_text("t", "four");

    let first = store.snapshot();
    let second = store.snapshot();
    assert_eq!(first.len(), 4);
    assert_eq!(second.len(), 4);
    assert_eq!(second.counters["c"], 1);
    assert_eq!(second.text["t"], "four");
}
