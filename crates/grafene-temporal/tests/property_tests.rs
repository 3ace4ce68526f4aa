//! Property-based tests for window batching.
//!
//! Invariants checked for arbitrary query-time lists:
//! - exactly `window` rows, none longer than the batch
//! - zero query times never reach a row
//! - present entries form a prefix and keep their sequence across rows

#![allow(clippy::unwrap_used)]

use grafene_temporal::{GraphBatcher, SnapshotHistory, TemporalFact};
use proptest::prelude::*;

const NUM_STEPS: u64 = 12;

/// One snapshot per timestep `0..NUM_STEPS`; snapshot `t` holds `(t, 0, t+1)`.
fn history() -> SnapshotHistory {
    let facts = (0..NUM_STEPS).map(|t| TemporalFact::new(t as u32, 0, t as u32 + 1, t));
    SnapshotHistory::from_facts(facts, 1).unwrap()
}

proptest! {
    #[test]
    fn rows_match_window_and_batch(
        times in prop::collection::vec(0..NUM_STEPS, 1..8),
        window in 1usize..6,
    ) {
        let h = history();
        let batch = GraphBatcher::new(window).unwrap().batch(&h, &times).unwrap();
        let nonzero = times.iter().filter(|&&t| t != 0).count();

        prop_assert_eq!(batch.batch_size(), nonzero);
        prop_assert_eq!(batch.rows().len(), window);
        for row in batch.rows() {
            prop_assert_eq!(row.len(), nonzero);
        }
    }

    #[test]
    fn zero_time_never_batched(
        times in prop::collection::vec(0..NUM_STEPS, 1..8),
        window in 1usize..6,
    ) {
        let h = history();
        let batch = GraphBatcher::new(window).unwrap().batch(&h, &times).unwrap();
        prop_assert!(batch.times().iter().all(|&t| t != 0));
    }

    #[test]
    fn sequences_stay_aligned(
        times in prop::collection::vec(1..NUM_STEPS, 1..8),
        window in 1usize..6,
    ) {
        let h = history();
        let batch = GraphBatcher::new(window).unwrap().batch(&h, &times).unwrap();

        for (row_idx, row) in batch.rows().iter().enumerate() {
            let active = batch.active(row_idx).unwrap();
            for (seq, snapshot) in active.iter().enumerate() {
                // Snapshot t holds entity t as its first node; the window of
                // query time q starts at q + 1 - history_len.
                let q = batch.times()[seq];
                let len = batch.history_lens()[seq] as u64;
                let expected_time = q + 1 - len + row_idx as u64;
                prop_assert_eq!(snapshot.node_ids()[0] as u64, expected_time);
                prop_assert!(row[seq].is_some());
            }
        }
    }

    #[test]
    fn active_counts_never_grow(
        times in prop::collection::vec(1..NUM_STEPS, 1..8),
        window in 1usize..6,
    ) {
        let h = history();
        let batch = GraphBatcher::new(window).unwrap().batch(&h, &times).unwrap();
        let counts = batch.active_counts();
        prop_assert_eq!(counts[0], batch.batch_size());
        for pair in counts.windows(2) {
            prop_assert!(pair[1] <= pair[0]);
        }
    }
}
