//! Property-based tests for scoring, the Gaussian KL and ranking.
//!
//! Invariants checked for arbitrary inputs:
//! - KL between two Gaussians is finite and non-negative, however small the std
//! - batched scores equal per-triplet scores
//! - filtering other true objects never worsens a rank

#![allow(clippy::unwrap_used)]

use candle_core::{Device, Tensor};
use grafene_temporal::{Fact, Snapshot};
use grafene_tkg::{kl_gaussian, positive_std, LabeledTriplets, LinkEvaluator, ScoringFunction};
use proptest::prelude::*;

const DIM: usize = 4;

fn tensor(values: &[f32]) -> Tensor {
    Tensor::from_vec(values.to_vec(), (values.len() / DIM, DIM), &Device::Cpu).unwrap()
}

fn rows(n: usize) -> impl Strategy<Value = Vec<f32>> {
    prop::collection::vec(-3.0f32..3.0, n * DIM)
}

proptest! {
    #[test]
    fn kl_finite_and_non_negative(
        q_mean in rows(3),
        p_mean in rows(3),
        q_raw in prop::collection::vec(-200.0f32..5.0, 3 * DIM),
        p_raw in prop::collection::vec(-5.0f32..5.0, 3 * DIM),
    ) {
        let q_std = positive_std(&tensor(&q_raw)).unwrap();
        let p_std = positive_std(&tensor(&p_raw)).unwrap();
        let kl = kl_gaussian(&tensor(&q_mean), &q_std, &tensor(&p_mean), &p_std)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();

        prop_assert!(kl.is_finite(), "kl = {}", kl);
        prop_assert!(kl >= -1e-3, "kl = {}", kl);
    }

    #[test]
    fn batch_score_matches_slices(
        s in rows(5),
        r in rows(5),
        o in rows(5),
    ) {
        for f in [ScoringFunction::DistMult, ScoringFunction::ComplEx] {
            let batch = f
                .score_batch(&tensor(&s), &tensor(&r), &tensor(&o))
                .unwrap()
                .to_vec1::<f32>()
                .unwrap();
            for (i, got) in batch.iter().enumerate() {
                let span = i * DIM..(i + 1) * DIM;
                let expected = f.score(&s[span.clone()], &r[span.clone()], &o[span]);
                prop_assert!((got - expected).abs() < 1e-3, "{} row {}", f.name(), i);
            }
        }
    }

    #[test]
    fn filtered_rank_never_worse(
        facts in prop::collection::vec((0u32..6, 0u32..2, 0u32..6), 1..12),
        embeddings in rows(12),
        relation_rows in rows(4),
    ) {
        let facts: Vec<Fact> = facts.into_iter().map(|(s, r, o)| Fact::new(s, r, o)).collect();
        let snapshot = Snapshot::from_facts(&facts, 2).unwrap();
        let n = snapshot.num_nodes();

        let entities: Vec<Vec<f32>> = embeddings.chunks(DIM).take(n).map(<[f32]>::to_vec).collect();
        let relations: Vec<Vec<f32>> = relation_rows.chunks(DIM).map(<[f32]>::to_vec).collect();
        let triplets = LabeledTriplets {
            triplets: snapshot.edges().iter().map(|e| [e.src, e.relation, e.dst]).collect(),
            labels: vec![1.0; snapshot.num_edges()],
        };

        for f in [ScoringFunction::DistMult, ScoringFunction::ComplEx] {
            let raw = LinkEvaluator::new(f, false).ranks(&entities, &relations, &triplets, &snapshot);
            let filtered = LinkEvaluator::new(f, true).ranks(&entities, &relations, &triplets, &snapshot);
            for (r, fr) in raw.iter().zip(&filtered) {
                prop_assert!(*fr >= 1 && fr <= r && *r <= n);
            }
        }
    }
}
