//! Rank-based link prediction evaluation on snapshots.
//!
//! For an evaluation fact `(s, r, o)` of a snapshot, every node of the same
//! snapshot is a candidate object and the true object is ranked by score.
//! Inverse edges are facts too, so ranking objects of `(o, r + R, ?)` covers
//! subject prediction.
//!
//! # Filtered vs Raw Metrics
//!
//! | Setting | Description | Use Case |
//! |---------|-------------|----------|
//! | Raw | All other nodes as negatives | Pessimistic estimate |
//! | Filtered | Skip other true objects of `(s, r)` | Standard benchmark |
//!
//! # Standard Metrics
//!
//! | Metric | Range | Description |
//! |--------|-------|-------------|
//! | MRR | (0, 1] | Mean Reciprocal Rank: average of 1/rank |
//! | Hits@1 | [0, 1] | Fraction with rank = 1 |
//! | Hits@3 | [0, 1] | Fraction with rank <= 3 |
//! | Hits@10 | [0, 1] | Fraction with rank <= 10 |

use crate::corrupt::LabeledTriplets;
use crate::decoder::{Decoder, Latent};
use crate::error::Result;
use crate::sampling::ZeroNoise;
use crate::scoring::ScoringFunction;
use candle_core::Tensor;
use grafene_temporal::Snapshot;

/// Rank-based evaluation results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RankMetrics {
    /// Mean Reciprocal Rank: E\[1/rank\]
    pub mrr: f64,
    /// Mean Rank: E\[rank\]
    pub mr: f64,
    /// Hits@1: P(rank = 1)
    pub hits_at_1: f64,
    /// Hits@3: P(rank <= 3)
    pub hits_at_3: f64,
    /// Hits@10: P(rank <= 10)
    pub hits_at_10: f64,
    /// Number of facts ranked
    pub num_triples: usize,
}

impl RankMetrics {
    /// Compute metrics from a list of ranks.
    pub fn from_ranks(ranks: &[usize]) -> Self {
        if ranks.is_empty() {
            return Self::default();
        }

        let n = ranks.len() as f64;
        let mrr: f64 = ranks.iter().map(|&r| 1.0 / r as f64).sum::<f64>() / n;
        let mr: f64 = ranks.iter().map(|&r| r as f64).sum::<f64>() / n;
        let hits_at_1 = ranks.iter().filter(|&&r| r == 1).count() as f64 / n;
        let hits_at_3 = ranks.iter().filter(|&&r| r <= 3).count() as f64 / n;
        let hits_at_10 = ranks.iter().filter(|&&r| r <= 10).count() as f64 / n;

        Self {
            mrr,
            mr,
            hits_at_1,
            hits_at_3,
            hits_at_10,
            num_triples: ranks.len(),
        }
    }

    /// Merge metrics from multiple evaluation runs, weighted by fact count.
    pub fn merge(metrics: &[Self]) -> Self {
        let total_triples: usize = metrics.iter().map(|m| m.num_triples).sum();
        if total_triples == 0 {
            return Self::default();
        }

        let total_f = total_triples as f64;
        let weighted = |f: fn(&Self) -> f64| {
            metrics
                .iter()
                .map(|m| f(m) * m.num_triples as f64)
                .sum::<f64>()
                / total_f
        };

        Self {
            mrr: weighted(|m| m.mrr),
            mr: weighted(|m| m.mr),
            hits_at_1: weighted(|m| m.hits_at_1),
            hits_at_3: weighted(|m| m.hits_at_3),
            hits_at_10: weighted(|m| m.hits_at_10),
            num_triples: total_triples,
        }
    }

    /// Unweighted arithmetic mean: every sequence counts once.
    pub fn mean(metrics: &[Self]) -> Self {
        if metrics.is_empty() {
            return Self::default();
        }
        let n = metrics.len() as f64;
        let avg = |f: fn(&Self) -> f64| metrics.iter().map(f).sum::<f64>() / n;

        Self {
            mrr: avg(|m| m.mrr),
            mr: avg(|m| m.mr),
            hits_at_1: avg(|m| m.hits_at_1),
            hits_at_3: avg(|m| m.hits_at_3),
            hits_at_10: avg(|m| m.hits_at_10),
            num_triples: metrics.iter().map(|m| m.num_triples).sum(),
        }
    }

    /// Format as summary string.
    pub fn summary(&self) -> String {
        format!(
            "MRR: {:.4} | MR: {:.1} | H@1: {:.3} | H@3: {:.3} | H@10: {:.3} (n={})",
            self.mrr, self.mr, self.hits_at_1, self.hits_at_3, self.hits_at_10, self.num_triples
        )
    }
}

/// Result of evaluating one batch of query times.
#[derive(Debug, Clone, Default)]
pub struct EvalOutcome {
    /// Arithmetic mean of per-sequence metrics.
    pub metrics: RankMetrics,
    /// Per-sequence metrics, in batch order (query time descending).
    pub per_sequence: Vec<RankMetrics>,
    /// Sum of per-sequence BCE losses.
    pub loss: f64,
}

impl EvalOutcome {
    /// Average `per_sequence` and sum `losses`.
    pub fn from_sequences(per_sequence: Vec<RankMetrics>, losses: &[f64]) -> Self {
        Self {
            metrics: RankMetrics::mean(&per_sequence),
            per_sequence,
            loss: losses.iter().sum(),
        }
    }
}

/// Pessimistic rank of `target_score`: 1 + number of strictly higher scores.
pub fn compute_rank(target_score: f32, all_scores: &[f32]) -> usize {
    1 + all_scores.iter().filter(|&&s| s > target_score).count()
}

/// Ranks true objects among snapshot nodes.
#[derive(Debug, Clone, Copy)]
pub struct LinkEvaluator {
    scoring: ScoringFunction,
    filtered: bool,
}

impl LinkEvaluator {
    /// With `filtered`, other true objects of the snapshot are not counted
    /// as competitors.
    pub fn new(scoring: ScoringFunction, filtered: bool) -> Self {
        Self { scoring, filtered }
    }

    /// Rank of the true object of every positive triplet.
    ///
    /// `entities` holds one row per local node, `relations` one row per
    /// relation id.
    pub fn ranks(
        &self,
        entities: &[Vec<f32>],
        relations: &[Vec<f32>],
        triplets: &LabeledTriplets,
        snapshot: &Snapshot,
    ) -> Vec<usize> {
        triplets
            .positives()
            .map(|&[s, r, o]| {
                let (s_emb, r_emb) = (&entities[s as usize], &relations[r as usize]);
                let true_score = self.scoring.score(s_emb, r_emb, &entities[o as usize]);

                let scores: Vec<f32> = (0..entities.len() as u32)
                    .filter(|&c| c != o)
                    .filter(|&c| !(self.filtered && snapshot.contains(s, r, c)))
                    .map(|c| self.scoring.score(s_emb, r_emb, &entities[c as usize]))
                    .collect();
                compute_rank(true_score, &scores)
            })
            .collect()
    }

    /// Metrics and monitoring loss for one sequence's final snapshot.
    ///
    /// `entities` are the posterior means of the snapshot's nodes; no
    /// gradient flows through the result.
    pub fn evaluate_sequence(
        &self,
        entities: &Tensor,
        relations: &Tensor,
        triplets: &LabeledTriplets,
        snapshot: &Snapshot,
        sequence: usize,
    ) -> Result<(RankMetrics, f64)> {
        let entities = entities.detach();
        let relations = relations.detach();

        let decoded = Decoder::new(self.scoring).decode(
            Latent::mean_only(&entities),
            Latent::mean_only(&relations),
            triplets,
            &mut ZeroNoise,
            sequence,
        )?;
        let loss = decoded.loss.to_scalar::<f32>()? as f64;

        let ranks = self.ranks(
            &entities.to_vec2::<f32>()?,
            &relations.to_vec2::<f32>()?,
            triplets,
            snapshot,
        );
        Ok((RankMetrics::from_ranks(&ranks), loss))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use grafene_temporal::Fact;

    #[test]
    fn test_rank_metrics_from_ranks() {
        let ranks = vec![1, 2, 3, 10, 100];
        let metrics = RankMetrics::from_ranks(&ranks);

        // MRR = (1/1 + 1/2 + 1/3 + 1/10 + 1/100) / 5
        assert!((metrics.mrr - 0.3886).abs() < 0.001);
        // MR = (1 + 2 + 3 + 10 + 100) / 5 = 23.2
        assert!((metrics.mr - 23.2).abs() < 0.1);
        assert!((metrics.hits_at_1 - 0.2).abs() < 1e-6);
        assert!((metrics.hits_at_3 - 0.6).abs() < 1e-6);
        assert!((metrics.hits_at_10 - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_rank_metrics_empty() {
        let metrics = RankMetrics::from_ranks(&[]);
        assert_eq!(metrics.num_triples, 0);
        assert_eq!(RankMetrics::mean(&[]), RankMetrics::default());
    }

    #[test]
    fn test_compute_rank() {
        let scores = vec![0.9, 0.8, 0.7, 0.5, 0.3];
        assert_eq!(compute_rank(0.95, &scores), 1);
        assert_eq!(compute_rank(0.8, &scores), 2);
        assert_eq!(compute_rank(0.1, &scores), 6);
    }

    #[test]
    fn test_mean_vs_merge() {
        let a = RankMetrics::from_ranks(&[1]);
        let b = RankMetrics::from_ranks(&[2, 2, 2]);

        // Sequence mean: (1.0 + 0.5) / 2
        assert!((RankMetrics::mean(&[a.clone(), b.clone()]).mrr - 0.75).abs() < 1e-9);
        // Fact-weighted: (1.0 + 3 * 0.5) / 4
        assert!((RankMetrics::merge(&[a, b]).mrr - 0.625).abs() < 1e-9);
    }

    /// Nodes 0, 1, 2; facts (0, r0, 1) and (0, r0, 2).
    fn snapshot() -> Snapshot {
        Snapshot::from_facts(&[Fact::new(10, 0, 11), Fact::new(10, 0, 12)], 1).unwrap()
    }

    #[test]
    fn test_filtered_skips_other_true_objects() {
        let snap = snapshot();
        let entities = vec![vec![1.0, 1.0], vec![1.0, 1.0], vec![3.0, 3.0]];
        let relations = vec![vec![1.0, 1.0], vec![1.0, 1.0]];
        let triplets = LabeledTriplets {
            triplets: vec![[0, 0, 1]],
            labels: vec![1.0],
        };

        // Node 2 outscores the true object 1 but is itself a true object.
        let raw = LinkEvaluator::new(ScoringFunction::DistMult, false);
        let filtered = LinkEvaluator::new(ScoringFunction::DistMult, true);
        assert_eq!(raw.ranks(&entities, &relations, &triplets, &snap), vec![2]);
        assert_eq!(filtered.ranks(&entities, &relations, &triplets, &snap), vec![1]);
    }

    #[test]
    fn test_evaluate_sequence_perfect() {
        let device = Device::Cpu;
        let snap = snapshot();
        let entities = Tensor::new(&[[1f32, 1.0], [2.0, 2.0], [2.0, 2.0]], &device).unwrap();
        let relations = Tensor::new(&[[1f32, 1.0], [1.0, 1.0]], &device).unwrap();
        let triplets = LabeledTriplets {
            triplets: vec![[0, 0, 1], [0, 0, 2]],
            labels: vec![1.0, 1.0],
        };

        let evaluator = LinkEvaluator::new(ScoringFunction::DistMult, true);
        let (metrics, loss) = evaluator
            .evaluate_sequence(&entities, &relations, &triplets, &snap, 0)
            .unwrap();
        assert_eq!(metrics.num_triples, 2);
        assert!((metrics.mrr - 1.0).abs() < 1e-9);
        assert!(loss.is_finite() && loss >= 0.0);
    }
}
