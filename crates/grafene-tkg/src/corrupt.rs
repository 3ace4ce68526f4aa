//! Negative sampling by corrupting snapshot facts.

use crate::error::{Error, Result};
use grafene_temporal::Snapshot;
use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use tracing::warn;

/// Attempts to draw a corruption that is not a true fact before giving up.
const MAX_REJECTIONS: usize = 16;

/// Triplets of one snapshot in local node indices, with binary labels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabeledTriplets {
    /// `[subject, relation, object]`, local indices.
    pub triplets: Vec<[u32; 3]>,
    /// 1.0 for true facts, 0.0 for corruptions.
    pub labels: Vec<f32>,
}

impl LabeledTriplets {
    /// Number of triplets, corruptions included.
    pub fn len(&self) -> usize {
        self.triplets.len()
    }

    /// Whether there are no triplets at all.
    pub fn is_empty(&self) -> bool {
        self.triplets.is_empty()
    }

    /// Number of positive triplets.
    pub fn num_positive(&self) -> usize {
        self.labels.iter().filter(|&&l| l > 0.5).count()
    }

    /// Positive triplets only.
    pub fn positives(&self) -> impl Iterator<Item = &[u32; 3]> {
        self.triplets
            .iter()
            .zip(&self.labels)
            .filter(|(_, &l)| l > 0.5)
            .map(|(t, _)| t)
    }

    /// Column `k` (0 = subject, 1 = relation, 2 = object).
    pub fn column(&self, k: usize) -> Vec<u32> {
        self.triplets.iter().map(|t| t[k]).collect()
    }
}

/// Produces labeled triplets for each snapshot of a window row.
///
/// Every returned set holds at least one positive triplet.
pub trait Corrupter {
    /// Triplets for a training step.
    fn sample_train(&mut self, snapshots: &[&Snapshot]) -> Result<Vec<LabeledTriplets>>;

    /// Triplets for an evaluation step.
    fn sample_eval(&mut self, snapshots: &[&Snapshot]) -> Result<Vec<LabeledTriplets>>;
}

/// Corrupts the subject or object of each fact with a uniformly drawn node
/// of the same snapshot.
///
/// Corruptions that hit a true fact are redrawn a few times; after that the
/// last draw is kept.
pub struct UniformCorrupter {
    rng: StdRng,
    negative_rate: usize,
    num_pos_facts: usize,
}

impl UniformCorrupter {
    /// `negative_rate` corruptions per positive, at most `num_pos_facts`
    /// positives per training snapshot.
    pub fn new(negative_rate: usize, num_pos_facts: usize, seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            negative_rate,
            num_pos_facts,
        }
    }

    fn label(
        &mut self,
        snapshot: &Snapshot,
        cap: Option<usize>,
        sequence: usize,
    ) -> Result<LabeledTriplets> {
        let edges = snapshot.edges();
        if edges.is_empty() {
            return Err(Error::NoPositiveFacts { sequence });
        }

        let picked: Vec<usize> = match cap {
            Some(cap) if edges.len() > cap => {
                let mut idx = index::sample(&mut self.rng, edges.len(), cap).into_vec();
                idx.sort_unstable();
                idx
            }
            _ => (0..edges.len()).collect(),
        };

        let num_nodes = snapshot.num_nodes() as u32;
        let total = picked.len() * (1 + self.negative_rate);
        let mut out = LabeledTriplets {
            triplets: Vec::with_capacity(total),
            labels: Vec::with_capacity(total),
        };
        let mut collisions = 0usize;

        for &i in &picked {
            let e = &edges[i];
            out.triplets.push([e.src, e.relation, e.dst]);
            out.labels.push(1.0);

            for _ in 0..self.negative_rate {
                let mut candidate = [e.src, e.relation, e.dst];
                let mut accepted = false;
                for _ in 0..MAX_REJECTIONS {
                    candidate = [e.src, e.relation, e.dst];
                    let node = self.rng.gen_range(0..num_nodes);
                    if self.rng.gen_bool(0.5) {
                        candidate[0] = node;
                    } else {
                        candidate[2] = node;
                    }
                    if !snapshot.contains(candidate[0], candidate[1], candidate[2]) {
                        accepted = true;
                        break;
                    }
                }
                if !accepted {
                    collisions += 1;
                }
                out.triplets.push(candidate);
                out.labels.push(0.0);
            }
        }

        if collisions > 0 {
            warn!(
                sequence,
                collisions,
                nodes = num_nodes,
                "negatives coincide with true facts"
            );
        }
        Ok(out)
    }
}

impl Corrupter for UniformCorrupter {
    fn sample_train(&mut self, snapshots: &[&Snapshot]) -> Result<Vec<LabeledTriplets>> {
        let cap = Some(self.num_pos_facts);
        snapshots
            .iter()
            .enumerate()
            .map(|(i, s)| self.label(s, cap, i))
            .collect()
    }

    fn sample_eval(&mut self, snapshots: &[&Snapshot]) -> Result<Vec<LabeledTriplets>> {
        snapshots
            .iter()
            .enumerate()
            .map(|(i, s)| self.label(s, None, i))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grafene_temporal::Fact;

    fn snapshot() -> Snapshot {
        let facts: Vec<Fact> = (0..6).map(|i| Fact::new(i, i % 2, (i + 1) % 7)).collect();
        Snapshot::from_facts(&facts, 2).unwrap()
    }

    #[test]
    fn test_counts_and_labels() {
        let snap = snapshot();
        let mut c = UniformCorrupter::new(3, 1000, 1);
        let sets = c.sample_train(&[&snap]).unwrap();
        let set = &sets[0];

        // Forward and inverse edges are both positives.
        assert_eq!(set.num_positive(), snap.num_edges());
        assert_eq!(set.len(), snap.num_edges() * 4);
        assert_eq!(set.labels.len(), set.triplets.len());
        for t in &set.triplets {
            assert!((t[0] as usize) < snap.num_nodes());
            assert!((t[2] as usize) < snap.num_nodes());
        }
    }

    #[test]
    fn test_positive_cap() {
        let snap = snapshot();
        let mut c = UniformCorrupter::new(1, 4, 1);
        let set = &c.sample_train(&[&snap]).unwrap()[0];
        assert_eq!(set.num_positive(), 4);
        assert!(set.positives().all(|t| snap.contains(t[0], t[1], t[2])));

        // Evaluation keeps every fact.
        let eval = &c.sample_eval(&[&snap]).unwrap()[0];
        assert_eq!(eval.num_positive(), snap.num_edges());
    }

    #[test]
    fn test_negatives_avoid_true_facts() {
        let snap = snapshot();
        let mut c = UniformCorrupter::new(5, 1000, 3);
        let set = &c.sample_train(&[&snap]).unwrap()[0];
        let false_hits = set
            .triplets
            .iter()
            .zip(&set.labels)
            .filter(|(t, &l)| l == 0.0 && snap.contains(t[0], t[1], t[2]))
            .count();
        assert_eq!(false_hits, 0);
    }

    #[test]
    fn test_empty_snapshot_has_no_positives() {
        let empty = Snapshot::from_facts(&[], 1).unwrap();
        let mut c = UniformCorrupter::new(1, 10, 0);
        assert!(matches!(
            c.sample_train(&[&empty]),
            Err(Error::NoPositiveFacts { sequence: 0 })
        ));
    }

    #[test]
    fn test_seeded_reproducible() {
        let snap = snapshot();
        let a = UniformCorrupter::new(2, 100, 9).sample_train(&[&snap]).unwrap();
        let b = UniformCorrupter::new(2, 100, 9).sample_train(&[&snap]).unwrap();
        assert_eq!(a, b);
    }
}
