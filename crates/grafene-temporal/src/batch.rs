//! Lookback-window batching of snapshots.
//!
//! A training or evaluation batch is a list of query times. Each query time
//! becomes a *sequence*: the snapshots of up to `window` timesteps ending at
//! the query time. The batch is returned time-major, one row per window
//! position:
//!
//! ```text
//!             seq 0 (t=50)   seq 1 (t=40)   seq 2 (t=10)
//! row 0       G(30)          G(20)          G(10)
//! row 1       G(40)          G(30)          -
//! row 2       G(50)          G(40)          -
//! ```
//!
//! Sequences are sorted by query time, descending, and a short history is
//! padded with absence markers *after* its last snapshot. Both together make
//! the present entries of every row a contiguous prefix, which lets the
//! recurrent state be read and written on a shrinking prefix of the batch.

use crate::fact::Timestamp;
use crate::history::SnapshotHistory;
use crate::snapshot::Snapshot;
use crate::{Error, Result};
use tracing::debug;

/// Builds time-major window batches from a [`SnapshotHistory`].
#[derive(Debug, Clone, Copy)]
pub struct GraphBatcher {
    window: usize,
}

impl GraphBatcher {
    /// Create a batcher for windows of `window` timesteps.
    pub fn new(window: usize) -> Result<Self> {
        if window == 0 {
            return Err(Error::InvalidWindow);
        }
        Ok(Self { window })
    }

    /// Window length.
    pub fn window(&self) -> usize {
        self.window
    }

    /// Assemble the window batch for `query_times`.
    ///
    /// Times equal to zero have no history and are dropped. If nothing is
    /// left, the returned batch is empty and callers should skip it.
    pub fn batch<'a>(
        &self,
        history: &'a SnapshotHistory,
        query_times: &[Timestamp],
    ) -> Result<WindowBatch<'a>> {
        let mut times: Vec<Timestamp> = query_times.iter().copied().filter(|&t| t != 0).collect();
        if times.len() < query_times.len() {
            debug!(
                dropped = query_times.len() - times.len(),
                "dropping zero query times"
            );
        }
        times.sort_unstable_by(|a, b| b.cmp(a));

        let all_times = history.times();
        let mut sequences = Vec::with_capacity(times.len());
        let mut history_lens = Vec::with_capacity(times.len());

        for &t in &times {
            let length = history.index_of(t)? + 1;
            let start = length.saturating_sub(self.window);

            let mut seq: Vec<Option<&'a Snapshot>> = all_times[start..length]
                .iter()
                .map(|&time| history.get(time).ok_or(Error::UnknownTime(time)).map(Some))
                .collect::<Result<_>>()?;
            history_lens.push(seq.len());
            seq.resize(self.window, None);
            sequences.push(seq);
        }

        // Transpose sequence-major -> time-major.
        let rows = (0..self.window)
            .map(|row| sequences.iter().map(|seq| seq[row]).collect())
            .collect();

        Ok(WindowBatch {
            times,
            history_lens,
            rows,
            window: self.window,
        })
    }
}

/// A time-major batch of snapshot windows.
#[derive(Debug, Clone)]
pub struct WindowBatch<'a> {
    /// Query times, descending.
    times: Vec<Timestamp>,
    /// Number of present snapshots per sequence.
    history_lens: Vec<usize>,
    /// `window` rows of per-sequence entries.
    rows: Vec<Vec<Option<&'a Snapshot>>>,
    window: usize,
}

impl<'a> WindowBatch<'a> {
    /// Query times in batch order (descending).
    pub fn times(&self) -> &[Timestamp] {
        &self.times
    }

    /// Number of sequences.
    pub fn batch_size(&self) -> usize {
        self.times.len()
    }

    /// Whether the batch has no sequence.
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Window length (number of rows).
    pub fn window(&self) -> usize {
        self.window
    }

    /// Present snapshots per sequence.
    pub fn history_lens(&self) -> &[usize] {
        &self.history_lens
    }

    /// Raw row, absence markers included.
    pub fn row(&self, row: usize) -> &[Option<&'a Snapshot>] {
        &self.rows[row]
    }

    /// All rows.
    pub fn rows(&self) -> &[Vec<Option<&'a Snapshot>>] {
        &self.rows
    }

    /// Present snapshots of `row`, in batch order.
    ///
    /// The present entries must form a prefix of the row; position `i` of the
    /// result is sequence `i` of the batch.
    pub fn active(&self, row: usize) -> Result<Vec<&'a Snapshot>> {
        let entries = &self.rows[row];
        let active: Vec<&'a Snapshot> = entries.iter().map_while(|e| *e).collect();
        if entries[active.len()..].iter().any(Option::is_some) {
            return Err(Error::NonContiguousRow { row });
        }
        Ok(active)
    }

    /// Number of present sequences per row.
    pub fn active_counts(&self) -> Vec<usize> {
        self.rows
            .iter()
            .map(|r| r.iter().filter(|e| e.is_some()).count())
            .collect()
    }
}

/// Several snapshots concatenated into one disjoint graph.
///
/// Node `k` of snapshot `i` becomes node `offset_i + k`. Per-node owners and
/// per-graph node counts allow splitting node-level outputs back into one
/// chunk per snapshot.
#[derive(Debug, Clone, Default)]
pub struct BatchedGraph {
    node_ids: Vec<u32>,
    owners: Vec<u32>,
    node_sizes: Vec<usize>,
    src: Vec<u32>,
    dst: Vec<u32>,
    relations: Vec<u32>,
    norm: Vec<f32>,
    reverse_norm: Vec<f32>,
}

impl BatchedGraph {
    /// Concatenate `snapshots` in order.
    pub fn from_snapshots(snapshots: &[&Snapshot]) -> Self {
        let mut g = Self::default();
        let mut offset = 0u32;

        for (owner, snapshot) in snapshots.iter().enumerate() {
            let n = snapshot.num_nodes();
            g.node_ids.extend_from_slice(snapshot.node_ids());
            g.owners.extend(std::iter::repeat(owner as u32).take(n));
            g.node_sizes.push(n);

            for e in snapshot.edges() {
                g.src.push(offset + e.src);
                g.dst.push(offset + e.dst);
                g.relations.push(e.relation);
            }
            offset += n as u32;
        }

        let total = offset as usize;
        let mut in_degree = vec![0u32; total];
        let mut out_degree = vec![0u32; total];
        for (&s, &d) in g.src.iter().zip(&g.dst) {
            in_degree[d as usize] += 1;
            out_degree[s as usize] += 1;
        }
        g.norm = g.dst.iter().map(|&d| 1.0 / in_degree[d as usize] as f32).collect();
        g.reverse_norm = g.src.iter().map(|&s| 1.0 / out_degree[s as usize] as f32).collect();
        g
    }

    /// Global entity id per node.
    pub fn node_ids(&self) -> &[u32] {
        &self.node_ids
    }

    /// Index of the owning snapshot per node.
    pub fn owners(&self) -> &[u32] {
        &self.owners
    }

    /// Node count per snapshot.
    pub fn node_sizes(&self) -> &[usize] {
        &self.node_sizes
    }

    /// Edge sources.
    pub fn src(&self) -> &[u32] {
        &self.src
    }

    /// Edge destinations.
    pub fn dst(&self) -> &[u32] {
        &self.dst
    }

    /// Edge relation ids.
    pub fn relations(&self) -> &[u32] {
        &self.relations
    }

    /// `1 / in_degree(dst)` per edge.
    pub fn norm(&self) -> &[f32] {
        &self.norm
    }

    /// `1 / out_degree(src)` per edge, for reverse-direction aggregation.
    pub fn reverse_norm(&self) -> &[f32] {
        &self.reverse_norm
    }

    /// Total node count.
    pub fn num_nodes(&self) -> usize {
        self.node_ids.len()
    }

    /// Total edge count.
    pub fn num_edges(&self) -> usize {
        self.src.len()
    }

    /// Number of concatenated snapshots.
    pub fn num_graphs(&self) -> usize {
        self.node_sizes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fact::TemporalFact;

    /// Five timesteps at 10, 20, ..., 50.
    fn history() -> SnapshotHistory {
        let facts = (1..=5u64).map(|i| TemporalFact::new(i as u32, 0, i as u32 + 1, i * 10));
        SnapshotHistory::from_facts(facts, 1).unwrap()
    }

    #[test]
    fn test_short_history_absent_after_first_row() {
        let h = history();
        let batcher = GraphBatcher::new(3).unwrap();
        let batch = batcher.batch(&h, &[10, 50]).unwrap();

        // Sorted descending: A (t=50) first, B (t=10) second.
        assert_eq!(batch.times(), &[50, 10]);
        assert_eq!(batch.history_lens(), &[3, 1]);
        assert_eq!(batch.rows().len(), 3);
        assert_eq!(batch.active_counts(), vec![2, 1, 1]);

        assert!(batch.row(0)[1].is_some());
        assert!(batch.row(1)[1].is_none());
        assert!(batch.row(2)[1].is_none());

        // A's window is 30, 40, 50.
        let last = batch.active(2).unwrap();
        assert_eq!(last[0].node_ids(), h.get(50).unwrap().node_ids());
    }

    #[test]
    fn test_zero_times_dropped() {
        let facts = (0..3u64).map(|i| TemporalFact::new(0, 0, 1, i));
        let h = SnapshotHistory::from_facts(facts, 1).unwrap();
        let batch = GraphBatcher::new(2).unwrap().batch(&h, &[0, 2, 0]).unwrap();
        assert_eq!(batch.times(), &[2]);

        let empty = GraphBatcher::new(2).unwrap().batch(&h, &[0]).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_zero_window_rejected() {
        assert!(matches!(GraphBatcher::new(0), Err(Error::InvalidWindow)));
    }

    #[test]
    fn test_batched_graph_offsets() {
        let h = history();
        let a = h.get(10).unwrap();
        let b = h.get(20).unwrap();
        let g = BatchedGraph::from_snapshots(&[a, b]);

        assert_eq!(g.num_graphs(), 2);
        assert_eq!(g.node_sizes(), &[2, 2]);
        assert_eq!(g.owners(), &[0, 0, 1, 1]);
        assert_eq!(g.node_ids(), &[1, 2, 2, 3]);
        // Second graph's forward edge is shifted by 2.
        assert_eq!((g.src()[2], g.dst()[2]), (2, 3));
        assert_eq!(g.num_edges(), 4);
        assert!(g.norm().iter().all(|&n| (n - 1.0).abs() < 1e-6));
    }
}
