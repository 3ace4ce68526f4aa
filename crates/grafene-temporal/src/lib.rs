//! Temporal knowledge graph primitives.
//!
//! A temporal knowledge graph is modeled as **discrete snapshots**: one graph
//! of `(subject, relation, object)` facts per timestep.
//!
//! - [`Snapshot`]: the facts active at one timestep, with positional (local)
//!   node indices and explicit inverse edges
//! - [`SnapshotHistory`]: snapshots keyed by time on a regular grid
//! - [`GraphBatcher`]: lookback windows for a batch of query times, returned
//!   time-major as a [`WindowBatch`]
//! - [`BatchedGraph`]: several snapshots concatenated into one disjoint graph
//!
//! # Example
//!
//! ```rust,ignore
//! use grafene_temporal::{GraphBatcher, SnapshotHistory, TemporalFact};
//!
//! let facts = vec![
//!     TemporalFact::new(0, 0, 1, 10),  // (e0, r0, e1) at t=10
//!     TemporalFact::new(1, 1, 2, 20),
//! ];
//! let history = SnapshotHistory::from_facts(facts, 2)?;
//!
//! let batch = GraphBatcher::new(2)?.batch(&history, &[20])?;
//! for row in 0..batch.window() {
//!     let graphs = batch.active(row)?;
//!     // ...
//! }
//! ```

mod batch;
mod fact;
mod history;
mod snapshot;

pub use batch::{BatchedGraph, GraphBatcher, WindowBatch};
pub use fact::{Fact, TemporalFact, Timestamp};
pub use history::SnapshotHistory;
pub use snapshot::{Edge, Snapshot};

/// Error types for temporal operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("time {0} is not on the history's timestep grid")]
    UnknownTime(Timestamp),

    #[error("relation {relation} out of range (num_relations = {num_relations})")]
    RelationOutOfRange { relation: u32, num_relations: u32 },

    #[error("relation count mismatch: expected {expected}, got {got}")]
    RelationCountMismatch { expected: u32, got: u32 },

    #[error("window length must be at least 1")]
    InvalidWindow,

    #[error("row {row}: present snapshots do not form a prefix of the batch")]
    NonContiguousRow { row: usize },
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
