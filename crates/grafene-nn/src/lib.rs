//! Neural building blocks for temporal knowledge graph models.
//!
//! `grafene-nn` holds the candle layers that sit between the snapshot
//! structures of `grafene-temporal` and the model code in `grafene-tkg`.
//!
//! # Modules
//!
//! - [`conv`]: Relational message passing (R-GCN with basis decomposition)
//!   and the [`GraphEncoder`](conv::GraphEncoder) seam
//! - [`recurrent`]: Stacked GRU propagation over a shrinking active prefix
//! - [`init`]: Xavier initialization hints
//!
//! # Example: R-GCN Forward Pass
//!
//! ```rust,ignore
//! use grafene_nn::conv::{GraphEncoder, GraphTensors, RgcnEncoder};
//! use grafene_temporal::BatchedGraph;
//!
//! let graph = BatchedGraph::from_snapshots(&snapshots);
//! let tensors = GraphTensors::new(&graph, &device)?;
//! let encoder = RgcnEncoder::new(64, 32, 2 * num_relations, 8, 2, vb)?;
//! let out = encoder.encode(&tensors, &features, false)?;  // (num_nodes, 32)
//! ```

pub mod conv;
pub mod error;
pub mod init;
pub mod recurrent;

pub use conv::{GraphEncoder, GraphTensors, LinearEncoder, RGCNConv, RgcnEncoder};
pub use error::{Error, Result};
pub use recurrent::{GruPropagator, HiddenState, Propagator};
