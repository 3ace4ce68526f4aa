//! Posterior encoder: graph + recurrent state to per-entity latent Gaussians.
//!
//! ```text
//! node feature = [ entity_row(node id) ; h(owner sequence) ]
//!           mean = GNN_mean(graph, features)
//!            std = softplus(GNN_std(graph, features)) + MIN_STD
//! ```

use crate::config::{EncoderKind, ModelConfig};
use crate::embedding::EmbeddingStore;
use crate::error::{Error, Result};
use crate::scoring::positive_std;
use candle_core::Tensor;
use candle_nn::VarBuilder;
use grafene_nn::{GraphEncoder, GraphTensors, LinearEncoder, RgcnEncoder};
use grafene_temporal::BatchedGraph;

/// Posterior entity distributions of one window row.
#[derive(Debug, Clone)]
pub struct Posterior {
    /// `(num_nodes, embed)` over the whole batched graph.
    pub means: Tensor,
    /// Same shape as `means`; absent in mean-only mode.
    pub stds: Option<Tensor>,
    node_sizes: Vec<usize>,
}

impl Posterior {
    /// Node counts per sequence.
    pub fn node_sizes(&self) -> &[usize] {
        &self.node_sizes
    }

    /// Means split into one `(nodes_i, embed)` chunk per sequence.
    pub fn split_means(&self) -> Result<Vec<Tensor>> {
        split(&self.means, &self.node_sizes)
    }

    /// Stds split per sequence, if computed.
    pub fn split_stds(&self) -> Result<Option<Vec<Tensor>>> {
        self.stds
            .as_ref()
            .map(|s| split(s, &self.node_sizes))
            .transpose()
    }
}

/// Split rows of `t` into consecutive chunks of `sizes`.
pub(crate) fn split(t: &Tensor, sizes: &[usize]) -> Result<Vec<Tensor>> {
    let mut offset = 0;
    sizes
        .iter()
        .map(|&n| -> Result<Tensor> {
            let chunk = t.narrow(0, offset, n)?;
            offset += n;
            Ok(chunk)
        })
        .collect()
}

/// Mean and std graph encoders sharing one feature assembly.
pub struct PosteriorEncoder {
    mean: Box<dyn GraphEncoder>,
    std: Box<dyn GraphEncoder>,
}

impl PosteriorEncoder {
    /// Build the encoder pair selected by `config.encoder`.
    ///
    /// Inputs are `embed_size + hidden_size` wide, outputs `embed_size`;
    /// relational layers see `2 * num_relations` edge types.
    pub fn new(config: &ModelConfig, num_relations: usize, vb: VarBuilder) -> Result<Self> {
        let build = |vb: VarBuilder| -> Result<Box<dyn GraphEncoder>> {
            let input = config.embed_size + config.hidden_size;
            let encoder: Box<dyn GraphEncoder> = match config.encoder {
                EncoderKind::Rgcn => Box::new(RgcnEncoder::new(
                    input,
                    config.embed_size,
                    2 * num_relations,
                    config.num_bases,
                    config.num_gnn_layers,
                    vb,
                )?),
                EncoderKind::Linear => {
                    Box::new(LinearEncoder::new(input, config.embed_size, vb)?)
                }
            };
            Ok(encoder)
        };
        Self::from_encoders(build(vb.pp("mean"))?, build(vb.pp("std"))?)
    }

    /// Wrap explicit encoders; both must have the same input and output widths.
    pub fn from_encoders(mean: Box<dyn GraphEncoder>, std: Box<dyn GraphEncoder>) -> Result<Self> {
        let checks = [
            ("std encoder input", mean.in_features(), std.in_features()),
            ("std encoder output", mean.out_features(), std.out_features()),
        ];
        for (what, expected, got) in checks {
            if expected != got {
                return Err(Error::ShapeMismatch { what, expected, got });
            }
        }
        Ok(Self { mean, std })
    }

    /// Node feature width in and latent width out.
    pub fn feature_sizes(&self) -> (usize, usize) {
        (self.mean.in_features(), self.mean.out_features())
    }

    /// Encoder name, e.g. "rgcn".
    pub fn name(&self) -> &'static str {
        self.mean.name()
    }

    /// Encode one row.
    ///
    /// `hidden` is the top recurrent layer of the active prefix, one row per
    /// graph in `graph`. With `with_std == false` only means are computed.
    pub fn encode(
        &self,
        store: &EmbeddingStore,
        graph: &BatchedGraph,
        hidden: &Tensor,
        reverse: bool,
        with_std: bool,
    ) -> Result<Posterior> {
        let device = hidden.device();
        let rows = hidden.dims2()?.0;
        if rows != graph.num_graphs() {
            return Err(Error::ShapeMismatch {
                what: "hidden rows per graph",
                expected: graph.num_graphs(),
                got: rows,
            });
        }

        let n = graph.num_nodes();
        let ids = Tensor::from_vec(graph.node_ids().to_vec(), (n,), device)?;
        let owners = Tensor::from_vec(graph.owners().to_vec(), (n,), device)?;
        let features = Tensor::cat(
            &[&store.entity_rows(&ids)?, &hidden.index_select(&owners, 0)?],
            1,
        )?;
        let tensors = GraphTensors::new(graph, device)?;

        let means = checked(self.mean.encode(&tensors, &features, reverse)?, n)?;
        let stds = if with_std {
            let raw = checked(self.std.encode(&tensors, &features, reverse)?, n)?;
            Some(positive_std(&raw)?)
        } else {
            None
        };

        Ok(Posterior {
            means,
            stds,
            node_sizes: graph.node_sizes().to_vec(),
        })
    }
}

fn checked(out: Tensor, nodes: usize) -> Result<Tensor> {
    let got = out.dims().first().copied().unwrap_or(0);
    if got != nodes {
        return Err(Error::ShapeMismatch {
            what: "encoder node count",
            expected: nodes,
            got,
        });
    }
    Ok(out)
}
