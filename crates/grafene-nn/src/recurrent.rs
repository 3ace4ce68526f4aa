//! Recurrent state propagation across timesteps.
//!
//! The state is a stack of per-layer hidden tensors, one row per sequence in
//! the batch. Sequences drop out of a batch as their history runs out, so a
//! step only touches a *prefix* of the rows:
//!
//! ```text
//! state (L, B, H) --active_prefix(b)--> (L, b, H) --step--> (L, b, H)
//!                 <--absorb_prefix----- rows b.. kept unchanged
//! ```

use crate::error::{Error, Result};
use candle_core::Tensor;
use candle_nn::rnn::{gru, GRUConfig, GRUState, GRU, RNN};
use candle_nn::VarBuilder;

/// Per-layer hidden state of a stacked recurrent network.
#[derive(Debug, Clone)]
pub struct HiddenState {
    /// One `(batch, hidden)` tensor per layer, bottom first.
    layers: Vec<Tensor>,
}

impl HiddenState {
    /// Wrap per-layer `(batch, hidden)` tensors.
    pub fn new(layers: Vec<Tensor>) -> Self {
        Self { layers }
    }

    /// Expand a learned `(L, 1, H)` initial state to `batch` rows.
    pub fn broadcast(h0: &Tensor, batch: usize) -> Result<Self> {
        let (num_layers, one, hidden) = h0.dims3()?;
        if one != 1 {
            return Err(Error::DimensionMismatch {
                what: "initial hidden state batch",
                expected: 1,
                got: one,
            });
        }
        let layers = (0..num_layers)
            .map(|l| {
                h0.get(l)?
                    .broadcast_as((batch, hidden))?
                    .contiguous()
            })
            .collect::<candle_core::Result<Vec<_>>>()?;
        Ok(Self { layers })
    }

    /// Rows currently held.
    pub fn batch_size(&self) -> usize {
        self.layers.first().map_or(0, |t| t.dims()[0])
    }

    /// Number of layers.
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Per-layer tensors.
    pub fn layers(&self) -> &[Tensor] {
        &self.layers
    }

    /// Top-layer state, `(batch, hidden)`.
    pub fn top(&self) -> Result<&Tensor> {
        self.layers.last().ok_or_else(|| Error::InvalidConfig("empty hidden state".into()))
    }

    /// First `rows` rows of every layer.
    pub fn active_prefix(&self, rows: usize) -> Result<Self> {
        let held = self.batch_size();
        if rows > held {
            return Err(Error::DimensionMismatch {
                what: "active prefix",
                expected: held,
                got: rows,
            });
        }
        let layers = self
            .layers
            .iter()
            .map(|t| t.narrow(0, 0, rows))
            .collect::<candle_core::Result<Vec<_>>>()?;
        Ok(Self { layers })
    }

    /// Replace the first rows with `updated`; remaining rows keep their value.
    pub fn absorb_prefix(&self, updated: &HiddenState) -> Result<Self> {
        if updated.num_layers() != self.num_layers() {
            return Err(Error::DimensionMismatch {
                what: "hidden state layers",
                expected: self.num_layers(),
                got: updated.num_layers(),
            });
        }
        let held = self.batch_size();
        let rows = updated.batch_size();
        if rows > held {
            return Err(Error::DimensionMismatch {
                what: "absorbed prefix",
                expected: held,
                got: rows,
            });
        }
        if rows == held {
            return Ok(updated.clone());
        }

        let layers = self
            .layers
            .iter()
            .zip(&updated.layers)
            .map(|(old, new)| Tensor::cat(&[new, &old.narrow(0, rows, held - rows)?], 0))
            .collect::<candle_core::Result<Vec<_>>>()?;
        Ok(Self { layers })
    }
}

/// A recurrent cell stack advancing a [`HiddenState`] by one timestep.
pub trait Propagator: Send + Sync {
    /// Consume `input` `(batch, input_size)` and return the next state.
    ///
    /// `state` must hold exactly `batch` rows.
    fn propagate(&self, input: &Tensor, state: &HiddenState, train: bool) -> Result<HiddenState>;

    /// Input width.
    fn input_size(&self) -> usize;

    /// Hidden width.
    fn hidden_size(&self) -> usize;

    /// Number of stacked layers.
    fn num_layers(&self) -> usize;
}

/// Stacked GRU with dropout between layers during training.
pub struct GruPropagator {
    cells: Vec<GRU>,
    input_size: usize,
    hidden_size: usize,
    dropout: f32,
}

impl GruPropagator {
    /// Create `num_layers` GRU cells; layer 0 reads `input_size` features.
    pub fn new(
        input_size: usize,
        hidden_size: usize,
        num_layers: usize,
        dropout: f32,
        vb: VarBuilder,
    ) -> Result<Self> {
        if num_layers == 0 {
            return Err(Error::InvalidConfig("gru needs at least one layer".into()));
        }
        let cells = (0..num_layers)
            .map(|l| {
                let input = if l == 0 { input_size } else { hidden_size };
                gru(input, hidden_size, GRUConfig::default(), vb.pp(format!("l{l}")))
            })
            .collect::<candle_core::Result<Vec<_>>>()?;
        Ok(Self {
            cells,
            input_size,
            hidden_size,
            dropout,
        })
    }
}

impl Propagator for GruPropagator {
    fn propagate(&self, input: &Tensor, state: &HiddenState, train: bool) -> Result<HiddenState> {
        if state.num_layers() != self.cells.len() {
            return Err(Error::DimensionMismatch {
                what: "hidden state layers",
                expected: self.cells.len(),
                got: state.num_layers(),
            });
        }
        let rows = input.dims2()?.0;
        if rows != state.batch_size() {
            return Err(Error::DimensionMismatch {
                what: "propagator batch",
                expected: state.batch_size(),
                got: rows,
            });
        }

        let last = self.cells.len() - 1;
        let mut x = input.clone();
        let mut next = Vec::with_capacity(self.cells.len());
        for (l, (cell, h)) in self.cells.iter().zip(state.layers()).enumerate() {
            let out = cell.step(&x, &GRUState { h: h.clone() })?;
            x = out.h.clone();
            if train && l < last && self.dropout > 0.0 {
                x = candle_nn::ops::dropout(&x, self.dropout)?;
            }
            next.push(out.h);
        }
        Ok(HiddenState::new(next))
    }

    fn input_size(&self) -> usize {
        self.input_size
    }

    fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    fn num_layers(&self) -> usize {
        self.cells.len()
    }
}
