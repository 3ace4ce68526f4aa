//! Prior network: recurrent state alone to per-entity latent Gaussians.

use crate::error::{Error, Result};
use crate::scoring::positive_std;
use candle_core::{Module, Tensor};
use candle_nn::{linear, Linear, VarBuilder};

/// `prior_h = relu(W h)`, `mean = W_m prior_h`, `std = softplus(W_s prior_h) + MIN_STD`.
pub struct PriorNetwork {
    hidden: Linear,
    mean: Linear,
    std: Linear,
}

impl PriorNetwork {
    /// Maps `hidden_size` states to `embed_size` Gaussians.
    pub fn new(hidden_size: usize, embed_size: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            hidden: linear(hidden_size, hidden_size, vb.pp("hidden"))?,
            mean: linear(hidden_size, embed_size, vb.pp("mean"))?,
            std: linear(hidden_size, embed_size, vb.pp("std"))?,
        })
    }

    /// Per-sequence prior `(bsz, embed)` mean and std.
    pub fn forward(&self, hidden: &Tensor) -> Result<(Tensor, Tensor)> {
        let prior_h = self.hidden.forward(hidden)?.relu()?;
        let mean = self.mean.forward(&prior_h)?;
        let std = positive_std(&self.std.forward(&prior_h)?)?;
        Ok((mean, std))
    }

    /// Prior expanded to nodes: row `i` is the prior of sequence `owners[i]`.
    pub fn per_node(&self, hidden: &Tensor, owners: &[u32]) -> Result<(Tensor, Tensor)> {
        let bsz = hidden.dims2()?.0;
        if let Some(&bad) = owners.iter().find(|&&o| o as usize >= bsz) {
            return Err(Error::ShapeMismatch {
                what: "prior owner index",
                expected: bsz,
                got: bad as usize,
            });
        }
        let (mean, std) = self.forward(hidden)?;
        let idx = Tensor::from_vec(owners.to_vec(), (owners.len(),), hidden.device())?;
        Ok((mean.index_select(&idx, 0)?, std.index_select(&idx, 0)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_per_node_expansion() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let prior = PriorNetwork::new(3, 4, vb).unwrap();

        let hidden = Tensor::new(&[[0.1f32, 0.2, 0.3], [-1.0, 0.5, 2.0]], &device).unwrap();
        let (mean, std) = prior.per_node(&hidden, &[0, 0, 0, 1, 1]).unwrap();
        assert_eq!(mean.dims(), &[5, 4]);
        assert_eq!(std.dims(), &[5, 4]);

        let rows = mean.to_vec2::<f32>().unwrap();
        assert_eq!(rows[0], rows[2]);
        assert_eq!(rows[3], rows[4]);
        let stds = std.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!(stds.iter().all(|&v| v > 0.0));
    }

    #[test]
    fn test_owner_out_of_range() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let prior = PriorNetwork::new(2, 2, vb).unwrap();
        let hidden = Tensor::zeros((1, 2), DType::F32, &device).unwrap();
        assert!(prior.per_node(&hidden, &[0, 1]).is_err());
    }
}
