//! Latent sampling: injectable noise, reparameterization and the Gaussian KL.

use candle_core::{Device, Result, Shape, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

/// Source of standard-normal noise for reparameterized sampling.
pub trait NoiseSource {
    /// A tensor of `shape` filled with N(0, 1) draws.
    fn standard_normal(&mut self, shape: &Shape, device: &Device) -> Result<Tensor>;
}

/// Seeded, reproducible Gaussian noise.
pub struct SeededNoise {
    rng: StdRng,
}

impl SeededNoise {
    /// Noise drawn from a `StdRng` seeded with `seed`.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl NoiseSource for SeededNoise {
    fn standard_normal(&mut self, shape: &Shape, device: &Device) -> Result<Tensor> {
        let data: Vec<f32> = (0..shape.elem_count())
            .map(|_| self.rng.sample(StandardNormal))
            .collect();
        Tensor::from_vec(data, shape.clone(), device)
    }
}

/// Always zero: sampling collapses to the mean.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZeroNoise;

impl NoiseSource for ZeroNoise {
    fn standard_normal(&mut self, shape: &Shape, device: &Device) -> Result<Tensor> {
        Tensor::zeros(shape.clone(), candle_core::DType::F32, device)
    }
}

/// Reparameterized sample `mean + std * ε`.
pub fn reparameterize(mean: &Tensor, std: &Tensor, noise: &mut dyn NoiseSource) -> Result<Tensor> {
    let eps = noise.standard_normal(mean.shape(), mean.device())?;
    mean.add(&std.mul(&eps)?)
}

/// KL(q || p) between diagonal Gaussians given by mean and std, summed.
///
/// ```text
/// 0.5 * Σ (2 ln σp − 2 ln σq + (σq² + (μq − μp)²) / σp² − 1)
/// ```
pub fn kl_gaussian(
    q_mean: &Tensor,
    q_std: &Tensor,
    p_mean: &Tensor,
    p_std: &Tensor,
) -> Result<Tensor> {
    let log_ratio = p_std.log()?.sub(&q_std.log()?)?.affine(2.0, 0.0)?;
    let spread = q_std.sqr()?.add(&q_mean.sub(p_mean)?.sqr()?)?.div(&p_std.sqr()?)?;
    log_ratio.add(&spread)?.affine(1.0, -1.0)?.sum_all()?.affine(0.5, 0.0)
}
