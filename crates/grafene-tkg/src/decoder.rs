//! Decoder: sampled latents to fact logits, BCE loss and the pooled fact summary.

use crate::corrupt::LabeledTriplets;
use crate::error::{Error, Result};
use crate::sampling::{reparameterize, NoiseSource, ZeroNoise};
use crate::scoring::{bce_with_logits, ScoringFunction};
use candle_core::{Device, Tensor};

/// A table of latent Gaussians, or plain means when `std` is `None`.
#[derive(Debug, Clone, Copy)]
pub struct Latent<'a> {
    pub mean: &'a Tensor,
    pub std: Option<&'a Tensor>,
}

impl<'a> Latent<'a> {
    /// Gaussian table; sampling reparameterizes when `std` is present.
    pub fn new(mean: &'a Tensor, std: Option<&'a Tensor>) -> Self {
        Self { mean, std }
    }

    /// Deterministic table: sampling returns the mean.
    pub fn mean_only(mean: &'a Tensor) -> Self {
        Self { mean, std: None }
    }

    /// Rows `idx`, reparameterized when a std is present.
    fn sample(&self, idx: &Tensor, noise: &mut dyn NoiseSource) -> Result<Tensor> {
        let mean = self.mean.index_select(idx, 0)?;
        match self.std {
            Some(std) => Ok(reparameterize(&mean, &std.index_select(idx, 0)?, noise)?),
            None => Ok(mean),
        }
    }
}

/// Output of decoding one sequence's triplets.
#[derive(Debug, Clone)]
pub struct Decoded {
    /// Mean BCE over all triplets, scalar.
    pub loss: Tensor,
    /// Element-wise max of `[s ; r ; o]` over positive triplets, `(3 * embed,)`.
    pub pooled: Tensor,
}

/// Bilinear decoder over sampled entity and relation latents.
#[derive(Debug, Clone, Copy)]
pub struct Decoder {
    scoring: ScoringFunction,
}

impl Decoder {
    /// Decoder scoring with `scoring`.
    pub fn new(scoring: ScoringFunction) -> Self {
        Self { scoring }
    }

    /// Scoring function in use.
    pub fn scoring(&self) -> ScoringFunction {
        self.scoring
    }

    /// Score `triplets` (local entity indices into `entities`) and pool the
    /// positives.
    ///
    /// One sample is drawn per triplet slot. `sequence` only labels errors.
    pub fn decode(
        &self,
        entities: Latent<'_>,
        relations: Latent<'_>,
        triplets: &LabeledTriplets,
        noise: &mut dyn NoiseSource,
        sequence: usize,
    ) -> Result<Decoded> {
        let positives = positive_rows(triplets, sequence)?;
        let device = entities.mean.device();
        let [s_idx, r_idx, o_idx] = columns(triplets, device)?;

        let s = entities.sample(&s_idx, noise)?;
        let r = relations.sample(&r_idx, noise)?;
        let o = entities.sample(&o_idx, noise)?;

        let logits = self.scoring.score_batch(&s, &r, &o)?;
        let labels = Tensor::from_vec(triplets.labels.clone(), (triplets.len(),), device)?;
        let loss = bce_with_logits(&logits, &labels)?;

        let pos = Tensor::from_vec(positives, (triplets.num_positive(),), device)?;
        let pooled = Tensor::cat(&[&s, &r, &o], 1)?.index_select(&pos, 0)?.max(0)?;
        Ok(Decoded { loss, pooled })
    }

    /// Pooled summary from means only, no loss.
    pub fn pool_means(
        &self,
        entities: &Tensor,
        relations: &Tensor,
        triplets: &LabeledTriplets,
        sequence: usize,
    ) -> Result<Tensor> {
        let decoded = self.decode(
            Latent::mean_only(entities),
            Latent::mean_only(relations),
            triplets,
            &mut ZeroNoise,
            sequence,
        )?;
        Ok(decoded.pooled)
    }
}

fn positive_rows(triplets: &LabeledTriplets, sequence: usize) -> Result<Vec<u32>> {
    let rows: Vec<u32> = triplets
        .labels
        .iter()
        .enumerate()
        .filter(|(_, &l)| l > 0.5)
        .map(|(i, _)| i as u32)
        .collect();
    if rows.is_empty() {
        return Err(Error::NoPositiveFacts { sequence });
    }
    Ok(rows)
}

fn columns(triplets: &LabeledTriplets, device: &Device) -> Result<[Tensor; 3]> {
    let n = triplets.len();
    Ok([
        Tensor::from_vec(triplets.column(0), (n,), device)?,
        Tensor::from_vec(triplets.column(1), (n,), device)?,
        Tensor::from_vec(triplets.column(2), (n,), device)?,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampling::SeededNoise;

    fn triplets() -> LabeledTriplets {
        LabeledTriplets {
            triplets: vec![[0, 0, 1], [1, 1, 2], [0, 0, 2]],
            labels: vec![1.0, 1.0, 0.0],
        }
    }

    fn tables() -> (Tensor, Tensor) {
        let device = Device::Cpu;
        let ent = Tensor::new(&[[1f32, 0.0], [0.0, 2.0], [3.0, -1.0]], &device).unwrap();
        let rel = Tensor::new(&[[0.5f32, 0.5], [-1.0, 1.0]], &device).unwrap();
        (ent, rel)
    }

    #[test]
    fn test_pooled_is_max_over_positives() {
        let (ent, rel) = tables();
        let decoder = Decoder::new(ScoringFunction::DistMult);
        let pooled = decoder
            .pool_means(&ent, &rel, &triplets(), 0)
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        // Positives: s = {e0, e1}, r = {r0, r1}, o = {e1, e2}; negative (e0, r0, e2) ignored.
        assert_eq!(pooled, vec![1.0, 2.0, 0.5, 1.0, 3.0, 2.0]);
    }

    #[test]
    fn test_zero_std_matches_means() {
        let (ent, rel) = tables();
        let decoder = Decoder::new(ScoringFunction::ComplEx);
        let zeros_e = ent.zeros_like().unwrap();
        let zeros_r = rel.zeros_like().unwrap();

        let mut noise = SeededNoise::new(5);
        let sampled = decoder
            .decode(
                Latent::new(&ent, Some(&zeros_e)),
                Latent::new(&rel, Some(&zeros_r)),
                &triplets(),
                &mut noise,
                0,
            )
            .unwrap();
        let plain = decoder
            .decode(
                Latent::mean_only(&ent),
                Latent::mean_only(&rel),
                &triplets(),
                &mut ZeroNoise,
                0,
            )
            .unwrap();

        let a = sampled.loss.to_scalar::<f32>().unwrap();
        let b = plain.loss.to_scalar::<f32>().unwrap();
        assert!((a - b).abs() < 1e-6);
        assert_eq!(
            sampled.pooled.to_vec1::<f32>().unwrap(),
            plain.pooled.to_vec1::<f32>().unwrap()
        );
    }

    #[test]
    fn test_no_positive_facts() {
        let (ent, rel) = tables();
        let decoder = Decoder::new(ScoringFunction::DistMult);
        let negatives = LabeledTriplets {
            triplets: vec![[0, 0, 2]],
            labels: vec![0.0],
        };
        assert!(matches!(
            decoder.pool_means(&ent, &rel, &negatives, 3),
            Err(Error::NoPositiveFacts { sequence: 3 })
        ));
    }

    #[test]
    fn test_loss_prefers_correct_labels() {
        let (ent, rel) = tables();
        let decoder = Decoder::new(ScoringFunction::DistMult);
        let good = LabeledTriplets {
            triplets: vec![[1, 1, 1], [0, 0, 2]],
            labels: vec![1.0, 0.0],
        };
        let flipped = LabeledTriplets {
            triplets: good.triplets.clone(),
            labels: vec![0.0, 1.0],
        };
        let loss = |t: &LabeledTriplets| {
            decoder
                .decode(Latent::mean_only(&ent), Latent::mean_only(&rel), t, &mut ZeroNoise, 0)
                .unwrap()
                .loss
                .to_scalar::<f32>()
                .unwrap()
        };
        // score(e1, r1, e1) = 4, score(e0, r0, e2) = 1.5
        assert!(loss(&good) < loss(&flipped));
    }
}
