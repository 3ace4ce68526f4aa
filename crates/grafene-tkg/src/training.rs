//! Training loop for the temporal model.
//!
//! One optimizer step per batch of query times:
//!
//! 1. Shuffle the warm query times (those with a full lookback window).
//! 2. Chunk them into batches of `batch_size`.
//! 3. Roll the model out over each batch and backpropagate `reconstruction + kl`.
//!
//! # Example
//!
//! ```rust,ignore
//! use grafene_tkg::{ModelConfig, TemporalVae, Trainer, TrainingConfig};
//!
//! let model = TemporalVae::new(ModelConfig::default(), num_entities, num_relations, &device)?;
//! let mut trainer = Trainer::new(&model, TrainingConfig::default().with_epochs(20))?;
//! let result = trainer.fit(&model, &history, &train_times, &valid_times)?;
//! println!("best epoch {}", result.best_epoch);
//! ```

use crate::config::TrainingConfig;
use crate::corrupt::UniformCorrupter;
use crate::error::Result;
use crate::evaluation::{EvalOutcome, RankMetrics};
use crate::model::TemporalVae;
use crate::sampling::SeededNoise;
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use grafene_temporal::{SnapshotHistory, Timestamp};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, info};

/// Training results.
#[derive(Debug, Clone, Default)]
pub struct TrainingResult {
    /// Mean batch loss per epoch.
    pub loss_history: Vec<f32>,
    /// Validation MRR per epoch (empty without validation times).
    pub validation_mrr: Vec<f32>,
    /// Best epoch by validation MRR, or by loss without validation.
    pub best_epoch: usize,
}

/// Drives [`TemporalVae`] rollouts with an AdamW optimizer.
pub struct Trainer {
    config: TrainingConfig,
    optimizer: AdamW,
    rng: StdRng,
    noise: SeededNoise,
    corrupter: UniformCorrupter,
}

impl Trainer {
    /// Optimizer over every variable of `model`.
    pub fn new(model: &TemporalVae, config: TrainingConfig) -> Result<Self> {
        config.validate()?;
        let params = ParamsAdamW {
            lr: config.learning_rate,
            weight_decay: config.weight_decay,
            ..Default::default()
        };
        let optimizer = AdamW::new(model.varmap().all_vars(), params)?;
        let model_config = model.config();
        let corrupter = UniformCorrupter::new(
            model_config.negative_rate,
            model_config.num_pos_facts,
            config.seed,
        );

        Ok(Self {
            rng: StdRng::seed_from_u64(config.seed),
            noise: SeededNoise::new(config.seed.wrapping_add(1)),
            corrupter,
            optimizer,
            config,
        })
    }

    /// Training hyperparameters.
    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Current learning rate.
    pub fn learning_rate(&self) -> f64 {
        self.optimizer.learning_rate()
    }

    /// One pass over `times`; returns the mean batch loss.
    ///
    /// Times whose history is shorter than the training window are skipped.
    pub fn train_epoch(
        &mut self,
        model: &TemporalVae,
        history: &SnapshotHistory,
        times: &[Timestamp],
    ) -> Result<f32> {
        let mut times = warm_times(history, times, model.config().train_seq_len)?;
        times.shuffle(&mut self.rng);

        let mut total = 0.0f32;
        let mut num_batches = 0usize;
        for batch in times.chunks(self.config.batch_size) {
            let loss = model.forward(history, batch, &mut self.corrupter, &mut self.noise, false)?;
            self.optimizer.backward_step(&loss.total)?;

            let value = loss.total_value()?;
            debug!(batch = num_batches, size = batch.len(), loss = value, "train step");
            total += value;
            num_batches += 1;
        }

        Ok(if num_batches == 0 {
            0.0
        } else {
            total / num_batches as f32
        })
    }

    /// Evaluate `times` in batches; metrics are averaged over sequences.
    pub fn validate(
        &mut self,
        model: &TemporalVae,
        history: &SnapshotHistory,
        times: &[Timestamp],
    ) -> Result<EvalOutcome> {
        let times = warm_times(history, times, model.config().test_seq_len)?;

        let mut per_sequence = Vec::with_capacity(times.len());
        let mut losses = Vec::new();
        for batch in times.chunks(self.config.batch_size) {
            let outcome = model.evaluate(history, batch, &mut self.corrupter, false)?;
            per_sequence.extend(outcome.per_sequence);
            losses.push(outcome.loss);
        }
        Ok(EvalOutcome::from_sequences(per_sequence, &losses))
    }

    /// Train for `epochs`, validating after each epoch when `valid_times`
    /// is non-empty.
    pub fn fit(
        &mut self,
        model: &TemporalVae,
        history: &SnapshotHistory,
        train_times: &[Timestamp],
        valid_times: &[Timestamp],
    ) -> Result<TrainingResult> {
        let mut result = TrainingResult::default();
        let mut best_mrr = f64::NEG_INFINITY;
        let mut best_loss = f32::INFINITY;

        for epoch in 0..self.config.epochs {
            let loss = self.train_epoch(model, history, train_times)?;
            result.loss_history.push(loss);

            if valid_times.is_empty() {
                info!(epoch, loss, "epoch done");
                if loss < best_loss {
                    best_loss = loss;
                    result.best_epoch = epoch;
                }
                continue;
            }

            let outcome = self.validate(model, history, valid_times)?;
            let RankMetrics { mrr, .. } = outcome.metrics;
            info!(epoch, loss, valid = %outcome.metrics.summary(), "epoch done");
            result.validation_mrr.push(mrr as f32);
            if mrr > best_mrr {
                best_mrr = mrr;
                result.best_epoch = epoch;
            }
        }

        Ok(result)
    }
}

/// Query times with at least `window` snapshots of history, in input order.
fn warm_times(
    history: &SnapshotHistory,
    times: &[Timestamp],
    window: usize,
) -> Result<Vec<Timestamp>> {
    let mut warm = Vec::with_capacity(times.len());
    for &t in times {
        if history.index_of(t)? + 1 >= window {
            warm.push(t);
        }
    }
    if warm.len() < times.len() {
        debug!(skipped = times.len() - warm.len(), window, "skipping warm-up times");
    }
    Ok(warm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use candle_core::Device;
    use grafene_temporal::TemporalFact;

    fn history() -> SnapshotHistory {
        let facts = (0..5u64).flat_map(|t| {
            let a = t as u32;
            [
                TemporalFact::new(a, 0, a + 1, t),
                TemporalFact::new(a + 1, 1, a + 2, t),
            ]
        });
        SnapshotHistory::from_facts(facts, 2).unwrap()
    }

    #[test]
    fn test_warm_times_skip_short_history() {
        let h = history();
        assert_eq!(warm_times(&h, &[4, 0, 1, 2], 3).unwrap(), vec![4, 2]);
        assert_eq!(warm_times(&h, &[1], 1).unwrap(), vec![1]);
        assert!(warm_times(&h, &[9], 1).is_err());
    }

    #[test]
    fn test_fit_records_history() {
        let config = ModelConfig::default()
            .with_embed_size(4)
            .with_hidden_size(4)
            .with_num_bases(1)
            .with_num_gnn_layers(1)
            .with_negative_rate(1)
            .with_seq_len(2);
        let model = TemporalVae::new(config, 7, 2, &Device::Cpu).unwrap();
        let mut trainer = Trainer::new(
            &model,
            TrainingConfig::default().with_epochs(2).with_batch_size(2),
        )
        .unwrap();

        let result = trainer.fit(&model, &history(), &[1, 2, 3], &[4]).unwrap();
        assert_eq!(result.loss_history.len(), 2);
        assert_eq!(result.validation_mrr.len(), 2);
        assert!(result.loss_history.iter().all(|l| l.is_finite()));
        assert!(result.best_epoch < 2);
    }
}
