//! The temporal variational encoder–recurrent–decoder model.
//!
//! One rollout walks a window batch row by row, oldest first:
//!
//! ```text
//!   h = broadcast(h0)
//!   for row in 0..L:
//!       graphs   = active snapshots of row          (bsz <= batch)
//!       h_t      = top layer of h[:bsz]
//!       q(z)     = posterior(graphs, h_t)           per node mean / std
//!       loss    += BCE(decode(sample(q), triplets))
//!       kl      += KL(q || prior(h_t)) + KL(q_rel || N(0, 1))
//!       h[:bsz]  = GRU(maxpool(positive [s; r; o]), h[:bsz])
//! ```
//!
//! Evaluation runs the same loop with means only and, on the last row,
//! ranks instead of decoding.

use crate::config::ModelConfig;
use crate::corrupt::{Corrupter, LabeledTriplets};
use crate::decoder::{Decoder, Latent};
use crate::embedding::EmbeddingStore;
use crate::error::{Error, Result};
use crate::evaluation::{EvalOutcome, LinkEvaluator};
use crate::posterior::{Posterior, PosteriorEncoder};
use crate::prior::PriorNetwork;
use crate::sampling::{kl_gaussian, NoiseSource};
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use grafene_nn::{GruPropagator, Propagator};
use grafene_temporal::{
    BatchedGraph, GraphBatcher, Snapshot, SnapshotHistory, Timestamp, WindowBatch,
};
use tracing::debug;

/// Losses of one training rollout.
#[derive(Debug, Clone)]
pub struct RolloutLoss {
    /// Sum over rows and sequences of the per-sequence mean BCE.
    pub reconstruction: Tensor,
    /// Summed KL terms; zero outside variational mode.
    pub kl: Tensor,
    /// `reconstruction + kl`, the tensor to backpropagate.
    pub total: Tensor,
    /// Active sequences per row.
    pub active_per_step: Vec<usize>,
}

impl RolloutLoss {
    /// `total` as a host scalar.
    pub fn total_value(&self) -> Result<f32> {
        Ok(self.total.to_scalar::<f32>()?)
    }
}

/// Temporal knowledge graph model with pluggable encoder and propagator.
pub struct TemporalVae {
    config: ModelConfig,
    varmap: VarMap,
    device: Device,
    store: EmbeddingStore,
    posterior: PosteriorEncoder,
    prior: Option<PriorNetwork>,
    propagator: Box<dyn Propagator>,
    decoder: Decoder,
    evaluator: LinkEvaluator,
}

impl TemporalVae {
    /// Build every component selected by `config`.
    ///
    /// `num_relations` counts forward relations; inverse ids are added.
    pub fn new(
        config: ModelConfig,
        num_entities: usize,
        num_relations: usize,
        device: &Device,
    ) -> Result<Self> {
        config.validate()?;
        if num_entities == 0 || num_relations == 0 {
            return Err(Error::InvalidConfig(format!(
                "need at least one entity and relation, got {num_entities} and {num_relations}"
            )));
        }

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);

        let store = EmbeddingStore::new(
            num_entities,
            num_relations,
            config.embed_size,
            config.hidden_size,
            config.num_layers,
            config.use_vae,
            vb.pp("embedding"),
            device,
        )?;
        let posterior = PosteriorEncoder::new(&config, num_relations, vb.pp("posterior"))?;
        let prior = if config.use_vae {
            Some(PriorNetwork::new(
                config.hidden_size,
                config.embed_size,
                vb.pp("prior"),
            )?)
        } else {
            None
        };
        let propagator: Box<dyn Propagator> = Box::new(GruPropagator::new(
            3 * config.embed_size,
            config.hidden_size,
            config.num_layers,
            config.dropout,
            vb.pp("rnn"),
        )?);

        debug!(
            num_entities,
            num_relations,
            encoder = posterior.name(),
            score = config.score_function.name(),
            vae = config.use_vae,
            "built temporal model"
        );

        Ok(Self {
            decoder: Decoder::new(config.score_function),
            evaluator: LinkEvaluator::new(config.score_function, config.filtered_eval),
            config,
            varmap,
            device: device.clone(),
            store,
            posterior,
            prior,
            propagator,
        })
    }

    /// Size the tables from `history`: one row per entity id up to the largest
    /// it mentions, and its relation count.
    pub fn from_history(
        config: ModelConfig,
        history: &SnapshotHistory,
        device: &Device,
    ) -> Result<Self> {
        let num_entities = history.max_entity_id().map_or(0, |id| id as usize + 1);
        Self::new(config, num_entities, history.num_relations() as usize, device)
    }

    /// Replace the recurrent propagator.
    ///
    /// Its input must be `3 * embed_size` and its hidden width and depth must
    /// match the configuration, since `h0` is shaped from it.
    pub fn with_propagator(mut self, propagator: Box<dyn Propagator>) -> Result<Self> {
        let checks = [
            ("propagator input", 3 * self.config.embed_size, propagator.input_size()),
            ("propagator hidden", self.config.hidden_size, propagator.hidden_size()),
            ("propagator layers", self.config.num_layers, propagator.num_layers()),
        ];
        for (what, expected, got) in checks {
            if expected != got {
                return Err(Error::ShapeMismatch { what, expected, got });
            }
        }
        self.propagator = propagator;
        Ok(self)
    }

    /// Hyperparameters the model was built with.
    /// Replace the posterior encoder pair.
    ///
    /// Encoders must map `embed_size + hidden_size` features to `embed_size`.
    /// Build them on [`Self::varmap`] so the optimizer and checkpoints see
    /// their variables.
    pub fn with_posterior(mut self, posterior: PosteriorEncoder) -> Result<Self> {
        let (input, output) = posterior.feature_sizes();
        let checks = [
            (
                "posterior input",
                self.config.embed_size + self.config.hidden_size,
                input,
            ),
            ("posterior output", self.config.embed_size, output),
        ];
        for (what, expected, got) in checks {
            if expected != got {
                return Err(Error::ShapeMismatch { what, expected, got });
            }
        }
        debug!(encoder = posterior.name(), "replaced posterior encoder");
        self.posterior = posterior;
        Ok(self)
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// All trainable parameters.
    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    /// Device every tensor lives on.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Entity and relation tables.
    pub fn store(&self) -> &EmbeddingStore {
        &self.store
    }

    /// Rows of the entity table.
    pub fn num_entities(&self) -> usize {
        self.store.num_entities()
    }

    /// Forward relations; the table holds twice as many rows.
    pub fn num_relations(&self) -> usize {
        self.store.num_relations()
    }

    /// Training rollout over `train_seq_len` rows.
    ///
    /// Fails with [`Error::EmptyBatch`] when no query time has history.
    pub fn forward(
        &self,
        history: &SnapshotHistory,
        times: &[Timestamp],
        corrupter: &mut dyn Corrupter,
        noise: &mut dyn NoiseSource,
        reverse: bool,
    ) -> Result<RolloutLoss> {
        let batch = GraphBatcher::new(self.config.train_seq_len)?.batch(history, times)?;
        if batch.is_empty() {
            return Err(Error::EmptyBatch);
        }

        let zero = Tensor::zeros((), DType::F32, &self.device)?;
        let mut reconstruction = zero.clone();
        let mut kl = zero;

        let active_per_step = self.rollout(&batch, true, |_, active, graph, hidden| {
            let triplets = corrupter.sample_train(active)?;
            let posterior =
                self.posterior
                    .encode(&self.store, graph, hidden, reverse, self.config.use_vae)?;

            let (pooled, loss) = self.decode_row(&posterior, &triplets, noise)?;
            reconstruction = reconstruction.add(&loss)?;
            if let Some(step_kl) = self.kl_row(&posterior, graph, hidden)? {
                kl = kl.add(&step_kl)?;
            }
            Ok(Some(pooled))
        })?;

        let total = reconstruction.add(&kl)?;
        Ok(RolloutLoss {
            reconstruction,
            kl,
            total,
            active_per_step,
        })
    }

    /// Evaluation rollout over `test_seq_len` rows.
    ///
    /// Rows before the last are encoded with means only and propagated; the
    /// last row is ranked. An empty batch yields a default outcome.
    pub fn evaluate(
        &self,
        history: &SnapshotHistory,
        times: &[Timestamp],
        corrupter: &mut dyn Corrupter,
        reverse: bool,
    ) -> Result<EvalOutcome> {
        let batch = GraphBatcher::new(self.config.test_seq_len)?.batch(history, times)?;
        if batch.is_empty() {
            return Ok(EvalOutcome::default());
        }

        let last = batch.window() - 1;
        let relations = self.store.relation_means();
        let mut outcome = EvalOutcome::default();

        self.rollout(&batch, false, |row, active, graph, hidden| {
            let triplets = corrupter.sample_eval(active)?;
            let posterior = self.posterior.encode(&self.store, graph, hidden, reverse, false)?;
            let means = posterior.split_means()?;

            if row < last {
                let pooled = means
                    .iter()
                    .zip(&triplets)
                    .enumerate()
                    .map(|(i, (m, t))| self.decoder.pool_means(m, relations, t, i))
                    .collect::<Result<Vec<_>>>()?;
                return Ok(Some(Tensor::stack(&pooled, 0)?));
            }

            let mut metrics = Vec::with_capacity(active.len());
            let mut losses = Vec::with_capacity(active.len());
            for (i, ((m, t), snapshot)) in means.iter().zip(&triplets).zip(active).enumerate() {
                let (rank, loss) = self.evaluator.evaluate_sequence(m, relations, t, snapshot, i)?;
                metrics.push(rank);
                losses.push(loss);
            }
            outcome = EvalOutcome::from_sequences(metrics, &losses);
            Ok(None)
        })?;

        Ok(outcome)
    }

    /// Drive the recurrence over every row of `batch`.
    ///
    /// `step` sees the row index, its active snapshots, their batched graph
    /// and the top hidden layer of the active prefix. It returns the pooled
    /// `(bsz, 3 * embed)` summary to propagate, or `None` to stop.
    fn rollout<F>(&self, batch: &WindowBatch<'_>, train: bool, mut step: F) -> Result<Vec<usize>>
    where
        F: FnMut(usize, &[&Snapshot], &BatchedGraph, &Tensor) -> Result<Option<Tensor>>,
    {
        let mut hidden = self.store.initial_hidden(batch.batch_size())?;
        let mut active_per_step = Vec::with_capacity(batch.window());

        for row in 0..batch.window() {
            let active = batch.active(row)?;
            if active.is_empty() {
                return Err(Error::EmptyTimestep { step: row });
            }
            self.check_snapshots(&active)?;

            let graph = BatchedGraph::from_snapshots(&active);
            let prefix = hidden.active_prefix(active.len())?;
            let top = prefix.top()?.clone();
            active_per_step.push(active.len());
            debug!(
                row,
                active = active.len(),
                nodes = graph.num_nodes(),
                edges = graph.num_edges(),
                "rollout step"
            );

            let Some(pooled) = step(row, &active, &graph, &top)? else {
                break;
            };
            let next = self.propagator.propagate(&pooled, &prefix, train)?;
            hidden = hidden.absorb_prefix(&next)?;
        }
        Ok(active_per_step)
    }

    /// Decode every sequence of a row: stacked pooled summaries and summed loss.
    fn decode_row(
        &self,
        posterior: &Posterior,
        triplets: &[LabeledTriplets],
        noise: &mut dyn NoiseSource,
    ) -> Result<(Tensor, Tensor)> {
        let means = posterior.split_means()?;
        let stds = posterior.split_stds()?;
        let rel_stds = if self.config.use_vae {
            Some(self.store.relation_stds()?)
        } else {
            None
        };
        let relations = Latent::new(self.store.relation_means(), rel_stds.as_ref());

        let mut loss = Tensor::zeros((), DType::F32, &self.device)?;
        let mut pooled = Vec::with_capacity(means.len());
        for (i, (mean, t)) in means.iter().zip(triplets).enumerate() {
            let std = stds.as_ref().map(|s| &s[i]);
            let decoded = self.decoder.decode(Latent::new(mean, std), relations, t, noise, i)?;
            loss = loss.add(&decoded.loss)?;
            pooled.push(decoded.pooled);
        }
        Ok((Tensor::stack(&pooled, 0)?, loss))
    }

    /// Entity KL against the prior network plus relation KL against N(0, 1).
    fn kl_row(
        &self,
        posterior: &Posterior,
        graph: &BatchedGraph,
        hidden: &Tensor,
    ) -> Result<Option<Tensor>> {
        let (Some(prior), Some(stds), Some((rel_prior_mean, rel_prior_std))) = (
            self.prior.as_ref(),
            posterior.stds.as_ref(),
            self.store.relation_prior(),
        ) else {
            return Ok(None);
        };

        let (prior_mean, prior_std) = prior.per_node(hidden, graph.owners())?;
        let entity_kl = kl_gaussian(&posterior.means, stds, &prior_mean, &prior_std)?;
        let relation_kl = kl_gaussian(
            self.store.relation_means(),
            &self.store.relation_stds()?,
            rel_prior_mean,
            rel_prior_std,
        )?;
        Ok(Some(entity_kl.add(&relation_kl)?))
    }

    /// Node and relation ids must index the model's tables.
    fn check_snapshots(&self, snapshots: &[&Snapshot]) -> Result<()> {
        let num_entities = self.num_entities();
        let num_relations = self.num_relations();
        for snapshot in snapshots {
            if snapshot.num_relations() as usize != num_relations {
                return Err(Error::InvalidGraph(format!(
                    "snapshot built for {} relations, model has {num_relations}",
                    snapshot.num_relations()
                )));
            }
            if let Some(&id) = snapshot
                .node_ids()
                .iter()
                .find(|&&id| id as usize >= num_entities)
            {
                return Err(Error::InvalidGraph(format!(
                    "entity {id} outside table of {num_entities}"
                )));
            }
            if let Some(e) = snapshot
                .edges()
                .iter()
                .find(|e| e.relation as usize >= 2 * num_relations)
            {
                return Err(Error::InvalidGraph(format!(
                    "relation {} outside table of {}",
                    e.relation,
                    2 * num_relations
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EncoderKind;
    use crate::corrupt::UniformCorrupter;
    use crate::sampling::{SeededNoise, ZeroNoise};
    use grafene_nn::{GraphEncoder, LinearEncoder};
    use grafene_temporal::TemporalFact;

    fn config() -> ModelConfig {
        ModelConfig::default()
            .with_embed_size(8)
            .with_hidden_size(6)
            .with_num_bases(2)
            .with_num_gnn_layers(1)
            .with_negative_rate(2)
            .with_dropout(0.0)
            .with_seq_len(2)
    }

    /// Four timesteps 0..4; entities 0..6, two relations.
    fn history() -> SnapshotHistory {
        let facts = (0..4u64).flat_map(|t| {
            let a = t as u32;
            [
                TemporalFact::new(a, 0, a + 1, t),
                TemporalFact::new(a + 2, 1, a, t),
            ]
        });
        SnapshotHistory::from_facts(facts, 2).unwrap()
    }

    #[test]
    fn test_forward_losses_finite() {
        for vae in [true, false] {
            let model = TemporalVae::new(config().with_vae(vae), 6, 2, &Device::Cpu).unwrap();
            let mut corrupter = UniformCorrupter::new(2, 100, 0);
            let mut noise = SeededNoise::new(0);
            let loss = model
                .forward(&history(), &[3, 2], &mut corrupter, &mut noise, false)
                .unwrap();

            assert!(loss.total_value().unwrap().is_finite());
            assert_eq!(loss.active_per_step, vec![2, 2]);
            let kl = loss.kl.to_scalar::<f32>().unwrap();
            if vae {
                assert!(kl > 0.0);
            } else {
                assert_eq!(kl, 0.0);
            }
        }
    }

    #[test]
    fn test_empty_batch() {
        let model = TemporalVae::new(config(), 6, 2, &Device::Cpu).unwrap();
        let mut corrupter = UniformCorrupter::new(2, 100, 0);
        let h = history();
        assert!(matches!(
            model.forward(&h, &[0], &mut corrupter, &mut ZeroNoise, false),
            Err(Error::EmptyBatch)
        ));
        let outcome = model.evaluate(&h, &[0], &mut corrupter, false).unwrap();
        assert!(outcome.per_sequence.is_empty());
    }

    #[test]
    fn test_empty_row_is_fatal() {
        // Time 1 has two snapshots of history; a window of 3 leaves row 2 empty.
        let model = TemporalVae::new(config().with_seq_len(3), 6, 2, &Device::Cpu).unwrap();
        let mut corrupter = UniformCorrupter::new(2, 100, 0);
        assert!(matches!(
            model.forward(&history(), &[1], &mut corrupter, &mut ZeroNoise, false),
            Err(Error::EmptyTimestep { step: 2 })
        ));
    }

    #[test]
    fn test_entity_outside_table() {
        let model = TemporalVae::new(config(), 3, 2, &Device::Cpu).unwrap();
        let mut corrupter = UniformCorrupter::new(2, 100, 0);
        assert!(matches!(
            model.forward(&history(), &[2], &mut corrupter, &mut ZeroNoise, false),
            Err(Error::InvalidGraph(_))
        ));
    }

    #[test]
    fn test_evaluate_linear_encoder() {
        let model = TemporalVae::new(
            config().with_encoder(EncoderKind::Linear),
            6,
            2,
            &Device::Cpu,
        )
        .unwrap();
        let mut corrupter = UniformCorrupter::new(2, 100, 0);
        let outcome = model.evaluate(&history(), &[3, 2], &mut corrupter, true).unwrap();

        assert_eq!(outcome.per_sequence.len(), 2);
        assert!(outcome.metrics.mrr > 0.0 && outcome.metrics.mrr <= 1.0);
        assert!(outcome.loss.is_finite());
    }

    #[test]
    fn test_from_history_sizes_tables() {
        let model = TemporalVae::from_history(config(), &history(), &Device::Cpu).unwrap();
        assert_eq!(model.num_entities(), 6);
        assert_eq!(model.num_relations(), 2);

        let empty = SnapshotHistory::new(2);
        assert!(matches!(
            TemporalVae::from_history(config(), &empty, &Device::Cpu),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_custom_posterior() {
        let linear = |model: &TemporalVae, name: &str, input: usize| -> Box<dyn GraphEncoder> {
            let vb = VarBuilder::from_varmap(model.varmap(), DType::F32, model.device());
            Box::new(LinearEncoder::new(input, 8, vb.pp(name)).unwrap())
        };

        let model = TemporalVae::new(config(), 6, 2, &Device::Cpu).unwrap();
        let wrong = PosteriorEncoder::from_encoders(
            linear(&model, "wrong.mean", 8),
            linear(&model, "wrong.std", 8),
        )
        .unwrap();
        assert!(matches!(
            model.with_posterior(wrong),
            Err(Error::ShapeMismatch {
                expected: 14,
                got: 8,
                ..
            })
        ));

        let model = TemporalVae::new(config(), 6, 2, &Device::Cpu).unwrap();
        let custom = PosteriorEncoder::from_encoders(
            linear(&model, "custom.mean", 14),
            linear(&model, "custom.std", 14),
        )
        .unwrap();
        let model = model.with_posterior(custom).unwrap();
        let mut corrupter = UniformCorrupter::new(2, 100, 0);
        let loss = model
            .forward(&history(), &[3, 2], &mut corrupter, &mut SeededNoise::new(0), false)
            .unwrap();
        assert!(loss.total_value().unwrap().is_finite());
    }

    #[test]
    fn test_mismatched_encoder_pair() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let mean = LinearEncoder::new(14, 8, vb.pp("mean")).unwrap();
        let std = LinearEncoder::new(14, 4, vb.pp("std")).unwrap();
        assert!(matches!(
            PosteriorEncoder::from_encoders(Box::new(mean), Box::new(std)),
            Err(Error::ShapeMismatch { expected: 8, got: 4, .. })
        ));
    }

    #[test]
    fn test_propagator_shape_checked() {
        let model = TemporalVae::new(config(), 6, 2, &Device::Cpu).unwrap();
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let wrong = GruPropagator::new(24, 7, 1, 0.0, vb).unwrap();
        assert!(matches!(
            model.with_propagator(Box::new(wrong)),
            Err(Error::ShapeMismatch { .. })
        ));
    }
}
