//! Model and training configuration.
//!
//! Both structs are plain data: built once (from `Default`, the `with_*`
//! builders, or JSON), checked by `validate`, then handed to components at
//! construction.

use crate::error::{Error, Result};
use crate::scoring::ScoringFunction;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Graph encoder used for the posterior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderKind {
    /// Stacked relational graph convolutions.
    Rgcn,
    /// Per-node linear map, ignores edges.
    Linear,
}

/// Hyperparameters of the temporal model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Entity/relation embedding width (default: 128).
    pub embed_size: usize,
    /// Recurrent hidden width (default: 128).
    pub hidden_size: usize,
    /// Stacked recurrent layers (default: 1).
    pub num_layers: usize,
    /// Relational convolution layers per encoder (default: 2).
    pub num_gnn_layers: usize,
    /// Basis matrices per convolution (default: 8).
    pub num_bases: usize,
    /// Dropout between recurrent layers (default: 0.5).
    pub dropout: f32,
    /// Window length during training (default: 10).
    pub train_seq_len: usize,
    /// Window length during evaluation (default: 10).
    pub test_seq_len: usize,
    /// Negatives per positive fact (default: 10).
    pub negative_rate: usize,
    /// Cap on positive facts sampled per snapshot (default: 3000).
    pub num_pos_facts: usize,
    /// Variational mode: sample latents and add the KL term (default: true).
    pub use_vae: bool,
    /// Posterior encoder (default: rgcn).
    pub encoder: EncoderKind,
    /// Bilinear decoder (default: distmult).
    pub score_function: ScoringFunction,
    /// Skip other true objects when ranking (default: true).
    pub filtered_eval: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            embed_size: 128,
            hidden_size: 128,
            num_layers: 1,
            num_gnn_layers: 2,
            num_bases: 8,
            dropout: 0.5,
            train_seq_len: 10,
            test_seq_len: 10,
            negative_rate: 10,
            num_pos_facts: 3000,
            use_vae: true,
            encoder: EncoderKind::Rgcn,
            score_function: ScoringFunction::DistMult,
            filtered_eval: true,
        }
    }
}

impl ModelConfig {
    /// Set the latent embedding width.
    pub fn with_embed_size(mut self, size: usize) -> Self {
        self.embed_size = size;
        self
    }

    /// Set the recurrent hidden width.
    pub fn with_hidden_size(mut self, size: usize) -> Self {
        self.hidden_size = size;
        self
    }

    /// Set the number of stacked GRU layers.
    pub fn with_num_layers(mut self, n: usize) -> Self {
        self.num_layers = n;
        self
    }

    /// Set the number of relational graph layers per encoder.
    pub fn with_num_gnn_layers(mut self, n: usize) -> Self {
        self.num_gnn_layers = n;
        self
    }

    /// Set the number of basis matrices shared by relation weights.
    pub fn with_num_bases(mut self, n: usize) -> Self {
        self.num_bases = n;
        self
    }

    /// Set dropout between GRU layers.
    pub fn with_dropout(mut self, p: f32) -> Self {
        self.dropout = p;
        self
    }

    /// Set both the training and evaluation window length.
    pub fn with_seq_len(mut self, len: usize) -> Self {
        self.train_seq_len = len;
        self.test_seq_len = len;
        self
    }

    /// Set the training window length.
    pub fn with_train_seq_len(mut self, len: usize) -> Self {
        self.train_seq_len = len;
        self
    }

    /// Set the evaluation window length.
    pub fn with_test_seq_len(mut self, len: usize) -> Self {
        self.test_seq_len = len;
        self
    }

    /// Set corruptions drawn per positive fact.
    pub fn with_negative_rate(mut self, rate: usize) -> Self {
        self.negative_rate = rate;
        self
    }

    /// Cap positive facts sampled per training snapshot.
    pub fn with_num_pos_facts(mut self, n: usize) -> Self {
        self.num_pos_facts = n;
        self
    }

    /// Toggle variational mode.
    pub fn with_vae(mut self, enabled: bool) -> Self {
        self.use_vae = enabled;
        self
    }

    /// Select the posterior encoder.
    pub fn with_encoder(mut self, encoder: EncoderKind) -> Self {
        self.encoder = encoder;
        self
    }

    /// Select the decoder scoring function.
    pub fn with_score_function(mut self, score: ScoringFunction) -> Self {
        self.score_function = score;
        self
    }

    /// Toggle filtered ranking.
    pub fn with_filtered_eval(mut self, filtered: bool) -> Self {
        self.filtered_eval = filtered;
        self
    }

    /// Reject configurations no component can be built from.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("embed_size", self.embed_size),
            ("hidden_size", self.hidden_size),
            ("num_layers", self.num_layers),
            ("train_seq_len", self.train_seq_len),
            ("test_seq_len", self.test_seq_len),
            ("num_pos_facts", self.num_pos_facts),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(Error::InvalidConfig(format!("{name} must be at least 1")));
        }
        if self.encoder == EncoderKind::Rgcn && (self.num_gnn_layers == 0 || self.num_bases == 0) {
            return Err(Error::InvalidConfig(
                "rgcn encoder needs num_gnn_layers >= 1 and num_bases >= 1".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(Error::InvalidConfig(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        if self.score_function == ScoringFunction::ComplEx && self.embed_size % 2 != 0 {
            return Err(Error::InvalidConfig(format!(
                "complex scoring needs an even embed_size, got {}",
                self.embed_size
            )));
        }
        Ok(())
    }

    /// Parse and validate a JSON config.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON config file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }
}

/// Optimizer and epoch settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Number of passes over the training times (default: 100).
    pub epochs: usize,
    /// Query times per rollout (default: 64).
    pub batch_size: usize,
    /// AdamW learning rate (default: 0.001).
    pub learning_rate: f64,
    /// AdamW weight decay (default: 0.0001).
    pub weight_decay: f64,
    /// Seed for shuffling, negative sampling and latent noise (default: 42).
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 100,
            batch_size: 64,
            learning_rate: 0.001,
            weight_decay: 0.0001,
            seed: 42,
        }
    }
}

impl TrainingConfig {
    /// Set the number of passes over the training times.
    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    /// Set query times per optimizer step.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the AdamW learning rate.
    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    /// Set the AdamW weight decay.
    pub fn with_weight_decay(mut self, wd: f64) -> Self {
        self.weight_decay = wd;
        self
    }

    /// Seed shuffling, noise and corruption.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Reject an empty batch or a non-positive learning rate.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig("batch_size must be at least 1".into()));
        }
        if self.learning_rate.is_nan() || self.learning_rate <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        Ok(())
    }
}
