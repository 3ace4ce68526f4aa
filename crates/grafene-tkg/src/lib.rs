//! Temporal variational knowledge graph embeddings.
//!
//! A temporal knowledge graph is a sequence of snapshots, one graph of
//! `(subject, relation, object)` facts per timestep. This crate learns
//! entity and relation embeddings that predict the facts of a timestep from
//! the snapshots before it.
//!
//! ## The Model
//!
//! Each timestep is processed by three stages, chained by a recurrent state:
//!
//! ```text
//!            h(t-1) ─────────────┬──────────────┐
//!              │                 │              │
//!   G(t) ──► posterior q(z|G,h)  prior p(z|h)   │
//!              │                 │              │
//!              ├──── KL(q || p) ─┘              │
//!              ▼                                │
//!           decoder: score(s, r, o) ──► BCE     │
//!              │                                │
//!              └─ maxpool [s; r; o] ──► GRU ◄───┘ ──► h(t)
//! ```
//!
//! | Stage | Module | Output |
//! |-------|--------|--------|
//! | Posterior encoder | [`posterior`] | per-node mean / std from graph + `h` |
//! | Prior network | [`prior`] | per-sequence mean / std from `h` alone |
//! | Decoder | [`decoder`] | fact logits, BCE loss, pooled summary |
//! | Recurrence | [`grafene_nn::recurrent`] | next hidden state |
//!
//! Without the variational switch ([`ModelConfig::use_vae`]) the posterior
//! mean is used directly and no KL term is added.
//!
//! ## Scoring
//!
//! | Function | Score |
//! |----------|-------|
//! | DistMult | Σᵢ sᵢ rᵢ oᵢ |
//! | ComplEx | Re(<s, r, conj(o)>), first half real, second half imaginary |
//!
//! ## Usage
//!
//! ```rust,ignore
//! use candle_core::Device;
//! use grafene_temporal::{SnapshotHistory, TemporalFact};
//! use grafene_tkg::{ModelConfig, TemporalVae, Trainer, TrainingConfig};
//!
//! let history = SnapshotHistory::from_facts(facts, num_relations)?;
//! let model = TemporalVae::from_history(ModelConfig::default(), &history, &Device::Cpu)?;
//!
//! let mut trainer = Trainer::new(&model, TrainingConfig::default())?;
//! trainer.fit(&model, &history, &train_times, &valid_times)?;
//!
//! grafene_tkg::save_checkpoint(&model, "model.json")?;
//! ```

pub mod checkpoint;
pub mod config;
pub mod corrupt;
pub mod decoder;
pub mod embedding;
pub mod error;
pub mod evaluation;
pub mod model;
pub mod posterior;
pub mod prior;
pub mod sampling;
pub mod scoring;
pub mod training;

pub use checkpoint::{load_checkpoint, save_checkpoint, Checkpoint, TensorRecord};
pub use config::{EncoderKind, ModelConfig, TrainingConfig};
pub use corrupt::{Corrupter, LabeledTriplets, UniformCorrupter};
pub use decoder::{Decoded, Decoder, Latent};
pub use embedding::EmbeddingStore;
pub use error::{Error, Result};
pub use evaluation::{compute_rank, EvalOutcome, LinkEvaluator, RankMetrics};
pub use model::{RolloutLoss, TemporalVae};
pub use posterior::{Posterior, PosteriorEncoder};
pub use prior::PriorNetwork;
pub use sampling::{kl_gaussian, reparameterize, NoiseSource, SeededNoise, ZeroNoise};
pub use scoring::{positive_std, ScoringFunction, MIN_STD};
pub use training::{Trainer, TrainingResult};
