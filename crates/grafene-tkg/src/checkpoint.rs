//! JSON checkpoints: hyperparameters plus every trainable tensor.
//!
//! ```json
//! {
//!   "hparams": { "embed_size": 128, ... },
//!   "num_entities": 7128,
//!   "num_relations": 230,
//!   "state": { "embedding.entity": { "shape": [7128, 128], "data": [...] } }
//! }
//! ```
//!
//! Loading rejects a file without `hparams` ([`Error::MissingHyperparameters`])
//! and a `state` that lacks a tensor the model needs or holds it with another
//! shape ([`Error::InvalidCheckpoint`]).

use crate::config::ModelConfig;
use crate::error::{Error, Result};
use crate::model::TemporalVae;
use candle_core::{Device, Tensor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

/// One tensor, row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorRecord {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

/// Serialized model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub hparams: ModelConfig,
    pub num_entities: usize,
    pub num_relations: usize,
    pub state: BTreeMap<String, TensorRecord>,
}

impl Checkpoint {
    /// Snapshot the model's hyperparameters and parameters.
    pub fn from_model(model: &TemporalVae) -> Result<Self> {
        let vars = model
            .varmap()
            .data()
            .lock()
            .map_err(|_| Error::InvalidCheckpoint("parameter map lock poisoned".into()))?;

        let mut state = BTreeMap::new();
        for (name, var) in vars.iter() {
            let record = TensorRecord {
                shape: var.dims().to_vec(),
                data: var.flatten_all()?.to_vec1::<f32>()?,
            };
            state.insert(name.clone(), record);
        }

        Ok(Self {
            hparams: model.config().clone(),
            num_entities: model.num_entities(),
            num_relations: model.num_relations(),
            state,
        })
    }

    /// Parse and check the required fields.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        let fields = value
            .as_object()
            .ok_or_else(|| Error::InvalidCheckpoint("checkpoint is not a JSON object".into()))?;

        match fields.get("hparams") {
            None | Some(serde_json::Value::Null) => return Err(Error::MissingHyperparameters),
            Some(_) => {}
        }
        for required in ["state", "num_entities", "num_relations"] {
            if !fields.contains_key(required) {
                return Err(Error::InvalidCheckpoint(format!("missing `{required}`")));
            }
        }

        let checkpoint: Self = serde_json::from_value(value)?;
        checkpoint.hparams.validate()?;
        Ok(checkpoint)
    }

    /// Serialize to JSON text.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Write the JSON form to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_json_string()?)?;
        Ok(())
    }

    /// Read and check a checkpoint file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }

    /// Rebuild the model and copy every stored tensor into it.
    pub fn into_model(self, device: &Device) -> Result<TemporalVae> {
        let model = TemporalVae::new(self.hparams, self.num_entities, self.num_relations, device)?;
        {
            let vars = model
                .varmap()
                .data()
                .lock()
                .map_err(|_| Error::InvalidCheckpoint("parameter map lock poisoned".into()))?;

            for (name, var) in vars.iter() {
                let record = self
                    .state
                    .get(name)
                    .ok_or_else(|| Error::InvalidCheckpoint(format!("missing tensor `{name}`")))?;
                let elems: usize = record.shape.iter().product();
                if record.shape != var.dims() || record.data.len() != elems {
                    return Err(Error::InvalidCheckpoint(format!(
                        "tensor `{name}`: expected shape {:?}, found {:?} with {} values",
                        var.dims(),
                        record.shape,
                        record.data.len()
                    )));
                }
                let tensor = Tensor::from_vec(record.data.clone(), record.shape.as_slice(), device)?;
                var.set(&tensor)?;
            }

            let unused = self.state.keys().filter(|k| !vars.contains_key(*k)).count();
            if unused > 0 {
                warn!(unused, "checkpoint holds tensors the model does not use");
            }
            debug!(tensors = vars.len(), "restored checkpoint");
        }
        Ok(model)
    }
}

/// Write `model` to `path`.
pub fn save_checkpoint(model: &TemporalVae, path: impl AsRef<Path>) -> Result<()> {
    Checkpoint::from_model(model)?.save(path)
}

/// Read a checkpoint from `path` and rebuild its model.
pub fn load_checkpoint(path: impl AsRef<Path>, device: &Device) -> Result<TemporalVae> {
    Checkpoint::load(path)?.into_model(device)
}
