//! Global embedding tables and the learned initial recurrent state.

use crate::error::Result;
use crate::scoring::positive_std;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use grafene_nn::init::{xavier_uniform, RELU_GAIN};
use grafene_nn::HiddenState;

/// Trainable entity/relation tables plus the initial hidden state `h0`.
///
/// | Tensor | Shape | Trainable |
/// |--------|-------|-----------|
/// | entity | (num_entities, embed) | yes |
/// | relation mean | (2R, embed) | yes |
/// | relation raw std | (2R, embed) | yes, read through `positive_std` |
/// | relation prior mean/std | (2R, embed) | no, fixed 0 / 1 |
/// | h0 | (layers, 1, hidden) | yes |
pub struct EmbeddingStore {
    entity: Tensor,
    relation_mean: Tensor,
    relation_raw_std: Tensor,
    relation_prior: Option<(Tensor, Tensor)>,
    h0: Tensor,
    num_entities: usize,
    num_relations: usize,
}

impl EmbeddingStore {
    /// Create the tables; the relation prior only exists when `variational`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        num_entities: usize,
        num_relations: usize,
        embed_size: usize,
        hidden_size: usize,
        num_layers: usize,
        variational: bool,
        vb: VarBuilder,
        device: &Device,
    ) -> Result<Self> {
        let rel_rows = 2 * num_relations;
        let entity = vb.get_with_hints(
            (num_entities, embed_size),
            "entity",
            xavier_uniform(embed_size, num_entities, RELU_GAIN),
        )?;
        let relation_mean = vb.get_with_hints(
            (rel_rows, embed_size),
            "relation_mean",
            xavier_uniform(embed_size, rel_rows, RELU_GAIN),
        )?;
        let relation_raw_std = vb.get_with_hints(
            (rel_rows, embed_size),
            "relation_std",
            xavier_uniform(embed_size, rel_rows, RELU_GAIN),
        )?;
        let h0 = vb.get_with_hints(
            (num_layers, 1, hidden_size),
            "h0",
            xavier_uniform(hidden_size, num_layers * hidden_size, RELU_GAIN),
        )?;

        let relation_prior = if variational {
            Some((
                Tensor::zeros((rel_rows, embed_size), DType::F32, device)?,
                Tensor::ones((rel_rows, embed_size), DType::F32, device)?,
            ))
        } else {
            None
        };

        Ok(Self {
            entity,
            relation_mean,
            relation_raw_std,
            relation_prior,
            h0,
            num_entities,
            num_relations,
        })
    }

    /// Entity table `(num_entities, embed)`.
    pub fn entity(&self) -> &Tensor {
        &self.entity
    }

    /// Rows of the entity table for `ids` (u32, `(n,)`).
    pub fn entity_rows(&self, ids: &Tensor) -> Result<Tensor> {
        Ok(self.entity.index_select(ids, 0)?)
    }

    /// Relation posterior means `(2R, embed)`.
    pub fn relation_means(&self) -> &Tensor {
        &self.relation_mean
    }

    /// Relation posterior stds `(2R, embed)`, strictly positive.
    pub fn relation_stds(&self) -> Result<Tensor> {
        Ok(positive_std(&self.relation_raw_std)?)
    }

    /// Fixed relation prior `(mean, std)`, variational mode only.
    pub fn relation_prior(&self) -> Option<(&Tensor, &Tensor)> {
        self.relation_prior.as_ref().map(|(m, s)| (m, s))
    }

    /// Learned initial hidden state `(layers, 1, hidden)`.
    pub fn h0(&self) -> &Tensor {
        &self.h0
    }

    /// `h0` broadcast to `batch` sequences.
    pub fn initial_hidden(&self, batch: usize) -> Result<HiddenState> {
        Ok(HiddenState::broadcast(&self.h0, batch)?)
    }

    /// Rows of the entity table.
    pub fn num_entities(&self) -> usize {
        self.num_entities
    }

    /// Forward relations `R`; the tables hold `2R` rows.
    pub fn num_relations(&self) -> usize {
        self.num_relations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_nn::VarMap;

    fn build_store(variational: bool) -> (VarMap, EmbeddingStore) {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let store = EmbeddingStore::new(5, 3, 8, 6, 2, variational, vb, &device).unwrap();
        (varmap, store)
    }

    #[test]
    fn test_shapes() {
        let (_varmap, store) = build_store(true);
        assert_eq!(store.entity().dims(), &[5, 8]);
        assert_eq!(store.relation_means().dims(), &[6, 8]);
        assert_eq!(store.h0().dims(), &[2, 1, 6]);

        let hidden = store.initial_hidden(4).unwrap();
        assert_eq!(hidden.batch_size(), 4);
        assert_eq!(hidden.num_layers(), 2);
    }

    #[test]
    fn test_relation_prior_fixed_and_untracked() {
        let (varmap, store) = build_store(true);
        let (mean, std) = store.relation_prior().unwrap();
        assert!(mean.flatten_all().unwrap().to_vec1::<f32>().unwrap().iter().all(|&v| v == 0.0));
        assert!(std.flatten_all().unwrap().to_vec1::<f32>().unwrap().iter().all(|&v| v == 1.0));
        // Only the four trainable tables are registered.
        assert_eq!(varmap.all_vars().len(), 4);

        let (_varmap, plain) = build_store(false);
        assert!(plain.relation_prior().is_none());
    }

    #[test]
    fn test_relation_stds_positive() {
        let (_varmap, store) = build_store(false);
        let stds = store.relation_stds().unwrap().flatten_all().unwrap();
        assert!(stds.to_vec1::<f32>().unwrap().iter().all(|&v| v > 0.0));
    }

    #[test]
    fn test_init_within_xavier_bound() {
        let (_varmap, store) = build_store(false);
        let bound = (RELU_GAIN * (6.0f64 / 13.0).sqrt()) as f32;
        let values = store.entity().flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!(values.iter().all(|v| v.abs() <= bound));
    }
}
