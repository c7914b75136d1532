//! The full recommender: propagation followed by cross-attention scoring.
//!
//! A model is built once from a [`RecConfig`] (every parameter is registered
//! in one [`VarMap`] at construction time) and then fed one
//! [`GraphInputs`] per minibatch.
//!
//! ```text
//! GraphInputs ──encode──> LayerStack ──score(uids, iids)──> scores (P,)
//! ```

use crate::embed::EmbeddingStore;
use crate::error::{Error, Result};
use crate::propagate::{LayerStack, Propagation};
use crate::scorer::CrossAttentionScorer;
use crate::sparse::SparseAdj;
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use mbrec_core::{RecConfig, SampledGraph};

/// `u32` index tensor for `index_select`.
pub fn ids_tensor(ids: &[usize], device: &Device) -> candle_core::Result<Tensor> {
    let ids: Vec<u32> = ids.iter().map(|&i| i as u32).collect();
    let n = ids.len();
    Tensor::from_vec(ids, n, device)
}

/// Everything a forward pass reads for one sampled graph.
#[derive(Debug, Clone)]
pub struct GraphInputs {
    /// `(users, items)` adjacency per behavior.
    pub ui_adjs: Vec<SparseAdj>,
    /// `(items, users)` adjacency per behavior.
    pub iu_adjs: Vec<SparseAdj>,
    /// Layer-0 embeddings of the sampled users.
    pub user_embeds: Tensor,
    /// Layer-0 embeddings of the sampled items.
    pub item_embeds: Tensor,
}

impl GraphInputs {
    /// Move a sampled graph and its input embeddings onto the store's device.
    pub fn from_sampled(graph: &SampledGraph, store: &EmbeddingStore) -> Result<Self> {
        let device = store.device();
        let to_device = |mats: &[mbrec_core::SparseMatrix]| {
            mats.iter()
                .map(|m| SparseAdj::from_matrix(m, device))
                .collect::<candle_core::Result<Vec<_>>>()
        };
        Ok(Self {
            ui_adjs: to_device(&graph.adjs)?,
            iu_adjs: to_device(&graph.tp_adjs)?,
            user_embeds: store.gather_users(&graph.users)?,
            item_embeds: store.gather_items(&graph.items)?,
        })
    }

    pub fn num_users(&self) -> usize {
        self.user_embeds.dims()[0]
    }

    pub fn num_items(&self) -> usize {
        self.item_embeds.dims()[0]
    }
}

/// Multi-behavior graph recommender.
pub struct MultiBehaviorModel {
    varmap: VarMap,
    propagation: Propagation,
    scorer: CrossAttentionScorer,
    device: Device,
}

impl MultiBehaviorModel {
    /// Validate `config` and register every parameter.
    pub fn new(config: &RecConfig, device: &Device) -> Result<Self> {
        config.validate()?;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let propagation = Propagation::new(
            config.latdim,
            config.gnn_layer,
            config.beh_num,
            config.att_head,
            config.memosize,
            vb.pp("propagation"),
        )?;
        let scorer =
            CrossAttentionScorer::new(config.latdim, config.att_head, config.mult, vb.pp("scorer"))?;

        let model = Self {
            varmap,
            propagation,
            scorer,
            device: device.clone(),
        };
        tracing::info!(
            parameters = model.num_parameters(),
            layers = config.gnn_layer,
            behaviors = config.beh_num,
            "model prepared"
        );
        Ok(model)
    }

    /// Propagate the input embeddings through every layer.
    pub fn encode(&self, inputs: &GraphInputs) -> Result<LayerStack> {
        self.propagation.forward(
            &inputs.user_embeds,
            &inputs.item_embeds,
            &inputs.ui_adjs,
            &inputs.iu_adjs,
        )
    }

    /// Score aligned `(uids[k], iids[k])` pairs of local ids.
    pub fn score(&self, stack: &LayerStack, uids: &[usize], iids: &[usize]) -> Result<Tensor> {
        if uids.len() != iids.len() {
            return Err(Error::DimensionMismatch {
                context: "score pairs",
                expected: uids.len(),
                got: iids.len(),
            });
        }
        check_ids(uids, stack.users.dims()[0], "scored users")?;
        check_ids(iids, stack.items.dims()[0], "scored items")?;
        if uids.is_empty() {
            return Ok(Tensor::zeros(0, DType::F32, &self.device)?);
        }

        let users = stack.users.index_select(&ids_tensor(uids, &self.device)?, 0)?;
        let items = stack.items.index_select(&ids_tensor(iids, &self.device)?, 0)?;
        Ok(self.scorer.forward(&users, &items)?)
    }

    /// [`encode`](Self::encode) then [`score`](Self::score).
    pub fn forward(&self, inputs: &GraphInputs, uids: &[usize], iids: &[usize]) -> Result<Tensor> {
        let stack = self.encode(inputs)?;
        self.score(&stack, uids, iids)
    }

    pub fn scorer(&self) -> &CrossAttentionScorer {
        &self.scorer
    }

    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    pub fn varmap_mut(&mut self) -> &mut VarMap {
        &mut self.varmap
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Total number of scalar parameters.
    pub fn num_parameters(&self) -> usize {
        self.varmap
            .all_vars()
            .iter()
            .map(|v| v.as_tensor().elem_count())
            .sum()
    }
}

fn check_ids(ids: &[usize], bound: usize, context: &'static str) -> Result<()> {
    if let Some(&index) = ids.iter().find(|&&i| i >= bound) {
        return Err(mbrec_core::Error::IndexOutOfBounds {
            index,
            bound,
            context,
        }
        .into());
    }
    Ok(())
}
