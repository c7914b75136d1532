//! Multi-layer user ↔ item propagation.
//!
//! ```text
//! u[i+1] = Aggregate_u(Transform_i(v[i], A_ui))
//! v[i+1] = Aggregate_v(Transform_i(u[i], A_iu))
//! ```
//!
//! Both directions of layer `i` read layer `i` only. One [`MemoryTransform`]
//! is built per layer and serves both directions and every behavior of that
//! layer; each side has its own [`BehaviorAggregator`].
//!
//! Every layer (including the input layer 0) is L2-normalised and the layers
//! are stacked into `(N, L + 1, d)`.

use crate::aggregate::BehaviorAggregator;
use crate::error::{Error, Result};
use crate::message::MemoryTransform;
use crate::sparse::SparseAdj;
use candle_core::{Tensor, D};
use candle_nn::VarBuilder;

const NORM_EPS: f64 = 1e-6;

/// `x / (eps + sqrt(eps + Σ x²))` along the last axis.
pub fn l2_normalize(x: &Tensor) -> candle_core::Result<Tensor> {
    let norm = x
        .sqr()?
        .sum_keepdim(D::Minus1)?
        .affine(1.0, NORM_EPS)?
        .sqrt()?
        .affine(1.0, NORM_EPS)?;
    x.broadcast_div(&norm)
}

#[derive(Debug, Clone)]
struct PropagationLayer {
    transform: MemoryTransform,
    user_aggregator: BehaviorAggregator,
    item_aggregator: BehaviorAggregator,
}

/// Output of a propagation pass.
#[derive(Debug, Clone)]
pub struct LayerStack {
    /// Normalised user layers `(users, L + 1, d)`.
    pub users: Tensor,
    /// Normalised item layers `(items, L + 1, d)`.
    pub items: Tensor,
    /// Transformed per-behavior latents, `[layer][user behaviors.., item behaviors..]`.
    pub behavior_latents: Vec<Vec<Tensor>>,
    /// Behavior gates `(user gates, item gates)` per layer.
    pub gates: Vec<(Tensor, Tensor)>,
}

impl LayerStack {
    pub fn num_layers(&self) -> usize {
        self.users.dims()[1]
    }
}

/// Stack of `gnn_layer` propagation layers.
#[derive(Debug, Clone)]
pub struct Propagation {
    layers: Vec<PropagationLayer>,
    beh_num: usize,
    latdim: usize,
}

impl Propagation {
    /// # Arguments
    /// - `latdim`: Latent width
    /// - `num_layers`: Propagation depth `L`
    /// - `beh_num`: Behaviors per direction
    /// - `num_heads`: Behavior self-attention heads
    /// - `memosize`: Memory vector width of each transform
    /// - `vb`: Variable builder
    pub fn new(
        latdim: usize,
        num_layers: usize,
        beh_num: usize,
        num_heads: usize,
        memosize: usize,
        vb: VarBuilder,
    ) -> candle_core::Result<Self> {
        let layers = (0..num_layers)
            .map(|i| {
                let vb = vb.pp(format!("layer{i}"));
                Ok(PropagationLayer {
                    transform: MemoryTransform::new(latdim, memosize, vb.pp("transform"))?,
                    user_aggregator: BehaviorAggregator::new(
                        latdim,
                        beh_num,
                        num_heads,
                        vb.pp("user_aggregator"),
                    )?,
                    item_aggregator: BehaviorAggregator::new(
                        latdim,
                        beh_num,
                        num_heads,
                        vb.pp("item_aggregator"),
                    )?,
                })
            })
            .collect::<candle_core::Result<Vec<_>>>()?;
        Ok(Self {
            layers,
            beh_num,
            latdim,
        })
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Run all layers.
    ///
    /// # Arguments
    /// - `users0`, `items0`: Input embeddings `(U, d)` and `(I, d)`
    /// - `ui_adjs`: One `(U, I)` adjacency per behavior
    /// - `iu_adjs`: One `(I, U)` adjacency per behavior
    pub fn forward(
        &self,
        users0: &Tensor,
        items0: &Tensor,
        ui_adjs: &[SparseAdj],
        iu_adjs: &[SparseAdj],
    ) -> Result<LayerStack> {
        for (adjs, context) in [(ui_adjs, "user-item adjacencies"), (iu_adjs, "item-user adjacencies")] {
            if adjs.len() != self.beh_num {
                return Err(Error::DimensionMismatch {
                    context,
                    expected: self.beh_num,
                    got: adjs.len(),
                });
            }
        }
        let (num_users, du) = users0.dims2()?;
        let (num_items, di) = items0.dims2()?;
        for d in [du, di] {
            if d != self.latdim {
                return Err(Error::DimensionMismatch {
                    context: "input embedding width",
                    expected: self.latdim,
                    got: d,
                });
            }
        }

        let mut ulats = vec![users0.clone()];
        let mut ilats = vec![items0.clone()];
        let mut behavior_latents = Vec::with_capacity(self.layers.len());
        let mut gates = Vec::with_capacity(self.layers.len());

        let mut prev_u = users0.clone();
        let mut prev_i = items0.clone();
        for layer in &self.layers {
            let user_msgs = layer.transform.forward(&prev_i, ui_adjs, num_users)?;
            let item_msgs = layer.transform.forward(&prev_u, iu_adjs, num_items)?;

            let (ulat, ugate) = layer.user_aggregator.forward_with_gates(&user_msgs)?;
            let (ilat, igate) = layer.item_aggregator.forward_with_gates(&item_msgs)?;

            prev_u = ulat.clone();
            prev_i = ilat.clone();
            ulats.push(ulat);
            ilats.push(ilat);
            gates.push((ugate, igate));
            behavior_latents.push(user_msgs.into_iter().chain(item_msgs).collect());
        }

        let normalize = |lats: Vec<Tensor>| -> Result<Tensor> {
            let normed = lats
                .iter()
                .map(l2_normalize)
                .collect::<candle_core::Result<Vec<_>>>()?;
            Ok(Tensor::stack(&normed, 1)?)
        };
        Ok(LayerStack {
            users: normalize(ulats)?,
            items: normalize(ilats)?,
            behavior_latents,
            gates,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;
    use mbrec_core::SparseMatrix;

    fn adjs(m: &SparseMatrix, beh: usize, device: &Device) -> (Vec<SparseAdj>, Vec<SparseAdj>) {
        let ui = SparseAdj::from_matrix(m, device).unwrap();
        let iu = SparseAdj::from_matrix(&m.transpose(), device).unwrap();
        (vec![ui; beh], vec![iu; beh])
    }

    #[test]
    fn test_l2_normalize() {
        let x = Tensor::new(&[[3f32, 4.], [0., 0.]], &Device::Cpu).unwrap();
        let y: Vec<Vec<f32>> = l2_normalize(&x).unwrap().to_vec2().unwrap();
        assert!((y[0][0] - 0.6).abs() < 1e-4);
        assert!((y[0][1] - 0.8).abs() < 1e-4);
        assert_eq!(y[1], vec![0.0, 0.0]);
    }

    #[test]
    fn test_stack_shapes_and_norms() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let prop = Propagation::new(4, 2, 2, 2, 2, vb).unwrap();

        let m = SparseMatrix::from_pairs(3, 2, vec![(0, 0), (1, 1), (2, 0), (2, 1)]).unwrap();
        let (ui, iu) = adjs(&m, 2, &device);
        let u0 = Tensor::randn(0f32, 1., (3, 4), &device).unwrap();
        let i0 = Tensor::randn(0f32, 1., (2, 4), &device).unwrap();

        let stack = prop.forward(&u0, &i0, &ui, &iu).unwrap();
        assert_eq!(stack.users.dims(), &[3, 3, 4]);
        assert_eq!(stack.items.dims(), &[2, 3, 4]);
        assert_eq!(stack.num_layers(), 3);
        assert_eq!(stack.behavior_latents.len(), 2);
        assert_eq!(stack.behavior_latents[0].len(), 4);

        let norms: Vec<Vec<f32>> = stack
            .users
            .sqr()
            .unwrap()
            .sum(D::Minus1)
            .unwrap()
            .sqrt()
            .unwrap()
            .to_vec2()
            .unwrap();
        for row in norms {
            assert!((row[0] - 1.0).abs() < 1e-3, "input layer norm {}", row[0]);
            // A row whose memory vector is fully rectified receives a zero message.
            for n in &row[1..] {
                assert!((*n - 1.0).abs() < 1e-2 || *n < 1e-2, "layer norm {n}");
            }
        }
    }

    #[test]
    fn test_behavior_count_checked() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let prop = Propagation::new(4, 1, 2, 2, 2, vb).unwrap();
        let m = SparseMatrix::identity(3);
        let (ui, iu) = adjs(&m, 1, &device);
        let x = Tensor::randn(0f32, 1., (3, 4), &device).unwrap();
        let err = prop.forward(&x, &x, &ui, &iu).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 2, got: 1, .. }));
    }

    #[test]
    fn test_transform_shared_across_directions() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let _prop = Propagation::new(4, 2, 2, 2, 2, vb).unwrap();
        let data = varmap.data().lock().unwrap();
        let transforms = data.keys().filter(|k| k.contains("transform.operator")).count();
        assert_eq!(transforms, 2);
    }
}
