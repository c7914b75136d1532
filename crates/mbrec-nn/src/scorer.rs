//! Cross multi-head attention scorer over the layer grid.
//!
//! A `(user, item)` pair is scored from its two layer stacks. Every user
//! layer `l1` is paired with every item layer `l2`; the pair contributes the
//! elementwise product of their values, weighted per head by the rectified
//! dot product of their keys:
//!
//! ```text
//! a[l1,l2,h] = relu(Σ_k ukey[l1,h,k] · ikey[l2,h,k])
//! z[h]       = Σ_{l1,l2} a[l1,l2,h] · (uval[l1,h] ⊙ ival[l2,h])
//! x          = concat_h(z[h]) · mult
//! x          = relu(W_r x + b_r) + x
//! score      = w_o · x + b_o
//! ```
//!
//! The layer grid is *not* softmax-normalised: weights are independent and
//! unbounded above, zero when keys disagree.

use candle_core::{bail, Module, Result, Tensor};
use candle_nn::{linear, linear_no_bias, Linear, VarBuilder};

/// Scores `(user stack, item stack)` pairs.
#[derive(Debug, Clone)]
pub struct CrossAttentionScorer {
    key: Linear,
    value: Linear,
    refine: Linear,
    output: Linear,
    num_heads: usize,
    latdim: usize,
    mult: f64,
}

impl CrossAttentionScorer {
    /// # Arguments
    /// - `latdim`: Latent width (divisible by `num_heads`)
    /// - `num_heads`: Attention heads
    /// - `mult`: Fixed scale applied to the attended latent
    /// - `vb`: Variable builder
    pub fn new(latdim: usize, num_heads: usize, mult: f64, vb: VarBuilder) -> Result<Self> {
        if num_heads == 0 || latdim % num_heads != 0 {
            bail!("latdim {latdim} is not divisible by {num_heads} heads");
        }
        Ok(Self {
            key: linear_no_bias(latdim, latdim, vb.pp("key"))?,
            value: linear_no_bias(latdim, latdim, vb.pp("value"))?,
            refine: linear(latdim, latdim, vb.pp("refine"))?,
            output: linear(latdim, 1, vb.pp("output"))?,
            num_heads,
            latdim,
            mult,
        })
    }

    /// Project `(P, L, d)` with `proj` and split into heads laid out for the
    /// user side `(P, L, 1, h, d/h)` or the item side `(P, 1, L, h, d/h)`.
    fn heads(&self, proj: &Linear, stack: &Tensor, user_side: bool) -> Result<Tensor> {
        let (p, l, d) = stack.dims3()?;
        if d != self.latdim {
            bail!("scorer input width {d}, expected {}", self.latdim);
        }
        let projected = proj.forward(&stack.reshape((p * l, d))?)?;
        let head_dim = d / self.num_heads;
        if user_side {
            projected.reshape((p, l, 1, self.num_heads, head_dim))
        } else {
            projected.reshape((p, 1, l, self.num_heads, head_dim))
        }
    }

    /// Rectified attention weights `(P, L, L, h)` of every layer pair.
    pub fn layer_attention(&self, users: &Tensor, items: &Tensor) -> Result<Tensor> {
        let ukeys = self.heads(&self.key, users, true)?;
        let ikeys = self.heads(&self.key, items, false)?;
        ukeys.broadcast_mul(&ikeys)?.sum(4)?.relu()
    }

    /// One score per pair.
    ///
    /// # Arguments
    /// - `users`: Gathered user stacks `(P, L, d)`
    /// - `items`: Gathered item stacks `(P, L, d)`, aligned with `users`
    pub fn forward(&self, users: &Tensor, items: &Tensor) -> Result<Tensor> {
        let (p, lu, _) = users.dims3()?;
        let (pi, li, _) = items.dims3()?;
        if p != pi || lu != li {
            bail!("scorer pairs disagree: users {:?}, items {:?}", users.dims(), items.dims());
        }

        let att = self.layer_attention(users, items)?.unsqueeze(4)?;
        let uvals = self.heads(&self.value, users, true)?;
        let ivals = self.heads(&self.value, items, false)?;
        let lat = uvals.broadcast_mul(&ivals)?;

        let pred = att
            .broadcast_mul(&lat)?
            .sum(2)?
            .sum(1)?
            .reshape((p, self.latdim))?
            .affine(self.mult, 0.0)?;
        let pred = (self.refine.forward(&pred)?.relu()? + &pred)?;
        self.output.forward(&pred)?.squeeze(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device, D};
    use candle_nn::VarMap;

    fn scorer(latdim: usize, heads: usize) -> (VarMap, CrossAttentionScorer) {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let s = CrossAttentionScorer::new(latdim, heads, 1.0, vb).unwrap();
        (varmap, s)
    }

    #[test]
    fn test_scores_per_pair() {
        let (_vm, s) = scorer(4, 2);
        let users = Tensor::randn(0f32, 1., (6, 2, 4), &Device::Cpu).unwrap();
        let items = Tensor::randn(0f32, 1., (6, 2, 4), &Device::Cpu).unwrap();
        let scores = s.forward(&users, &items).unwrap();
        assert_eq!(scores.dims(), &[6]);
        let v: Vec<f32> = scores.to_vec1().unwrap();
        assert!(v.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn test_layer_attention_is_rectified() {
        let (_vm, s) = scorer(4, 2);
        let users = Tensor::randn(0f32, 1., (5, 3, 4), &Device::Cpu).unwrap();
        let items = Tensor::randn(0f32, 1., (5, 3, 4), &Device::Cpu).unwrap();
        let att = s.layer_attention(&users, &items).unwrap();
        assert_eq!(att.dims(), &[5, 3, 3, 2]);
        let min = att.flatten_all().unwrap().min(D::Minus1).unwrap();
        assert!(min.to_scalar::<f32>().unwrap() >= 0.0);
    }

    #[test]
    fn test_opposite_keys_give_zero_weight() {
        let (_vm, s) = scorer(2, 1);
        let users = Tensor::new(&[[[1f32, 0.5]]], &Device::Cpu).unwrap();
        let items = users.neg().unwrap();
        // ukey · ikey = -|W u|² <= 0
        let att: Vec<f32> = s
            .layer_attention(&users, &items)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        assert_eq!(att, vec![0.0]);
    }

    #[test]
    fn test_misaligned_pairs_rejected() {
        let (_vm, s) = scorer(4, 2);
        let users = Tensor::zeros((3, 2, 4), DType::F32, &Device::Cpu).unwrap();
        let items = Tensor::zeros((2, 2, 4), DType::F32, &Device::Cpu).unwrap();
        assert!(s.forward(&users, &items).is_err());
    }
}
