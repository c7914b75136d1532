//! Attention-based fusion of per-behavior latents.
//!
//! Two stages, both across the behavior axis of each entity:
//!
//! 1. **Self-attention**: every behavior latent attends over all behavior
//!    latents of the same entity (multi-head, scaled dot product, softmax
//!    over the context behaviors) and keeps a residual connection.
//! 2. **Gate**: a shared two-layer feed-forward net scores each attended
//!    latent; the scores are softmaxed over behaviors and weight the sum.
//!
//! ```text
//! h_b   = Σ_c softmax_c(q_b · k_c / sqrt(d/h)) v_c + x_b
//! g_b   = softmax_b(W_2 relu(W_1 h_b + b_1) + b_2)
//! fused = Σ_b g_b h_b
//! ```
//!
//! With a single behavior both stages are skipped: the output is the input
//! and the gate is exactly 1.

use candle_core::{bail, DType, Module, Result, Tensor, D};
use candle_nn::{linear, linear_no_bias, ops::softmax, Linear, VarBuilder};

/// Multi-head self-attention over the behavior axis.
#[derive(Debug, Clone)]
struct BehaviorAttention {
    query: Linear,
    key: Linear,
    value: Linear,
    num_heads: usize,
    head_dim: usize,
}

impl BehaviorAttention {
    fn new(latdim: usize, num_heads: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            query: linear_no_bias(latdim, latdim, vb.pp("query"))?,
            key: linear_no_bias(latdim, latdim, vb.pp("key"))?,
            value: linear_no_bias(latdim, latdim, vb.pp("value"))?,
            num_heads,
            head_dim: latdim / num_heads,
        })
    }

    /// `(N, B, d)` to `(N, B, d)`.
    fn forward(&self, stacked: &Tensor) -> Result<Tensor> {
        let (n, b, d) = stacked.dims3()?;
        let flat = stacked.reshape((n * b, d))?;
        let split = |proj: &Linear| -> Result<Tensor> {
            proj.forward(&flat)?
                .reshape((n, b, self.num_heads, self.head_dim))?
                .transpose(1, 2)?
                .contiguous()
        };
        let q = split(&self.query)?;
        let k = split(&self.key)?;
        let v = split(&self.value)?;

        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let logits = q.matmul(&k.t()?.contiguous()?)?.affine(scale, 0.0)?;
        let weights = softmax(&logits, D::Minus1)?;
        let attended = weights
            .matmul(&v)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((n, b, d))?;
        attended + stacked
    }
}

#[derive(Debug, Clone)]
struct Fusion {
    attention: BehaviorAttention,
    gate_hidden: Linear,
    gate_out: Linear,
}

/// Fuses `beh_num` latents `(N, d)` into one `(N, d)`.
#[derive(Debug, Clone)]
pub struct BehaviorAggregator {
    fusion: Option<Fusion>,
    beh_num: usize,
    latdim: usize,
}

impl BehaviorAggregator {
    /// Create a new aggregator.
    ///
    /// No parameters are registered when `beh_num == 1`.
    ///
    /// # Arguments
    /// - `latdim`: Latent width `d` (must be divisible by `num_heads`)
    /// - `beh_num`: Number of behaviors
    /// - `num_heads`: Self-attention heads
    /// - `vb`: Variable builder
    pub fn new(latdim: usize, beh_num: usize, num_heads: usize, vb: VarBuilder) -> Result<Self> {
        if beh_num == 0 {
            bail!("behavior aggregator needs at least one behavior");
        }
        if num_heads == 0 || latdim % num_heads != 0 {
            bail!("latdim {latdim} is not divisible by {num_heads} heads");
        }
        let fusion = if beh_num > 1 {
            let hidden = (latdim / 2).max(1);
            Some(Fusion {
                attention: BehaviorAttention::new(latdim, num_heads, vb.pp("attention"))?,
                gate_hidden: linear(latdim, hidden, vb.pp("gate_hidden"))?,
                gate_out: linear(hidden, 1, vb.pp("gate_out"))?,
            })
        } else {
            None
        };
        Ok(Self {
            fusion,
            beh_num,
            latdim,
        })
    }

    pub fn forward(&self, latents: &[Tensor]) -> Result<Tensor> {
        Ok(self.forward_with_gates(latents)?.0)
    }

    /// Fused latent `(N, d)` and behavior gates `(N, beh_num)`.
    pub fn forward_with_gates(&self, latents: &[Tensor]) -> Result<(Tensor, Tensor)> {
        if latents.len() != self.beh_num {
            bail!(
                "expected {} behavior latents, got {}",
                self.beh_num,
                latents.len()
            );
        }
        let (n, d) = latents[0].dims2()?;
        if d != self.latdim {
            bail!("behavior latent width {d}, expected {}", self.latdim);
        }

        let Some(fusion) = &self.fusion else {
            let gates = Tensor::ones((n, 1), DType::F32, latents[0].device())?;
            return Ok((latents[0].clone(), gates));
        };

        let stacked = Tensor::stack(latents, 1)?;
        let attended = fusion.attention.forward(&stacked)?;

        let hidden = fusion
            .gate_hidden
            .forward(&attended.reshape((n * self.beh_num, d))?)?
            .relu()?;
        let scores = fusion.gate_out.forward(&hidden)?.reshape((n, self.beh_num))?;
        let gates = softmax(&scores, 1)?;

        let fused = attended.broadcast_mul(&gates.unsqueeze(2)?)?.sum(1)?;
        Ok((fused, gates))
    }
}
