//! Context-conditioned message transform.
//!
//! For each behavior adjacency `A_b` (targets × sources) the neighbor signal
//! is aggregated and then passed through an operator generated from that
//! signal itself:
//!
//! ```text
//! agg  = A_b · X                         (T, d)
//! memo = relu(W_m · agg + b_m)           (T, memosize)
//! M    = reshape(W_t · memo, [T, d, d])  no bias
//! out  = agg ⊗ M                         out[t] = Σ_k agg[t,k] · M[t,k,:]
//! ```
//!
//! `W_m`, `b_m` and `W_t` are shared by every behavior passed to one call.

use crate::error::{Error, Result};
use crate::sparse::SparseAdj;
use candle_core::{Module, Tensor};
use candle_nn::{linear, linear_no_bias, Linear, VarBuilder};

/// Memory-conditioned `latdim × latdim` transform.
#[derive(Debug, Clone)]
pub struct MemoryTransform {
    memo: Linear,
    operator: Linear,
    latdim: usize,
}

impl MemoryTransform {
    /// # Arguments
    /// - `latdim`: Feature width `d`
    /// - `memosize`: Width of the memory attention vector
    /// - `vb`: Variable builder
    pub fn new(latdim: usize, memosize: usize, vb: VarBuilder) -> candle_core::Result<Self> {
        let memo = linear(latdim, memosize, vb.pp("memo"))?;
        let operator = linear_no_bias(memosize, latdim * latdim, vb.pp("operator"))?;
        Ok(Self {
            memo,
            operator,
            latdim,
        })
    }

    /// Apply the generated operator row by row to an aggregated signal `(T, d)`.
    pub fn transform(&self, agg: &Tensor) -> candle_core::Result<Tensor> {
        let n = agg.dim(0)?;
        let d = self.latdim;
        let memo = self.memo.forward(agg)?.relu()?;
        let op = self.operator.forward(&memo)?.reshape((n, d, d))?;
        agg.unsqueeze(1)?.matmul(&op)?.squeeze(1)
    }

    /// One transformed `(targets, d)` latent per adjacency.
    ///
    /// # Arguments
    /// - `features`: Source features `(S, d)`
    /// - `adjs`: One `(targets, S)` adjacency per behavior
    /// - `targets`: Number of target entities
    pub fn forward(
        &self,
        features: &Tensor,
        adjs: &[SparseAdj],
        targets: usize,
    ) -> Result<Vec<Tensor>> {
        let (sources, d) = features.dims2()?;
        if d != self.latdim {
            return Err(Error::DimensionMismatch {
                context: "message features",
                expected: self.latdim,
                got: d,
            });
        }
        for adj in adjs {
            if adj.nrows() != targets {
                return Err(Error::DimensionMismatch {
                    context: "adjacency rows",
                    expected: targets,
                    got: adj.nrows(),
                });
            }
            if adj.ncols() != sources {
                return Err(Error::DimensionMismatch {
                    context: "adjacency columns",
                    expected: sources,
                    got: adj.ncols(),
                });
            }
        }

        let mut out = Vec::with_capacity(adjs.len());
        for adj in adjs {
            let agg = adj.matmul(features)?;
            out.push(self.transform(&agg)?);
        }
        Ok(out)
    }
}
