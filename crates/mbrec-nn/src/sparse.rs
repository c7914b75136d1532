//! Sparse adjacency on device.
//!
//! candle has no sparse tensor type, so a behavior adjacency is kept as its
//! COO triples and multiplied by a dense feature matrix with a gather /
//! scatter-add pair:
//!
//! ```text
//! out = zeros(T, d)
//! out[rows[e]] += values[e] * x[cols[e]]     for every stored entry e
//! ```
//!
//! Both `index_select` and `index_add` are differentiable, so gradients flow
//! back into whatever produced `x`.

use candle_core::{bail, DType, Device, Result, Tensor};
use mbrec_core::{CooTriples, SparseMatrix};

/// Directional `T × S` adjacency (rows = targets, cols = sources).
#[derive(Debug, Clone)]
pub struct SparseAdj {
    rows: Tensor,
    cols: Tensor,
    values: Tensor,
    shape: (usize, usize),
    nnz: usize,
}

impl SparseAdj {
    pub fn from_coo(coo: &CooTriples, device: &Device) -> Result<Self> {
        let nnz = coo.values.len();
        if coo.rows.len() != nnz || coo.cols.len() != nnz {
            bail!(
                "COO arrays disagree: {} rows, {} cols, {} values",
                coo.rows.len(),
                coo.cols.len(),
                nnz
            );
        }
        let (nrows, ncols) = coo.shape;
        if let Some(&r) = coo.rows.iter().find(|&&r| r >= nrows) {
            bail!("COO row {r} out of range for {nrows} rows");
        }
        if let Some(&c) = coo.cols.iter().find(|&&c| c >= ncols) {
            bail!("COO column {c} out of range for {ncols} columns");
        }

        let rows: Vec<u32> = coo.rows.iter().map(|&r| r as u32).collect();
        let cols: Vec<u32> = coo.cols.iter().map(|&c| c as u32).collect();
        Ok(Self {
            rows: Tensor::from_vec(rows, nnz, device)?,
            cols: Tensor::from_vec(cols, nnz, device)?,
            values: Tensor::from_vec(coo.values.clone(), (nnz, 1), device)?,
            shape: coo.shape,
            nnz,
        })
    }

    pub fn from_matrix(matrix: &SparseMatrix, device: &Device) -> Result<Self> {
        Self::from_coo(&matrix.to_coo(), device)
    }

    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    pub fn nrows(&self) -> usize {
        self.shape.0
    }

    pub fn ncols(&self) -> usize {
        self.shape.1
    }

    pub fn nnz(&self) -> usize {
        self.nnz
    }

    /// `self × dense` for a dense `(S, d)` matrix, giving `(T, d)`.
    pub fn matmul(&self, dense: &Tensor) -> Result<Tensor> {
        let (s, d) = dense.dims2()?;
        if s != self.ncols() {
            bail!(
                "sparse matmul: adjacency has {} columns, features have {} rows",
                self.ncols(),
                s
            );
        }
        let out = Tensor::zeros((self.nrows(), d), dense.dtype(), dense.device())?;
        if self.nnz == 0 {
            return Ok(out);
        }
        let values = if dense.dtype() == DType::F32 {
            self.values.clone()
        } else {
            self.values.to_dtype(dense.dtype())?
        };
        let messages = dense.index_select(&self.cols, 0)?.broadcast_mul(&values)?;
        out.index_add(&self.rows, &messages, 0)
    }
}
