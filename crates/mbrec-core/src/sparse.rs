//! Compressed sparse row matrices for interaction data.
//!
//! Interaction matrices are `users × items` per behavior. Everything the
//! sampler and the batch builders need (row/column slicing, transposition,
//! row sums over a node subset) lives here; tensors are only built from the
//! COO export once a minibatch graph has been fixed.
//!
//! # Layout
//!
//! ```text
//! indptr:  [0, 2, 3, 3]        row r spans indices[indptr[r]..indptr[r+1]]
//! indices: [0, 2, 1]           column ids, sorted within each row
//! values:  [1.0, 1.0, 1.0]
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Sparse matrix in coordinate form, the wire format handed to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct CooTriples {
    /// Row index of each entry.
    pub rows: Vec<usize>,
    /// Column index of each entry.
    pub cols: Vec<usize>,
    /// Value of each entry.
    pub values: Vec<f32>,
    /// `(rows, cols)` of the full matrix.
    pub shape: (usize, usize),
}

/// CSR matrix with sorted, duplicate-free column indices per row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseMatrix {
    nrows: usize,
    ncols: usize,
    indptr: Vec<usize>,
    indices: Vec<usize>,
    values: Vec<f32>,
}

impl SparseMatrix {
    /// All-zero matrix.
    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        Self {
            nrows,
            ncols,
            indptr: vec![0; nrows + 1],
            indices: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Square identity matrix.
    pub fn identity(n: usize) -> Self {
        Self {
            nrows: n,
            ncols: n,
            indptr: (0..=n).collect(),
            indices: (0..n).collect(),
            values: vec![1.0; n],
        }
    }

    /// Build from `(row, col, value)` triplets. Duplicate coordinates are summed.
    pub fn from_triplets(
        nrows: usize,
        ncols: usize,
        triplets: impl IntoIterator<Item = (usize, usize, f32)>,
    ) -> Result<Self> {
        let mut entries: Vec<(usize, usize, f32)> = Vec::new();
        for (r, c, v) in triplets {
            if r >= nrows {
                return Err(Error::IndexOutOfBounds {
                    index: r,
                    bound: nrows,
                    context: "matrix rows",
                });
            }
            if c >= ncols {
                return Err(Error::IndexOutOfBounds {
                    index: c,
                    bound: ncols,
                    context: "matrix columns",
                });
            }
            entries.push((r, c, v));
        }
        entries.sort_unstable_by_key(|&(r, c, _)| (r, c));

        let mut indptr = vec![0usize; nrows + 1];
        let mut indices = Vec::with_capacity(entries.len());
        let mut values: Vec<f32> = Vec::with_capacity(entries.len());
        let mut last: Option<(usize, usize)> = None;
        for (r, c, v) in entries {
            if last == Some((r, c)) {
                if let Some(acc) = values.last_mut() {
                    *acc += v;
                }
                continue;
            }
            indptr[r + 1] += 1;
            indices.push(c);
            values.push(v);
            last = Some((r, c));
        }
        for r in 0..nrows {
            indptr[r + 1] += indptr[r];
        }

        Ok(Self {
            nrows,
            ncols,
            indptr,
            indices,
            values,
        })
    }

    /// Build a binary matrix from `(row, col)` pairs.
    pub fn from_pairs(
        nrows: usize,
        ncols: usize,
        pairs: impl IntoIterator<Item = (usize, usize)>,
    ) -> Result<Self> {
        Ok(Self::from_triplets(nrows, ncols, pairs.into_iter().map(|(r, c)| (r, c, 1.0)))?.binarize())
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.nrows, self.ncols)
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.indices.len()
    }

    fn check_row(&self, r: usize) -> Result<()> {
        if r >= self.nrows {
            return Err(Error::IndexOutOfBounds {
                index: r,
                bound: self.nrows,
                context: "matrix rows",
            });
        }
        Ok(())
    }

    /// Column ids stored in row `r` (sorted). Empty for out-of-range rows.
    pub fn row_indices(&self, r: usize) -> &[usize] {
        if r >= self.nrows {
            return &[];
        }
        &self.indices[self.indptr[r]..self.indptr[r + 1]]
    }

    /// Values stored in row `r`, aligned with [`row_indices`](Self::row_indices).
    pub fn row_values(&self, r: usize) -> &[f32] {
        if r >= self.nrows {
            return &[];
        }
        &self.values[self.indptr[r]..self.indptr[r + 1]]
    }

    /// Value at `(r, c)`; zero when absent.
    pub fn get(&self, r: usize, c: usize) -> f32 {
        let cols = self.row_indices(r);
        match cols.binary_search(&c) {
            Ok(pos) => self.row_values(r)[pos],
            Err(_) => 0.0,
        }
    }

    pub fn transpose(&self) -> Self {
        let mut counts = vec![0usize; self.ncols + 1];
        for &c in &self.indices {
            counts[c + 1] += 1;
        }
        for c in 0..self.ncols {
            counts[c + 1] += counts[c];
        }
        let indptr = counts.clone();
        let mut next = counts;
        let mut indices = vec![0usize; self.nnz()];
        let mut values = vec![0f32; self.nnz()];
        // Rows are visited in order, so each transposed row stays sorted.
        for r in 0..self.nrows {
            for k in self.indptr[r]..self.indptr[r + 1] {
                let c = self.indices[k];
                let dst = next[c];
                indices[dst] = r;
                values[dst] = self.values[k];
                next[c] += 1;
            }
        }
        Self {
            nrows: self.ncols,
            ncols: self.nrows,
            indptr,
            indices,
            values,
        }
    }

    /// Keep the given rows, in the given order.
    pub fn select_rows(&self, rows: &[usize]) -> Result<Self> {
        let mut indptr = Vec::with_capacity(rows.len() + 1);
        indptr.push(0);
        let mut indices = Vec::new();
        let mut values = Vec::new();
        for &r in rows {
            self.check_row(r)?;
            indices.extend_from_slice(self.row_indices(r));
            values.extend_from_slice(self.row_values(r));
            indptr.push(indices.len());
        }
        Ok(Self {
            nrows: rows.len(),
            ncols: self.ncols,
            indptr,
            indices,
            values,
        })
    }

    /// Keep the given columns; column `cols[j]` becomes column `j`.
    ///
    /// `cols` must not contain duplicates.
    pub fn select_cols(&self, cols: &[usize]) -> Result<Self> {
        let mut new_id: Vec<Option<usize>> = vec![None; self.ncols];
        for (j, &c) in cols.iter().enumerate() {
            if c >= self.ncols {
                return Err(Error::IndexOutOfBounds {
                    index: c,
                    bound: self.ncols,
                    context: "matrix columns",
                });
            }
            if new_id[c].replace(j).is_some() {
                return Err(Error::Sampling(format!("duplicate column {c} in selection")));
            }
        }

        let mut indptr = Vec::with_capacity(self.nrows + 1);
        indptr.push(0);
        let mut indices = Vec::new();
        let mut values = Vec::new();
        let mut row: Vec<(usize, f32)> = Vec::new();
        for r in 0..self.nrows {
            row.clear();
            for (&c, &v) in self.row_indices(r).iter().zip(self.row_values(r)) {
                if let Some(j) = new_id[c] {
                    row.push((j, v));
                }
            }
            row.sort_unstable_by_key(|&(j, _)| j);
            for &(j, v) in &row {
                indices.push(j);
                values.push(v);
            }
            indptr.push(indices.len());
        }
        Ok(Self {
            nrows: self.nrows,
            ncols: cols.len(),
            indptr,
            indices,
            values,
        })
    }

    /// Rows then columns.
    pub fn submatrix(&self, rows: &[usize], cols: &[usize]) -> Result<Self> {
        self.select_rows(rows)?.select_cols(cols)
    }

    /// Column-wise sum of the given rows (length `ncols`).
    pub fn row_sums_over(&self, rows: &[usize]) -> Result<Vec<f64>> {
        let mut acc = vec![0f64; self.ncols];
        for &r in rows {
            self.check_row(r)?;
            for (&c, &v) in self.row_indices(r).iter().zip(self.row_values(r)) {
                acc[c] += f64::from(v);
            }
        }
        Ok(acc)
    }

    /// Every stored nonzero becomes 1.0; explicit zeros are dropped.
    pub fn binarize(&self) -> Self {
        let mut indptr = Vec::with_capacity(self.nrows + 1);
        indptr.push(0);
        let mut indices = Vec::with_capacity(self.nnz());
        for r in 0..self.nrows {
            for (&c, &v) in self.row_indices(r).iter().zip(self.row_values(r)) {
                if v != 0.0 {
                    indices.push(c);
                }
            }
            indptr.push(indices.len());
        }
        let values = vec![1.0; indices.len()];
        Self {
            nrows: self.nrows,
            ncols: self.ncols,
            indptr,
            indices,
            values,
        }
    }

    /// Elementwise sum of two matrices of the same shape.
    pub fn add(&self, other: &Self) -> Result<Self> {
        if self.nrows != other.nrows {
            return Err(Error::DimensionMismatch {
                expected: self.nrows,
                got: other.nrows,
            });
        }
        if self.ncols != other.ncols {
            return Err(Error::DimensionMismatch {
                expected: self.ncols,
                got: other.ncols,
            });
        }
        Self::from_triplets(
            self.nrows,
            self.ncols,
            self.iter().chain(other.iter()),
        )
    }

    /// Iterate `(row, col, value)` in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, f32)> + '_ {
        (0..self.nrows).flat_map(move |r| {
            self.row_indices(r)
                .iter()
                .zip(self.row_values(r))
                .map(move |(&c, &v)| (r, c, v))
        })
    }

    pub fn to_coo(&self) -> CooTriples {
        let mut rows = Vec::with_capacity(self.nnz());
        let mut cols = Vec::with_capacity(self.nnz());
        let mut values = Vec::with_capacity(self.nnz());
        for (r, c, v) in self.iter() {
            rows.push(r);
            cols.push(c);
            values.push(v);
        }
        CooTriples {
            rows,
            cols,
            values,
            shape: self.shape(),
        }
    }
}
