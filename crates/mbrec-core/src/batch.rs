//! Minibatch builders over a sampled subgraph.
//!
//! Every id handled here is *local* to one [`SampledGraph`](crate::sampling::SampledGraph):
//! rows of the sliced label matrix are users, columns are items. [`IdRemap`]
//! translates global ids into that space and is dropped with the graph.

use crate::error::{Error, Result};
use crate::sampling::negative_sample;
use crate::sparse::SparseMatrix;
use rand::prelude::*;
use std::collections::HashMap;

/// Global → local id map for one sampled graph.
#[derive(Debug, Clone, Default)]
pub struct IdRemap {
    to_local: HashMap<usize, usize>,
}

impl IdRemap {
    /// Local id `k` is `global_ids[k]`.
    pub fn new(global_ids: &[usize]) -> Self {
        let to_local = global_ids
            .iter()
            .enumerate()
            .map(|(local, &global)| (global, local))
            .collect();
        Self { to_local }
    }

    pub fn local(&self, global: usize) -> Option<usize> {
        self.to_local.get(&global).copied()
    }

    pub fn len(&self) -> usize {
        self.to_local.len()
    }

    pub fn is_empty(&self) -> bool {
        self.to_local.is_empty()
    }

    /// Map every id; fails on the first id outside the graph.
    pub fn map_all(&self, globals: &[usize]) -> Result<Vec<usize>> {
        globals
            .iter()
            .map(|&g| {
                self.local(g).ok_or_else(|| {
                    Error::Sampling(format!("id {g} is not part of the sampled graph"))
                })
            })
            .collect()
    }
}

/// Scoring pairs for one training step.
///
/// `uids[..half]`/`iids[..half]` are positive pairs and `[half..]` are the
/// matching negatives: pair `k` and pair `k + half` belong to the same user.
#[derive(Debug, Clone, Default)]
pub struct TrainBatch {
    pub uids: Vec<usize>,
    pub iids: Vec<usize>,
    /// Users whose samples are padding (identical positive and negative items).
    pub degenerate_users: Vec<usize>,
}

impl TrainBatch {
    /// Number of positive (= negative) pairs.
    pub fn half(&self) -> usize {
        self.uids.len() / 2
    }
}

/// Draw `samp_num` positive and `samp_num` negative items per user.
///
/// Positives are drawn with replacement from the user's label row, negatives
/// via [`negative_sample`]. A user without any positive (or without any
/// negative) gets `samp_num` random items used on both sides; those pairs
/// carry no ranking gradient.
pub fn sample_train_batch<R: Rng + ?Sized>(
    batch_users: &[usize],
    label: &SparseMatrix,
    samp_num: usize,
    rng: &mut R,
) -> Result<TrainBatch> {
    let item_count = label.ncols();
    if item_count == 0 {
        return Err(Error::Sampling("sampled graph has no items".into()));
    }

    let total = batch_users.len() * samp_num;
    let mut pos_u = Vec::with_capacity(total);
    let mut pos_i = Vec::with_capacity(total);
    let mut neg_i = Vec::with_capacity(total);
    let mut degenerate_users = Vec::new();

    for &u in batch_users {
        if u >= label.nrows() {
            return Err(Error::IndexOutOfBounds {
                index: u,
                bound: label.nrows(),
                context: "batch users",
            });
        }
        let positives = label.row_indices(u);
        if positives.is_empty() || positives.len() >= item_count {
            tracing::warn!(user = u, positives = positives.len(), "no ranking pair available, padding");
            degenerate_users.push(u);
            for _ in 0..samp_num {
                let item = rng.gen_range(0..item_count);
                pos_u.push(u);
                pos_i.push(item);
                neg_i.push(item);
            }
            continue;
        }

        for _ in 0..samp_num {
            pos_u.push(u);
            // Non-empty checked above.
            pos_i.push(positives[rng.gen_range(0..positives.len())]);
        }
        neg_i.extend(negative_sample(positives, samp_num, item_count, rng)?);
    }

    let mut uids = pos_u.clone();
    uids.extend_from_slice(&pos_u);
    let mut iids = pos_i;
    iids.extend_from_slice(&neg_i);
    Ok(TrainBatch {
        uids,
        iids,
        degenerate_users,
    })
}

/// Scoring pairs for one evaluation step.
#[derive(Debug, Clone, Default)]
pub struct TestBatch {
    /// Flattened user id of every candidate.
    pub uids: Vec<usize>,
    /// Flattened candidate items, user by user.
    pub iids: Vec<usize>,
    /// Candidates per user; the held-out item is always last.
    pub candidates: Vec<Vec<usize>>,
    /// Held-out item per user.
    pub positives: Vec<usize>,
}

/// Build `negatives` unlabelled candidates plus the held-out item per user.
///
/// Negatives are drawn without replacement from items with label 0 other than
/// the held-out item; when fewer exist, all of them are used.
pub fn sample_test_batch<R: Rng + ?Sized>(
    batch_users: &[usize],
    label: &SparseMatrix,
    positives: &[usize],
    negatives: usize,
    rng: &mut R,
) -> Result<TestBatch> {
    if batch_users.len() != positives.len() {
        return Err(Error::DimensionMismatch {
            expected: batch_users.len(),
            got: positives.len(),
        });
    }

    let mut batch = TestBatch::default();
    for (&u, &pos) in batch_users.iter().zip(positives) {
        if u >= label.nrows() {
            return Err(Error::IndexOutOfBounds {
                index: u,
                bound: label.nrows(),
                context: "test users",
            });
        }
        if pos >= label.ncols() {
            return Err(Error::IndexOutOfBounds {
                index: pos,
                bound: label.ncols(),
                context: "held-out items",
            });
        }
        let labelled = label.row_indices(u);
        let pool: Vec<usize> = (0..label.ncols())
            .filter(|&i| i != pos && labelled.binary_search(&i).is_err())
            .collect();

        let mut cands: Vec<usize> = pool.choose_multiple(rng, negatives).copied().collect();
        cands.push(pos);

        batch.uids.extend(std::iter::repeat(u).take(cands.len()));
        batch.iids.extend_from_slice(&cands);
        batch.candidates.push(cands);
        batch.positives.push(pos);
    }
    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_xorshift::XorShiftRng;

    fn label() -> SparseMatrix {
        // u0 likes i0, i1; u1 likes nothing; u2 likes everything.
        SparseMatrix::from_pairs(3, 4, vec![(0, 0), (0, 1), (2, 0), (2, 1), (2, 2), (2, 3)])
            .unwrap()
    }

    #[test]
    fn test_id_remap() {
        let remap = IdRemap::new(&[10, 4, 7]);
        assert_eq!(remap.local(4), Some(1));
        assert_eq!(remap.local(5), None);
        assert_eq!(remap.map_all(&[7, 10]).unwrap(), vec![2, 0]);
        assert!(remap.map_all(&[3]).is_err());
        assert_eq!(remap.len(), 3);
    }

    #[test]
    fn test_train_batch_layout() {
        let mut rng = XorShiftRng::seed_from_u64(5);
        let batch = sample_train_batch(&[0], &label(), 6, &mut rng).unwrap();
        assert_eq!(batch.uids.len(), 12);
        assert_eq!(batch.half(), 6);
        for k in 0..6 {
            assert_eq!(batch.uids[k], batch.uids[k + 6]);
            assert!(batch.iids[k] < 2, "positive must come from the label row");
            assert!(batch.iids[k + 6] >= 2, "negative must be unlabelled");
        }
        assert!(batch.degenerate_users.is_empty());
    }

    #[test]
    fn test_train_batch_zero_positive_padding() {
        let mut rng = XorShiftRng::seed_from_u64(5);
        let batch = sample_train_batch(&[1, 2], &label(), 3, &mut rng).unwrap();
        assert_eq!(batch.degenerate_users, vec![1, 2]);
        let half = batch.half();
        for k in 0..half {
            assert_eq!(batch.iids[k], batch.iids[k + half]);
        }
    }

    #[test]
    fn test_test_batch_candidates() {
        let mut rng = XorShiftRng::seed_from_u64(5);
        let label = SparseMatrix::from_pairs(1, 6, vec![(0, 0)]).unwrap();
        let batch = sample_test_batch(&[0], &label, &[3], 99, &mut rng).unwrap();
        let cands = &batch.candidates[0];
        // Items 1, 2, 4, 5 are the only unlabelled non-positive items.
        assert_eq!(cands.len(), 5);
        assert_eq!(*cands.last().unwrap(), 3);
        assert!(!cands[..4].contains(&0));
        assert!(!cands[..4].contains(&3));
        assert_eq!(batch.uids, vec![0; 5]);
        assert_eq!(&batch.iids, cands);
    }

    #[test]
    fn test_test_batch_caps_negatives() {
        let mut rng = XorShiftRng::seed_from_u64(5);
        let label = SparseMatrix::zeros(2, 200);
        let batch = sample_test_batch(&[0, 1], &label, &[0, 1], 99, &mut rng).unwrap();
        assert_eq!(batch.candidates[0].len(), 100);
        assert_eq!(batch.iids.len(), 200);
        assert!(sample_test_batch(&[0], &label, &[], 99, &mut rng).is_err());
    }
}
