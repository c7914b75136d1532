//! Negative sampling and budget-driven subgraph sampling.
//!
//! # Key Types
//!
//! - [`negative_sample`] - Items a user has not interacted with
//! - [`GraphSampler`] - Bounded user/item subgraph around a seed set
//! - [`SampledGraph`] - Per-behavior sub-adjacencies over the picked ids
//!
//! # Subgraph sampling
//!
//! Full interaction graphs are too large to propagate over in one step, so
//! every epoch phase works on a subgraph grown from its seed users. Each
//! candidate node carries a *budget*: the number of interactions it has with
//! nodes already picked. Nodes are drawn without replacement with
//! probability proportional to `budget²`, so densely connected neighbors are
//! preferred and unrelated nodes are never drawn while related ones remain.
//!
//! ```text
//! seed users ──budget──> items (len(seeds) of them, unless given)
//!   round 0..=depth:
//!     users += sample(user budget, n + residual)
//!     items += sample(item budget, n + residual)
//!     budgets += rows of the newly picked nodes
//! ```
//!
//! The last round only spends the residual of earlier rounds (requests that
//! could not be filled because too few candidates had a budget).
//!
//! All randomness comes from an explicitly passed RNG.

use crate::data::Dataset;
use crate::error::{Error, Result};
use crate::sparse::SparseMatrix;
use rand::prelude::*;

/// Draw `count` item ids (with replacement) that are not in `positives`.
///
/// `positives` is the user's label row as sorted column ids, e.g.
/// [`SparseMatrix::row_indices`]. Fails instead of looping forever when every
/// item is positive.
pub fn negative_sample<R: Rng + ?Sized>(
    positives: &[usize],
    count: usize,
    item_count: usize,
    rng: &mut R,
) -> Result<Vec<usize>> {
    if count == 0 {
        return Ok(Vec::new());
    }
    let in_range = positives.iter().filter(|&&i| i < item_count).count();
    if in_range >= item_count {
        return Err(Error::Sampling(format!(
            "no negative item available: {in_range} of {item_count} items are positive"
        )));
    }

    let mut negatives = Vec::with_capacity(count);
    while negatives.len() < count {
        let candidate = rng.gen_range(0..item_count);
        if positives.binary_search(&candidate).is_err() {
            negatives.push(candidate);
        }
    }
    Ok(negatives)
}

/// Draw up to `n` available nodes weighted by squared budget.
///
/// Returns the picked nodes and the residual request that could not be
/// filled.
fn sample_nodes<R: Rng + ?Sized>(
    budget: &[f64],
    available: &[bool],
    n: usize,
    rng: &mut R,
) -> Result<(Vec<usize>, usize)> {
    if n == 0 {
        return Ok((Vec::new(), 0));
    }
    let scored: Vec<(usize, f64)> = budget
        .iter()
        .zip(available)
        .enumerate()
        .filter(|&(_, (b, free))| *free && *b != 0.0)
        .map(|(i, (b, _))| (i, b * b))
        .collect();

    if scored.is_empty() {
        // No budget anywhere: fall back to one uniformly drawn free node.
        let free: Vec<usize> = (0..available.len()).filter(|&i| available[i]).collect();
        let picked: Vec<usize> = free.choose(rng).copied().into_iter().collect();
        let residual = n - picked.len();
        return Ok((picked, residual));
    }
    if scored.len() < n {
        let residual = n - scored.len();
        return Ok((scored.into_iter().map(|(i, _)| i).collect(), residual));
    }

    let picked = scored
        .choose_multiple_weighted(rng, n, |&(_, w)| w)
        .map_err(|e| Error::Sampling(e.to_string()))?
        .map(|&(i, _)| i)
        .collect();
    Ok((picked, 0))
}

fn mark_taken(available: &mut [bool], nodes: &[usize]) {
    for &n in nodes {
        available[n] = false;
    }
}

fn accumulate(budget: &mut [f64], delta: &[f64]) {
    for (b, d) in budget.iter_mut().zip(delta) {
        *b += d;
    }
}

/// A minibatch subgraph: per-behavior adjacencies over the picked ids.
///
/// Row `r` of every `adjs[b]` is user `users[r]`; column `c` is item
/// `items[c]`. `tp_adjs[b]` is the transpose. All behaviors and both
/// directions share this index space.
#[derive(Debug, Clone)]
pub struct SampledGraph {
    /// `users × items` per behavior.
    pub adjs: Vec<SparseMatrix>,
    /// `items × users` per behavior.
    pub tp_adjs: Vec<SparseMatrix>,
    /// Picked global user ids, ascending.
    pub users: Vec<usize>,
    /// Picked global item ids, ascending.
    pub items: Vec<usize>,
}

impl SampledGraph {
    /// Restrict a global `users × items` matrix to this subgraph.
    pub fn slice(&self, matrix: &SparseMatrix) -> Result<SparseMatrix> {
        matrix.submatrix(&self.users, &self.items)
    }

    pub fn num_users(&self) -> usize {
        self.users.len()
    }

    pub fn num_items(&self) -> usize {
        self.items.len()
    }
}

/// Budget-driven subgraph sampler over a [`Dataset`].
///
/// # Example
///
/// ```rust
/// use mbrec_core::data::Dataset;
/// use mbrec_core::sampling::GraphSampler;
/// use rand::SeedableRng;
/// use rand_xorshift::XorShiftRng;
///
/// let data = Dataset::from_interactions(
///     3, 3,
///     vec![("buy".to_string(), vec![(0, 0), (1, 1), (2, 2), (0, 1)])],
///     &[],
/// ).unwrap();
///
/// let sampler = GraphSampler::new(&data, 2, 1);
/// let mut rng = XorShiftRng::seed_from_u64(42);
/// let graph = sampler.sample(&[0], None, &mut rng).unwrap();
///
/// assert!(graph.users.contains(&0));
/// assert_eq!(graph.adjs[0].shape(), (graph.users.len(), graph.items.len()));
/// ```
pub struct GraphSampler<'a> {
    dataset: &'a Dataset,
    sample_n: usize,
    depth: usize,
}

impl<'a> GraphSampler<'a> {
    /// # Arguments
    /// * `dataset` - Source interactions
    /// * `sample_n` - Users and items added per hop
    /// * `depth` - Number of expansion hops
    pub fn new(dataset: &'a Dataset, sample_n: usize, depth: usize) -> Self {
        Self {
            dataset,
            sample_n,
            depth,
        }
    }

    /// Grow a subgraph around `users` (and `items`, when given).
    ///
    /// Seed users and items are always part of the result. Seed ids must be
    /// unique and in range.
    pub fn sample<R: Rng + ?Sized>(
        &self,
        users: &[usize],
        items: Option<&[usize]>,
        rng: &mut R,
    ) -> Result<SampledGraph> {
        let adj = self.dataset.adj();
        let tp_adj = self.dataset.tp_adj();
        let (user_count, item_count) = adj.shape();

        let mut user_free = vec![true; user_count];
        for &u in users {
            if u >= user_count {
                return Err(Error::IndexOutOfBounds {
                    index: u,
                    bound: user_count,
                    context: "seed users",
                });
            }
            user_free[u] = false;
        }
        let mut item_free = vec![true; item_count];

        let mut item_budget = adj.row_sums_over(users)?;
        let seed_items = match items {
            Some(items) => {
                for &i in items {
                    if i >= item_count {
                        return Err(Error::IndexOutOfBounds {
                            index: i,
                            bound: item_count,
                            context: "seed items",
                        });
                    }
                }
                items.to_vec()
            }
            None => sample_nodes(&item_budget, &item_free, users.len(), rng)?.0,
        };
        mark_taken(&mut item_free, &seed_items);
        let mut user_budget = tp_adj.row_sums_over(&seed_items)?;

        let mut user_residual = 0;
        let mut item_residual = 0;
        for hop in 0..=self.depth {
            let extra = if hop < self.depth { self.sample_n } else { 0 };

            let (new_users, residual) =
                sample_nodes(&user_budget, &user_free, user_residual + extra, rng)?;
            user_residual = residual;
            mark_taken(&mut user_free, &new_users);

            let (new_items, residual) =
                sample_nodes(&item_budget, &item_free, item_residual + extra, rng)?;
            item_residual = residual;
            mark_taken(&mut item_free, &new_items);

            if hop == self.depth {
                break;
            }
            accumulate(&mut user_budget, &tp_adj.row_sums_over(&new_items)?);
            accumulate(&mut item_budget, &adj.row_sums_over(&new_users)?);
        }

        let users: Vec<usize> = (0..user_count).filter(|&u| !user_free[u]).collect();
        let items: Vec<usize> = (0..item_count).filter(|&i| !item_free[i]).collect();

        let mut adjs = Vec::with_capacity(self.dataset.beh_num());
        let mut tp_adjs = Vec::with_capacity(self.dataset.beh_num());
        for mat in self.dataset.trn_mats() {
            let sub = mat.submatrix(&users, &items)?;
            tp_adjs.push(sub.transpose());
            adjs.push(sub);
        }

        tracing::debug!(
            users = users.len(),
            items = items.len(),
            "sampled subgraph"
        );
        Ok(SampledGraph {
            adjs,
            tp_adjs,
            users,
            items,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_xorshift::XorShiftRng;

    fn chain() -> Dataset {
        // u0-i0, u0-i1, u1-i1, u1-i2, u2-i2, u3-i3 (u3/i3 disconnected from the rest)
        Dataset::from_interactions(
            4,
            4,
            vec![
                ("pv".into(), vec![(0, 0), (0, 1), (1, 1), (1, 2), (2, 2), (3, 3)]),
                ("buy".into(), vec![(0, 1), (1, 2)]),
            ],
            &[],
        )
        .unwrap()
    }

    #[test]
    fn test_negative_sample_empty_row() {
        let mut rng = XorShiftRng::seed_from_u64(7);
        let negs = negative_sample(&[], 5, 10, &mut rng).unwrap();
        assert_eq!(negs.len(), 5);
        assert!(negs.iter().all(|&i| i < 10));
    }

    #[test]
    fn test_negative_sample_avoids_positives() {
        let mut rng = XorShiftRng::seed_from_u64(7);
        let positives = [0, 1, 2, 4];
        let negs = negative_sample(&positives, 50, 5, &mut rng).unwrap();
        assert!(negs.iter().all(|&i| i == 3));
    }

    #[test]
    fn test_negative_sample_impossible() {
        let mut rng = XorShiftRng::seed_from_u64(7);
        assert!(negative_sample(&[0, 1], 1, 2, &mut rng).is_err());
        assert!(negative_sample(&[], 1, 0, &mut rng).is_err());
    }

    #[test]
    fn test_sample_nodes_prefers_budget() {
        let mut rng = XorShiftRng::seed_from_u64(1);
        let budget = [0.0, 3.0, 0.0, 1.0];
        let free = [true, true, true, true];
        let (picked, residual) = sample_nodes(&budget, &free, 2, &mut rng).unwrap();
        let mut picked = picked;
        picked.sort_unstable();
        assert_eq!(picked, vec![1, 3]);
        assert_eq!(residual, 0);

        let (picked, residual) = sample_nodes(&budget, &free, 5, &mut rng).unwrap();
        assert_eq!(picked.len(), 2);
        assert_eq!(residual, 3);
    }

    #[test]
    fn test_sample_nodes_zero_budget_fallback() {
        let mut rng = XorShiftRng::seed_from_u64(1);
        let (picked, residual) =
            sample_nodes(&[0.0, 0.0], &[false, true], 3, &mut rng).unwrap();
        assert_eq!(picked, vec![1]);
        assert_eq!(residual, 2);
        let (picked, _) = sample_nodes(&[0.0], &[true], 0, &mut rng).unwrap();
        assert!(picked.is_empty());
    }

    #[test]
    fn test_graph_sampler_keeps_seeds() {
        let data = chain();
        let sampler = GraphSampler::new(&data, 10, 2);
        let mut rng = XorShiftRng::seed_from_u64(3);
        let graph = sampler.sample(&[0], Some(&[3][..]), &mut rng).unwrap();
        assert!(graph.users.contains(&0));
        assert!(graph.items.contains(&3));
        assert!(graph.users.windows(2).all(|w| w[0] < w[1]));
        for (adj, tp) in graph.adjs.iter().zip(&graph.tp_adjs) {
            assert_eq!(adj.shape(), (graph.num_users(), graph.num_items()));
            assert_eq!(&adj.transpose(), tp);
        }
    }

    #[test]
    fn test_graph_sampler_follows_edges() {
        let data = chain();
        let sampler = GraphSampler::new(&data, 10, 2);
        let mut rng = XorShiftRng::seed_from_u64(3);
        let graph = sampler.sample(&[0], None, &mut rng).unwrap();
        // Everything reachable from u0 within the hop budget is picked.
        assert!(graph.items.contains(&0) && graph.items.contains(&1));
        assert!(graph.users.contains(&1));
        // Sub-adjacency keeps the source edges.
        let u0 = graph.users.iter().position(|&u| u == 0).unwrap();
        let i1 = graph.items.iter().position(|&i| i == 1).unwrap();
        assert_eq!(graph.adjs[1].get(u0, i1), 1.0);
    }

    #[test]
    fn test_graph_sampler_rejects_bad_seed() {
        let data = chain();
        let sampler = GraphSampler::new(&data, 1, 1);
        let mut rng = XorShiftRng::seed_from_u64(3);
        assert!(sampler.sample(&[9], None, &mut rng).is_err());
        assert!(sampler.sample(&[0], Some(&[9][..]), &mut rng).is_err());
    }
}
