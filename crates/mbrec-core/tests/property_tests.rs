//! Property-based tests for interaction matrices and samplers.
//!
//! - Sparse matrix structure (transpose, slicing, row sums)
//! - Negative sampling range and exclusion
//! - Subgraph sampling output consistency

use mbrec_core::{negative_sample, Dataset, GraphSampler, SparseMatrix};
use proptest::prelude::*;
use rand::SeedableRng;
use rand_xorshift::XorShiftRng;

/// Random `(user, item)` pairs inside a `rows × cols` grid.
fn arb_pairs(rows: usize, cols: usize) -> impl Strategy<Value = Vec<(usize, usize)>> {
    prop::collection::vec((0..rows, 0..cols), 0..40)
}

mod sparse_props {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn transpose_is_involution(pairs in arb_pairs(8, 6)) {
            let m = SparseMatrix::from_pairs(8, 6, pairs).unwrap();
            prop_assert_eq!(m.transpose().transpose(), m.clone());
            prop_assert_eq!(m.transpose().nnz(), m.nnz());
        }

        #[test]
        fn transpose_swaps_entries(pairs in arb_pairs(5, 7)) {
            let m = SparseMatrix::from_pairs(5, 7, pairs.clone()).unwrap();
            let t = m.transpose();
            for (r, c) in pairs {
                prop_assert_eq!(t.get(c, r), 1.0);
            }
        }

        #[test]
        fn submatrix_matches_lookup(
            pairs in arb_pairs(6, 6),
            rows in prop::sample::subsequence((0..6).collect::<Vec<_>>(), 0..6),
            cols in prop::sample::subsequence((0..6).collect::<Vec<_>>(), 0..6),
        ) {
            let m = SparseMatrix::from_pairs(6, 6, pairs).unwrap();
            let sub = m.submatrix(&rows, &cols).unwrap();
            prop_assert_eq!(sub.shape(), (rows.len(), cols.len()));
            for (i, &r) in rows.iter().enumerate() {
                for (j, &c) in cols.iter().enumerate() {
                    prop_assert_eq!(sub.get(i, j), m.get(r, c));
                }
            }
        }

        #[test]
        fn row_sums_count_edges(pairs in arb_pairs(6, 4)) {
            let m = SparseMatrix::from_pairs(6, 4, pairs).unwrap();
            let all: Vec<usize> = (0..6).collect();
            let total: f64 = m.row_sums_over(&all).unwrap().iter().sum();
            prop_assert_eq!(total as usize, m.nnz());
        }
    }
}

mod sampling_props {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn negatives_in_range_and_unlabelled(
            item_count in 2usize..50,
            count in 0usize..30,
            seed in any::<u64>(),
        ) {
            let positives: Vec<usize> = (0..item_count).step_by(2).collect();
            let mut rng = XorShiftRng::seed_from_u64(seed);
            let negs = negative_sample(&positives, count, item_count, &mut rng).unwrap();
            prop_assert_eq!(negs.len(), count);
            for n in negs {
                prop_assert!(n < item_count);
                prop_assert!(n % 2 == 1);
            }
        }

        #[test]
        fn sampled_graph_is_consistent(
            pairs in arb_pairs(10, 8),
            seed in any::<u64>(),
            n in 0usize..5,
        ) {
            let data = Dataset::from_interactions(
                10,
                8,
                vec![("pv".to_string(), pairs.clone()), ("buy".to_string(), pairs)],
                &[],
            ).unwrap();
            let mut rng = XorShiftRng::seed_from_u64(seed);
            let graph = GraphSampler::new(&data, n, 2).sample(&[0, 3], None, &mut rng).unwrap();

            prop_assert!(graph.users.contains(&0) && graph.users.contains(&3));
            prop_assert!(graph.users.windows(2).all(|w| w[0] < w[1]));
            prop_assert!(graph.items.windows(2).all(|w| w[0] < w[1]));
            prop_assert_eq!(graph.adjs.len(), 2);
            for (adj, tp) in graph.adjs.iter().zip(&graph.tp_adjs) {
                prop_assert_eq!(adj.shape(), (graph.num_users(), graph.num_items()));
                prop_assert_eq!(&adj.transpose(), tp);
            }
        }
    }
}

#[test]
fn five_negatives_for_user_without_interactions() {
    let label = SparseMatrix::zeros(1, 10);
    let mut rng = XorShiftRng::seed_from_u64(0);
    let negs = negative_sample(label.row_indices(0), 5, 10, &mut rng).unwrap();
    assert_eq!(negs.len(), 5);
    assert!(negs.iter().all(|&i| i < 10));
}
