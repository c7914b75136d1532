//! # mbrec-core
//!
//! Data side of the multi-behavior recommender: interaction matrices,
//! dataset loading, subgraph and minibatch sampling, run configuration.
//!
//! ## Quick Start
//!
//! ```rust
//! use mbrec_core::{Dataset, GraphSampler, IdRemap};
//! use mbrec_core::batch::sample_train_batch;
//! use rand::SeedableRng;
//! use rand_xorshift::XorShiftRng;
//!
//! let data = Dataset::from_interactions(
//!     3, 3,
//!     vec![
//!         ("click".to_string(), vec![(0, 0), (0, 1), (1, 1), (2, 2)]),
//!         ("buy".to_string(), vec![(0, 1), (2, 2)]),
//!     ],
//!     &[(1, 2)],
//! ).unwrap();
//!
//! let mut rng = XorShiftRng::seed_from_u64(0);
//! let graph = GraphSampler::new(&data, 10, 2).sample(&[0, 1, 2], None, &mut rng).unwrap();
//! let label = graph.slice(data.trn_label()).unwrap();
//! let users = IdRemap::new(&graph.users).map_all(&[0]).unwrap();
//!
//! let batch = sample_train_batch(&users, &label, 4, &mut rng).unwrap();
//! assert_eq!(batch.uids.len(), 8);
//! ```
//!
//! ## Modules
//!
//! - [`config`]: run hyperparameters ([`RecConfig`])
//! - [`sparse`]: CSR matrices and COO export
//! - [`data`]: per-behavior interaction files
//! - [`sampling`]: negative sampling, budget-driven subgraph sampling
//! - [`batch`]: train/test batch builders, id remapping

pub mod batch;
pub mod config;
pub mod data;
pub mod error;
pub mod sampling;
pub mod sparse;

pub use batch::{IdRemap, TestBatch, TrainBatch};
pub use config::RecConfig;
pub use data::Dataset;
pub use error::{Error, Result};
pub use sampling::{negative_sample, GraphSampler, SampledGraph};
pub use sparse::{CooTriples, SparseMatrix};
