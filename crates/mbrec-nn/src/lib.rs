//! Multi-behavior graph recommender on candle.
//!
//! `mbrec-nn` turns the sampled subgraphs of `mbrec-core` into scores:
//! per-behavior message passing with a memory-conditioned transform,
//! attention fusion across behaviors, multi-layer propagation and a
//! cross-attention scorer over the layer grid. Training uses a pairwise
//! hinge loss with L2 regularization under Adam.
//!
//! # Modules
//!
//! - [`sparse`]: COO adjacency and sparse × dense product
//! - [`embed`]: Layer-0 input embeddings
//! - [`message`]: Memory-conditioned message transform
//! - [`aggregate`]: Self-attention + gate fusion across behaviors
//! - [`propagate`]: Layer stack with L2 normalisation
//! - [`scorer`]: Cross multi-head attention scorer (rectified, no softmax)
//! - [`model`]: Model assembly and feeding
//! - [`loss`]: Hinge loss, L2 term, learning-rate schedule, optimizer
//! - [`evaluation`]: HR@K / NDCG@K
//! - [`checkpoint`]: Parameters, progress and metrics history on disk
//! - [`training`]: Epoch driver
//!
//! # Example: Forward Pass
//!
//! ```rust,ignore
//! use mbrec_core::RecConfig;
//! use mbrec_nn::model::{GraphInputs, MultiBehaviorModel};
//! use candle_core::Device;
//!
//! let config = RecConfig::default().with_beh_num(dataset.beh_num());
//! let model = MultiBehaviorModel::new(&config, &Device::Cpu)?;
//! let inputs = GraphInputs::from_sampled(&graph, &embeddings)?;
//! let scores = model.forward(&inputs, &batch.uids, &batch.iids)?;  // (pairs,)
//! ```
//!
//! # Example: Training
//!
//! ```rust,ignore
//! use mbrec_nn::training::Trainer;
//!
//! let mut trainer = Trainer::new(&config, &dataset, embeddings)?;
//! let metrics = trainer.run()?;
//! println!("{}", metrics.summary());
//! ```

pub mod aggregate;
pub mod checkpoint;
pub mod embed;
pub mod error;
pub mod evaluation;
pub mod loss;
pub mod message;
pub mod model;
pub mod propagate;
pub mod scorer;
pub mod sparse;
pub mod training;

pub use checkpoint::{Checkpoint, CheckpointMeta, MetricsHistory};
pub use embed::EmbeddingStore;
pub use error::{Error, Result};
pub use evaluation::{RankingMetrics, UserRanking};
pub use model::{GraphInputs, MultiBehaviorModel};
pub use training::{Trainer, TrainMetrics};
