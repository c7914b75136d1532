//! Run configuration.
//!
//! [`RecConfig`] holds every hyperparameter of a run. It is built once
//! (defaults, then an optional JSON file, then command-line overrides),
//! validated, and passed by reference to each component constructor.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Hyperparameters and persistence settings for one training/evaluation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecConfig {
    /// Latent dimension of every embedding (default: 16).
    pub latdim: usize,
    /// Number of propagation layers `L` (default: 2).
    pub gnn_layer: usize,
    /// Number of behavior types. Overwritten from the dataset.
    pub beh_num: usize,
    /// Attention heads for both attention blocks (default: 2).
    pub att_head: usize,
    /// Width of the memory attention vector (default: 2).
    pub memosize: usize,
    /// Positive/negative samples drawn per user per step (default: 40).
    pub samp_num: usize,
    /// Users per step (default: 32).
    pub batch: usize,
    /// L2 regularization weight (default: 0.01).
    pub reg: f64,
    /// Initial learning rate (default: 0.001).
    pub lr: f64,
    /// Learning-rate decay factor (default: 0.96).
    pub decay: f64,
    /// Optimizer steps between two decays (default: 1000).
    pub decay_step: usize,
    /// Number of epochs (default: 120).
    pub epoch: usize,
    /// Evaluate and checkpoint every `test_epoch` epochs (default: 3).
    pub test_epoch: usize,
    /// Top-K cutoff for hit rate and NDCG (default: 10).
    pub shoot: usize,
    /// Fixed multiplier applied to the cross-attention output (default: 100).
    pub mult: f64,
    /// Users kept per training epoch (default: 10000).
    pub trn_num: usize,
    /// Nodes added per side and per hop by the graph sampler (default: 10000).
    pub graph_sample_n: usize,
    /// Hops explored by the graph sampler (default: 2).
    pub samp_depth: usize,
    /// Seed for every random draw of the run (default: 42).
    pub seed: u64,
    /// Checkpoint name written at test epochs (default: "tem").
    pub save_path: String,
    /// Checkpoint name to resume from.
    pub load_model: Option<String>,
    /// Directory holding `Models/` and `History/` (default: ".").
    pub checkpoint_dir: PathBuf,
}

impl Default for RecConfig {
    fn default() -> Self {
        Self {
            latdim: 16,
            gnn_layer: 2,
            beh_num: 4,
            att_head: 2,
            memosize: 2,
            samp_num: 40,
            batch: 32,
            reg: 1e-2,
            lr: 1e-3,
            decay: 0.96,
            decay_step: 1000,
            epoch: 120,
            test_epoch: 3,
            shoot: 10,
            mult: 100.0,
            trn_num: 10_000,
            graph_sample_n: 10_000,
            samp_depth: 2,
            seed: 42,
            save_path: "tem".to_string(),
            load_model: None,
            checkpoint_dir: PathBuf::from("."),
        }
    }
}

impl RecConfig {
    /// Load a (possibly partial) configuration from a JSON file.
    ///
    /// Missing fields take their default value.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn with_latdim(mut self, latdim: usize) -> Self {
        self.latdim = latdim;
        self
    }

    pub fn with_gnn_layer(mut self, layers: usize) -> Self {
        self.gnn_layer = layers;
        self
    }

    pub fn with_beh_num(mut self, beh_num: usize) -> Self {
        self.beh_num = beh_num;
        self
    }

    pub fn with_att_head(mut self, heads: usize) -> Self {
        self.att_head = heads;
        self
    }

    pub fn with_memosize(mut self, memosize: usize) -> Self {
        self.memosize = memosize;
        self
    }

    pub fn with_samp_num(mut self, samp_num: usize) -> Self {
        self.samp_num = samp_num;
        self
    }

    pub fn with_batch(mut self, batch: usize) -> Self {
        self.batch = batch;
        self
    }

    pub fn with_epoch(mut self, epoch: usize) -> Self {
        self.epoch = epoch;
        self
    }

    pub fn with_test_epoch(mut self, test_epoch: usize) -> Self {
        self.test_epoch = test_epoch;
        self
    }

    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.lr = lr;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_graph_sample_n(mut self, n: usize) -> Self {
        self.graph_sample_n = n;
        self
    }

    pub fn with_checkpoint_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.checkpoint_dir = dir.into();
        self
    }

    pub fn with_save_path(mut self, name: impl Into<String>) -> Self {
        self.save_path = name.into();
        self
    }

    pub fn with_load_model(mut self, name: Option<String>) -> Self {
        self.load_model = name;
        self
    }

    /// Head width of the attention blocks.
    pub fn head_dim(&self) -> usize {
        self.latdim / self.att_head.max(1)
    }

    /// Check every structural constraint the model relies on.
    pub fn validate(&self) -> Result<()> {
        if self.latdim < 2 {
            return Err(Error::InvalidConfig(format!(
                "latdim must be at least 2, got {}",
                self.latdim
            )));
        }
        if self.att_head == 0 || self.latdim % self.att_head != 0 {
            return Err(Error::InvalidConfig(format!(
                "latdim ({}) must be divisible by att_head ({})",
                self.latdim, self.att_head
            )));
        }
        if self.beh_num == 0 {
            return Err(Error::InvalidConfig("beh_num must be positive".into()));
        }
        if self.memosize == 0 {
            return Err(Error::InvalidConfig("memosize must be positive".into()));
        }
        if self.batch == 0 || self.samp_num == 0 {
            return Err(Error::InvalidConfig(
                "batch and samp_num must be positive".into(),
            ));
        }
        if self.test_epoch == 0 || self.decay_step == 0 || self.shoot == 0 {
            return Err(Error::InvalidConfig(
                "test_epoch, decay_step and shoot must be positive".into(),
            ));
        }
        if !(self.lr > 0.0) {
            return Err(Error::InvalidConfig(format!("lr must be > 0, got {}", self.lr)));
        }
        if !(self.decay > 0.0 && self.decay <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "decay must be in (0, 1], got {}",
                self.decay
            )));
        }
        if !(self.reg >= 0.0) {
            return Err(Error::InvalidConfig(format!("reg must be >= 0, got {}", self.reg)));
        }
        Ok(())
    }
}
