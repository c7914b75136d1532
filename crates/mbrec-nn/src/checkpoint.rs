//! Model checkpoints and metrics history.
//!
//! A named checkpoint lives under a root directory:
//!
//! ```text
//! <root>/
//!   Models/<name>.safetensors   every model parameter
//!   Models/<name>.meta.json     epochs completed, optimizer step
//!   History/<name>.his          metrics history (JSON)
//! ```
//!
//! Restoring requires all three files; a missing file or a parameter that is
//! absent or mis-shaped in the safetensors file is an error.

use crate::error::{Error, Result};
use candle_nn::VarMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const TRAIN_LOSS: &str = "TrainLoss";
pub const TRAIN_PRE_LOSS: &str = "TrainPreLoss";
pub const TRAIN_HR: &str = "TrainHR";
pub const TRAIN_NDCG: &str = "TrainNDCG";
pub const TEST_LOSS: &str = "TestLoss";
pub const TEST_PRE_LOSS: &str = "TestPreLoss";
pub const TEST_HR: &str = "TestHR";
pub const TEST_NDCG: &str = "TestNDCG";

/// Append-only `metric name → values` map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricsHistory {
    series: BTreeMap<String, Vec<f64>>,
}

impl MetricsHistory {
    /// History with every standard series present and empty.
    pub fn new() -> Self {
        let series = [
            TRAIN_LOSS,
            TRAIN_PRE_LOSS,
            TRAIN_HR,
            TRAIN_NDCG,
            TEST_LOSS,
            TEST_PRE_LOSS,
            TEST_HR,
            TEST_NDCG,
        ]
        .into_iter()
        .map(|k| (k.to_string(), Vec::new()))
        .collect();
        Self { series }
    }

    pub fn push(&mut self, name: &str, value: f64) {
        self.series.entry(name.to_string()).or_default().push(value);
    }

    /// Values recorded for `name`; empty when never recorded.
    pub fn get(&self, name: &str) -> &[f64] {
        self.series.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn last(&self, name: &str) -> Option<f64> {
        self.get(name).last().copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Training progress stored next to the parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub epochs_completed: usize,
    pub global_step: usize,
}

/// State restored from a checkpoint (parameters are loaded in place).
#[derive(Debug, Clone, PartialEq)]
pub struct Restored {
    pub meta: CheckpointMeta,
    pub history: MetricsHistory,
}

/// Paths of one named checkpoint.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    root: PathBuf,
    name: String,
}

impl Checkpoint {
    pub fn new(root: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model_path(&self) -> PathBuf {
        self.root.join("Models").join(format!("{}.safetensors", self.name))
    }

    pub fn meta_path(&self) -> PathBuf {
        self.root.join("Models").join(format!("{}.meta.json", self.name))
    }

    pub fn history_path(&self) -> PathBuf {
        self.root.join("History").join(format!("{}.his", self.name))
    }

    pub fn exists(&self) -> bool {
        self.model_path().is_file() && self.meta_path().is_file() && self.history_path().is_file()
    }

    /// Write parameters, progress and history.
    pub fn save(&self, varmap: &VarMap, meta: &CheckpointMeta, history: &MetricsHistory) -> Result<()> {
        std::fs::create_dir_all(self.root.join("Models"))?;
        std::fs::create_dir_all(self.root.join("History"))?;
        varmap.save(self.model_path())?;
        std::fs::write(self.meta_path(), serde_json::to_vec_pretty(meta)?)?;
        history.save(self.history_path())?;
        tracing::info!(
            name = %self.name,
            epochs = meta.epochs_completed,
            step = meta.global_step,
            "checkpoint saved"
        );
        Ok(())
    }

    /// Load parameters into `varmap` and return progress and history.
    pub fn load(&self, varmap: &mut VarMap) -> Result<Restored> {
        for path in [self.model_path(), self.meta_path(), self.history_path()] {
            if !path.is_file() {
                return Err(Error::Checkpoint(format!(
                    "checkpoint `{}` is missing {}",
                    self.name,
                    path.display()
                )));
            }
        }
        varmap.load(self.model_path()).map_err(|e| {
            Error::Checkpoint(format!("cannot restore parameters of `{}`: {e}", self.name))
        })?;
        let meta: CheckpointMeta = serde_json::from_slice(&std::fs::read(self.meta_path())?)
            .map_err(|e| Error::Checkpoint(format!("corrupt metadata of `{}`: {e}", self.name)))?;
        let history = MetricsHistory::load(self.history_path())
            .map_err(|e| Error::Checkpoint(format!("corrupt history of `{}`: {e}", self.name)))?;
        tracing::info!(
            name = %self.name,
            epochs = meta.epochs_completed,
            step = meta.global_step,
            "checkpoint restored"
        );
        Ok(Restored { meta, history })
    }
}
