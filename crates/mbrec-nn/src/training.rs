//! Epoch driver: sampling, optimizer steps, evaluation and checkpoints.
//!
//! # Run
//!
//! ```text
//! restore (if load_model) ─┐
//!                          v
//! for epoch in epochs_completed..epoch:
//!     train epoch           shuffle users, keep trn_num, sample graph, step per batch
//!     if epoch % test_epoch == 0:
//!         test epoch        HR@K, NDCG@K on held-out items
//!         append metrics, save checkpoint
//! final test epoch, append, save
//! ```
//!
//! Each epoch phase samples one subgraph and reuses it for all of its steps.
//! During training the subgraph is re-propagated at every step since the
//! parameters change; a test epoch propagates once.
//!
//! A failing step aborts the run with [`Error::StepFailed`] after logging the
//! shapes it was working on. Nothing is retried.

use crate::checkpoint::{
    Checkpoint, CheckpointMeta, MetricsHistory, TEST_HR, TEST_NDCG, TRAIN_LOSS, TRAIN_PRE_LOSS,
};
use crate::embed::EmbeddingStore;
use crate::error::{Error, Result};
use crate::evaluation::{rank_candidates, RankingMetrics};
use crate::loss::{RankingOptimizer, StepOutput};
use crate::model::{GraphInputs, MultiBehaviorModel};
use mbrec_core::batch::{sample_test_batch, sample_train_batch, TrainBatch};
use mbrec_core::{Dataset, GraphSampler, IdRemap, RecConfig};
use rand::prelude::*;
use rand_xorshift::XorShiftRng;

/// Candidates sampled per test user besides the held-out item.
pub const TEST_NEGATIVES: usize = 99;

/// Which kind of epoch a step belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Train,
    Test,
}

/// Reported after every step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepProgress {
    pub phase: Phase,
    pub epoch: usize,
    /// 0-based step within the epoch.
    pub step: usize,
    pub steps: usize,
    /// Training loss of the step; `None` for test steps.
    pub loss: Option<f64>,
}

/// Callback for step progress.
pub type ProgressCallback = Box<dyn Fn(&StepProgress) + Send + Sync>;

/// Averages over the steps of one training epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrainMetrics {
    pub loss: f64,
    pub pre_loss: f64,
    pub steps: usize,
}

/// Owns the model, its optimizer and the run state.
pub struct Trainer<'a> {
    config: RecConfig,
    dataset: &'a Dataset,
    embeddings: EmbeddingStore,
    model: MultiBehaviorModel,
    optimizer: RankingOptimizer,
    history: MetricsHistory,
    epochs_completed: usize,
    rng: XorShiftRng,
    progress: Option<ProgressCallback>,
}

impl<'a> Trainer<'a> {
    /// Build the model for `dataset`.
    ///
    /// `beh_num` is taken from the dataset. `embeddings` must cover exactly the
    /// dataset's users and items with width `latdim`.
    pub fn new(config: &RecConfig, dataset: &'a Dataset, embeddings: EmbeddingStore) -> Result<Self> {
        let mut config = config.clone();
        config.beh_num = dataset.beh_num();

        let checks = [
            ("input user embeddings", dataset.user_count(), embeddings.user_count()),
            ("input item embeddings", dataset.item_count(), embeddings.item_count()),
            ("input embedding width", config.latdim, embeddings.latdim()),
        ];
        for (context, expected, got) in checks {
            if expected != got {
                return Err(Error::DimensionMismatch {
                    context,
                    expected,
                    got,
                });
            }
        }

        let model = MultiBehaviorModel::new(&config, embeddings.device())?;
        let optimizer = RankingOptimizer::new(model.varmap(), &config)?;
        let rng = XorShiftRng::seed_from_u64(config.seed);
        Ok(Self {
            config,
            dataset,
            embeddings,
            model,
            optimizer,
            history: MetricsHistory::new(),
            epochs_completed: 0,
            rng,
            progress: None,
        })
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn config(&self) -> &RecConfig {
        &self.config
    }

    pub fn model(&self) -> &MultiBehaviorModel {
        &self.model
    }

    pub fn history(&self) -> &MetricsHistory {
        &self.history
    }

    pub fn epochs_completed(&self) -> usize {
        self.epochs_completed
    }

    pub fn global_step(&self) -> usize {
        self.optimizer.global_step()
    }

    fn report(&self, progress: StepProgress) {
        if let Some(cb) = &self.progress {
            cb(&progress);
        }
    }

    /// Load parameters, history and progress of checkpoint `name`.
    pub fn restore(&mut self, name: &str) -> Result<()> {
        let checkpoint = Checkpoint::new(&self.config.checkpoint_dir, name);
        let restored = checkpoint.load(self.model.varmap_mut())?;
        self.history = restored.history;
        self.epochs_completed = restored.meta.epochs_completed;
        self.optimizer.set_global_step(restored.meta.global_step);
        Ok(())
    }

    /// Write the checkpoint named `save_path`. Skipped when `epoch == 0`.
    pub fn save(&self) -> Result<()> {
        if self.config.epoch == 0 {
            tracing::debug!("epoch count is 0, checkpoint not written");
            return Ok(());
        }
        let meta = CheckpointMeta {
            epochs_completed: self.epochs_completed,
            global_step: self.optimizer.global_step(),
        };
        Checkpoint::new(&self.config.checkpoint_dir, &self.config.save_path).save(
            self.model.varmap(),
            &meta,
            &self.history,
        )
    }

    fn restore_if_requested(&mut self) -> Result<()> {
        match self.config.load_model.clone() {
            Some(name) => self.restore(&name),
            None => {
                tracing::info!("variables initialised");
                Ok(())
            }
        }
    }

    /// Full run; returns the metrics of the final test epoch.
    pub fn run(&mut self) -> Result<RankingMetrics> {
        self.restore_if_requested()?;

        for epoch in self.epochs_completed..self.config.epoch {
            let test = epoch % self.config.test_epoch == 0;
            let train = self.train_epoch(epoch)?;
            self.epochs_completed = epoch + 1;
            tracing::info!(
                epoch,
                total = self.config.epoch,
                loss = train.loss,
                pre_loss = train.pre_loss,
                "train epoch"
            );

            if test {
                self.history.push(TRAIN_LOSS, train.loss);
                self.history.push(TRAIN_PRE_LOSS, train.pre_loss);
                let metrics = self.test_epoch(epoch)?;
                self.record_test(epoch, &metrics);
                self.save()?;
            }
        }

        let metrics = self.test_epoch(self.config.epoch)?;
        self.record_test(self.config.epoch, &metrics);
        self.save()?;
        Ok(metrics)
    }

    /// Restore (if requested) and run one test epoch, without training.
    pub fn evaluate(&mut self) -> Result<RankingMetrics> {
        self.restore_if_requested()?;
        self.test_epoch(self.epochs_completed)
    }

    fn record_test(&mut self, epoch: usize, metrics: &RankingMetrics) {
        self.history.push(TEST_HR, metrics.hr);
        self.history.push(TEST_NDCG, metrics.ndcg);
        tracing::info!(
            epoch,
            total = self.config.epoch,
            hr = metrics.hr,
            ndcg = metrics.ndcg,
            users = metrics.num_users,
            "test epoch"
        );
    }

    /// One pass over up to `trn_num` shuffled users.
    pub fn train_epoch(&mut self, epoch: usize) -> Result<TrainMetrics> {
        let mut users: Vec<usize> = (0..self.dataset.user_count()).collect();
        users.shuffle(&mut self.rng);
        users.truncate(self.config.trn_num);
        if users.is_empty() {
            tracing::warn!(epoch, "no users to train on");
            return Ok(TrainMetrics::default());
        }

        let sampler = GraphSampler::new(self.dataset, self.config.graph_sample_n, self.config.samp_depth);
        let graph = sampler.sample(&users, None, &mut self.rng)?;
        let label = graph.slice(self.dataset.trn_label())?;
        let local_users = IdRemap::new(&graph.users).map_all(&users)?;
        let inputs = GraphInputs::from_sampled(&graph, &self.embeddings)?;
        tracing::debug!(
            epoch,
            users = graph.num_users(),
            items = graph.num_items(),
            "training subgraph"
        );

        let steps = local_users.len().div_ceil(self.config.batch);
        let mut total = TrainMetrics {
            steps,
            ..TrainMetrics::default()
        };
        for (step, batch_users) in local_users.chunks(self.config.batch).enumerate() {
            let batch = sample_train_batch(batch_users, &label, self.config.samp_num, &mut self.rng)?;
            let out = self.train_step(&inputs, &batch)?;
            total.loss += out.loss;
            total.pre_loss += out.pre_loss;
            tracing::debug!(
                epoch,
                step,
                steps,
                loss = out.loss,
                reg_loss = out.reg_loss,
                lr = out.learning_rate,
                "train step"
            );
            self.report(StepProgress {
                phase: Phase::Train,
                epoch,
                step,
                steps,
                loss: Some(out.loss),
            });
        }
        total.loss /= steps as f64;
        total.pre_loss /= steps as f64;
        Ok(total)
    }

    fn train_step(&mut self, inputs: &GraphInputs, batch: &TrainBatch) -> Result<StepOutput> {
        let step = self.optimizer.global_step();
        let result = self
            .model
            .forward(inputs, &batch.uids, &batch.iids)
            .and_then(|scores| self.optimizer.step(&scores));
        result.map_err(|source| {
            tracing::error!(
                step,
                users = inputs.num_users(),
                items = inputs.num_items(),
                pairs = batch.uids.len(),
                error = %source,
                "training step failed"
            );
            Error::StepFailed {
                step,
                source: Box::new(source),
            }
        })
    }

    /// Rank every test user's held-out item against sampled negatives.
    pub fn test_epoch(&mut self, epoch: usize) -> Result<RankingMetrics> {
        let users = self.dataset.tst_users().to_vec();
        if users.is_empty() {
            tracing::warn!(epoch, "no test users");
            return Ok(RankingMetrics::default());
        }
        let positives: Vec<usize> = users
            .iter()
            .filter_map(|&u| self.dataset.tst_int()[u])
            .collect();
        let mut seed_items = positives.clone();
        seed_items.sort_unstable();
        seed_items.dedup();

        let sampler = GraphSampler::new(self.dataset, self.config.graph_sample_n, self.config.samp_depth);
        let graph = sampler.sample(&users, Some(seed_items.as_slice()), &mut self.rng)?;
        let label = graph.slice(self.dataset.trn_label())?;
        let local_users = IdRemap::new(&graph.users).map_all(&users)?;
        let local_positives = IdRemap::new(&graph.items).map_all(&positives)?;
        let inputs = GraphInputs::from_sampled(&graph, &self.embeddings)?;
        let stack = self.model.encode(&inputs)?;

        let steps = local_users.len().div_ceil(self.config.batch);
        let mut parts = Vec::with_capacity(steps);
        let chunks = local_users
            .chunks(self.config.batch)
            .zip(local_positives.chunks(self.config.batch));
        for (step, (batch_users, batch_positives)) in chunks.enumerate() {
            let batch = sample_test_batch(
                batch_users,
                &label,
                batch_positives,
                TEST_NEGATIVES,
                &mut self.rng,
            )?;
            let scores: Vec<f32> = self
                .model
                .score(&stack, &batch.uids, &batch.iids)?
                .to_vec1()?;
            ensure_finite(&scores, epoch)?;

            let mut rankings = Vec::with_capacity(batch.candidates.len());
            let mut offset = 0;
            for candidates in &batch.candidates {
                let user_scores = &scores[offset..offset + candidates.len()];
                rankings.push(rank_candidates(user_scores, candidates.len() - 1, self.config.shoot));
                offset += candidates.len();
            }
            let part = RankingMetrics::from_rankings(&rankings);
            tracing::debug!(epoch, step, steps, hr = part.hr, ndcg = part.ndcg, "test step");
            parts.push(part);
            self.report(StepProgress {
                phase: Phase::Test,
                epoch,
                step,
                steps,
                loss: None,
            });
        }
        Ok(RankingMetrics::merge(&parts))
    }
}

/// Reject scores from a diverged model before they are ranked.
fn ensure_finite(scores: &[f32], epoch: usize) -> Result<()> {
    match scores.iter().position(|s| !s.is_finite()) {
        Some(k) => Err(Error::Training(format!(
            "non-finite test score {} at candidate {k} in epoch {epoch}",
            scores[k]
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn toy_dataset() -> Dataset {
        Dataset::from_interactions(
            4,
            5,
            vec![
                ("pv".into(), vec![(0, 0), (0, 1), (1, 1), (1, 2), (2, 3), (3, 4), (3, 0)]),
                ("buy".into(), vec![(0, 1), (1, 2), (2, 3), (3, 4)]),
            ],
            &[(0, 2), (1, 3)],
        )
        .unwrap()
    }

    fn toy_config(dir: &std::path::Path) -> RecConfig {
        RecConfig::default()
            .with_latdim(4)
            .with_gnn_layer(1)
            .with_att_head(2)
            .with_batch(2)
            .with_samp_num(2)
            .with_epoch(2)
            .with_test_epoch(1)
            .with_graph_sample_n(10)
            .with_checkpoint_dir(dir)
    }

    fn store(data: &Dataset) -> EmbeddingStore {
        EmbeddingStore::random(data.user_count(), data.item_count(), 4, 7, &Device::Cpu).unwrap()
    }

    #[test]
    fn test_train_epoch_reports_steps() {
        let dir = tempfile::tempdir().unwrap();
        let data = toy_dataset();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let mut trainer = Trainer::new(&toy_config(dir.path()), &data, store(&data))
            .unwrap()
            .with_progress(Box::new(move |p| {
                assert_eq!(p.phase, Phase::Train);
                seen.fetch_add(1, Ordering::SeqCst);
            }));

        let metrics = trainer.train_epoch(0).unwrap();
        assert_eq!(metrics.steps, 2);
        assert!(metrics.loss.is_finite());
        assert!(metrics.pre_loss >= 0.0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(trainer.global_step(), 2);
    }

    #[test]
    fn test_test_epoch_metrics_in_range() {
        let dir = tempfile::tempdir().unwrap();
        let data = toy_dataset();
        let mut trainer = Trainer::new(&toy_config(dir.path()), &data, store(&data)).unwrap();
        let m = trainer.test_epoch(0).unwrap();
        assert_eq!(m.num_users, 2);
        assert!((0.0..=1.0).contains(&m.hr));
        assert!(m.ndcg <= m.hr + 1e-12);
    }

    #[test]
    fn test_non_finite_scores_rejected() {
        assert!(ensure_finite(&[0.5, -2.0, 100.0], 0).is_ok());
        let err = ensure_finite(&[0.5, f32::NAN], 3).unwrap_err();
        assert!(matches!(err, Error::Training(_)));
        assert!(ensure_finite(&[f32::INFINITY], 0).is_err());
    }

    #[test]
    fn test_embedding_size_checked() {
        let dir = tempfile::tempdir().unwrap();
        let data = toy_dataset();
        let wrong = EmbeddingStore::random(3, 5, 4, 0, &Device::Cpu).unwrap();
        assert!(Trainer::new(&toy_config(dir.path()), &data, wrong).is_err());
    }

    #[test]
    fn test_zero_epochs_skips_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let data = toy_dataset();
        let config = toy_config(dir.path()).with_epoch(0);
        let mut trainer = Trainer::new(&config, &data, store(&data)).unwrap();
        trainer.run().unwrap();
        assert!(!Checkpoint::new(dir.path(), "tem").exists());
        assert_eq!(trainer.history().get(TEST_HR).len(), 1);
    }
}
