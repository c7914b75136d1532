//! Pairwise hinge loss, L2 regularization and the optimizer step.
//!
//! Scores come in two halves: `scores[k]` is a positive pair and
//! `scores[k + half]` the negative drawn for the same user.
//!
//! ```text
//! pre_loss = Σ_k max(0, 1 - (pos_k - neg_k)) / batch
//! reg_loss = reg · Σ_{w ∈ params} Σ w²
//! loss     = pre_loss + reg_loss
//! lr(step) = lr · decay^⌊step / decay_step⌋
//! ```

use crate::error::{Error, Result};
use candle_core::{bail, DType, Device, Tensor};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarMap};
use mbrec_core::RecConfig;

/// Hinge loss over `[positives | negatives]` scores, divided by `batch`.
pub fn pairwise_hinge_loss(scores: &Tensor, batch: usize) -> candle_core::Result<Tensor> {
    let n = scores.dim(0)?;
    if n % 2 != 0 {
        bail!("pairwise loss needs an even number of scores, got {n}");
    }
    if batch == 0 {
        bail!("pairwise loss batch size must be positive");
    }
    let half = n / 2;
    let pos = scores.narrow(0, 0, half)?;
    let neg = scores.narrow(0, half, half)?;
    (pos - neg)?
        .affine(-1.0, 1.0)?
        .relu()?
        .sum_all()?
        .affine(1.0 / batch as f64, 0.0)
}

/// `reg · Σ w²` over every variable registered in `varmap`.
pub fn l2_regularization(varmap: &VarMap, reg: f64, device: &Device) -> candle_core::Result<Tensor> {
    let mut total = Tensor::zeros((), DType::F32, device)?;
    for var in varmap.all_vars() {
        total = (total + var.as_tensor().sqr()?.sum_all()?)?;
    }
    total.affine(reg, 0.0)
}

/// Staircase exponential decay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LearningRateSchedule {
    pub base: f64,
    pub decay: f64,
    pub decay_step: usize,
}

impl LearningRateSchedule {
    pub fn from_config(config: &RecConfig) -> Self {
        Self {
            base: config.lr,
            decay: config.decay,
            decay_step: config.decay_step,
        }
    }

    /// Learning rate used by optimizer step `step` (0-based).
    pub fn rate(&self, step: usize) -> f64 {
        let stairs = step / self.decay_step.max(1);
        self.base * self.decay.powf(stairs as f64)
    }
}

/// Scalars reported by one optimizer step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutput {
    pub loss: f64,
    pub pre_loss: f64,
    pub reg_loss: f64,
    pub learning_rate: f64,
}

/// Adam over every model parameter, driven by the hinge + L2 objective.
pub struct RankingOptimizer {
    optimizer: AdamW,
    varmap: VarMap,
    schedule: LearningRateSchedule,
    reg: f64,
    batch: usize,
    global_step: usize,
}

impl RankingOptimizer {
    pub fn new(varmap: &VarMap, config: &RecConfig) -> Result<Self> {
        let schedule = LearningRateSchedule::from_config(config);
        let params = ParamsAdamW {
            lr: schedule.rate(0),
            weight_decay: 0.0,
            ..Default::default()
        };
        let optimizer = AdamW::new(varmap.all_vars(), params)?;
        Ok(Self {
            optimizer,
            varmap: varmap.clone(),
            schedule,
            reg: config.reg,
            batch: config.batch,
            global_step: 0,
        })
    }

    pub fn global_step(&self) -> usize {
        self.global_step
    }

    /// Resume the decay schedule from a restored step count.
    pub fn set_global_step(&mut self, step: usize) {
        self.global_step = step;
    }

    pub fn schedule(&self) -> &LearningRateSchedule {
        &self.schedule
    }

    /// Evaluate the objective on `scores` without updating anything.
    pub fn objective(&self, scores: &Tensor) -> Result<(Tensor, Tensor, Tensor)> {
        let pre_loss = pairwise_hinge_loss(scores, self.batch)?;
        let reg_loss = l2_regularization(&self.varmap, self.reg, scores.device())?;
        let loss = (&pre_loss + &reg_loss)?;
        Ok((loss, pre_loss, reg_loss))
    }

    /// One Adam update from `scores`. A non-finite loss is rejected before
    /// any parameter is touched.
    pub fn step(&mut self, scores: &Tensor) -> Result<StepOutput> {
        let learning_rate = self.schedule.rate(self.global_step);
        self.optimizer.set_learning_rate(learning_rate);

        let (loss, pre_loss, reg_loss) = self.objective(scores)?;
        let loss_value = scalar(&loss)?;
        if !loss_value.is_finite() {
            return Err(Error::Training(format!(
                "non-finite loss {loss_value} at step {}",
                self.global_step
            )));
        }
        self.optimizer.backward_step(&loss)?;
        self.global_step += 1;

        Ok(StepOutput {
            loss: loss_value,
            pre_loss: scalar(&pre_loss)?,
            reg_loss: scalar(&reg_loss)?,
            learning_rate,
        })
    }
}

fn scalar(t: &Tensor) -> Result<f64> {
    Ok(t.to_dtype(DType::F64)?.to_scalar::<f64>()?)
}
