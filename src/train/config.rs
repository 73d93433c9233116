//! Fit configuration

use crate::augment::AugmentOptions;
use crate::error::{Error, Result};
use crate::optim::Direction;
use crate::train::{LossKind, MetricKind};
use std::path::PathBuf;

/// Everything a fit run needs besides the data and the optimizer
#[derive(Clone, Debug)]
pub struct FitConfig {
    /// Samples per batch
    pub batch_size: usize,
    /// Total epochs to run
    pub num_epochs: usize,
    /// Evaluate and checkpoint every this many epochs
    pub save_steps: usize,
    /// Epochs without improvement before the adaptive mechanisms engage
    pub patience: usize,
    /// Weight of the auxiliary head loss
    pub lambda: f32,
    /// Loss applied to the predictions
    pub loss: LossKind,
    /// Metric reported on validation and test data
    pub metric: MetricKind,
    /// Whether an improving metric goes down or up; drives the plateau
    /// controller (best-model selection always minimizes validation loss)
    pub direction: Direction,
    /// Enable learning-rate reduction on plateau
    pub reduce_lr: bool,
    /// Subtract instead of multiply when reducing the rate
    pub reduce_lin: bool,
    /// Samples to drop from each full batch once forgetting engages
    pub forget: usize,
    /// Unfreeze the backbone once the patience window passes
    pub finetuning: bool,
    /// Track an exponential moving average of the weights for evaluation
    pub ema: bool,
    /// EMA decay per optimizer step
    pub ema_decay: f32,
    /// Split input channels into separate branches
    pub multibranch: bool,
    /// Global gradient-norm clip
    pub max_grad_norm: Option<f32>,
    /// Seed for shuffling, augmentation, and initialization draws
    pub seed: u64,
    /// Augmentation applied once the patience window passes
    pub augment: AugmentOptions,
    /// Where checkpoints and the history file go; nothing is written when unset
    pub model_dir: Option<PathBuf>,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            num_epochs: 100,
            save_steps: 10,
            patience: 30,
            lambda: 1.0,
            loss: LossKind::Mse,
            metric: MetricKind::Mse,
            direction: Direction::Minimize,
            reduce_lr: false,
            reduce_lin: false,
            forget: 0,
            finetuning: false,
            ema: false,
            ema_decay: 0.9,
            multibranch: false,
            max_grad_norm: None,
            seed: 42,
            augment: AugmentOptions::default(),
            model_dir: None,
        }
    }
}

impl FitConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_num_epochs(mut self, num_epochs: usize) -> Self {
        self.num_epochs = num_epochs;
        self
    }

    pub fn with_save_steps(mut self, save_steps: usize) -> Self {
        self.save_steps = save_steps;
        self
    }

    pub fn with_patience(mut self, patience: usize) -> Self {
        self.patience = patience;
        self
    }

    pub fn with_loss(mut self, loss: LossKind) -> Self {
        self.loss = loss;
        self
    }

    pub fn with_metric(mut self, metric: MetricKind) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_lambda(mut self, lambda: f32) -> Self {
        self.lambda = lambda;
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_reduce_lr(mut self, reduce_lr: bool) -> Self {
        self.reduce_lr = reduce_lr;
        self
    }

    pub fn with_forget(mut self, forget: usize) -> Self {
        self.forget = forget;
        self
    }

    pub fn with_finetuning(mut self, finetuning: bool) -> Self {
        self.finetuning = finetuning;
        self
    }

    pub fn with_ema(mut self, ema: bool) -> Self {
        self.ema = ema;
        self
    }

    pub fn with_multibranch(mut self, multibranch: bool) -> Self {
        self.multibranch = multibranch;
        self
    }

    pub fn with_max_grad_norm(mut self, max_norm: f32) -> Self {
        self.max_grad_norm = Some(max_norm);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_augment(mut self, augment: AugmentOptions) -> Self {
        self.augment = augment;
        self
    }

    pub fn with_model_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.model_dir = Some(dir.into());
        self
    }

    /// Reject configurations the loop cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be positive".into()));
        }
        if self.num_epochs == 0 {
            return Err(Error::Config("num_epochs must be positive".into()));
        }
        if self.save_steps == 0 {
            return Err(Error::Config("save_steps must be positive".into()));
        }
        if self.lambda < 0.0 || !self.lambda.is_finite() {
            return Err(Error::Config("lambda must be finite and non-negative".into()));
        }
        if !(0.0..1.0).contains(&self.ema_decay) {
            return Err(Error::Config("ema_decay must be in [0, 1)".into()));
        }
        if let Some(norm) = self.max_grad_norm {
            if norm <= 0.0 || !norm.is_finite() {
                return Err(Error::Config("max_grad_norm must be positive".into()));
            }
        }
        Ok(())
    }
}
