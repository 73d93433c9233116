//! Per-sample losses and loss regimes
//!
//! Losses here are per-sample: each returns one value and one gradient
//! per sample so the trainer can drop high-loss samples before reducing
//! and seeding the backward pass.

use crate::error::{Error, Result};
use crate::model::OutputKind;
use ndarray::Array1;
use std::str::FromStr;

/// Loss selection, resolved to a [`LossRegime`] once at fit setup
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LossKind {
    Mse,
    Mae,
    Huber,
    GaussianNll,
    LaplacianNll,
}

impl FromStr for LossKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mse" => Ok(LossKind::Mse),
            "mae" => Ok(LossKind::Mae),
            "huber" => Ok(LossKind::Huber),
            "gaussian" => Ok(LossKind::GaussianNll),
            "laplacian" => Ok(LossKind::LaplacianNll),
            other => Err(Error::Config(format!("unknown loss '{other}'"))),
        }
    }
}

/// Per-sample loss over a single prediction head
pub trait SampleLoss {
    /// One loss value per sample
    fn per_sample(&self, pred: &Array1<f32>, target: &Array1<f32>) -> Array1<f32>;

    /// dL_i/dpred_i for each sample
    fn grad(&self, pred: &Array1<f32>, target: &Array1<f32>) -> Array1<f32>;

    fn name(&self) -> &str;
}

/// Squared error
pub struct Mse;

impl SampleLoss for Mse {
    fn per_sample(&self, pred: &Array1<f32>, target: &Array1<f32>) -> Array1<f32> {
        let diff = pred - target;
        &diff * &diff
    }

    fn grad(&self, pred: &Array1<f32>, target: &Array1<f32>) -> Array1<f32> {
        (pred - target) * 2.0
    }

    fn name(&self) -> &str {
        "mse"
    }
}

/// Absolute error
pub struct Mae;

impl SampleLoss for Mae {
    fn per_sample(&self, pred: &Array1<f32>, target: &Array1<f32>) -> Array1<f32> {
        (pred - target).mapv(f32::abs)
    }

    fn grad(&self, pred: &Array1<f32>, target: &Array1<f32>) -> Array1<f32> {
        (pred - target).mapv(f32::signum)
    }

    fn name(&self) -> &str {
        "mae"
    }
}

/// Huber loss, quadratic inside `delta`, linear outside
pub struct Huber {
    pub delta: f32,
}

impl Default for Huber {
    fn default() -> Self {
        Self { delta: 1.0 }
    }
}

impl SampleLoss for Huber {
    fn per_sample(&self, pred: &Array1<f32>, target: &Array1<f32>) -> Array1<f32> {
        (pred - target).mapv(|d| {
            if d.abs() <= self.delta {
                0.5 * d * d
            } else {
                self.delta * (d.abs() - 0.5 * self.delta)
            }
        })
    }

    fn grad(&self, pred: &Array1<f32>, target: &Array1<f32>) -> Array1<f32> {
        (pred - target).mapv(|d| {
            if d.abs() <= self.delta {
                d
            } else {
                self.delta * d.signum()
            }
        })
    }

    fn name(&self) -> &str {
        "huber"
    }
}

/// Per-sample negative log-likelihood over a mean and dispersion head
pub trait HeteroLoss {
    fn per_sample(&self, mean: &Array1<f32>, disp: &Array1<f32>, target: &Array1<f32>)
        -> Array1<f32>;

    /// `(dL/dmean, dL/ddisp)` per sample
    fn grads(
        &self,
        mean: &Array1<f32>,
        disp: &Array1<f32>,
        target: &Array1<f32>,
    ) -> (Array1<f32>, Array1<f32>);

    fn name(&self) -> &str;
}

/// Gaussian NLL with predicted standard deviation
pub struct GaussianNll;

const HALF_LN_TWO_PI: f32 = 0.918_938_5;

impl HeteroLoss for GaussianNll {
    fn per_sample(
        &self,
        mean: &Array1<f32>,
        sigma: &Array1<f32>,
        target: &Array1<f32>,
    ) -> Array1<f32> {
        Array1::from_shape_fn(mean.len(), |i| {
            let r = target[i] - mean[i];
            let s = sigma[i];
            HALF_LN_TWO_PI + s.ln() + r * r / (2.0 * s * s)
        })
    }

    fn grads(
        &self,
        mean: &Array1<f32>,
        sigma: &Array1<f32>,
        target: &Array1<f32>,
    ) -> (Array1<f32>, Array1<f32>) {
        let d_mean = Array1::from_shape_fn(mean.len(), |i| {
            let s = sigma[i];
            (mean[i] - target[i]) / (s * s)
        });
        let d_sigma = Array1::from_shape_fn(mean.len(), |i| {
            let r = target[i] - mean[i];
            let s = sigma[i];
            1.0 / s - r * r / (s * s * s)
        });
        (d_mean, d_sigma)
    }

    fn name(&self) -> &str {
        "gaussian"
    }
}

/// Laplacian NLL with predicted scale
pub struct LaplacianNll;

impl HeteroLoss for LaplacianNll {
    fn per_sample(
        &self,
        mean: &Array1<f32>,
        scale: &Array1<f32>,
        target: &Array1<f32>,
    ) -> Array1<f32> {
        Array1::from_shape_fn(mean.len(), |i| {
            let b = scale[i];
            (2.0 * b).ln() + (target[i] - mean[i]).abs() / b
        })
    }

    fn grads(
        &self,
        mean: &Array1<f32>,
        scale: &Array1<f32>,
        target: &Array1<f32>,
    ) -> (Array1<f32>, Array1<f32>) {
        let d_mean = Array1::from_shape_fn(mean.len(), |i| {
            (mean[i] - target[i]).signum() / scale[i]
        });
        let d_scale = Array1::from_shape_fn(mean.len(), |i| {
            let b = scale[i];
            1.0 / b - (target[i] - mean[i]).abs() / (b * b)
        });
        (d_mean, d_scale)
    }

    fn name(&self) -> &str {
        "laplacian"
    }
}

/// Loss wiring resolved once at fit setup from the loss kind and the
/// model's output kind
pub enum LossRegime {
    /// One head, one per-sample loss
    Single(Box<dyn SampleLoss>),
    /// Primary plus auxiliary head; total = primary + lambda * auxiliary
    MultiOutput {
        loss: Box<dyn SampleLoss>,
        lambda: f32,
    },
    /// Mean and dispersion heads trained jointly
    Heteroscedastic(Box<dyn HeteroLoss>),
}

impl LossRegime {
    /// Pair a loss kind with an output kind, rejecting mismatches
    pub fn resolve(kind: LossKind, output: OutputKind, lambda: f32) -> Result<Self> {
        let sample_loss = |kind: LossKind| -> Option<Box<dyn SampleLoss>> {
            match kind {
                LossKind::Mse => Some(Box::new(Mse)),
                LossKind::Mae => Some(Box::new(Mae)),
                LossKind::Huber => Some(Box::new(Huber::default())),
                _ => None,
            }
        };

        match (kind, output) {
            (LossKind::GaussianNll, OutputKind::Heteroscedastic) => {
                Ok(LossRegime::Heteroscedastic(Box::new(GaussianNll)))
            }
            (LossKind::LaplacianNll, OutputKind::Heteroscedastic) => {
                Ok(LossRegime::Heteroscedastic(Box::new(LaplacianNll)))
            }
            (kind, OutputKind::Single) => sample_loss(kind)
                .map(LossRegime::Single)
                .ok_or_else(|| Error::Config("likelihood loss needs a dispersion head".into())),
            (kind, OutputKind::MultiOutput) => sample_loss(kind)
                .map(|loss| LossRegime::MultiOutput { loss, lambda })
                .ok_or_else(|| Error::Config("likelihood loss needs a dispersion head".into())),
            (_, OutputKind::Heteroscedastic) => Err(Error::Config(
                "dispersion head needs a likelihood loss".into(),
            )),
        }
    }
}
