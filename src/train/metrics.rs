//! Streaming evaluation metrics

use crate::error::{Error, Result};
use ndarray::Array1;
use std::str::FromStr;

/// Metric selection for validation and test reporting
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetricKind {
    Mse,
    Mae,
    Mape,
}

impl FromStr for MetricKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mse" => Ok(MetricKind::Mse),
            "mae" => Ok(MetricKind::Mae),
            "mape" => Ok(MetricKind::Mape),
            other => Err(Error::Config(format!("unknown metric '{other}'"))),
        }
    }
}

impl MetricKind {
    pub fn build(self) -> Box<dyn Metric> {
        match self {
            MetricKind::Mse => Box::new(MeanSquaredError::default()),
            MetricKind::Mae => Box::new(MeanAbsoluteError::default()),
            MetricKind::Mape => Box::new(MeanAbsolutePercentageError::default()),
        }
    }
}

/// Metric accumulated over batches of primary predictions
pub trait Metric {
    /// Fold one batch of predictions and targets into the running state
    fn update(&mut self, preds: &Array1<f32>, targets: &Array1<f32>);

    /// Value over everything seen since the last reset
    fn result(&self) -> f32;

    fn reset(&mut self);

    fn name(&self) -> &str;
}

#[derive(Default)]
pub struct MeanSquaredError {
    sum: f64,
    count: usize,
}

impl Metric for MeanSquaredError {
    fn update(&mut self, preds: &Array1<f32>, targets: &Array1<f32>) {
        for (p, t) in preds.iter().zip(targets.iter()) {
            let d = (p - t) as f64;
            self.sum += d * d;
        }
        self.count += preds.len();
    }

    fn result(&self) -> f32 {
        if self.count == 0 {
            0.0
        } else {
            (self.sum / self.count as f64) as f32
        }
    }

    fn reset(&mut self) {
        self.sum = 0.0;
        self.count = 0;
    }

    fn name(&self) -> &str {
        "mse"
    }
}

#[derive(Default)]
pub struct MeanAbsoluteError {
    sum: f64,
    count: usize,
}

impl Metric for MeanAbsoluteError {
    fn update(&mut self, preds: &Array1<f32>, targets: &Array1<f32>) {
        for (p, t) in preds.iter().zip(targets.iter()) {
            self.sum += (p - t).abs() as f64;
        }
        self.count += preds.len();
    }

    fn result(&self) -> f32 {
        if self.count == 0 {
            0.0
        } else {
            (self.sum / self.count as f64) as f32
        }
    }

    fn reset(&mut self) {
        self.sum = 0.0;
        self.count = 0;
    }

    fn name(&self) -> &str {
        "mae"
    }
}

/// MAPE with the denominator floored to avoid division blowup near zero
#[derive(Default)]
pub struct MeanAbsolutePercentageError {
    sum: f64,
    count: usize,
}

const MAPE_EPSILON: f32 = 1e-7;

impl Metric for MeanAbsolutePercentageError {
    fn update(&mut self, preds: &Array1<f32>, targets: &Array1<f32>) {
        for (p, t) in preds.iter().zip(targets.iter()) {
            let denom = t.abs().max(MAPE_EPSILON);
            self.sum += ((p - t).abs() / denom) as f64;
        }
        self.count += preds.len();
    }

    fn result(&self) -> f32 {
        if self.count == 0 {
            0.0
        } else {
            (100.0 * self.sum / self.count as f64) as f32
        }
    }

    fn reset(&mut self) {
        self.sum = 0.0;
        self.count = 0;
    }

    fn name(&self) -> &str {
        "mape"
    }
}

/// Running mean of per-sample losses across batches
#[derive(Default)]
pub struct LossAccumulator {
    sum: f64,
    count: usize,
}

impl LossAccumulator {
    pub fn add(&mut self, losses: &Array1<f32>) {
        self.sum += losses.iter().map(|&l| l as f64).sum::<f64>();
        self.count += losses.len();
    }

    pub fn add_scalar(&mut self, loss: f32, weight: usize) {
        self.sum += loss as f64 * weight as f64;
        self.count += weight;
    }

    pub fn mean(&self) -> f32 {
        if self.count == 0 {
            0.0
        } else {
            (self.sum / self.count as f64) as f32
        }
    }

    pub fn reset(&mut self) {
        self.sum = 0.0;
        self.count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_mse_over_batches() {
        let mut metric = MeanSquaredError::default();
        metric.update(&Array1::from(vec![1.0, 2.0]), &Array1::from(vec![0.0, 0.0]));
        metric.update(&Array1::from(vec![3.0]), &Array1::from(vec![0.0]));

        // (1 + 4 + 9) / 3
        assert_relative_eq!(metric.result(), 14.0 / 3.0, epsilon = 1e-6);

        metric.reset();
        assert_relative_eq!(metric.result(), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_mae() {
        let mut metric = MeanAbsoluteError::default();
        metric.update(
            &Array1::from(vec![1.0, -2.0]),
            &Array1::from(vec![0.0, 0.0]),
        );
        assert_relative_eq!(metric.result(), 1.5, epsilon = 1e-6);
    }

    #[test]
    fn test_mape_floors_denominator() {
        let mut metric = MeanAbsolutePercentageError::default();
        metric.update(&Array1::from(vec![1.0]), &Array1::from(vec![0.0]));
        // The floored denominator keeps the value finite.
        assert!(metric.result().is_finite());
    }

    #[test]
    fn test_mape_percentage_scale() {
        let mut metric = MeanAbsolutePercentageError::default();
        metric.update(&Array1::from(vec![1.1]), &Array1::from(vec![1.0]));
        assert_relative_eq!(metric.result(), 10.0, epsilon = 1e-3);
    }

    #[test]
    fn test_metric_kind_parsing() {
        assert_eq!("mape".parse::<MetricKind>().unwrap(), MetricKind::Mape);
        assert!("rmse".parse::<MetricKind>().is_err());
    }

    #[test]
    fn test_loss_accumulator_weighted_mean() {
        let mut acc = LossAccumulator::default();
        acc.add(&Array1::from(vec![1.0, 2.0, 3.0]));
        acc.add_scalar(4.0, 1);
        assert_relative_eq!(acc.mean(), 2.5, epsilon = 1e-6);
    }
}
