//! Training loop, losses, metrics, EMA, and history

mod config;
mod ema;
mod history;
mod loss;
mod metrics;
mod trainer;

pub use config::FitConfig;
pub use ema::ParameterEma;
pub use history::{History, HistoryEntry};
pub use loss::{
    GaussianNll, HeteroLoss, Huber, LaplacianNll, LossKind, LossRegime, Mae, Mse, SampleLoss,
};
pub use metrics::{
    LossAccumulator, MeanAbsoluteError, MeanAbsolutePercentageError, MeanSquaredError, Metric,
    MetricKind,
};
pub use trainer::{FitReport, Trainer, TrainingState};
