//! # Cultivar: training loops for satellite time-series regression
//!
//! Cultivar drives custom training runs over `(samples, time, channels)`
//! satellite imagery arrays: seeded data augmentation, reduce-LR-on-plateau,
//! sample-forgetting, parameter EMA, selective fine-tuning, and best/last
//! checkpointing with a serialized run history.
//!
//! ## Architecture
//!
//! - **autograd**: tape-based automatic differentiation
//! - **data**: datasets, shuffling, batching, multi-branch input splitting
//! - **augment**: time-shift, feature-noise, and label-noise transforms
//! - **model**: the `Model` seam (forward pass, named parameter groups)
//! - **optim**: optimizers (SGD, Adam) and the plateau LR controller
//! - **train**: losses, metrics, EMA, history, and the `Trainer`
//! - **io**: checkpoint saving and loading (JSON, SafeTensors formats)

pub mod augment;
pub mod autograd;
pub mod data;
pub mod io;
pub mod model;
pub mod optim;
pub mod train;

pub mod error;

// Re-export commonly used types
pub use autograd::{backward, Tensor};
pub use error::{Error, Result};
pub use train::Trainer;
