//! Optimization: SGD, Adam, gradient clipping, and plateau-driven
//! learning-rate reduction

mod adam;
mod optimizer;
mod plateau;
mod sgd;

pub use adam::Adam;
pub use optimizer::{clip_grad_norm, Optimizer};
pub use plateau::{Direction, ReduceLrOnPlateau};
pub use sgd::SGD;
