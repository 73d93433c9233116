//! Datasets, shuffling, batching, and multi-branch input splitting
//!
//! Inputs are `(samples, time, channels)` arrays paired with
//! `(samples, targets)` labels. The first label column is the primary
//! target; an optional second column carries the auxiliary target for
//! multi-output training.

use crate::error::{Error, Result};
use ndarray::{s, Array2, Array3, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// Paired inputs and labels for one split (train, validation, or test)
#[derive(Clone, Debug)]
pub struct Dataset {
    x: Array3<f32>,
    y: Array2<f32>,
}

impl Dataset {
    /// Create a dataset, enforcing matching sample counts
    pub fn new(x: Array3<f32>, y: Array2<f32>) -> Result<Self> {
        if x.shape()[0] != y.shape()[0] {
            return Err(Error::ShapeMismatch {
                expected: vec![x.shape()[0]],
                got: vec![y.shape()[0]],
            });
        }
        Ok(Self { x, y })
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.x.shape()[0]
    }

    /// Check if the dataset has no samples
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Input array view
    pub fn inputs(&self) -> &Array3<f32> {
        &self.x
    }

    /// Label array view
    pub fn labels(&self) -> &Array2<f32> {
        &self.y
    }

    /// Number of label columns
    pub fn n_targets(&self) -> usize {
        self.y.shape()[1]
    }

    /// Return a copy with samples permuted by the given generator
    pub fn shuffled(&self, rng: &mut StdRng) -> Dataset {
        let mut indices: Vec<usize> = (0..self.len()).collect();
        indices.shuffle(rng);

        Dataset {
            x: self.x.select(Axis(0), &indices),
            y: self.y.select(Axis(0), &indices),
        }
    }

    /// Replace the arrays (used after an augmentation pass)
    pub fn from_parts(x: Array3<f32>, y: Array2<f32>) -> Result<Self> {
        Self::new(x, y)
    }

    /// Iterate over contiguous batches of at most `batch_size` samples
    pub fn batches(&self, batch_size: usize) -> impl Iterator<Item = Batch> + '_ {
        let n = self.len();
        (0..n).step_by(batch_size.max(1)).map(move |start| {
            let end = (start + batch_size).min(n);
            Batch {
                x: self.x.slice(s![start..end, .., ..]).to_owned(),
                y: self.y.slice(s![start..end, ..]).to_owned(),
            }
        })
    }
}

/// One batch of inputs and labels
#[derive(Clone, Debug)]
pub struct Batch {
    pub x: Array3<f32>,
    pub y: Array2<f32>,
}

impl Batch {
    /// Number of samples in the batch
    pub fn len(&self) -> usize {
        self.x.shape()[0]
    }

    /// Check if the batch has no samples
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Build the model input, splitting branches when requested
    pub fn input(&self, multibranch: bool) -> ModelInput {
        if multibranch {
            ModelInput::Branched(split_branches(&self.x))
        } else {
            ModelInput::Single(self.x.clone())
        }
    }
}

/// Input handed to a model's forward pass
#[derive(Clone, Debug)]
pub enum ModelInput {
    /// One `(samples, time, channels)` array
    Single(Array3<f32>),
    /// Per-branch `(samples, time, 1)` arrays, split from the last axis
    Branched(Vec<Array3<f32>>),
}

impl ModelInput {
    /// Number of samples
    pub fn len(&self) -> usize {
        match self {
            ModelInput::Single(x) => x.shape()[0],
            ModelInput::Branched(branches) => {
                branches.first().map(|b| b.shape()[0]).unwrap_or(0)
            }
        }
    }

    /// Check if the input has no samples
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Split the last axis of `(samples, time, channels)` into per-branch
/// `(samples, time, 1)` arrays, one per channel
pub fn split_branches(x: &Array3<f32>) -> Vec<Array3<f32>> {
    let channels = x.shape()[2];
    (0..channels)
        .map(|c| {
            x.slice(s![.., .., c..c + 1]).to_owned()
        })
        .collect()
}
