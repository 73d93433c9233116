//! Data augmentation for `(samples, time, channels)` batches
//!
//! Three independent, stateless transforms: per-sample circular time
//! shifts, per-timestep feature noise, and Gaussian label noise. Each
//! takes an explicitly seeded generator, returns a fresh array (inputs
//! are never mutated), and gates every draw with a strict `<` comparison
//! so a draw exactly equal to the threshold does not trigger.

use ndarray::{Array2, Array3};
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Distribution, Normal};

/// Default per-sample probability for the time-shift transform
pub const SHIFT_PROBA: f64 = 0.5;
/// Default per-timestep probability for the feature-noise transform
pub const NOISE_PROBA: f64 = 0.15;
/// Default per-label probability for the label-noise transform
pub const LABEL_PROBA: f64 = 0.25;

/// Which transforms an epoch's augmentation pass applies
#[derive(Clone, Copy, Debug, Default)]
pub struct AugmentOptions {
    /// Maximum circular shift magnitude along the time axis (0 = off)
    pub shift_step: usize,
    /// Feature noise amplitude (0 = off)
    pub feat_noise: f32,
    /// Label noise standard deviation (0 = off)
    pub sdev_label: f32,
    /// Gap-filling flag; participates in the activation gate, the filling
    /// itself is done upstream by the data loader
    pub fillgaps: usize,
}

impl AugmentOptions {
    /// Whether any augmentation is configured
    pub fn any(&self) -> bool {
        self.shift_step > 0 || self.feat_noise > 0.0 || self.sdev_label > 0.0 || self.fillgaps > 0
    }
}

/// Per-epoch record of what an augmentation pass did
#[derive(Clone, Debug, Default)]
pub struct AugmentSummary {
    /// Applied shift per sample (0 for untouched samples)
    pub shifts: Vec<i64>,
    /// Binary `(samples, time)` mask of noised timesteps
    pub noise_mask: Option<Array2<f32>>,
}

/// Circular time shift, applied per sample with probability `proba`
///
/// The shift magnitude is drawn uniformly from `[1, value]` and its sign
/// by a separate coin flip; the same shift is applied to every channel of
/// the selected sample. Returns the shifted batch and the per-sample list
/// of applied shifts.
pub fn time_shift(
    x: &Array3<f32>,
    value: usize,
    proba: f64,
    rng: &mut StdRng,
) -> (Array3<f32>, Vec<i64>) {
    let (n, t, c) = x.dim();
    let mut out = x.clone();
    let mut shifts = Vec::with_capacity(n);

    if value == 0 || t == 0 {
        shifts.resize(n, 0);
        return (out, shifts);
    }

    for i in 0..n {
        let prob: f64 = rng.gen();
        if prob < proba {
            let mut shift = rng.gen_range(1..=value) as i64;
            if rng.gen_bool(0.5) {
                shift = -shift;
            }
            for ch in 0..c {
                for j in 0..t {
                    let src = (j as i64 - shift).rem_euclid(t as i64) as usize;
                    out[[i, j, ch]] = x[[i, src, ch]];
                }
            }
            shifts.push(shift);
        } else {
            shifts.push(0);
        }
    }

    (out, shifts)
}

/// Per-timestep feature noise, applied with probability `proba`
///
/// A selected `(sample, timestep)` pair gets uniform noise in `[-value, 0]`
/// or `[0, value]` (second coin flip) added to every channel. Returns the
/// noised batch and the binary mask of perturbed timesteps.
pub fn feature_noise(
    x: &Array3<f32>,
    value: f32,
    proba: f64,
    rng: &mut StdRng,
) -> (Array3<f32>, Array2<f32>) {
    let (n, t, c) = x.dim();
    let mut out = x.clone();
    let mut mask = Array2::<f32>::zeros((n, t));

    for i in 0..n {
        for j in 0..t {
            let prob: f64 = rng.gen();
            if prob < proba {
                mask[[i, j]] = 1.0;
                let (low, high) = if rng.gen_bool(0.5) {
                    (-value, 0.0)
                } else {
                    (0.0, value)
                };
                for ch in 0..c {
                    out[[i, j, ch]] += rng.gen_range(low..=high);
                }
            }
        }
    }

    (out, mask)
}

/// Gaussian label noise on the primary target column
///
/// Each label gets `Normal(0, stdev)` noise with probability `proba`; every
/// label in the column is then clamped into `[0, 1]`, perturbed or not.
/// Auxiliary label columns are left untouched.
pub fn noisy_label(y: &Array2<f32>, stdev: f32, proba: f64, rng: &mut StdRng) -> Array2<f32> {
    let mut out = y.clone();
    // A negative or non-finite stdev draws nothing; the clamp still runs.
    let normal = Normal::new(0.0f32, stdev).ok();

    for i in 0..out.shape()[0] {
        let prob: f64 = rng.gen();
        if prob < proba {
            if let Some(normal) = &normal {
                out[[i, 0]] += normal.sample(rng);
            }
        }
        out[[i, 0]] = out[[i, 0]].clamp(0.0, 1.0);
    }

    out
}

/// Apply the configured transforms in order: shift, feature noise, label noise
pub fn augment(
    x: &Array3<f32>,
    y: &Array2<f32>,
    opts: &AugmentOptions,
    rng: &mut StdRng,
) -> (Array3<f32>, Array2<f32>, AugmentSummary) {
    let mut summary = AugmentSummary::default();

    let x = if opts.shift_step > 0 {
        let (shifted, shifts) = time_shift(x, opts.shift_step, SHIFT_PROBA, rng);
        summary.shifts = shifts;
        shifted
    } else {
        x.clone()
    };

    let x = if opts.feat_noise > 0.0 {
        let (noised, mask) = feature_noise(&x, opts.feat_noise, NOISE_PROBA, rng);
        summary.noise_mask = Some(mask);
        noised
    } else {
        x
    };

    let y = if opts.sdev_label > 0.0 {
        noisy_label(y, opts.sdev_label, LABEL_PROBA, rng)
    } else {
        y.clone()
    };

    (x, y, summary)
}
