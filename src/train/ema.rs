//! Exponential moving average of model parameters

use crate::Tensor;
use ndarray::Array1;

/// Shadow copy of the parameters, decayed toward each update
///
/// `shadow = decay * shadow + (1 - decay) * param` after every optimizer
/// step. Evaluation and checkpointing can swap the shadow weights in and
/// restore the live ones afterwards.
pub struct ParameterEma {
    decay: f32,
    shadow: Vec<Array1<f32>>,
}

impl ParameterEma {
    pub fn new(params: &[Tensor], decay: f32) -> Self {
        Self {
            decay,
            shadow: params.iter().map(|p| p.data().clone()).collect(),
        }
    }

    /// Fold the current parameter values into the shadow
    pub fn update(&mut self, params: &[Tensor]) {
        for (shadow, param) in self.shadow.iter_mut().zip(params.iter()) {
            *shadow = &*shadow * self.decay + param.data() * (1.0 - self.decay);
        }
    }

    /// Replace the live parameters with the shadow, returning the originals
    pub fn swap_in(&self, params: &mut [Tensor]) -> Vec<Array1<f32>> {
        let saved: Vec<Array1<f32>> = params.iter().map(|p| p.data().clone()).collect();
        for (param, shadow) in params.iter_mut().zip(self.shadow.iter()) {
            *param.data_mut() = shadow.clone();
        }
        saved
    }

    /// Restore parameters saved by [`swap_in`](Self::swap_in)
    pub fn swap_out(&self, params: &mut [Tensor], saved: Vec<Array1<f32>>) {
        for (param, data) in params.iter_mut().zip(saved.into_iter()) {
            *param.data_mut() = data;
        }
    }

    pub fn decay(&self) -> f32 {
        self.decay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_ema_tracks_slowly() {
        let mut params = vec![Tensor::from_vec(vec![0.0], true)];
        let mut ema = ParameterEma::new(&params, 0.9);

        *params[0].data_mut() = Array1::from(vec![1.0]);
        ema.update(&params);

        // shadow = 0.9 * 0 + 0.1 * 1
        let saved = ema.swap_in(&mut params);
        assert_relative_eq!(params[0].data()[0], 0.1, epsilon = 1e-6);

        ema.swap_out(&mut params, saved);
        assert_relative_eq!(params[0].data()[0], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_ema_converges_to_constant() {
        let mut params = vec![Tensor::from_vec(vec![2.0], true)];
        let mut ema = ParameterEma::new(&params, 0.9);

        for _ in 0..200 {
            ema.update(&params);
        }

        let saved = ema.swap_in(&mut params);
        assert_relative_eq!(params[0].data()[0], 2.0, epsilon = 1e-4);
        ema.swap_out(&mut params, saved);
    }
}
