//! Optimizer trait and gradient utilities

use crate::Tensor;

/// Trait for optimization algorithms
pub trait Optimizer {
    /// Perform a single optimization step
    fn step(&mut self, params: &mut [Tensor]);

    /// Zero out all gradients
    fn zero_grad(&mut self, params: &mut [Tensor]) {
        for param in params {
            param.zero_grad();
        }
    }

    /// Get learning rate
    fn lr(&self) -> f32;

    /// Set learning rate
    fn set_lr(&mut self, lr: f32);
}

/// Rescale gradients so their global L2 norm is at most `max_norm`
///
/// Returns the norm observed before clipping.
pub fn clip_grad_norm(params: &[Tensor], max_norm: f32) -> f32 {
    let mut total = 0.0f32;
    for param in params {
        if let Some(grad) = param.grad() {
            total += grad.iter().map(|g| g * g).sum::<f32>();
        }
    }
    let norm = total.sqrt();

    if norm > max_norm && norm > 0.0 {
        let scale = max_norm / norm;
        for param in params {
            if let Some(grad) = param.grad() {
                param.set_grad(grad * scale);
            }
        }
    }

    norm
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_clip_grad_norm_rescales() {
        let params = vec![Tensor::from_vec(vec![0.0, 0.0], true)];
        params[0].set_grad(ndarray::Array1::from(vec![3.0, 4.0]));

        let norm = clip_grad_norm(&params, 1.0);
        assert_relative_eq!(norm, 5.0, epsilon = 1e-6);

        let clipped = params[0].grad().unwrap();
        let new_norm = (clipped[0] * clipped[0] + clipped[1] * clipped[1]).sqrt();
        assert_relative_eq!(new_norm, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_clip_grad_norm_leaves_small_grads() {
        let params = vec![Tensor::from_vec(vec![0.0], true)];
        params[0].set_grad(ndarray::Array1::from(vec![0.5]));

        clip_grad_norm(&params, 1.0);
        assert_relative_eq!(params[0].grad().unwrap()[0], 0.5, epsilon = 1e-6);
    }
}
