//! Autograd operations with backward passes
//!
//! The set is intentionally small: what a temporal MLP head needs.
//! Shared leaf parameters may feed several independent graphs; gradients
//! accumulate at the leaves, so intermediate nodes must not be shared
//! between graphs.

use super::{BackwardOp, Tensor};
use ndarray::Array1;
use std::cell::RefCell;
use std::rc::Rc;

/// Matrix multiplication
///
/// Computes C = A @ B where:
/// - A is m×k (flattened to length m*k)
/// - B is k×n (flattened to length k*n)
/// - C is m×n (flattened to length m*n)
pub fn matmul(a: &Tensor, b: &Tensor, m: usize, k: usize, n: usize) -> Tensor {
    assert_eq!(a.len(), m * k, "Matrix A size mismatch");
    assert_eq!(b.len(), k * n, "Matrix B size mismatch");

    let mut result_data = vec![0.0; m * n];
    for i in 0..m {
        for j in 0..n {
            let mut sum = 0.0;
            for p in 0..k {
                sum += a.data()[i * k + p] * b.data()[p * n + j];
            }
            result_data[i * n + j] = sum;
        }
    }

    let requires_grad = a.requires_grad() || b.requires_grad();
    let mut result = Tensor::new(Array1::from(result_data), requires_grad);

    if requires_grad {
        let backward_op = Rc::new(MatmulBackward {
            a: a.clone(),
            b: b.clone(),
            m,
            k,
            n,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct MatmulBackward {
    a: Tensor,
    b: Tensor,
    m: usize,
    k: usize,
    n: usize,
    result_grad: Rc<RefCell<Option<Array1<f32>>>>,
}

impl BackwardOp for MatmulBackward {
    fn backward(&self) {
        if let Some(grad_output) = self.result_grad.borrow().as_ref() {
            // ∂L/∂A = ∂L/∂C @ B^T
            if self.a.requires_grad() {
                let mut grad_a = vec![0.0; self.m * self.k];
                for i in 0..self.m {
                    for p in 0..self.k {
                        let mut sum = 0.0;
                        for j in 0..self.n {
                            sum += grad_output[i * self.n + j] * self.b.data()[p * self.n + j];
                        }
                        grad_a[i * self.k + p] = sum;
                    }
                }
                self.a.accumulate_grad(Array1::from(grad_a));
            }

            // ∂L/∂B = A^T @ ∂L/∂C
            if self.b.requires_grad() {
                let mut grad_b = vec![0.0; self.k * self.n];
                for p in 0..self.k {
                    for j in 0..self.n {
                        let mut sum = 0.0;
                        for i in 0..self.m {
                            sum += self.a.data()[i * self.k + p] * grad_output[i * self.n + j];
                        }
                        grad_b[p * self.n + j] = sum;
                    }
                }
                self.b.accumulate_grad(Array1::from(grad_b));
            }

            // Recursively call backward on inputs
            if let Some(op) = self.a.backward_op() {
                op.backward();
            }
            if let Some(op) = self.b.backward_op() {
                op.backward();
            }
        }
    }
}

/// Broadcast-add a bias row to each row of an m×n matrix
pub fn add_bias(x: &Tensor, bias: &Tensor, m: usize, n: usize) -> Tensor {
    assert_eq!(x.len(), m * n, "Matrix size mismatch");
    assert_eq!(bias.len(), n, "Bias size mismatch");

    let mut data = x.data().clone();
    for i in 0..m {
        for j in 0..n {
            data[i * n + j] += bias.data()[j];
        }
    }

    let requires_grad = x.requires_grad() || bias.requires_grad();
    let mut result = Tensor::new(data, requires_grad);

    if requires_grad {
        let backward_op = Rc::new(AddBiasBackward {
            x: x.clone(),
            bias: bias.clone(),
            m,
            n,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct AddBiasBackward {
    x: Tensor,
    bias: Tensor,
    m: usize,
    n: usize,
    result_grad: Rc<RefCell<Option<Array1<f32>>>>,
}

impl BackwardOp for AddBiasBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.x.requires_grad() {
                self.x.accumulate_grad(grad.clone());
            }

            if self.bias.requires_grad() {
                // ∂L/∂bias_j = sum over rows of ∂L/∂out_{i,j}
                let mut grad_bias = vec![0.0; self.n];
                for i in 0..self.m {
                    for j in 0..self.n {
                        grad_bias[j] += grad[i * self.n + j];
                    }
                }
                self.bias.accumulate_grad(Array1::from(grad_bias));
            }

            if let Some(op) = self.x.backward_op() {
                op.backward();
            }
            if let Some(op) = self.bias.backward_op() {
                op.backward();
            }
        }
    }
}

/// ReLU activation
pub fn relu(a: &Tensor) -> Tensor {
    let data = a.data().mapv(|x| x.max(0.0));
    let requires_grad = a.requires_grad();

    let mut result = Tensor::new(data, requires_grad);

    if requires_grad {
        let backward_op = Rc::new(ReluBackward {
            a: a.clone(),
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct ReluBackward {
    a: Tensor,
    result_grad: Rc<RefCell<Option<Array1<f32>>>>,
}

impl BackwardOp for ReluBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                // ∂L/∂a = ∂L/∂out * (a > 0)
                let grad_a = grad * &self.a.data().mapv(|x| if x > 0.0 { 1.0 } else { 0.0 });
                self.a.accumulate_grad(grad_a);
            }

            if let Some(op) = self.a.backward_op() {
                op.backward();
            }
        }
    }
}

/// Element-wise exponential
///
/// Used to keep a predicted dispersion head strictly positive.
pub fn exp(a: &Tensor) -> Tensor {
    let data = a.data().mapv(f32::exp);
    let requires_grad = a.requires_grad();

    let mut result = Tensor::new(data, requires_grad);

    if requires_grad {
        let output_clone = result.clone();
        let backward_op = Rc::new(ExpBackward {
            a: a.clone(),
            output: output_clone,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct ExpBackward {
    a: Tensor,
    output: Tensor,
    result_grad: Rc<RefCell<Option<Array1<f32>>>>,
}

impl BackwardOp for ExpBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                // ∂L/∂a = ∂L/∂out * exp(a)
                let grad_a = grad * self.output.data();
                self.a.accumulate_grad(grad_a);
            }

            if let Some(op) = self.a.backward_op() {
                op.backward();
            }
        }
    }
}
