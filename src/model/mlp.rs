//! Temporal MLP regressor

use super::{Model, ModelOutput, OutputKind, ParamGroup};
use crate::autograd::{add_bias, exp, matmul, relu, Tensor};
use crate::data::ModelInput;
use crate::error::{Error, Result};
use ndarray::{Array1, Array3};
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;

/// Single-hidden-layer MLP over flattened time series
///
/// The backbone (hidden layer) is shared across heads; each head rebuilds
/// its own graph through the shared backbone weights so gradients stay
/// independent per head and accumulate only at the leaves.
///
/// Parameter layout: `[w_hidden, b_hidden, w_head0, b_head0, ...]` with
/// groups `"backbone"` and `"head"`.
pub struct MlpRegressor {
    input_dim: usize,
    hidden_dim: usize,
    kind: OutputKind,
    params: Vec<Tensor>,
}

const BACKBONE_LEN: usize = 2;

impl MlpRegressor {
    /// Build a regressor for `(time, channels)` inputs
    pub fn new(
        time_steps: usize,
        channels: usize,
        hidden_dim: usize,
        kind: OutputKind,
        rng: &mut StdRng,
    ) -> Result<Self> {
        let input_dim = time_steps * channels;
        if input_dim == 0 || hidden_dim == 0 {
            return Err(Error::Config(
                "model dimensions must be positive".to_string(),
            ));
        }

        let init = Normal::new(0.0f32, 0.1).map_err(|e| Error::Config(e.to_string()))?;
        let mut params = vec![
            Tensor::new(Array1::random_using(input_dim * hidden_dim, init, rng), true),
            Tensor::new(Array1::zeros(hidden_dim), true),
        ];

        let n_heads = match kind {
            OutputKind::Single => 1,
            OutputKind::MultiOutput | OutputKind::Heteroscedastic => 2,
        };
        for _ in 0..n_heads {
            params.push(Tensor::new(
                Array1::random_using(hidden_dim, init, rng),
                true,
            ));
            params.push(Tensor::new(Array1::zeros(1), true));
        }

        Ok(Self {
            input_dim,
            hidden_dim,
            kind,
            params,
        })
    }

    /// Flatten the input to a `(batch, input_dim)` row-major buffer
    ///
    /// Branched inputs concatenate the branches in channel order, one full
    /// time series per branch.
    fn input_matrix(&self, input: &ModelInput) -> Result<(Vec<f32>, usize)> {
        match input {
            ModelInput::Single(x) => self.flatten_single(x),
            ModelInput::Branched(branches) => {
                let batch = branches.first().map(|b| b.shape()[0]).unwrap_or(0);
                let per_branch: usize = branches.iter().map(|b| b.shape()[1]).sum();
                if per_branch != self.input_dim {
                    return Err(Error::ShapeMismatch {
                        expected: vec![self.input_dim],
                        got: vec![per_branch],
                    });
                }

                let mut data = Vec::with_capacity(batch * self.input_dim);
                for i in 0..batch {
                    for branch in branches {
                        for j in 0..branch.shape()[1] {
                            data.push(branch[[i, j, 0]]);
                        }
                    }
                }
                Ok((data, batch))
            }
        }
    }

    fn flatten_single(&self, x: &Array3<f32>) -> Result<(Vec<f32>, usize)> {
        let (batch, t, c) = x.dim();
        if t * c != self.input_dim {
            return Err(Error::ShapeMismatch {
                expected: vec![self.input_dim],
                got: vec![t * c],
            });
        }

        let mut data = Vec::with_capacity(batch * self.input_dim);
        for i in 0..batch {
            for j in 0..t {
                for k in 0..c {
                    data.push(x[[i, j, k]]);
                }
            }
        }
        Ok((data, batch))
    }

    /// One head's graph, backbone rebuilt per head
    fn head(&self, x: &Tensor, batch: usize, head_idx: usize) -> Tensor {
        let w1 = &self.params[0];
        let b1 = &self.params[1];
        let w = &self.params[BACKBONE_LEN + 2 * head_idx];
        let b = &self.params[BACKBONE_LEN + 2 * head_idx + 1];

        let h = matmul(x, w1, batch, self.input_dim, self.hidden_dim);
        let h = add_bias(&h, b1, batch, self.hidden_dim);
        let h = relu(&h);
        let out = matmul(&h, w, batch, self.hidden_dim, 1);
        add_bias(&out, b, batch, 1)
    }
}

impl Model for MlpRegressor {
    fn forward(&self, input: &ModelInput, _training: bool) -> Result<ModelOutput> {
        let (data, batch) = self.input_matrix(input)?;
        let x = Tensor::from_vec(data, false);

        Ok(match self.kind {
            OutputKind::Single => ModelOutput::Single {
                pred: self.head(&x, batch, 0),
            },
            OutputKind::MultiOutput => ModelOutput::MultiOutput {
                pred: self.head(&x, batch, 0),
                aux: self.head(&x, batch, 1),
            },
            OutputKind::Heteroscedastic => ModelOutput::Heteroscedastic {
                mean: self.head(&x, batch, 0),
                sigma: exp(&self.head(&x, batch, 1)),
            },
        })
    }

    fn output_kind(&self) -> OutputKind {
        self.kind
    }

    fn parameters(&self) -> &[Tensor] {
        &self.params
    }

    fn parameters_mut(&mut self) -> &mut [Tensor] {
        &mut self.params
    }

    fn parameter_groups(&self) -> Vec<ParamGroup> {
        vec![
            ParamGroup {
                name: "backbone".to_string(),
                indices: 0..BACKBONE_LEN,
            },
            ParamGroup {
                name: "head".to_string(),
                indices: BACKBONE_LEN..self.params.len(),
            },
        ]
    }
}
