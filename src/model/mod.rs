//! Model trait with named parameter groups

mod mlp;

pub use mlp::MlpRegressor;

use crate::autograd::Tensor;
use crate::data::ModelInput;
use crate::error::{Error, Result};
use std::ops::Range;

/// What the forward pass produces, fixed at construction
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputKind {
    /// One prediction per sample
    Single,
    /// Primary prediction plus an auxiliary one
    MultiOutput,
    /// Predictive mean and a strictly positive dispersion
    Heteroscedastic,
}

/// Forward-pass result, one flattened `(batch,)` tensor per head
#[derive(Debug)]
pub enum ModelOutput {
    Single { pred: Tensor },
    MultiOutput { pred: Tensor, aux: Tensor },
    Heteroscedastic { mean: Tensor, sigma: Tensor },
}

impl ModelOutput {
    /// The kind this output belongs to
    pub fn kind(&self) -> OutputKind {
        match self {
            ModelOutput::Single { .. } => OutputKind::Single,
            ModelOutput::MultiOutput { .. } => OutputKind::MultiOutput,
            ModelOutput::Heteroscedastic { .. } => OutputKind::Heteroscedastic,
        }
    }
}

/// A named contiguous slice of the parameter list
///
/// Groups let callers freeze or thaw parts of a model by name instead of
/// counting tensor offsets.
#[derive(Clone, Debug)]
pub struct ParamGroup {
    pub name: String,
    pub indices: Range<usize>,
}

/// Trainable model over `(samples, time, channels)` inputs
pub trait Model {
    /// Run the forward pass, building the autograd graph
    ///
    /// `training` distinguishes train-time from evaluation-time behavior
    /// for models that act differently between the two.
    fn forward(&self, input: &ModelInput, training: bool) -> Result<ModelOutput>;

    /// Output kind this model was constructed with
    fn output_kind(&self) -> OutputKind;

    /// Canonical parameter tensors, in group order
    fn parameters(&self) -> &[Tensor];

    /// Mutable access for the optimizer
    fn parameters_mut(&mut self) -> &mut [Tensor];

    /// Named parameter groups covering the full parameter list
    fn parameter_groups(&self) -> Vec<ParamGroup>;

    /// Enable or disable gradient tracking for one named group
    fn set_group_trainable(&mut self, group: &str, trainable: bool) -> Result<()> {
        let groups = self.parameter_groups();
        let found = groups
            .iter()
            .find(|g| g.name == group)
            .cloned()
            .ok_or_else(|| Error::Config(format!("unknown parameter group '{group}'")))?;

        for param in &mut self.parameters_mut()[found.indices] {
            param.set_requires_grad(trainable);
        }
        Ok(())
    }

    /// Parameters in the `"backbone"` group, empty if the model has none
    fn backbone_parameters(&self) -> &[Tensor] {
        self.group_parameters("backbone")
    }

    /// Parameters in the `"head"` group, empty if the model has none
    fn head_parameters(&self) -> &[Tensor] {
        self.group_parameters("head")
    }

    /// Parameters of one named group
    fn group_parameters(&self, group: &str) -> &[Tensor] {
        self.parameter_groups()
            .iter()
            .find(|g| g.name == group)
            .map(|g| &self.parameters()[g.indices.clone()])
            .unwrap_or(&[])
    }

    /// Freeze or thaw the backbone group
    fn set_backbone_trainable(&mut self, trainable: bool) -> Result<()> {
        self.set_group_trainable("backbone", trainable)
    }

    /// Stable per-tensor names, `<group>.<offset>` within each group
    fn parameter_names(&self) -> Vec<String> {
        let mut names = vec![String::new(); self.parameters().len()];
        for group in self.parameter_groups() {
            for (offset, idx) in group.indices.clone().enumerate() {
                names[idx] = format!("{}.{}", group.name, offset);
            }
        }
        names
    }

    /// Number of scalar parameters across all tensors
    fn num_parameters(&self) -> usize {
        self.parameters().iter().map(Tensor::len).sum()
    }
}
