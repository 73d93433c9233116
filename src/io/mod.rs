//! Checkpoint persistence
//!
//! Checkpoints are flat name-to-tensor maps written as SafeTensors
//! (default) or pretty JSON. A fit run writes `best_model` on strict
//! improvement of the monitored metric and `last_model` at the end.

use crate::error::{Error, Result};
use crate::Tensor;
use ndarray::Array1;
use safetensors::tensor::{Dtype, TensorView};
use safetensors::SafeTensors;
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// File stem for the best-so-far weights
pub const BEST_MODEL: &str = "best_model";
/// File stem for the weights at the end of the run
pub const LAST_MODEL: &str = "last_model";
/// History file name
pub const HISTORY_FILE: &str = "history.json";

/// On-disk representation for checkpoints
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckpointFormat {
    SafeTensors,
    Json,
}

impl CheckpointFormat {
    pub fn extension(self) -> &'static str {
        match self {
            CheckpointFormat::SafeTensors => "safetensors",
            CheckpointFormat::Json => "json",
        }
    }
}

/// Named parameter snapshot
#[derive(Clone, Debug)]
pub struct Checkpoint {
    entries: Vec<(String, Array1<f32>)>,
}

impl Checkpoint {
    /// Snapshot the given parameters under the given names
    pub fn from_parameters(names: &[String], params: &[Tensor]) -> Result<Self> {
        if names.len() != params.len() {
            return Err(Error::ShapeMismatch {
                expected: vec![names.len()],
                got: vec![params.len()],
            });
        }
        Ok(Self {
            entries: names
                .iter()
                .cloned()
                .zip(params.iter().map(|p| p.data().clone()))
                .collect(),
        })
    }

    pub fn entries(&self) -> &[(String, Array1<f32>)] {
        &self.entries
    }

    /// Copy the snapshot back into parameter tensors, matching by position
    pub fn apply(&self, params: &mut [Tensor]) -> Result<()> {
        if self.entries.len() != params.len() {
            return Err(Error::ShapeMismatch {
                expected: vec![self.entries.len()],
                got: vec![params.len()],
            });
        }
        for ((_, data), param) in self.entries.iter().zip(params.iter_mut()) {
            if data.len() != param.len() {
                return Err(Error::ShapeMismatch {
                    expected: vec![param.len()],
                    got: vec![data.len()],
                });
            }
            *param.data_mut() = data.clone();
        }
        Ok(())
    }

    pub fn save(&self, path: impl AsRef<Path>, format: CheckpointFormat) -> Result<()> {
        match format {
            CheckpointFormat::SafeTensors => self.save_safetensors(path.as_ref()),
            CheckpointFormat::Json => self.save_json(path.as_ref()),
        }
    }

    pub fn load(path: impl AsRef<Path>, format: CheckpointFormat) -> Result<Self> {
        match format {
            CheckpointFormat::SafeTensors => Self::load_safetensors(path.as_ref()),
            CheckpointFormat::Json => Self::load_json(path.as_ref()),
        }
    }

    fn save_safetensors(&self, path: &Path) -> Result<()> {
        let tensor_data: Vec<(String, Vec<u8>, Vec<usize>)> = self
            .entries
            .iter()
            .map(|(name, data)| {
                let bytes: Vec<u8> = data
                    .iter()
                    .flat_map(|v| v.to_le_bytes())
                    .collect();
                (name.clone(), bytes, vec![data.len()])
            })
            .collect();

        let views: Vec<(&str, TensorView<'_>)> = tensor_data
            .iter()
            .map(|(name, bytes, shape)| {
                let view = TensorView::new(Dtype::F32, shape.clone(), bytes)
                    .map_err(|e| Error::Serialization(format!("tensor view failed: {e}")))?;
                Ok((name.as_str(), view))
            })
            .collect::<Result<_>>()?;

        let mut metadata = HashMap::new();
        metadata.insert("format".to_string(), "cultivar-checkpoint".to_string());

        let bytes = safetensors::serialize(views, &Some(metadata))
            .map_err(|e| Error::Serialization(format!("safetensors serialization failed: {e}")))?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    fn load_safetensors(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        let loaded = SafeTensors::deserialize(&data)
            .map_err(|e| Error::Serialization(format!("safetensors deserialization failed: {e}")))?;

        let mut entries = Vec::with_capacity(loaded.len());
        let mut names = loaded.names();
        names.sort();
        for name in names {
            let view = loaded
                .tensor(name)
                .map_err(|e| Error::Serialization(format!("missing tensor '{name}': {e}")))?;
            let values: &[f32] = bytemuck::cast_slice(view.data());
            entries.push((name.to_string(), Array1::from(values.to_vec())));
        }
        Ok(Self { entries })
    }

    fn save_json(&self, path: &Path) -> Result<()> {
        let state: Vec<(String, Vec<f32>)> = self
            .entries
            .iter()
            .map(|(name, data)| (name.clone(), data.to_vec()))
            .collect();
        let json = serde_json::to_string_pretty(&state)
            .map_err(|e| Error::Serialization(format!("JSON serialization failed: {e}")))?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }

    fn load_json(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let state: Vec<(String, Vec<f32>)> = serde_json::from_str(&json)
            .map_err(|e| Error::Serialization(format!("JSON deserialization failed: {e}")))?;
        Ok(Self {
            entries: state
                .into_iter()
                .map(|(name, data)| (name, Array1::from(data)))
                .collect(),
        })
    }
}
