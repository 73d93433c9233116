//! Per-evaluation training history

use crate::error::{Error, Result};
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// One evaluated epoch's numbers
///
/// Non-finite values serialize as JSON null; `anomaly` marks entries
/// where that happened so the record stays machine-checkable.
#[derive(Clone, Debug, Serialize)]
pub struct HistoryEntry {
    pub epoch: usize,
    pub lr: f32,
    pub train_loss: f32,
    pub val_loss: f32,
    pub val_metric: f32,
    pub test_loss: Option<f32>,
    pub test_metric: Option<f32>,
    pub anomaly: bool,
}

impl HistoryEntry {
    /// Flag the entry if any recorded value is non-finite
    pub fn with_anomaly_flag(mut self) -> Self {
        let finite = self.train_loss.is_finite()
            && self.val_loss.is_finite()
            && self.val_metric.is_finite()
            && self.test_loss.map_or(true, f32::is_finite)
            && self.test_metric.map_or(true, f32::is_finite);
        self.anomaly = !finite;
        self
    }
}

/// Evaluated epochs in order, serialized to JSON at the end of a fit
#[derive(Debug, Default, Serialize)]
pub struct History {
    entries: Vec<HistoryEntry>,
}

impl History {
    pub fn push(&mut self, entry: HistoryEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let data = serde_json::to_string_pretty(&self.entries)
            .map_err(|e| Error::Serialization(format!("history serialization failed: {e}")))?;
        let mut file = File::create(path)?;
        file.write_all(data.as_bytes())?;
        Ok(())
    }
}
