//! Validation report derived from a dataset.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dataset::Dataset;
use crate::error::ReportError;

/// File name of the persisted report.
pub const REPORT_FILE_NAME: &str = "validation_report.json";

/// Shape, missing-cell, and label-distribution summary of a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub n_rows: u64,
    pub n_cols: u64,
    pub missing_total: u64,
    /// Occurrences per label value. JSON keys are the decimal label text.
    pub target_counts: BTreeMap<i64, u64>,
    pub label_column: String,
}

impl ValidationReport {
    pub fn from_dataset(dataset: &Dataset) -> Self {
        let mut target_counts = BTreeMap::new();
        for label in dataset.labels() {
            *target_counts.entry(*label).or_insert(0u64) += 1;
        }

        Self {
            n_rows: dataset.n_rows() as u64,
            n_cols: dataset.n_cols() as u64,
            missing_total: dataset.missing_count() as u64,
            target_counts,
            label_column: dataset.label_column().to_string(),
        }
    }

    /// Label counts must add up to the row count and the missing total must
    /// fit in the table.
    pub fn check_consistency(&self) -> Result<(), ReportError> {
        let label_total: u64 = self.target_counts.values().sum();
        if label_total != self.n_rows {
            return Err(ReportError::Inconsistent {
                label_total,
                n_rows: self.n_rows,
            });
        }
        let cells = self.n_rows.saturating_mul(self.n_cols);
        if self.missing_total > cells {
            return Err(ReportError::MissingOverflow {
                missing_total: self.missing_total,
                cells,
            });
        }
        Ok(())
    }

    /// Metric name for one label value, e.g. `target_count_1`.
    pub fn label_metric_name(&self, value: i64) -> String {
        format!("{}_count_{value}", self.label_column)
    }

    /// Pretty-printed JSON with two-space indentation.
    pub fn to_json(&self) -> Result<String, ReportError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_json(&self, path: &Path) -> Result<(), ReportError> {
        let json = self.to_json()?;
        fs::write(path, json).map_err(|source| ReportError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Wrote validation report");
        Ok(())
    }
}
