//! Error types for dataset loading, report generation, and run tracking.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or writing a dataset.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("dataset has no rows")]
    Empty,

    #[error("label column '{0}' not found in header")]
    MissingLabelColumn(String),

    #[error("row {row}: label value is missing")]
    MissingLabel { row: usize },

    #[error("row {row}: label value '{value}' is not an integer")]
    NonIntegerLabel { row: usize, value: String },

    #[error("row {row}, column '{column}': '{value}' is not numeric")]
    NonNumeric {
        row: usize,
        column: String,
        value: String,
    },
}

/// Errors raised while building or persisting a validation report.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to write report {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize report: {0}")]
    Json(#[from] serde_json::Error),

    #[error("label counts sum to {label_total} but the dataset has {n_rows} rows")]
    Inconsistent { label_total: u64, n_rows: u64 },

    #[error("{missing_total} missing cells reported but the table only has {cells} cells")]
    MissingOverflow { missing_total: u64, cells: u64 },
}

/// Errors raised by a tracking store.
#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("tracking store I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed metadata in {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml_ng::Error,
    },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("tracking server returned {status} for {endpoint}: {message}")]
    Api {
        endpoint: String,
        status: u16,
        message: String,
    },

    #[error("invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: &'static str },

    #[error("unsupported tracking URI: {0}")]
    UnsupportedUri(String),

    #[error("unsupported artifact URI: {0}")]
    UnsupportedArtifactUri(String),

    #[error("experiment '{0}' already exists")]
    ExperimentExists(String),

    #[error("experiment '{0}' not found")]
    ExperimentNotFound(String),

    #[error("run '{0}' not found")]
    RunNotFound(String),
}

impl TrackingError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
