//! Runner configuration.

use std::path::PathBuf;

use crate::dataset::DatasetSource;
use crate::tracking::TrackingUri;

/// Directory receiving the raw table and the report.
pub const DEFAULT_OUTPUT_DIR: &str = "artifacts";
pub const DEFAULT_EXPERIMENT: &str = "Iris - Data Validation";
pub const DEFAULT_RUN_NAME: &str = "01_data_validation";
/// Recorded as `mlflow.source.name` on every run.
pub const SOURCE_NAME: &str = "data-validation";

/// Configuration for one validation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Created with parents if absent.
    pub output_dir: PathBuf,
    pub tracking_uri: TrackingUri,
    pub experiment_name: String,
    pub run_name: String,
    pub source: DatasetSource,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            tracking_uri: TrackingUri::default(),
            experiment_name: DEFAULT_EXPERIMENT.to_string(),
            run_name: DEFAULT_RUN_NAME.to_string(),
            source: DatasetSource::default(),
        }
    }
}
