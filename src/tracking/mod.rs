//! Experiment tracking.
//!
//! A [`TrackingStore`] records experiments, runs, params, metrics, and
//! artifacts. [`Tracker`] picks the store from a [`TrackingUri`] and hands out
//! [`ActiveRun`] guards: a run that is dropped without [`ActiveRun::finish`]
//! is closed as `FAILED`.

pub mod file_store;
pub mod rest_store;
pub mod uri;

use std::path::Path;

use tracing::{debug, info, warn};

use crate::error::TrackingError;

pub use file_store::FileStore;
pub use rest_store::RestStore;
pub use uri::{TrackingUri, DEFAULT_TRACKING_URI, TRACKING_URI_ENV};

/// Tag holding the human-readable run name.
pub const RUN_NAME_TAG: &str = "mlflow.runName";
/// Tag holding the user that started the run.
pub const USER_TAG: &str = "mlflow.user";
/// Tag holding the program that produced the run.
pub const SOURCE_NAME_TAG: &str = "mlflow.source.name";

const MAX_KEY_LEN: usize = 250;

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Finished,
    Failed,
}

impl RunStatus {
    /// Numeric code used by the file store.
    pub const fn code(self) -> i32 {
        match self {
            Self::Running => 1,
            Self::Finished => 3,
            Self::Failed => 4,
        }
    }

    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(Self::Running),
            3 => Some(Self::Finished),
            4 => Some(Self::Failed),
            _ => None,
        }
    }

    /// Name used by the REST API.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Finished => "FINISHED",
            Self::Failed => "FAILED",
        }
    }
}

/// Identity of a created run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunInfo {
    pub run_id: String,
    pub experiment_id: String,
    pub run_name: String,
    pub artifact_uri: String,
    pub start_time: i64,
}

/// One metric observation.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub key: String,
    pub value: f64,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub step: i64,
}

/// Backend that persists tracking data.
pub trait TrackingStore {
    /// Returns the id of the active experiment with this name, if any.
    fn get_experiment_by_name(&self, name: &str) -> Result<Option<String>, TrackingError>;

    fn create_experiment(&self, name: &str) -> Result<String, TrackingError>;

    fn create_run(
        &self,
        experiment_id: &str,
        run_name: &str,
        start_time: i64,
    ) -> Result<RunInfo, TrackingError>;

    fn log_param(&self, run: &RunInfo, key: &str, value: &str) -> Result<(), TrackingError>;

    fn log_metric(&self, run: &RunInfo, metric: &Metric) -> Result<(), TrackingError>;

    fn set_tag(&self, run: &RunInfo, key: &str, value: &str) -> Result<(), TrackingError>;

    /// Uploads a local file into the run's artifact root.
    fn log_artifact(&self, run: &RunInfo, local_path: &Path) -> Result<(), TrackingError>;

    fn update_run(
        &self,
        run: &RunInfo,
        status: RunStatus,
        end_time: i64,
    ) -> Result<(), TrackingError>;
}

/// Entry point for recording runs against one store.
pub struct Tracker {
    store: Box<dyn TrackingStore>,
}

impl Tracker {
    /// Opens the store addressed by `uri`.
    pub fn from_uri(uri: &TrackingUri) -> Result<Self, TrackingError> {
        let store: Box<dyn TrackingStore> = match uri {
            TrackingUri::Local(root) => Box::new(FileStore::open(root)?),
            TrackingUri::Rest(base) => Box::new(RestStore::new(base)?),
        };
        debug!(uri = %uri, "Opened tracking store");
        Ok(Self { store })
    }

    pub fn with_store(store: Box<dyn TrackingStore>) -> Self {
        Self { store }
    }

    /// Returns the id of the named experiment, creating it if absent.
    pub fn set_experiment(&self, name: &str) -> Result<String, TrackingError> {
        if let Some(id) = self.store.get_experiment_by_name(name)? {
            debug!(experiment = name, experiment_id = %id, "Using existing experiment");
            return Ok(id);
        }
        let id = self.store.create_experiment(name)?;
        info!(experiment = name, experiment_id = %id, "Created experiment");
        Ok(id)
    }

    /// Creates a run and tags it with its name and user.
    pub fn start_run(
        &self,
        experiment_id: &str,
        run_name: &str,
    ) -> Result<ActiveRun<'_>, TrackingError> {
        let info = self
            .store
            .create_run(experiment_id, run_name, now_millis())?;
        info!(run_id = %info.run_id, run_name, "Started run");

        let run = ActiveRun {
            store: self.store.as_ref(),
            info,
            closed: false,
        };
        run.set_tag(RUN_NAME_TAG, run_name)?;
        run.set_tag(USER_TAG, &current_user())?;
        Ok(run)
    }
}

/// An open run. Closed as `FINISHED` by [`ActiveRun::finish`], or as
/// `FAILED` when dropped first.
pub struct ActiveRun<'a> {
    store: &'a dyn TrackingStore,
    info: RunInfo,
    closed: bool,
}

impl ActiveRun<'_> {
    pub const fn info(&self) -> &RunInfo {
        &self.info
    }

    pub fn run_id(&self) -> &str {
        &self.info.run_id
    }

    pub fn log_param(&self, key: &str, value: &str) -> Result<(), TrackingError> {
        validate_key(key)?;
        self.store.log_param(&self.info, key, value)
    }

    /// Logs a metric at step 0 with the current timestamp.
    pub fn log_metric(&self, key: &str, value: f64) -> Result<(), TrackingError> {
        validate_key(key)?;
        let metric = Metric {
            key: key.to_string(),
            value,
            timestamp: now_millis(),
            step: 0,
        };
        self.store.log_metric(&self.info, &metric)
    }

    pub fn set_tag(&self, key: &str, value: &str) -> Result<(), TrackingError> {
        validate_key(key)?;
        self.store.set_tag(&self.info, key, value)
    }

    pub fn log_artifact(&self, local_path: &Path) -> Result<(), TrackingError> {
        self.store.log_artifact(&self.info, local_path)?;
        debug!(run_id = %self.info.run_id, path = %local_path.display(), "Logged artifact");
        Ok(())
    }

    /// Closes the run as `FINISHED`.
    ///
    /// If the update fails the run stays open, and dropping it still tries
    /// to record `FAILED`.
    pub fn finish(mut self) -> Result<(), TrackingError> {
        self.store
            .update_run(&self.info, RunStatus::Finished, now_millis())?;
        self.closed = true;
        info!(run_id = %self.info.run_id, "Finished run");
        Ok(())
    }
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        warn!(run_id = %self.info.run_id, "Run ended without finishing, marking as failed");
        if let Err(e) = self
            .store
            .update_run(&self.info, RunStatus::Failed, now_millis())
        {
            warn!(run_id = %self.info.run_id, error = %e, "Failed to mark run as failed");
        }
    }
}

/// Checks a param, metric, or tag name.
pub fn validate_key(key: &str) -> Result<(), TrackingError> {
    let invalid = |reason| {
        Err(TrackingError::InvalidKey {
            key: key.to_string(),
            reason,
        })
    };

    if key.is_empty() {
        return invalid("must not be empty");
    }
    if key.len() > MAX_KEY_LEN {
        return invalid("longer than 250 characters");
    }
    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | ' '))
    {
        return invalid("only alphanumerics, '_', '-', '.', '/' and ' ' are allowed");
    }
    if key.contains("..") || key.starts_with('/') {
        return invalid("must be a relative path without '..'");
    }
    Ok(())
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub(crate) fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_round_trip() {
        for status in [RunStatus::Running, RunStatus::Finished, RunStatus::Failed] {
            assert_eq!(RunStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(RunStatus::from_code(0), None);
        assert_eq!(RunStatus::from_code(2), None);
        assert_eq!(RunStatus::Finished.as_str(), "FINISHED");
    }

    #[test]
    fn test_accepts_metric_style_keys() {
        for key in ["n_rows", "target_count_0", "mlflow.runName", "a/b c-d"] {
            assert!(validate_key(key).is_ok(), "{key}");
        }
    }

    #[test]
    fn test_rejects_path_escapes_and_odd_characters() {
        for key in ["", "../x", "/abs", "a..b", "a\\b", "k=v"] {
            assert!(
                matches!(validate_key(key), Err(TrackingError::InvalidKey { .. })),
                "{key}"
            );
        }
        assert!(validate_key(&"k".repeat(251)).is_err());
    }
}
