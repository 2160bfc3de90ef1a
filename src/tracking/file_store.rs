//! Local file store using the MLflow `mlruns/` directory layout.
//!
//! ```text
//! <root>/<experiment_id>/meta.yaml
//! <root>/<experiment_id>/<run_id>/meta.yaml
//! <root>/<experiment_id>/<run_id>/{params,metrics,tags,artifacts}/
//! ```

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::{current_user, now_millis, Metric, RunInfo, RunStatus, TrackingStore};
use crate::error::TrackingError;

const META_FILE: &str = "meta.yaml";
const DEFAULT_EXPERIMENT_ID: &str = "0";
const DEFAULT_EXPERIMENT_NAME: &str = "Default";
const LIFECYCLE_ACTIVE: &str = "active";
/// `SourceType.LOCAL`.
const SOURCE_TYPE_LOCAL: i32 = 4;

/// Experiment `meta.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentMeta {
    pub artifact_location: String,
    pub creation_time: i64,
    pub experiment_id: String,
    pub last_update_time: i64,
    pub lifecycle_stage: String,
    pub name: String,
}

/// Run `meta.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMeta {
    pub artifact_uri: String,
    pub end_time: Option<i64>,
    pub entry_point_name: String,
    pub experiment_id: String,
    pub lifecycle_stage: String,
    pub run_id: String,
    pub run_name: String,
    pub run_uuid: String,
    pub source_name: String,
    pub source_type: i32,
    pub source_version: String,
    pub start_time: i64,
    pub status: i32,
    #[serde(default)]
    pub tags: Vec<String>,
    pub user_id: String,
}

/// File-backed tracking store.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Opens (and initialises if needed) a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, TrackingError> {
        let root = root.as_ref();
        fs::create_dir_all(root).map_err(|e| TrackingError::io(root, e))?;
        let root = fs::canonicalize(root).map_err(|e| TrackingError::io(root, e))?;
        let trash = root.join(".trash");
        fs::create_dir_all(&trash).map_err(|e| TrackingError::io(&trash, e))?;

        let store = Self { root };
        if !store.experiment_dir(DEFAULT_EXPERIMENT_ID).exists() {
            store.write_experiment(DEFAULT_EXPERIMENT_ID, DEFAULT_EXPERIMENT_NAME)?;
        }
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn experiment_dir(&self, experiment_id: &str) -> PathBuf {
        self.root.join(experiment_id)
    }

    /// Directory of a run.
    pub fn run_dir(&self, run: &RunInfo) -> PathBuf {
        self.experiment_dir(&run.experiment_id).join(&run.run_id)
    }

    fn experiment_ids(&self) -> Result<Vec<u64>, TrackingError> {
        let entries = fs::read_dir(&self.root).map_err(|e| TrackingError::io(&self.root, e))?;
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| TrackingError::io(&self.root, e))?;
            if !entry.path().is_dir() {
                continue;
            }
            if let Some(id) = entry.file_name().to_str().and_then(|n| n.parse().ok()) {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    pub fn read_experiment(&self, experiment_id: &str) -> Result<ExperimentMeta, TrackingError> {
        let path = self.experiment_dir(experiment_id).join(META_FILE);
        if !path.exists() {
            return Err(TrackingError::ExperimentNotFound(experiment_id.to_string()));
        }
        read_yaml(&path)
    }

    fn write_experiment(&self, experiment_id: &str, name: &str) -> Result<(), TrackingError> {
        let dir = self.experiment_dir(experiment_id);
        fs::create_dir_all(&dir).map_err(|e| TrackingError::io(&dir, e))?;
        let now = now_millis();
        let meta = ExperimentMeta {
            artifact_location: file_uri(&dir),
            creation_time: now,
            experiment_id: experiment_id.to_string(),
            last_update_time: now,
            lifecycle_stage: LIFECYCLE_ACTIVE.to_string(),
            name: name.to_string(),
        };
        write_yaml(&dir.join(META_FILE), &meta)
    }

    pub fn read_run(&self, run: &RunInfo) -> Result<RunMeta, TrackingError> {
        let path = self.run_dir(run).join(META_FILE);
        if !path.exists() {
            return Err(TrackingError::RunNotFound(run.run_id.clone()));
        }
        read_yaml(&path)
    }

    /// Writes `value` to `<run>/<kind>/<key>`, creating nested directories for
    /// keys containing `/`.
    fn write_run_file(
        &self,
        run: &RunInfo,
        kind: &str,
        key: &str,
        value: &str,
    ) -> Result<(), TrackingError> {
        let path = self.run_dir(run).join(kind).join(key);
        ensure_parent(&path)?;
        fs::write(&path, value).map_err(|e| TrackingError::io(&path, e))
    }
}

impl TrackingStore for FileStore {
    fn get_experiment_by_name(&self, name: &str) -> Result<Option<String>, TrackingError> {
        for id in self.experiment_ids()? {
            let id = id.to_string();
            let meta = self.read_experiment(&id)?;
            if meta.name == name && meta.lifecycle_stage == LIFECYCLE_ACTIVE {
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    fn create_experiment(&self, name: &str) -> Result<String, TrackingError> {
        if self.get_experiment_by_name(name)?.is_some() {
            return Err(TrackingError::ExperimentExists(name.to_string()));
        }
        let next = self.experiment_ids()?.last().map_or(0, |id| id + 1);
        let id = next.to_string();
        self.write_experiment(&id, name)?;
        debug!(experiment = name, experiment_id = %id, root = %self.root.display(), "Wrote experiment");
        Ok(id)
    }

    fn create_run(
        &self,
        experiment_id: &str,
        run_name: &str,
        start_time: i64,
    ) -> Result<RunInfo, TrackingError> {
        self.read_experiment(experiment_id)?;

        let run_id = Uuid::new_v4().simple().to_string();
        let run_dir = self.experiment_dir(experiment_id).join(&run_id);
        for sub in ["params", "metrics", "tags", "artifacts"] {
            let dir = run_dir.join(sub);
            fs::create_dir_all(&dir).map_err(|e| TrackingError::io(&dir, e))?;
        }

        let artifact_uri = file_uri(&run_dir.join("artifacts"));
        let meta = RunMeta {
            artifact_uri: artifact_uri.clone(),
            end_time: None,
            entry_point_name: String::new(),
            experiment_id: experiment_id.to_string(),
            lifecycle_stage: LIFECYCLE_ACTIVE.to_string(),
            run_id: run_id.clone(),
            run_name: run_name.to_string(),
            run_uuid: run_id.clone(),
            source_name: String::new(),
            source_type: SOURCE_TYPE_LOCAL,
            source_version: String::new(),
            start_time,
            status: RunStatus::Running.code(),
            tags: Vec::new(),
            user_id: current_user(),
        };
        write_yaml(&run_dir.join(META_FILE), &meta)?;

        Ok(RunInfo {
            run_id,
            experiment_id: experiment_id.to_string(),
            run_name: run_name.to_string(),
            artifact_uri,
            start_time,
        })
    }

    fn log_param(&self, run: &RunInfo, key: &str, value: &str) -> Result<(), TrackingError> {
        self.write_run_file(run, "params", key, value)
    }

    fn log_metric(&self, run: &RunInfo, metric: &Metric) -> Result<(), TrackingError> {
        let path = self.run_dir(run).join("metrics").join(&metric.key);
        ensure_parent(&path)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| TrackingError::io(&path, e))?;
        writeln!(file, "{} {:?} {}", metric.timestamp, metric.value, metric.step)
            .map_err(|e| TrackingError::io(&path, e))
    }

    fn set_tag(&self, run: &RunInfo, key: &str, value: &str) -> Result<(), TrackingError> {
        self.write_run_file(run, "tags", key, value)
    }

    fn log_artifact(&self, run: &RunInfo, local_path: &Path) -> Result<(), TrackingError> {
        let file_name = local_path.file_name().ok_or_else(|| {
            TrackingError::io(
                local_path,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "artifact has no file name"),
            )
        })?;
        let dest = self.run_dir(run).join("artifacts").join(file_name);
        ensure_parent(&dest)?;
        fs::copy(local_path, &dest).map_err(|e| TrackingError::io(local_path, e))?;
        Ok(())
    }

    fn update_run(
        &self,
        run: &RunInfo,
        status: RunStatus,
        end_time: i64,
    ) -> Result<(), TrackingError> {
        let mut meta = self.read_run(run)?;
        meta.status = status.code();
        meta.end_time = Some(end_time);
        write_yaml(&self.run_dir(run).join(META_FILE), &meta)
    }
}

fn file_uri(path: &Path) -> String {
    format!("file://{}", path.display())
}

fn ensure_parent(path: &Path) -> Result<(), TrackingError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| TrackingError::io(parent, e))?;
    }
    Ok(())
}

fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<T, TrackingError> {
    let content = fs::read_to_string(path).map_err(|e| TrackingError::io(path, e))?;
    serde_yaml_ng::from_str(&content).map_err(|source| TrackingError::Yaml {
        path: path.to_path_buf(),
        source,
    })
}

fn write_yaml<T: Serialize>(path: &Path, value: &T) -> Result<(), TrackingError> {
    let content = serde_yaml_ng::to_string(value).map_err(|source| TrackingError::Yaml {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, content).map_err(|e| TrackingError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::Tracker;
    use pretty_assertions::assert_eq;

    fn store() -> (tempfile::TempDir, FileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("mlruns")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_open_creates_default_experiment() {
        let (_dir, store) = store();
        let meta = store.read_experiment("0").unwrap();
        assert_eq!(meta.name, "Default");
        assert_eq!(meta.lifecycle_stage, "active");
        assert!(meta.artifact_location.starts_with("file:///"));
        assert!(store.root().join(".trash").is_dir());
    }

    #[test]
    fn test_experiments_get_sequential_ids_and_are_found_by_name() {
        let (_dir, store) = store();
        assert_eq!(store.create_experiment("first").unwrap(), "1");
        assert_eq!(store.create_experiment("second").unwrap(), "2");
        assert_eq!(
            store.get_experiment_by_name("second").unwrap(),
            Some("2".to_string())
        );
        assert_eq!(store.get_experiment_by_name("missing").unwrap(), None);
        assert!(matches!(
            store.create_experiment("first"),
            Err(TrackingError::ExperimentExists(_))
        ));
    }

    #[test]
    fn test_experiment_meta_keeps_id_as_string() {
        let (_dir, store) = store();
        store.create_experiment("exp").unwrap();
        let raw = fs::read_to_string(store.root().join("1").join(META_FILE)).unwrap();
        assert!(raw.contains("experiment_id: '1'"), "{raw}");
        assert!(raw.contains("name: exp"), "{raw}");
    }

    #[test]
    fn test_run_records_params_metrics_tags_and_artifacts() {
        let (dir, store) = store();
        let exp = store.create_experiment("exp").unwrap();
        let run = store.create_run(&exp, "r", 1_000).unwrap();
        assert_eq!(run.run_id.len(), 32);

        store.log_param(&run, "dataset", "iris").unwrap();
        let metric = Metric {
            key: "n_rows".to_string(),
            value: 150.0,
            timestamp: 1_234,
            step: 0,
        };
        store.log_metric(&run, &metric).unwrap();
        store.set_tag(&run, "mlflow.runName", "r").unwrap();

        let artifact = dir.path().join("report.json");
        fs::write(&artifact, "{}").unwrap();
        store.log_artifact(&run, &artifact).unwrap();

        let run_dir = store.run_dir(&run);
        assert_eq!(fs::read_to_string(run_dir.join("params/dataset")).unwrap(), "iris");
        assert_eq!(
            fs::read_to_string(run_dir.join("metrics/n_rows")).unwrap(),
            "1234 150.0 0\n"
        );
        assert_eq!(
            fs::read_to_string(run_dir.join("tags/mlflow.runName")).unwrap(),
            "r"
        );
        assert_eq!(
            fs::read_to_string(run_dir.join("artifacts/report.json")).unwrap(),
            "{}"
        );

        let meta = store.read_run(&run).unwrap();
        assert_eq!(meta.status, RunStatus::Running.code());
        assert_eq!(meta.end_time, None);
        assert_eq!(meta.run_uuid, run.run_id);
    }

    #[test]
    fn test_metrics_append_history() {
        let (_dir, store) = store();
        let run = store.create_run("0", "r", 0).unwrap();
        for (timestamp, value) in [(1, 1.0), (2, 2.5)] {
            let metric = Metric {
                key: "loss".to_string(),
                value,
                timestamp,
                step: 0,
            };
            store.log_metric(&run, &metric).unwrap();
        }
        assert_eq!(
            fs::read_to_string(store.run_dir(&run).join("metrics/loss")).unwrap(),
            "1 1.0 0\n2 2.5 0\n"
        );
    }

    #[test]
    fn test_run_in_unknown_experiment_fails() {
        let (_dir, store) = store();
        assert!(matches!(
            store.create_run("42", "r", 0),
            Err(TrackingError::ExperimentNotFound(_))
        ));
    }

    #[test]
    fn test_finished_run_updates_meta() {
        let (_dir, store) = store();
        let run = store.create_run("0", "r", 10).unwrap();
        store.update_run(&run, RunStatus::Finished, 20).unwrap();

        let meta = store.read_run(&run).unwrap();
        assert_eq!(RunStatus::from_code(meta.status), Some(RunStatus::Finished));
        assert_eq!(meta.end_time, Some(20));
    }

    #[test]
    fn test_dropped_run_is_marked_failed() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("mlruns");
        let tracker = Tracker::with_store(Box::new(FileStore::open(&root).unwrap()));
        let exp = tracker.set_experiment("exp").unwrap();

        let info = {
            let run = tracker.start_run(&exp, "r").unwrap();
            run.log_param("dataset", "iris").unwrap();
            run.info().clone()
        };

        let store = FileStore::open(&root).unwrap();
        let meta = store.read_run(&info).unwrap();
        assert_eq!(RunStatus::from_code(meta.status), Some(RunStatus::Failed));
        assert!(meta.end_time.is_some());
    }

    #[test]
    fn test_finished_run_through_tracker() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("mlruns");
        let tracker = Tracker::with_store(Box::new(FileStore::open(&root).unwrap()));
        let exp = tracker.set_experiment("exp").unwrap();
        assert_eq!(tracker.set_experiment("exp").unwrap(), exp);

        let run = tracker.start_run(&exp, "r").unwrap();
        let info = run.info().clone();
        run.finish().unwrap();

        let store = FileStore::open(&root).unwrap();
        let meta = store.read_run(&info).unwrap();
        assert_eq!(RunStatus::from_code(meta.status), Some(RunStatus::Finished));
        assert_eq!(
            fs::read_to_string(store.run_dir(&info).join("tags/mlflow.runName")).unwrap(),
            "r"
        );
    }
}
