//! MLflow tracking server client over the REST API.

use std::fs;
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::{Metric, RunInfo, RunStatus, TrackingStore};
use crate::error::TrackingError;

const API_PREFIX: &str = "api/2.0/mlflow";
const ARTIFACTS_PREFIX: &str = "api/2.0/mlflow-artifacts/artifacts";
const PROXIED_ARTIFACT_SCHEME: &str = "mlflow-artifacts:";
const RESOURCE_DOES_NOT_EXIST: &str = "RESOURCE_DOES_NOT_EXIST";

/// Client for a remote tracking server.
#[derive(Debug, Clone)]
pub struct RestStore {
    base_url: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    error_code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct GetExperimentResponse {
    experiment: ExperimentBody,
}

#[derive(Debug, Deserialize)]
struct ExperimentBody {
    experiment_id: String,
}

#[derive(Debug, Deserialize)]
struct CreateExperimentResponse {
    experiment_id: String,
}

#[derive(Debug, Serialize)]
struct CreateRunRequest<'a> {
    experiment_id: &'a str,
    run_name: &'a str,
    start_time: i64,
}

#[derive(Debug, Deserialize)]
struct CreateRunResponse {
    run: RunBody,
}

#[derive(Debug, Deserialize)]
struct RunBody {
    info: RunInfoBody,
}

#[derive(Debug, Deserialize)]
struct RunInfoBody {
    run_id: String,
    experiment_id: String,
    #[serde(default)]
    run_name: String,
    artifact_uri: String,
    #[serde(default)]
    start_time: i64,
}

impl RestStore {
    pub fn new(base_url: &str) -> Result<Self, TrackingError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn endpoint_url(&self, endpoint: &str) -> String {
        format!("{}/{API_PREFIX}/{endpoint}", self.base_url)
    }

    fn post<B: Serialize, R: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<R, TrackingError> {
        debug!(endpoint, "POST");
        let response = self
            .client
            .post(self.endpoint_url(endpoint))
            .json(body)
            .send()?;
        Ok(check_status(endpoint, response)?.json()?)
    }
}

impl TrackingStore for RestStore {
    fn get_experiment_by_name(&self, name: &str) -> Result<Option<String>, TrackingError> {
        let endpoint = "experiments/get-by-name";
        let response = self
            .client
            .get(self.endpoint_url(endpoint))
            .query(&[("experiment_name", name)])
            .send()?;

        match check_status(endpoint, response) {
            Ok(response) => {
                let body: GetExperimentResponse = response.json()?;
                Ok(Some(body.experiment.experiment_id))
            }
            Err(TrackingError::Api { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Ok(None)
            }
            Err(TrackingError::Api { ref message, .. })
                if message.starts_with(RESOURCE_DOES_NOT_EXIST) =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn create_experiment(&self, name: &str) -> Result<String, TrackingError> {
        let body: CreateExperimentResponse =
            self.post("experiments/create", &json!({ "name": name }))?;
        Ok(body.experiment_id)
    }

    fn create_run(
        &self,
        experiment_id: &str,
        run_name: &str,
        start_time: i64,
    ) -> Result<RunInfo, TrackingError> {
        let request = CreateRunRequest {
            experiment_id,
            run_name,
            start_time,
        };
        let body: CreateRunResponse = self.post("runs/create", &request)?;
        let info = body.run.info;
        Ok(RunInfo {
            run_id: info.run_id,
            experiment_id: info.experiment_id,
            run_name: if info.run_name.is_empty() {
                run_name.to_string()
            } else {
                info.run_name
            },
            artifact_uri: info.artifact_uri,
            start_time: if info.start_time == 0 {
                start_time
            } else {
                info.start_time
            },
        })
    }

    fn log_param(&self, run: &RunInfo, key: &str, value: &str) -> Result<(), TrackingError> {
        let _: IgnoredAny = self.post(
            "runs/log-parameter",
            &json!({ "run_id": run.run_id, "key": key, "value": value }),
        )?;
        Ok(())
    }

    fn log_metric(&self, run: &RunInfo, metric: &Metric) -> Result<(), TrackingError> {
        let _: IgnoredAny = self.post(
            "runs/log-metric",
            &json!({
                "run_id": run.run_id,
                "key": metric.key,
                "value": metric.value,
                "timestamp": metric.timestamp,
                "step": metric.step,
            }),
        )?;
        Ok(())
    }

    fn set_tag(&self, run: &RunInfo, key: &str, value: &str) -> Result<(), TrackingError> {
        let _: IgnoredAny = self.post(
            "runs/set-tag",
            &json!({ "run_id": run.run_id, "key": key, "value": value }),
        )?;
        Ok(())
    }

    fn log_artifact(&self, run: &RunInfo, local_path: &Path) -> Result<(), TrackingError> {
        let file_name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| TrackingError::UnsupportedArtifactUri(local_path.display().to_string()))?;
        let path = artifact_request_path(&run.artifact_uri, &file_name)?;
        let url = format!("{}/{ARTIFACTS_PREFIX}/{path}", self.base_url);
        let content = fs::read(local_path).map_err(|e| TrackingError::io(local_path, e))?;

        debug!(url = %url, bytes = content.len(), "PUT artifact");
        let response = self.client.put(url).body(content).send()?;
        check_status("mlflow-artifacts/artifacts", response)?;
        Ok(())
    }

    fn update_run(
        &self,
        run: &RunInfo,
        status: RunStatus,
        end_time: i64,
    ) -> Result<(), TrackingError> {
        let _: IgnoredAny = self.post(
            "runs/update",
            &json!({
                "run_id": run.run_id,
                "status": status.as_str(),
                "end_time": end_time,
            }),
        )?;
        Ok(())
    }
}

/// Turns a non-success response into [`TrackingError::Api`].
fn check_status(endpoint: &str, response: Response) -> Result<Response, TrackingError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().unwrap_or_default();
    Err(api_error(endpoint, status.as_u16(), &text))
}

fn api_error(endpoint: &str, status: u16, body: &str) -> TrackingError {
    let message = match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(err) if !err.error_code.is_empty() => format!("{}: {}", err.error_code, err.message),
        Ok(err) if !err.message.is_empty() => err.message,
        _ => body.chars().take(200).collect(),
    };
    TrackingError::Api {
        endpoint: endpoint.to_string(),
        status,
        message,
    }
}

/// Maps a proxied artifact root plus file name to the artifact service path,
/// e.g. `mlflow-artifacts:/1/<run>/artifacts` + `a.csv` -> `1/<run>/artifacts/a.csv`.
fn artifact_request_path(artifact_uri: &str, file_name: &str) -> Result<String, TrackingError> {
    let rest = artifact_uri
        .strip_prefix(PROXIED_ARTIFACT_SCHEME)
        .ok_or_else(|| TrackingError::UnsupportedArtifactUri(artifact_uri.to_string()))?;

    // `mlflow-artifacts://host:port/path` carries an authority before the path.
    let path = match rest.strip_prefix("//") {
        Some(with_host) => with_host.split_once('/').map_or("", |(_, p)| p),
        None => rest,
    };
    let path = path.trim_matches('/');

    if path.is_empty() {
        Ok(file_name.to_string())
    } else {
        Ok(format!("{path}/{file_name}"))
    }
}
