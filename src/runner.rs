//! The validation runner.
//!
//! Materializes the dataset, derives the report, and records both into a
//! tracking run. Every step either succeeds or aborts the whole run.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::config::{RunnerConfig, SOURCE_NAME};
use crate::dataset::Dataset;
use crate::report::{ValidationReport, REPORT_FILE_NAME};
use crate::tracking::{ActiveRun, Tracker, SOURCE_NAME_TAG};

/// What a completed run produced.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub raw_path: PathBuf,
    pub report_path: PathBuf,
    pub report: ValidationReport,
    pub experiment_id: String,
    pub run_id: String,
}

/// Runs the validation step against the configured tracking store.
pub fn run_validation(config: &RunnerConfig) -> Result<ValidationOutcome> {
    run_validation_with(config, || {
        Tracker::from_uri(&config.tracking_uri)
            .with_context(|| format!("Failed to open tracking store {}", config.tracking_uri))
    })
}

/// Same as [`run_validation`], with the tracker supplied lazily so that it is
/// only opened once the local outputs exist.
pub fn run_validation_with<F>(config: &RunnerConfig, open_tracker: F) -> Result<ValidationOutcome>
where
    F: FnOnce() -> Result<Tracker>,
{
    let output_dir = &config.output_dir;
    fs::create_dir_all(output_dir).with_context(|| {
        format!("Failed to create output directory {}", output_dir.display())
    })?;

    let dataset = config.source.load().context("Failed to load dataset")?;
    info!(
        dataset = dataset.name(),
        rows = dataset.n_rows(),
        cols = dataset.n_cols(),
        "Loaded dataset"
    );

    let raw_path = output_dir.join(dataset.raw_file_name());
    dataset
        .write_csv(&raw_path)
        .with_context(|| format!("Failed to save raw dataset to {}", raw_path.display()))?;

    let report = ValidationReport::from_dataset(&dataset);
    report.check_consistency()?;

    let report_path = output_dir.join(REPORT_FILE_NAME);
    report
        .write_json(&report_path)
        .with_context(|| format!("Failed to save report to {}", report_path.display()))?;
    info!(
        missing_total = report.missing_total,
        labels = report.target_counts.len(),
        "Built validation report"
    );

    let tracker = open_tracker()?;
    let experiment_id = tracker
        .set_experiment(&config.experiment_name)
        .with_context(|| format!("Failed to select experiment '{}'", config.experiment_name))?;

    let run = tracker
        .start_run(&experiment_id, &config.run_name)
        .context("Failed to start tracking run")?;
    record_run(&run, &dataset, &report, &raw_path, &report_path)?;
    let run_id = run.run_id().to_string();
    run.finish().context("Failed to finish tracking run")?;

    Ok(ValidationOutcome {
        raw_path,
        report_path,
        report,
        experiment_id,
        run_id,
    })
}

/// Logs params, metrics, and artifacts. An error here leaves `run` to be
/// dropped, which closes it as failed.
#[allow(clippy::cast_precision_loss)]
fn record_run(
    run: &ActiveRun<'_>,
    dataset: &Dataset,
    report: &ValidationReport,
    raw_path: &Path,
    report_path: &Path,
) -> Result<()> {
    run.set_tag(SOURCE_NAME_TAG, SOURCE_NAME)?;
    run.log_param("dataset", dataset.name())?;
    run.log_param("label_column", dataset.label_column())?;

    run.log_metric("n_rows", report.n_rows as f64)?;
    run.log_metric("n_cols", report.n_cols as f64)?;
    run.log_metric("missing_total", report.missing_total as f64)?;
    for (value, count) in &report.target_counts {
        run.log_metric(&report.label_metric_name(*value), *count as f64)?;
    }

    run.log_artifact(raw_path)
        .with_context(|| format!("Failed to log artifact {}", raw_path.display()))?;
    run.log_artifact(report_path)
        .with_context(|| format!("Failed to log artifact {}", report_path.display()))?;
    Ok(())
}
