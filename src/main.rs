//! data-validation: CLI entry point.
//!
//! Validates a dataset and records the result as a tracked run.

use std::path::PathBuf;

use clap::Parser;
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use data_validation::config::{
    RunnerConfig, DEFAULT_EXPERIMENT, DEFAULT_OUTPUT_DIR, DEFAULT_RUN_NAME,
};
use data_validation::dataset::{DatasetSource, DEFAULT_LABEL_COLUMN};
use data_validation::runner::run_validation;
use data_validation::tracking::{TrackingUri, DEFAULT_TRACKING_URI, TRACKING_URI_ENV};

#[derive(Parser)]
#[command(name = "data-validation")]
#[command(about = "Validate a dataset and record it as an MLflow run")]
#[command(version)]
struct Cli {
    /// Directory receiving the raw table and the report.
    #[arg(short, long, default_value = DEFAULT_OUTPUT_DIR)]
    output_dir: PathBuf,

    /// Tracking store: a local directory, `file:` URI, or `http(s)://` server.
    #[arg(long, env = TRACKING_URI_ENV, default_value = DEFAULT_TRACKING_URI)]
    tracking_uri: String,

    /// Experiment name, created if absent.
    #[arg(short, long, default_value = DEFAULT_EXPERIMENT)]
    experiment: String,

    /// Run name.
    #[arg(long, default_value = DEFAULT_RUN_NAME)]
    run_name: String,

    /// CSV file to validate instead of the bundled reference dataset.
    #[arg(short, long)]
    dataset: Option<PathBuf>,

    /// Label column of `--dataset`.
    #[arg(short, long, default_value = DEFAULT_LABEL_COLUMN)]
    label: String,

    /// Value logged as the `dataset` param. Defaults to the file stem of `--dataset`.
    #[arg(long, requires = "dataset")]
    dataset_name: Option<String>,

    /// Raw table is written as `raw_<STEM>.csv`. Defaults to the file stem of `--dataset`.
    #[arg(long, requires = "dataset")]
    file_stem: Option<String>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let source = cli.dataset.map_or_else(DatasetSource::default, |path| {
        DatasetSource::Csv {
            path,
            label_column: cli.label.clone(),
            name: cli.dataset_name.clone(),
            file_stem: cli.file_stem.clone(),
        }
    });

    let config = RunnerConfig {
        output_dir: cli.output_dir,
        tracking_uri: TrackingUri::parse(&cli.tracking_uri)?,
        experiment_name: cli.experiment,
        run_name: cli.run_name,
        source,
    };

    let outcome = run_validation(&config)?;

    println!(
        "{} Saved raw -> {}",
        "[OK]".green(),
        outcome.raw_path.display()
    );
    println!(
        "{} Saved report -> {}",
        "[OK]".green(),
        outcome.report_path.display()
    );
    println!(
        "     Run {} in experiment {} ({})",
        outcome.run_id.dimmed(),
        outcome.experiment_id,
        config.tracking_uri
    );

    Ok(())
}
