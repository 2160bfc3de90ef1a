//! data-validation: dataset validation step of an ML pipeline.
//!
//! Loads a reference dataset, writes it to disk together with a validation
//! report, and records both into an MLflow-compatible tracking store.

pub mod config;
pub mod dataset;
pub mod error;
pub mod report;
pub mod runner;
pub mod tracking;
