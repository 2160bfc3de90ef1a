//! Tracking URI resolution.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::TrackingError;

/// Environment variable selecting the tracking endpoint.
pub const TRACKING_URI_ENV: &str = "MLFLOW_TRACKING_URI";

/// Local directory used when no tracking URI is configured.
pub const DEFAULT_TRACKING_URI: &str = "mlruns";

/// Where runs are recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackingUri {
    /// A file store rooted at a local directory.
    Local(PathBuf),
    /// An MLflow tracking server, base URL without trailing slash.
    Rest(String),
}

impl Default for TrackingUri {
    fn default() -> Self {
        Self::Local(PathBuf::from(DEFAULT_TRACKING_URI))
    }
}

impl TrackingUri {
    /// Parses a tracking URI. Empty input selects the default local store.
    pub fn parse(raw: &str) -> Result<Self, TrackingError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(Self::default());
        }

        if raw.starts_with("http://") || raw.starts_with("https://") {
            return Ok(Self::Rest(raw.trim_end_matches('/').to_string()));
        }

        if let Some(rest) = raw.strip_prefix("file://") {
            let path = rest.strip_prefix("localhost").unwrap_or(rest);
            if !path.starts_with('/') {
                return Err(TrackingError::UnsupportedUri(raw.to_string()));
            }
            return Ok(Self::Local(PathBuf::from(path)));
        }

        if let Some(path) = raw.strip_prefix("file:") {
            return Ok(Self::Local(PathBuf::from(path)));
        }

        if raw == "databricks" || has_scheme(raw) {
            return Err(TrackingError::UnsupportedUri(raw.to_string()));
        }

        Ok(Self::Local(PathBuf::from(raw)))
    }
}

impl FromStr for TrackingUri {
    type Err = TrackingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TrackingUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::Rest(url) => write!(f, "{url}"),
        }
    }
}

/// True for `scheme:` prefixes longer than one character, so that Windows
/// drive letters stay paths.
fn has_scheme(raw: &str) -> bool {
    let Some((scheme, _)) = raw.split_once(':') else {
        return false;
    };
    scheme.len() > 1
        && scheme.starts_with(|c: char| c.is_ascii_alphabetic())
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}
