//! `tracing` subscriber installation.
//!
//! The library itself only emits `tracing` events. Binaries and tests that
//! want output call [`init_tracing`] once.

use crate::errors::WebtestError;
use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when neither an explicit filter nor `RUST_LOG` is given.
pub const DEFAULT_FILTER: &str = "webtestflow=info";

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable compact lines on stderr.
    #[default]
    Pretty,
    /// One JSON object per line on stderr.
    Json,
}

/// Installs the global `tracing` subscriber.
///
/// `filter` takes precedence over `RUST_LOG`; with neither set,
/// [`DEFAULT_FILTER`] applies.
///
/// # Errors
///
/// Returns [`WebtestError::Config`] if the filter does not parse or a global
/// subscriber is already installed.
pub fn init_tracing(format: LogFormat, filter: Option<&str>) -> Result<(), WebtestError> {
    let filter = match filter {
        Some(directives) => EnvFilter::try_new(directives)
            .map_err(|e| WebtestError::Config(format!("invalid log filter '{directives}': {e}")))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
    };

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match format {
        LogFormat::Pretty => registry
            .with(fmt::layer().with_writer(std::io::stderr).compact())
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().with_writer(std::io::stderr).json())
            .try_init(),
    };
    installed.map_err(|e| WebtestError::Config(format!("tracing already initialized: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter_is_rejected() {
        let err = init_tracing(LogFormat::Pretty, Some("webtestflow=verbose")).unwrap_err();
        assert!(matches!(err, WebtestError::Config(_)));
    }

    #[test]
    fn test_log_format_serde() {
        let format: LogFormat = serde_json::from_str("\"json\"").unwrap();
        assert_eq!(format, LogFormat::Json);
        assert_eq!(LogFormat::default(), LogFormat::Pretty);
    }
}
