//! Telemetry errors.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for telemetry operations
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Errors raised by the metrics log and exporters
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Prometheus collector registration or encoding failed
    #[error("Prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),

    /// Metrics log could not be read or written
    #[error("Metrics log I/O error at {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// A metrics log line could not be decoded
    #[error("Invalid metrics record on line {line}: {message}")]
    InvalidRecord {
        /// 1-based line number
        line: usize,
        /// Decoder message
        message: String,
    },

    /// Serialization failure
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl TelemetryError {
    /// Create an I/O error for a path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
