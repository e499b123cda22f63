//! Configuration errors.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("Failed to read config file {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// File extension not recognised
    #[error("Unsupported config format: {0}")]
    UnsupportedFormat(String),

    /// Parse failure
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// Validation failure
    #[error("Invalid configuration: {0}")]
    Validation(String),

    /// Environment override could not be applied
    #[error("Invalid value for {var}: {message}")]
    InvalidOverride {
        /// Environment variable name
        var: String,
        /// Error message
        message: String,
    },
}

impl ConfigError {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create an override error
    pub fn invalid_override(var: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidOverride {
            var: var.into(),
            message: message.into(),
        }
    }
}

impl From<validator::ValidationErrors> for ConfigError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}

impl From<ConfigError> for gateway_core::GovernanceError {
    fn from(error: ConfigError) -> Self {
        Self::configuration(error.to_string())
    }
}
