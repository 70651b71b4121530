//! Error handling for the pulse CLI

use thiserror::Error;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;

/// CLI-specific errors
#[derive(Error, Debug)]
pub enum CliError {
    /// Kernel rejected the network or failed while running
    #[error("Runtime error: {0}")]
    Runtime(#[from] pulse_runtime::RuntimeError),

    /// Network file is well-formed TOML but describes an unusable network
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Network file is not valid TOML for the expected layout
    #[error("Parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON output could not be written
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error
    #[error("{0:#}")]
    Generic(#[from] anyhow::Error),
}

impl CliError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
