use am43_control::{ConfigError, ControlError};
use ble_proxy_protocol::EnvelopeError;
use thiserror::Error;

/// Errors surfaced by the command-line runner.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config file {path}: {source}")]
    ConfigFile {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("JSON encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Control(#[from] ControlError),

    #[error("invalid device address: {0}")]
    Address(#[from] EnvelopeError),

    #[error("metrics exporter: {0}")]
    Metrics(String),
}
