use thiserror::Error;

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Invalid configuration value: {0}")]
    ValidationError(String),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}

/// Errors that can occur when forwarding events to a remote sink
///
/// These never reach the request path; the exporter logs and drops them.
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Sink rejected batch with status {0}")]
    Rejected(u16),

    #[error("Failed to serialize batch: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Sink unavailable: {0}")]
    Unavailable(String),
}
