use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Login failed: {0}")]
    LoginFailed(String),

    #[error("Renewal failed for token with accessor {accessor}: {message}")]
    RenewalFailed { accessor: String, message: String },

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Configure failed: {0}")]
    ConfigureFailed(String),

    #[error("Timed out after {waited:?} waiting for a usable token")]
    ReadinessTimeout { waited: Duration },

    #[error("Token manager has shut down")]
    ManagerGone,

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
