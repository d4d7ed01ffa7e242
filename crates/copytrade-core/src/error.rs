//! Error types for the copy-trading engine core.

use thiserror::Error;

/// Coarse error kinds, matching the taxonomy the risk gate and executor
/// classify failures into (transport, validation, rejection, ...).
#[derive(Error, Debug)]
pub enum Error {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("state could not be parsed: {0}")]
    StateCorruption(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("API error: {message}")]
    Api { message: String, status: Option<u16> },
}

pub type Result<T> = std::result::Result<T, Error>;
