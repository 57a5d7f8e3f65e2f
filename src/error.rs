//! Error taxonomy for the relay, bridge, and sync core.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Result type alias for claude-watch operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared by the relay handlers, the bridge, and the sync core.
///
/// Each variant corresponds to one entry in the error taxonomy of the
/// permission-bridge/relay protocol; `error::into_response` maps these to
/// HTTP status codes.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed request body or parameters.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Resource missing or expired (pairing code, pairing id, request id).
    #[error("not found: {0}")]
    NotFound(String),

    /// Compare-and-swap loser after the retry bound was exhausted.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Push provider or KV backend unreachable.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Key exchange or AEAD failure.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Handshake/pong timeout, network unavailable.
    #[error("transport error: {0}")]
    Transport(String),

    /// Code generation retries or outbox capacity exhausted.
    #[error("exhausted: {0}")]
    Exhausted(String),

    /// Operation was cancelled (e.g. `control_cancel_request`).
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML config parsing error.
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// The machine-readable tag used in HTTP error bodies and bridge logs.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::UpstreamUnavailable(_) => "UPSTREAM_UNAVAILABLE",
            Self::Crypto(_) => "CRYPTO",
            Self::Transport(_) => "TRANSPORT",
            Self::Exhausted(_) => "EXHAUSTED",
            Self::Cancelled(_) => "CANCELLED",
            Self::Config(_) | Self::Io(_) | Self::Http(_) | Self::Serialization(_) | Self::Toml(_) => {
                "INTERNAL"
            }
        }
    }

    const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Body shape for relay error responses.
#[derive(serde::Serialize)]
struct ErrorBody {
    error: String,
    tag: &'static str,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody {
            error: self.to_string(),
            tag: self.tag(),
        };
        (status, Json(body)).into_response()
    }
}
