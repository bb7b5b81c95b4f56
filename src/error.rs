//! Error types shared across the HTTP and socket layers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::protocol::FrameError;

/// Why a socket connection stopped, or why a frame was rejected
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Reading from or writing to the channel failed
    #[error("transport error: {0}")]
    Transport(String),

    /// An inbound frame could not be decoded. Not fatal to the connection.
    #[error("decode error: {0}")]
    Decode(#[from] FrameError),
}

/// Errors returned by the REST routes
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request body is not a JSON object
    #[error("invalid request body: {0}")]
    InvalidBody(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::InvalidBody(_) => StatusCode::BAD_REQUEST,
        };

        let body = serde_json::json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}
