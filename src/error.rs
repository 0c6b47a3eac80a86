use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("No input audio device found: {0}")]
    NoInputDevice(String),

    #[error("No supported sample rate for input device {device}: tried {tried:?}")]
    UnsupportedRate { device: String, tried: Vec<u32> },

    #[error("Malformed offer: {0}")]
    MalformedOffer(String),

    #[error("Producer closed: {0}")]
    ProducerClosed(&'static str),

    #[error("Device busy [{device}]: {reason}")]
    DeviceBusy { device: String, reason: String },

    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Video error: {0}")]
    VideoError(String),

    #[error("Video device lost [{device}]: {reason}")]
    VideoDeviceLost { device: String, reason: String },

    #[error("Capture timeout on {0}")]
    CaptureTimeout(String),

    #[error("Audio error: {0}")]
    AudioError(String),

    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
}

impl AppError {
    /// Per-frame hiccups that a sender may skip over instead of ending the session
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::CaptureTimeout(_))
    }

    /// Whether the error means the producer has been shut down
    pub fn is_closed(&self) -> bool {
        matches!(self, AppError::ProducerClosed(_))
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::MalformedOffer(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::NoInputDevice(_)
            | AppError::UnsupportedRate { .. }
            | AppError::DeviceBusy { .. }
            | AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Negotiation(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            success: false,
            message: self.to_string(),
        };

        tracing::error!(
            status = status.as_u16(),
            error_message = %body.message,
            "Request failed"
        );

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;
