use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::format::sanitize_error;

/// Terminal and rejection outcomes of a transfer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransferError {
    /// Every slot is taken; nothing was started.
    #[error("all {max} download slots are busy")]
    AdmissionRejected { max: usize },

    #[error("could not resolve media: {0}")]
    ResolutionFailed(String),

    /// Download or upload failed part-way.
    #[error("{0}")]
    TransferFailed(String),

    /// The backend finished but the expected file is not on disk.
    #[error("Downloaded file not found.")]
    OutputMissing,

    /// User-initiated; not a failure.
    #[error("transfer cancelled")]
    Cancelled,
}

impl TransferError {
    /// One line safe to show in chat.
    pub fn user_message(&self) -> String {
        match self {
            Self::TransferFailed(message) | Self::ResolutionFailed(message) => {
                sanitize_error(message)
            }
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Process and HTTP-level failures.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::internal(format!("Invalid configuration: {}", message.into()))
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.status)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}
