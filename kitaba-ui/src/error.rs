//! Error types for kitaba-ui
//!
//! Every error is converted to user-visible text at the boundary where it
//! occurs; HTTP handlers return it as `{ "error": message }`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::inference::InferenceError;
use crate::session::AuthError;
use crate::store::StoreError;

/// Main error type for kitaba-ui
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Auth provider errors
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Document store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Remote inference errors
    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),

    /// No subject is signed in
    #[error("No active session")]
    NoSession,

    /// History persistence is unavailable for this process
    #[error("History persistence is disabled")]
    PersistenceDisabled,

    /// Caller is not allowed to perform the operation
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Errors from the common crate (config, database bootstrap)
    #[error(transparent)]
    Common(#[from] kitaba_common::Error),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience Result type using kitaba-ui Error
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) | Error::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            Error::Forbidden(_) | Error::Store(StoreError::PermissionDenied(_)) => {
                StatusCode::FORBIDDEN
            }
            Error::NoSession | Error::PersistenceDisabled => StatusCode::CONFLICT,
            Error::Auth(AuthError::InvalidToken) => StatusCode::UNAUTHORIZED,
            Error::Inference(_) => StatusCode::BAD_GATEWAY,
            Error::Auth(_) | Error::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Config(_) | Error::Common(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        } else {
            tracing::debug!("Request rejected: {}", self);
        }

        let body = Json(json!({
            "error": self.to_string(),
        }));

        (status, body).into_response()
    }
}
