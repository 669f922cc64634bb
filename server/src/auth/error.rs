//! Authentication Error Types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::db::{CommitPolicy, StoreError};

/// One-time code check failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CodeError {
    #[error("Code is empty")]
    Empty,

    #[error("Previous code not found, request new code")]
    NotFound,

    /// Wrong code, or a code that was already used.
    #[error("Code is invalid")]
    Invalid,

    #[error("Code is expired, request new code")]
    Expired,
}

/// Authentication error types.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Malformed or missing caller input.
    #[error("{0}")]
    Validation(String),

    /// Duplicate account or username.
    #[error("{0}")]
    Conflict(String),

    /// Resource not found.
    #[error("{0}")]
    NotFound(String),

    /// Any authentication failure. Deliberately coarse.
    #[error("Could not validate credentials")]
    CredentialsInvalid,

    /// Verification or recovery code rejected.
    #[error(transparent)]
    Code(#[from] CodeError),

    /// Mail or OAuth provider failure.
    #[error("Upstream service failed: {0}")]
    Transport(String),

    /// Password hashing error.
    #[error("Password processing failed")]
    PasswordHash,

    /// Store failure.
    #[error("Database error")]
    Store(StoreError),

    /// Internal server error.
    #[error("Internal server error")]
    Internal(String),
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Constraint(constraint) => {
                tracing::debug!(%constraint, "Write rejected by constraint");
                Self::Conflict("Account already exists".to_string())
            }
            other => Self::Store(other),
        }
    }
}

impl CommitPolicy for AuthError {
    fn commit_on_error(&self) -> bool {
        matches!(self, Self::Code(CodeError::Expired))
    }
}

/// Error response body for JSON responses.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Machine-readable error code.
    pub error: String,
    /// Human-readable error message.
    pub message: String,
}

impl AuthError {
    /// HTTP status and machine-readable code.
    pub(crate) fn status(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            Self::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::CredentialsInvalid => (StatusCode::UNAUTHORIZED, "INVALID_CREDENTIALS"),
            Self::Code(CodeError::NotFound) => (StatusCode::NOT_FOUND, "CODE_NOT_FOUND"),
            Self::Code(CodeError::Empty) => (StatusCode::BAD_REQUEST, "CODE_EMPTY"),
            Self::Code(CodeError::Invalid) => (StatusCode::BAD_REQUEST, "CODE_INVALID"),
            Self::Code(CodeError::Expired) => (StatusCode::BAD_REQUEST, "CODE_EXPIRED"),
            Self::Transport(_) => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR"),
            Self::PasswordHash | Self::Store(_) | Self::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, code) = self.status();

        if status.is_server_error() {
            tracing::error!(error = ?self, "Request failed");
        }

        let body = Json(ErrorResponse {
            error: code.to_string(),
            message: self.to_string(),
        });

        (status, body).into_response()
    }
}

/// Result type for auth operations.
pub type AuthResult<T> = Result<T, AuthError>;
