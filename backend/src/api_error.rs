use crate::store::StoreError;
use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller is authenticated but lacks the right relationship to the entity.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Caller could not prove who they are.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Player has already been claimed")]
    AlreadyClaimed,

    #[error("Match has already been resolved")]
    AlreadyResolved,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal server error: {0}")]
    InternalServerError(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError::ValidationError(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        ApiError::Conflict(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ApiError::NotFound(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        ApiError::Forbidden(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        ApiError::Unauthorized(msg.into())
    }

    pub fn internal_error(msg: impl Into<String>) -> Self {
        ApiError::InternalServerError(msg.into())
    }

    /// True when the failure came from a store-level abort that is safe to retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Store(e) if e.is_transient())
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        ApiError::ValidationError(errors.to_string())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: u16,
    details: Option<String>,
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::ValidationError(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::AlreadyClaimed => StatusCode::CONFLICT,
            ApiError::AlreadyResolved => StatusCode::CONFLICT,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        // Store and internal failures never leak their cause to the client.
        let (message, details) = match self {
            ApiError::Store(_) => ("Store error".to_string(), None),
            ApiError::InternalServerError(_) => ("Internal server error".to_string(), None),
            ApiError::AlreadyClaimed => (self.to_string(), Some("already_claimed".to_string())),
            ApiError::AlreadyResolved => (self.to_string(), Some("already_resolved".to_string())),
            _ => (self.to_string(), None),
        };

        HttpResponse::build(status).json(ErrorResponse {
            error: message,
            code: status.as_u16(),
            details,
        })
    }
}
