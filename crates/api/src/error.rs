//! HTTP error mapping

use alerting::AlertError;
use auth::AuthError;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use data_validator::{FieldError, ValidationErrors};
use serde_json::json;
use storage::StorageError;
use thiserror::Error;
use tracing::{error, warn};

/// Errors returned by handlers
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Validation failed")]
    Validation(Vec<FieldError>),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        ApiError::Validation(vec![FieldError::new(field, message)])
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            ApiError::Unauthorized(message) => json!({ "error": "unauthorized", "message": message }),
            ApiError::Forbidden(message) => json!({ "error": "forbidden", "message": message }),
            ApiError::Validation(details) => json!({ "error": "validation", "details": details }),
            ApiError::NotFound(message) => json!({ "error": "not_found", "message": message }),
            ApiError::Internal(cause) => {
                error!("Request failed: {}", cause);
                json!({ "error": "internal", "message": "Internal server error" })
            }
        };

        (status, Json(body)).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound { kind, id } => ApiError::NotFound(format!("{} {}", kind, id)),
            StorageError::Conflict { field, message } => ApiError::validation(field, message),
            StorageError::InvalidReference { field, kind, id } => {
                ApiError::validation(field, format!("unknown {} {}", kind, id))
            }
            StorageError::DatabaseError(cause) => ApiError::Internal(cause),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Store(cause) => ApiError::Internal(cause),
            e if e.is_unauthenticated() => ApiError::Unauthorized(e.to_string()),
            e => {
                warn!("Access denied: {}", e);
                ApiError::Forbidden(e.to_string())
            }
        }
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(e: ValidationErrors) -> Self {
        ApiError::Validation(e.field_errors())
    }
}

impl From<AlertError> for ApiError {
    fn from(e: AlertError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::validation("body", rejection.body_text())
    }
}
