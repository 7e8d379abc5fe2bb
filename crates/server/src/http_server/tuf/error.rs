use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use common::validation::ValidationError;

use super::path::PathError;
use crate::auth::AuthError;
use crate::storage::MultiplexError;

#[derive(Debug, thiserror::Error)]
pub enum TufApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Path(#[from] PathError),
    #[error("method not allowed on {0}")]
    MethodNotAllowed(String),
    #[error("invalid upload: {0}")]
    InvalidUpload(String),
    #[error(transparent)]
    Store(#[from] MultiplexError),
}

impl From<ValidationError> for TufApiError {
    fn from(err: ValidationError) -> Self {
        TufApiError::Store(err.into())
    }
}

impl TufApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            TufApiError::Auth(AuthError::Config(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            TufApiError::Auth(_) => StatusCode::UNAUTHORIZED,
            TufApiError::Path(_) => StatusCode::NOT_FOUND,
            TufApiError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            TufApiError::InvalidUpload(_) => StatusCode::BAD_REQUEST,
            TufApiError::Store(e) => match e {
                MultiplexError::NotFound(_) => StatusCode::NOT_FOUND,
                MultiplexError::PrefixNotEligible(_) | MultiplexError::ChannelViolation { .. } => {
                    StatusCode::BAD_REQUEST
                }
                MultiplexError::Validation(ValidationError::Internal { .. }) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
                MultiplexError::Validation(_) => StatusCode::BAD_REQUEST,
                MultiplexError::Forbidden(_) => StatusCode::FORBIDDEN,
                MultiplexError::Conflict(_) => StatusCode::CONFLICT,
                MultiplexError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

fn error_body(code: &str, message: String) -> serde_json::Value {
    serde_json::json!({
        "errors": [{
            "code": code,
            "message": message,
        }]
    })
}

impl IntoResponse for TufApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("TUF ERROR: {:?}", self);
        } else {
            tracing::info!("TUF: request rejected ({}): {}", status, self);
        }

        let body = match &self {
            TufApiError::Store(MultiplexError::Validation(e)) => e.to_body(),
            TufApiError::Store(
                e @ (MultiplexError::PrefixNotEligible(_)
                | MultiplexError::ChannelViolation { .. }),
            ) => ValidationError::InvalidUpdate { msg: e.to_string() }.to_body(),
            TufApiError::InvalidUpload(_) => error_body("INVALID_UPLOAD", self.to_string()),
            TufApiError::Auth(_) if status == StatusCode::UNAUTHORIZED => {
                error_body("UNAUTHORIZED", self.to_string())
            }
            TufApiError::Path(_) | TufApiError::Store(MultiplexError::NotFound(_)) => {
                error_body("METADATA_UNKNOWN", self.to_string())
            }
            TufApiError::MethodNotAllowed(_) => error_body("UNSUPPORTED", self.to_string()),
            TufApiError::Store(MultiplexError::Forbidden(_)) => {
                error_body("DENIED", self.to_string())
            }
            TufApiError::Store(MultiplexError::Conflict(_)) => {
                error_body("CONFLICT", self.to_string())
            }
            _ => error_body("UNKNOWN", "internal server error".to_string()),
        };

        (status, Json(body)).into_response()
    }
}
