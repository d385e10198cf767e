//! API error taxonomy and JSON rendering.
//!
//! Cross-tenant access deliberately maps to [`ApiError::NotFound`] rather
//! than a 403 so that another owner's entities are indistinguishable from
//! absent ones.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::query::ValidationErrors;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("authentication required")]
    Unauthorized,

    #[error("record not found")]
    NotFound,

    #[error("{0}")]
    BadRequest(String),

    /// Aggregated per-field validation failures — every offending field is
    /// reported in one response.
    #[error("validation failed")]
    Validation(ValidationErrors),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<ValidationErrors> for ApiError {
    fn from(errors: ValidationErrors) -> Self {
        ApiError::Validation(errors)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                json!({ "message": "Unauthenticated." }),
            ),
            ApiError::NotFound => (
                StatusCode::NOT_FOUND,
                json!({ "message": "Record not found." }),
            ),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, json!({ "message": message })),
            ApiError::Validation(errors) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({ "message": "Validation failed.", "errors": errors }),
            ),
            ApiError::Internal(e) => {
                error!(err = %e, "internal error while handling request");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "message": "Internal server error.", "error": e.to_string() }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}
