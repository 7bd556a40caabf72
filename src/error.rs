//! HTTP-facing error taxonomy.

use crate::application::catalog::CatalogError;
use crate::application::gate::AdmissionRejection;
use crate::application::task_registry::RegistryError;
use crate::domain::{BatchError, ClipIdError};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("Authentication failed")]
    Authentication,
    #[error("Rate limit exceeded")]
    RateLimitExceeded,
    #[error("{0}")]
    NotFound(String),
    #[error("Request body too large")]
    PayloadTooLarge,
    #[error("{0}")]
    UpstreamUnavailable(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Authentication => StatusCode::UNAUTHORIZED,
            ApiError::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "request failed");
        }
        let body = Json(json!({ "success": false, "error": self.to_string() }));
        (status, body).into_response()
    }
}

impl From<AdmissionRejection> for ApiError {
    fn from(rejection: AdmissionRejection) -> Self {
        match rejection {
            AdmissionRejection::RateLimited => ApiError::RateLimitExceeded,
            AdmissionRejection::Unauthenticated => ApiError::Authentication,
        }
    }
}

impl From<ClipIdError> for ApiError {
    fn from(err: ClipIdError) -> Self {
        ApiError::Validation(format!("Invalid clip ID: {}", err))
    }
}

impl From<BatchError> for ApiError {
    fn from(err: BatchError) -> Self {
        ApiError::Validation(err.to_string())
    }
}

impl From<CatalogError> for ApiError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::Unavailable => ApiError::UpstreamUnavailable(err.to_string()),
            CatalogError::ConfirmationRequired => ApiError::Validation(err.to_string()),
            CatalogError::Listing(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(_) => ApiError::NotFound("Task not found".to_string()),
            RegistryError::IdSpaceExhausted => ApiError::Internal(err.to_string()),
        }
    }
}
