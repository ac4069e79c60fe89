use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use tracing::{error, warn};

use crate::error::AuditError;

/// [`AuditError`] rendered as an HTTP response
#[derive(Debug)]
pub struct ApiError(pub AuditError);

impl From<AuditError> for ApiError {
    fn from(err: AuditError) -> Self {
        Self(err)
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self(AuditError::Validation(format!(
            "Invalid query parameters: {}",
            rejection.body_text()
        )))
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(AuditError::Validation(format!(
            "Invalid request body: {}",
            rejection.body_text()
        )))
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            AuditError::Validation(_) => StatusCode::BAD_REQUEST,
            AuditError::NotFound(_) => StatusCode::NOT_FOUND,
            AuditError::TamperDetected { .. } => StatusCode::CONFLICT,
            AuditError::Durability(_) => StatusCode::SERVICE_UNAVAILABLE,
            AuditError::Storage(_) | AuditError::Serialization(_) | AuditError::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn message(&self) -> &'static str {
        match &self.0 {
            AuditError::Validation(_) => "Invalid request",
            AuditError::NotFound(_) => "Record not found",
            AuditError::TamperDetected { .. } => "Audit chain integrity check failed",
            AuditError::Durability(_) => "Audit record could not be persisted",
            _ => "Audit ledger error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        } else {
            warn!("Request rejected: {}", self.0);
        }

        let body = serde_json::json!({
            "success": false,
            "message": self.message(),
            "error": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}
