use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::models::package::PackageStatus;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("cannot move package from {current} to {requested}")]
    InvalidTransition {
        current: PackageStatus,
        requested: PackageStatus,
    },

    #[error("booking and shipment views disagree for {tracking_number}: {booking} vs {shipment}")]
    SyncConflict {
        tracking_number: String,
        booking: PackageStatus,
        shipment: PackageStatus,
    },

    #[error("verification code does not match")]
    CodeMismatch,

    #[error("verification code has expired")]
    CodeExpired,

    #[error("package is already assigned to another driver")]
    AlreadyAssigned,

    #[error("package was modified concurrently; refetch and retry")]
    ConcurrentModification,

    #[error("evidence storage failed: {0}")]
    EvidenceStorage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidTransition { .. }
            | AppError::CodeMismatch
            | AppError::CodeExpired => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::SyncConflict { .. }
            | AppError::AlreadyAssigned
            | AppError::ConcurrentModification => StatusCode::CONFLICT,
            AppError::EvidenceStorage(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}
