use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};
use tracker::TrackerError;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error(transparent)]
    Invalid(#[from] TrackerError),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("You already confirmed this")]
    AlreadyConfirmed,

    #[error("This case has already been closed")]
    CaseAlreadyClosed,

    #[error("You already joined this search")]
    AlreadyJoined,

    #[error("A signed-in user is required")]
    UserRequired,

    #[error("Service is in read-only mode: data store is not configured")]
    ReadOnly,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    InternalError(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::MalformedPayload(_) | AppError::UserRequired => StatusCode::BAD_REQUEST,
            AppError::Invalid(TrackerError::NotLost) => StatusCode::CONFLICT,
            AppError::Invalid(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::AlreadyConfirmed | AppError::CaseAlreadyClosed | AppError::AlreadyJoined => {
                StatusCode::CONFLICT
            }
            AppError::ReadOnly | AppError::Store(StoreError::Unavailable) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::Store(_) => StatusCode::BAD_GATEWAY,
            AppError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            error!(%status, "{self}");
        } else {
            warn!(%status, "{self}");
        }

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
