use axum::body::Bytes;
use serde::de::DeserializeOwned;
use tracker::models::UserId;

use crate::error::AppError;

/// Decodes a JSON request body, reporting serde's message on failure.
pub fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, AppError> {
    serde_json::from_slice(body).map_err(|e| AppError::MalformedPayload(e.to_string()))
}

pub fn require_user(user: Option<UserId>) -> Result<UserId, AppError> {
    match user {
        Some(user) if !user.as_str().trim().is_empty() => Ok(user),
        _ => Err(AppError::UserRequired),
    }
}
