//! # error
//!
//! Centralised HTTP error type.
//!
//! Every handler returns `Result<_, AppError>`.  Axum's `IntoResponse` impl
//! converts these into structured JSON error bodies so the dashboard always
//! gets a machine-readable response even on failure.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum AppError {
    /// A config reload was rejected; the previous config is still active.
    #[error("Config rejected: {0}")]
    ConfigRejected(#[from] ConfigError),

    /// The requested resource (e.g. a cycle report) does not exist yet.
    #[error("Not found: {0}")]
    NotFound(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::ConfigRejected(err @ ConfigError::Persist { .. }) => {
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
            AppError::ConfigRejected(err) => (StatusCode::BAD_REQUEST, err.to_string()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
        };

        let body = Json(json!({
            "ok":    false,
            "error": message,
        }));

        (status, body).into_response()
    }
}
