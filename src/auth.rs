//! # auth: API Key Middleware
//!
//! Guards the admin surface with an `X-API-Key` header.
//!
//! ## Mode
//! - `API_KEY` unset (or empty) → **Allow All** (dev mode, like the legacy bot)
//! - `API_KEY` set → every request needs `X-API-Key: <key>`, or
//!   `?api_key=<key>` (URL-encoded) for browsers opening the live-feed
//!   WebSocket
//!
//! ## Exempt
//! `/health`

use std::collections::HashMap;

use axum::{
    body::Body,
    extract::{Query, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use tracing::warn;

use crate::state::SharedState;

pub async fn require_api_key(
    State(state): State<SharedState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let expected = state.settings.api_key.as_str();

    // ── Dev Mode: no API_KEY → everything passes ──────────────────────────────
    if expected.is_empty() {
        return next.run(request).await;
    }

    let path = request.uri().path();
    if path == "/health" {
        return next.run(request).await;
    }

    let header = request
        .headers()
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok());
    let query = Query::<HashMap<String, String>>::try_from_uri(request.uri())
        .ok()
        .and_then(|Query(mut params)| params.remove("api_key"));

    if header == Some(expected) || query.as_deref() == Some(expected) {
        next.run(request).await
    } else {
        warn!(path, "❌ Unauthorized request: invalid or missing X-API-Key");
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "ok":    false,
                "error": "Unauthorized: invalid or missing X-API-Key header",
                "hint":  "Set X-API-Key header with your API key"
            })),
        )
            .into_response()
    }
}
