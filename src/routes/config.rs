//! # routes::config
//!
//! Config read / hot-reload endpoints.
//!
//! | Method | Path          | Description                                        |
//! |--------|---------------|----------------------------------------------------|
//! | GET    | `/api/config` | Current config snapshot                            |
//! | PUT    | `/api/config` | Replace the whole config (JSON body)               |
//! | POST   | `/config`     | Replace the whole config (form field `jsonConfig`) |
//!
//! A rejected payload leaves the active config and the file on disk as they
//! were and returns the reason.

use axum::{extract::State, response::IntoResponse, Form, Json};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::{error::AppError, events::BotEvent, state::SharedState};

// ─── GET /api/config ──────────────────────────────────────────────────────────

pub async fn get_config(State(state): State<SharedState>) -> impl IntoResponse {
    let config = state.current_config().await;
    Json(json!({ "ok": true, "config": *config }))
}

// ─── PUT /api/config ──────────────────────────────────────────────────────────

/// Body is taken raw so malformed JSON is reported as a config error
/// rather than an extractor rejection.
pub async fn put_config(
    State(state): State<SharedState>,
    body: String,
) -> Result<impl IntoResponse, AppError> {
    apply(&state, &body).await
}

// ─── POST /config ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ConfigForm {
    #[serde(rename = "jsonConfig")]
    pub json_config: String,
}

pub async fn post_config_form(
    State(state): State<SharedState>,
    Form(form): Form<ConfigForm>,
) -> Result<impl IntoResponse, AppError> {
    apply(&state, &form.json_config).await
}

async fn apply(state: &SharedState, raw: &str) -> Result<Json<serde_json::Value>, AppError> {
    let config = state.config.reload_json(raw).await?;

    state.events.publish(BotEvent::ConfigUpdated {
        pairs: config.tracked_pairs.len(),
    });
    info!(pairs = config.tracked_pairs.len(), "🛠️ [CONFIG] New config installed");

    Ok(Json(json!({
        "ok":      true,
        "config":  *config,
        "message": "Config updated, takes effect from the next cycle.",
    })))
}
