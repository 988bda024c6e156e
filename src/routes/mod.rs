//! HTTP surface: live feed, config editing and monitoring.

pub mod config;
pub mod monitor;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{auth::require_api_key, state::SharedState};

use self::config::{get_config, post_config_form, put_config};
use self::monitor::{get_report, get_stats, get_targets, health_check, ws_feed};

pub fn router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Live feed ─────────────────────────────────────────────────────────
        .route("/ws",                   get(ws_feed))
        // ── Config ────────────────────────────────────────────────────────────
        .route("/api/config",           get(get_config).put(put_config))
        .route("/config",               post(post_config_form))
        // ── Monitor ───────────────────────────────────────────────────────────
        .route("/api/monitor/targets",  get(get_targets))
        .route("/api/monitor/report",   get(get_report))
        .route("/api/monitor/stats",    get(get_stats))
        .route("/health",               get(health_check))
        // ── Middleware ────────────────────────────────────────────────────────
        .layer(middleware::from_fn_with_state(state.clone(), require_api_key))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
