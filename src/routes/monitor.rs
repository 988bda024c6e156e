//! # routes::monitor
//!
//! **Live feed** and status endpoints.
//!
//! | Method    | Path                   | Description                          |
//! |-----------|------------------------|--------------------------------------|
//! | GET (WS)  | `/ws`                  | Real-time narration stream           |
//! | GET       | `/api/monitor/targets` | Price Target Store snapshot          |
//! | GET       | `/api/monitor/report`  | Last cycle report                    |
//! | GET       | `/api/monitor/stats`   | Cycle count, listeners, uptime       |
//! | GET       | `/health`              | Liveness                             |

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use tracing::{debug, info};

use crate::{error::AppError, events::Delivery, models::PriceTarget, state::SharedState};

// ─── WebSocket Handler ────────────────────────────────────────────────────────

/// Upgrade HTTP → WebSocket and subscribe to the narration bus.
///
/// The client first receives a `CONNECTED` frame and a `CONFIG` frame with
/// the active config, then one JSON text frame per narration.
pub async fn ws_feed(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: SharedState) {
    // Subscribe before the greeting so nothing published meanwhile is lost.
    let mut sub = state.events.subscribe();
    let (mut sender, mut receiver) = socket.split();

    info!(listener = %sub.id(), "🔌 Live feed listener connected");

    let config = state.current_config().await;
    let greeting = [
        json!({ "event": "CONNECTED", "clock": Utc::now().format("%H:%M").to_string() }),
        json!({ "event": "CONFIG", "config": *config }),
    ];
    for frame in greeting {
        if sender.send(Message::Text(frame.to_string().into())).await.is_err() {
            state.events.unsubscribe(sub);
            return;
        }
    }

    // ── Event Loop ────────────────────────────────────────────────────────────
    loop {
        tokio::select! {
            delivery = sub.recv() => {
                let frame = match delivery {
                    Some(Delivery::Message(narration)) => narration.to_json(),
                    Some(Delivery::Missed(n)) => {
                        debug!(listener = %sub.id(), missed = n, "Live feed listener lagged");
                        json!({ "event": "LAGGED", "missed": n }).to_string()
                    }
                    None => break,
                };
                if sender.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }

            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sender.send(Message::Pong(data)).await;
                    }
                    _ => {}
                }
            }
        }
    }

    info!(listener = %sub.id(), "🔌 Live feed listener disconnected");
    state.events.unsubscribe(sub);
}

// ─── REST Monitoring Endpoints ────────────────────────────────────────────────

/// GET /api/monitor/targets
pub async fn get_targets(State(state): State<SharedState>) -> impl IntoResponse {
    let snapshot = state.targets.snapshot().await;
    let targets: BTreeMap<&str, &PriceTarget> = snapshot
        .iter()
        .map(|(key, target)| (key.as_str(), target.as_ref()))
        .collect();

    Json(json!({
        "ok":      true,
        "count":   targets.len(),
        "targets": targets,
    }))
}

/// GET /api/monitor/report
pub async fn get_report(
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, AppError> {
    let guard = state.last_report.read().await;
    match guard.as_ref() {
        Some(report) => Ok(Json(json!({ "ok": true, "report": report }))),
        None => Err(AppError::NotFound("No cycle has completed yet.".into())),
    }
}

/// GET /api/monitor/stats
pub async fn get_stats(State(state): State<SharedState>) -> impl IntoResponse {
    let uptime_secs = Utc::now()
        .signed_duration_since(state.started_at)
        .num_seconds();

    Json(json!({
        "ok":          true,
        "cycle_count": state.cycle_count.load(Ordering::Relaxed),
        "listeners":   state.events.listener_count(),
        "sell_route":  state.settings.sell_route,
        "uptime_secs": uptime_secs,
    }))
}

/// GET /health
pub async fn health_check() -> impl IntoResponse {
    Json(json!({ "ok": true, "service": "wallkeeper" }))
}
