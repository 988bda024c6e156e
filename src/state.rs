//! # state
//!
//! The Wallkeeper **shared application state**: everything the scheduler
//! loop and the HTTP handlers both touch.
//!
//! * `config`: hot-replaceable config snapshot (whole-object swaps only).
//! * `targets`: Price Target Store, written by the scheduler loop alone.
//! * `events`: the narration bus feeding the live feed.
//! * `reconciler`: the only path that mutates the exchange.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::config::{Config, ConfigStore, Settings};
use crate::engine::reconciler::{CycleReport, Reconciler};
use crate::engine::store::PriceTargetStore;
use crate::events::EventBus;
use crate::exchange::SharedExchange;
use crate::market::SharedMarketData;

// ─── AppState ─────────────────────────────────────────────────────────────────

/// Top-level shared state injected into every Axum handler and the scheduler.
pub struct AppState {
    pub settings:    Arc<Settings>,
    pub config:      ConfigStore,
    pub targets:     PriceTargetStore,
    pub events:      EventBus,
    pub market:      SharedMarketData,
    pub reconciler:  Reconciler,

    // ── Metrics ───────────────────────────────────────────────────────────────
    pub cycle_count: AtomicU64,
    pub last_report: RwLock<Option<CycleReport>>,
    pub started_at:  DateTime<Utc>,
}

impl AppState {
    pub fn new(
        settings: Settings,
        config:   ConfigStore,
        exchange: SharedExchange,
        market:   SharedMarketData,
    ) -> Self {
        let events = EventBus::new(settings.event_buffer);
        let reconciler = Reconciler::new(
            exchange,
            events.clone(),
            settings.sell_route,
            settings.upstream_timeout,
        );

        Self {
            settings: Arc::new(settings),
            config,
            targets: PriceTargetStore::new(),
            events,
            market,
            reconciler,
            cycle_count: AtomicU64::new(0),
            last_report: RwLock::new(None),
            started_at:  Utc::now(),
        }
    }

    pub async fn set_last_report(&self, report: CycleReport) {
        let mut guard = self.last_report.write().await;
        *guard = Some(report);
    }

    pub async fn current_config(&self) -> Arc<Config> {
        self.config.current().await
    }
}

/// Convenience type alias
pub type SharedState = Arc<AppState>;

pub fn build_state(
    settings: Settings,
    config:   ConfigStore,
    exchange: SharedExchange,
    market:   SharedMarketData,
) -> SharedState {
    Arc::new(AppState::new(settings, config, exchange, market))
}
