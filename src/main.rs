//! # Wallkeeper: Market-Making Wall Keeper
//!
//! ## Architecture Overview
//!
//! ```text
//!  ┌──────────────┐  fetch ticker   ┌─────────────────────────────────────┐
//!  │  Market data │ ◀────────────── │ Poll Scheduler (every N seconds)    │
//!  └──────────────┘                 │  ├─ Target Calculator               │
//!                                   │  ├─ Price Target Store              │
//!  ┌──────────────┐  balance /      │  └─ Order Reconciler ───────────┐   │
//!  │  Exchange    │ ◀────────────── │       cancel all → place ladder │   │
//!  └──────────────┘  cancel / place └─────────────────────────────────┼───┘
//!                                                      EventBus ◀─────┘
//!  ┌──────────────┐  ws://host/ws            │
//!  │  Live feed   │ ◀────────────────────────┘
//!  └──────────────┘  GET/PUT /api/config · POST /config · GET /api/monitor/*
//! ```
//!
//! ## Environment Variables
//!
//! | Variable                | Default                          | Description                       |
//! |-------------------------|----------------------------------|-----------------------------------|
//! | `BIND_ADDR`             | `0.0.0.0:4050`                   | Address Axum listens on           |
//! | `CONFIG_PATH`           | `config.json`                    | Wall config document              |
//! | `EXCHANGE_BASE_URL`     | `mock`                           | Exchange REST API (`mock` = paper)|
//! | `EXCHANGE_API_KEY`      | (empty)                          | Exchange API key                  |
//! | `MARKET_DATA_URL`       | `https://api.coinmarketcap.com`  | Ticker API (`mock` = fixed prices)|
//! | `UPSTREAM_TIMEOUT_SECS` | `10`                             | Bound on every outbound call      |
//! | `SELL_ORDER_ROUTE`      | `sell`                           | `sell` or legacy `buy`            |
//! | `EVENT_BUFFER`          | `256`                            | Live-feed buffer per listener     |
//! | `API_KEY`               | (empty)                          | Protects the admin surface        |
//! | `RUST_LOG`              | `wallkeeper=debug`               | Tracing filter                    |

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod auth;
mod config;
mod engine;
mod error;
mod events;
mod exchange;
mod market;
mod models;
mod routes;
mod state;

use config::{Config, ConfigStore, Settings};
use exchange::{PaperExchange, RestExchange, SharedExchange};
use market::{CoinMarketCap, FixedPrices, SharedMarketData};
use state::build_state;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Load .env ──────────────────────────────────────────────────────────
    dotenvy::dotenv().ok();

    // ── 2. Structured logging ─────────────────────────────────────────────────
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::from_default_env()
                .add_directive("wallkeeper=debug".parse()?)
                .add_directive("tower_http=info".parse()?),
        )
        .init();

    info!(r#"

  ╔═══════════════════════════════════════════════════════╗
  ║           WALLKEEPER — Market-Making Walls            ║
  ║  Ticker · Targets · Reconcile · Live Feed             ║
  ╚═══════════════════════════════════════════════════════╝"#);

    // ── 3. Settings & config (a bad config file stops startup here) ──────────
    let settings = Settings::from_env().context("Invalid environment settings")?;
    let config = Config::load(&settings.config_path)
        .await
        .with_context(|| format!("Failed to load config from {}", settings.config_path.display()))?;

    info!(
        pairs            = config.tracked_pairs.len(),
        target_valuation = config.target_valuation,
        poll_interval    = ?config.poll_interval(),
        sell_route       = ?settings.sell_route,
        "Config loaded"
    );

    // ── 4. Upstream clients ───────────────────────────────────────────────────
    let http = reqwest::Client::new();

    let exchange: SharedExchange = if settings.exchange_base_url == "mock" {
        warn!("EXCHANGE_BASE_URL=mock: running against the PAPER exchange");
        let balances = config
            .tracked_pairs
            .iter()
            .map(|p| (p.price_target_key.clone(), 1_000.0))
            .collect::<HashMap<_, _>>();
        Arc::new(PaperExchange::new(balances))
    } else {
        Arc::new(RestExchange::new(
            http.clone(),
            &settings.exchange_base_url,
            &settings.exchange_api_key,
            settings.upstream_timeout,
        ))
    };

    let market: SharedMarketData = if settings.market_data_url == "mock" {
        warn!("MARKET_DATA_URL=mock: using FIXED market prices");
        Arc::new(FixedPrices::default())
    } else {
        Arc::new(CoinMarketCap::new(
            http.clone(),
            &settings.market_data_url,
            settings.upstream_timeout,
        ))
    };

    // ── 5. Shared state ───────────────────────────────────────────────────────
    let store = ConfigStore::new(config, Some(settings.config_path.clone()));
    let bind_addr = settings.bind_addr.clone();
    let state = build_state(settings, store, exchange, market);

    // ── 6. Poll scheduler ─────────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = tokio::spawn(engine::scheduler::run(state.clone(), shutdown_rx));

    // ── 7. Bind & Serve ───────────────────────────────────────────────────────
    let addr: SocketAddr = bind_addr.parse().context("BIND_ADDR is not a socket address")?;
    let app = routes::router(state);

    info!(?addr, "🚀 Wallkeeper server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await?;

    // ── 8. Let an in-flight cycle finish ──────────────────────────────────────
    let _ = shutdown_tx.send(true);
    scheduler.await.context("Poll scheduler panicked")?;

    info!("👋 Wallkeeper stopped");
    Ok(())
}
