//! # config
//!
//! Two layers of configuration:
//!
//! * [`Settings`]: process settings read once from the environment
//!   (bind address, upstream URLs, timeouts).
//! * [`Config`]: the persisted JSON document describing which pairs to
//!   track and how their walls are tiered.  Held in a [`ConfigStore`] and
//!   hot-replaceable at runtime.
//!
//! ## Config document
//! ```json
//! {
//!   "targetValuation": 0.05,
//!   "pollIntervalSeconds": 120,
//!   "trackedPairs": [{
//!     "marketDataId": "bitcoin",
//!     "base": "VIVA", "counter": "BTC",
//!     "priceTargetKey": "BTC",
//!     "tiers": {
//!       "buy":  [{ "offsetPercent": 5,  "amount": 50 }],
//!       "sell": [{ "offsetPercent": 5,  "amount": 50 }]
//!     }
//!   }]
//! }
//! ```
//! Field names of the legacy document (`VivaTargetPrice`, `TrackCoins`, ...)
//! are accepted as aliases.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::engine::reconciler::SellRoute;

const DEFAULT_POLL_INTERVAL_SECS: u64 = 120;
/// One day.
pub const MAX_POLL_INTERVAL_SECS: u64 = 86_400;

// ─── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed config document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("failed to persist config to {path}: {source}")]
    Persist {
        path: PathBuf,
        source: std::io::Error,
    },
}

// ─── Document ─────────────────────────────────────────────────────────────────

/// One rung definition: how far from the reference price, and how much.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tier {
    /// Percentage distance from the reference price.  Positive values sit
    /// further away from the market.
    #[serde(alias = "Target")]
    pub offset_percent: f64,

    #[serde(alias = "Amount")]
    pub amount: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TierSet {
    #[serde(default, alias = "Buy")]
    pub buy: Vec<Tier>,

    #[serde(default, alias = "Sell")]
    pub sell: Vec<Tier>,
}

/// One instrument whose wall the bot maintains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedPair {
    /// Id understood by the market-data provider, e.g. `"bitcoin"`.
    #[serde(alias = "CoinMarketCapID")]
    pub market_data_id: String,

    #[serde(alias = "Base")]
    pub base: String,

    #[serde(alias = "Counter")]
    pub counter: String,

    /// Carried for operators; the wall math does not use it.
    #[serde(default, alias = "TargetSpread")]
    pub target_spread: f64,

    /// Key of this pair in the price-target store, and the currency whose
    /// balance must cover each level.
    #[serde(alias = "PriceTarget")]
    pub price_target_key: String,

    #[serde(alias = "Tiers")]
    pub tiers: TierSet,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Desired price of the base asset, in the ticker's valuation currency.
    #[serde(alias = "VivaTargetPrice")]
    pub target_valuation: f64,

    #[serde(default = "default_poll_interval", alias = "TradeQwikTradesRefresh")]
    pub poll_interval_seconds: u64,

    #[serde(alias = "TrackCoins")]
    pub tracked_pairs: Vec<TrackedPair>,
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

impl Config {
    /// Parse and validate a JSON document.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate the document at `path`.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_json(&raw)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    /// Market-data ids of every tracked pair, in config order.
    pub fn market_data_ids(&self) -> Vec<String> {
        self.tracked_pairs
            .iter()
            .map(|p| p.market_data_id.clone())
            .collect()
    }

    /// Shape check applied at startup and on every reload.
    ///
    /// A zero `targetValuation` is accepted here; it surfaces per pair as a
    /// computation error during the cycle.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| -> Result<(), ConfigError> { Err(ConfigError::Invalid(msg)) };

        if !self.target_valuation.is_finite() || self.target_valuation < 0.0 {
            return invalid(format!(
                "targetValuation must be a finite, non-negative number (got {})",
                self.target_valuation
            ));
        }
        if !(1..=MAX_POLL_INTERVAL_SECS).contains(&self.poll_interval_seconds) {
            return invalid(format!(
                "pollIntervalSeconds must be between 1 and {MAX_POLL_INTERVAL_SECS} (got {})",
                self.poll_interval_seconds
            ));
        }
        if self.tracked_pairs.is_empty() {
            return invalid("trackedPairs must not be empty".into());
        }

        let mut keys = HashSet::new();
        for (i, pair) in self.tracked_pairs.iter().enumerate() {
            for (field, value) in [
                ("marketDataId", &pair.market_data_id),
                ("base", &pair.base),
                ("counter", &pair.counter),
                ("priceTargetKey", &pair.price_target_key),
            ] {
                if value.trim().is_empty() {
                    return invalid(format!("trackedPairs[{i}].{field} must not be empty"));
                }
            }
            if !keys.insert(pair.price_target_key.as_str()) {
                return invalid(format!(
                    "trackedPairs[{i}].priceTargetKey '{}' is used by another pair",
                    pair.price_target_key
                ));
            }
            for (side, tiers) in [("buy", &pair.tiers.buy), ("sell", &pair.tiers.sell)] {
                for (j, tier) in tiers.iter().enumerate() {
                    if !tier.offset_percent.is_finite() {
                        return invalid(format!(
                            "trackedPairs[{i}].tiers.{side}[{j}].offsetPercent must be finite"
                        ));
                    }
                    if !tier.amount.is_finite() || tier.amount <= 0.0 {
                        return invalid(format!(
                            "trackedPairs[{i}].tiers.{side}[{j}].amount must be positive"
                        ));
                    }
                }
            }
        }

        Ok(())
    }
}

// ─── ConfigStore ──────────────────────────────────────────────────────────────

/// Guarded holder of the active [`Config`].
///
/// Readers take an `Arc` snapshot and release the lock immediately; a reload
/// swaps the whole `Arc`, so nobody ever sees a half-updated config.
/// Reloads run one at a time, so the file on disk always matches the active
/// snapshot.
#[derive(Clone)]
pub struct ConfigStore {
    current: Arc<RwLock<Arc<Config>>>,
    /// Held for the whole validate → persist → swap sequence.
    reload_lock: Arc<Mutex<()>>,
    /// Where accepted reloads are written.  `None` keeps them in memory only.
    path: Option<PathBuf>,
}

impl ConfigStore {
    pub fn new(config: Config, path: Option<PathBuf>) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(config))),
            reload_lock: Arc::new(Mutex::new(())),
            path,
        }
    }

    /// Snapshot of the active config.
    pub async fn current(&self) -> Arc<Config> {
        self.current.read().await.clone()
    }

    /// Validate, persist, then swap.  On any error the active config and the
    /// file on disk are left untouched.
    pub async fn reload(&self, config: Config) -> Result<Arc<Config>, ConfigError> {
        let _reloading = self.reload_lock.lock().await;

        config.validate()?;

        if let Some(path) = &self.path {
            let body = serde_json::to_vec_pretty(&config)?;
            persist(path, &body).await.map_err(|source| ConfigError::Persist {
                path: path.clone(),
                source,
            })?;
        }

        let config = Arc::new(config);
        {
            let mut guard = self.current.write().await;
            *guard = config.clone();
        }

        info!(
            pairs = config.tracked_pairs.len(),
            target_valuation = config.target_valuation,
            poll_interval_secs = config.poll_interval_seconds,
            "Config reloaded"
        );
        Ok(config)
    }

    /// Parse a raw JSON payload and reload from it.
    pub async fn reload_json(&self, raw: &str) -> Result<Arc<Config>, ConfigError> {
        let config: Config = serde_json::from_str(raw).map_err(|e| {
            warn!(error = %e, "Rejected malformed config payload");
            ConfigError::Parse(e)
        })?;
        self.reload(config).await
    }

    /// Swap in `config` with no validation or persistence.
    #[cfg(test)]
    pub(crate) async fn replace_unchecked(&self, config: Config) {
        *self.current.write().await = Arc::new(config);
    }
}

/// Write to a sibling temp file, then rename over `path`, so a crash never
/// leaves a truncated document behind.
async fn persist(path: &Path, body: &[u8]) -> std::io::Result<()> {
    let mut tmp_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "config.json".into());
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    tokio::fs::write(&tmp, body).await?;
    tokio::fs::rename(&tmp, path).await
}

// ─── Settings ─────────────────────────────────────────────────────────────────

/// Process settings from environment variables (after `.env` is loaded).
#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: String,
    pub config_path: PathBuf,
    /// `"mock"` selects the in-memory paper exchange.
    pub exchange_base_url: String,
    pub exchange_api_key: String,
    /// `"mock"` selects the fixed-price ticker.
    pub market_data_url: String,
    /// Upper bound on every outbound call.
    pub upstream_timeout: Duration,
    pub sell_route: SellRoute,
    /// Per-listener depth of the event bus.
    pub event_buffer: usize,
    /// Admin API key.  Empty disables the check.
    pub api_key: String,
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        let sell_route = match env_or("SELL_ORDER_ROUTE", "sell").to_lowercase().as_str() {
            "sell" => SellRoute::Distinct,
            "buy" => SellRoute::ViaBuy,
            other => anyhow::bail!("Unknown SELL_ORDER_ROUTE: '{other}'. Use 'sell' or 'buy'"),
        };

        Ok(Self {
            bind_addr:         env_or("BIND_ADDR", "0.0.0.0:4050"),
            config_path:       PathBuf::from(env_or("CONFIG_PATH", "config.json")),
            exchange_base_url: env_or("EXCHANGE_BASE_URL", "mock"),
            exchange_api_key:  env_or("EXCHANGE_API_KEY", ""),
            market_data_url:   env_or("MARKET_DATA_URL", "https://api.coinmarketcap.com"),
            upstream_timeout:  Duration::from_secs(env_u64("UPSTREAM_TIMEOUT_SECS", 10).max(1)),
            sell_route,
            event_buffer:      env_u64("EVENT_BUFFER", 256).max(1) as usize,
            api_key:           env_or("API_KEY", ""),
        })
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr:         "127.0.0.1:4050".to_string(),
            config_path:       PathBuf::from("config.json"),
            exchange_base_url: "mock".to_string(),
            exchange_api_key:  String::new(),
            market_data_url:   "mock".to_string(),
            upstream_timeout:  Duration::from_secs(10),
            sell_route:        SellRoute::Distinct,
            event_buffer:      256,
            api_key:           String::new(),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
