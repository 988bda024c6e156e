//! # market
//!
//! The market-data provider: one call returns the latest prices for a list
//! of market-data ids.
//!
//! * [`coinmarketcap::CoinMarketCap`]: public ticker over HTTP.
//! * [`fixed::FixedPrices`]: static prices used when `MARKET_DATA_URL=mock`.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::Ticker;

pub mod coinmarketcap;
pub mod fixed;

pub use coinmarketcap::CoinMarketCap;
pub use fixed::FixedPrices;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    #[error("market data unreachable: {0}")]
    Unreachable(String),

    #[error("market data timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("market data HTTP {status} for {id}")]
    Http { id: String, status: u16 },

    #[error("malformed market data for {id}: {reason}")]
    Malformed { id: String, reason: String },
}

#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn fetch(&self, ids: &[String]) -> Result<Ticker, FetchError>;
}

pub type SharedMarketData = Arc<dyn MarketDataProvider>;
