//! # market::fixed
//!
//! Static ticker for development (`MARKET_DATA_URL=mock`).

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::warn;

use super::{FetchError, MarketDataProvider};
use crate::models::{Ticker, TickerEntry};

pub struct FixedPrices {
    /// id → (price_usd, price_btc)
    prices: HashMap<String, (f64, f64)>,
}

impl FixedPrices {
    pub fn new(prices: HashMap<String, (f64, f64)>) -> Self {
        Self { prices }
    }
}

impl Default for FixedPrices {
    fn default() -> Self {
        Self::new(HashMap::from([
            ("bitcoin".to_string(),  (67_000.0, 1.0)),
            ("litecoin".to_string(), (84.0, 0.001254)),
            ("ethereum".to_string(), (3_400.0, 0.05075)),
            ("steem".to_string(),    (0.28, 0.00000418)),
            ("golos".to_string(),    (0.004, 0.00000006)),
        ]))
    }
}

#[async_trait]
impl MarketDataProvider for FixedPrices {
    async fn fetch(&self, ids: &[String]) -> Result<Ticker, FetchError> {
        let entries = ids
            .iter()
            .filter_map(|id| match self.prices.get(id) {
                Some(&(price_usd, price_btc)) => Some(TickerEntry { id: id.clone(), price_usd, price_btc }),
                None => {
                    warn!(id = %id, "No fixed price configured");
                    None
                }
            })
            .collect();
        Ok(Ticker::new(entries))
    }
}
