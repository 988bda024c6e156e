//! # market::coinmarketcap
//!
//! Pulls `GET {base}/v1/ticker/{id}/` for every tracked id.  The endpoint
//! answers with a one-element array whose prices are decimal strings:
//! ```json
//! [{ "id": "bitcoin", "symbol": "BTC", "price_usd": "64012.5", "price_btc": "1.0" }]
//! ```
//! Upstream refreshes roughly every five minutes, so polling faster than
//! that only returns the same numbers.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{FetchError, MarketDataProvider};
use crate::models::{Ticker, TickerEntry};

#[derive(Debug, Deserialize)]
struct CmcCoin {
    id:        String,
    price_usd: Option<String>,
    price_btc: Option<String>,
}

impl CmcCoin {
    fn into_entry(self) -> Result<TickerEntry, FetchError> {
        let parse = |field: &str, raw: Option<String>| -> Result<f64, FetchError> {
            raw.as_deref()
                .ok_or_else(|| format!("missing {field}"))
                .and_then(|s| s.trim().parse::<f64>().map_err(|e| format!("{field}: {e}")))
                .map_err(|reason| FetchError::Malformed { id: self.id.clone(), reason })
        };
        let price_usd = parse("price_usd", self.price_usd.clone())?;
        let price_btc = parse("price_btc", self.price_btc.clone())?;
        Ok(TickerEntry { id: self.id, price_usd, price_btc })
    }
}

pub struct CoinMarketCap {
    client:   reqwest::Client,
    base_url: String,
    timeout:  Duration,
}

impl CoinMarketCap {
    pub fn new(client: reqwest::Client, base_url: &str, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    async fn fetch_one(&self, id: &str) -> Result<TickerEntry, FetchError> {
        let url = format!("{}/v1/ticker/{id}/", self.base_url);

        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout(self.timeout)
                } else {
                    FetchError::Unreachable(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(FetchError::Http {
                id:     id.to_string(),
                status: response.status().as_u16(),
            });
        }

        let coins: Vec<CmcCoin> = response.json().await.map_err(|e| FetchError::Malformed {
            id:     id.to_string(),
            reason: e.to_string(),
        })?;

        coins
            .into_iter()
            .next()
            .ok_or_else(|| FetchError::Malformed {
                id:     id.to_string(),
                reason: "empty response".into(),
            })?
            .into_entry()
    }
}

#[async_trait]
impl MarketDataProvider for CoinMarketCap {
    async fn fetch(&self, ids: &[String]) -> Result<Ticker, FetchError> {
        let mut entries = Vec::with_capacity(ids.len());
        for id in ids {
            let entry = self.fetch_one(id).await?;
            debug!(id = %entry.id, price_usd = entry.price_usd, price_btc = entry.price_btc, "Ticker entry");
            entries.push(entry);
        }
        Ok(Ticker::new(entries))
    }
}
