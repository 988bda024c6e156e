//! # models::market
//!
//! Defines [`Ticker`], the snapshot returned by the market-data provider on
//! every poll.  One [`TickerEntry`] per requested market-data id.

use serde::{Deserialize, Serialize};

/// The latest known price of one coin as reported by the ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerEntry {
    /// Market-data identifier, e.g. `"bitcoin"`.
    pub id: String,

    /// Price quoted in USD.  This is the reference price fed to the
    /// Target Calculator.
    pub price_usd: f64,

    /// Price quoted in the reference crypto (BTC).  Narrated only.
    pub price_btc: f64,
}

/// A full ticker response for a set of ids.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub entries: Vec<TickerEntry>,
}

impl Ticker {
    pub fn new(entries: Vec<TickerEntry>) -> Self {
        Self { entries }
    }

    /// Looks up the entry for a market-data id.
    pub fn get(&self, id: &str) -> Option<&TickerEntry> {
        self.entries.iter().find(|e| e.id == id)
    }
}
