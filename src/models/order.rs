//! # models::order
//!
//! Exchange-side snapshots: [`Balance`] and [`OpenOrder`].  Both are fetched
//! fresh at the start of every reconciliation cycle and dropped at its end;
//! nothing here is ever cached across cycles.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ─── Side ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

// ─── Balance ──────────────────────────────────────────────────────────────────

/// Available funds per currency code.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub currencies: HashMap<String, f64>,
}

impl Balance {
    pub fn new(currencies: HashMap<String, f64>) -> Self {
        Self { currencies }
    }

    /// Available amount for `code`.  A currency the exchange did not report
    /// counts as zero.
    pub fn available(&self, code: &str) -> f64 {
        self.currencies.get(code).copied().unwrap_or(0.0)
    }
}

// ─── OpenOrder ────────────────────────────────────────────────────────────────

/// A resting order on the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOrder {
    pub id: String,
    pub base: String,
    pub counter: String,
    /// Not every exchange reports the side of a pending order.
    #[serde(default)]
    pub side: Option<Side>,
    pub price: f64,
    pub amount: f64,
}

impl OpenOrder {
    /// `true` if this order belongs to the `base`/`counter` pair.
    #[inline]
    pub fn is_for(&self, base: &str, counter: &str) -> bool {
        self.base == base && self.counter == counter
    }
}

// ─── OrderAck ─────────────────────────────────────────────────────────────────

/// Exchange acknowledgement for a newly placed order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    #[serde(default)]
    pub message: Option<String>,
}
