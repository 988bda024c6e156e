//! # models::target
//!
//! Defines [`PriceTarget`]: the ladder of buy and sell [`Level`]s computed
//! for one tracked pair.  Derived every cycle, never persisted.
//!
//! `buy` and `sell` always have exactly as many entries as the pair's
//! configured buy and sell tiers, in tier-definition order.

use serde::{Deserialize, Serialize};

/// One rung of the wall: a limit price and the amount to rest there.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Level {
    pub price: f64,
    pub amount: f64,
}

impl Level {
    /// Funds needed to cover this level, in the pair's price-target currency.
    #[inline]
    pub fn cost(&self) -> f64 {
        self.amount * self.price
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTarget {
    pub base: String,
    pub counter: String,
    pub buy: Vec<Level>,
    pub sell: Vec<Level>,
}
