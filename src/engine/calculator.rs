//! # engine::calculator
//!
//! **Target Calculator**: turns a reference price, the target valuation and
//! a pair's tiers into a concrete [`PriceTarget`].
//!
//! ## Wall math
//! ```text
//! ratio    = reference_price / target_valuation
//! buy:  adjusted = ratio + ratio * offset / 100    price = 1 / adjusted
//! sell: adjusted = ratio - ratio * offset / 100    price = 1 / adjusted
//! ```
//! Prices are quoted in the inverse pair, so a positive buy offset lowers the
//! quoted price and a positive sell offset raises it.

use thiserror::Error;

use crate::config::{Tier, TrackedPair};
use crate::models::{Level, PriceTarget};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ComputationError {
    #[error("target valuation must be non-zero and finite (got {0})")]
    InvalidValuation(f64),

    #[error("reference price must be finite (got {0})")]
    InvalidReferencePrice(f64),

    #[error("{side} tier #{index} (offset {offset}%) drives the adjusted price to zero or below")]
    DegenerateTier {
        side:   &'static str,
        index:  usize,
        offset: f64,
    },

    #[error("{side} tier #{index} yields a non-finite price")]
    NonFinitePrice {
        side:  &'static str,
        index: usize,
    },
}

/// Compute the buy and sell ladders for one pair.
///
/// Pure: identical inputs always give an identical result, and
/// `buy[i]`/`sell[i]` correspond to `tiers.buy[i]`/`tiers.sell[i]`.
pub fn compute_targets(
    reference_price:  f64,
    target_valuation: f64,
    pair:             &TrackedPair,
) -> Result<PriceTarget, ComputationError> {
    if target_valuation == 0.0 || !target_valuation.is_finite() {
        return Err(ComputationError::InvalidValuation(target_valuation));
    }
    if !reference_price.is_finite() {
        return Err(ComputationError::InvalidReferencePrice(reference_price));
    }

    let ratio = reference_price / target_valuation;

    Ok(PriceTarget {
        base:    pair.base.clone(),
        counter: pair.counter.clone(),
        buy:     ladder(ratio, &pair.tiers.buy, "buy", 1.0)?,
        sell:    ladder(ratio, &pair.tiers.sell, "sell", -1.0)?,
    })
}

/// `direction` is +1 for buy tiers (offset added) and -1 for sell tiers.
fn ladder(
    ratio:     f64,
    tiers:     &[Tier],
    side:      &'static str,
    direction: f64,
) -> Result<Vec<Level>, ComputationError> {
    tiers
        .iter()
        .enumerate()
        .map(|(index, tier)| {
            let adjusted = ratio + direction * (ratio * tier.offset_percent / 100.0);
            // Past 100% the inverted price flips sign.
            if adjusted <= 0.0 {
                return Err(ComputationError::DegenerateTier {
                    side,
                    index,
                    offset: tier.offset_percent,
                });
            }

            let price = 1.0 / adjusted;
            if !price.is_finite() {
                return Err(ComputationError::NonFinitePrice { side, index });
            }

            Ok(Level { price, amount: tier.amount })
        })
        .collect()
}
