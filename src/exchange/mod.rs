//! # exchange
//!
//! The exchange trading API as seen by the reconciler.
//!
//! * [`rest::RestExchange`]: HTTP adapter for the live exchange.
//! * [`paper::PaperExchange`]: in-memory book used when
//!   `EXCHANGE_BASE_URL=mock`.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Balance, OpenOrder, OrderAck};

pub mod paper;
pub mod rest;

pub use paper::PaperExchange;
pub use rest::RestExchange;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExchangeError {
    #[error("exchange unreachable: {0}")]
    Unreachable(String),

    #[error("exchange call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("exchange HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("exchange rejected request: {0}")]
    Rejected(String),

    #[error("unexpected exchange response: {0}")]
    Decode(String),
}

/// Everything the wall engine needs from an exchange.
///
/// Buy and sell placement are distinct calls; both rest a limit order of
/// `amount` at `price` on `base`/`counter`.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn get_balance(&self) -> Result<Balance, ExchangeError>;

    async fn get_open_orders(&self) -> Result<Vec<OpenOrder>, ExchangeError>;

    async fn cancel(&self, order_id: &str) -> Result<(), ExchangeError>;

    async fn place_buy(
        &self,
        base:    &str,
        counter: &str,
        amount:  f64,
        price:   f64,
    ) -> Result<OrderAck, ExchangeError>;

    async fn place_sell(
        &self,
        base:    &str,
        counter: &str,
        amount:  f64,
        price:   f64,
    ) -> Result<OrderAck, ExchangeError>;
}

pub type SharedExchange = Arc<dyn ExchangeClient>;
