//! # exchange::paper
//!
//! In-memory exchange for dry runs (`EXCHANGE_BASE_URL=mock`).
//!
//! Orders rest until cancelled and never fill; balances are whatever the
//! exchange was seeded with.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::info;

use super::{ExchangeClient, ExchangeError};
use crate::models::{Balance, OpenOrder, OrderAck, Side};

#[derive(Default)]
struct Book {
    balances: HashMap<String, f64>,
    orders:   Vec<OpenOrder>,
    next_id:  u64,
}

#[derive(Default)]
pub struct PaperExchange {
    book: Mutex<Book>,
}

impl PaperExchange {
    pub fn new(balances: HashMap<String, f64>) -> Self {
        Self {
            book: Mutex::new(Book { balances, ..Book::default() }),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Book>, ExchangeError> {
        self.book
            .lock()
            .map_err(|_| ExchangeError::Unreachable("paper book poisoned".into()))
    }

    fn rest(&self, side: Side, base: &str, counter: &str, amount: f64, price: f64) -> Result<OrderAck, ExchangeError> {
        let mut book = self.lock()?;
        book.next_id += 1;
        let order_id = format!("paper-{}", book.next_id);
        book.orders.push(OpenOrder {
            id:      order_id.clone(),
            base:    base.to_string(),
            counter: counter.to_string(),
            side:    Some(side),
            price,
            amount,
        });
        info!(%side, base, counter, amount, price, order_id = %order_id, "🎭 [PAPER] Order resting");
        Ok(OrderAck { order_id, message: Some("paper order".into()) })
    }
}

#[async_trait]
impl ExchangeClient for PaperExchange {
    async fn get_balance(&self) -> Result<Balance, ExchangeError> {
        Ok(Balance::new(self.lock()?.balances.clone()))
    }

    async fn get_open_orders(&self) -> Result<Vec<OpenOrder>, ExchangeError> {
        Ok(self.lock()?.orders.clone())
    }

    async fn cancel(&self, order_id: &str) -> Result<(), ExchangeError> {
        let mut book = self.lock()?;
        let before = book.orders.len();
        book.orders.retain(|o| o.id != order_id);
        if book.orders.len() == before {
            return Err(ExchangeError::Rejected(format!("unknown order {order_id}")));
        }
        Ok(())
    }

    async fn place_buy(&self, base: &str, counter: &str, amount: f64, price: f64) -> Result<OrderAck, ExchangeError> {
        self.rest(Side::Buy, base, counter, amount, price)
    }

    async fn place_sell(&self, base: &str, counter: &str, amount: f64, price: f64) -> Result<OrderAck, ExchangeError> {
        self.rest(Side::Sell, base, counter, amount, price)
    }
}
