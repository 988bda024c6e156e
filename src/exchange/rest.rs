//! # exchange::rest
//!
//! HTTP adapter for the exchange trading API.
//!
//! ## API contract
//! | Method | Path                  | Body / Response                                   |
//! |--------|-----------------------|---------------------------------------------------|
//! | GET    | `/balance`            | `{ "currencies": { "BTC": { "amount": 1.5 } } }`  |
//! | GET    | `/orders/pending`     | `{ "trades": [ { "id", "base", "counter", "type", "price", "amount" } ] }` |
//! | POST   | `/orders/{id}/cancel` | `{ "success": true }`                             |
//! | POST   | `/orders/buy`         | `{ "base", "counter", "amount", "price" }` → `{ "success", "id", "message" }` |
//! | POST   | `/orders/sell`        | same as buy                                       |
//!
//! Every request carries the `X-API-KEY` header and a per-request timeout.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, error, info};

use super::{ExchangeClient, ExchangeError};
use crate::models::{Balance, OpenOrder, OrderAck, Side};

// ─── Wire types ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    #[serde(default)]
    currencies: HashMap<String, CurrencyBalance>,
}

#[derive(Debug, Deserialize)]
struct CurrencyBalance {
    amount: f64,
}

#[derive(Debug, Deserialize)]
struct PendingResponse {
    #[serde(default)]
    trades: Vec<PendingTrade>,
}

#[derive(Debug, Deserialize)]
struct PendingTrade {
    id:      serde_json::Value,
    base:    String,
    counter: String,
    #[serde(default, rename = "type")]
    kind:    Option<String>,
    price:   f64,
    amount:  f64,
}

#[derive(Debug, Serialize)]
struct OrderRequest<'a> {
    base:    &'a str,
    counter: &'a str,
    amount:  f64,
    price:   f64,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    #[serde(default = "default_true")]
    success: bool,
    #[serde(default)]
    id:      Option<serde_json::Value>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CancelResponse {
    #[serde(default = "default_true")]
    success: bool,
    #[serde(default)]
    message: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Order ids arrive as numbers or strings depending on the endpoint.
fn id_to_string(id: &serde_json::Value) -> String {
    match id {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl PendingTrade {
    fn into_order(self) -> OpenOrder {
        let side = match self.kind.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("buy") => Some(Side::Buy),
            Some("sell") => Some(Side::Sell),
            _ => None,
        };
        OpenOrder {
            id:      id_to_string(&self.id),
            base:    self.base,
            counter: self.counter,
            side,
            price:   self.price,
            amount:  self.amount,
        }
    }
}

// ─── Client ───────────────────────────────────────────────────────────────────

pub struct RestExchange {
    client:   reqwest::Client,
    base_url: String,
    api_key:  String,
    timeout:  Duration,
}

impl RestExchange {
    pub fn new(client: reqwest::Client, base_url: &str, api_key: &str, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key:  api_key.to_string(),
            timeout,
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ExchangeError> {
        let response = request
            .header("X-API-KEY", &self.api_key)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExchangeError::Timeout(self.timeout)
                } else {
                    error!(error = %e, "Exchange unreachable");
                    ExchangeError::Unreachable(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            error!(http_status = status, body = %body, "Exchange returned HTTP error");
            return Err(ExchangeError::Http { status, body });
        }

        response
            .json()
            .await
            .map_err(|e| ExchangeError::Decode(e.to_string()))
    }

    async fn place(
        &self,
        side:    Side,
        base:    &str,
        counter: &str,
        amount:  f64,
        price:   f64,
    ) -> Result<OrderAck, ExchangeError> {
        let path = match side {
            Side::Buy => "buy",
            Side::Sell => "sell",
        };
        let url = format!("{}/orders/{path}", self.base_url);

        info!(%side, base, counter, amount, price, url = %url, "Sending order to exchange");

        let body = OrderRequest { base, counter, amount, price };
        let resp: OrderResponse = self.send(self.client.post(&url).json(&body)).await?;

        if !resp.success {
            return Err(ExchangeError::Rejected(
                resp.message.unwrap_or_else(|| "no reason given".to_string()),
            ));
        }
        let order_id = resp
            .id
            .as_ref()
            .map(id_to_string)
            .ok_or_else(|| ExchangeError::Decode("order response without id".into()))?;

        Ok(OrderAck { order_id, message: resp.message })
    }
}

#[async_trait]
impl ExchangeClient for RestExchange {
    async fn get_balance(&self) -> Result<Balance, ExchangeError> {
        let url = format!("{}/balance", self.base_url);
        let resp: BalanceResponse = self.send(self.client.get(&url)).await?;

        let currencies = resp
            .currencies
            .into_iter()
            .map(|(code, c)| (code, c.amount))
            .collect();
        Ok(Balance::new(currencies))
    }

    async fn get_open_orders(&self) -> Result<Vec<OpenOrder>, ExchangeError> {
        let url = format!("{}/orders/pending", self.base_url);
        let resp: PendingResponse = self.send(self.client.get(&url)).await?;
        debug!(count = resp.trades.len(), "Fetched pending orders");
        Ok(resp.trades.into_iter().map(PendingTrade::into_order).collect())
    }

    async fn cancel(&self, order_id: &str) -> Result<(), ExchangeError> {
        let url = format!("{}/orders/{order_id}/cancel", self.base_url);
        let resp: CancelResponse = self.send(self.client.post(&url)).await?;
        if resp.success {
            Ok(())
        } else {
            Err(ExchangeError::Rejected(
                resp.message.unwrap_or_else(|| "cancel refused".to_string()),
            ))
        }
    }

    async fn place_buy(&self, base: &str, counter: &str, amount: f64, price: f64) -> Result<OrderAck, ExchangeError> {
        self.place(Side::Buy, base, counter, amount, price).await
    }

    async fn place_sell(&self, base: &str, counter: &str, amount: f64, price: f64) -> Result<OrderAck, ExchangeError> {
        self.place(Side::Sell, base, counter, amount, price).await
    }
}
