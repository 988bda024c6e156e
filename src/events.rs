//! # events
//!
//! The **Event Broadcaster**: every notable step of a cycle is narrated as a
//! [`BotEvent`] and fanned out to all live-feed listeners.
//!
//! ## Delivery policy
//! Built on `tokio::sync::broadcast`:
//! * `publish` never blocks and never fails, with or without listeners.
//! * Each listener owns a bounded ring of `capacity` messages.  A listener
//!   that falls behind loses the *oldest* messages and is told how many it
//!   missed ([`Delivery::Missed`]); other listeners are unaffected.
//! * Listeners only see messages published after they subscribed.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::engine::reconciler::CycleReport;
use crate::models::{Balance, OrderAck, PriceTarget, Side};

// ─── Severity ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Info,
    Warn,
    Error,
}

// ─── BotEvent ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BotEvent {
    /// Poll Scheduler fired: a new cycle begins.
    CycleStarted {
        cycle_id: Uuid,
        pairs:    usize,
    },

    /// Market data could not be fetched; previous targets stay in place.
    FetchFailed {
        error: String,
    },

    /// Ticker did not report a tracked id; its previous target is kept.
    TickerMissing {
        price_target_key: String,
        market_data_id:   String,
    },

    TargetsComputed {
        price_target_key: String,
        price_usd:        f64,
        price_btc:        f64,
        target:           Box<PriceTarget>,
    },

    /// Degenerate wall math: nothing is placed for the pair this cycle.
    ComputationFailed {
        price_target_key: String,
        error:            String,
    },

    BalanceSnapshot {
        balance: Balance,
    },

    /// Balance or open orders unavailable: nothing was cancelled or placed.
    CycleAborted {
        reason: String,
    },

    PairSkipped {
        price_target_key: String,
        reason:           String,
    },

    CancellingOrder {
        order_id: String,
        base:     String,
        counter:  String,
    },

    CancelFailed {
        order_id: String,
        error:    String,
    },

    InsufficientBalance {
        side:      Side,
        base:      String,
        counter:   String,
        currency:  String,
        available: f64,
        required:  f64,
        amount:    f64,
        price:     f64,
    },

    PlacingOrder {
        side:    Side,
        base:    String,
        counter: String,
        amount:  f64,
        price:   f64,
    },

    OrderPlaced {
        side: Side,
        ack:  OrderAck,
    },

    OrderFailed {
        side:    Side,
        base:    String,
        counter: String,
        amount:  f64,
        price:   f64,
        error:   String,
    },

    CycleCompleted {
        report: Box<CycleReport>,
    },

    ConfigUpdated {
        pairs: usize,
    },
}

impl BotEvent {
    pub fn severity(&self) -> Severity {
        match self {
            BotEvent::CycleAborted { .. } | BotEvent::OrderFailed { .. } => Severity::Error,
            BotEvent::FetchFailed { .. }
            | BotEvent::TickerMissing { .. }
            | BotEvent::ComputationFailed { .. }
            | BotEvent::PairSkipped { .. }
            | BotEvent::CancelFailed { .. }
            | BotEvent::InsufficientBalance { .. } => Severity::Warn,
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for BotEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BotEvent::CycleStarted { pairs, .. } => {
                write!(f, "Going to set buy / sell walls for {pairs} pair(s)")
            }
            BotEvent::FetchFailed { error } => {
                write!(f, "Market data fetch failed, keeping previous targets: {error}")
            }
            BotEvent::TickerMissing { price_target_key, market_data_id } => write!(
                f,
                "Ticker has no price for {market_data_id}, keeping previous {price_target_key} targets"
            ),
            BotEvent::TargetsComputed { price_target_key, price_usd, price_btc, target } => write!(
                f,
                "{price_target_key} BTC price: {price_btc}, USD price: {price_usd}, target {}/{} buy {:?} sell {:?}",
                target.base, target.counter, target.buy, target.sell
            ),
            BotEvent::ComputationFailed { price_target_key, error } => {
                write!(f, "Skipping {price_target_key} this cycle: {error}")
            }
            BotEvent::BalanceSnapshot { balance } => {
                write!(f, "Balance is {:?}", balance.currencies)
            }
            BotEvent::CycleAborted { reason } => {
                write!(f, "Not setting walls, got an error from the exchange: {reason}")
            }
            BotEvent::PairSkipped { price_target_key, reason } => {
                write!(f, "Not placing {price_target_key} walls: {reason}")
            }
            BotEvent::CancellingOrder { order_id, base, counter } => {
                write!(f, "Cancelling order {order_id} on {base}/{counter}")
            }
            BotEvent::CancelFailed { order_id, error } => {
                write!(f, "Failed to cancel order {order_id}: {error}")
            }
            BotEvent::InsufficientBalance { side, base, counter, currency, available, amount, price, .. } => write!(
                f,
                "Insufficient {currency} balance ({available}) cannot {side} {amount} {base}/{counter} @ {price}"
            ),
            BotEvent::PlacingOrder { side, base, counter, amount, price } => {
                write!(f, "Going to {side} {amount} {base}/{counter} @ {price}")
            }
            BotEvent::OrderPlaced { side, ack } => {
                write!(f, "{side} order accepted: {}", ack.order_id)
            }
            BotEvent::OrderFailed { side, base, counter, amount, price, error } => write!(
                f,
                "Failed to {side} {amount} {base}/{counter} @ {price}: {error}"
            ),
            BotEvent::CycleCompleted { report } => write!(
                f,
                "Cycle done: {} cancelled, {} placed, {} failed, {} skipped for balance",
                report.cancelled,
                report.placed,
                report.placement_failures,
                report.skipped_insufficient
            ),
            BotEvent::ConfigUpdated { pairs } => write!(f, "Config updated ({pairs} pair(s))"),
        }
    }
}

// ─── Narration ────────────────────────────────────────────────────────────────

/// A published event, stamped and rendered for listeners.
#[derive(Debug, Clone, Serialize)]
pub struct Narration {
    pub at:       DateTime<Utc>,
    /// `HH:MM` wall-clock stamp shown in the live feed.
    pub clock:    String,
    pub severity: Severity,
    pub text:     String,
    #[serde(flatten)]
    pub event:    BotEvent,
}

impl Narration {
    pub fn new(event: BotEvent) -> Self {
        let at = Utc::now();
        Self {
            at,
            clock:    at.format("%H:%M").to_string(),
            severity: event.severity(),
            text:     event.to_string(),
            event,
        }
    }

    #[inline]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"event":"SERIALIZATION_ERROR"}"#.to_string())
    }
}

// ─── EventBus ─────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Narration>,
}

impl EventBus {
    /// `capacity` is the per-listener buffer depth.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Narrate `event` to every current listener and to the log.
    /// Returns how many listeners it was queued for.
    pub fn publish(&self, event: BotEvent) -> usize {
        let narration = Narration::new(event);

        match narration.severity {
            Severity::Info  => info!(target: "wallkeeper::narration", "{}", narration.text),
            Severity::Warn  => warn!(target: "wallkeeper::narration", "{}", narration.text),
            Severity::Error => error!(target: "wallkeeper::narration", "{}", narration.text),
        }

        // Err only means nobody is listening.
        self.tx.send(narration).unwrap_or(0)
    }

    pub fn subscribe(&self) -> Subscription {
        let sub = Subscription {
            id: Uuid::new_v4(),
            rx: self.tx.subscribe(),
        };
        debug!(listener = %sub.id, listeners = self.listener_count(), "Listener subscribed");
        sub
    }

    pub fn unsubscribe(&self, sub: Subscription) {
        let id = sub.id;
        drop(sub);
        debug!(listener = %id, listeners = self.listener_count(), "Listener unsubscribed");
    }

    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

// ─── Subscription ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum Delivery {
    Message(Narration),
    /// The listener fell behind and this many oldest messages were dropped.
    Missed(u64),
}

/// Handle of one registered listener.  Dropping it unsubscribes.
pub struct Subscription {
    id: Uuid,
    rx: broadcast::Receiver<Narration>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Wait for the next delivery.  `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Delivery> {
        match self.rx.recv().await {
            Ok(n) => Some(Delivery::Message(n)),
            Err(RecvError::Lagged(n)) => Some(Delivery::Missed(n)),
            Err(RecvError::Closed) => None,
        }
    }

    /// Non-blocking variant.  `None` when nothing is queued.
    #[cfg(test)]
    pub fn try_recv(&mut self) -> Option<Delivery> {
        use tokio::sync::broadcast::error::TryRecvError;

        match self.rx.try_recv() {
            Ok(n) => Some(Delivery::Message(n)),
            Err(TryRecvError::Lagged(n)) => Some(Delivery::Missed(n)),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => None,
        }
    }

    /// Everything currently queued, skipping gaps.
    #[cfg(test)]
    pub fn drain(&mut self) -> Vec<Narration> {
        let mut out = Vec::new();
        while let Some(delivery) = self.try_recv() {
            if let Delivery::Message(n) = delivery {
                out.push(n);
            }
        }
        out
    }
}
