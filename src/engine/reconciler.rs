//! # engine::reconciler
//!
//! **Order Reconciler**: converges the exchange towards the computed walls.
//!
//! ## One pass
//! ```text
//! 1. fetch balance        ── fail → narrate, abort (nothing cancelled or placed)
//! 2. fetch open orders    ── fail → narrate, abort
//! 3. per tracked pair:
//!    a. cancel every open order on base/counter   (failures narrated, continue)
//!    b. no target in store → narrate, place nothing
//!    c. each buy level:  balance gate → place     (failures narrated, continue)
//!    d. each sell level: balance gate → place     (failures narrated, continue)
//! ```
//! Cancel-then-place is not atomic on the exchange: between 3a and 3c a pair
//! has no resting orders at all.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{Config, TrackedPair};
use crate::events::{BotEvent, EventBus};
use crate::exchange::{ExchangeError, SharedExchange};
use crate::models::{Balance, Level, OpenOrder, Side};

use super::store::PriceTargetStore;

// ─── SellRoute ────────────────────────────────────────────────────────────────

/// Which exchange primitive sell levels go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SellRoute {
    /// Sell levels are placed with `place_sell`.
    Distinct,
    /// Sell levels are placed with `place_buy`, as the legacy bot did.
    ViaBuy,
}

// ─── CycleReport ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub cycle_id:             Uuid,
    pub started_at:           DateTime<Utc>,
    pub finished_at:          Option<DateTime<Utc>>,
    /// Set when balance or open orders could not be fetched.
    pub aborted:              Option<String>,
    pub cancelled:            usize,
    pub cancel_failures:      usize,
    pub placement_attempts:   usize,
    pub placed:               usize,
    pub placement_failures:   usize,
    pub skipped_insufficient: usize,
    /// Price-target keys with no target: orders cancelled, nothing placed.
    pub skipped_pairs:        Vec<String>,
}

impl CycleReport {
    pub fn new(cycle_id: Uuid) -> Self {
        Self {
            cycle_id,
            started_at:           Utc::now(),
            finished_at:          None,
            aborted:              None,
            cancelled:            0,
            cancel_failures:      0,
            placement_attempts:   0,
            placed:               0,
            placement_failures:   0,
            skipped_insufficient: 0,
            skipped_pairs:        Vec::new(),
        }
    }

    fn finish(mut self) -> Self {
        self.finished_at = Some(Utc::now());
        self
    }
}

// ─── Reconciler ───────────────────────────────────────────────────────────────

pub struct Reconciler {
    exchange:     SharedExchange,
    events:       EventBus,
    sell_route:   SellRoute,
    /// Bound on every single exchange call.
    call_timeout: Duration,
}

impl Reconciler {
    pub fn new(
        exchange:     SharedExchange,
        events:       EventBus,
        sell_route:   SellRoute,
        call_timeout: Duration,
    ) -> Self {
        Self { exchange, events, sell_route, call_timeout }
    }

    pub async fn reconcile(
        &self,
        cycle_id: Uuid,
        config:   &Config,
        store:    &PriceTargetStore,
    ) -> CycleReport {
        let mut report = CycleReport::new(cycle_id);

        // ── 1. Balance ────────────────────────────────────────────────────────
        let balance = match self.bounded(self.exchange.get_balance()).await {
            Ok(balance) => balance,
            Err(e) => return self.abort(report, format!("balance unavailable: {e}")),
        };
        self.events.publish(BotEvent::BalanceSnapshot { balance: balance.clone() });

        // ── 2. Open orders ────────────────────────────────────────────────────
        let open_orders = match self.bounded(self.exchange.get_open_orders()).await {
            Ok(orders) => orders,
            Err(e) => return self.abort(report, format!("open orders unavailable: {e}")),
        };
        debug!(%cycle_id, open_orders = open_orders.len(), "Exchange state fetched");

        // ── 3. Per pair ───────────────────────────────────────────────────────
        for pair in &config.tracked_pairs {
            self.cancel_pair_orders(pair, &open_orders, &mut report).await;

            let Some(target) = store.get(&pair.price_target_key).await else {
                self.events.publish(BotEvent::PairSkipped {
                    price_target_key: pair.price_target_key.clone(),
                    reason:           "no price target available".into(),
                });
                report.skipped_pairs.push(pair.price_target_key.clone());
                continue;
            };

            for level in &target.buy {
                self.place_level(Side::Buy, pair, level, &balance, &mut report).await;
            }
            for level in &target.sell {
                self.place_level(Side::Sell, pair, level, &balance, &mut report).await;
            }
        }

        let report = report.finish();
        info!(
            %cycle_id,
            cancelled          = report.cancelled,
            cancel_failures    = report.cancel_failures,
            placed             = report.placed,
            placement_failures = report.placement_failures,
            skipped            = report.skipped_insufficient,
            "Walls reconciled"
        );
        report
    }

    fn abort(&self, mut report: CycleReport, reason: String) -> CycleReport {
        self.events.publish(BotEvent::CycleAborted { reason: reason.clone() });
        report.aborted = Some(reason);
        report.finish()
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, ExchangeError>>,
    ) -> Result<T, ExchangeError> {
        tokio::time::timeout(self.call_timeout, call)
            .await
            .unwrap_or_else(|_| Err(ExchangeError::Timeout(self.call_timeout)))
    }

    /// Cancel every open order on the pair, whatever its price or side.
    async fn cancel_pair_orders(
        &self,
        pair:        &TrackedPair,
        open_orders: &[OpenOrder],
        report:      &mut CycleReport,
    ) {
        for order in open_orders.iter().filter(|o| o.is_for(&pair.base, &pair.counter)) {
            self.events.publish(BotEvent::CancellingOrder {
                order_id: order.id.clone(),
                base:     order.base.clone(),
                counter:  order.counter.clone(),
            });

            match self.bounded(self.exchange.cancel(&order.id)).await {
                Ok(()) => report.cancelled += 1,
                Err(e) => {
                    report.cancel_failures += 1;
                    self.events.publish(BotEvent::CancelFailed {
                        order_id: order.id.clone(),
                        error:    e.to_string(),
                    });
                }
            }
        }
    }

    async fn place_level(
        &self,
        side:    Side,
        pair:    &TrackedPair,
        level:   &Level,
        balance: &Balance,
        report:  &mut CycleReport,
    ) {
        // ── Balance gate ──────────────────────────────────────────────────────
        let available = balance.available(&pair.price_target_key);
        let required = level.cost();
        if available < required {
            report.skipped_insufficient += 1;
            self.events.publish(BotEvent::InsufficientBalance {
                side,
                base:     pair.base.clone(),
                counter:  pair.counter.clone(),
                currency: pair.price_target_key.clone(),
                available,
                required,
                amount:   level.amount,
                price:    level.price,
            });
            return;
        }

        // ── Place ─────────────────────────────────────────────────────────────
        self.events.publish(BotEvent::PlacingOrder {
            side,
            base:    pair.base.clone(),
            counter: pair.counter.clone(),
            amount:  level.amount,
            price:   level.price,
        });
        report.placement_attempts += 1;

        let ex = &self.exchange;
        let result = match (side, self.sell_route) {
            (Side::Buy, _) | (Side::Sell, SellRoute::ViaBuy) => {
                self.bounded(ex.place_buy(&pair.base, &pair.counter, level.amount, level.price)).await
            }
            (Side::Sell, SellRoute::Distinct) => {
                self.bounded(ex.place_sell(&pair.base, &pair.counter, level.amount, level.price)).await
            }
        };

        match result {
            Ok(ack) => {
                report.placed += 1;
                self.events.publish(BotEvent::OrderPlaced { side, ack });
            }
            Err(e) => {
                report.placement_failures += 1;
                self.events.publish(BotEvent::OrderFailed {
                    side,
                    base:    pair.base.clone(),
                    counter: pair.counter.clone(),
                    amount:  level.amount,
                    price:   level.price,
                    error:   e.to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::*;
    use crate::config::{Tier, TierSet};
    use crate::events::Subscription;
    use crate::exchange::ExchangeClient;
    use crate::models::{OrderAck, PriceTarget};

    // ── Recording exchange ────────────────────────────────────────────────────

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum Call {
        Balance,
        OpenOrders,
        Cancel(String),
        Buy { counter: String, amount: f64, price: f64 },
        Sell { counter: String, amount: f64, price: f64 },
    }

    #[derive(Default)]
    pub(crate) struct RecordingExchange {
        pub balances:       HashMap<String, f64>,
        pub orders:         Vec<OpenOrder>,
        pub fail_balance:   bool,
        pub fail_orders:    bool,
        pub hang_balance:   bool,
        pub fail_cancel:    HashSet<String>,
        /// 1-based placement attempt numbers that are rejected.
        pub fail_placement: HashSet<usize>,
        pub calls:          Mutex<Vec<Call>>,
    }

    impl RecordingExchange {
        pub(crate) fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: Call) -> usize {
            let mut calls = self.calls.lock().unwrap();
            calls.push(call);
            calls
                .iter()
                .filter(|c| matches!(c, Call::Buy { .. } | Call::Sell { .. }))
                .count()
        }

        fn placement(&self, call: Call) -> Result<OrderAck, ExchangeError> {
            let n = self.record(call);
            if self.fail_placement.contains(&n) {
                Err(ExchangeError::Rejected(format!("attempt {n} rejected")))
            } else {
                Ok(OrderAck { order_id: format!("ord-{n}"), message: None })
            }
        }
    }

    #[async_trait]
    impl ExchangeClient for RecordingExchange {
        async fn get_balance(&self) -> Result<Balance, ExchangeError> {
            self.record(Call::Balance);
            if self.hang_balance {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            if self.fail_balance {
                return Err(ExchangeError::Unreachable("down".into()));
            }
            Ok(Balance::new(self.balances.clone()))
        }

        async fn get_open_orders(&self) -> Result<Vec<OpenOrder>, ExchangeError> {
            self.record(Call::OpenOrders);
            if self.fail_orders {
                return Err(ExchangeError::Http { status: 500, body: "boom".into() });
            }
            Ok(self.orders.clone())
        }

        async fn cancel(&self, order_id: &str) -> Result<(), ExchangeError> {
            self.record(Call::Cancel(order_id.to_string()));
            if self.fail_cancel.contains(order_id) {
                return Err(ExchangeError::Rejected("already filled".into()));
            }
            Ok(())
        }

        async fn place_buy(&self, _base: &str, counter: &str, amount: f64, price: f64) -> Result<OrderAck, ExchangeError> {
            self.placement(Call::Buy { counter: counter.to_string(), amount, price })
        }

        async fn place_sell(&self, _base: &str, counter: &str, amount: f64, price: f64) -> Result<OrderAck, ExchangeError> {
            self.placement(Call::Sell { counter: counter.to_string(), amount, price })
        }
    }

    // ── Fixtures ──────────────────────────────────────────────────────────────

    fn pair(counter: &str) -> TrackedPair {
        TrackedPair {
            market_data_id:   counter.to_lowercase(),
            base:             "VIVA".into(),
            counter:          counter.into(),
            target_spread:    0.0,
            price_target_key: counter.into(),
            tiers:            TierSet {
                buy:  vec![Tier { offset_percent: 1.0, amount: 1.0 }],
                sell: vec![Tier { offset_percent: 1.0, amount: 1.0 }],
            },
        }
    }

    fn config(pairs: Vec<TrackedPair>) -> Config {
        Config { target_valuation: 1.0, poll_interval_seconds: 120, tracked_pairs: pairs }
    }

    fn level(price: f64, amount: f64) -> Level {
        Level { price, amount }
    }

    async fn store_with(key: &str, buy: Vec<Level>, sell: Vec<Level>) -> PriceTargetStore {
        let store = PriceTargetStore::new();
        store
            .set(key, PriceTarget { base: "VIVA".into(), counter: key.into(), buy, sell })
            .await;
        store
    }

    fn order(id: &str, counter: &str) -> OpenOrder {
        OpenOrder {
            id:      id.into(),
            base:    "VIVA".into(),
            counter: counter.into(),
            side:    None,
            price:   0.1,
            amount:  1.0,
        }
    }

    fn rich(code: &str) -> HashMap<String, f64> {
        HashMap::from([(code.to_string(), 1_000_000.0)])
    }

    fn reconciler(ex: Arc<RecordingExchange>, bus: &EventBus, route: SellRoute) -> Reconciler {
        Reconciler::new(ex, bus.clone(), route, Duration::from_millis(200))
    }

    fn count(sub: &mut Subscription, pred: impl Fn(&BotEvent) -> bool) -> usize {
        sub.drain().iter().filter(|n| pred(&n.event)).count()
    }

    fn placements(calls: &[Call]) -> usize {
        calls.iter().filter(|c| matches!(c, Call::Buy { .. } | Call::Sell { .. })).count()
    }

    // ── Tests ─────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_insufficient_balance_skips_level() {
        let ex = Arc::new(RecordingExchange {
            balances: HashMap::from([("BTC".to_string(), 1.0)]),
            ..Default::default()
        });
        let bus = EventBus::new(64);
        let mut sub = bus.subscribe();
        let store = store_with("BTC", vec![level(0.095238, 50.0)], vec![]).await;

        let report = reconciler(ex.clone(), &bus, SellRoute::Distinct)
            .reconcile(Uuid::new_v4(), &config(vec![pair("BTC")]), &store)
            .await;

        assert_eq!(placements(&ex.calls()), 0);
        assert_eq!(report.skipped_insufficient, 1);
        assert_eq!(report.placement_attempts, 0);
        assert_eq!(count(&mut sub, |e| matches!(e, BotEvent::InsufficientBalance { .. })), 1);
    }

    #[tokio::test]
    async fn test_balance_gate_is_per_level() {
        // 2.0 covers the 1.5 level but not the 2.5 one.
        let ex = Arc::new(RecordingExchange {
            balances: HashMap::from([("BTC".to_string(), 2.0)]),
            ..Default::default()
        });
        let bus = EventBus::new(64);
        let store = store_with("BTC", vec![level(0.5, 3.0), level(0.5, 5.0)], vec![level(1.0, 1.0)]).await;

        let report = reconciler(ex.clone(), &bus, SellRoute::Distinct)
            .reconcile(Uuid::new_v4(), &config(vec![pair("BTC")]), &store)
            .await;

        assert_eq!(report.placed, 2);
        assert_eq!(report.skipped_insufficient, 1);
        assert_eq!(placements(&ex.calls()), 2);
    }

    #[tokio::test]
    async fn test_placement_failure_does_not_stop_the_ladder() {
        let ex = Arc::new(RecordingExchange {
            balances:       rich("BTC"),
            fail_placement: HashSet::from([1]),
            ..Default::default()
        });
        let bus = EventBus::new(64);
        let mut sub = bus.subscribe();
        let store = store_with(
            "BTC",
            vec![level(0.1, 1.0), level(0.09, 2.0), level(0.08, 3.0)],
            vec![],
        )
        .await;

        let report = reconciler(ex.clone(), &bus, SellRoute::Distinct)
            .reconcile(Uuid::new_v4(), &config(vec![pair("BTC")]), &store)
            .await;

        assert_eq!(placements(&ex.calls()), 3);
        assert_eq!(report.placement_attempts, 3);
        assert_eq!(report.placement_failures, 1);
        assert_eq!(report.placed, 2);
        assert_eq!(count(&mut sub, |e| matches!(e, BotEvent::OrderFailed { .. })), 1);
    }

    #[tokio::test]
    async fn test_balance_failure_aborts_cycle() {
        let ex = Arc::new(RecordingExchange {
            fail_balance: true,
            orders:       vec![order("1", "BTC")],
            ..Default::default()
        });
        let bus = EventBus::new(64);
        let mut sub = bus.subscribe();
        let store = store_with("BTC", vec![level(0.1, 1.0)], vec![level(0.2, 1.0)]).await;

        let report = reconciler(ex.clone(), &bus, SellRoute::Distinct)
            .reconcile(Uuid::new_v4(), &config(vec![pair("BTC")]), &store)
            .await;

        assert_eq!(ex.calls(), vec![Call::Balance]);
        assert!(report.aborted.is_some());
        assert_eq!((report.cancelled, report.placement_attempts), (0, 0));
        assert_eq!(count(&mut sub, |e| matches!(e, BotEvent::CycleAborted { .. })), 1);
    }

    #[tokio::test]
    async fn test_open_orders_failure_aborts_cycle() {
        let ex = Arc::new(RecordingExchange {
            balances:    rich("BTC"),
            fail_orders: true,
            ..Default::default()
        });
        let bus = EventBus::new(64);
        let store = store_with("BTC", vec![level(0.1, 1.0)], vec![]).await;

        let report = reconciler(ex.clone(), &bus, SellRoute::Distinct)
            .reconcile(Uuid::new_v4(), &config(vec![pair("BTC")]), &store)
            .await;

        assert_eq!(ex.calls(), vec![Call::Balance, Call::OpenOrders]);
        assert!(report.aborted.unwrap().contains("open orders"));
    }

    #[tokio::test]
    async fn test_hanging_exchange_times_out() {
        let ex = Arc::new(RecordingExchange { hang_balance: true, ..Default::default() });
        let bus = EventBus::new(64);
        let store = PriceTargetStore::new();

        let report = Reconciler::new(ex.clone(), bus, SellRoute::Distinct, Duration::from_millis(20))
            .reconcile(Uuid::new_v4(), &config(vec![pair("BTC")]), &store)
            .await;

        assert!(report.aborted.unwrap().contains("timed out"));
        assert_eq!(ex.calls(), vec![Call::Balance]);
    }

    #[tokio::test]
    async fn test_cancels_only_tracked_pair_orders_and_tolerates_failures() {
        let ex = Arc::new(RecordingExchange {
            balances:    rich("BTC"),
            orders:      vec![order("1", "BTC"), order("2", "LTC"), order("3", "BTC")],
            fail_cancel: HashSet::from(["1".to_string()]),
            ..Default::default()
        });
        let bus = EventBus::new(64);
        let mut sub = bus.subscribe();
        let store = store_with("BTC", vec![level(0.1, 1.0)], vec![]).await;

        let report = reconciler(ex.clone(), &bus, SellRoute::Distinct)
            .reconcile(Uuid::new_v4(), &config(vec![pair("BTC")]), &store)
            .await;

        let cancels: Vec<_> = ex
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Cancel(id) => Some(id),
                _ => None,
            })
            .collect();
        assert_eq!(cancels, vec!["1".to_string(), "3".to_string()]);
        assert_eq!((report.cancelled, report.cancel_failures), (1, 1));
        assert_eq!(report.placed, 1);
        assert_eq!(count(&mut sub, |e| matches!(e, BotEvent::CancelFailed { .. })), 1);
    }

    #[tokio::test]
    async fn test_cancels_everything_before_placing() {
        let ex = Arc::new(RecordingExchange {
            balances: rich("BTC"),
            orders:   vec![order("1", "BTC"), order("2", "BTC")],
            ..Default::default()
        });
        let bus = EventBus::new(64);
        let store = store_with("BTC", vec![level(0.1, 1.0)], vec![level(0.2, 2.0)]).await;

        reconciler(ex.clone(), &bus, SellRoute::Distinct)
            .reconcile(Uuid::new_v4(), &config(vec![pair("BTC")]), &store)
            .await;

        assert_eq!(
            ex.calls(),
            vec![
                Call::Balance,
                Call::OpenOrders,
                Call::Cancel("1".into()),
                Call::Cancel("2".into()),
                Call::Buy { counter: "BTC".into(), amount: 1.0, price: 0.1 },
                Call::Sell { counter: "BTC".into(), amount: 2.0, price: 0.2 },
            ]
        );
    }

    #[tokio::test]
    async fn test_sell_levels_routed_through_buy_when_configured() {
        let ex = Arc::new(RecordingExchange { balances: rich("BTC"), ..Default::default() });
        let bus = EventBus::new(64);
        let store = store_with("BTC", vec![level(0.1, 1.0)], vec![level(0.2, 2.0)]).await;

        let report = reconciler(ex.clone(), &bus, SellRoute::ViaBuy)
            .reconcile(Uuid::new_v4(), &config(vec![pair("BTC")]), &store)
            .await;

        let calls = ex.calls();
        assert_eq!(report.placed, 2);
        assert!(calls.contains(&Call::Buy { counter: "BTC".into(), amount: 2.0, price: 0.2 }));
        assert!(!calls.iter().any(|c| matches!(c, Call::Sell { .. })));
    }

    #[tokio::test]
    async fn test_pair_without_target_is_cancelled_but_not_replaced() {
        let ex = Arc::new(RecordingExchange {
            balances: rich("LTC"),
            orders:   vec![order("1", "BTC"), order("2", "LTC")],
            ..Default::default()
        });
        let bus = EventBus::new(64);
        let mut sub = bus.subscribe();
        let store = store_with("LTC", vec![level(0.1, 1.0)], vec![]).await;

        let report = reconciler(ex.clone(), &bus, SellRoute::Distinct)
            .reconcile(Uuid::new_v4(), &config(vec![pair("BTC"), pair("LTC")]), &store)
            .await;

        assert_eq!(report.skipped_pairs, vec!["BTC".to_string()]);
        assert_eq!(report.cancelled, 2);
        assert!(ex.calls().contains(&Call::Cancel("1".into())));
        assert!(!ex.calls().contains(&Call::Buy { counter: "BTC".into(), amount: 1.0, price: 0.1 }));
        assert_eq!(report.placed, 1);
        assert_eq!(count(&mut sub, |e| matches!(e, BotEvent::PairSkipped { .. })), 1);
    }

    #[tokio::test]
    async fn test_every_action_is_narrated() {
        let ex = Arc::new(RecordingExchange {
            balances: HashMap::from([("BTC".to_string(), 0.15)]),
            orders:   vec![order("1", "BTC")],
            ..Default::default()
        });
        let bus = EventBus::new(64);
        let mut sub = bus.subscribe();
        // 0.1 fits, 0.4 does not.
        let store = store_with("BTC", vec![level(0.1, 1.0)], vec![level(0.2, 2.0)]).await;

        reconciler(ex, &bus, SellRoute::Distinct)
            .reconcile(Uuid::new_v4(), &config(vec![pair("BTC")]), &store)
            .await;

        let events: Vec<_> = sub.drain().into_iter().map(|n| n.event).collect();
        assert!(matches!(events[0], BotEvent::BalanceSnapshot { .. }));
        assert!(matches!(events[1], BotEvent::CancellingOrder { .. }));
        assert!(matches!(events[2], BotEvent::PlacingOrder { side: Side::Buy, .. }));
        assert!(matches!(events[3], BotEvent::OrderPlaced { side: Side::Buy, .. }));
        assert!(matches!(events[4], BotEvent::InsufficientBalance { side: Side::Sell, .. }));
        assert_eq!(events.len(), 5);
    }
}
