//! # engine::scheduler
//!
//! **Poll Scheduler**: the single loop that drives everything:
//!
//! ```text
//! every poll interval (first fire immediately at startup):
//!   1. snapshot config
//!   2. fetch ticker          ── fail → narrate, keep previous targets
//!   3. compute targets       ── fail per pair → narrate, pair sits out
//!   4. reconcile             ── see engine::reconciler
//! ```
//! Cycles never overlap: the next tick is only awaited once the current cycle
//! returns.  A shutdown signal is observed between cycles, so an in-flight
//! cycle always completes.

use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, interval_at, Instant, Interval};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{Config, MAX_POLL_INTERVAL_SECS};
use crate::events::{BotEvent, EventBus};
use crate::market::{FetchError, MarketDataProvider};
use crate::state::SharedState;

use super::calculator::compute_targets;
use super::reconciler::CycleReport;
use super::store::PriceTargetStore;

/// Fetch the ticker and refresh the store for every pair in `config`.
///
/// Returns the number of pairs whose target was updated, or the fetch error
/// (already narrated) when the ticker was unavailable.
pub async fn refresh_targets(
    config:  &Config,
    market:  &dyn MarketDataProvider,
    store:   &PriceTargetStore,
    events:  &EventBus,
    timeout: Duration,
) -> Result<usize, FetchError> {
    // Pairs dropped by a reload must not linger in the store.
    let keys: Vec<&str> = config
        .tracked_pairs
        .iter()
        .map(|p| p.price_target_key.as_str())
        .collect();
    store.retain_keys(&keys).await;

    let ids = config.market_data_ids();
    let ticker = match tokio::time::timeout(timeout, market.fetch(&ids)).await {
        Ok(Ok(ticker)) => ticker,
        Ok(Err(e)) => {
            events.publish(BotEvent::FetchFailed { error: e.to_string() });
            return Err(e);
        }
        Err(_) => {
            let e = FetchError::Timeout(timeout);
            events.publish(BotEvent::FetchFailed { error: e.to_string() });
            return Err(e);
        }
    };

    let mut updated = 0;
    for pair in &config.tracked_pairs {
        let key = pair.price_target_key.as_str();

        let Some(entry) = ticker.get(&pair.market_data_id) else {
            events.publish(BotEvent::TickerMissing {
                price_target_key: key.to_string(),
                market_data_id:   pair.market_data_id.clone(),
            });
            continue;
        };

        match compute_targets(entry.price_usd, config.target_valuation, pair) {
            Ok(target) => {
                events.publish(BotEvent::TargetsComputed {
                    price_target_key: key.to_string(),
                    price_usd:        entry.price_usd,
                    price_btc:        entry.price_btc,
                    target:           Box::new(target.clone()),
                });
                store.set(key, target).await;
                updated += 1;
            }
            Err(e) => {
                store.remove(key).await;
                events.publish(BotEvent::ComputationFailed {
                    price_target_key: key.to_string(),
                    error:            e.to_string(),
                });
            }
        }
    }

    debug!(updated, pairs = config.tracked_pairs.len(), "Targets refreshed");
    Ok(updated)
}

/// One full fetch → compute → reconcile pass.
pub async fn run_cycle(state: &SharedState) -> CycleReport {
    let cycle_id = Uuid::new_v4();
    let config = state.current_config().await;

    state.events.publish(BotEvent::CycleStarted {
        cycle_id,
        pairs: config.tracked_pairs.len(),
    });

    // A failed fetch is already narrated; reconcile with what the store holds.
    let _ = refresh_targets(
        &config,
        state.market.as_ref(),
        &state.targets,
        &state.events,
        state.settings.upstream_timeout,
    )
    .await;

    let report = state.reconciler.reconcile(cycle_id, &config, &state.targets).await;

    state.cycle_count.fetch_add(1, Ordering::Relaxed);
    state.set_last_report(report.clone()).await;
    state.events.publish(BotEvent::CycleCompleted {
        report: Box::new(report.clone()),
    });

    report
}

/// Run cycles until `shutdown` flips to `true` (or its sender is dropped).
pub async fn run(state: SharedState, mut shutdown: watch::Receiver<bool>) {
    let mut period = bounded_period(state.current_config().await.poll_interval());
    // First tick completes immediately: no idle wait at startup.
    let mut ticker = interval(period);

    info!(interval = ?period, "⏱️ Poll scheduler started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                run_cycle(&state).await;

                let next = bounded_period(state.current_config().await.poll_interval());
                if next != period {
                    info!(from = ?period, to = ?next, "Poll interval changed, re-arming timer");
                    period = next;
                    ticker = rearm(period);
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!(cycles = state.cycle_count.load(Ordering::Relaxed), "⏹️ Poll scheduler stopped");
}

/// Clamp to the range the config accepts; `interval` panics on zero.
fn bounded_period(period: Duration) -> Duration {
    period.clamp(Duration::from_secs(1), Duration::from_secs(MAX_POLL_INTERVAL_SECS))
}

/// Timer whose first tick is one full `period` from now.
fn rearm(period: Duration) -> Interval {
    match Instant::now().checked_add(period) {
        Some(start) => interval_at(start, period),
        None => {
            warn!(interval = ?period, "Poll interval overflows the clock, firing on the next tick");
            interval(period)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::*;
    use crate::config::tests::sample_config;
    use crate::config::{ConfigStore, Settings};
    use crate::exchange::{ExchangeClient, PaperExchange};
    use crate::market::FixedPrices;
    use crate::models::{Ticker, TickerEntry};
    use crate::state::build_state;

    /// Serves queued responses, then keeps failing.
    struct ScriptedMarket {
        responses: Mutex<VecDeque<Result<Ticker, FetchError>>>,
    }

    impl ScriptedMarket {
        fn new(responses: Vec<Result<Ticker, FetchError>>) -> Self {
            Self { responses: Mutex::new(responses.into()) }
        }
    }

    #[async_trait]
    impl MarketDataProvider for ScriptedMarket {
        async fn fetch(&self, _ids: &[String]) -> Result<Ticker, FetchError> {
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(FetchError::Unreachable("no more data".into())))
        }
    }

    fn btc_ticker(price_usd: f64) -> Ticker {
        Ticker::new(vec![TickerEntry { id: "bitcoin".into(), price_usd, price_btc: 1.0 }])
    }

    fn paper() -> Arc<PaperExchange> {
        Arc::new(PaperExchange::new(HashMap::from([("BTC".to_string(), 1_000.0)])))
    }

    fn state_with(
        config:   Config,
        exchange: Arc<PaperExchange>,
        market:   Arc<dyn MarketDataProvider>,
    ) -> SharedState {
        build_state(Settings::default(), ConfigStore::new(config, None), exchange, market)
    }

    #[tokio::test]
    async fn test_cycle_replaces_walls_each_time() {
        let exchange = paper();
        let state = state_with(
            sample_config(),
            exchange.clone(),
            Arc::new(ScriptedMarket::new(vec![Ok(btc_ticker(100.0)), Ok(btc_ticker(200.0))])),
        );

        let first = run_cycle(&state).await;
        assert_eq!((first.placed, first.cancelled), (2, 0));
        let resting = exchange.get_open_orders().await.unwrap();
        assert_eq!(resting.len(), 2);
        assert!((resting[0].price - 1.0 / 10.5).abs() < 1e-12);

        let second = run_cycle(&state).await;
        assert_eq!((second.placed, second.cancelled), (2, 2));
        let resting = exchange.get_open_orders().await.unwrap();
        assert_eq!(resting.len(), 2);
        assert!((resting[0].price - 1.0 / 21.0).abs() < 1e-12);

        assert_eq!(state.cycle_count.load(Ordering::Relaxed), 2);
        assert_eq!(state.last_report.read().await.as_ref().unwrap().cycle_id, second.cycle_id);
    }

    #[tokio::test]
    async fn test_fetch_failure_keeps_stale_targets() {
        let exchange = paper();
        let state = state_with(
            sample_config(),
            exchange.clone(),
            Arc::new(ScriptedMarket::new(vec![Ok(btc_ticker(100.0))])),
        );
        run_cycle(&state).await;
        let before = state.targets.get("BTC").await.unwrap();

        let mut sub = state.events.subscribe();
        let report = run_cycle(&state).await;

        let after = state.targets.get("BTC").await.unwrap();
        assert_eq!(*before, *after);
        assert_eq!(report.placed, 2);
        assert!(sub.drain().iter().any(|n| matches!(n.event, BotEvent::FetchFailed { .. })));
    }

    #[tokio::test]
    async fn test_computation_error_skips_pair() {
        let mut config = sample_config();
        config.target_valuation = 0.0;
        let exchange = paper();
        let state = state_with(config, exchange.clone(), Arc::new(FixedPrices::default()));
        let mut sub = state.events.subscribe();

        let report = run_cycle(&state).await;

        assert_eq!(report.skipped_pairs, vec!["BTC".to_string()]);
        assert_eq!(report.placement_attempts, 0);
        assert!(exchange.get_open_orders().await.unwrap().is_empty());
        let events = sub.drain();
        assert!(events.iter().any(|n| matches!(n.event, BotEvent::ComputationFailed { .. })));
    }

    #[tokio::test]
    async fn test_reload_drops_removed_pairs_from_store() {
        let state = state_with(sample_config(), paper(), Arc::new(FixedPrices::default()));
        run_cycle(&state).await;
        assert!(state.targets.get("BTC").await.is_some());

        let mut next = sample_config();
        next.tracked_pairs[0].market_data_id = "litecoin".into();
        next.tracked_pairs[0].counter = "LTC".into();
        next.tracked_pairs[0].price_target_key = "LTC".into();
        state.config.reload(next).await.unwrap();

        run_cycle(&state).await;
        assert!(state.targets.get("BTC").await.is_none());
        assert!(state.targets.get("LTC").await.is_some());
    }

    #[tokio::test]
    async fn test_run_fires_immediately_and_stops_on_shutdown() {
        let state = state_with(sample_config(), paper(), Arc::new(FixedPrices::default()));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(run(state.clone(), rx));

        tokio::time::timeout(Duration::from_secs(5), async {
            while state.cycle_count.load(Ordering::Relaxed) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("first cycle should run without waiting a full interval");

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("scheduler should stop")
            .unwrap();
        assert_eq!(state.cycle_count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_period_is_clamped_to_accepted_range() {
        assert_eq!(bounded_period(Duration::MAX), Duration::from_secs(MAX_POLL_INTERVAL_SECS));
        assert_eq!(bounded_period(Duration::ZERO), Duration::from_secs(1));
        assert_eq!(bounded_period(Duration::from_secs(120)), Duration::from_secs(120));
    }

    fn with_interval(secs: u64) -> Config {
        let mut config = sample_config();
        config.poll_interval_seconds = secs;
        config
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_rearms_poll_interval() {
        let state = state_with(with_interval(10), paper(), Arc::new(FixedPrices::default()));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run(state.clone(), rx));

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(state.cycle_count.load(Ordering::Relaxed), 1);

        state.config.reload(with_interval(60)).await.unwrap();

        // The 10s tick already armed still fires, then the timer moves to 60s.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(state.cycle_count.load(Ordering::Relaxed), 2);

        tokio::time::sleep(Duration::from_secs(55)).await;
        assert_eq!(state.cycle_count.load(Ordering::Relaxed), 2);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(state.cycle_count.load(Ordering::Relaxed), 3);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_interval_does_not_stop_scheduler() {
        let state = state_with(with_interval(5), paper(), Arc::new(FixedPrices::default()));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run(state.clone(), rx));

        tokio::time::sleep(Duration::from_millis(1)).await;
        state.config.replace_unchecked(with_interval(u64::MAX)).await;

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(state.cycle_count.load(Ordering::Relaxed), 2);
        assert!(!handle.is_finished());

        // Clamped to one day rather than overflowing the clock.
        tokio::time::sleep(Duration::from_secs(MAX_POLL_INTERVAL_SECS)).await;
        assert_eq!(state.cycle_count.load(Ordering::Relaxed), 3);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
