//! Background polling of account snapshots and market state.
//!
//! A [`Poller`] runs one fetch per interval tick and publishes the latest
//! successful value on a `watch` channel. A failed fetch keeps the previous
//! value and records the error next to it. Refresh requests arriving while
//! a fetch is in flight are coalesced into one follow-up fetch.

use alloy::primitives::Address;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::{
    account::{AccountPositionAggregator, AccountSnapshot, SnapshotDiff},
    info::MarketStateReader,
    logging::targets,
    prelude::*,
    Error, Market, MarketReading,
};

/// Latest published value of a poller.
#[derive(Debug)]
pub struct PollState<T> {
    /// Last successful fetch
    pub latest: Option<Arc<T>>,
    /// Error from the most recent fetch, cleared on success
    pub last_error: Option<Error>,
    pub consecutive_failures: u32,
    pub fetch_count: u64,
}

impl<T> Default for PollState<T> {
    fn default() -> Self {
        Self {
            latest: None,
            last_error: None,
            consecutive_failures: 0,
            fetch_count: 0,
        }
    }
}

impl<T> Clone for PollState<T> {
    fn clone(&self) -> Self {
        Self {
            latest: self.latest.clone(),
            last_error: self.last_error.clone(),
            consecutive_failures: self.consecutive_failures,
            fetch_count: self.fetch_count,
        }
    }
}

/// Cloneable handle that asks a poller to fetch early.
#[derive(Debug, Clone)]
pub struct RefreshTrigger {
    tx: mpsc::Sender<()>,
}

impl RefreshTrigger {
    /// Request a fetch as soon as the poller is free.
    pub fn refresh_now(&self) {
        // A full channel already holds a pending request
        let _ = self.tx.try_send(());
    }

    /// Request a fetch after `delay`.
    pub fn refresh_after(&self, delay: Duration) -> JoinHandle<()> {
        let trigger = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            trigger.refresh_now();
        })
    }
}

/// Owner side of a running poller.
pub struct PollerHandle<T> {
    name: &'static str,
    state: watch::Receiver<PollState<T>>,
    trigger: RefreshTrigger,
    task: JoinHandle<()>,
}

impl<T> PollerHandle<T> {
    pub fn latest(&self) -> Option<Arc<T>> {
        self.state.borrow().latest.clone()
    }

    pub fn state(&self) -> PollState<T> {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PollState<T>> {
        self.state.clone()
    }

    pub fn trigger(&self) -> RefreshTrigger {
        self.trigger.clone()
    }

    pub fn refresh_now(&self) {
        self.trigger.refresh_now();
    }

    pub fn refresh_after(&self, delay: Duration) -> JoinHandle<()> {
        self.trigger.refresh_after(delay)
    }

    pub fn shutdown(self) {
        info!(target: targets::MONITOR, poller = self.name, "Stopping poller");
        self.task.abort();
    }
}

pub struct Poller;

impl Poller {
    /// Spawn a poller calling `fetch` every `period`, starting immediately.
    pub fn spawn<T, F, Fut>(name: &'static str, period: Duration, fetch: F) -> PollerHandle<T>
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send,
    {
        Self::spawn_with(name, period, fetch, |_, _| {})
    }

    /// Like [`spawn`](Self::spawn), calling `on_update(previous, next)` after each successful fetch.
    pub fn spawn_with<T, F, Fut, U>(
        name: &'static str,
        period: Duration,
        fetch: F,
        on_update: U,
    ) -> PollerHandle<T>
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send,
        U: Fn(Option<&T>, &T) + Send + Sync + 'static,
    {
        let (state_tx, state_rx) = watch::channel(PollState::default());
        let (refresh_tx, mut refresh_rx) = mpsc::channel::<()>(1);

        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(target: targets::MONITOR, poller = name, period_ms = period.as_millis() as u64, "Poller started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    Some(()) = refresh_rx.recv() => {
                        debug!(target: targets::MONITOR, poller = name, "Refresh requested");
                        ticker.reset();
                    }
                }

                let result = fetch().await;
                state_tx.send_modify(|state| {
                    state.fetch_count += 1;
                    match result {
                        Ok(value) => {
                            on_update(state.latest.as_deref(), &value);
                            state.latest = Some(Arc::new(value));
                            state.last_error = None;
                            state.consecutive_failures = 0;
                        }
                        Err(e) => {
                            state.consecutive_failures += 1;
                            warn!(
                                target: targets::MONITOR,
                                poller = name,
                                error = %e,
                                failures = state.consecutive_failures,
                                "Fetch failed, keeping previous value"
                            );
                            state.last_error = Some(e);
                        }
                    }
                });

                if state_tx.is_closed() {
                    break;
                }
            }
        });

        PollerHandle {
            name,
            state: state_rx,
            trigger: RefreshTrigger { tx: refresh_tx },
            task,
        }
    }
}

/// Poll `account`'s snapshot, logging significant changes between polls.
pub fn spawn_account_monitor(
    aggregator: Arc<AccountPositionAggregator>,
    account: Address,
    markets: Vec<Market>,
    period: Duration,
) -> PollerHandle<AccountSnapshot> {
    let markets = Arc::new(markets);
    Poller::spawn_with(
        "account",
        period,
        move || {
            let aggregator = aggregator.clone();
            let markets = markets.clone();
            async move { aggregator.get_account_snapshot(account, &markets).await }
        },
        log_snapshot_change,
    )
}

/// Poll market state for every market in `markets`.
///
/// Each published list holds one [`MarketReading`] per market, in order,
/// including the markets that failed to read. A poll where every market
/// fails counts as a failed fetch and keeps the previous list.
pub fn spawn_market_monitor(
    reader: Arc<MarketStateReader>,
    markets: Vec<Market>,
    period: Duration,
) -> PollerHandle<Vec<MarketReading>> {
    let markets = Arc::new(markets);
    Poller::spawn("markets", period, move || {
        let reader = reader.clone();
        let markets = markets.clone();
        async move {
            let readings = reader.get_market_readings(&markets).await;
            let mut last_err = None;
            for reading in &readings {
                if let MarketReading::Unavailable { symbol, error } = reading {
                    debug!(target: targets::MONITOR, market = %symbol, error = %error, "Market state unavailable");
                    last_err = Some(error.clone());
                }
            }
            match last_err {
                Some(e) if readings.iter().all(|r| r.state().is_none()) => Err(e),
                _ => Ok(readings),
            }
        }
    })
}

fn log_snapshot_change(prev: Option<&AccountSnapshot>, next: &AccountSnapshot) {
    let Some(prev) = prev else {
        info!(
            target: targets::MONITOR,
            account = %next.account,
            supplied_usd = next.total_supplied_usd,
            borrowed_usd = next.total_borrowed_usd,
            health_factor = next.health_factor,
            tier = %next.risk_tier,
            "Initial snapshot"
        );
        return;
    };

    let diff = SnapshotDiff::between(prev, next);
    if let Some((from, to)) = diff.tier_change {
        warn!(target: targets::MONITOR, account = %next.account, from = %from, to = %to, health_factor = next.health_factor, "Risk tier changed");
    }
    for change in &diff.markets {
        if change.became_degraded {
            warn!(target: targets::MONITOR, market = %change.symbol, "Market data degraded");
        } else if change.recovered {
            info!(target: targets::MONITOR, market = %change.symbol, "Market data recovered");
        } else if change.accrual_only {
            debug!(target: targets::MONITOR, market = %change.symbol, change = ?change.supplied_usd_change, "Interest accrued");
        } else if change.balances_changed() {
            info!(
                target: targets::MONITOR,
                market = %change.symbol,
                supplied_change = ?change.supplied_usd_change,
                borrowed_change = ?change.borrowed_usd_change,
                "Position changed"
            );
        }
    }
}
