//! Exchange-rate monotonicity guard.
//!
//! Interest accrual only ever increases a market's exchange rate. A read
//! that goes backwards is treated as stale or corrupted: it is rejected,
//! the last accepted value is kept, and the caller flags the market.

use alloy::primitives::U256;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tracing::warn;

use crate::{logging::targets, StaleDataFault};

#[derive(Debug, Default)]
pub struct ExchangeRateGuard {
    /// Highest accepted rate per market symbol
    last_accepted: Mutex<HashMap<String, U256>>,
    /// Rejected samples per market symbol
    regressions: Mutex<HashMap<String, u64>>,
}

impl ExchangeRateGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate a fresh exchange-rate sample for `market`.
    ///
    /// Accepted samples become the new reference; rejected ones leave the
    /// reference unchanged.
    pub fn check(&self, market: &str, rate: U256) -> Result<U256, StaleDataFault> {
        if rate.is_zero() {
            return Err(StaleDataFault::ZeroExchangeRate {
                market: market.to_string(),
            });
        }

        let mut last = self
            .last_accepted
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(previous) = last.get(market).copied() {
            if rate < previous {
                drop(last);
                *self
                    .regressions
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .entry(market.to_string())
                    .or_insert(0) += 1;
                warn!(
                    target: targets::MARKET,
                    market = %market,
                    previous = %previous,
                    current = %rate,
                    "Exchange rate decreased, discarding sample"
                );
                return Err(StaleDataFault::ExchangeRateRegression {
                    market: market.to_string(),
                    previous,
                    current: rate,
                });
            }
        }

        last.insert(market.to_string(), rate);
        Ok(rate)
    }

    /// Last accepted rate for `market`.
    pub fn last_accepted(&self, market: &str) -> Option<U256> {
        self.last_accepted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(market)
            .copied()
    }

    pub fn regression_count(&self, market: &str) -> u64 {
        self.regressions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(market)
            .copied()
            .unwrap_or(0)
    }

    /// Forget all history, e.g. after switching networks.
    pub fn reset(&self) {
        self.last_accepted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.regressions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
