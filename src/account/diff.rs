//! Change-set between two account snapshots.
//!
//! Takes both snapshots explicitly; nothing is remembered between calls.

use alloy::primitives::U256;
use serde::Serialize;

use super::risk_model::RiskTier;
use super::snapshot::{AccountSnapshot, MarketPosition};
use crate::serde_utils::serialize_unbounded_f64;

/// USD moves below this are treated as noise.
pub const SIGNIFICANT_USD_CHANGE: f64 = 0.01;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketChange {
    pub symbol: String,
    pub receipt_balance: (Option<U256>, Option<U256>),
    pub borrow_balance: (Option<U256>, Option<U256>),
    pub exchange_rate: (Option<U256>, Option<U256>),
    /// `None` when either side is unknown
    pub supplied_usd_change: Option<f64>,
    pub borrowed_usd_change: Option<f64>,
    /// Supplied value grew with an unchanged receipt balance and a higher rate
    pub accrual_only: bool,
    pub became_degraded: bool,
    pub recovered: bool,
}

impl MarketChange {
    fn between(prev: Option<&MarketPosition>, next: &MarketPosition) -> Self {
        let prev_receipt = prev.and_then(|p| p.receipt_balance);
        let prev_borrow = prev.and_then(|p| p.borrow_balance);
        let prev_rate = prev.and_then(|p| p.exchange_rate);

        let supplied_usd_change = match (prev.and_then(|p| p.supplied_usd.known()), next.supplied_usd.known()) {
            (Some(a), Some(b)) => Some(b - a),
            _ => None,
        };
        let borrowed_usd_change = match (prev.and_then(|p| p.borrowed_usd.known()), next.borrowed_usd.known()) {
            (Some(a), Some(b)) => Some(b - a),
            _ => None,
        };

        let rate_increased = matches!((prev_rate, next.exchange_rate), (Some(a), Some(b)) if b > a);
        let accrual_only = prev_receipt.is_some()
            && prev_receipt == next.receipt_balance
            && rate_increased
            && supplied_usd_change.is_some_and(|c| c > 0.0);

        let was_degraded = prev.is_some_and(MarketPosition::is_degraded);
        Self {
            symbol: next.symbol.clone(),
            receipt_balance: (prev_receipt, next.receipt_balance),
            borrow_balance: (prev_borrow, next.borrow_balance),
            exchange_rate: (prev_rate, next.exchange_rate),
            supplied_usd_change,
            borrowed_usd_change,
            accrual_only,
            became_degraded: !was_degraded && next.is_degraded(),
            recovered: was_degraded && !next.is_degraded(),
        }
    }

    pub fn balances_changed(&self) -> bool {
        self.receipt_balance.0 != self.receipt_balance.1 || self.borrow_balance.0 != self.borrow_balance.1
    }

    fn is_noise(&self) -> bool {
        let small = |c: Option<f64>| c.map_or(true, |c| c.abs() < SIGNIFICANT_USD_CHANGE);
        !self.balances_changed()
            && small(self.supplied_usd_change)
            && small(self.borrowed_usd_change)
            && !self.became_degraded
            && !self.recovered
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotDiff {
    pub supplied_usd_change: f64,
    pub borrowed_usd_change: f64,
    #[serde(serialize_with = "serialize_unbounded_f64")]
    pub health_factor_before: f64,
    #[serde(serialize_with = "serialize_unbounded_f64")]
    pub health_factor_after: f64,
    /// Set when the risk tier moved
    pub tier_change: Option<(RiskTier, RiskTier)>,
    /// Markets that changed beyond noise
    pub markets: Vec<MarketChange>,
    pub elapsed_ms: i64,
}

impl SnapshotDiff {
    pub fn between(prev: &AccountSnapshot, next: &AccountSnapshot) -> Self {
        let markets = next
            .positions
            .iter()
            .map(|p| MarketChange::between(prev.position(&p.symbol), p))
            .filter(|c| !c.is_noise())
            .collect();

        Self {
            supplied_usd_change: next.total_supplied_usd - prev.total_supplied_usd,
            borrowed_usd_change: next.total_borrowed_usd - prev.total_borrowed_usd,
            health_factor_before: prev.health_factor,
            health_factor_after: next.health_factor,
            tier_change: (prev.risk_tier != next.risk_tier).then_some((prev.risk_tier, next.risk_tier)),
            markets,
            elapsed_ms: next.taken_at_ms - prev.taken_at_ms,
        }
    }

    pub fn is_significant(&self) -> bool {
        self.supplied_usd_change.abs() >= SIGNIFICANT_USD_CHANGE
            || self.borrowed_usd_change.abs() >= SIGNIFICANT_USD_CHANGE
            || self.tier_change.is_some()
            || !self.markets.is_empty()
    }

    pub fn market(&self, symbol: &str) -> Option<&MarketChange> {
        self.markets.iter().find(|m| m.symbol == symbol)
    }
}
