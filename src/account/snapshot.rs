use alloy::primitives::{Address, U256};
use serde::Serialize;

use super::risk_model::{BorrowLimitEstimate, RiskTier};
use crate::{serde_utils::serialize_unbounded_f64, PriceResolution, ReadFailure, StaleDataFault};

/// A USD amount that may be unknowable from the data at hand.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "status", content = "usd", rename_all = "snake_case")]
pub enum UsdValue {
    Known(f64),
    Unknown,
}

impl UsdValue {
    pub fn known(&self) -> Option<f64> {
        match self {
            UsdValue::Known(v) => Some(*v),
            UsdValue::Unknown => None,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, UsdValue::Known(_))
    }

    /// Contribution to a total: unknown values count as zero.
    pub fn or_zero(&self) -> f64 {
        self.known().unwrap_or(0.0)
    }
}

/// Why a position's figures are incomplete or less reliable.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum Degradation {
    /// Receipt-token balance could not be read
    SupplyUnreadable(String),
    /// Borrow balance could not be read
    BorrowUnreadable(String),
    /// Exchange rate unreadable, or regressed with no earlier sample to fall back to
    ExchangeRateUnavailable(String),
    /// Exchange rate regressed; the last accepted rate was used
    ExchangeRateRegressed(String),
    /// No usable price; USD values unknown
    PriceUnknown(String),
    /// A configured fallback price was used
    FallbackPrice(String),
}

impl Degradation {
    pub(crate) fn supply_unreadable(e: &ReadFailure) -> Self {
        Degradation::SupplyUnreadable(e.to_string())
    }

    pub(crate) fn borrow_unreadable(e: &ReadFailure) -> Self {
        Degradation::BorrowUnreadable(e.to_string())
    }

    pub(crate) fn regressed(fault: &StaleDataFault) -> Self {
        Degradation::ExchangeRateRegressed(fault.to_string())
    }
}

/// One market's contribution to an account snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketPosition {
    pub symbol: String,
    pub underlying_symbol: String,
    pub underlying_decimals: u8,
    pub collateral_factor: f64,
    pub liquidation_threshold: f64,

    /// Raw receipt-token balance (18 decimals)
    pub receipt_balance: Option<U256>,
    /// Raw borrow balance (underlying decimals)
    pub borrow_balance: Option<U256>,
    /// Exchange rate used for this position
    pub exchange_rate: Option<U256>,
    /// Whether the account has entered this market as collateral
    pub entered: Option<bool>,

    /// Supplied amount in underlying units
    pub supplied: Option<f64>,
    /// Borrowed amount in underlying units
    pub borrowed: Option<f64>,

    pub price: PriceResolution,
    pub supplied_usd: UsdValue,
    pub borrowed_usd: UsdValue,
    /// `supplied_usd × collateral_factor`
    pub borrow_power_usd: UsdValue,

    pub supply_apy: Option<f64>,
    pub borrow_apy: Option<f64>,

    pub degradations: Vec<Degradation>,
}

impl MarketPosition {
    /// Any field estimated, substituted or unknown.
    pub fn is_degraded(&self) -> bool {
        !self.degradations.is_empty()
    }

    /// `Some(false)` only when both balances were read and are zero.
    pub fn has_position(&self) -> Option<bool> {
        match (self.receipt_balance, self.borrow_balance) {
            (Some(r), Some(b)) => Some(!r.is_zero() || !b.is_zero()),
            (Some(r), None) if !r.is_zero() => Some(true),
            (None, Some(b)) if !b.is_zero() => Some(true),
            _ => None,
        }
    }
}

/// Immutable risk picture of one account at one point in time.
///
/// Built wholesale by the aggregator and replaced, never patched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountSnapshot {
    pub account: Address,
    pub positions: Vec<MarketPosition>,

    /// Sum of known supplied values
    pub total_supplied_usd: f64,
    /// Sum of known borrowed values
    pub total_borrowed_usd: f64,
    /// Sum of known per-market borrow power
    pub borrow_power_usd: f64,

    pub borrow_limit: BorrowLimitEstimate,
    pub borrow_limit_usd: f64,
    pub borrow_limit_used_pct: f64,
    pub available_to_borrow_usd: f64,

    #[serde(serialize_with = "serialize_unbounded_f64")]
    pub health_factor: f64,
    /// Collateral-weighted liquidation threshold
    pub liquidation_threshold: f64,
    pub loan_to_value: f64,
    pub risk_tier: RiskTier,

    /// Markets whose contribution is incomplete
    pub degraded_markets: Vec<String>,
    pub taken_at_ms: i64,
}

impl AccountSnapshot {
    pub fn position(&self, symbol: &str) -> Option<&MarketPosition> {
        self.positions.iter().find(|p| p.symbol == symbol)
    }

    /// Every market contributed fully from live data.
    pub fn is_complete(&self) -> bool {
        self.degraded_markets.is_empty()
    }

    pub fn has_debt(&self) -> bool {
        self.total_borrowed_usd > 0.0
    }
}
