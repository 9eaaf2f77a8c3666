use alloy::primitives::{Address, U256};
use serde::Serialize;

use crate::{helpers::to_human, prelude::*, serde_utils::serialize_display, Error, StaleDataFault};

/// Immutable market descriptor, created once from configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Market {
    /// Receipt-token symbol (e.g. "lUSDC")
    pub symbol: String,
    /// Display name (e.g. "USD Coin")
    pub name: String,
    /// Underlying asset symbol (e.g. "USDC")
    pub underlying_symbol: String,
    /// Decimal precision of the underlying asset
    pub underlying_decimals: u8,
    /// Fraction of supplied value usable as borrowing power, 0 < cf <= 1
    pub collateral_factor: f64,
    /// Fraction beyond which a position is liquidatable, cf < lt <= 1
    pub liquidation_threshold: f64,
    /// Receipt-token (market) contract
    pub ltoken: Address,
    /// Underlying ERC-20 contract
    pub underlying: Address,
}

impl Market {
    /// Human units of a raw underlying amount of this market.
    pub fn underlying_to_human(&self, raw: U256) -> Result<f64> {
        to_human(raw, self.underlying_decimals)
    }
}

/// Aggregate state of one market, refetched on a polling interval.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketState {
    pub symbol: String,
    /// Raw receipt-token total supply as reported by the contract
    pub receipt_total_supply: U256,
    /// Underlying supplied, derived from the receipt supply and the exchange rate
    pub total_supplied_underlying: U256,
    pub total_borrows: U256,
    /// Available cash (underlying held by the market)
    pub cash: U256,
    /// Underlying per receipt token, 1e18 mantissa
    pub exchange_rate: U256,
    /// Simple annual supply rate, 1e18 mantissa
    pub supply_rate: U256,
    /// Simple annual borrow rate, 1e18 mantissa
    pub borrow_rate: U256,
    /// borrows / (cash + borrows), in [0, 1]
    pub utilization: f64,
    /// Compounded supply APY, `None` when the raw rate was discarded
    pub supply_apy: Option<f64>,
    /// Compounded borrow APY, `None` when the raw rate was discarded
    pub borrow_apy: Option<f64>,
    /// Reliability faults detected while deriving this state
    pub faults: Vec<StaleDataFault>,
    /// Wall-clock time of the read (unix ms)
    pub fetched_at_ms: i64,
}

impl MarketState {
    pub fn total_supplied(&self, market: &Market) -> Result<f64> {
        market.underlying_to_human(self.total_supplied_underlying)
    }

    pub fn total_borrowed(&self, market: &Market) -> Result<f64> {
        market.underlying_to_human(self.total_borrows)
    }

    /// Cash available to borrow, in underlying units.
    pub fn liquidity(&self, market: &Market) -> Result<f64> {
        market.underlying_to_human(self.cash)
    }

    pub fn is_degraded(&self) -> bool {
        !self.faults.is_empty()
    }
}

/// One market's read outcome: its state, or why it is unknown.
///
/// A market that failed to read stays in the list as `Unavailable`, so
/// "unknown" is never confused with "absent".
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MarketReading {
    Available(MarketState),
    Unavailable {
        symbol: String,
        #[serde(serialize_with = "serialize_display")]
        error: Error,
    },
}

impl MarketReading {
    pub fn new(symbol: &str, result: Result<MarketState>) -> Self {
        match result {
            Ok(state) => Self::Available(state),
            Err(error) => Self::Unavailable {
                symbol: symbol.to_string(),
                error,
            },
        }
    }

    pub fn symbol(&self) -> &str {
        match self {
            Self::Available(state) => &state.symbol,
            Self::Unavailable { symbol, .. } => symbol,
        }
    }

    pub fn state(&self) -> Option<&MarketState> {
        match self {
            Self::Available(state) => Some(state),
            Self::Unavailable { .. } => None,
        }
    }

    /// Unavailable, or available with discarded values.
    pub fn is_degraded(&self) -> bool {
        self.state().map_or(true, MarketState::is_degraded)
    }
}
