//! Market state reader.
//!
//! Derives, per market:
//! - total underlying supplied from the receipt-token supply and the
//!   exchange rate (never the raw receipt supply)
//! - utilization = borrows / (cash + borrows)
//! - supply and borrow APY from the simple annual rates
//!
//! The exchange rate passes through the shared [`ExchangeRateGuard`]; a
//! regressed sample is replaced by the last accepted rate and flagged.

use alloy::primitives::U256;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::ExchangeRateGuard;
use crate::{
    chain::{read_uint, ChainDataPort, ReadCall, ReadResult},
    config::MarketSettings,
    helpers::{mantissa_to_f64, to_human, underlying_from_receipt},
    logging::targets,
    prelude::*,
    Error, Market, MarketReading, MarketState, RateKind, ReadFailure, StaleDataFault,
};

const CALLS_PER_MARKET: usize = 6;

/// Compound a simple annual rate over `periods` accrual periods.
pub fn compound_apy(simple_annual_rate: f64, periods: u32) -> f64 {
    let n = f64::from(periods.max(1));
    (1.0 + simple_annual_rate / n).powf(n) - 1.0
}

/// Displayed APY for a 1e18 rate mantissa.
///
/// Rates above `max_annual_rate` are rejected; accepted ones are
/// compounded and clamped to `[0, max_apy]`.
pub fn apy_from_rate(
    market: &str,
    kind: RateKind,
    rate_mantissa: U256,
    settings: &MarketSettings,
) -> std::result::Result<f64, StaleDataFault> {
    let out_of_bounds = |rate: f64| StaleDataFault::RateOutOfBounds {
        market: market.to_string(),
        kind,
        rate,
        max: settings.max_annual_rate,
    };
    let rate = mantissa_to_f64(rate_mantissa).map_err(|_| out_of_bounds(f64::INFINITY))?;
    if !rate.is_finite() || rate > settings.max_annual_rate {
        return Err(out_of_bounds(rate));
    }
    let apy = compound_apy(rate, settings.periods_per_year);
    Ok(if apy.is_finite() {
        apy.clamp(0.0, settings.max_apy)
    } else {
        settings.max_apy
    })
}

/// `borrows / (cash + borrows)`, 0 when both are 0.
pub fn utilization(cash: f64, borrows: f64) -> f64 {
    let total = cash + borrows;
    if total <= 0.0 {
        0.0
    } else {
        (borrows / total).clamp(0.0, 1.0)
    }
}

pub struct MarketStateReader {
    chain: Arc<dyn ChainDataPort>,
    settings: MarketSettings,
    guard: Arc<ExchangeRateGuard>,
}

impl MarketStateReader {
    pub fn new(
        chain: Arc<dyn ChainDataPort>,
        settings: MarketSettings,
        guard: Arc<ExchangeRateGuard>,
    ) -> Self {
        Self {
            chain,
            settings,
            guard,
        }
    }

    fn calls_for(market: &Market) -> [ReadCall; CALLS_PER_MARKET] {
        let ltoken = market.ltoken;
        [
            ReadCall::TotalSupply { ltoken },
            ReadCall::ExchangeRate { ltoken },
            ReadCall::Cash { ltoken },
            ReadCall::TotalBorrows { ltoken },
            ReadCall::SupplyRate { ltoken },
            ReadCall::BorrowRate { ltoken },
        ]
    }

    pub async fn get_market_state(&self, market: &Market) -> Result<MarketState> {
        let mut states = self.get_market_states(std::slice::from_ref(market)).await;
        states
            .remove(&market.symbol)
            .unwrap_or(Err(Error::Read(ReadFailure::Missing)))
    }

    /// Read several markets in one batch; each result stands alone.
    pub async fn get_market_states(&self, markets: &[Market]) -> HashMap<String, Result<MarketState>> {
        let calls: Vec<ReadCall> = markets.iter().flat_map(Self::calls_for).collect();
        let results = self.chain.read(&calls).await;

        markets
            .iter()
            .enumerate()
            .map(|(i, market)| {
                let start = i * CALLS_PER_MARKET;
                let slice = results.get(start..start + CALLS_PER_MARKET).unwrap_or(&[]);
                let state = self.derive(market, slice);
                if let Err(e) = &state {
                    debug!(target: targets::MARKET, market = %market.symbol, error = %e, "Market read failed");
                }
                (market.symbol.clone(), state)
            })
            .collect()
    }

    /// Like [`get_market_states`](Self::get_market_states), in `markets` order,
    /// keeping failed markets as [`MarketReading::Unavailable`].
    pub async fn get_market_readings(&self, markets: &[Market]) -> Vec<MarketReading> {
        let mut states = self.get_market_states(markets).await;
        markets
            .iter()
            .map(|market| {
                let state = states
                    .remove(&market.symbol)
                    .unwrap_or(Err(Error::Read(ReadFailure::Missing)));
                MarketReading::new(&market.symbol, state)
            })
            .collect()
    }

    fn derive(&self, market: &Market, results: &[ReadResult]) -> Result<MarketState> {
        let slot = |i: usize| -> std::result::Result<U256, ReadFailure> {
            results.get(i).map_or(Err(ReadFailure::Missing), read_uint)
        };

        let receipt_total_supply = slot(0)?;
        let sampled_rate = slot(1)?;
        let cash = slot(2)?;
        let total_borrows = slot(3)?;
        let supply_rate = slot(4)?;
        let borrow_rate = slot(5)?;

        let mut faults = Vec::new();
        let exchange_rate = match self.guard.check(&market.symbol, sampled_rate) {
            Ok(rate) => rate,
            Err(fault) => match self.guard.last_accepted(&market.symbol) {
                Some(previous) => {
                    faults.push(fault);
                    previous
                }
                None => return Err(fault.into()),
            },
        };

        let total_supplied_underlying =
            underlying_from_receipt(receipt_total_supply, exchange_rate, market.underlying_decimals)?;

        let utilization = utilization(
            to_human(cash, market.underlying_decimals)?,
            to_human(total_borrows, market.underlying_decimals)?,
        );

        let mut apy = |kind: RateKind, rate: U256| {
            match apy_from_rate(&market.symbol, kind, rate, &self.settings) {
                Ok(apy) => Some(apy),
                Err(fault) => {
                    warn!(target: targets::MARKET, market = %market.symbol, fault = %fault, "Discarding rate");
                    faults.push(fault);
                    None
                }
            }
        };
        let supply_apy = apy(RateKind::Supply, supply_rate);
        let borrow_apy = apy(RateKind::Borrow, borrow_rate);

        Ok(MarketState {
            symbol: market.symbol.clone(),
            receipt_total_supply,
            total_supplied_underlying,
            total_borrows,
            cash,
            exchange_rate,
            supply_rate,
            borrow_rate,
            utilization,
            supply_apy,
            borrow_apy,
            faults,
            fetched_at_ms: chrono::Utc::now().timestamp_millis(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helpers::mantissa_scale;
    use crate::test_utils::{sample_markets, wad, MarketFixture, ScriptedChain};

    fn percent(p: u64) -> U256 {
        U256::from(p) * mantissa_scale() / U256::from(100u64)
    }

    fn reader(chain: Arc<ScriptedChain>) -> MarketStateReader {
        MarketStateReader::new(
            chain,
            MarketSettings::default(),
            Arc::new(ExchangeRateGuard::new()),
        )
    }

    #[test]
    fn test_compound_apy() {
        assert_eq!(compound_apy(0.0, 365), 0.0);
        let apy = compound_apy(0.05, 365);
        assert!((apy - 0.051267).abs() < 1e-5, "apy = {apy}");
        assert!(compound_apy(0.05, 1) - 0.05 < 1e-12);
    }

    #[test]
    fn test_apy_clamped_and_bounded() {
        let settings = MarketSettings::default();
        // 90% simple compounds above the 100% ceiling.
        let apy = apy_from_rate("lETH", RateKind::Borrow, percent(90), &settings).unwrap();
        assert_eq!(apy, settings.max_apy);

        let err = apy_from_rate("lETH", RateKind::Borrow, percent(600), &settings).unwrap_err();
        assert!(matches!(err, StaleDataFault::RateOutOfBounds { .. }));
    }

    #[test]
    fn test_utilization_bounds() {
        assert_eq!(utilization(0.0, 0.0), 0.0);
        assert_eq!(utilization(0.0, 10.0), 1.0);
        assert_eq!(utilization(30.0, 10.0), 0.25);
    }

    #[tokio::test]
    async fn test_total_supplied_uses_exchange_rate_and_decimals() {
        let markets = sample_markets();
        let usdc = &markets[0];
        let chain = Arc::new(ScriptedChain::new());
        chain.set_market(
            usdc.ltoken,
            MarketFixture {
                total_supply: wad(1_000),
                exchange_rate: U256::from(1_020_000_000_000_000_000u128),
                cash: U256::from(750_000_000u64),
                total_borrows: U256::from(250_000_000u64),
                supply_rate: percent(3),
                borrow_rate: percent(5),
            },
        );

        let state = reader(chain).get_market_state(usdc).await.unwrap();
        assert_eq!(state.receipt_total_supply, wad(1_000));
        assert_eq!(state.total_supplied_underlying, U256::from(1_020_000_000u64));
        assert_eq!(state.total_supplied(usdc).unwrap(), 1020.0);
        assert_eq!(state.utilization, 0.25);
        assert!(state.supply_apy.unwrap() > 0.03);
        assert!(state.faults.is_empty());
    }

    #[tokio::test]
    async fn test_total_supplied_non_decreasing_for_fixed_receipt_supply() {
        let markets = sample_markets();
        let eth = &markets[1];
        let chain = Arc::new(ScriptedChain::new());
        let reader = reader(chain.clone());

        let mut fixture = MarketFixture::with_rate(wad(500), U256::from(1_010_000_000_000_000_000u128));
        chain.set_market(eth.ltoken, fixture.clone());
        let first = reader.get_market_state(eth).await.unwrap();

        fixture.exchange_rate = U256::from(1_011_000_000_000_000_000u128);
        chain.set_market(eth.ltoken, fixture);
        let second = reader.get_market_state(eth).await.unwrap();

        assert!(second.total_supplied_underlying >= first.total_supplied_underlying);
    }

    #[tokio::test]
    async fn test_regressed_exchange_rate_is_discarded_and_flagged() {
        let markets = sample_markets();
        let eth = &markets[1];
        let chain = Arc::new(ScriptedChain::new());
        let reader = reader(chain.clone());

        let high = U256::from(1_050_000_000_000_000_000u128);
        let mut fixture = MarketFixture::with_rate(wad(100), high);
        chain.set_market(eth.ltoken, fixture.clone());
        reader.get_market_state(eth).await.unwrap();

        fixture.exchange_rate = U256::from(1_000_000_000_000_000_000u128);
        chain.set_market(eth.ltoken, fixture);
        let state = reader.get_market_state(eth).await.unwrap();

        assert_eq!(state.exchange_rate, high);
        assert_eq!(state.total_supplied_underlying, wad(105));
        assert!(state.is_degraded());
        assert!(matches!(
            state.faults[0],
            StaleDataFault::ExchangeRateRegression { .. }
        ));
    }

    #[tokio::test]
    async fn test_faults_survive_json_output() {
        let markets = sample_markets();
        let eth = &markets[1];
        let chain = Arc::new(ScriptedChain::new());
        let reader = reader(chain.clone());

        let mut fixture = MarketFixture::with_rate(wad(100), U256::from(1_050_000_000_000_000_000u128));
        chain.set_market(eth.ltoken, fixture.clone());
        reader.get_market_state(eth).await.unwrap();
        fixture.exchange_rate = mantissa_scale();
        chain.set_market(eth.ltoken, fixture);

        let state = reader.get_market_state(eth).await.unwrap();
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["faults"][0]["fault"], "exchange_rate_regression");
        assert_eq!(json["faults"][0]["market"], "lETH");
    }

    #[tokio::test]
    async fn test_readings_keep_failed_markets() {
        let markets = sample_markets();
        let (usdc, eth) = (&markets[0], &markets[1]);
        let chain = Arc::new(ScriptedChain::new());
        chain.set_market(usdc.ltoken, MarketFixture::with_rate(wad(10), mantissa_scale()));

        let readings = reader(chain).get_market_readings(&markets[..2]).await;

        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0].symbol(), usdc.symbol);
        assert!(readings[0].state().is_some());
        assert!(!readings[0].is_degraded());
        assert_eq!(readings[1].symbol(), eth.symbol);
        assert!(readings[1].state().is_none());
        assert!(readings[1].is_degraded());

        let json = serde_json::to_value(&readings).unwrap();
        assert_eq!(json[0]["status"], "available");
        assert_eq!(json[1]["status"], "unavailable");
        assert_eq!(json[1]["symbol"], "lETH");
        assert!(json[1]["error"].as_str().unwrap().contains("reverted"));
    }

    #[tokio::test]
    async fn test_absurd_rate_recorded_as_fault() {
        let markets = sample_markets();
        let eth = &markets[1];
        let chain = Arc::new(ScriptedChain::new());
        let mut fixture = MarketFixture::with_rate(wad(1), mantissa_scale());
        fixture.borrow_rate = percent(10_000);
        chain.set_market(eth.ltoken, fixture);

        let state = reader(chain).get_market_state(eth).await.unwrap();
        assert_eq!(state.borrow_apy, None);
        assert!(state.supply_apy.is_some());
        assert_eq!(state.faults.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_required_read_fails_market() {
        let markets = sample_markets();
        let chain = Arc::new(ScriptedChain::new());
        let err = reader(chain).get_market_state(&markets[2]).await.unwrap_err();
        assert!(matches!(err, Error::Read(_)));
    }
}
