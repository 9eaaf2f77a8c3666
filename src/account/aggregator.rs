//! Account position aggregation.
//!
//! Turns raw per-market balances, exchange rates and oracle prices into one
//! [`AccountSnapshot`]:
//! - every market is converted with its own exchange rate, decimals and price
//! - a failed read degrades only its own market, and the snapshot says which
//! - borrow limit reconciles the comptroller's liquidity with the
//!   collateral-factor-derived borrow power, keeping both figures
//!
//! Position reads and price reads are issued concurrently; the snapshot is
//! assembled only after both complete.

use alloy::primitives::{Address, U256};
use std::sync::Arc;
use tracing::{debug, warn};

use super::risk_model::{
    available_to_borrow, borrow_limit, borrow_limit_used_pct, borrow_power, health_factor,
    loan_to_value, risk_tier, weighted_liquidation_threshold,
};
use super::snapshot::{AccountSnapshot, Degradation, MarketPosition, UsdValue};
use crate::{
    chain::{read_bool, read_uint, ChainDataPort, ReadCall, ReadResult, ReadValue},
    config::MarketSettings,
    consts::BORROW_LIMIT_DISCREPANCY_TOLERANCE,
    helpers::{mantissa_to_f64, to_human, underlying_from_receipt},
    info::{apy_from_rate, ExchangeRateGuard, PriceOracleReader},
    logging::targets,
    prelude::*,
    Error, Market, PriceEntry, PriceResolution, RateKind, ReadFailure,
};

const CALLS_PER_MARKET: usize = 6;

pub struct AccountPositionAggregator {
    chain: Arc<dyn ChainDataPort>,
    oracle: Arc<PriceOracleReader>,
    guard: Arc<ExchangeRateGuard>,
    settings: MarketSettings,
}

impl AccountPositionAggregator {
    pub fn new(
        chain: Arc<dyn ChainDataPort>,
        oracle: Arc<PriceOracleReader>,
        guard: Arc<ExchangeRateGuard>,
        settings: MarketSettings,
    ) -> Self {
        Self {
            chain,
            oracle,
            guard,
            settings,
        }
    }

    fn calls_for(account: Address, market: &Market) -> [ReadCall; CALLS_PER_MARKET] {
        let ltoken = market.ltoken;
        [
            ReadCall::ReceiptBalance { ltoken, account },
            ReadCall::BorrowBalance { ltoken, account },
            ReadCall::ExchangeRate { ltoken },
            ReadCall::SupplyRate { ltoken },
            ReadCall::BorrowRate { ltoken },
            ReadCall::Membership { account, ltoken },
        ]
    }

    /// Build a fresh snapshot for `account` over `markets`.
    ///
    /// Fails only when the chain could not be reached at all; any narrower
    /// failure produces a snapshot with degraded markets.
    pub async fn get_account_snapshot(
        &self,
        account: Address,
        markets: &[Market],
    ) -> Result<AccountSnapshot> {
        let mut calls: Vec<ReadCall> = markets
            .iter()
            .flat_map(|m| Self::calls_for(account, m))
            .collect();
        calls.push(ReadCall::AccountLiquidity { account });

        let (results, price_reads) =
            tokio::join!(self.chain.read(&calls), self.oracle.get_prices(markets));

        if let Some(failure) = unreachable_chain(&results) {
            warn!(target: targets::ACCOUNT, account = %account, error = %failure, "Chain unreachable, no snapshot");
            return Err(Error::Read(failure));
        }

        let positions: Vec<MarketPosition> = markets
            .iter()
            .enumerate()
            .map(|(i, market)| {
                let start = i * CALLS_PER_MARKET;
                let slice = results.get(start..start + CALLS_PER_MARKET).unwrap_or(&[]);
                self.build_position(market, slice, price_reads.get(&market.symbol))
            })
            .collect();

        let liquidity = results
            .get(markets.len() * CALLS_PER_MARKET)
            .and_then(|r| liquidity_usd(account, r));

        Ok(self.assemble(account, positions, liquidity))
    }

    fn build_position(
        &self,
        market: &Market,
        results: &[ReadResult],
        price_read: Option<&std::result::Result<PriceEntry, ReadFailure>>,
    ) -> MarketPosition {
        let slot = |i: usize| results.get(i).map_or(Err(ReadFailure::Missing), read_uint);
        let mut degradations = Vec::new();

        let receipt_balance = slot(0)
            .map_err(|e| degradations.push(Degradation::supply_unreadable(&e)))
            .ok();
        let borrow_balance = slot(1)
            .map_err(|e| degradations.push(Degradation::borrow_unreadable(&e)))
            .ok();

        // The guard sees every sample, even when the balance makes it irrelevant.
        let rate_outcome = slot(2).map(|rate| {
            self.guard
                .check(&market.symbol, rate)
                .map_err(|fault| (fault, self.guard.last_accepted(&market.symbol)))
        });

        let supplied = match receipt_balance {
            Some(receipt) if receipt.is_zero() => Some(0.0),
            Some(receipt) => {
                let exchange_rate = match &rate_outcome {
                    Ok(Ok(rate)) => Some(*rate),
                    Ok(Err((fault, Some(previous)))) => {
                        degradations.push(Degradation::regressed(fault));
                        Some(*previous)
                    }
                    Ok(Err((fault, None))) => {
                        degradations.push(Degradation::ExchangeRateUnavailable(fault.to_string()));
                        None
                    }
                    Err(e) => {
                        degradations.push(Degradation::ExchangeRateUnavailable(e.to_string()));
                        None
                    }
                };
                exchange_rate.and_then(|rate| {
                    supplied_underlying(market, receipt, rate)
                        .map_err(|e| degradations.push(Degradation::SupplyUnreadable(e.to_string())))
                        .ok()
                })
            }
            None => None,
        };

        let borrowed = borrow_balance.and_then(|raw| {
            market
                .underlying_to_human(raw)
                .map_err(|e| degradations.push(Degradation::BorrowUnreadable(e.to_string())))
                .ok()
        });

        let price = self.oracle.resolve(market, price_read);
        let exposed = supplied != Some(0.0) || borrowed != Some(0.0);
        if exposed {
            match &price {
                PriceResolution::Fallback { reason, .. } => {
                    degradations.push(Degradation::FallbackPrice(reason.clone()))
                }
                PriceResolution::Unknown { reason } => {
                    degradations.push(Degradation::PriceUnknown(reason.clone()))
                }
                PriceResolution::Live { .. } => {}
            }
        }

        let supplied_usd = to_usd(supplied, &price);
        let borrowed_usd = to_usd(borrowed, &price);
        let borrow_power_usd = match supplied_usd {
            UsdValue::Known(usd) => UsdValue::Known(borrow_power(usd, market.collateral_factor)),
            UsdValue::Unknown => UsdValue::Unknown,
        };

        let apy = |kind: RateKind, result: std::result::Result<U256, ReadFailure>| {
            let rate = result.ok()?;
            apy_from_rate(&market.symbol, kind, rate, &self.settings)
                .map_err(|fault| {
                    warn!(target: targets::ACCOUNT, market = %market.symbol, fault = %fault, "Discarding rate");
                })
                .ok()
        };

        let exchange_rate = match rate_outcome {
            Ok(Ok(rate)) | Ok(Err((_, Some(rate)))) => Some(rate),
            _ => None,
        };

        if !degradations.is_empty() {
            debug!(
                target: targets::ACCOUNT,
                market = %market.symbol,
                degradations = ?degradations,
                "Position degraded"
            );
        }

        MarketPosition {
            symbol: market.symbol.clone(),
            underlying_symbol: market.underlying_symbol.clone(),
            underlying_decimals: market.underlying_decimals,
            collateral_factor: market.collateral_factor,
            liquidation_threshold: market.liquidation_threshold,
            receipt_balance,
            borrow_balance,
            exchange_rate,
            entered: results.get(5).and_then(|r| read_bool(r).ok()),
            supplied,
            borrowed,
            price,
            supplied_usd,
            borrowed_usd,
            borrow_power_usd,
            supply_apy: apy(RateKind::Supply, slot(3)),
            borrow_apy: apy(RateKind::Borrow, slot(4)),
            degradations,
        }
    }

    fn assemble(
        &self,
        account: Address,
        positions: Vec<MarketPosition>,
        liquidity: Option<(f64, f64)>,
    ) -> AccountSnapshot {
        let total_supplied_usd: f64 = positions.iter().map(|p| p.supplied_usd.or_zero()).sum();
        let total_borrowed_usd: f64 = positions.iter().map(|p| p.borrowed_usd.or_zero()).sum();
        let borrow_power_usd: f64 = positions.iter().map(|p| p.borrow_power_usd.or_zero()).sum();

        let estimate = borrow_limit(total_borrowed_usd, borrow_power_usd, liquidity);
        if let Some(gap) = estimate.relative_discrepancy() {
            if gap > BORROW_LIMIT_DISCREPANCY_TOLERANCE {
                warn!(
                    target: targets::ACCOUNT,
                    account = %account,
                    protocol_usd = ?estimate.protocol_usd,
                    computed_usd = estimate.computed_usd,
                    relative_gap = gap,
                    source = ?estimate.source,
                    "Borrow limit estimates disagree"
                );
            }
        }

        let liquidation_threshold = weighted_liquidation_threshold(
            positions
                .iter()
                .filter_map(|p| p.supplied_usd.known().map(|usd| (usd, p.liquidation_threshold))),
        );
        let health_factor = health_factor(total_supplied_usd, total_borrowed_usd, liquidation_threshold);
        let borrow_limit_usd = estimate.limit_usd;

        let degraded_markets: Vec<String> = positions
            .iter()
            .filter(|p| p.is_degraded())
            .map(|p| p.symbol.clone())
            .collect();

        let snapshot = AccountSnapshot {
            account,
            total_supplied_usd,
            total_borrowed_usd,
            borrow_power_usd,
            borrow_limit_usd,
            borrow_limit_used_pct: borrow_limit_used_pct(total_borrowed_usd, borrow_limit_usd),
            available_to_borrow_usd: available_to_borrow(borrow_limit_usd, total_borrowed_usd),
            health_factor,
            liquidation_threshold,
            loan_to_value: loan_to_value(total_supplied_usd, total_borrowed_usd),
            risk_tier: risk_tier(health_factor),
            borrow_limit: estimate,
            degraded_markets,
            positions,
            taken_at_ms: chrono::Utc::now().timestamp_millis(),
        };

        debug!(
            target: targets::ACCOUNT,
            account = %account,
            supplied_usd = snapshot.total_supplied_usd,
            borrowed_usd = snapshot.total_borrowed_usd,
            health_factor = snapshot.health_factor,
            tier = %snapshot.risk_tier,
            degraded = snapshot.degraded_markets.len(),
            "Snapshot built"
        );
        snapshot
    }
}

fn supplied_underlying(market: &Market, receipt: U256, exchange_rate: U256) -> Result<f64> {
    let raw = underlying_from_receipt(receipt, exchange_rate, market.underlying_decimals)?;
    to_human(raw, market.underlying_decimals)
}

fn to_usd(amount: Option<f64>, price: &PriceResolution) -> UsdValue {
    match (amount, price.usd()) {
        // A zero balance is worth zero at any price.
        (Some(a), _) if a == 0.0 => UsdValue::Known(0.0),
        (Some(a), Some(p)) => UsdValue::Known(a * p),
        _ => UsdValue::Unknown,
    }
}

/// `(liquidity, shortfall)` in USD from the comptroller read.
fn liquidity_usd(account: Address, result: &ReadResult) -> Option<(f64, f64)> {
    match result {
        Ok(ReadValue::Liquidity {
            liquidity,
            shortfall,
        }) => match (mantissa_to_f64(*liquidity), mantissa_to_f64(*shortfall)) {
            (Ok(l), Ok(s)) => Some((l, s)),
            _ => None,
        },
        Ok(other) => {
            debug!(target: targets::ACCOUNT, account = %account, value = ?other, "Unexpected liquidity value");
            None
        }
        Err(e) => {
            debug!(target: targets::ACCOUNT, account = %account, error = %e, "Account liquidity unreadable");
            None
        }
    }
}

/// The transport failure shared by every result, if the whole batch failed.
fn unreachable_chain(results: &[ReadResult]) -> Option<ReadFailure> {
    let first = match results.first() {
        Some(Err(failure @ ReadFailure::Transport(_))) => failure.clone(),
        _ => return None,
    };
    results
        .iter()
        .all(|r| matches!(r, Err(ReadFailure::Transport(_))))
        .then_some(first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::risk_model::{BorrowLimitSource, RiskTier};
    use crate::config::OracleConfig;
    use crate::test_utils::{sample_markets, wad, ScriptedChain};

    const ACCOUNT: Address = Address::repeat_byte(0xaa);

    fn aggregator(chain: Arc<ScriptedChain>, oracle: OracleConfig) -> AccountPositionAggregator {
        let oracle = Arc::new(PriceOracleReader::new(chain.clone(), oracle));
        AccountPositionAggregator::new(
            chain,
            oracle,
            Arc::new(ExchangeRateGuard::new()),
            MarketSettings::default(),
        )
    }

    fn rate(milli: u64) -> U256 {
        U256::from(milli) * U256::from(1_000_000_000_000_000u64)
    }

    #[tokio::test]
    async fn test_each_market_uses_its_own_decimals_and_rate() {
        let markets = sample_markets();
        let (usdc, eth) = (&markets[0], &markets[1]);
        let chain = Arc::new(ScriptedChain::new());
        chain.set_position(usdc.ltoken, ACCOUNT, wad(1_000), U256::ZERO, rate(1_020));
        chain.set_position(eth.ltoken, ACCOUNT, wad(2), wad(1), rate(1_500));
        chain.set_price(usdc.ltoken, wad(1));
        chain.set_price(eth.ltoken, wad(2_000));
        chain.set_liquidity(ACCOUNT, U256::ZERO, U256::ZERO);

        let snapshot = aggregator(chain, OracleConfig::default())
            .get_account_snapshot(ACCOUNT, &markets[..2])
            .await
            .unwrap();

        let usdc_pos = snapshot.position("lUSDC").unwrap();
        assert_eq!(usdc_pos.supplied, Some(1_020.0));
        assert_eq!(usdc_pos.supplied_usd, UsdValue::Known(1_020.0));

        let eth_pos = snapshot.position("lETH").unwrap();
        assert_eq!(eth_pos.supplied, Some(3.0));
        assert_eq!(eth_pos.supplied_usd, UsdValue::Known(6_000.0));
        assert_eq!(eth_pos.borrowed_usd, UsdValue::Known(2_000.0));

        assert_eq!(snapshot.total_supplied_usd, 7_020.0);
        assert_eq!(snapshot.total_borrowed_usd, 2_000.0);
        assert!(snapshot.is_complete());
    }

    #[tokio::test]
    async fn test_unknown_price_degrades_only_its_market() {
        let markets = sample_markets();
        let (usdc, eth) = (&markets[0], &markets[1]);
        let chain = Arc::new(ScriptedChain::new());
        chain.set_position(usdc.ltoken, ACCOUNT, wad(1_000), U256::ZERO, rate(1_000));
        chain.set_position(eth.ltoken, ACCOUNT, wad(1), U256::ZERO, rate(1_000));
        chain.set_price(usdc.ltoken, wad(1));
        chain.fail_price(eth.ltoken, ReadFailure::Reverted("feed down".into()));

        let snapshot = aggregator(chain, OracleConfig::default())
            .get_account_snapshot(ACCOUNT, &markets[..2])
            .await
            .unwrap();

        let eth_pos = snapshot.position("lETH").unwrap();
        assert_eq!(eth_pos.supplied, Some(1.0));
        assert_eq!(eth_pos.supplied_usd, UsdValue::Unknown);
        assert!(matches!(eth_pos.degradations[0], Degradation::PriceUnknown(_)));
        assert_eq!(snapshot.total_supplied_usd, 1_000.0);
        assert_eq!(snapshot.degraded_markets, vec!["lETH".to_string()]);
    }

    #[tokio::test]
    async fn test_fallback_price_is_used_and_flagged() {
        let markets = sample_markets();
        let eth = &markets[1];
        let chain = Arc::new(ScriptedChain::new());
        chain.set_position(eth.ltoken, ACCOUNT, wad(1), U256::ZERO, rate(1_000));
        chain.fail_price(eth.ltoken, ReadFailure::Transport("timeout".into()));

        let mut oracle = OracleConfig::default();
        oracle.fallback_prices.insert("WETH".into(), 2_000.0);
        let snapshot = aggregator(chain, oracle)
            .get_account_snapshot(ACCOUNT, std::slice::from_ref(eth))
            .await
            .unwrap();

        let pos = snapshot.position("lETH").unwrap();
        assert!(pos.price.is_fallback());
        assert_eq!(pos.supplied_usd, UsdValue::Known(2_000.0));
        assert!(matches!(pos.degradations[0], Degradation::FallbackPrice(_)));
        assert!(!snapshot.is_complete());
    }

    #[tokio::test]
    async fn test_unreadable_balance_is_not_a_zero_position() {
        let markets = sample_markets();
        let usdc = &markets[0];
        let chain = Arc::new(ScriptedChain::new());
        chain.set_price(usdc.ltoken, wad(1));
        chain.set_read(
            ReadCall::ExchangeRate {
                ltoken: usdc.ltoken,
            },
            Ok(ReadValue::Uint(rate(1_000))),
        );

        let snapshot = aggregator(chain, OracleConfig::default())
            .get_account_snapshot(ACCOUNT, std::slice::from_ref(usdc))
            .await
            .unwrap();

        let pos = snapshot.position("lUSDC").unwrap();
        assert_eq!(pos.has_position(), None);
        assert_eq!(pos.supplied_usd, UsdValue::Unknown);
        assert!(pos.is_degraded());
    }

    #[tokio::test]
    async fn test_shortfall_pins_limit_to_debt() {
        let markets = sample_markets();
        let eth = &markets[1];
        let chain = Arc::new(ScriptedChain::new());
        chain.set_position(eth.ltoken, ACCOUNT, wad(1), wad(1), rate(1_000));
        chain.set_price(eth.ltoken, wad(2_000));
        chain.set_liquidity(ACCOUNT, U256::ZERO, wad(400));

        let snapshot = aggregator(chain, OracleConfig::default())
            .get_account_snapshot(ACCOUNT, std::slice::from_ref(eth))
            .await
            .unwrap();

        assert_eq!(snapshot.borrow_limit.source, BorrowLimitSource::Shortfall);
        assert_eq!(snapshot.borrow_limit_usd, 2_000.0);
        assert_eq!(snapshot.borrow_limit_used_pct, 100.0);
        assert_eq!(snapshot.available_to_borrow_usd, 0.0);
        assert_eq!(snapshot.risk_tier, RiskTier::Critical);
    }

    #[tokio::test]
    async fn test_regressed_rate_falls_back_to_last_accepted() {
        let markets = sample_markets();
        let eth = &markets[1];
        let chain = Arc::new(ScriptedChain::new());
        chain.set_price(eth.ltoken, wad(1_000));
        let aggregator = aggregator(chain.clone(), OracleConfig::default());

        chain.set_position(eth.ltoken, ACCOUNT, wad(1), U256::ZERO, rate(1_100));
        aggregator
            .get_account_snapshot(ACCOUNT, std::slice::from_ref(eth))
            .await
            .unwrap();

        chain.set_position(eth.ltoken, ACCOUNT, wad(1), U256::ZERO, rate(900));
        let snapshot = aggregator
            .get_account_snapshot(ACCOUNT, std::slice::from_ref(eth))
            .await
            .unwrap();

        let pos = snapshot.position("lETH").unwrap();
        assert_eq!(pos.exchange_rate, Some(rate(1_100)));
        assert_eq!(pos.supplied, Some(1.1));
        assert!(matches!(pos.degradations[0], Degradation::ExchangeRateRegressed(_)));
    }

    #[tokio::test]
    async fn test_unreachable_chain_yields_error() {
        let markets = sample_markets();
        let chain = Arc::new(ScriptedChain::new());
        chain.fail_all(ReadFailure::Transport("connection refused".into()));

        let err = aggregator(chain, OracleConfig::default())
            .get_account_snapshot(ACCOUNT, &markets)
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
