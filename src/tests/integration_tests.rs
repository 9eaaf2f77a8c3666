//! Integration tests for the read pipeline and the action coordinator.
//!
//! These tests verify that components work together correctly:
//! - Decimal-aware supplied value from receipt balance and exchange rate
//! - Loan-to-value, borrow power and available-to-borrow for one market
//! - An empty account is safe with an unbounded health factor
//! - Withdrawals beyond the receipt balance are rejected before any write
//! - A failed price read leaves every other market's USD value untouched

#[cfg(test)]
mod tests {
    use alloy::primitives::{Address, U256};
    use std::sync::Arc;

    use crate::account::{AccountPositionAggregator, AccountSnapshot, RiskTier, UsdValue};
    use crate::config::{CoordinatorConfig, MarketSettings, OracleConfig};
    use crate::exchange::{ActionRequest, ActionState, LendingActionCoordinator};
    use crate::helpers::{pow10, receipt_from_underlying, underlying_from_receipt};
    use crate::info::{ExchangeRateGuard, PriceOracleReader};
    use crate::test_utils::{sample_markets, wad, ScriptedChain};
    use crate::{Error, Market, PreconditionViolation, ReadFailure};

    const ACCOUNT: Address = Address::repeat_byte(0x42);

    fn market(symbol: &str) -> Market {
        sample_markets().into_iter().find(|m| m.symbol == symbol).unwrap()
    }

    async fn snapshot(chain: Arc<ScriptedChain>, markets: &[Market]) -> AccountSnapshot {
        let oracle = Arc::new(PriceOracleReader::new(chain.clone(), OracleConfig::default()));
        AccountPositionAggregator::new(
            chain,
            oracle,
            Arc::new(ExchangeRateGuard::new()),
            MarketSettings::default(),
        )
        .get_account_snapshot(ACCOUNT, markets)
        .await
        .unwrap()
    }

    // =========================================================================
    // Position valuation
    // =========================================================================

    #[tokio::test]
    async fn test_usdc_supply_uses_six_decimals() {
        let usdc = market("lUSDC");
        let rate = U256::from(1_020_000_000_000_000_000u128);
        let chain = Arc::new(ScriptedChain::new());
        chain.set_position(usdc.ltoken, ACCOUNT, wad(1_000), U256::ZERO, rate);
        chain.set_price(usdc.ltoken, wad(1));

        let raw = underlying_from_receipt(wad(1_000), rate, usdc.underlying_decimals).unwrap();
        assert_eq!(raw, U256::from(1_020u64) * pow10(6));

        let snap = snapshot(chain, std::slice::from_ref(&usdc)).await;
        let pos = snap.position("lUSDC").unwrap();
        assert_eq!(pos.supplied, Some(1_020.0));
        assert_eq!(pos.supplied_usd, UsdValue::Known(1_020.0));
        assert_eq!(snap.total_supplied_usd, 1_020.0);
    }

    #[tokio::test]
    async fn test_eth_ltv_and_borrow_capacity() {
        let eth = market("lETH");
        let chain = Arc::new(ScriptedChain::new());
        // 1 ETH supplied and 0.25 ETH borrowed at $2,000
        chain.set_position(eth.ltoken, ACCOUNT, wad(1), wad(1) / U256::from(4u64), wad(1));
        chain.set_price(eth.ltoken, wad(2_000));

        let snap = snapshot(chain, std::slice::from_ref(&eth)).await;
        assert_eq!(snap.total_supplied_usd, 2_000.0);
        assert_eq!(snap.total_borrowed_usd, 500.0);
        assert_eq!(snap.loan_to_value, 0.25);
        assert_eq!(snap.borrow_power_usd, 1_500.0);
        assert_eq!(snap.borrow_limit_usd, 1_500.0);
        assert_eq!(snap.available_to_borrow_usd, 1_000.0);
        assert!(snap.health_factor > 1.0);
    }

    #[tokio::test]
    async fn test_empty_account_is_safe() {
        let markets = sample_markets();
        let chain = Arc::new(ScriptedChain::new());
        for m in &markets {
            chain.set_position(m.ltoken, ACCOUNT, U256::ZERO, U256::ZERO, wad(1));
        }
        chain.set_liquidity(ACCOUNT, U256::ZERO, U256::ZERO);

        let snap = snapshot(chain, &markets).await;
        assert_eq!(snap.health_factor, f64::INFINITY);
        assert_eq!(snap.borrow_limit_used_pct, 0.0);
        assert_eq!(snap.risk_tier, RiskTier::Safe);
        // No exposure, so missing prices do not degrade anything
        assert!(snap.is_complete());
        assert!(snap.positions.iter().all(|p| p.has_position() == Some(false)));
    }

    // =========================================================================
    // Failure isolation
    // =========================================================================

    #[tokio::test]
    async fn test_failed_price_does_not_change_other_markets() {
        let markets = sample_markets();
        let (usdc, eth, wbtc) = (&markets[0], &markets[1], &markets[2]);
        let rate = wad(1);

        let script = |eth_price_fails: bool| {
            let chain = Arc::new(ScriptedChain::new());
            chain.set_position(usdc.ltoken, ACCOUNT, wad(500), U256::ZERO, rate);
            chain.set_position(eth.ltoken, ACCOUNT, wad(2), U256::ZERO, rate);
            chain.set_position(wbtc.ltoken, ACCOUNT, wad(1), U256::ZERO, rate);
            chain.set_price(usdc.ltoken, wad(1));
            chain.set_price(wbtc.ltoken, wad(60_000));
            if eth_price_fails {
                chain.fail_price(eth.ltoken, ReadFailure::Transport("timeout".into()));
            } else {
                chain.set_price(eth.ltoken, wad(2_000));
            }
            chain
        };

        let healthy = snapshot(script(false), &markets[..3]).await;
        let degraded = snapshot(script(true), &markets[..3]).await;

        for symbol in ["lUSDC", "lWBTC"] {
            assert_eq!(
                healthy.position(symbol).unwrap().supplied_usd,
                degraded.position(symbol).unwrap().supplied_usd,
                "{symbol}"
            );
        }
        assert_eq!(degraded.position("lETH").unwrap().supplied_usd, UsdValue::Unknown);
        assert_eq!(healthy.total_supplied_usd - degraded.total_supplied_usd, 4_000.0);
        assert_eq!(degraded.degraded_markets, vec!["lETH".to_string()]);
    }

    #[tokio::test]
    async fn test_reads_are_batched_per_snapshot() {
        let markets = sample_markets();
        let chain = Arc::new(ScriptedChain::new());
        snapshot(chain.clone(), &markets).await;

        // One batch for positions + liquidity, one for the oracle
        let mut batches = chain.batches();
        batches.sort_unstable();
        assert_eq!(batches, vec![markets.len() * 5, markets.len() * 6 + 1]);
    }

    // =========================================================================
    // Coordinator
    // =========================================================================

    #[tokio::test]
    async fn test_withdraw_beyond_receipt_balance_rejected_locally() {
        let usdc = market("lUSDC");
        let rate = U256::from(1_050_000_000_000_000_000u128);
        let decimals = usdc.underlying_decimals;
        let held = receipt_from_underlying(U256::from(400u64) * pow10(decimals), rate, decimals).unwrap();

        let chain = Arc::new(ScriptedChain::new());
        chain.set_position(usdc.ltoken, ACCOUNT, held, U256::ZERO, rate);

        let mut coordinator = LendingActionCoordinator::new(
            chain.clone(),
            ACCOUNT,
            sample_markets(),
            CoordinatorConfig::default(),
        );
        let err = coordinator
            .submit(&ActionRequest::withdraw("lUSDC", "500"))
            .await
            .unwrap_err();

        match err {
            Error::Precondition(PreconditionViolation::InsufficientReceiptBalance {
                requested,
                available,
                ..
            }) => {
                assert_eq!(available, held);
                assert!(requested > available);
            }
            other => panic!("expected receipt balance violation, got {other:?}"),
        }
        assert_eq!(coordinator.state(), ActionState::Error);
        assert!(chain.writes().is_empty());
    }

    #[tokio::test]
    async fn test_withdraw_within_balance_redeems_receipt_tokens() {
        let usdc = market("lUSDC");
        let rate = U256::from(1_050_000_000_000_000_000u128);
        let chain = Arc::new(ScriptedChain::new());
        chain.set_position(usdc.ltoken, ACCOUNT, wad(1_000), U256::ZERO, rate);

        let mut coordinator = LendingActionCoordinator::new(
            chain.clone(),
            ACCOUNT,
            sample_markets(),
            CoordinatorConfig::default(),
        );
        let outcome = coordinator
            .submit(&ActionRequest::withdraw("lUSDC", "105"))
            .await
            .unwrap();

        assert_eq!(outcome.approval_tx, None);
        assert_eq!(coordinator.state(), ActionState::Success);
        let expected = receipt_from_underlying(U256::from(105u64) * pow10(6), rate, 6).unwrap();
        assert_eq!(
            chain.writes(),
            vec![crate::chain::WriteCall::Redeem {
                ltoken: usdc.ltoken,
                receipt_amount: expected,
            }]
        );
        assert_eq!(expected, wad(100));
    }
}
