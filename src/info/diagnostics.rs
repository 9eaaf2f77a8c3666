//! Protocol wiring checks: oracle configured, markets listed, account liquidity.

use alloy::primitives::{Address, U256};
use serde::Serialize;
use std::sync::Arc;

use crate::{
    chain::{read_bool, ChainDataPort, ReadCall, ReadValue},
    config::ContractsConfig,
    helpers::mantissa_to_f64,
    Market, ReadFailure,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketListing {
    pub symbol: String,
    /// `None` when the listing read failed
    pub listed: Option<bool>,
}

/// Comptroller liquidity for an account, USD.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountLiquidity {
    pub liquidity_usd: f64,
    pub shortfall_usd: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticsReport {
    /// Oracle the comptroller points at
    pub oracle_address: Option<Address>,
    pub markets: Vec<MarketListing>,
    pub account_liquidity: Option<AccountLiquidity>,
    /// Human-readable problems found, empty when healthy
    pub issues: Vec<String>,
}

impl DiagnosticsReport {
    pub fn is_healthy(&self) -> bool {
        self.issues.is_empty()
    }
}

pub struct ProtocolDiagnostics {
    chain: Arc<dyn ChainDataPort>,
    contracts: ContractsConfig,
}

impl ProtocolDiagnostics {
    pub fn new(chain: Arc<dyn ChainDataPort>, contracts: ContractsConfig) -> Self {
        Self { chain, contracts }
    }

    pub async fn run(&self, account: Option<Address>, markets: &[Market]) -> DiagnosticsReport {
        let mut calls = vec![ReadCall::OracleAddress];
        calls.extend(markets.iter().map(|m| ReadCall::MarketListed { ltoken: m.ltoken }));
        if let Some(account) = account {
            calls.push(ReadCall::AccountLiquidity { account });
        }
        let results = self.chain.read(&calls).await;
        let mut issues = Vec::new();

        let oracle_read = results
            .first()
            .map_or(Err(ReadFailure::Missing), |r| r.as_ref().map_err(Clone::clone))
            .and_then(ReadValue::as_address);
        let oracle_address = match oracle_read {
            Ok(addr) => Some(addr),
            Err(e) => {
                issues.push(format!("cannot read comptroller oracle: {e}"));
                None
            }
        };
        match oracle_address {
            Some(addr) if addr == Address::ZERO => {
                issues.push("comptroller has no price oracle set".to_string())
            }
            Some(addr) if addr != self.contracts.oracle => issues.push(format!(
                "comptroller oracle {addr} differs from configured {}",
                self.contracts.oracle
            )),
            _ => {}
        }

        let listings: Vec<MarketListing> = markets
            .iter()
            .enumerate()
            .map(|(i, market)| {
                let listed = results.get(i + 1).and_then(|r| read_bool(r).ok());
                match listed {
                    Some(false) => issues.push(format!("{} is not listed", market.symbol)),
                    None => issues.push(format!("cannot read listing for {}", market.symbol)),
                    Some(true) => {}
                }
                MarketListing {
                    symbol: market.symbol.clone(),
                    listed,
                }
            })
            .collect();

        let account_liquidity = if account.is_some() {
            match results.get(markets.len() + 1) {
                Some(Ok(ReadValue::Liquidity {
                    liquidity,
                    shortfall,
                })) => {
                    let liquidity = liquidity_to_usd(*liquidity);
                    let shortfall = liquidity_to_usd(*shortfall);
                    if shortfall > 0.0 {
                        issues.push(format!("account has a shortfall of ${shortfall:.2}"));
                    } else if liquidity == 0.0 {
                        issues.push("account has no borrowing liquidity".to_string());
                    }
                    Some(AccountLiquidity {
                        liquidity_usd: liquidity,
                        shortfall_usd: shortfall,
                    })
                }
                _ => {
                    issues.push("cannot read account liquidity".to_string());
                    None
                }
            }
        } else {
            None
        };

        DiagnosticsReport {
            oracle_address,
            markets: listings,
            account_liquidity,
            issues,
        }
    }
}

fn liquidity_to_usd(mantissa: U256) -> f64 {
    mantissa_to_f64(mantissa).unwrap_or(f64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{sample_markets, wad, ScriptedChain};

    #[tokio::test]
    async fn test_healthy_protocol_has_no_issues() {
        let markets = sample_markets();
        let contracts = ContractsConfig::default();
        let account = Address::repeat_byte(0xaa);
        let chain = ScriptedChain::new();
        chain.set_read(ReadCall::OracleAddress, Ok(ReadValue::Address(contracts.oracle)));
        for m in &markets {
            chain.set_read(ReadCall::MarketListed { ltoken: m.ltoken }, Ok(ReadValue::Bool(true)));
        }
        chain.set_liquidity(account, wad(500), U256::ZERO);

        let report = ProtocolDiagnostics::new(Arc::new(chain), contracts)
            .run(Some(account), &markets)
            .await;
        assert!(report.is_healthy(), "issues: {:?}", report.issues);
        assert_eq!(report.account_liquidity.unwrap().liquidity_usd, 500.0);
    }

    #[tokio::test]
    async fn test_reports_missing_oracle_and_unlisted_market() {
        let markets = sample_markets();
        let chain = ScriptedChain::new();
        chain.set_read(ReadCall::OracleAddress, Ok(ReadValue::Address(Address::ZERO)));
        chain.set_read(
            ReadCall::MarketListed {
                ltoken: markets[0].ltoken,
            },
            Ok(ReadValue::Bool(false)),
        );

        let report = ProtocolDiagnostics::new(Arc::new(chain), ContractsConfig::default())
            .run(None, &markets[..1])
            .await;
        assert!(report.issues.iter().any(|i| i.contains("no price oracle")));
        assert!(report.issues.iter().any(|i| i.contains("lUSDC is not listed")));
        assert!(report.account_liquidity.is_none());
    }
}
