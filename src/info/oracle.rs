//! Price oracle reader.
//!
//! Reads, per market and independently of every other market:
//! - the underlying price (1e18 USD mantissa)
//! - price metadata (last update, staleness flag)
//! - feed health (flag and reason)
//! - emergency override flag and emergency price
//!
//! Only the price itself is required. Missing metadata leaves the
//! corresponding flags unknown. Resolution into [`PriceResolution`] applies
//! the authority rules and the configured per-asset fallback prices.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::{
    chain::{read_bool, read_uint, ChainDataPort, ReadCall, ReadResult, ReadValue},
    config::OracleConfig,
    helpers::mantissa_to_f64,
    logging::targets,
    Market, PriceEntry, PriceResolution, ReadFailure,
};

const CALLS_PER_MARKET: usize = 5;

/// Per-market price reads; a failure is local to its market.
pub type PriceReads = HashMap<String, Result<PriceEntry, ReadFailure>>;

pub struct PriceOracleReader {
    chain: Arc<dyn ChainDataPort>,
    config: OracleConfig,
}

impl PriceOracleReader {
    pub fn new(chain: Arc<dyn ChainDataPort>, config: OracleConfig) -> Self {
        Self { chain, config }
    }

    pub fn config(&self) -> &OracleConfig {
        &self.config
    }

    fn calls_for(market: &Market) -> [ReadCall; CALLS_PER_MARKET] {
        let ltoken = market.ltoken;
        [
            ReadCall::UnderlyingPrice { ltoken },
            ReadCall::PriceMetadata { ltoken },
            ReadCall::FeedHealth { ltoken },
            ReadCall::UsesEmergencyPrice { ltoken },
            ReadCall::EmergencyPrice { ltoken },
        ]
    }

    /// Read prices for `markets` in one batch.
    pub async fn get_prices(&self, markets: &[Market]) -> PriceReads {
        let calls: Vec<ReadCall> = markets.iter().flat_map(Self::calls_for).collect();
        let results = self.chain.read(&calls).await;

        markets
            .iter()
            .enumerate()
            .map(|(i, market)| {
                let slot = |offset: usize| {
                    results
                        .get(i * CALLS_PER_MARKET + offset)
                        .cloned()
                        .unwrap_or(Err(ReadFailure::Missing))
                };
                let entry = build_entry(market, slot(0), slot(1), slot(2), slot(3), slot(4));
                if let Err(e) = &entry {
                    debug!(target: targets::ORACLE, market = %market.symbol, error = %e, "Price read failed");
                }
                (market.symbol.clone(), entry)
            })
            .collect()
    }

    /// Resolve one market's read into a price usable by risk calculations.
    pub fn resolve(
        &self,
        market: &Market,
        read: Option<&Result<PriceEntry, ReadFailure>>,
    ) -> PriceResolution {
        let reason = match read {
            Some(Ok(entry)) if entry.is_authoritative(self.config.require_health_check) => {
                match mantissa_to_f64(entry.effective_price()) {
                    Ok(price_usd) => {
                        return PriceResolution::Live {
                            price_usd,
                            emergency: entry.uses_emergency_price(),
                        }
                    }
                    Err(e) => e.to_string(),
                }
            }
            Some(Ok(entry)) => entry
                .rejection_reason(self.config.require_health_check)
                .unwrap_or_else(|| "price not authoritative".to_string()),
            Some(Err(e)) => format!("price read failed: {e}"),
            None => "price not read".to_string(),
        };

        match self.config.fallback_prices.get(&market.underlying_symbol) {
            Some(&price_usd) => {
                warn!(
                    target: targets::ORACLE,
                    market = %market.symbol,
                    price_usd,
                    reason = %reason,
                    "Using configured fallback price"
                );
                PriceResolution::Fallback { price_usd, reason }
            }
            None => PriceResolution::Unknown { reason },
        }
    }

    pub fn resolve_all(&self, markets: &[Market], reads: &PriceReads) -> HashMap<String, PriceResolution> {
        markets
            .iter()
            .map(|m| (m.symbol.clone(), self.resolve(m, reads.get(&m.symbol))))
            .collect()
    }

    /// Read and resolve in one step.
    pub async fn get_resolved_prices(&self, markets: &[Market]) -> HashMap<String, PriceResolution> {
        let reads = self.get_prices(markets).await;
        self.resolve_all(markets, &reads)
    }
}

fn build_entry(
    market: &Market,
    price: ReadResult,
    metadata: ReadResult,
    health: ReadResult,
    uses_emergency: ReadResult,
    emergency_price: ReadResult,
) -> Result<PriceEntry, ReadFailure> {
    let (meta_price, updated_at, is_stale) = match metadata {
        Ok(ReadValue::PriceMetadata {
            price,
            updated_at,
            is_stale,
        }) => (Some(price), u64::try_from(updated_at).ok(), Some(is_stale)),
        _ => (None, None, None),
    };

    // The metadata call carries the price too; use it when the plain read fails.
    let price = match (read_uint(&price), meta_price) {
        (Ok(p), _) => p,
        (Err(_), Some(p)) => p,
        (Err(e), None) => return Err(e),
    };

    let (is_healthy, health_reason) = match health {
        Ok(ReadValue::FeedHealth { healthy, reason }) => {
            (Some(healthy), (!reason.is_empty()).then_some(reason))
        }
        _ => (None, None),
    };

    Ok(PriceEntry {
        symbol: market.symbol.clone(),
        price,
        updated_at,
        is_stale,
        is_healthy,
        health_reason,
        emergency_override: read_bool(&uses_emergency).unwrap_or(false),
        emergency_price: read_uint(&emergency_price).ok(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helpers::mantissa_scale;
    use crate::test_utils::{sample_markets, ScriptedChain};
    use alloy::primitives::U256;

    fn usd(units: u64) -> U256 {
        U256::from(units) * mantissa_scale()
    }

    fn reader(chain: ScriptedChain, config: OracleConfig) -> PriceOracleReader {
        PriceOracleReader::new(Arc::new(chain), config)
    }

    #[tokio::test]
    async fn test_reads_price_with_metadata() {
        let markets = sample_markets();
        let eth = &markets[1];
        let chain = ScriptedChain::new();
        chain.set_price(eth.ltoken, usd(2000));
        chain.set_read(
            ReadCall::FeedHealth { ltoken: eth.ltoken },
            Ok(ReadValue::FeedHealth {
                healthy: true,
                reason: String::new(),
            }),
        );

        let reads = reader(chain, OracleConfig::default())
            .get_prices(std::slice::from_ref(eth))
            .await;
        let entry = reads["lETH"].as_ref().unwrap();
        assert_eq!(entry.price, usd(2000));
        assert_eq!(entry.is_stale, Some(false));
        assert_eq!(entry.is_healthy, Some(true));
        assert!(entry.health_reason.is_none());
    }

    #[tokio::test]
    async fn test_failed_read_is_isolated_per_market() {
        let markets = sample_markets();
        let chain = ScriptedChain::new();
        chain.set_price(markets[0].ltoken, usd(1));
        chain.fail_price(markets[1].ltoken, ReadFailure::Reverted("no feed".into()));

        let reads = reader(chain, OracleConfig::default())
            .get_prices(&markets[..2])
            .await;
        assert_eq!(reads["lUSDC"].as_ref().unwrap().price, usd(1));
        assert!(matches!(reads["lETH"], Err(ReadFailure::Reverted(_))));
    }

    #[test]
    fn test_resolution_without_fallback_is_unknown() {
        let markets = sample_markets();
        let oracle = reader(ScriptedChain::new(), OracleConfig::default());
        let failed = Err(ReadFailure::Transport("timeout".into()));
        let resolution = oracle.resolve(&markets[1], Some(&failed));
        assert!(resolution.is_unknown());
        assert_eq!(resolution.usd(), None);
    }

    #[test]
    fn test_resolution_uses_configured_fallback() {
        let markets = sample_markets();
        let mut config = OracleConfig::default();
        config.fallback_prices.insert("USDC".to_string(), 1.0);
        let oracle = reader(ScriptedChain::new(), config);

        let failed = Err(ReadFailure::Transport("timeout".into()));
        let resolution = oracle.resolve(&markets[0], Some(&failed));
        assert!(resolution.is_fallback());
        assert_eq!(resolution.usd(), Some(1.0));

        // Fallback is keyed by asset: ETH has none configured.
        assert!(oracle.resolve(&markets[1], Some(&failed)).is_unknown());
    }

    #[test]
    fn test_unhealthy_feed_is_not_live() {
        let markets = sample_markets();
        let oracle = reader(ScriptedChain::new(), OracleConfig::default());
        let entry = PriceEntry {
            symbol: "lETH".into(),
            price: usd(2000),
            updated_at: None,
            is_stale: Some(false),
            is_healthy: Some(false),
            health_reason: Some("deviation too large".into()),
            emergency_override: false,
            emergency_price: None,
        };
        let resolution = oracle.resolve(&markets[1], Some(&Ok(entry)));
        match resolution {
            PriceResolution::Unknown { reason } => assert!(reason.contains("deviation")),
            other => panic!("expected unknown, got {other:?}"),
        }
    }

    #[test]
    fn test_emergency_price_resolves_live_and_flagged() {
        let markets = sample_markets();
        let oracle = reader(ScriptedChain::new(), OracleConfig::default());
        let entry = PriceEntry {
            symbol: "lETH".into(),
            price: usd(2000),
            updated_at: None,
            is_stale: None,
            is_healthy: None,
            health_reason: None,
            emergency_override: true,
            emergency_price: Some(usd(1800)),
        };
        assert_eq!(
            oracle.resolve(&markets[1], Some(&Ok(entry))),
            PriceResolution::Live {
                price_usd: 1800.0,
                emergency: true
            }
        );
    }
}
