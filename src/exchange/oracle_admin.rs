//! Emergency price controls on the protocol's price oracle.
//!
//! Pausing a feed pins the market to an operator-supplied price until the
//! feed is resumed. Both operations check the current emergency flag first,
//! so a repeated request fails locally instead of sending a no-op write.

use alloy::primitives::U256;
use std::sync::Arc;
use tracing::{info, warn};

use super::validation::find_market;
use crate::{
    chain::{read_bool, read_uint, ChainDataPort, ReadCall, TxReceipt, WriteCall},
    consts::MANTISSA_DECIMALS,
    helpers::parse_amount,
    logging::targets,
    prelude::*,
    Error, Market, PreconditionViolation, ReadFailure,
};

pub struct OracleAdmin {
    chain: Arc<dyn ChainDataPort>,
    markets: Vec<Market>,
}

impl OracleAdmin {
    pub fn new(chain: Arc<dyn ChainDataPort>, markets: Vec<Market>) -> Self {
        Self { chain, markets }
    }

    /// Pin `market` to `price_usd` (decimal USD per whole underlying unit).
    pub async fn pause_price_feed(&self, market: &str, price_usd: &str) -> Result<TxReceipt> {
        let market = find_market(&self.markets, market)?;
        let emergency_price = parse_amount(price_usd, MANTISSA_DECIMALS)?;
        if self.uses_emergency_price(market).await? {
            return Err(PreconditionViolation::PriceFeedUnchanged {
                market: market.symbol.clone(),
                state: "paused",
            }
            .into());
        }

        info!(target: targets::ORACLE, market = %market.symbol, price = %price_usd, "Pausing price feed");
        self.submit(
            market,
            WriteCall::PausePriceFeed {
                ltoken: market.ltoken,
                emergency_price,
            },
        )
        .await
    }

    /// Return `market` to its live feed.
    pub async fn resume_price_feed(&self, market: &str) -> Result<TxReceipt> {
        let market = find_market(&self.markets, market)?;
        if !self.uses_emergency_price(market).await? {
            return Err(PreconditionViolation::PriceFeedUnchanged {
                market: market.symbol.clone(),
                state: "live",
            }
            .into());
        }

        info!(target: targets::ORACLE, market = %market.symbol, "Resuming price feed");
        self.submit(market, WriteCall::ResumePriceFeed { ltoken: market.ltoken })
            .await
    }

    /// Emergency price currently configured for `market`, 1e18 USD mantissa.
    pub async fn emergency_price(&self, market: &str) -> Result<U256> {
        let market = find_market(&self.markets, market)?;
        let results = self
            .chain
            .read(&[ReadCall::EmergencyPrice { ltoken: market.ltoken }])
            .await;
        let result = results.first().ok_or(ReadFailure::Missing)?;
        Ok(read_uint(result)?)
    }

    async fn uses_emergency_price(&self, market: &Market) -> Result<bool> {
        let results = self
            .chain
            .read(&[ReadCall::UsesEmergencyPrice { ltoken: market.ltoken }])
            .await;
        let result = results.first().ok_or(ReadFailure::Missing)?;
        read_bool(result).map_err(|e| PreconditionViolation::Unverifiable(e).into())
    }

    async fn submit(&self, market: &Market, call: WriteCall) -> Result<TxReceipt> {
        let action = call.label();
        match self.chain.write(call).await {
            Ok(receipt) => {
                info!(target: targets::ORACLE, action, market = %market.symbol, tx = %receipt.tx_hash, "Oracle update confirmed");
                Ok(receipt)
            }
            Err(failure) => {
                warn!(target: targets::ORACLE, action, market = %market.symbol, error = %failure, "Oracle update failed");
                info!(target: targets::ORACLE, "{}", failure.next_steps());
                Err(Error::Transaction(failure))
            }
        }
    }
}
