//! Scripted chain and fixtures shared by unit tests.

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::{
    account::{risk_model, AccountSnapshot, MarketPosition, UsdValue},
    chain::{ChainDataPort, ReadCall, ReadResult, ReadValue, TxReceipt, WriteCall},
    config::ProtocolConfig,
    helpers::mantissa_scale,
    Market, PriceResolution, ReadFailure, TransactionFailure,
};

/// `units × 1e18`
pub fn wad(units: u64) -> U256 {
    U256::from(units) * mantissa_scale()
}

/// The default Sepolia markets: lUSDC, lETH, lWBTC, lLINK, lUSDT.
pub fn sample_markets() -> Vec<Market> {
    ProtocolConfig::default().markets()
}

/// Market-level reads for one market.
#[derive(Debug, Clone)]
pub struct MarketFixture {
    pub total_supply: U256,
    pub exchange_rate: U256,
    pub cash: U256,
    pub total_borrows: U256,
    pub supply_rate: U256,
    pub borrow_rate: U256,
}

impl MarketFixture {
    pub fn with_rate(total_supply: U256, exchange_rate: U256) -> Self {
        Self {
            total_supply,
            exchange_rate,
            cash: U256::ZERO,
            total_borrows: U256::ZERO,
            supply_rate: U256::ZERO,
            borrow_rate: U256::ZERO,
        }
    }
}

/// In-memory [`ChainDataPort`] answering from scripted results.
///
/// Unscripted reads revert. Writes are recorded and succeed unless an
/// outcome was queued with [`push_write_outcome`](Self::push_write_outcome).
/// A successful approval updates any scripted allowance for the same token and spender.
#[derive(Default)]
pub struct ScriptedChain {
    reads: Mutex<HashMap<ReadCall, ReadResult>>,
    fail_all: Mutex<Option<ReadFailure>>,
    write_outcomes: Mutex<VecDeque<Result<TxReceipt, TransactionFailure>>>,
    writes: Mutex<Vec<WriteCall>>,
    batches: Mutex<Vec<usize>>,
}

impl ScriptedChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_read(&self, call: ReadCall, result: ReadResult) {
        self.reads.lock().unwrap().insert(call, result);
    }

    fn set_uint(&self, call: ReadCall, value: U256) {
        self.set_read(call, Ok(ReadValue::Uint(value)));
    }

    /// Oracle price with fresh metadata.
    pub fn set_price(&self, ltoken: Address, price: U256) {
        self.set_uint(ReadCall::UnderlyingPrice { ltoken }, price);
        self.set_read(
            ReadCall::PriceMetadata { ltoken },
            Ok(ReadValue::PriceMetadata {
                price,
                updated_at: U256::from(1_700_000_000u64),
                is_stale: false,
            }),
        );
    }

    pub fn fail_price(&self, ltoken: Address, failure: ReadFailure) {
        self.set_read(ReadCall::UnderlyingPrice { ltoken }, Err(failure.clone()));
        self.set_read(ReadCall::PriceMetadata { ltoken }, Err(failure));
    }

    /// Every read fails with `failure`, scripted or not.
    pub fn fail_all(&self, failure: ReadFailure) {
        *self.fail_all.lock().unwrap() = Some(failure);
    }

    pub fn set_market(&self, ltoken: Address, fixture: MarketFixture) {
        self.set_uint(ReadCall::TotalSupply { ltoken }, fixture.total_supply);
        self.set_uint(ReadCall::ExchangeRate { ltoken }, fixture.exchange_rate);
        self.set_uint(ReadCall::Cash { ltoken }, fixture.cash);
        self.set_uint(ReadCall::TotalBorrows { ltoken }, fixture.total_borrows);
        self.set_uint(ReadCall::SupplyRate { ltoken }, fixture.supply_rate);
        self.set_uint(ReadCall::BorrowRate { ltoken }, fixture.borrow_rate);
    }

    pub fn set_position(
        &self,
        ltoken: Address,
        account: Address,
        receipt_balance: U256,
        borrow_balance: U256,
        exchange_rate: U256,
    ) {
        self.set_uint(ReadCall::ReceiptBalance { ltoken, account }, receipt_balance);
        self.set_uint(ReadCall::BorrowBalance { ltoken, account }, borrow_balance);
        self.set_uint(ReadCall::ExchangeRate { ltoken }, exchange_rate);
    }

    pub fn set_liquidity(&self, account: Address, liquidity: U256, shortfall: U256) {
        self.set_read(
            ReadCall::AccountLiquidity { account },
            Ok(ReadValue::Liquidity {
                liquidity,
                shortfall,
            }),
        );
    }

    pub fn push_write_outcome(&self, outcome: Result<TxReceipt, TransactionFailure>) {
        self.write_outcomes.lock().unwrap().push_back(outcome);
    }

    /// Every write submitted so far, including failed ones.
    pub fn writes(&self) -> Vec<WriteCall> {
        self.writes.lock().unwrap().clone()
    }

    /// Size of each read batch, in order.
    pub fn batches(&self) -> Vec<usize> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainDataPort for ScriptedChain {
    async fn read(&self, calls: &[ReadCall]) -> Vec<ReadResult> {
        self.batches.lock().unwrap().push(calls.len());
        if let Some(failure) = self.fail_all.lock().unwrap().clone() {
            return calls.iter().map(|_| Err(failure.clone())).collect();
        }
        let reads = self.reads.lock().unwrap();
        calls
            .iter()
            .map(|call| {
                reads
                    .get(call)
                    .cloned()
                    .unwrap_or(Err(ReadFailure::Reverted("unscripted call".to_string())))
            })
            .collect()
    }

    async fn write(&self, call: WriteCall) -> Result<TxReceipt, TransactionFailure> {
        let count = {
            let mut writes = self.writes.lock().unwrap();
            writes.push(call.clone());
            writes.len()
        };
        let outcome = self
            .write_outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(TxReceipt {
                tx_hash: B256::with_last_byte(count as u8),
                block_number: Some(count as u64),
                gas_used: Some(100_000),
            }));

        // A confirmed approval shows up in later allowance reads
        if let (Ok(_), WriteCall::Approve { token, spender, amount }) = (&outcome, &call) {
            let mut reads = self.reads.lock().unwrap();
            for (read, result) in reads.iter_mut() {
                if matches!(read, ReadCall::Allowance { token: t, spender: s, .. } if t == token && s == spender) {
                    *result = Ok(ReadValue::Uint(*amount));
                }
            }
        }
        outcome
    }
}

/// A snapshot with a single live-priced lUSDC supply position and no debt.
pub fn snapshot_with(receipt: U256, exchange_rate: U256, supplied_usd: f64) -> AccountSnapshot {
    let usdc = sample_markets()
        .into_iter()
        .find(|m| m.symbol == "lUSDC")
        .unwrap();
    let borrow_power = risk_model::borrow_power(supplied_usd, usdc.collateral_factor);

    let position = MarketPosition {
        symbol: usdc.symbol.clone(),
        underlying_symbol: usdc.underlying_symbol.clone(),
        underlying_decimals: usdc.underlying_decimals,
        collateral_factor: usdc.collateral_factor,
        liquidation_threshold: usdc.liquidation_threshold,
        receipt_balance: Some(receipt),
        borrow_balance: Some(U256::ZERO),
        exchange_rate: Some(exchange_rate),
        entered: Some(true),
        supplied: Some(supplied_usd),
        borrowed: Some(0.0),
        price: PriceResolution::Live {
            price_usd: 1.0,
            emergency: false,
        },
        supplied_usd: UsdValue::Known(supplied_usd),
        borrowed_usd: UsdValue::Known(0.0),
        borrow_power_usd: UsdValue::Known(borrow_power),
        supply_apy: None,
        borrow_apy: None,
        degradations: Vec::new(),
    };

    let limit = risk_model::borrow_limit(0.0, borrow_power, None);
    let health_factor = risk_model::health_factor(supplied_usd, 0.0, usdc.liquidation_threshold);
    AccountSnapshot {
        account: Address::repeat_byte(0x11),
        positions: vec![position],
        total_supplied_usd: supplied_usd,
        total_borrowed_usd: 0.0,
        borrow_power_usd: borrow_power,
        borrow_limit_usd: limit.limit_usd,
        borrow_limit_used_pct: 0.0,
        available_to_borrow_usd: limit.limit_usd,
        borrow_limit: limit,
        health_factor,
        liquidation_threshold: usdc.liquidation_threshold,
        loan_to_value: 0.0,
        risk_tier: risk_model::risk_tier(health_factor),
        degraded_markets: Vec::new(),
        taken_at_ms: 1_700_000_000_000,
    }
}
