//! Read/write interface to the lending protocol contracts.
//!
//! [`ChainDataPort`] is the only seam through which the readers, the
//! aggregator and the coordinator touch the chain. Reads are batched and
//! answer per call; writes resolve on confirmation.

mod calls;
mod rpc;

pub use rpc::JsonRpcChainPort;

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;

use crate::{ReadFailure, TransactionFailure};

/// A typed contract read.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReadCall {
    // Receipt-token market
    ReceiptBalance { ltoken: Address, account: Address },
    BorrowBalance { ltoken: Address, account: Address },
    ExchangeRate { ltoken: Address },
    SupplyRate { ltoken: Address },
    BorrowRate { ltoken: Address },
    Cash { ltoken: Address },
    TotalSupply { ltoken: Address },
    TotalBorrows { ltoken: Address },

    // Oracle
    UnderlyingPrice { ltoken: Address },
    PriceMetadata { ltoken: Address },
    FeedHealth { ltoken: Address },
    UsesEmergencyPrice { ltoken: Address },
    EmergencyPrice { ltoken: Address },

    // Comptroller
    Membership { account: Address, ltoken: Address },
    AccountLiquidity { account: Address },
    MarketListed { ltoken: Address },
    BorrowAllowed {
        ltoken: Address,
        borrower: Address,
        amount: U256,
    },
    OracleAddress,

    // ERC-20
    Allowance {
        token: Address,
        owner: Address,
        spender: Address,
    },
    TokenBalance { token: Address, account: Address },
}

/// A decoded read result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadValue {
    Uint(U256),
    Bool(bool),
    Address(Address),
    /// Comptroller account liquidity, both USD 1e18 mantissas
    Liquidity { liquidity: U256, shortfall: U256 },
    PriceMetadata {
        price: U256,
        updated_at: U256,
        is_stale: bool,
    },
    FeedHealth { healthy: bool, reason: String },
}

impl ReadValue {
    pub fn as_uint(&self) -> Result<U256, ReadFailure> {
        match self {
            ReadValue::Uint(v) => Ok(*v),
            other => Err(ReadFailure::Decode(format!("expected uint, got {other:?}"))),
        }
    }

    pub fn as_bool(&self) -> Result<bool, ReadFailure> {
        match self {
            ReadValue::Bool(v) => Ok(*v),
            other => Err(ReadFailure::Decode(format!("expected bool, got {other:?}"))),
        }
    }

    pub fn as_address(&self) -> Result<Address, ReadFailure> {
        match self {
            ReadValue::Address(v) => Ok(*v),
            other => Err(ReadFailure::Decode(format!("expected address, got {other:?}"))),
        }
    }
}

pub type ReadResult = Result<ReadValue, ReadFailure>;

/// Extract a uint from a read result.
pub fn read_uint(result: &ReadResult) -> Result<U256, ReadFailure> {
    result.as_ref().map_err(Clone::clone)?.as_uint()
}

/// Extract a bool from a read result.
pub fn read_bool(result: &ReadResult) -> Result<bool, ReadFailure> {
    result.as_ref().map_err(Clone::clone)?.as_bool()
}

/// A state-changing contract call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteCall {
    Approve {
        token: Address,
        spender: Address,
        amount: U256,
    },
    Supply { ltoken: Address, amount: U256 },
    Borrow { ltoken: Address, amount: U256 },
    RepayBorrow { ltoken: Address, amount: U256 },
    /// Redeem an amount of receipt tokens
    Redeem { ltoken: Address, receipt_amount: U256 },
    EnterMarkets { ltokens: Vec<Address> },
    ExitMarket { ltoken: Address },
    /// Switch the market's price to `emergency_price` (1e18 USD mantissa)
    PausePriceFeed { ltoken: Address, emergency_price: U256 },
    ResumePriceFeed { ltoken: Address },
}

impl WriteCall {
    pub fn label(&self) -> &'static str {
        match self {
            WriteCall::Approve { .. } => "approve",
            WriteCall::Supply { .. } => "supply",
            WriteCall::Borrow { .. } => "borrow",
            WriteCall::RepayBorrow { .. } => "repay",
            WriteCall::Redeem { .. } => "withdraw",
            WriteCall::EnterMarkets { .. } => "enter_markets",
            WriteCall::ExitMarket { .. } => "exit_market",
            WriteCall::PausePriceFeed { .. } => "pause_price_feed",
            WriteCall::ResumePriceFeed { .. } => "resume_price_feed",
        }
    }
}

/// Confirmation of a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: B256,
    pub block_number: Option<u64>,
    pub gas_used: Option<u64>,
}

#[async_trait]
pub trait ChainDataPort: Send + Sync {
    /// Execute `calls` as one logical batch.
    ///
    /// Returns exactly one result per call, in call order. A failing call
    /// never affects the result of another.
    async fn read(&self, calls: &[ReadCall]) -> Vec<ReadResult>;

    /// Submit `call` and wait for it to confirm.
    async fn write(&self, call: WriteCall) -> Result<TxReceipt, TransactionFailure>;
}
