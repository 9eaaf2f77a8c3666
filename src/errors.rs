use alloy::primitives::{B256, U256};
use serde::Serialize;
use thiserror::Error;

/// A single contract read that failed.
///
/// Isolated per call: one failed read never aborts the rest of a batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadFailure {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Call reverted: {0}")]
    Reverted(String),
    #[error("Decoding error: {0}")]
    Decode(String),
    #[error("No result returned for call")]
    Missing,
}

/// A derived value violated a monotonicity or bounds invariant.
///
/// The offending value is discarded and flagged, never used in totals.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "fault", rename_all = "snake_case")]
pub enum StaleDataFault {
    #[error("Exchange rate for {market} decreased from {previous} to {current}")]
    ExchangeRateRegression {
        market: String,
        previous: U256,
        current: U256,
    },
    #[error("{kind} rate for {market} out of bounds: {rate} (max {max})")]
    RateOutOfBounds {
        market: String,
        kind: RateKind,
        rate: f64,
        max: f64,
    },
    #[error("Exchange rate for {market} is zero")]
    ZeroExchangeRate { market: String },
}

/// Which side of a market a rate belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateKind {
    Supply,
    Borrow,
}

impl std::fmt::Display for RateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RateKind::Supply => write!(f, "Supply"),
            RateKind::Borrow => write!(f, "Borrow"),
        }
    }
}

/// A condition that must hold before a transaction is attempted.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PreconditionViolation {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Unknown market: {0}")]
    UnknownMarket(String),
    #[error("Insufficient allowance: have {allowance}, need {required}")]
    InsufficientAllowance { allowance: U256, required: U256 },
    #[error("Account has not entered market {market}")]
    MarketMembershipRequired { market: String },
    #[error("Insufficient {market} balance: withdrawing {requested} receipt tokens, holding {available}")]
    InsufficientReceiptBalance {
        market: String,
        requested: U256,
        available: U256,
    },
    #[error("Insufficient wallet balance: have {available}, need {required}")]
    InsufficientWalletBalance { available: U256, required: U256 },
    #[error("Insufficient cash in {market}: requested {requested}, available {available}")]
    InsufficientCash {
        market: String,
        requested: U256,
        available: U256,
    },
    #[error("Cannot leave {market} with {borrowed} still borrowed")]
    OutstandingBorrow { market: String, borrowed: U256 },
    #[error("Price feed for {market} is already {state}")]
    PriceFeedUnchanged { market: String, state: &'static str },
    #[error("Borrow rejected by comptroller (code {code}): {reason}")]
    BorrowNotAllowed { code: u64, reason: &'static str },
    #[error("Action submitted too recently, retry in {remaining_ms} ms")]
    CooldownActive { remaining_ms: u64 },
    #[error("Cannot {action} while in state {state}")]
    InvalidTransition {
        action: &'static str,
        state: &'static str,
    },
    #[error("Required read failed: {0}")]
    Unverifiable(ReadFailure),
}

/// A transaction that was submitted but did not confirm.
///
/// Surfaced verbatim; never retried automatically.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionFailure {
    #[error("Transaction rejected by signer: {0}")]
    Rejected(String),
    #[error("Transaction {tx_hash} reverted")]
    Reverted { tx_hash: B256 },
    #[error("Transaction {tx_hash} not confirmed after {waited_ms} ms")]
    TimedOut { tx_hash: B256, waited_ms: u64 },
    #[error("Submission failed: {0}")]
    Submission(String),
}

impl TransactionFailure {
    /// Actionable guidance for the user.
    pub fn next_steps(&self) -> &'static str {
        match self {
            TransactionFailure::Rejected(_) => "Confirm the request in your wallet to continue",
            TransactionFailure::Reverted { .. } => {
                "The protocol rejected the transaction; try a smaller amount"
            }
            TransactionFailure::TimedOut { .. } => {
                "Check the transaction in a block explorer before retrying"
            }
            TransactionFailure::Submission(_) => "Check your connection and retry",
        }
    }
}

/// Main SDK error type
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error(transparent)]
    Read(#[from] ReadFailure),

    #[error(transparent)]
    StaleData(#[from] StaleDataFault),

    #[error(transparent)]
    Precondition(#[from] PreconditionViolation),

    #[error(transparent)]
    Transaction(#[from] TransactionFailure),

    /// Client HTTP error (4xx)
    #[error("Client error: status code: {status_code}, error message: {error_message}")]
    ClientRequest {
        status_code: u16,
        error_message: String,
    },

    /// Server HTTP error (5xx)
    #[error("Server error: status code: {status_code}, error message: {error_message}")]
    ServerRequest {
        status_code: u16,
        error_message: String,
    },

    /// Generic request error
    #[error("Generic request error: {0}")]
    GenericRequest(String),

    /// JSON-RPC level error object
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// JSON parse error
    #[error("Json parse error: {0}")]
    JsonParse(String),

    /// Invalid configuration
    #[error("Config error: {0}")]
    Config(String),

    /// Unit conversion error
    #[error("Units error: {0}")]
    Units(String),

    /// Fixed-point arithmetic overflow
    #[error("Arithmetic overflow in {0}")]
    Overflow(&'static str),
}

impl Error {
    /// Whether a later poll could succeed without user action.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Read(ReadFailure::Transport(_))
                | Error::ServerRequest { .. }
                | Error::GenericRequest(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_failure_converts_into_error() {
        let err: Error = ReadFailure::Reverted("execution reverted".to_string()).into();
        assert!(matches!(err, Error::Read(ReadFailure::Reverted(_))));
        assert!(err.to_string().contains("execution reverted"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::Read(ReadFailure::Transport("timeout".into())).is_transient());
        assert!(!Error::Read(ReadFailure::Decode("bad".into())).is_transient());
        assert!(!Error::Precondition(PreconditionViolation::InvalidAmount("0".into()))
            .is_transient());
    }

    #[test]
    fn test_transaction_failure_next_steps() {
        let reverted = TransactionFailure::Reverted {
            tx_hash: B256::ZERO,
        };
        assert!(reverted.next_steps().contains("smaller amount"));
        let rejected = TransactionFailure::Rejected("user denied".into());
        assert!(rejected.to_string().contains("user denied"));
    }

    #[test]
    fn test_stale_fault_display() {
        let fault = StaleDataFault::ExchangeRateRegression {
            market: "lUSDC".into(),
            previous: U256::from(2u64),
            current: U256::from(1u64),
        };
        assert!(fault.to_string().contains("decreased"));
    }
}
