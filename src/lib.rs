#![deny(unreachable_pub)]

// Core modules
pub mod consts;
mod errors;
pub mod helpers;
mod prelude;
mod req;

// Shared utilities
pub mod serde_utils;
pub mod types;

// Configuration and observability
pub mod config;
pub mod logging;

// Protocol access
pub mod chain;
pub mod contracts;
pub mod info;

// Feature modules
pub mod account;
pub mod exchange;
pub mod monitor;

#[cfg(test)]
pub mod test_utils;
#[cfg(test)]
mod tests;

// Re-exports
pub use account::{AccountPositionAggregator, AccountSnapshot, RiskTier, SnapshotDiff};
pub use chain::{ChainDataPort, JsonRpcChainPort};
pub use config::ProtocolConfig;
pub use errors::*;
pub use exchange::{ActionKind, ActionRequest, ActionState, LendingActionCoordinator, OracleAdmin};
pub use info::{ExchangeRateGuard, MarketStateReader, PriceOracleReader, ProtocolDiagnostics};
pub use logging::{init_logging, LogConfig, LogFormat};
pub use monitor::{Poller, PollerHandle};
pub use req::HttpClient;
pub use types::*;
