//! Protocol readers: prices, market state and wiring diagnostics.

mod diagnostics;
mod market_state;
mod oracle;
mod rate_guard;

pub use diagnostics::{AccountLiquidity, DiagnosticsReport, MarketListing, ProtocolDiagnostics};
pub use market_state::{apy_from_rate, compound_apy, utilization, MarketStateReader};
pub use oracle::{PriceOracleReader, PriceReads};
pub use rate_guard::ExchangeRateGuard;
