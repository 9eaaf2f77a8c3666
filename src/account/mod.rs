//! Account risk: position aggregation, risk model and snapshot diffs.

mod aggregator;
mod diff;
pub mod risk_model;
mod snapshot;

pub use aggregator::AccountPositionAggregator;
pub use diff::{MarketChange, SnapshotDiff, SIGNIFICANT_USD_CHANGE};
pub use risk_model::{BorrowLimitEstimate, BorrowLimitSource, RiskTier};
pub use snapshot::{AccountSnapshot, Degradation, MarketPosition, UsdValue};
