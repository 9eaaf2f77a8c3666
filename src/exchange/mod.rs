//! Lending actions: supply, borrow, repay and withdraw.
//!
//! # Submodules
//! - `actions` - Request, plan and state types
//! - `validation` - Local precondition checks
//! - `coordinator` - [`LendingActionCoordinator`], sequencing approval and action writes
//! - `oracle_admin` - [`OracleAdmin`], emergency price pause and resume

mod actions;
mod coordinator;
mod oracle_admin;
mod validation;

pub use actions::{ActionKind, ActionOutcome, ActionPlan, ActionRequest, ActionState};
pub use coordinator::LendingActionCoordinator;
pub use oracle_admin::OracleAdmin;
pub use validation::{
    borrow_allowed_reason, check_allowance, check_borrow, check_wallet_balance, find_market,
    withdraw_receipt_amount,
};
