use alloy::primitives::{B256, U256};
use serde::Serialize;
use std::fmt;

use crate::Market;

/// A user-facing lending action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Supply,
    Borrow,
    Repay,
    Withdraw,
}

impl ActionKind {
    /// Supply and repay move the underlying token into the market and need an allowance.
    pub fn requires_approval(&self) -> bool {
        matches!(self, ActionKind::Supply | ActionKind::Repay)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ActionKind::Supply => "supply",
            ActionKind::Borrow => "borrow",
            ActionKind::Repay => "repay",
            ActionKind::Withdraw => "withdraw",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What the user asked for. `amount` is in underlying units, as entered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRequest {
    pub kind: ActionKind,
    pub market: String,
    pub amount: String,
}

impl ActionRequest {
    pub fn new(kind: ActionKind, market: impl Into<String>, amount: impl Into<String>) -> Self {
        Self {
            kind,
            market: market.into(),
            amount: amount.into(),
        }
    }

    pub fn supply(market: impl Into<String>, amount: impl Into<String>) -> Self {
        Self::new(ActionKind::Supply, market, amount)
    }

    pub fn borrow(market: impl Into<String>, amount: impl Into<String>) -> Self {
        Self::new(ActionKind::Borrow, market, amount)
    }

    pub fn repay(market: impl Into<String>, amount: impl Into<String>) -> Self {
        Self::new(ActionKind::Repay, market, amount)
    }

    pub fn withdraw(market: impl Into<String>, amount: impl Into<String>) -> Self {
        Self::new(ActionKind::Withdraw, market, amount)
    }
}

/// Coordinator state.
///
/// `Success` and `Error` are terminal until [`reset`](super::LendingActionCoordinator::reset).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    #[default]
    Idle,
    Approving,
    Approved,
    Executing,
    Success,
    Error,
}

impl ActionState {
    pub fn name(&self) -> &'static str {
        match self {
            ActionState::Idle => "idle",
            ActionState::Approving => "approving",
            ActionState::Approved => "approved",
            ActionState::Executing => "executing",
            ActionState::Success => "success",
            ActionState::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ActionState::Success | ActionState::Error)
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, ActionState::Approving | ActionState::Executing)
    }
}

impl fmt::Display for ActionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A validated action, ready for approval and execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionPlan {
    pub kind: ActionKind,
    pub market: Market,
    /// Amount in raw underlying units
    pub amount: U256,
    /// Receipt tokens to redeem, for withdrawals
    pub receipt_amount: Option<U256>,
    /// Current allowance, for actions that need one
    pub allowance: Option<U256>,
    pub needs_approval: bool,
}

/// Result of a completed action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutcome {
    pub kind: ActionKind,
    pub market: String,
    pub amount: U256,
    pub approval_tx: Option<B256>,
    pub tx_hash: B256,
}
