//! Sequencing of approval and action transactions.
//!
//! One coordinator drives one action at a time through
//! `idle → [approving → approved] → executing → success | error`.
//! Every write goes through `&mut self`, so an approval always confirms
//! before the action that depends on it is submitted.

use alloy::primitives::{Address, U256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::actions::{ActionKind, ActionOutcome, ActionPlan, ActionRequest, ActionState};
use super::validation::{
    check_allowance, check_borrow, check_wallet_balance, find_market, withdraw_receipt_amount,
};
use crate::{
    chain::{read_bool, read_uint, ChainDataPort, ReadCall, ReadResult, TxReceipt, WriteCall},
    config::CoordinatorConfig,
    helpers::parse_amount,
    logging::targets,
    monitor::RefreshTrigger,
    prelude::*,
    Error, Market, PreconditionViolation, ReadFailure,
};

const ENTER_MARKET: &str = "enter_market";
const EXIT_MARKET: &str = "exit_market";

pub struct LendingActionCoordinator {
    chain: Arc<dyn ChainDataPort>,
    account: Address,
    markets: Vec<Market>,
    config: CoordinatorConfig,
    state: ActionState,
    plan: Option<ActionPlan>,
    approval: Option<TxReceipt>,
    last_error: Option<Error>,
    last_submitted: HashMap<(&'static str, String), Instant>,
    refresh: Option<RefreshTrigger>,
}

impl LendingActionCoordinator {
    pub fn new(
        chain: Arc<dyn ChainDataPort>,
        account: Address,
        markets: Vec<Market>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            chain,
            account,
            markets,
            config,
            state: ActionState::Idle,
            plan: None,
            approval: None,
            last_error: None,
            last_submitted: HashMap::new(),
            refresh: None,
        }
    }

    /// Refresh the account snapshot through `trigger` after each confirmed write.
    pub fn with_refresh(mut self, trigger: RefreshTrigger) -> Self {
        self.refresh = Some(trigger);
        self
    }

    pub fn account(&self) -> Address {
        self.account
    }

    pub fn state(&self) -> ActionState {
        self.state
    }

    pub fn plan(&self) -> Option<&ActionPlan> {
        self.plan.as_ref()
    }

    pub fn last_error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }

    /// Receipt of the approval confirmed for the current plan.
    pub fn approval(&self) -> Option<&TxReceipt> {
        self.approval.as_ref()
    }

    /// Back to `Idle`, dropping the current plan and error. Cooldowns survive.
    pub fn reset(&mut self) {
        debug!(target: targets::EXCHANGE, from = %self.state, "Coordinator reset");
        self.state = ActionState::Idle;
        self.plan = None;
        self.approval = None;
        self.last_error = None;
    }

    /// Validate `request` against current chain state and keep the resulting plan.
    ///
    /// A violated precondition moves the coordinator to `Error`.
    pub async fn prepare(&mut self, request: &ActionRequest) -> Result<&ActionPlan> {
        self.expect_state("prepare", &[ActionState::Idle])?;

        let verified = match self.resolve(request) {
            Ok((market, amount)) => self.verify(request.kind, market, amount).await,
            Err(violation) => Err(violation),
        };
        match verified {
            Ok(plan) => {
                info!(
                    target: targets::EXCHANGE,
                    action = %plan.kind,
                    market = %plan.market.symbol,
                    amount = %plan.amount,
                    needs_approval = plan.needs_approval,
                    "Action prepared"
                );
                Ok(&*self.plan.insert(plan))
            }
            Err(violation) => Err(self.fail(violation)),
        }
    }

    /// Submit the approval the current plan needs.
    pub async fn approve(&mut self) -> Result<TxReceipt> {
        self.expect_state("approve", &[ActionState::Idle])?;
        let Some(plan) = self.plan.as_ref().filter(|p| p.needs_approval) else {
            return Err(self.invalid("approve"));
        };

        let amount = if self.config.approve_max { U256::MAX } else { plan.amount };
        let call = WriteCall::Approve {
            token: plan.market.underlying,
            spender: plan.market.ltoken,
            amount,
        };

        self.state = ActionState::Approving;
        info!(target: targets::EXCHANGE, market = %plan.market.symbol, amount = %amount, "Submitting approval");
        match self.chain.write(call).await {
            Ok(receipt) => {
                info!(target: targets::EXCHANGE, tx = %receipt.tx_hash, "Approval confirmed");
                self.state = ActionState::Approved;
                if let Some(plan) = self.plan.as_mut() {
                    plan.allowance = Some(amount);
                }
                self.approval = Some(receipt.clone());
                Ok(receipt)
            }
            Err(failure) => Err(self.fail(failure)),
        }
    }

    /// Submit the planned action.
    ///
    /// Preconditions are checked again right before the write, since balances
    /// may have moved since [`prepare`](Self::prepare). An allowance that no
    /// longer covers the amount fails here instead of reverting on-chain.
    pub async fn execute(&mut self) -> Result<TxReceipt> {
        let ready = match (&self.plan, self.state) {
            (Some(plan), ActionState::Idle) if !plan.needs_approval => Some(plan.clone()),
            (Some(plan), ActionState::Approved) => Some(plan.clone()),
            _ => None,
        };
        let Some(plan) = ready else {
            return Err(self.invalid("execute"));
        };

        let key = (plan.kind.label(), plan.market.symbol.clone());
        self.check_cooldown(&key)?;

        self.state = ActionState::Executing;
        let verified = self
            .verify(plan.kind, plan.market.clone(), plan.amount)
            .await
            .and_then(|fresh| match (fresh.kind.requires_approval(), fresh.allowance) {
                (true, Some(allowance)) => check_allowance(fresh.amount, allowance).map(|()| fresh),
                _ => Ok(fresh),
            });
        let plan = match verified {
            Ok(fresh) => ActionPlan {
                needs_approval: plan.needs_approval,
                ..fresh
            },
            Err(violation) => return Err(self.fail(violation)),
        };

        let call = Self::action_call(&plan);
        self.last_submitted.insert(key, Instant::now());
        info!(
            target: targets::EXCHANGE,
            action = %plan.kind,
            market = %plan.market.symbol,
            amount = %plan.amount,
            "Submitting action"
        );

        match self.chain.write(call).await {
            Ok(receipt) => {
                info!(target: targets::EXCHANGE, action = %plan.kind, tx = %receipt.tx_hash, "Action confirmed");
                self.state = ActionState::Success;
                self.plan = Some(plan);
                self.schedule_refresh();
                Ok(receipt)
            }
            Err(failure) => Err(self.fail(failure)),
        }
    }

    /// Prepare, approve when needed, then execute.
    pub async fn submit(&mut self, request: &ActionRequest) -> Result<ActionOutcome> {
        let needs_approval = self.prepare(request).await?.needs_approval;
        let approval_tx = match needs_approval {
            true => Some(self.approve().await?.tx_hash),
            false => None,
        };
        let receipt = self.execute().await?;
        let plan = self.plan.as_ref().ok_or(Error::Precondition(PreconditionViolation::InvalidTransition {
            action: "submit",
            state: self.state.name(),
        }))?;

        Ok(ActionOutcome {
            kind: plan.kind,
            market: plan.market.symbol.clone(),
            amount: plan.amount,
            approval_tx,
            tx_hash: receipt.tx_hash,
        })
    }

    /// Enter `market` as collateral, a prerequisite for borrowing from it.
    ///
    /// Runs outside the action state machine. Returns `None` when the account
    /// is already a member.
    pub async fn enter_market(&mut self, market: &str) -> Result<Option<TxReceipt>> {
        if self.state.is_busy() {
            return Err(self.invalid(ENTER_MARKET));
        }
        let market = self.find_market(market)?.clone();

        let membership = self
            .chain
            .read(&[ReadCall::Membership {
                account: self.account,
                ltoken: market.ltoken,
            }])
            .await;
        let is_member = required(&membership, 0, read_bool).map_err(PreconditionViolation::Unverifiable)?;
        if is_member {
            debug!(target: targets::EXCHANGE, market = %market.symbol, "Already a member");
            return Ok(None);
        }

        let call = WriteCall::EnterMarkets {
            ltokens: vec![market.ltoken],
        };
        self.membership_write(ENTER_MARKET, &market, call).await.map(Some)
    }

    /// Stop using `market` as collateral.
    ///
    /// Returns `None` when the account is not a member. An open borrow in the
    /// market is rejected locally, since the comptroller refuses to let it go.
    pub async fn exit_market(&mut self, market: &str) -> Result<Option<TxReceipt>> {
        if self.state.is_busy() {
            return Err(self.invalid(EXIT_MARKET));
        }
        let market = self.find_market(market)?.clone();
        let (account, ltoken) = (self.account, market.ltoken);

        let results = self
            .chain
            .read(&[
                ReadCall::Membership { account, ltoken },
                ReadCall::BorrowBalance { ltoken, account },
            ])
            .await;
        let is_member = required(&results, 0, read_bool).map_err(PreconditionViolation::Unverifiable)?;
        if !is_member {
            debug!(target: targets::EXCHANGE, market = %market.symbol, "Not a member");
            return Ok(None);
        }
        let borrowed = required(&results, 1, read_uint).map_err(PreconditionViolation::Unverifiable)?;
        if !borrowed.is_zero() {
            return Err(PreconditionViolation::OutstandingBorrow {
                market: market.symbol,
                borrowed,
            }
            .into());
        }

        self.membership_write(EXIT_MARKET, &market, WriteCall::ExitMarket { ltoken })
            .await
            .map(Some)
    }

    async fn membership_write(&mut self, action: &'static str, market: &Market, call: WriteCall) -> Result<TxReceipt> {
        let key = (action, market.symbol.clone());
        self.check_cooldown(&key)?;
        self.last_submitted.insert(key, Instant::now());

        info!(target: targets::EXCHANGE, action, market = %market.symbol, "Updating market membership");
        let receipt = self.chain.write(call).await.map_err(|failure| {
            warn!(target: targets::EXCHANGE, action, market = %market.symbol, error = %failure, "Membership change failed");
            Error::Transaction(failure)
        })?;

        self.schedule_refresh();
        Ok(receipt)
    }

    /// Time left before `kind` can be submitted again on `market`.
    pub fn cooldown_remaining(&self, kind: ActionKind, market: &str) -> Option<Duration> {
        self.remaining(&(kind.label(), market.to_string()))
    }

    fn remaining(&self, key: &(&'static str, String)) -> Option<Duration> {
        let last = self.last_submitted.get(key)?;
        self.config
            .cooldown()
            .checked_sub(last.elapsed())
            .filter(|d| !d.is_zero())
    }

    fn check_cooldown(&self, key: &(&'static str, String)) -> std::result::Result<(), PreconditionViolation> {
        match self.remaining(key) {
            Some(remaining) => Err(PreconditionViolation::CooldownActive {
                remaining_ms: remaining.as_millis() as u64,
            }),
            None => Ok(()),
        }
    }

    fn find_market(&self, symbol: &str) -> std::result::Result<&Market, PreconditionViolation> {
        find_market(&self.markets, symbol)
    }

    fn resolve(&self, request: &ActionRequest) -> std::result::Result<(Market, U256), PreconditionViolation> {
        let market = self.find_market(&request.market)?;
        let amount = parse_amount(&request.amount, market.underlying_decimals)?;
        Ok((market.clone(), amount))
    }

    async fn verify(
        &self,
        kind: ActionKind,
        market: Market,
        amount: U256,
    ) -> std::result::Result<ActionPlan, PreconditionViolation> {
        let account = self.account;
        let ltoken = market.ltoken;
        let mut plan = ActionPlan {
            kind,
            market,
            amount,
            receipt_amount: None,
            allowance: None,
            needs_approval: false,
        };

        match kind {
            ActionKind::Supply | ActionKind::Repay => {
                let token = plan.market.underlying;
                let results = self
                    .chain
                    .read(&[
                        ReadCall::Allowance {
                            token,
                            owner: account,
                            spender: ltoken,
                        },
                        ReadCall::TokenBalance { token, account },
                    ])
                    .await;
                let allowance = required(&results, 0, read_uint).map_err(PreconditionViolation::Unverifiable)?;
                let balance = required(&results, 1, read_uint).map_err(PreconditionViolation::Unverifiable)?;
                check_wallet_balance(amount, balance)?;
                plan.allowance = Some(allowance);
                plan.needs_approval = allowance < amount;
            }
            ActionKind::Borrow => {
                let results = self
                    .chain
                    .read(&[
                        ReadCall::Membership { account, ltoken },
                        ReadCall::Cash { ltoken },
                        ReadCall::BorrowAllowed {
                            ltoken,
                            borrower: account,
                            amount,
                        },
                    ])
                    .await;
                let is_member = required(&results, 0, read_bool).map_err(PreconditionViolation::Unverifiable)?;
                let cash = required(&results, 1, read_uint).map_err(PreconditionViolation::Unverifiable)?;
                let code = required(&results, 2, read_uint).map_err(PreconditionViolation::Unverifiable)?;
                check_borrow(&plan.market, amount, is_member, cash, code.saturating_to::<u64>())?;
            }
            ActionKind::Withdraw => {
                let results = self
                    .chain
                    .read(&[
                        ReadCall::ReceiptBalance { ltoken, account },
                        ReadCall::ExchangeRate { ltoken },
                    ])
                    .await;
                let balance = required(&results, 0, read_uint).map_err(PreconditionViolation::Unverifiable)?;
                let rate = required(&results, 1, read_uint).map_err(PreconditionViolation::Unverifiable)?;
                if rate.is_zero() {
                    return Err(PreconditionViolation::Unverifiable(ReadFailure::Decode(
                        "exchange rate is zero".to_string(),
                    )));
                }
                plan.receipt_amount = Some(withdraw_receipt_amount(&plan.market, amount, rate, balance)?);
            }
        }
        Ok(plan)
    }

    fn action_call(plan: &ActionPlan) -> WriteCall {
        let ltoken = plan.market.ltoken;
        let amount = plan.amount;
        match plan.kind {
            ActionKind::Supply => WriteCall::Supply { ltoken, amount },
            ActionKind::Borrow => WriteCall::Borrow { ltoken, amount },
            ActionKind::Repay => WriteCall::RepayBorrow { ltoken, amount },
            ActionKind::Withdraw => WriteCall::Redeem {
                ltoken,
                receipt_amount: plan.receipt_amount.unwrap_or_default(),
            },
        }
    }

    fn schedule_refresh(&self) {
        if let Some(trigger) = &self.refresh {
            debug!(target: targets::EXCHANGE, delay_ms = self.config.refetch_delay_ms, "Scheduling snapshot refresh");
            trigger.refresh_after(self.config.refetch_delay());
        }
    }

    fn expect_state(&self, action: &'static str, allowed: &[ActionState]) -> std::result::Result<(), PreconditionViolation> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(PreconditionViolation::InvalidTransition {
                action,
                state: self.state.name(),
            })
        }
    }

    fn invalid(&self, action: &'static str) -> Error {
        Error::Precondition(PreconditionViolation::InvalidTransition {
            action,
            state: self.state.name(),
        })
    }

    fn fail(&mut self, err: impl Into<Error>) -> Error {
        let err = err.into();
        warn!(target: targets::EXCHANGE, state = %self.state, error = %err, "Action failed");
        if let Error::Transaction(failure) = &err {
            info!(target: targets::EXCHANGE, "{}", failure.next_steps());
        }
        self.state = ActionState::Error;
        self.last_error = Some(err.clone());
        err
    }
}

fn required<T>(
    results: &[ReadResult],
    index: usize,
    extract: fn(&ReadResult) -> std::result::Result<T, ReadFailure>,
) -> std::result::Result<T, ReadFailure> {
    results.get(index).map_or(Err(ReadFailure::Missing), extract)
}
