//! Local precondition checks run before any transaction is submitted.

use alloy::primitives::U256;

use crate::{helpers::receipt_from_underlying, Market, PreconditionViolation};

/// Meaning of a comptroller `borrowAllowed` return code.
pub fn borrow_allowed_reason(code: u64) -> &'static str {
    match code {
        0 => "allowed",
        1 => "account has not entered the market",
        2 => "insufficient liquidity",
        3 => "price error",
        4 => "market not listed",
        _ => "unknown comptroller error",
    }
}

/// Look a market up by receipt symbol, or by underlying symbol ignoring case.
pub fn find_market<'a>(markets: &'a [Market], symbol: &str) -> Result<&'a Market, PreconditionViolation> {
    markets
        .iter()
        .find(|m| m.symbol == symbol)
        .or_else(|| markets.iter().find(|m| m.underlying_symbol.eq_ignore_ascii_case(symbol)))
        .ok_or_else(|| PreconditionViolation::UnknownMarket(symbol.to_string()))
}

/// The wallet holds at least `amount` of the underlying.
pub fn check_wallet_balance(amount: U256, balance: U256) -> Result<(), PreconditionViolation> {
    if balance < amount {
        return Err(PreconditionViolation::InsufficientWalletBalance {
            available: balance,
            required: amount,
        });
    }
    Ok(())
}

/// The lToken may pull at least `amount` of the underlying.
pub fn check_allowance(amount: U256, allowance: U256) -> Result<(), PreconditionViolation> {
    if allowance < amount {
        return Err(PreconditionViolation::InsufficientAllowance {
            allowance,
            required: amount,
        });
    }
    Ok(())
}

/// Borrow checks: membership, market cash, then the comptroller's verdict.
pub fn check_borrow(
    market: &Market,
    amount: U256,
    is_member: bool,
    cash: U256,
    allowed_code: u64,
) -> Result<(), PreconditionViolation> {
    if !is_member {
        return Err(PreconditionViolation::MarketMembershipRequired {
            market: market.symbol.clone(),
        });
    }
    if cash < amount {
        return Err(PreconditionViolation::InsufficientCash {
            market: market.symbol.clone(),
            requested: amount,
            available: cash,
        });
    }
    if allowed_code != 0 {
        return Err(PreconditionViolation::BorrowNotAllowed {
            code: allowed_code,
            reason: borrow_allowed_reason(allowed_code),
        });
    }
    Ok(())
}

/// Receipt tokens to redeem for `amount` underlying, checked against the balance held.
pub fn withdraw_receipt_amount(
    market: &Market,
    amount: U256,
    exchange_rate: U256,
    receipt_balance: U256,
) -> Result<U256, PreconditionViolation> {
    let receipt = receipt_from_underlying(amount, exchange_rate, market.underlying_decimals)
        .map_err(|e| PreconditionViolation::InvalidAmount(e.to_string()))?;
    if receipt.is_zero() {
        return Err(PreconditionViolation::InvalidAmount(
            "amount is below one receipt-token unit".to_string(),
        ));
    }
    if receipt > receipt_balance {
        return Err(PreconditionViolation::InsufficientReceiptBalance {
            market: market.symbol.clone(),
            requested: receipt,
            available: receipt_balance,
        });
    }
    Ok(receipt)
}
