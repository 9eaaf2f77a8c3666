//! Fixed-point conversions between receipt tokens, underlying units and USD.
//!
//! Exchange rates are 1e18 mantissas expressing underlying-per-receipt-token
//! in the 18-decimal receipt domain. Every conversion takes the decimals of
//! the market it belongs to; no conversion ever uses another market's values.

use alloy::primitives::{
    utils::{format_units, parse_units},
    U256,
};

use crate::{
    consts::{MANTISSA_DECIMALS, RECEIPT_DECIMALS},
    prelude::*,
    Error, PreconditionViolation,
};

/// 10^exp as a U256.
pub fn pow10(exp: u8) -> U256 {
    U256::from(10u64).pow(U256::from(exp))
}

/// The 1e18 fixed-point scale.
pub fn mantissa_scale() -> U256 {
    pow10(MANTISSA_DECIMALS)
}

/// Move an integer amount from `from` decimals to `to` decimals, truncating.
pub fn rescale(amount: U256, from: u8, to: u8) -> Result<U256> {
    if from >= to {
        Ok(amount / pow10(from - to))
    } else {
        amount
            .checked_mul(pow10(to - from))
            .ok_or(Error::Overflow("rescale"))
    }
}

/// Underlying raw units held by `receipt` tokens at `exchange_rate`.
///
/// `receipt × rate / 1e18` yields the amount in the 18-decimal receipt
/// domain, which is then expressed in the market's own decimals.
pub fn underlying_from_receipt(
    receipt: U256,
    exchange_rate: U256,
    underlying_decimals: u8,
) -> Result<U256> {
    let in_receipt_domain = receipt
        .checked_mul(exchange_rate)
        .ok_or(Error::Overflow("underlying_from_receipt"))?
        / mantissa_scale();
    rescale(in_receipt_domain, RECEIPT_DECIMALS, underlying_decimals)
}

/// Receipt tokens corresponding to `underlying` raw units at `exchange_rate`.
///
/// Truncates, so converting back never yields more than the input.
pub fn receipt_from_underlying(
    underlying: U256,
    exchange_rate: U256,
    underlying_decimals: u8,
) -> Result<U256> {
    if exchange_rate.is_zero() {
        return Err(Error::Units("exchange rate is zero".to_string()));
    }
    let in_receipt_domain = rescale(underlying, underlying_decimals, RECEIPT_DECIMALS)?;
    Ok(in_receipt_domain
        .checked_mul(mantissa_scale())
        .ok_or(Error::Overflow("receipt_from_underlying"))?
        / exchange_rate)
}

/// Human-readable value of a raw integer amount.
pub fn to_human(raw: U256, decimals: u8) -> Result<f64> {
    let formatted = format_units(raw, decimals).map_err(|e| Error::Units(e.to_string()))?;
    formatted
        .parse::<f64>()
        .map_err(|e| Error::Units(format!("{formatted}: {e}")))
}

/// Value of a 1e18 mantissa (prices, rates, exchange rates, liquidity).
pub fn mantissa_to_f64(mantissa: U256) -> Result<f64> {
    to_human(mantissa, MANTISSA_DECIMALS)
}

/// Parse a user-entered amount into raw units of a token with `decimals`.
///
/// The amount must be a positive finite number that is still non-zero
/// once expressed in raw units.
pub fn parse_amount(amount: &str, decimals: u8) -> std::result::Result<U256, PreconditionViolation> {
    let trimmed = amount.trim();
    let value: f64 = trimmed
        .parse()
        .map_err(|_| PreconditionViolation::InvalidAmount(format!("'{trimmed}' is not a number")))?;
    if !value.is_finite() || value <= 0.0 {
        return Err(PreconditionViolation::InvalidAmount(format!(
            "'{trimmed}' must be a positive finite number"
        )));
    }
    let parsed = parse_units(trimmed, decimals)
        .map_err(|e| PreconditionViolation::InvalidAmount(format!("'{trimmed}': {e}")))?;
    if parsed.is_negative() {
        return Err(PreconditionViolation::InvalidAmount(format!(
            "'{trimmed}' is negative"
        )));
    }
    let raw: U256 = parsed.get_absolute();
    if raw.is_zero() {
        return Err(PreconditionViolation::InvalidAmount(format!(
            "'{trimmed}' is below the smallest unit ({decimals} decimals)"
        )));
    }
    Ok(raw)
}
