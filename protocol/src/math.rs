//! # Fixed-Point Math
//!
//! Checked helpers for the handful of fixed-point operations the protocol
//! performs. Products of two `u128` amounts can overflow 128 bits (credits
//! times a 1e18 scale routinely do), so every multiply-then-divide goes
//! through a 256-bit intermediate and the result is narrowed back with a
//! range check.

use ethnum::U256;
use thiserror::Error;

use crate::config::{BPS_DENOMINATOR, UNIT_DECIMALS, WAD};

/// Arithmetic failures. Any of these aborts the enclosing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MathError {
    /// A result does not fit in 128 bits.
    #[error("arithmetic overflow")]
    Overflow,

    /// A subtraction went below zero.
    #[error("arithmetic underflow")]
    Underflow,

    /// Division by zero.
    #[error("division by zero")]
    DivisionByZero,
}

/// `a * b / denominator`, rounded down.
pub fn mul_div(a: u128, b: u128, denominator: u128) -> Result<u128, MathError> {
    if denominator == 0 {
        return Err(MathError::DivisionByZero);
    }
    let product = U256::from(a) * U256::from(b);
    narrow(product / U256::from(denominator))
}

/// `a * b / denominator`, rounded up.
pub fn mul_div_up(a: u128, b: u128, denominator: u128) -> Result<u128, MathError> {
    if denominator == 0 {
        return Err(MathError::DivisionByZero);
    }
    let product = U256::from(a) * U256::from(b);
    let d = U256::from(denominator);
    let quotient = product / d;
    if product % d == U256::ZERO {
        narrow(quotient)
    } else {
        narrow(quotient + U256::ONE)
    }
}

/// `amount * bps / 10_000`, rounded down.
pub fn bps_of(amount: u128, bps: u16) -> Result<u128, MathError> {
    mul_div(amount, bps as u128, BPS_DENOMINATOR)
}

/// `amount * fraction / 1e18`, rounded down.
pub fn wad_mul(amount: u128, fraction: u128) -> Result<u128, MathError> {
    mul_div(amount, fraction, WAD)
}

/// Rescales an amount between decimal precisions. Scaling down truncates.
pub fn scale_decimals(amount: u128, from: u8, to: u8) -> Result<u128, MathError> {
    match from.cmp(&to) {
        std::cmp::Ordering::Equal => Ok(amount),
        std::cmp::Ordering::Less => {
            let factor = pow10(to - from)?;
            amount.checked_mul(factor).ok_or(MathError::Overflow)
        }
        std::cmp::Ordering::Greater => {
            let factor = pow10(from - to)?;
            Ok(amount / factor)
        }
    }
}

/// Scales an asset amount to 18-decimal unit precision.
pub fn to_units(amount: u128, decimals: u8) -> Result<u128, MathError> {
    scale_decimals(amount, decimals, UNIT_DECIMALS)
}

/// Scales an 18-decimal unit amount down to an asset's precision.
pub fn from_units(units: u128, decimals: u8) -> Result<u128, MathError> {
    scale_decimals(units, UNIT_DECIMALS, decimals)
}

/// `|a - b| / b` as a WAD fraction. A zero base yields zero deviation when
/// both sides are zero and `u128::MAX` otherwise.
pub fn relative_deviation(a: u128, b: u128) -> Result<u128, MathError> {
    if b == 0 {
        return Ok(if a == 0 { 0 } else { u128::MAX });
    }
    mul_div(a.abs_diff(b), WAD, b)
}

/// Renders an amount with its decimal point, trimming trailing zeros.
///
/// `format_units(1_500_000, 6)` is `"1.5"`.
pub fn format_units(amount: u128, decimals: u8) -> String {
    if decimals == 0 {
        return amount.to_string();
    }
    let digits = format!("{:0>width$}", amount, width = decimals as usize + 1);
    let (whole, fraction) = digits.split_at(digits.len() - decimals as usize);
    let fraction = fraction.trim_end_matches('0');
    if fraction.is_empty() {
        whole.to_string()
    } else {
        format!("{whole}.{fraction}")
    }
}

/// Parses a decimal string such as `"100.25"` into the smallest
/// denomination. Returns `None` for malformed input or excess precision.
pub fn parse_units(text: &str, decimals: u8) -> Option<u128> {
    let text = text.trim();
    let (whole, fraction) = match text.split_once('.') {
        Some((w, f)) => (w, f),
        None => (text, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    if fraction.len() > decimals as usize
        || !whole.chars().all(|c| c.is_ascii_digit())
        || !fraction.chars().all(|c| c.is_ascii_digit())
    {
        return None;
    }
    let scale = pow10(decimals).ok()?;
    let whole: u128 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let mut frac: u128 = if fraction.is_empty() { 0 } else { fraction.parse().ok()? };
    frac = frac.checked_mul(pow10(decimals - fraction.len() as u8).ok()?)?;
    whole.checked_mul(scale)?.checked_add(frac)
}

fn pow10(exp: u8) -> Result<u128, MathError> {
    10u128.checked_pow(exp as u32).ok_or(MathError::Overflow)
}

fn narrow(value: U256) -> Result<u128, MathError> {
    if value > U256::from(u128::MAX) {
        return Err(MathError::Overflow);
    }
    Ok(value.as_u128())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
