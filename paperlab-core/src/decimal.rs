//! Decimal quantity library. Every monetary value in the engine goes through here.
//!
//! Built on `rust_decimal::Decimal` (96-bit mantissa, 28 significant digits).
//! Addition, subtraction and multiplication are exact until the mantissa
//! overflows. Division is rounded half-to-even at [`DIVISION_SCALE`] decimal
//! places so a repeating quotient never expands without bound.
//!
//! Binary floating point never enters a monetary computation. The only `f64`
//! input accepted is a dimensionless rate (e.g. a Gaussian slippage draw),
//! converted once via [`from_f64_rate`].

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Maximum number of decimal places kept after a division.
pub const DIVISION_SCALE: u32 = 12;

/// Display precision for cash amounts.
pub const MONEY_DP: u32 = 2;

/// Display precision for prices.
pub const PRICE_DP: u32 = 4;

/// Precision kept for random rates converted from `f64`.
const RATE_DP: u32 = 10;

/// Arithmetic failures. Fatal to the single operation that raised them.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ArithmeticError {
    #[error("division by zero")]
    DivisionByZero,

    #[error("decimal overflow in {0}")]
    Overflow(String),

    #[error("value not representable as decimal: {0}")]
    NotRepresentable(String),
}

/// Checked arithmetic on `Decimal` that reports failures instead of panicking.
pub trait MoneyExt: Sized {
    fn try_add(self, rhs: Self) -> Result<Self, ArithmeticError>;
    fn try_sub(self, rhs: Self) -> Result<Self, ArithmeticError>;
    fn try_mul(self, rhs: Self) -> Result<Self, ArithmeticError>;
    /// Divide, rounding half-to-even at [`DIVISION_SCALE`].
    fn try_div(self, rhs: Self) -> Result<Self, ArithmeticError>;
    /// `self * rate`, e.g. notional × commission rate.
    fn pct_of(self, rate: Self) -> Result<Self, ArithmeticError>;
    /// Banker's rounding to `dp` places, for display and reporting.
    fn round_display(self, dp: u32) -> Self;
}

impl MoneyExt for Decimal {
    fn try_add(self, rhs: Self) -> Result<Self, ArithmeticError> {
        self.checked_add(rhs)
            .ok_or_else(|| ArithmeticError::Overflow(format!("{self} + {rhs}")))
    }

    fn try_sub(self, rhs: Self) -> Result<Self, ArithmeticError> {
        self.checked_sub(rhs)
            .ok_or_else(|| ArithmeticError::Overflow(format!("{self} - {rhs}")))
    }

    fn try_mul(self, rhs: Self) -> Result<Self, ArithmeticError> {
        self.checked_mul(rhs)
            .ok_or_else(|| ArithmeticError::Overflow(format!("{self} * {rhs}")))
    }

    fn try_div(self, rhs: Self) -> Result<Self, ArithmeticError> {
        if rhs.is_zero() {
            return Err(ArithmeticError::DivisionByZero);
        }
        let quotient = self
            .checked_div(rhs)
            .ok_or_else(|| ArithmeticError::Overflow(format!("{self} / {rhs}")))?;
        Ok(quotient.round_dp_with_strategy(DIVISION_SCALE, RoundingStrategy::MidpointNearestEven))
    }

    fn pct_of(self, rate: Self) -> Result<Self, ArithmeticError> {
        self.try_mul(rate)
    }

    fn round_display(self, dp: u32) -> Self {
        self.round_dp_with_strategy(dp, RoundingStrategy::MidpointNearestEven)
    }
}

/// Sum an iterator of decimals with overflow checking.
pub fn try_sum<I>(values: I) -> Result<Decimal, ArithmeticError>
where
    I: IntoIterator<Item = Decimal>,
{
    values
        .into_iter()
        .try_fold(Decimal::ZERO, |acc, v| acc.try_add(v))
}

/// Parse a display string into a decimal. Lossless for values within precision.
pub fn parse_decimal(s: &str) -> Result<Decimal, ArithmeticError> {
    let trimmed = s.trim();
    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .map_err(|_| ArithmeticError::NotRepresentable(s.to_string()))
}

/// Convert a dimensionless `f64` rate into a decimal, rejecting NaN and infinities.
pub fn from_f64_rate(value: f64) -> Result<Decimal, ArithmeticError> {
    if !value.is_finite() {
        return Err(ArithmeticError::NotRepresentable(value.to_string()));
    }
    Decimal::from_f64_retain(value)
        .map(|d| d.round_dp_with_strategy(RATE_DP, RoundingStrategy::MidpointNearestEven))
        .ok_or_else(|| ArithmeticError::NotRepresentable(value.to_string()))
}

/// Lossy conversion for statistics that need `sqrt`/`ln` (Sharpe, Box-Muller inputs).
pub fn to_f64_lossy(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}
