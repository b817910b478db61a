//! Cost model: half-spread, Gaussian slippage and commission.
//!
//! Both spread and slippage are directional: buyers pay more, sellers
//! receive less. Commission is a flat fraction of notional on every fill.

use crate::config::EngineConfig;
use crate::decimal::{from_f64_rate, to_f64_lossy, ArithmeticError, MoneyExt};
use crate::domain::OrderSide;
use crate::error::EngineError;
use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// A reference price adjusted for friction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdjustedPrice {
    pub price: Decimal,
    /// Per-unit half-spread paid.
    pub spread_per_unit: Decimal,
    /// Per-unit slippage paid.
    pub slippage_per_unit: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CostModel {
    pub commission_rate: Decimal,
    pub slippage_stddev: Decimal,
    pub spread_rate: Decimal,
}

impl CostModel {
    pub fn new(commission_rate: Decimal, slippage_stddev: Decimal, spread_rate: Decimal) -> Self {
        Self {
            commission_rate,
            slippage_stddev,
            spread_rate,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.commission_rate,
            config.slippage_stddev,
            config.spread_rate,
        )
    }

    pub fn frictionless() -> Self {
        Self::new(Decimal::ZERO, Decimal::ZERO, Decimal::ZERO)
    }

    /// Draw a slippage rate `|N(0, stddev)|`.
    ///
    /// Box-Muller on two uniforms. Takes nothing from `rng` when the
    /// standard deviation is zero.
    pub fn draw_slippage<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Decimal, EngineError> {
        if self.slippage_stddev.is_zero() {
            return Ok(Decimal::ZERO);
        }
        // gen() is [0, 1); ln needs (0, 1].
        let u1: f64 = 1.0 - rng.gen::<f64>();
        let u2: f64 = rng.gen();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        let rate = from_f64_rate(z.abs() * to_f64_lossy(self.slippage_stddev))?;
        Ok(rate)
    }

    /// Apply the half-spread and then `slippage_rate` against the trader.
    pub fn adjust(
        &self,
        reference: Decimal,
        side: OrderSide,
        slippage_rate: Decimal,
    ) -> Result<AdjustedPrice, EngineError> {
        let half_spread = self.spread_rate.try_div(dec!(2))?;
        let spread_per_unit = reference.try_mul(half_spread)?;
        let after_spread = match side {
            OrderSide::Buy => reference.try_add(spread_per_unit)?,
            OrderSide::Sell => reference.try_sub(spread_per_unit)?,
        };
        let slippage_per_unit = after_spread.try_mul(slippage_rate)?;
        let price = match side {
            OrderSide::Buy => after_spread.try_add(slippage_per_unit)?,
            OrderSide::Sell => after_spread.try_sub(slippage_per_unit)?,
        };
        if price <= Decimal::ZERO {
            return Err(ArithmeticError::NotRepresentable(format!(
                "fill price {price} after costs on reference {reference}"
            ))
            .into());
        }
        Ok(AdjustedPrice {
            price,
            spread_per_unit,
            slippage_per_unit,
        })
    }

    pub fn commission(&self, notional: Decimal) -> Result<Decimal, EngineError> {
        Ok(notional.pct_of(self.commission_rate)?)
    }
}
