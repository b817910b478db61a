//! Option valuation seam.
//!
//! The engine does not price options itself. It calls an [`OptionValuation`]
//! with the contract terms and the underlying spot to mark option positions
//! and to derive the premium snapshot option orders trigger against.

use crate::decimal::MoneyExt;
use crate::domain::{OptionContract, OptionType, PriceSnapshot};
use crate::error::EngineError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const SECONDS_PER_YEAR: Decimal = dec!(31536000);

/// Inputs to an option pricing function.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValuationInputs {
    pub spot: Decimal,
    pub strike: Decimal,
    /// Years until expiry, floored at zero.
    pub time_to_expiry: Decimal,
    pub volatility: Decimal,
    pub rate: Decimal,
    pub option_type: OptionType,
}

impl ValuationInputs {
    pub fn for_contract(
        contract: &OptionContract,
        spot: Decimal,
        at: DateTime<Utc>,
    ) -> Result<Self, EngineError> {
        let seconds = (contract.expiry - at).num_seconds().max(0);
        let time_to_expiry = Decimal::from(seconds).try_div(SECONDS_PER_YEAR)?;
        Ok(Self {
            spot,
            strike: contract.strike,
            time_to_expiry,
            volatility: contract.volatility,
            rate: contract.rate,
            option_type: contract.option_type,
        })
    }
}

/// Per-unit option premium for the given inputs.
pub trait OptionValuation: Send + Sync {
    fn premium(&self, inputs: &ValuationInputs) -> Result<Decimal, EngineError>;
}

impl<F> OptionValuation for F
where
    F: Fn(&ValuationInputs) -> Result<Decimal, EngineError> + Send + Sync,
{
    fn premium(&self, inputs: &ValuationInputs) -> Result<Decimal, EngineError> {
        self(inputs)
    }
}

/// Intrinsic value only: `max(spot - strike, 0)` for calls, `max(strike - spot, 0)` for puts.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntrinsicValuation;

impl OptionValuation for IntrinsicValuation {
    fn premium(&self, inputs: &ValuationInputs) -> Result<Decimal, EngineError> {
        let diff = match inputs.option_type {
            OptionType::Call => inputs.spot.try_sub(inputs.strike)?,
            OptionType::Put => inputs.strike.try_sub(inputs.spot)?,
        };
        Ok(diff.max(Decimal::ZERO))
    }
}

/// Premium for `contract` at `spot`, rejecting negative or zero-spot results.
pub fn premium_at(
    valuation: &dyn OptionValuation,
    contract: &OptionContract,
    spot: Decimal,
    at: DateTime<Utc>,
) -> Result<Decimal, EngineError> {
    if spot <= Decimal::ZERO {
        return Err(EngineError::Valuation(format!(
            "non-positive spot {spot} for {}",
            contract.symbol()
        )));
    }
    let inputs = ValuationInputs::for_contract(contract, spot, at)?;
    let premium = valuation.premium(&inputs)?;
    if premium < Decimal::ZERO {
        return Err(EngineError::Valuation(format!(
            "negative premium {premium} for {}",
            contract.symbol()
        )));
    }
    Ok(premium)
}

/// Premium OHLC implied by the underlying's OHLC.
///
/// Calls gain with spot, so the underlying high maps to the premium high.
/// Puts gain as spot falls, so the underlying low maps to the premium high.
pub fn premium_snapshot(
    valuation: &dyn OptionValuation,
    contract: &OptionContract,
    underlying: &PriceSnapshot,
    at: DateTime<Utc>,
) -> Result<PriceSnapshot, EngineError> {
    let open = premium_at(valuation, contract, underlying.open, at)?;
    let close = premium_at(valuation, contract, underlying.close, at)?;
    let at_high = premium_at(valuation, contract, underlying.high, at)?;
    let at_low = premium_at(valuation, contract, underlying.low, at)?;
    let (high, low) = match contract.option_type {
        OptionType::Call => (at_high, at_low),
        OptionType::Put => (at_low, at_high),
    };
    Ok(PriceSnapshot {
        open,
        high: high.max(open).max(close),
        low: low.min(open).min(close),
        close,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DEFAULT_CONTRACT_MULTIPLIER;
    use chrono::TimeZone;

    fn contract(option_type: OptionType) -> OptionContract {
        OptionContract {
            underlying: "AAPL".into(),
            strike: dec!(150),
            expiry: Utc.with_ymd_and_hms(2025, 6, 20, 20, 0, 0).unwrap(),
            option_type,
            volatility: dec!(0.3),
            rate: dec!(0.05),
            multiplier: DEFAULT_CONTRACT_MULTIPLIER,
        }
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 2, 20, 0, 0).unwrap()
    }

    #[test]
    fn intrinsic_call_and_put() {
        let call = premium_at(&IntrinsicValuation, &contract(OptionType::Call), dec!(160), at()).unwrap();
        assert_eq!(call, dec!(10));
        let put = premium_at(&IntrinsicValuation, &contract(OptionType::Put), dec!(160), at()).unwrap();
        assert_eq!(put, Decimal::ZERO);
    }

    #[test]
    fn put_snapshot_swaps_extremes() {
        let underlying = PriceSnapshot {
            open: dec!(145),
            high: dec!(148),
            low: dec!(140),
            close: dec!(146),
        };
        let snap =
            premium_snapshot(&IntrinsicValuation, &contract(OptionType::Put), &underlying, at()).unwrap();
        assert_eq!(snap.high, dec!(10));
        assert_eq!(snap.low, dec!(2));
        assert_eq!(snap.open, dec!(5));
        assert_eq!(snap.close, dec!(4));
    }

    #[test]
    fn closure_valuation_is_accepted() {
        let flat = |_: &ValuationInputs| -> Result<Decimal, EngineError> { Ok(dec!(3.25)) };
        let premium = premium_at(&flat, &contract(OptionType::Call), dec!(100), at()).unwrap();
        assert_eq!(premium, dec!(3.25));
    }

    #[test]
    fn negative_premium_is_a_valuation_error() {
        let broken = |_: &ValuationInputs| -> Result<Decimal, EngineError> { Ok(dec!(-1)) };
        let err = premium_at(&broken, &contract(OptionType::Call), dec!(100), at()).unwrap_err();
        assert!(matches!(err, EngineError::Valuation(_)));
    }

    #[test]
    fn time_to_expiry_floors_at_zero() {
        let late = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let inputs = ValuationInputs::for_contract(&contract(OptionType::Call), dec!(150), late).unwrap();
        assert_eq!(inputs.time_to_expiry, Decimal::ZERO);
    }
}
