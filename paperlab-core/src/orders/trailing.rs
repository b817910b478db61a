//! Trailing-stop ratchet.
//!
//! Stops may tighten, never loosen: a sell stop (protecting a long) only
//! rises, a buy stop (protecting a short) only falls.

use crate::domain::{OrderKind, OrderSide};
use crate::error::EngineError;
use rust_decimal::Decimal;

/// Advance a trailing stop's water mark to `price` and ratchet its stop.
///
/// Returns the new stop level when it moved, `None` otherwise. Non-trailing
/// kinds are left untouched.
pub fn ratchet(kind: &mut OrderKind, side: OrderSide, price: Decimal) -> Result<Option<Decimal>, EngineError> {
    let OrderKind::TrailingStop {
        trail,
        stop_price,
        water_mark,
    } = kind
    else {
        return Ok(None);
    };

    let improved = match side {
        OrderSide::Sell => price > *water_mark,
        OrderSide::Buy => price < *water_mark,
    };
    if !improved {
        return Ok(None);
    }

    let proposed = trail.stop_for(side, price)?;
    let tightened = match side {
        OrderSide::Sell => proposed.max(*stop_price),
        OrderSide::Buy => proposed.min(*stop_price),
    };
    *water_mark = price;
    if tightened == *stop_price {
        return Ok(None);
    }
    *stop_price = tightened;
    Ok(Some(tightened))
}

/// Restart a trailing stop from a fresh reference, e.g. when a bracket leg
/// activates. The reference is the entry's market price before spread and
/// slippage.
pub fn reseed(kind: &mut OrderKind, side: OrderSide, reference: Decimal) -> Result<(), EngineError> {
    if let OrderKind::TrailingStop {
        trail,
        stop_price,
        water_mark,
    } = kind
    {
        *water_mark = reference;
        *stop_price = trail.stop_for(side, reference)?;
    }
    Ok(())
}
