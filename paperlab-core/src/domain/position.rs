//! Open positions and the position book that aggregates them.

use super::instrument::Instrument;
use crate::decimal::{ArithmeticError, MoneyExt};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionSide {
    Long,
    Short,
}

/// One aggregated open position per (symbol, side).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Book symbol. For options this is the contract symbol, not the underlying.
    pub symbol: String,
    pub side: PositionSide,
    pub quantity: Decimal,
    /// Volume-weighted entry price, excluding commission.
    pub average_cost: Decimal,
    /// Cash held as collateral. Zero for longs.
    pub margin_reserved: Decimal,
    /// Entry commission not yet released to realized P&L.
    pub open_commission: Decimal,
    pub instrument: Instrument,
    pub opened_at: DateTime<Utc>,
    /// Last price the position was marked at (premium for options).
    pub last_mark: Decimal,
}

impl Position {
    /// Price feed symbol that marks this position.
    pub fn feed_symbol(&self) -> &str {
        match &self.instrument {
            Instrument::Option(contract) => &contract.underlying,
            Instrument::Equity => &self.symbol,
        }
    }

    fn units(&self) -> Result<Decimal, ArithmeticError> {
        self.quantity.try_mul(self.instrument.multiplier())
    }

    /// Contribution to account equity at `price`.
    ///
    /// A long is worth its market value. A short is worth its reserved
    /// collateral plus the open gain (entry minus current) on the units sold.
    pub fn mark_value(&self, price: Decimal) -> Result<Decimal, ArithmeticError> {
        let units = self.units()?;
        match self.side {
            PositionSide::Long => units.try_mul(price),
            PositionSide::Short => {
                let gain = self.average_cost.try_sub(price)?.try_mul(units)?;
                self.margin_reserved.try_add(gain)
            }
        }
    }

    pub fn unrealized_pnl(&self, price: Decimal) -> Result<Decimal, ArithmeticError> {
        let units = self.units()?;
        let per_unit = match self.side {
            PositionSide::Long => price.try_sub(self.average_cost)?,
            PositionSide::Short => self.average_cost.try_sub(price)?,
        };
        per_unit.try_mul(units)
    }

    pub fn market_value(&self) -> Result<Decimal, ArithmeticError> {
        self.mark_value(self.last_mark)
    }
}

/// All open positions, keyed by (symbol, side).
///
/// Entries exist only while quantity is positive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<Position>", into = "Vec<Position>")]
pub struct PositionBook {
    positions: BTreeMap<(String, PositionSide), Position>,
}

impl From<Vec<Position>> for PositionBook {
    fn from(list: Vec<Position>) -> Self {
        let positions = list
            .into_iter()
            .map(|p| ((p.symbol.clone(), p.side), p))
            .collect();
        Self { positions }
    }
}

impl From<PositionBook> for Vec<Position> {
    fn from(book: PositionBook) -> Self {
        book.positions.into_values().collect()
    }
}

impl PositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, symbol: &str, side: PositionSide) -> Option<&Position> {
        self.positions.get(&(symbol.to_string(), side))
    }

    /// Open quantity, zero when flat.
    pub fn quantity(&self, symbol: &str, side: PositionSide) -> Decimal {
        self.get(symbol, side)
            .map(|p| p.quantity)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Replace or remove the position for (symbol, side). Execution only.
    pub(crate) fn set(&mut self, symbol: &str, side: PositionSide, position: Option<Position>) {
        let key = (symbol.to_string(), side);
        match position {
            Some(p) if p.quantity > Decimal::ZERO => {
                self.positions.insert(key, p);
            }
            _ => {
                self.positions.remove(&key);
            }
        }
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Position> {
        self.positions.values_mut()
    }

    /// Sum of mark values at each position's last mark.
    pub fn market_value(&self) -> Result<Decimal, ArithmeticError> {
        self.positions
            .values()
            .try_fold(Decimal::ZERO, |acc, p| acc.try_add(p.market_value()?))
    }

    /// Total collateral held against shorts.
    pub fn margin_used(&self) -> Result<Decimal, ArithmeticError> {
        self.positions
            .values()
            .try_fold(Decimal::ZERO, |acc, p| acc.try_add(p.margin_reserved))
    }

    pub fn unrealized_pnl(&self) -> Result<Decimal, ArithmeticError> {
        self.positions
            .values()
            .try_fold(Decimal::ZERO, |acc, p| acc.try_add(p.unrealized_pnl(p.last_mark)?))
    }
}
