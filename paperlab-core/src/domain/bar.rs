//! Bar, the fundamental market data unit, and the price snapshot it reduces to.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// OHLCV bar for a single symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Bar {
    pub fn new(
        timestamp: DateTime<Utc>,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Basic OHLC sanity check: high >= every other price, low <= every other price, all positive.
    pub fn is_sane(&self) -> bool {
        self.high >= self.low
            && self.high >= self.open
            && self.high >= self.close
            && self.low <= self.open
            && self.low <= self.close
            && self.low > Decimal::ZERO
            && self.volume >= Decimal::ZERO
    }

    /// Describe why the bar fails [`Bar::is_sane`], if it does.
    pub fn sanity_violation(&self) -> Option<String> {
        if self.is_sane() {
            return None;
        }
        Some(format!(
            "inconsistent OHLC (open={}, high={}, low={}, close={}, volume={})",
            self.open, self.high, self.low, self.close, self.volume
        ))
    }

    pub fn snapshot(&self) -> PriceSnapshot {
        PriceSnapshot {
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
        }
    }
}

/// Price information available for one evaluation event: a bar or a single tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
}

impl PriceSnapshot {
    /// A single traded price: all four fields equal.
    pub fn tick(price: Decimal) -> Self {
        Self {
            open: price,
            high: price,
            low: price,
            close: price,
        }
    }

    /// Only the open is known: start-of-bar, before any intrabar movement.
    pub fn opening(open: Decimal) -> Self {
        Self::tick(open)
    }
}
