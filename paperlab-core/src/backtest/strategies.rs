//! Built-in demo strategies.

use super::signal::{Signal, SignalGenerator};
use crate::decimal::{try_sum, MoneyExt};
use crate::domain::Bar;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Enter long as soon as any history exists and never exit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuyAndHold;

impl SignalGenerator for BuyAndHold {
    fn name(&self) -> &str {
        "buy_and_hold"
    }

    fn signal(&self, history: &[Bar]) -> Signal {
        if history.is_empty() {
            Signal::Hold
        } else {
            Signal::EnterLong
        }
    }
}

/// Trend regime from two simple moving averages of the close.
///
/// Long while the fast average is above the slow one; flat (or short, when
/// `short` is set) otherwise. Holds until `slow` bars of history exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmaCrossover {
    pub fast: usize,
    pub slow: usize,
    #[serde(default)]
    pub short: bool,
}

impl Default for SmaCrossover {
    fn default() -> Self {
        Self {
            fast: 10,
            slow: 50,
            short: false,
        }
    }
}

impl SmaCrossover {
    pub fn new(fast: usize, slow: usize) -> Self {
        Self {
            fast,
            slow,
            short: false,
        }
    }
}

/// Mean close of the last `period` bars. `None` without enough history.
pub fn sma(history: &[Bar], period: usize) -> Option<Decimal> {
    if period == 0 || history.len() < period {
        return None;
    }
    let window = &history[history.len() - period..];
    let total = try_sum(window.iter().map(|b| b.close)).ok()?;
    total.try_div(Decimal::from(period)).ok()
}

impl SignalGenerator for SmaCrossover {
    fn name(&self) -> &str {
        "sma_crossover"
    }

    fn signal(&self, history: &[Bar]) -> Signal {
        let (Some(fast), Some(slow)) = (sma(history, self.fast), sma(history, self.slow)) else {
            return Signal::Hold;
        };
        if fast > slow {
            Signal::EnterLong
        } else if self.short {
            Signal::EnterShort
        } else {
            Signal::Exit
        }
    }
}
