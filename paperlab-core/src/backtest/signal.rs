//! Strategy signals.
//!
//! A signal generator sees only completed bars. On bar `i` it receives bars
//! `0..i`, so the bar being simulated can never influence its own entry.

use crate::domain::Bar;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// What a strategy wants to do at the next bar's open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    EnterLong,
    EnterShort,
    Exit,
    #[default]
    Hold,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::EnterLong => "enter_long",
            Signal::EnterShort => "enter_short",
            Signal::Exit => "exit",
            Signal::Hold => "hold",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown signal '{0}' (expected enter_long, enter_short, exit or hold)")]
pub struct ParseSignalError(pub String);

impl FromStr for Signal {
    type Err = ParseSignalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "enter_long" | "long" | "buy" => Ok(Signal::EnterLong),
            "enter_short" | "short" => Ok(Signal::EnterShort),
            "exit" | "sell" | "flat" => Ok(Signal::Exit),
            "hold" | "" => Ok(Signal::Hold),
            other => Err(ParseSignalError(other.to_string())),
        }
    }
}

/// Trait for signal generators.
///
/// `history` holds every bar up to and including the previous close. It is
/// empty on the first bar.
pub trait SignalGenerator: Send + Sync {
    fn name(&self) -> &str {
        "custom"
    }

    fn signal(&self, history: &[Bar]) -> Signal;
}

impl<F> SignalGenerator for F
where
    F: Fn(&[Bar]) -> Signal + Send + Sync,
{
    fn signal(&self, history: &[Bar]) -> Signal {
        self(history)
    }
}

/// Signals computed ahead of time, one per bar.
///
/// The value at index `i - 1` drives bar `i`: a signal is acted on at the
/// open after the bar it was computed on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrecomputedSignals {
    signals: Vec<Signal>,
}

impl PrecomputedSignals {
    pub fn new(signals: Vec<Signal>) -> Self {
        Self { signals }
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }
}

impl SignalGenerator for PrecomputedSignals {
    fn name(&self) -> &str {
        "precomputed"
    }

    fn signal(&self, history: &[Bar]) -> Signal {
        history
            .len()
            .checked_sub(1)
            .and_then(|i| self.signals.get(i))
            .copied()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn bars(n: usize) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                Bar::new(
                    Utc.with_ymd_and_hms(2024, 1, 1 + i as u32, 0, 0, 0).unwrap(),
                    dec!(100),
                    dec!(101),
                    dec!(99),
                    dec!(100),
                    dec!(1000),
                )
            })
            .collect()
    }

    #[test]
    fn parses_csv_spellings() {
        assert_eq!("enter_long".parse::<Signal>().unwrap(), Signal::EnterLong);
        assert_eq!(" EXIT ".parse::<Signal>().unwrap(), Signal::Exit);
        assert_eq!("".parse::<Signal>().unwrap(), Signal::Hold);
        assert!("moon".parse::<Signal>().is_err());
    }

    #[test]
    fn precomputed_lags_by_one_bar() {
        let s = PrecomputedSignals::new(vec![Signal::EnterLong, Signal::Hold, Signal::Exit]);
        let b = bars(3);
        assert_eq!(s.signal(&b[..0]), Signal::Hold);
        assert_eq!(s.signal(&b[..1]), Signal::EnterLong);
        assert_eq!(s.signal(&b[..3]), Signal::Exit);
    }

    #[test]
    fn closures_are_generators() {
        let always_long = |_: &[Bar]| Signal::EnterLong;
        assert_eq!(always_long.signal(&bars(1)), Signal::EnterLong);
        assert_eq!(always_long.name(), "custom");
    }
}
