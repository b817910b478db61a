//! Engine configuration: friction rates, margin rules, intrabar policies and
//! discipline goals. Injected at construction; nothing here is hardcoded
//! into the execution path.

use crate::error::EngineError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Intrabar path policy for bars that could trigger several exits.
///
/// OHLC alone cannot tell whether the high or the low traded first, so the
/// engine needs a rule for which order is evaluated first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathPolicy {
    /// Adverse orders (stop-losses) first. Stop-loss wins ties.
    #[default]
    WorstCase,
    /// Favorable orders (take-profits) first.
    BestCase,
    /// Infer the path from OHLC: whichever extreme is nearer the open trades first.
    Deterministic,
}

/// Fill price for a stop whose bar opens beyond the stop level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapPolicy {
    /// Fill at the stop level itself.
    #[default]
    FillAtTrigger,
    /// Fill at the gapped open.
    FillAtOpen,
    /// Fill at the worse of open and stop for the trader.
    FillAtWorst,
}

/// Trading discipline limits. Breaches produce warnings, never blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Goals {
    /// Maximum fills per calendar day. `None` disables the check.
    pub daily_max_trades: Option<u32>,
    /// Maximum realized loss per calendar day, as a positive amount.
    pub daily_max_loss: Option<Decimal>,
}

impl Default for Goals {
    fn default() -> Self {
        Self {
            daily_max_trades: Some(20),
            daily_max_loss: Some(dec!(5000)),
        }
    }
}

impl Goals {
    pub fn disabled() -> Self {
        Self {
            daily_max_trades: None,
            daily_max_loss: None,
        }
    }
}

/// Execution engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Fraction of notional charged on every fill.
    pub commission_rate: Decimal,
    /// Standard deviation of the Gaussian slippage draw, as a fraction of price.
    pub slippage_stddev: Decimal,
    /// Full bid-ask spread as a fraction of price. Each fill pays half.
    pub spread_rate: Decimal,
    /// Collateral reserved when opening a short, as a multiple of notional.
    pub short_margin_multiple: Decimal,
    /// Margin call when equity falls below this fraction of margin used.
    pub maintenance_margin_threshold: Decimal,
    pub path_policy: PathPolicy,
    pub gap_policy: GapPolicy,
    pub goals: Goals,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            commission_rate: dec!(0.001),
            slippage_stddev: dec!(0.0005),
            spread_rate: dec!(0.0002),
            short_margin_multiple: dec!(1.5),
            maintenance_margin_threshold: dec!(0.25),
            path_policy: PathPolicy::default(),
            gap_policy: GapPolicy::default(),
            goals: Goals::default(),
        }
    }
}

impl EngineConfig {
    /// No commission, slippage or spread. Margin rules unchanged.
    pub fn frictionless() -> Self {
        Self {
            commission_rate: Decimal::ZERO,
            slippage_stddev: Decimal::ZERO,
            spread_rate: Decimal::ZERO,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let rates = [
            ("commission_rate", self.commission_rate),
            ("slippage_stddev", self.slippage_stddev),
            ("spread_rate", self.spread_rate),
            ("maintenance_margin_threshold", self.maintenance_margin_threshold),
        ];
        for (name, value) in rates {
            if value < Decimal::ZERO {
                return Err(EngineError::InvalidOrderSpec(format!(
                    "{name} must be non-negative, got {value}"
                )));
            }
        }
        if self.commission_rate >= Decimal::ONE || self.spread_rate >= Decimal::ONE {
            return Err(EngineError::InvalidOrderSpec(
                "commission_rate and spread_rate must be below 1".into(),
            ));
        }
        if self.short_margin_multiple < Decimal::ONE {
            return Err(EngineError::InvalidOrderSpec(format!(
                "short_margin_multiple must be at least 1, got {}",
                self.short_margin_multiple
            )));
        }
        if let Some(loss) = self.goals.daily_max_loss {
            if loss <= Decimal::ZERO {
                return Err(EngineError::InvalidOrderSpec(format!(
                    "daily_max_loss must be positive, got {loss}"
                )));
            }
        }
        Ok(())
    }
}
