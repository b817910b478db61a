//! Tradable instruments: plain equities (stocks, ETFs, FX, crypto) and option contracts.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Standard equity option contract size.
pub const DEFAULT_CONTRACT_MULTIPLIER: Decimal = dec!(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionType {
    Call,
    Put,
}

/// An option contract on an underlying symbol.
///
/// Volatility and rate are the valuation inputs used to mark the contract;
/// they are carried on the contract because the engine does not source them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionContract {
    pub underlying: String,
    pub strike: Decimal,
    pub expiry: DateTime<Utc>,
    pub option_type: OptionType,
    pub volatility: Decimal,
    pub rate: Decimal,
    pub multiplier: Decimal,
}

impl OptionContract {
    /// Contract symbol, e.g. `AAPL-20250117-C-150`.
    pub fn symbol(&self) -> String {
        let kind = match self.option_type {
            OptionType::Call => "C",
            OptionType::Put => "P",
        };
        format!(
            "{}-{}-{}-{}",
            self.underlying,
            self.expiry.format("%Y%m%d"),
            kind,
            self.strike.normalize()
        )
    }
}

/// What an order or position trades.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Instrument {
    #[default]
    Equity,
    Option(OptionContract),
}

impl Instrument {
    /// Units of underlying per quantity unit.
    pub fn multiplier(&self) -> Decimal {
        match self {
            Self::Equity => Decimal::ONE,
            Self::Option(contract) => contract.multiplier,
        }
    }

    pub fn is_option(&self) -> bool {
        matches!(self, Self::Option(_))
    }

    pub fn option_contract(&self) -> Option<&OptionContract> {
        match self {
            Self::Option(contract) => Some(contract),
            Self::Equity => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn contract(option_type: OptionType) -> OptionContract {
        OptionContract {
            underlying: "AAPL".into(),
            strike: dec!(150.00),
            expiry: Utc.with_ymd_and_hms(2025, 1, 17, 21, 0, 0).unwrap(),
            option_type,
            volatility: dec!(0.25),
            rate: dec!(0.05),
            multiplier: DEFAULT_CONTRACT_MULTIPLIER,
        }
    }

    #[test]
    fn equity_multiplier_is_one() {
        assert_eq!(Instrument::Equity.multiplier(), Decimal::ONE);
        assert!(!Instrument::Equity.is_option());
    }

    #[test]
    fn option_symbol_and_multiplier() {
        let call = Instrument::Option(contract(OptionType::Call));
        assert_eq!(call.multiplier(), dec!(100));
        assert_eq!(
            call.option_contract().unwrap().symbol(),
            "AAPL-20250117-C-150"
        );
        assert_eq!(contract(OptionType::Put).symbol(), "AAPL-20250117-P-150");
    }

    #[test]
    fn instrument_serializes_tagged() {
        let json = serde_json::to_string(&Instrument::Equity).unwrap();
        assert_eq!(json, r#"{"type":"equity"}"#);
    }
}
