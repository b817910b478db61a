//! Serializable run configuration, read from TOML.
//!
//! ```toml
//! [engine]
//! commission_rate = "0.001"
//! path_policy = "worst_case"
//!
//! [backtest]
//! initial_capital = "100000"
//! stop_loss_pct = "5"
//! seed = 42
//!
//! [strategy]
//! type = "sma_crossover"
//! fast = 10
//! slow = 50
//! ```
//!
//! Every section is optional; missing fields take the engine defaults.

use paperlab_core::backtest::{BacktestConfig, BuyAndHold, PrecomputedSignals, SignalGenerator, SmaCrossover};
use paperlab_core::config::EngineConfig;
use paperlab_core::error::EngineError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Unique identifier for a run (content-addressable hash of its config).
pub type RunId = String;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to encode config: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(#[from] EngineError),

    #[error("strategy '{0}' needs precomputed signals but none were loaded")]
    MissingSignals(String),
}

/// Complete description of a backtest run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub engine: EngineConfig,
    pub backtest: BacktestConfig,
    pub strategy: StrategyConfig,
}

impl RunConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: RunConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine.validate()?;
        self.backtest.validate()?;
        self.strategy.validate()?;
        Ok(())
    }

    /// Deterministic hash of the canonical JSON form.
    ///
    /// Two runs with identical configs share a RunId.
    pub fn run_id(&self) -> Result<RunId, ConfigError> {
        let json = serde_json::to_string(self)?;
        Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
    }
}

/// Strategy selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrategyConfig {
    /// Long from the second bar to the end.
    #[default]
    BuyAndHold,

    /// Fast/slow simple moving average regime.
    SmaCrossover {
        fast: usize,
        slow: usize,
        /// Go short in the bearish regime instead of standing aside.
        #[serde(default)]
        short: bool,
    },

    /// Signals read from a `timestamp,signal` CSV. A directory holds one
    /// `<SYMBOL>.csv` per symbol.
    Precomputed { path: PathBuf },
}

impl StrategyConfig {
    pub fn name(&self) -> &'static str {
        match self {
            Self::BuyAndHold => "buy_and_hold",
            Self::SmaCrossover { .. } => "sma_crossover",
            Self::Precomputed { .. } => "precomputed",
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Self::SmaCrossover { fast, slow, .. } = self {
            if *fast == 0 || fast >= slow {
                return Err(EngineError::InvalidOrderSpec(format!(
                    "sma_crossover needs 0 < fast < slow, got fast={fast} slow={slow}"
                ))
                .into());
            }
        }
        Ok(())
    }

    /// Signal file for `symbol`, when this strategy reads one.
    pub fn signals_path(&self, symbol: &str) -> Option<PathBuf> {
        match self {
            Self::Precomputed { path } if path.is_dir() => Some(path.join(format!("{symbol}.csv"))),
            Self::Precomputed { path } => Some(path.clone()),
            _ => None,
        }
    }

    /// Instantiate the strategy. `signals` is consumed by `precomputed`.
    pub fn build(&self, signals: Option<PrecomputedSignals>) -> Result<Box<dyn SignalGenerator>, ConfigError> {
        match self {
            Self::BuyAndHold => Ok(Box::new(BuyAndHold)),
            Self::SmaCrossover { fast, slow, short } => Ok(Box::new(SmaCrossover {
                fast: *fast,
                slow: *slow,
                short: *short,
            })),
            Self::Precomputed { .. } => signals
                .map(|s| Box::new(s) as Box<dyn SignalGenerator>)
                .ok_or_else(|| ConfigError::MissingSignals(self.name().to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paperlab_core::backtest::Sizing;
    use paperlab_core::config::PathPolicy;
    use rust_decimal_macros::dec;

    const SAMPLE: &str = r#"
[engine]
commission_rate = "0.002"
path_policy = "best_case"

[backtest]
initial_capital = "25000"
stop_loss_pct = "5"
allow_short = true
seed = 9

[backtest.sizing]
mode = "fixed_quantity"
value = "10"

[strategy]
type = "sma_crossover"
fast = 5
slow = 20
"#;

    #[test]
    fn parses_all_sections() {
        let config = RunConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.engine.commission_rate, dec!(0.002));
        assert_eq!(config.engine.path_policy, PathPolicy::BestCase);
        assert_eq!(config.engine.spread_rate, EngineConfig::default().spread_rate);
        assert_eq!(config.backtest.initial_capital, dec!(25000));
        assert_eq!(config.backtest.sizing, Sizing::FixedQuantity(dec!(10)));
        assert!(config.backtest.allow_short);
        assert_eq!(config.backtest.seed, 9);
        assert_eq!(
            config.strategy,
            StrategyConfig::SmaCrossover {
                fast: 5,
                slow: 20,
                short: false
            }
        );
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let config = RunConfig::from_toml_str("").unwrap();
        assert_eq!(config, RunConfig::default());
    }

    #[test]
    fn rejects_invalid_values() {
        let err = RunConfig::from_toml_str("[engine]\ncommission_rate = \"-0.1\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = RunConfig::from_toml_str("[strategy]\ntype = \"sma_crossover\"\nfast = 50\nslow = 10\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = RunConfig::from_toml_str("[strategy]\ntype = \"martingale\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn run_id_deterministic() {
        let config = RunConfig::from_toml_str(SAMPLE).unwrap();
        let id1 = config.run_id().unwrap();
        let id2 = config.clone().run_id().unwrap();
        assert_eq!(id1, id2);
        assert_eq!(id1.len(), 64);
    }

    #[test]
    fn run_id_changes_with_params() {
        let config1 = RunConfig::from_toml_str(SAMPLE).unwrap();
        let mut config2 = config1.clone();
        config2.backtest.seed = 10;
        assert_ne!(config1.run_id().unwrap(), config2.run_id().unwrap());
    }

    #[test]
    fn precomputed_requires_signals() {
        let strategy = StrategyConfig::Precomputed {
            path: PathBuf::from("signals.csv"),
        };
        assert!(matches!(strategy.build(None), Err(ConfigError::MissingSignals(_))));
        let built = strategy.build(Some(PrecomputedSignals::default())).unwrap();
        assert_eq!(built.name(), "precomputed");
        assert_eq!(strategy.signals_path("SPY"), Some(PathBuf::from("signals.csv")));
    }
}
