//! Backtest runner: wires config, data and the core simulator together.
//!
//! Entry points:
//! - `load_input()`: reads a bar CSV (and the strategy's signal CSV, if any).
//! - `run_backtest()`: one symbol, one account.
//! - `run_batch()`: many symbols in parallel, each with its own account and
//!   a sub-seed derived from the master seed, so results do not depend on
//!   thread scheduling.

use std::path::Path;

use paperlab_core::backtest::{self, BacktestResult, CancelToken, PrecomputedSignals};
use paperlab_core::domain::Bar;
use paperlab_core::error::EngineError;
use paperlab_core::rng::RngHierarchy;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{ConfigError, RunConfig};
use crate::data_loader::{load_bars_csv, load_signals_csv, LoadError};

/// RNG stream for per-symbol backtest seeds.
const BACKTEST_STREAM: u64 = 1;

/// Current schema version for persisted reports.
pub const SCHEMA_VERSION: u32 = 1;

/// Errors from the runner.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("data error: {0}")]
    Data(#[from] LoadError),
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
}

/// Everything needed to replay one symbol.
#[derive(Debug, Clone)]
pub struct RunInput {
    pub symbol: String,
    pub bars: Vec<Bar>,
    pub signals: Option<PrecomputedSignals>,
    pub dataset_hash: String,
}

/// A finished run with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub run_id: String,
    pub dataset_hash: String,
    /// Seed actually used for this symbol's slippage draws.
    pub seed: u64,
    pub result: BacktestResult,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

/// Load bars from `bars_path` and, for precomputed strategies, the matching signals.
pub fn load_input(config: &RunConfig, bars_path: &Path, symbol: Option<&str>) -> Result<RunInput, RunError> {
    let loaded = load_bars_csv(bars_path, symbol)?;
    let signals = match config.strategy.signals_path(&loaded.symbol) {
        Some(path) => Some(load_signals_csv(&path, &loaded.bars)?),
        None => None,
    };
    Ok(RunInput {
        symbol: loaded.symbol,
        bars: loaded.bars,
        signals,
        dataset_hash: loaded.dataset_hash,
    })
}

/// Run one backtest with the configured seed.
pub fn run_backtest(config: &RunConfig, input: &RunInput, cancel: &CancelToken) -> Result<RunReport, RunError> {
    run_with_seed(config, input, config.backtest.seed, cancel)
}

fn run_with_seed(config: &RunConfig, input: &RunInput, seed: u64, cancel: &CancelToken) -> Result<RunReport, RunError> {
    let strategy = config.strategy.build(input.signals.clone())?;
    let mut backtest_config = config.backtest.clone();
    backtest_config.seed = seed;

    let result = backtest::run_backtest(
        &input.symbol,
        &input.bars,
        strategy.as_ref(),
        &config.engine,
        &backtest_config,
        cancel,
    )?;
    if !result.data_gaps.is_empty() {
        warn!(symbol = %input.symbol, gaps = result.data_gaps.len(), "bars skipped as data gaps");
    }
    Ok(RunReport {
        schema_version: SCHEMA_VERSION,
        run_id: config.run_id()?,
        dataset_hash: input.dataset_hash.clone(),
        seed,
        result,
    })
}

/// Run every input in parallel with independent accounts.
///
/// Each symbol's seed is derived from `config.backtest.seed`, so a symbol
/// replays identically whether it runs alone in a batch or with others.
/// Results come back in input order; one symbol failing does not stop the rest.
pub fn run_batch(
    config: &RunConfig,
    inputs: &[RunInput],
    cancel: &CancelToken,
) -> Vec<(String, Result<RunReport, RunError>)> {
    let rngs = RngHierarchy::new(config.backtest.seed);
    info!(symbols = inputs.len(), master_seed = rngs.master_seed(), "batch started");
    inputs
        .par_iter()
        .map(|input| {
            let seed = rngs.sub_seed(&input.symbol, BACKTEST_STREAM);
            let outcome = run_with_seed(config, input, seed, cancel);
            if let Err(err) = &outcome {
                warn!(symbol = %input.symbol, error = %err, "batch run failed");
            }
            (input.symbol.clone(), outcome)
        })
        .collect()
}

/// Seed `run_batch` uses for `symbol` under `master_seed`.
pub fn batch_seed(master_seed: u64, symbol: &str) -> u64 {
    RngHierarchy::new(master_seed).sub_seed(symbol, BACKTEST_STREAM)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrategyConfig;
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn input(symbol: &str, n: usize) -> RunInput {
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let bars = (0..n)
            .map(|i| {
                let close = dec!(100) + Decimal::from((i % 7) as i64);
                Bar::new(start + Duration::days(i as i64), close, close + dec!(1), close - dec!(1), close, dec!(1))
            })
            .collect();
        RunInput {
            symbol: symbol.to_string(),
            bars,
            signals: None,
            dataset_hash: String::new(),
        }
    }

    #[test]
    fn single_run_uses_configured_seed() {
        let config = RunConfig::default();
        let report = run_backtest(&config, &input("SPY", 10), &CancelToken::new()).unwrap();
        assert_eq!(report.seed, config.backtest.seed);
        assert_eq!(report.schema_version, SCHEMA_VERSION);
        assert_eq!(report.result.bars_processed, 10);
        assert_eq!(report.run_id, config.run_id().unwrap());
    }

    #[test]
    fn batch_matches_individual_runs() {
        let config = RunConfig::default();
        let inputs = vec![input("SPY", 30), input("QQQ", 30), input("IWM", 30)];
        let batch = run_batch(&config, &inputs, &CancelToken::new());
        assert_eq!(
            batch.iter().map(|(s, _)| s.as_str()).collect::<Vec<_>>(),
            vec!["SPY", "QQQ", "IWM"]
        );
        for ((symbol, outcome), input) in batch.iter().zip(&inputs) {
            let report = outcome.as_ref().unwrap();
            let seed = batch_seed(config.backtest.seed, symbol);
            assert_eq!(report.seed, seed);
            let alone = run_with_seed(&config, input, seed, &CancelToken::new()).unwrap();
            assert_eq!(report.result.trades, alone.result.trades);
        }
    }

    #[test]
    fn batch_reports_failures_per_symbol() {
        let config = RunConfig {
            strategy: StrategyConfig::Precomputed {
                path: "missing.csv".into(),
            },
            ..RunConfig::default()
        };
        let batch = run_batch(&config, &[input("SPY", 5)], &CancelToken::new());
        assert!(matches!(batch[0].1, Err(RunError::Config(ConfigError::MissingSignals(_)))));
    }
}
