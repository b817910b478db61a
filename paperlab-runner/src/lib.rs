//! PaperLab Runner: backtest orchestration on top of `paperlab-core`.
//!
//! This crate provides:
//! - TOML run configuration with a content-addressed run id
//! - CSV bar and signal loading
//! - Single and parallel (rayon) backtest runs with per-symbol seeds
//! - JSON and CSV export of results

pub mod config;
pub mod data_loader;
pub mod export;
pub mod runner;

pub use config::{ConfigError, RunConfig, RunId, StrategyConfig};
pub use data_loader::{load_bars_csv, load_signals_csv, parse_timestamp, LoadError, LoadedBars};
pub use export::{export_equity_csv, export_json, export_trades_csv, import_json, load_artifacts, save_artifacts, summary_text};
pub use runner::{batch_seed, load_input, run_backtest, run_batch, RunError, RunInput, RunReport, SCHEMA_VERSION};
