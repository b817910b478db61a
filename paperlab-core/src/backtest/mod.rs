//! Historical backtesting: strategies, the bar-by-bar simulator and run statistics.

pub mod signal;
pub mod simulator;
pub mod strategies;
pub mod summary;

pub use signal::{ParseSignalError, PrecomputedSignals, Signal, SignalGenerator};
pub use simulator::{
    check_monotonic, run_backtest, BacktestConfig, BacktestResult, Backtester, CancelToken, SimState, Sizing,
    StepOutcome,
};
pub use strategies::{sma, BuyAndHold, SmaCrossover};
pub use summary::{BacktestSummary, EquityPoint};
