//! PaperLab Core: decimal ledger, order book, execution engine, backtest simulator.
//!
//! This crate contains the paper-trading engine:
//! - Exact decimal money arithmetic
//! - Domain types (bars, orders, positions, trades, account, instruments)
//! - Order book state machine with OCO links, brackets and trailing stops
//! - Execution engine with cost model, path policies and all-or-nothing fills
//! - Single-session and multi-symbol (parallel) trading aggregates
//! - Bar-by-bar backtest simulator with no look-ahead

pub mod backtest;
pub mod config;
pub mod decimal;
pub mod domain;
pub mod engine;
pub mod error;
pub mod orders;
pub mod rng;
pub mod valuation;

pub use config::{EngineConfig, GapPolicy, Goals, PathPolicy};
pub use error::{EngineError, ErrorKind, Failure};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: state shared with worker threads is Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        // Domain types
        require_send::<domain::Bar>();
        require_sync::<domain::Bar>();
        require_send::<domain::Order>();
        require_sync::<domain::Order>();
        require_send::<domain::Position>();
        require_sync::<domain::Position>();
        require_send::<domain::PositionBook>();
        require_sync::<domain::PositionBook>();
        require_send::<domain::Account>();
        require_sync::<domain::Account>();
        require_send::<domain::TradeJournal>();
        require_sync::<domain::TradeJournal>();
        require_send::<domain::Instrument>();
        require_sync::<domain::Instrument>();

        // Orders
        require_send::<orders::OrderBook>();
        require_sync::<orders::OrderBook>();

        // RNG
        require_send::<rng::RngHierarchy>();
        require_sync::<rng::RngHierarchy>();

        // Engine types
        require_send::<EngineConfig>();
        require_sync::<EngineConfig>();
        require_send::<engine::ExecutionEngine>();
        require_sync::<engine::ExecutionEngine>();
        require_send::<engine::TradingSession>();
        require_sync::<engine::TradingSession>();
        require_send::<engine::SharedLedger>();
        require_sync::<engine::SharedLedger>();
        require_send::<engine::SessionSnapshot>();
        require_sync::<engine::SessionSnapshot>();

        // Backtest types
        require_send::<backtest::BacktestResult>();
        require_sync::<backtest::BacktestResult>();
        require_send::<backtest::CancelToken>();
        require_sync::<backtest::CancelToken>();
    }

    /// Architecture contract: signal generators see only bar history.
    ///
    /// `signal` takes the completed bars and nothing else, so a strategy
    /// cannot read positions, cash or the bar being simulated.
    #[test]
    fn signal_generator_sees_only_history() {
        fn _check_trait_object_builds(
            sig: &dyn backtest::SignalGenerator,
            history: &[domain::Bar],
        ) -> backtest::Signal {
            sig.signal(history)
        }
    }
}
