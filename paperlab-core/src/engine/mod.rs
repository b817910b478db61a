//! Execution engine and the aggregates that drive it.
//!
//! - [`ExecutionEngine`] fills orders and mutates the ledger, all-or-nothing.
//! - [`TradingSession`] owns one account and its books for a single timeline.
//! - [`MultiSymbolDesk`] evaluates several symbols in parallel over a shared ledger.

pub mod cost_model;
pub mod desk;
pub mod execution;
pub mod ledger;
pub mod path_policy;
pub mod report;
pub mod session;

pub use cost_model::{AdjustedPrice, CostModel};
pub use desk::{MultiSymbolDesk, SymbolDesk};
pub use execution::{position_symbol, ExecutionEngine, FillPlan, PreparedEvent};
pub use ledger::{Ledger, LocalLedger, SharedLedger};
pub use path_policy::evaluation_sequence;
pub use report::{EngineWarning, EventReport, Rejection};
pub use session::{SessionSnapshot, TradingSession, SNAPSHOT_SCHEMA_VERSION};
