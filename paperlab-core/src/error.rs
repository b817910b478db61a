//! Engine error taxonomy.
//!
//! Every failure the engine can report carries a stable [`ErrorKind`] plus
//! enough context to explain itself. Order-level and bar-level failures are
//! recoverable; only a malformed historical sequence aborts a backtest.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::decimal::ArithmeticError;
use crate::domain::OrderId;

/// Errors from order validation, execution and replay.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("invalid order spec: {0}")]
    InvalidOrderSpec(String),

    #[error("insufficient funds: need {required}, available {available}")]
    InsufficientFunds { required: Decimal, available: Decimal },

    #[error("insufficient margin: need {required} in reserve, available {available}")]
    InsufficientMargin { required: Decimal, available: Decimal },

    #[error("insufficient position in {symbol}: requested {requested}, held {held}")]
    InsufficientPosition {
        symbol: String,
        requested: Decimal,
        held: Decimal,
    },

    #[error("symbol '{0}' not found")]
    SymbolNotFound(String),

    #[error("data gap for {symbol} at {at}: {reason}")]
    DataGap {
        symbol: String,
        at: DateTime<Utc>,
        reason: String,
    },

    #[error("arithmetic error: {0}")]
    Arithmetic(#[from] ArithmeticError),

    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    #[error("order {0} is not active (status: {1})")]
    OrderNotActive(OrderId, String),

    #[error("bar timestamps are not strictly increasing at index {index} ({previous} -> {current})")]
    NonMonotonicTimestamps {
        index: usize,
        previous: DateTime<Utc>,
        current: DateTime<Utc>,
    },

    #[error("option valuation failed: {0}")]
    Valuation(String),

    #[error("unsupported snapshot schema version {found} (expected {expected})")]
    UnsupportedSnapshot { found: u32, expected: u32 },
}

/// Stable, serializable classification of an [`EngineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidOrderSpec,
    InsufficientFunds,
    InsufficientMargin,
    InsufficientPosition,
    SymbolNotFound,
    DataGap,
    Arithmetic,
    OrderNotFound,
    OrderNotActive,
    NonMonotonicTimestamps,
    Valuation,
    UnsupportedSnapshot,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidOrderSpec(_) => ErrorKind::InvalidOrderSpec,
            Self::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            Self::InsufficientMargin { .. } => ErrorKind::InsufficientMargin,
            Self::InsufficientPosition { .. } => ErrorKind::InsufficientPosition,
            Self::SymbolNotFound(_) => ErrorKind::SymbolNotFound,
            Self::DataGap { .. } => ErrorKind::DataGap,
            Self::Arithmetic(_) => ErrorKind::Arithmetic,
            Self::OrderNotFound(_) => ErrorKind::OrderNotFound,
            Self::OrderNotActive(..) => ErrorKind::OrderNotActive,
            Self::NonMonotonicTimestamps { .. } => ErrorKind::NonMonotonicTimestamps,
            Self::Valuation(_) => ErrorKind::Valuation,
            Self::UnsupportedSnapshot { .. } => ErrorKind::UnsupportedSnapshot,
        }
    }

    /// Whether a run can continue past this error (skip the order or bar).
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::NonMonotonicTimestamps { .. })
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidOrderSpec(msg.into())
    }
}

/// A failure reported as data: kind + human-readable context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&EngineError> for Failure {
    fn from(err: &EngineError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}
