//! Order management: the order book state machine, trigger evaluation and trailing-stop ratchets.

pub mod order_book;
pub mod trailing;
pub mod trigger;

pub use order_book::{BracketIds, FillOutcome, OrderBook};
pub use trigger::{evaluate, TriggerResult};
