//! Domain types: bars, instruments, orders, positions, the account ledger and trades.

pub mod account;
pub mod bar;
pub mod ids;
pub mod instrument;
pub mod order;
pub mod position;
pub mod trade;

pub use account::Account;
pub use bar::{Bar, PriceSnapshot};
pub use ids::{IdGen, OrderId, TradeId};
pub use instrument::{Instrument, OptionContract, OptionType, DEFAULT_CONTRACT_MULTIPLIER};
pub use order::{
    opens_position, Order, OrderAuditEntry, OrderKind, OrderKindTag, OrderRequest, OrderSide,
    OrderStatus, TimeInForce, TrailSpec,
};
pub use position::{Position, PositionBook, PositionSide};
pub use trade::{Trade, TradeJournal};
