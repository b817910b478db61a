//! Trade records and the append-only trade journal.

use super::ids::{OrderId, TradeId};
use super::order::OrderSide;
use super::position::PositionSide;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One fill. Immutable once appended to the journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: TradeId,
    pub order_id: OrderId,
    pub symbol: String,
    pub side: OrderSide,
    pub position_side: PositionSide,
    pub quantity: Decimal,
    /// Executed price after spread and slippage.
    pub price: Decimal,
    /// Trigger or reference price before costs.
    pub reference_price: Decimal,
    pub commission: Decimal,
    /// Per-unit slippage moved against the trader (excludes spread).
    pub slippage_applied: Decimal,
    /// Per-unit half-spread paid.
    pub spread_applied: Decimal,
    /// P&L realized by this fill, net of commissions. Zero for opening fills.
    pub realized_pnl: Decimal,
    pub opens_position: bool,
    pub timestamp: DateTime<Utc>,
    pub note: String,
    pub tags: Vec<String>,
}

/// Append-only fill ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeJournal {
    trades: Vec<Trade>,
}

impl TradeJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id the next appended trade will receive.
    pub fn next_id(&self) -> TradeId {
        TradeId(self.trades.len() as u64 + 1)
    }

    /// Append a trade, stamping its sequence id.
    pub fn append(&mut self, mut trade: Trade) -> TradeId {
        let id = self.next_id();
        trade.id = id;
        self.trades.push(trade);
        id
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn len(&self) -> usize {
        self.trades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }

    pub fn last(&self) -> Option<&Trade> {
        self.trades.last()
    }

    /// Fills that reduced or closed a position.
    pub fn closing_trades(&self) -> impl Iterator<Item = &Trade> {
        self.trades.iter().filter(|t| !t.opens_position)
    }

    pub fn for_symbol<'a>(&'a self, symbol: &'a str) -> impl Iterator<Item = &'a Trade> + 'a {
        self.trades.iter().filter(move |t| t.symbol == symbol)
    }
}
