//! Single-owner trading session: the explicit aggregate of account, positions,
//! orders and journal that one timeline of price events drives.

use super::execution::ExecutionEngine;
use super::ledger::LocalLedger;
use super::report::{goal_breaches, margin_call, EngineWarning, EventReport};
use crate::config::EngineConfig;
use crate::domain::{
    Account, Instrument, Order, OrderId, OrderRequest, PositionBook, PriceSnapshot, Trade, TradeJournal,
};
use crate::error::{EngineError, Failure};
use crate::orders::{BracketIds, OrderBook};
use crate::valuation::{premium_at, OptionValuation};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Current [`SessionSnapshot`] layout.
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// Serializable session state for external save/restore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub schema_version: u32,
    pub config: EngineConfig,
    pub account: Account,
    pub positions: PositionBook,
    pub orders: OrderBook,
    pub journal: TradeJournal,
    pub last_prices: BTreeMap<String, Decimal>,
}

#[derive(Debug)]
pub struct TradingSession {
    config: EngineConfig,
    account: Account,
    positions: PositionBook,
    orders: OrderBook,
    journal: TradeJournal,
    engine: ExecutionEngine,
    last_prices: BTreeMap<String, Decimal>,
}

impl TradingSession {
    /// Start a session with `initial_capital` in cash. `seed` drives slippage.
    pub fn new(config: EngineConfig, initial_capital: Decimal, seed: u64) -> Result<Self, EngineError> {
        config.validate()?;
        if initial_capital < Decimal::ZERO {
            return Err(EngineError::invalid(format!("negative initial capital {initial_capital}")));
        }
        info!(%initial_capital, seed, "trading session started");
        Ok(Self {
            engine: ExecutionEngine::new(config.clone(), seed),
            config,
            account: Account::new(initial_capital),
            positions: PositionBook::new(),
            orders: OrderBook::new(),
            journal: TradeJournal::new(),
            last_prices: BTreeMap::new(),
        })
    }

    pub fn with_valuation(mut self, valuation: Arc<dyn OptionValuation>) -> Self {
        self.engine = self.engine.with_valuation(valuation);
        self
    }

    // ── Orders ─────────────────────────────────────────────────────────

    pub fn submit(&mut self, req: OrderRequest, at: DateTime<Utc>) -> Result<OrderId, EngineError> {
        let reference = self.reference_price(&req, at)?;
        self.orders.submit(req, at, reference)
    }

    pub fn submit_oco(
        &mut self,
        first: OrderRequest,
        second: OrderRequest,
        at: DateTime<Utc>,
    ) -> Result<(OrderId, OrderId), EngineError> {
        let reference = self.reference_price(&first, at)?;
        self.orders.submit_oco(first, second, at, reference)
    }

    pub fn submit_bracket(
        &mut self,
        entry: OrderRequest,
        stop_loss: OrderRequest,
        take_profit: Option<OrderRequest>,
        at: DateTime<Utc>,
    ) -> Result<BracketIds, EngineError> {
        let reference = self.reference_price(&entry, at)?;
        self.orders.submit_bracket(entry, stop_loss, take_profit, at, reference)
    }

    /// Cancel an order (and its OCO sibling / dormant legs).
    pub fn cancel(&mut self, order_id: OrderId, at: DateTime<Utc>) -> Result<Vec<OrderId>, EngineError> {
        self.orders.cancel(order_id, at, "cancelled by user")
    }

    pub fn update_trailing(&mut self, order_id: OrderId, price: Decimal) -> Result<Option<Decimal>, EngineError> {
        self.orders.update_trailing(order_id, price)
    }

    /// Price used to validate stop placement and seed trailing stops.
    fn reference_price(&self, req: &OrderRequest, at: DateTime<Utc>) -> Result<Option<Decimal>, EngineError> {
        let Some(last) = self.last_prices.get(&req.symbol).copied() else {
            return Ok(None);
        };
        match &req.instrument {
            Instrument::Equity => Ok(Some(last)),
            Instrument::Option(contract) => premium_at(self.engine.valuation(), contract, last, at).map(Some),
        }
    }

    // ── Price events ───────────────────────────────────────────────────

    /// Record `price` as the latest known price for `symbol` without
    /// evaluating orders.
    pub fn observe_price(&mut self, symbol: &str, price: Decimal) {
        self.last_prices.insert(symbol.to_string(), price);
    }

    /// Process one tick or bar: fill triggered orders, ratchet trailing
    /// stops, mark positions at the close and report warnings.
    pub fn on_price(
        &mut self,
        symbol: &str,
        snapshot: &PriceSnapshot,
        at: DateTime<Utc>,
    ) -> Result<EventReport, EngineError> {
        check_snapshot(symbol, snapshot, at)?;
        let mut report = self.process_where(symbol, snapshot, at, |_| true);
        report.errors.extend(self.ratchet(symbol, snapshot, at));
        report.errors.extend(self.mark(symbol, snapshot.close, at));
        let warnings = self.warnings_for(&report)?;
        report.warnings.extend(warnings);
        Ok(report)
    }

    /// Evaluate the working orders on `symbol` selected by `filter` without
    /// ratcheting, marking or warning checks.
    pub fn process_where<F>(
        &mut self,
        symbol: &str,
        snapshot: &PriceSnapshot,
        at: DateTime<Utc>,
        filter: F,
    ) -> EventReport
    where
        F: Fn(&Order) -> bool,
    {
        let mut ledger = LocalLedger::new(&mut self.account, &mut self.journal);
        self.engine.process_event_where(
            &mut self.orders,
            &mut self.positions,
            &mut ledger,
            symbol,
            snapshot,
            at,
            filter,
        )
    }

    pub fn ratchet(&mut self, symbol: &str, snapshot: &PriceSnapshot, at: DateTime<Utc>) -> Vec<Failure> {
        self.engine.ratchet_trailing(&mut self.orders, symbol, snapshot, at)
    }

    /// Mark positions fed by `symbol` at `price` and remember it as the last price.
    pub fn mark(&mut self, symbol: &str, price: Decimal, at: DateTime<Utc>) -> Vec<Failure> {
        self.observe_price(symbol, price);
        self.engine.mark_positions(&mut self.positions, symbol, price, at)
    }

    /// Margin-call and discipline-goal warnings triggered by the fills in `report`.
    pub fn warnings_for(&self, report: &EventReport) -> Result<Vec<EngineWarning>, EngineError> {
        let mut warnings = Vec::new();
        if report.touched_short() {
            let equity = self.equity()?;
            if let Some(w) = margin_call(&self.config, equity, self.account.margin_reserved)? {
                warnings.push(w);
            }
        }
        if !report.fills.is_empty() {
            warnings.extend(goal_breaches(&self.config.goals, &self.journal, &report.fills)?);
        }
        Ok(warnings)
    }

    /// Expire day orders at the end of a trading session.
    pub fn end_session(&mut self, at: DateTime<Utc>) -> EventReport {
        let expired = self.orders.expire_day_orders(at);
        if !expired.is_empty() {
            debug!(count = expired.len(), "day orders expired");
        }
        EventReport {
            expired,
            ..EventReport::default()
        }
    }

    // ── State ──────────────────────────────────────────────────────────

    pub fn equity(&self) -> Result<Decimal, EngineError> {
        Ok(self.account.equity(&self.positions)?)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn positions(&self) -> &PositionBook {
        &self.positions
    }

    pub fn orders(&self) -> &OrderBook {
        &self.orders
    }

    pub fn journal(&self) -> &TradeJournal {
        &self.journal
    }

    pub fn trades(&self) -> &[Trade] {
        self.journal.trades()
    }

    pub fn last_price(&self, symbol: &str) -> Option<Decimal> {
        self.last_prices.get(symbol).copied()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            config: self.config.clone(),
            account: self.account.clone(),
            positions: self.positions.clone(),
            orders: self.orders.clone(),
            journal: self.journal.clone(),
            last_prices: self.last_prices.clone(),
        }
    }

    /// Rebuild a session from a snapshot. The slippage stream restarts from
    /// `seed`; generator state is not part of the snapshot.
    pub fn restore(snapshot: SessionSnapshot, seed: u64) -> Result<Self, EngineError> {
        if snapshot.schema_version != SNAPSHOT_SCHEMA_VERSION {
            return Err(EngineError::UnsupportedSnapshot {
                found: snapshot.schema_version,
                expected: SNAPSHOT_SCHEMA_VERSION,
            });
        }
        snapshot.config.validate()?;
        Ok(Self {
            engine: ExecutionEngine::new(snapshot.config.clone(), seed),
            config: snapshot.config,
            account: snapshot.account,
            positions: snapshot.positions,
            orders: snapshot.orders,
            journal: snapshot.journal,
            last_prices: snapshot.last_prices,
        })
    }
}

/// Reject a snapshot whose prices cannot describe one trading interval.
pub(crate) fn check_snapshot(symbol: &str, s: &PriceSnapshot, at: DateTime<Utc>) -> Result<(), EngineError> {
    let consistent = s.low > Decimal::ZERO
        && s.high >= s.low
        && (s.low..=s.high).contains(&s.open)
        && (s.low..=s.high).contains(&s.close);
    if consistent {
        return Ok(());
    }
    Err(EngineError::DataGap {
        symbol: symbol.to_string(),
        at,
        reason: format!(
            "inconsistent prices (open={}, high={}, low={}, close={})",
            s.open, s.high, s.low, s.close
        ),
    })
}
