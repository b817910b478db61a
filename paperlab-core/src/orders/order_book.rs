//! Order book state machine: order lifecycle, OCO links, brackets and the audit trail.
//!
//! The order book is the sole owner of order records. Everything else refers
//! to orders by id. It manages:
//! - Validation and id assignment on submission
//! - State transitions (Pending → Triggered → Filled / Cancelled / Expired)
//! - OCO enforcement (one fill or cancel takes its sibling with it)
//! - Bracket activation (exit legs activate only after the entry fills)
//! - Trailing-stop ratchets
//! - Audit trail for every state transition
//!
//! The order book does NOT compute fill prices or touch the ledger. That is
//! the execution engine's job.

use super::trailing;
use crate::domain::{
    IdGen, Instrument, Order, OrderAuditEntry, OrderId, OrderKind, OrderKindTag, OrderRequest,
    OrderStatus, TimeInForce,
};
use crate::error::EngineError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Ids assigned to a bracket submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BracketIds {
    pub entry: OrderId,
    pub stop_loss: OrderId,
    pub take_profit: Option<OrderId>,
}

/// Side effects of a fill on other orders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FillOutcome {
    /// OCO siblings cancelled by this fill.
    pub cancelled: Vec<OrderId>,
    /// Bracket legs activated by this fill.
    pub activated: Vec<OrderId>,
}

/// The order book.
///
/// Orders are kept in id order so every scan is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "OrderBookRecord", into = "OrderBookRecord")]
pub struct OrderBook {
    orders: BTreeMap<OrderId, Order>,
    /// OCO index: order id → sibling id, both directions.
    oco_links: BTreeMap<OrderId, OrderId>,
    /// Bracket entry id → legs waiting for the entry to fill.
    dormant: BTreeMap<OrderId, Vec<OrderId>>,
    ids: IdGen,
    audit_trail: Vec<OrderAuditEntry>,
}

/// Serialized form. The OCO and dormant indexes are rebuilt from the orders.
#[derive(Serialize, Deserialize)]
struct OrderBookRecord {
    last_order_id: u64,
    orders: Vec<Order>,
    audit_trail: Vec<OrderAuditEntry>,
}

impl From<OrderBook> for OrderBookRecord {
    fn from(book: OrderBook) -> Self {
        Self {
            last_order_id: book.ids.last_issued(),
            orders: book.orders.into_values().collect(),
            audit_trail: book.audit_trail,
        }
    }
}

impl From<OrderBookRecord> for OrderBook {
    fn from(record: OrderBookRecord) -> Self {
        let highest = record.orders.iter().map(|o| o.id.0).max().unwrap_or(0);
        let mut book = Self {
            orders: BTreeMap::new(),
            oco_links: BTreeMap::new(),
            dormant: BTreeMap::new(),
            ids: IdGen::starting_after(record.last_order_id.max(highest)),
            audit_trail: record.audit_trail,
        };
        for order in record.orders {
            if order.is_active() {
                if let Some(sibling) = order.linked_order_id {
                    book.oco_links.insert(order.id, sibling);
                }
                if let (Some(parent), None) = (order.parent_id, order.activated_at) {
                    book.dormant.entry(parent).or_default().push(order.id);
                }
            }
            book.orders.insert(order.id, order);
        }
        book
    }
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Submission ─────────────────────────────────────────────────────

    /// Validate and place a standalone order. Returns its id.
    pub fn submit(
        &mut self,
        req: OrderRequest,
        now: DateTime<Utc>,
        reference_price: Option<Decimal>,
    ) -> Result<OrderId, EngineError> {
        let kind = validate_request(&req, reference_price)?;
        let id = self.ids.next_order_id();
        self.insert(build_order(id, req, kind, now, Some(now)), "submitted");
        Ok(id)
    }

    /// Place two orders as a one-cancels-other pair. Both are validated first;
    /// if either is malformed neither enters the book.
    pub fn submit_oco(
        &mut self,
        first: OrderRequest,
        second: OrderRequest,
        now: DateTime<Utc>,
        reference_price: Option<Decimal>,
    ) -> Result<(OrderId, OrderId), EngineError> {
        if first.symbol != second.symbol {
            return Err(EngineError::invalid(format!(
                "OCO legs must share a symbol ({} vs {})",
                first.symbol, second.symbol
            )));
        }
        let first_kind = validate_request(&first, reference_price)?;
        let second_kind = validate_request(&second, reference_price)?;

        let a = self.ids.next_order_id();
        let b = self.ids.next_order_id();
        let mut first_order = build_order(a, first, first_kind, now, Some(now));
        let mut second_order = build_order(b, second, second_kind, now, Some(now));
        first_order.linked_order_id = Some(b);
        second_order.linked_order_id = Some(a);
        self.insert(first_order, "submitted (OCO)");
        self.insert(second_order, "submitted (OCO)");
        self.link(a, b);
        Ok((a, b))
    }

    /// Place an entry with protective exit legs.
    ///
    /// The legs stay dormant until the entry fills, then activate as an OCO
    /// pair. Cancelling or expiring the entry cancels the dormant legs.
    pub fn submit_bracket(
        &mut self,
        entry: OrderRequest,
        stop_loss: OrderRequest,
        take_profit: Option<OrderRequest>,
        now: DateTime<Utc>,
        reference_price: Option<Decimal>,
    ) -> Result<BracketIds, EngineError> {
        let entry_kind = validate_request(&entry, reference_price)?;
        // Legs are checked against where the entry expects to fill.
        let leg_reference = match &entry_kind {
            OrderKind::Limit { limit_price } => Some(*limit_price),
            OrderKind::Stop { stop_price } | OrderKind::StopLimit { stop_price, .. } => {
                Some(*stop_price)
            }
            _ => reference_price,
        };
        check_leg(&entry, &stop_loss, "stop-loss")?;
        if !matches!(
            stop_loss.kind,
            OrderKindTag::Stop | OrderKindTag::StopLimit | OrderKindTag::TrailingStop
        ) {
            return Err(EngineError::invalid("bracket stop-loss leg must be a stop or trailing stop"));
        }
        let stop_kind = validate_request(&stop_loss, leg_reference)?;
        let take_kind = match &take_profit {
            Some(tp) => {
                check_leg(&entry, tp, "take-profit")?;
                Some(validate_request(tp, leg_reference)?)
            }
            None => None,
        };

        let entry_id = self.ids.next_order_id();
        let stop_id = self.ids.next_order_id();
        let take_id = take_kind.as_ref().map(|_| self.ids.next_order_id());

        self.insert(build_order(entry_id, entry, entry_kind, now, Some(now)), "submitted (bracket entry)");

        let mut stop_order = build_order(stop_id, stop_loss, stop_kind, now, None);
        stop_order.parent_id = Some(entry_id);
        stop_order.linked_order_id = take_id;
        self.insert(stop_order, "submitted dormant (bracket stop-loss)");
        let mut legs = vec![stop_id];

        if let (Some(tp), Some(kind), Some(tp_id)) = (take_profit, take_kind, take_id) {
            let mut tp_order = build_order(tp_id, tp, kind, now, None);
            tp_order.parent_id = Some(entry_id);
            tp_order.linked_order_id = Some(stop_id);
            self.insert(tp_order, "submitted dormant (bracket take-profit)");
            self.link(stop_id, tp_id);
            legs.push(tp_id);
        }
        self.dormant.insert(entry_id, legs);

        Ok(BracketIds {
            entry: entry_id,
            stop_loss: stop_id,
            take_profit: take_id,
        })
    }

    // ── Transitions ────────────────────────────────────────────────────

    /// Cancel an active order. Its active OCO sibling and any dormant bracket
    /// legs are cancelled with it. Returns every order cancelled.
    pub fn cancel(
        &mut self,
        order_id: OrderId,
        now: DateTime<Utc>,
        reason: &str,
    ) -> Result<Vec<OrderId>, EngineError> {
        self.require_active(order_id)?;
        let mut cancelled = vec![order_id];
        self.transition(order_id, cancelled_status(reason), now, reason);

        if let Some(sibling) = self.unlink(order_id) {
            if self.is_active(sibling) {
                self.transition(sibling, cancelled_status("OCO sibling cancelled"), now, "OCO sibling cancelled");
                cancelled.push(sibling);
            }
        }
        cancelled.extend(self.cancel_dormant_legs(order_id, now, "bracket entry cancelled"));
        Ok(cancelled)
    }

    /// Arm a stop-limit whose stop traded: Pending → Triggered.
    pub fn mark_triggered(&mut self, order_id: OrderId, now: DateTime<Utc>) -> Result<(), EngineError> {
        let order = self.require_active(order_id)?;
        if order.status != OrderStatus::Pending {
            return Err(EngineError::OrderNotActive(order_id, order.status.label().to_string()));
        }
        self.transition(order_id, OrderStatus::Triggered, now, "stop level traded");
        Ok(())
    }

    /// Record a complete fill. Cancels the OCO sibling and activates dormant
    /// bracket legs in the same step.
    ///
    /// Trailing legs are reseeded at `price`. Use
    /// [`OrderBook::mark_filled_at_market`] when the fill price carries costs.
    pub fn mark_filled(
        &mut self,
        order_id: OrderId,
        price: Decimal,
        now: DateTime<Utc>,
    ) -> Result<FillOutcome, EngineError> {
        self.mark_filled_at_market(order_id, price, price, now)
    }

    /// Record a fill at `fill_price` whose market reference was
    /// `market_price`. Trailing legs are reseeded at the market price, so
    /// their trail distance does not absorb spread or slippage.
    pub fn mark_filled_at_market(
        &mut self,
        order_id: OrderId,
        fill_price: Decimal,
        market_price: Decimal,
        now: DateTime<Utc>,
    ) -> Result<FillOutcome, EngineError> {
        let order = self.require_active(order_id)?;
        if !order.is_working() {
            return Err(EngineError::OrderNotActive(order_id, "dormant".to_string()));
        }
        self.transition(order_id, OrderStatus::Filled, now, "filled");
        if let Some(order) = self.orders.get_mut(&order_id) {
            order.filled_at = Some(now);
            order.fill_price = Some(fill_price);
        }

        let mut outcome = FillOutcome::default();
        if let Some(sibling) = self.unlink(order_id) {
            if self.is_active(sibling) {
                self.transition(sibling, cancelled_status("OCO sibling filled"), now, "OCO sibling filled");
                outcome.cancelled.push(sibling);
            }
        }

        if let Some(legs) = self.dormant.remove(&order_id) {
            for leg_id in legs {
                let Some(leg) = self.orders.get_mut(&leg_id) else {
                    continue;
                };
                if !leg.is_active() {
                    continue;
                }
                leg.activated_at = Some(now);
                trailing::reseed(&mut leg.kind, leg.side, market_price)?;
                self.record_audit(leg_id, Some(OrderStatus::Pending), OrderStatus::Pending, now, "bracket entry filled, leg activated");
                outcome.activated.push(leg_id);
            }
        }
        debug!(order = %order_id, price = %fill_price, ?outcome, "order filled");
        Ok(outcome)
    }

    /// Ratchet a trailing stop toward `current_price`. Returns the new stop
    /// level when it moved.
    pub fn update_trailing(
        &mut self,
        order_id: OrderId,
        current_price: Decimal,
    ) -> Result<Option<Decimal>, EngineError> {
        self.require_active(order_id)?;
        let order = self
            .orders
            .get_mut(&order_id)
            .ok_or(EngineError::OrderNotFound(order_id))?;
        if !matches!(order.kind, OrderKind::TrailingStop { .. }) {
            return Err(EngineError::invalid(format!("order {order_id} is not a trailing stop")));
        }
        let moved = trailing::ratchet(&mut order.kind, order.side, current_price)?;
        if let Some(stop) = moved {
            debug!(order = %order_id, %stop, "trailing stop ratcheted");
        }
        Ok(moved)
    }

    /// Expire every active day order at session end. Dormant legs of an
    /// expired entry are cancelled. Returns the expired ids.
    pub fn expire_day_orders(&mut self, now: DateTime<Utc>) -> Vec<OrderId> {
        let expiring: Vec<OrderId> = self
            .orders
            .values()
            .filter(|o| o.is_active() && o.time_in_force == TimeInForce::Day)
            .map(|o| o.id)
            .collect();
        for &id in &expiring {
            if !self.is_active(id) {
                continue;
            }
            self.transition(id, OrderStatus::Expired, now, "session end");
            self.unlink(id);
            self.cancel_dormant_legs(id, now, "bracket entry expired");
        }
        expiring
    }

    // ── Queries ────────────────────────────────────────────────────────

    pub fn get(&self, id: OrderId) -> Option<&Order> {
        self.orders.get(&id)
    }

    /// Every order ever submitted, in id order.
    pub fn orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.values()
    }

    /// Pending or Triggered orders, including dormant bracket legs.
    pub fn active_orders(&self) -> Vec<&Order> {
        self.orders.values().filter(|o| o.is_active()).collect()
    }

    /// Orders eligible to trigger on a price event for `symbol`.
    pub fn working_orders_for(&self, symbol: &str) -> Vec<&Order> {
        self.orders
            .values()
            .filter(|o| o.is_working() && o.symbol == symbol)
            .collect()
    }

    pub fn has_active_orders(&self) -> bool {
        self.orders.values().any(|o| o.is_active())
    }

    pub fn sibling(&self, id: OrderId) -> Option<OrderId> {
        self.oco_links.get(&id).copied()
    }

    pub fn is_dormant(&self, id: OrderId) -> bool {
        self.dormant.values().any(|legs| legs.contains(&id))
    }

    pub fn audit_trail(&self) -> &[OrderAuditEntry] {
        &self.audit_trail
    }

    // ── Internal helpers ───────────────────────────────────────────────

    fn insert(&mut self, order: Order, reason: &str) {
        let (id, at, status) = (order.id, order.created_at, order.status.clone());
        self.orders.insert(id, order);
        self.record_audit(id, None, status, at, reason);
    }

    fn link(&mut self, a: OrderId, b: OrderId) {
        self.oco_links.insert(a, b);
        self.oco_links.insert(b, a);
    }

    /// Drop both directions of an OCO link, returning the sibling.
    fn unlink(&mut self, id: OrderId) -> Option<OrderId> {
        let sibling = self.oco_links.remove(&id)?;
        self.oco_links.remove(&sibling);
        Some(sibling)
    }

    fn is_active(&self, id: OrderId) -> bool {
        self.orders.get(&id).is_some_and(Order::is_active)
    }

    fn require_active(&self, id: OrderId) -> Result<&Order, EngineError> {
        let order = self.orders.get(&id).ok_or(EngineError::OrderNotFound(id))?;
        if !order.is_active() {
            return Err(EngineError::OrderNotActive(id, order.status.label().to_string()));
        }
        Ok(order)
    }

    fn cancel_dormant_legs(&mut self, entry_id: OrderId, now: DateTime<Utc>, reason: &str) -> Vec<OrderId> {
        let mut cancelled = Vec::new();
        for leg in self.dormant.remove(&entry_id).unwrap_or_default() {
            if self.is_active(leg) {
                self.unlink(leg);
                self.transition(leg, cancelled_status(reason), now, reason);
                cancelled.push(leg);
            }
        }
        cancelled
    }

    fn transition(&mut self, id: OrderId, to: OrderStatus, at: DateTime<Utc>, reason: &str) {
        let Some(order) = self.orders.get_mut(&id) else {
            return;
        };
        let from = std::mem::replace(&mut order.status, to.clone());
        self.record_audit(id, Some(from), to, at, reason);
    }

    fn record_audit(
        &mut self,
        order_id: OrderId,
        from: Option<OrderStatus>,
        to: OrderStatus,
        at: DateTime<Utc>,
        reason: &str,
    ) {
        self.audit_trail.push(OrderAuditEntry {
            order_id,
            at,
            from,
            to,
            reason: reason.to_string(),
        });
    }
}

fn cancelled_status(reason: &str) -> OrderStatus {
    OrderStatus::Cancelled {
        reason: reason.to_string(),
    }
}

/// Structural validation shared by every submission path.
fn validate_request(req: &OrderRequest, reference_price: Option<Decimal>) -> Result<OrderKind, EngineError> {
    if req.symbol.trim().is_empty() {
        return Err(EngineError::invalid("symbol must not be empty"));
    }
    if req.quantity <= Decimal::ZERO {
        return Err(EngineError::invalid(format!(
            "quantity must be positive, got {}",
            req.quantity
        )));
    }
    if let Instrument::Option(contract) = &req.instrument {
        if contract.underlying != req.symbol {
            return Err(EngineError::invalid(format!(
                "option order symbol {} must be the contract underlying {}",
                req.symbol, contract.underlying
            )));
        }
        if contract.strike <= Decimal::ZERO || contract.multiplier <= Decimal::ZERO {
            return Err(EngineError::invalid("option strike and multiplier must be positive"));
        }
    }
    OrderKind::from_request(req, reference_price)
}

/// Bracket legs close what the entry opens: same symbol and book, opposite side.
fn check_leg(entry: &OrderRequest, leg: &OrderRequest, name: &str) -> Result<(), EngineError> {
    if leg.symbol != entry.symbol || leg.position_side != entry.position_side {
        return Err(EngineError::invalid(format!(
            "bracket {name} must act on the entry's symbol and position side"
        )));
    }
    if leg.side != entry.side.opposite() {
        return Err(EngineError::invalid(format!(
            "bracket {name} must be on the opposite side of the entry"
        )));
    }
    if !entry.opens_position() {
        return Err(EngineError::invalid("bracket entry must open a position"));
    }
    Ok(())
}

fn build_order(
    id: OrderId,
    req: OrderRequest,
    kind: OrderKind,
    now: DateTime<Utc>,
    activated_at: Option<DateTime<Utc>>,
) -> Order {
    Order {
        id,
        symbol: req.symbol,
        side: req.side,
        position_side: req.position_side,
        kind,
        quantity: req.quantity,
        time_in_force: req.time_in_force,
        instrument: req.instrument,
        status: OrderStatus::Pending,
        linked_order_id: None,
        parent_id: None,
        created_at: now,
        activated_at,
        filled_at: None,
        fill_price: None,
        note: req.note,
        tags: req.tags,
    }
}
