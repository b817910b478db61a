//! Trigger evaluation: does an order trigger on a price snapshot, and at what level?
//!
//! Pure functions over an order and a `{open, high, low, close}` snapshot. The
//! returned price is the raw level before spread, slippage and commission.

use crate::config::GapPolicy;
use crate::domain::{Order, OrderKind, OrderSide, OrderStatus, PriceSnapshot};
use rust_decimal::Decimal;

/// Outcome of evaluating one order against one snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerResult {
    NoTrigger,
    /// Fill at `price`. `gap_through` is set when the snapshot opened beyond a stop.
    Fill { price: Decimal, gap_through: bool },
    /// Stop-limit whose stop traded but whose limit did not. Moves to Triggered.
    StopTriggered,
}

impl TriggerResult {
    pub fn fill_price(&self) -> Option<Decimal> {
        match self {
            Self::Fill { price, .. } => Some(*price),
            _ => None,
        }
    }
}

/// Evaluate `order` against `snapshot`. Terminal orders never trigger.
pub fn evaluate(order: &Order, snapshot: &PriceSnapshot, gap_policy: GapPolicy) -> TriggerResult {
    if !order.is_active() {
        return TriggerResult::NoTrigger;
    }
    match &order.kind {
        OrderKind::Market => TriggerResult::Fill {
            price: snapshot.open,
            gap_through: false,
        },
        OrderKind::Limit { limit_price } | OrderKind::TakeProfit { limit_price } => {
            check_limit(order.side, *limit_price, snapshot)
        }
        OrderKind::Stop { stop_price } | OrderKind::TrailingStop { stop_price, .. } => {
            check_stop(order.side, *stop_price, snapshot, gap_policy)
        }
        OrderKind::StopLimit {
            stop_price,
            limit_price,
        } => check_stop_limit(order, *stop_price, *limit_price, snapshot),
    }
}

/// Whether the stop level trades in the snapshot.
pub fn stop_crossed(side: OrderSide, stop: Decimal, snapshot: &PriceSnapshot) -> bool {
    match side {
        OrderSide::Buy => snapshot.high >= stop,
        OrderSide::Sell => snapshot.low <= stop,
    }
}

/// Whether the limit level trades in the snapshot.
pub fn limit_reached(side: OrderSide, limit: Decimal, snapshot: &PriceSnapshot) -> bool {
    match side {
        OrderSide::Buy => snapshot.low <= limit,
        OrderSide::Sell => snapshot.high >= limit,
    }
}

/// Limits fill at the limit itself, never at the bar extreme.
fn check_limit(side: OrderSide, limit: Decimal, snapshot: &PriceSnapshot) -> TriggerResult {
    if limit_reached(side, limit, snapshot) {
        TriggerResult::Fill {
            price: limit,
            gap_through: false,
        }
    } else {
        TriggerResult::NoTrigger
    }
}

fn check_stop(
    side: OrderSide,
    stop: Decimal,
    snapshot: &PriceSnapshot,
    gap_policy: GapPolicy,
) -> TriggerResult {
    if !stop_crossed(side, stop, snapshot) {
        return TriggerResult::NoTrigger;
    }
    let gap_through = match side {
        OrderSide::Buy => snapshot.open > stop,
        OrderSide::Sell => snapshot.open < stop,
    };
    let price = if gap_through {
        resolve_gap(side, snapshot.open, stop, gap_policy)
    } else {
        stop
    };
    TriggerResult::Fill { price, gap_through }
}

/// Two-stage: the stop arms the order, then the limit must trade. Both can
/// happen in one snapshot.
fn check_stop_limit(
    order: &Order,
    stop: Decimal,
    limit: Decimal,
    snapshot: &PriceSnapshot,
) -> TriggerResult {
    match order.status {
        OrderStatus::Pending => {
            if !stop_crossed(order.side, stop, snapshot) {
                return TriggerResult::NoTrigger;
            }
            match check_limit(order.side, limit, snapshot) {
                fill @ TriggerResult::Fill { .. } => fill,
                _ => TriggerResult::StopTriggered,
            }
        }
        OrderStatus::Triggered => check_limit(order.side, limit, snapshot),
        _ => TriggerResult::NoTrigger,
    }
}

/// Fill level for a stop the market opened through.
fn resolve_gap(side: OrderSide, open: Decimal, stop: Decimal, policy: GapPolicy) -> Decimal {
    match policy {
        GapPolicy::FillAtTrigger => stop,
        GapPolicy::FillAtOpen => open,
        GapPolicy::FillAtWorst => match side {
            OrderSide::Sell => open.min(stop),
            OrderSide::Buy => open.max(stop),
        },
    }
}
