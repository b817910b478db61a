//! Path policy: the order in which working orders are evaluated on one price event.
//!
//! When a bar's range covers both a stop-loss and a take-profit, OHLC cannot
//! say which traded first. The policy decides which order gets evaluated
//! first; once it fills, its OCO sibling is cancelled before its turn comes.

use crate::config::PathPolicy;
use crate::domain::{Order, OrderId, OrderKind, PriceSnapshot};
use rust_decimal::Decimal;
use std::cmp::Ordering;

/// Evaluation sequence for `orders` on `snapshot`.
///
/// Market orders always come first: they trade at the open, before any
/// intrabar movement.
pub fn evaluation_sequence(orders: &[&Order], policy: PathPolicy, snapshot: &PriceSnapshot) -> Vec<OrderId> {
    let (market, resting): (Vec<&Order>, Vec<&Order>) = orders
        .iter()
        .copied()
        .partition(|o| matches!(o.kind, OrderKind::Market));

    let mut sequence: Vec<OrderId> = market.iter().map(|o| o.id).collect();
    let rest = match policy {
        PathPolicy::WorstCase => adverse_first(&resting, true),
        PathPolicy::BestCase => adverse_first(&resting, false),
        PathPolicy::Deterministic => path_order(&resting, snapshot),
    };
    sequence.extend(rest);
    sequence
}

/// Stop-style orders fill at a loss (or a worse entry). Limits and
/// take-profits fill at a gain (or a better entry).
pub fn is_adverse(order: &Order) -> bool {
    order.kind.is_stop_like()
}

fn adverse_first(orders: &[&Order], adverse_leads: bool) -> Vec<OrderId> {
    let (adverse, favorable): (Vec<&Order>, Vec<&Order>) =
        orders.iter().copied().partition(|o| is_adverse(o));
    let (lead, tail) = if adverse_leads {
        (adverse, favorable)
    } else {
        (favorable, adverse)
    };
    lead.iter().chain(tail.iter()).map(|o| o.id).collect()
}

/// Infer the intrabar path: if the open is nearer the high, assume
/// Open → High → Low → Close, otherwise Open → Low → High → Close. Orders are
/// sorted by when the path reaches their trigger level.
fn path_order(orders: &[&Order], snapshot: &PriceSnapshot) -> Vec<OrderId> {
    let open = snapshot.open;
    let high_first = (snapshot.high - open).abs() <= (open - snapshot.low).abs();

    let mut with_levels: Vec<(OrderId, Decimal)> = orders
        .iter()
        .map(|o| (o.id, o.trigger_level().unwrap_or(open)))
        .collect();

    with_levels.sort_by(|a, b| {
        let a_up = a.1 >= open;
        let b_up = b.1 >= open;
        let up_first = if high_first { Ordering::Less } else { Ordering::Greater };
        match (a_up, b_up) {
            (true, false) => up_first,
            (false, true) => up_first.reverse(),
            // Reached on the way up: lower level first.
            (true, true) => a.1.cmp(&b.1),
            // Reached on the way down: higher level first.
            (false, false) => b.1.cmp(&a.1),
        }
        .then(a.0.cmp(&b.0))
    });

    with_levels.into_iter().map(|(id, _)| id).collect()
}
