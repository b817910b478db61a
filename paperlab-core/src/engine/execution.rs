//! Execution engine: turns triggered orders into fills and ledger mutations.
//!
//! The engine carries configuration, the cost model, an injected seeded RNG
//! for slippage and the option valuation seam. All mutable trading state
//! (order book, positions, account, journal) is borrowed per call.
//!
//! Fills are all-or-nothing: [`ExecutionEngine::plan_fill`] computes the
//! complete post-fill state and checks every constraint before
//! [`FillPlan::commit`] touches anything.

use super::cost_model::CostModel;
use super::ledger::Ledger;
use super::path_policy::evaluation_sequence;
use super::report::EventReport;
use crate::config::EngineConfig;
use crate::decimal::MoneyExt;
use crate::domain::account::LedgerDelta;
use crate::domain::{
    Account, Instrument, Order, OrderId, OrderKind, OrderSide, Position, PositionBook, PositionSide,
    PriceSnapshot, Trade, TradeId, TradeJournal,
};
use crate::error::{EngineError, Failure};
use crate::orders::{evaluate, OrderBook, TriggerResult};
use crate::valuation::{premium_at, premium_snapshot, IntrinsicValuation, OptionValuation};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Book symbol an order's fill lands on: the contract symbol for options.
pub fn position_symbol(order: &Order) -> String {
    match &order.instrument {
        Instrument::Option(contract) => contract.symbol(),
        Instrument::Equity => order.symbol.clone(),
    }
}

/// A fully computed fill, not yet applied.
#[derive(Debug, Clone, PartialEq)]
pub struct FillPlan {
    position_symbol: String,
    position_side: PositionSide,
    position_after: Option<Position>,
    delta: LedgerDelta,
    trade: Trade,
}

impl FillPlan {
    pub fn trade(&self) -> &Trade {
        &self.trade
    }

    /// Apply the plan. Infallible: every check ran while planning.
    pub fn commit(self, account: &mut Account, positions: &mut PositionBook, journal: &mut TradeJournal) -> Trade {
        account.apply(&self.delta);
        positions.set(&self.position_symbol, self.position_side, self.position_after);
        let mut trade = self.trade;
        trade.id = journal.append(trade.clone());
        trade
    }
}

/// Trigger decisions for one price event, not yet committed.
#[derive(Debug, Clone, Default)]
pub struct PreparedEvent {
    steps: Vec<(OrderId, TriggerResult)>,
    report: EventReport,
}

/// The execution engine.
pub struct ExecutionEngine {
    config: EngineConfig,
    costs: CostModel,
    rng: StdRng,
    valuation: Arc<dyn OptionValuation>,
}

impl fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("config", &self.config)
            .field("costs", &self.costs)
            .finish_non_exhaustive()
    }
}

impl ExecutionEngine {
    /// Engine with slippage drawn from `StdRng::seed_from_u64(seed)`.
    pub fn new(config: EngineConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    pub fn with_rng(config: EngineConfig, rng: StdRng) -> Self {
        let costs = CostModel::from_config(&config);
        Self {
            config,
            costs,
            rng,
            valuation: Arc::new(IntrinsicValuation),
        }
    }

    /// Replace the option valuation function.
    pub fn with_valuation(mut self, valuation: Arc<dyn OptionValuation>) -> Self {
        self.valuation = valuation;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn valuation(&self) -> &dyn OptionValuation {
        self.valuation.as_ref()
    }

    // ── Single fills ───────────────────────────────────────────────────

    /// Fill `order` completely at `reference_price` plus costs.
    ///
    /// On error nothing is mutated. Does not touch the order book; callers
    /// mark the order filled.
    pub fn execute(
        &mut self,
        order: &Order,
        reference_price: Decimal,
        at: DateTime<Utc>,
        account: &mut Account,
        positions: &mut PositionBook,
        journal: &mut TradeJournal,
    ) -> Result<Trade, EngineError> {
        let plan = self.plan_fill(order, reference_price, at, account, positions)?;
        let trade = plan.commit(account, positions, journal);
        debug!(
            order = %order.id,
            symbol = %trade.symbol,
            side = ?trade.side,
            quantity = %trade.quantity,
            price = %trade.price,
            commission = %trade.commission,
            "fill"
        );
        Ok(trade)
    }

    /// Compute a fill without applying it.
    pub fn plan_fill(
        &mut self,
        order: &Order,
        reference_price: Decimal,
        at: DateTime<Utc>,
        account: &Account,
        positions: &PositionBook,
    ) -> Result<FillPlan, EngineError> {
        if reference_price <= Decimal::ZERO {
            return Err(EngineError::invalid(format!(
                "non-positive reference price {reference_price} for {}",
                order.id
            )));
        }
        let slippage_rate = self.costs.draw_slippage(&mut self.rng)?;
        let adjusted = self.costs.adjust(reference_price, order.side, slippage_rate)?;
        let price = adjusted.price;
        let units = order.quantity.try_mul(order.instrument.multiplier())?;
        let notional = units.try_mul(price)?;
        let commission = self.costs.commission(notional)?;

        let symbol = position_symbol(order);
        let existing = positions.get(&symbol, order.position_side);
        let fill = FillEconomics {
            price,
            units,
            notional,
            commission,
        };

        let step = if order.opens_position() {
            self.plan_open(order, &symbol, existing, &fill, account.cash, at)?
        } else {
            plan_close(order, &symbol, existing, &fill, account.cash)?
        };

        let delta = LedgerDelta {
            cash_after: step.cash_after,
            realized_after: account.realized_pnl.try_add(step.realized)?,
            commissions_after: account.commissions_paid.try_add(commission)?,
            margin_after: account.margin_reserved.try_add(step.margin_delta)?,
        };

        let trade = Trade {
            id: TradeId(0),
            order_id: order.id,
            symbol: symbol.clone(),
            side: order.side,
            position_side: order.position_side,
            quantity: order.quantity,
            price,
            reference_price,
            commission,
            slippage_applied: adjusted.slippage_per_unit,
            spread_applied: adjusted.spread_per_unit,
            realized_pnl: step.realized,
            opens_position: order.opens_position(),
            timestamp: at,
            note: order.note.clone(),
            tags: order.tags.clone(),
        };

        Ok(FillPlan {
            position_symbol: symbol,
            position_side: order.position_side,
            position_after: step.position_after,
            delta,
            trade,
        })
    }

    fn plan_open(
        &self,
        order: &Order,
        symbol: &str,
        existing: Option<&Position>,
        fill: &FillEconomics,
        cash: Decimal,
        at: DateTime<Utc>,
    ) -> Result<PlanStep, EngineError> {
        let reserve = match order.position_side {
            PositionSide::Long => Decimal::ZERO,
            PositionSide::Short => fill.notional.try_mul(self.config.short_margin_multiple)?,
        };
        let required = match order.position_side {
            PositionSide::Long => fill.notional.try_add(fill.commission)?,
            PositionSide::Short => reserve.try_add(fill.commission)?,
        };
        if cash < required {
            return Err(match order.position_side {
                PositionSide::Long => EngineError::InsufficientFunds {
                    required,
                    available: cash,
                },
                PositionSide::Short => EngineError::InsufficientMargin {
                    required,
                    available: cash,
                },
            });
        }

        let position_after = match existing {
            Some(p) => {
                let quantity = p.quantity.try_add(order.quantity)?;
                let cost = p
                    .average_cost
                    .try_mul(p.quantity)?
                    .try_add(fill.price.try_mul(order.quantity)?)?;
                Position {
                    quantity,
                    average_cost: cost.try_div(quantity)?,
                    margin_reserved: p.margin_reserved.try_add(reserve)?,
                    open_commission: p.open_commission.try_add(fill.commission)?,
                    last_mark: fill.price,
                    ..p.clone()
                }
            }
            None => Position {
                symbol: symbol.to_string(),
                side: order.position_side,
                quantity: order.quantity,
                average_cost: fill.price,
                margin_reserved: reserve,
                open_commission: fill.commission,
                instrument: order.instrument.clone(),
                opened_at: at,
                last_mark: fill.price,
            },
        };

        Ok(PlanStep {
            position_after: Some(position_after),
            cash_after: cash.try_sub(required)?,
            realized: Decimal::ZERO,
            margin_delta: reserve,
        })
    }

    // ── Price events ───────────────────────────────────────────────────

    /// Evaluate every working order for `symbol` against one price event.
    pub fn process_event<L: Ledger>(
        &mut self,
        book: &mut OrderBook,
        positions: &mut PositionBook,
        ledger: &mut L,
        symbol: &str,
        snapshot: &PriceSnapshot,
        at: DateTime<Utc>,
    ) -> EventReport {
        self.process_event_where(book, positions, ledger, symbol, snapshot, at, |_| true)
    }

    /// Evaluate the working orders for `symbol` selected by `filter`.
    ///
    /// Orders are evaluated in path-policy order. A fill cancels its OCO
    /// sibling before the sibling's turn, so both never fill. A failed fill
    /// leaves the order pending and is reported.
    #[allow(clippy::too_many_arguments)]
    pub fn process_event_where<L, F>(
        &mut self,
        book: &mut OrderBook,
        positions: &mut PositionBook,
        ledger: &mut L,
        symbol: &str,
        snapshot: &PriceSnapshot,
        at: DateTime<Utc>,
        filter: F,
    ) -> EventReport
    where
        L: Ledger,
        F: Fn(&Order) -> bool,
    {
        let prepared = self.prepare_event(book, symbol, snapshot, at, filter);
        self.apply_event(book, positions, ledger, prepared, at)
    }

    /// Decide what each selected working order does on this event, without
    /// touching positions, cash or the RNG.
    ///
    /// Only an earlier fill in the same event can change a later order's
    /// outcome, and only by cancelling it, which [`ExecutionEngine::apply_event`]
    /// re-checks. The decisions can therefore be made ahead of the commit.
    pub fn prepare_event<F>(
        &self,
        book: &OrderBook,
        symbol: &str,
        snapshot: &PriceSnapshot,
        at: DateTime<Utc>,
        filter: F,
    ) -> PreparedEvent
    where
        F: Fn(&Order) -> bool,
    {
        let mut report = EventReport::default();
        let candidates: Vec<&Order> = book
            .working_orders_for(symbol)
            .into_iter()
            .filter(|o| filter(o))
            .collect();

        let mut snapshots: BTreeMap<OrderId, PriceSnapshot> = BTreeMap::new();
        let mut eligible = Vec::with_capacity(candidates.len());
        for order in candidates {
            match self.order_snapshot(order, snapshot, at) {
                Ok(s) => {
                    snapshots.insert(order.id, s);
                    eligible.push(order);
                }
                Err(err) => report.reject(order.id, &err),
            }
        }

        let mut steps = Vec::with_capacity(eligible.len());
        for id in evaluation_sequence(&eligible, self.config.path_policy, snapshot) {
            let (Some(order), Some(order_snapshot)) = (book.get(id), snapshots.get(&id)) else {
                continue;
            };
            match evaluate(order, order_snapshot, self.config.gap_policy) {
                TriggerResult::NoTrigger => {}
                result => steps.push((id, result)),
            }
        }
        PreparedEvent { steps, report }
    }

    /// Commit a prepared event: arm triggered stop-limits and fill the rest,
    /// in evaluation order.
    pub fn apply_event<L: Ledger>(
        &mut self,
        book: &mut OrderBook,
        positions: &mut PositionBook,
        ledger: &mut L,
        prepared: PreparedEvent,
        at: DateTime<Utc>,
    ) -> EventReport {
        let PreparedEvent { steps, mut report } = prepared;
        for (id, result) in steps {
            let Some(order) = book.get(id).filter(|o| o.is_working()).cloned() else {
                continue;
            };
            match result {
                TriggerResult::NoTrigger => {}
                TriggerResult::StopTriggered => match book.mark_triggered(id, at) {
                    Ok(()) => report.triggered.push(id),
                    Err(err) => report.reject(id, &err),
                },
                TriggerResult::Fill { price, .. } => {
                    let result = ledger.with_ledger(|account, journal| {
                        self.execute(&order, price, at, account, positions, journal)
                    });
                    match result {
                        Ok(trade) => {
                            match book.mark_filled_at_market(id, trade.price, price, at) {
                                Ok(outcome) => {
                                    report.cancelled.extend(outcome.cancelled);
                                    report.activated.extend(outcome.activated);
                                }
                                Err(err) => report.errors.push(Failure::from(&err)),
                            }
                            report.fills.push(trade);
                        }
                        Err(err) => report.reject(id, &err),
                    }
                }
            }
        }
        report
    }

    /// Ratchet working trailing stops on `symbol` toward the event's
    /// favorable extreme (high for sell stops, low for buy stops).
    pub fn ratchet_trailing(
        &self,
        book: &mut OrderBook,
        symbol: &str,
        snapshot: &PriceSnapshot,
        at: DateTime<Utc>,
    ) -> Vec<Failure> {
        let trailing: Vec<(OrderId, OrderSide, Order)> = book
            .working_orders_for(symbol)
            .into_iter()
            .filter(|o| matches!(o.kind, OrderKind::TrailingStop { .. }))
            .map(|o| (o.id, o.side, o.clone()))
            .collect();

        let mut failures = Vec::new();
        for (id, side, order) in trailing {
            let extreme = self.order_snapshot(&order, snapshot, at).map(|s| match side {
                OrderSide::Sell => s.high,
                OrderSide::Buy => s.low,
            });
            if let Err(err) = extreme.and_then(|price| book.update_trailing(id, price)) {
                failures.push(Failure::from(&err));
            }
        }
        failures
    }

    /// Mark every position fed by `symbol` at `price`. Options are marked at
    /// their valued premium.
    pub fn mark_positions(
        &self,
        positions: &mut PositionBook,
        symbol: &str,
        price: Decimal,
        at: DateTime<Utc>,
    ) -> Vec<Failure> {
        let mut failures = Vec::new();
        for position in positions.iter_mut().filter(|p| p.feed_symbol() == symbol) {
            let mark = match &position.instrument {
                Instrument::Equity => Ok(price),
                Instrument::Option(contract) => premium_at(self.valuation(), contract, price, at),
            };
            match mark {
                Ok(mark) => position.last_mark = mark,
                Err(err) => failures.push(Failure::from(&err)),
            }
        }
        failures
    }

    /// The snapshot an order triggers against: the underlying's for equities,
    /// the valued premium's for options.
    pub fn order_snapshot(
        &self,
        order: &Order,
        underlying: &PriceSnapshot,
        at: DateTime<Utc>,
    ) -> Result<PriceSnapshot, EngineError> {
        match &order.instrument {
            Instrument::Equity => Ok(*underlying),
            Instrument::Option(contract) => premium_snapshot(self.valuation(), contract, underlying, at),
        }
    }
}

struct FillEconomics {
    price: Decimal,
    units: Decimal,
    notional: Decimal,
    commission: Decimal,
}

struct PlanStep {
    position_after: Option<Position>,
    cash_after: Decimal,
    realized: Decimal,
    margin_delta: Decimal,
}

/// Reduce or close a position. Entry commission is released pro rata so
/// realized P&L is net of both sides' commissions.
fn plan_close(
    order: &Order,
    symbol: &str,
    existing: Option<&Position>,
    fill: &FillEconomics,
    cash: Decimal,
) -> Result<PlanStep, EngineError> {
    let held = existing.map(|p| p.quantity).unwrap_or(Decimal::ZERO);
    let position = match existing {
        Some(p) if order.quantity <= p.quantity => p,
        _ => {
            return Err(EngineError::InsufficientPosition {
                symbol: symbol.to_string(),
                requested: order.quantity,
                held,
            })
        }
    };

    let full = order.quantity == position.quantity;
    let (commission_released, margin_released) = if full {
        (position.open_commission, position.margin_reserved)
    } else {
        let fraction = order.quantity.try_div(position.quantity)?;
        (
            position.open_commission.try_mul(fraction)?,
            position.margin_reserved.try_mul(fraction)?,
        )
    };

    let gross = match position.side {
        PositionSide::Long => fill.price.try_sub(position.average_cost)?.try_mul(fill.units)?,
        PositionSide::Short => position.average_cost.try_sub(fill.price)?.try_mul(fill.units)?,
    };
    let realized = gross.try_sub(commission_released)?.try_sub(fill.commission)?;

    let inflow = match position.side {
        PositionSide::Long => fill.notional.try_sub(fill.commission)?,
        PositionSide::Short => margin_released.try_add(gross)?.try_sub(fill.commission)?,
    };
    let cash_after = cash.try_add(inflow)?;
    if cash_after < Decimal::ZERO {
        return Err(EngineError::InsufficientFunds {
            required: Decimal::ZERO.try_sub(inflow)?,
            available: cash,
        });
    }

    let position_after = if full {
        None
    } else {
        Some(Position {
            quantity: position.quantity.try_sub(order.quantity)?,
            margin_reserved: position.margin_reserved.try_sub(margin_released)?,
            open_commission: position.open_commission.try_sub(commission_released)?,
            last_mark: fill.price,
            ..position.clone()
        })
    };

    Ok(PlanStep {
        position_after,
        cash_after,
        realized,
        margin_delta: Decimal::ZERO.try_sub(margin_released)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OrderStatus, TimeInForce};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 1, 15, 0, 0).unwrap()
    }

    fn order(side: OrderSide, position_side: PositionSide, qty: Decimal) -> Order {
        Order {
            id: OrderId(1),
            symbol: "SPY".into(),
            side,
            position_side,
            kind: OrderKind::Market,
            quantity: qty,
            time_in_force: TimeInForce::GoodTillCancelled,
            instrument: Instrument::Equity,
            status: OrderStatus::Pending,
            linked_order_id: None,
            parent_id: None,
            created_at: at(),
            activated_at: Some(at()),
            filled_at: None,
            fill_price: None,
            note: "entry".into(),
            tags: vec!["swing".into()],
        }
    }

    struct Desk {
        engine: ExecutionEngine,
        account: Account,
        positions: PositionBook,
        journal: TradeJournal,
    }

    impl Desk {
        fn new(config: EngineConfig, cash: Decimal) -> Self {
            Self {
                engine: ExecutionEngine::new(config, 7),
                account: Account::new(cash),
                positions: PositionBook::new(),
                journal: TradeJournal::new(),
            }
        }

        fn fill(&mut self, o: &Order, price: Decimal) -> Result<Trade, EngineError> {
            self.engine
                .execute(o, price, at(), &mut self.account, &mut self.positions, &mut self.journal)
        }
    }

    #[test]
    fn long_round_trip_nets_both_commissions() {
        let config = EngineConfig {
            commission_rate: dec!(0.001),
            ..EngineConfig::frictionless()
        };
        let mut desk = Desk::new(config, dec!(10000));
        desk.fill(&order(OrderSide::Buy, PositionSide::Long, dec!(10)), dec!(100)).unwrap();
        assert_eq!(desk.account.cash, dec!(8999));

        let exit = desk
            .fill(&order(OrderSide::Sell, PositionSide::Long, dec!(10)), dec!(110))
            .unwrap();
        // 100 gross - 1 entry commission - 1.1 exit commission
        assert_eq!(exit.realized_pnl, dec!(97.9));
        assert_eq!(desk.account.cash, dec!(10097.9));
        assert!(desk.positions.is_empty());
        assert_eq!(desk.journal.len(), 2);
        assert_eq!(exit.note, "entry");
    }

    #[test]
    fn insufficient_funds_leaves_state_untouched() {
        let mut desk = Desk::new(EngineConfig::frictionless(), dec!(500));
        let before = (desk.account.clone(), desk.positions.clone(), desk.journal.clone());
        let err = desk
            .fill(&order(OrderSide::Buy, PositionSide::Long, dec!(10)), dec!(100))
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientFunds { .. }));
        assert_eq!((desk.account.clone(), desk.positions.clone(), desk.journal.clone()), before);
    }

    #[test]
    fn selling_more_than_held_is_rejected() {
        let mut desk = Desk::new(EngineConfig::frictionless(), dec!(10000));
        desk.fill(&order(OrderSide::Buy, PositionSide::Long, dec!(5)), dec!(100)).unwrap();
        let err = desk
            .fill(&order(OrderSide::Sell, PositionSide::Long, dec!(6)), dec!(100))
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientPosition { .. }));
    }

    #[test]
    fn short_reserves_and_releases_margin() {
        let mut desk = Desk::new(EngineConfig::frictionless(), dec!(10000));
        desk.fill(&order(OrderSide::Sell, PositionSide::Short, dec!(10)), dec!(100)).unwrap();
        let short = desk.positions.get("SPY", PositionSide::Short).unwrap();
        assert_eq!(short.margin_reserved, dec!(1500));
        assert_eq!(desk.account.cash, dec!(8500));
        assert_eq!(desk.account.equity(&desk.positions).unwrap(), dec!(10000));

        let cover = desk
            .fill(&order(OrderSide::Buy, PositionSide::Short, dec!(10)), dec!(90))
            .unwrap();
        assert_eq!(cover.realized_pnl, dec!(100));
        assert_eq!(desk.account.cash, dec!(10100));
        assert_eq!(desk.account.margin_reserved, Decimal::ZERO);
    }

    #[test]
    fn short_without_margin_is_rejected() {
        let mut desk = Desk::new(EngineConfig::frictionless(), dec!(1000));
        let err = desk
            .fill(&order(OrderSide::Sell, PositionSide::Short, dec!(10)), dec!(100))
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientMargin { required, .. } if required == dec!(1500)));
    }

    #[test]
    fn partial_close_keeps_average_cost() {
        let mut desk = Desk::new(EngineConfig::frictionless(), dec!(10000));
        desk.fill(&order(OrderSide::Buy, PositionSide::Long, dec!(10)), dec!(100)).unwrap();
        desk.fill(&order(OrderSide::Buy, PositionSide::Long, dec!(10)), dec!(110)).unwrap();
        assert_eq!(desk.positions.get("SPY", PositionSide::Long).unwrap().average_cost, dec!(105));
        desk.fill(&order(OrderSide::Sell, PositionSide::Long, dec!(5)), dec!(120)).unwrap();
        let p = desk.positions.get("SPY", PositionSide::Long).unwrap();
        assert_eq!(p.quantity, dec!(15));
        assert_eq!(p.average_cost, dec!(105));
    }
}
