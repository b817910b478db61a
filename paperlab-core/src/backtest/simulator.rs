//! Bar-by-bar historical replay for one symbol.
//!
//! Each call to [`Backtester::step`] consumes one bar atomically, in this order:
//!
//! 1. Exit legs placed on an earlier bar are evaluated against this bar's
//!    full range.
//! 2. The strategy sees bars up to the previous close. An entry signal fills
//!    at this bar's open; protective legs activate on the fill.
//! 3. Legs activated in step 2 are evaluated against this bar's range. The
//!    path policy decides stop-loss vs take-profit when both are touched.
//! 4. An exit signal with no exit yet fills at this bar's close.
//! 5. Trailing stops ratchet, positions mark at the close, and one equity
//!    point is recorded.
//!
//! The strategy never sees the bar being simulated.

use super::signal::{Signal, SignalGenerator};
use super::summary::{BacktestSummary, EquityPoint};
use crate::config::EngineConfig;
use crate::decimal::MoneyExt;
use crate::domain::{Account, Bar, OrderId, OrderRequest, OrderSide, Position, PositionSide, PriceSnapshot, Trade};
use crate::engine::{EngineWarning, EventReport, Rejection, TradingSession};
use crate::error::{EngineError, Failure};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Position sizing for entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "value", rename_all = "snake_case")]
pub enum Sizing {
    /// Spend this percentage of available cash, in whole units.
    PercentOfCash(Decimal),
    FixedQuantity(Decimal),
}

impl Default for Sizing {
    fn default() -> Self {
        Sizing::PercentOfCash(dec!(100))
    }
}

/// Backtest parameters. Percentages are in percent units (5 = 5%).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    pub initial_capital: Decimal,
    pub sizing: Sizing,
    pub stop_loss_pct: Option<Decimal>,
    pub take_profit_pct: Option<Decimal>,
    /// Trailing stop distance. Replaces the fixed stop-loss when both are set.
    pub trailing_stop_pct: Option<Decimal>,
    pub allow_short: bool,
    /// Close anything still open at the last close.
    pub force_liquidation: bool,
    pub seed: u64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_capital: dec!(100000),
            sizing: Sizing::default(),
            stop_loss_pct: None,
            take_profit_pct: None,
            trailing_stop_pct: None,
            allow_short: false,
            force_liquidation: false,
            seed: 42,
        }
    }
}

impl BacktestConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.initial_capital <= Decimal::ZERO {
            return Err(EngineError::InvalidOrderSpec(format!(
                "initial_capital must be positive, got {}",
                self.initial_capital
            )));
        }
        match self.sizing {
            Sizing::PercentOfCash(pct) if pct <= Decimal::ZERO || pct > dec!(100) => {
                return Err(EngineError::InvalidOrderSpec(format!(
                    "percent_of_cash must be in (0, 100], got {pct}"
                )));
            }
            Sizing::FixedQuantity(q) if q <= Decimal::ZERO => {
                return Err(EngineError::InvalidOrderSpec(format!(
                    "fixed_quantity must be positive, got {q}"
                )));
            }
            _ => {}
        }
        let bounded = [
            ("stop_loss_pct", self.stop_loss_pct),
            ("trailing_stop_pct", self.trailing_stop_pct),
        ];
        for (name, value) in bounded {
            if let Some(pct) = value {
                if pct <= Decimal::ZERO || pct >= dec!(100) {
                    return Err(EngineError::InvalidOrderSpec(format!(
                        "{name} must be in (0, 100), got {pct}"
                    )));
                }
            }
        }
        if let Some(pct) = self.take_profit_pct {
            if pct <= Decimal::ZERO {
                return Err(EngineError::InvalidOrderSpec(format!(
                    "take_profit_pct must be positive, got {pct}"
                )));
            }
        }
        Ok(())
    }
}

/// Cooperative cancellation flag, checked between bars.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Where the simulator is in its per-bar cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimState {
    AwaitingBar,
    EvaluatingExits,
    EvaluatingEntries,
    Advancing,
    Finished,
}

/// What one call to [`Backtester::step`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Processed,
    /// The bar failed its sanity check; its equity point carries forward.
    Skipped,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub symbol: String,
    pub strategy: String,
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    pub summary: BacktestSummary,
    pub final_account: Account,
    /// Positions left open at the end (valued at the last close).
    pub open_positions: Vec<Position>,
    pub warnings: Vec<EngineWarning>,
    pub rejections: Vec<Rejection>,
    pub data_gaps: Vec<Failure>,
    pub errors: Vec<Failure>,
    pub bars_processed: usize,
    pub cancelled: bool,
}

/// Single-symbol replay state machine.
pub struct Backtester<'a> {
    symbol: String,
    bars: &'a [Bar],
    strategy: &'a dyn SignalGenerator,
    config: BacktestConfig,
    session: TradingSession,
    state: SimState,
    cursor: usize,
    history: Vec<Bar>,
    equity_curve: Vec<EquityPoint>,
    warnings: Vec<EngineWarning>,
    rejections: Vec<Rejection>,
    data_gaps: Vec<Failure>,
    errors: Vec<Failure>,
    cancelled: bool,
}

impl<'a> Backtester<'a> {
    /// Prepare a replay. Fails when either config is invalid or the bar
    /// timestamps are not strictly increasing.
    pub fn new(
        symbol: impl Into<String>,
        bars: &'a [Bar],
        strategy: &'a dyn SignalGenerator,
        engine: EngineConfig,
        config: BacktestConfig,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        check_monotonic(bars)?;
        let session = TradingSession::new(engine, config.initial_capital, config.seed)?;
        Ok(Self {
            symbol: symbol.into(),
            bars,
            strategy,
            session,
            state: SimState::AwaitingBar,
            cursor: 0,
            history: Vec::with_capacity(bars.len()),
            equity_curve: Vec::with_capacity(bars.len()),
            warnings: Vec::new(),
            rejections: Vec::new(),
            data_gaps: Vec::new(),
            errors: Vec::new(),
            cancelled: false,
            config,
        })
    }

    pub fn state(&self) -> SimState {
        self.state
    }

    pub fn session(&self) -> &TradingSession {
        &self.session
    }

    pub fn equity_curve(&self) -> &[EquityPoint] {
        &self.equity_curve
    }

    /// Bars consumed so far, including skipped ones.
    pub fn bars_processed(&self) -> usize {
        self.cursor
    }

    /// Run to the last bar, stopping early if `cancel` fires between bars.
    pub fn run(mut self, cancel: &CancelToken) -> Result<BacktestResult, EngineError> {
        info!(symbol = %self.symbol, strategy = self.strategy.name(), bars = self.bars.len(), "backtest started");
        loop {
            if cancel.is_cancelled() {
                info!(symbol = %self.symbol, completed = self.cursor, "backtest cancelled");
                self.cancelled = true;
                break;
            }
            if self.step()? == StepOutcome::Finished {
                break;
            }
        }
        self.finish()
    }

    /// Consume one bar.
    pub fn step(&mut self) -> Result<StepOutcome, EngineError> {
        let bars = self.bars;
        let Some(bar) = bars.get(self.cursor) else {
            self.state = SimState::Finished;
            return Ok(StepOutcome::Finished);
        };
        self.cursor += 1;

        if let Some(reason) = bar.sanity_violation() {
            let gap = EngineError::DataGap {
                symbol: self.symbol.clone(),
                at: bar.timestamp,
                reason,
            };
            warn!(error = %gap, "bar skipped");
            self.data_gaps.push(Failure::from(&gap));
            let carried = self
                .equity_curve
                .last()
                .map(|p| p.equity)
                .unwrap_or(self.config.initial_capital);
            self.equity_curve.push(EquityPoint {
                timestamp: bar.timestamp,
                equity: carried,
            });
            return Ok(StepOutcome::Skipped);
        }

        let at = bar.timestamp;
        let snapshot = bar.snapshot();
        let mut bar_report = EventReport::default();

        // 1. Legs from earlier bars.
        self.state = SimState::EvaluatingExits;
        let prior = self
            .session
            .process_where(&self.symbol, &snapshot, at, |o| o.activated_at.is_some_and(|a| a < at));
        let mut exited = !prior.fills.is_empty();
        bar_report.merge(prior);

        // 2. Entry at the open, decided on completed bars only.
        self.state = SimState::EvaluatingEntries;
        let signal = if self.history.is_empty() {
            Signal::Hold
        } else {
            self.strategy.signal(&self.history)
        };
        let held = self.held_side();
        let exit_requested = match (signal, held) {
            (Signal::Exit, Some(_)) => true,
            (Signal::EnterLong, Some(PositionSide::Short)) => true,
            (Signal::EnterShort, Some(PositionSide::Long)) => self.config.allow_short,
            _ => false,
        };
        let entry_side = match (signal, held, exited) {
            (Signal::EnterLong, None, false) => Some(PositionSide::Long),
            (Signal::EnterShort, None, false) if self.config.allow_short => Some(PositionSide::Short),
            _ => None,
        };
        if let Some(side) = entry_side {
            let entry = self.enter(side, bar);
            bar_report.merge(entry);
        }

        // 3. Legs placed by this bar's entry.
        self.state = SimState::EvaluatingExits;
        let fresh = self
            .session
            .process_where(&self.symbol, &snapshot, at, |o| o.activated_at == Some(at));
        exited |= !fresh.fills.is_empty();
        bar_report.merge(fresh);

        // 4. Signal exit at the close.
        if exit_requested && !exited && self.held_side().is_some() {
            let exit = self.exit_at(bar.close, at, "signal exit");
            bar_report.merge(exit);
        }

        // 5. Ratchet, mark, record.
        self.state = SimState::Advancing;
        bar_report.errors.extend(self.session.ratchet(&self.symbol, &snapshot, at));
        bar_report.errors.extend(self.session.mark(&self.symbol, bar.close, at));
        match self.session.warnings_for(&bar_report) {
            Ok(w) => bar_report.warnings.extend(w),
            Err(err) => bar_report.errors.push(Failure::from(&err)),
        }
        self.record_equity(at, &mut bar_report);
        self.absorb(bar_report);
        self.history.push(bar.clone());

        self.state = SimState::AwaitingBar;
        Ok(StepOutcome::Processed)
    }

    /// Side of the open position on this symbol, if any.
    fn held_side(&self) -> Option<PositionSide> {
        [PositionSide::Long, PositionSide::Short]
            .into_iter()
            .find(|side| self.session.positions().quantity(&self.symbol, *side) > Decimal::ZERO)
    }

    fn enter(&mut self, side: PositionSide, bar: &Bar) -> EventReport {
        let at = bar.timestamp;
        let open = bar.open;
        // The open has printed: it is the reference for leg placement.
        self.session.observe_price(&self.symbol, open);

        let mut report = EventReport::default();
        let quantity = match self.entry_quantity(side, open) {
            Ok(q) if q > Decimal::ZERO => q,
            Ok(_) => {
                debug!(symbol = %self.symbol, %open, "entry skipped: size rounds to zero");
                return report;
            }
            Err(err) => {
                report.errors.push(Failure::from(&err));
                return report;
            }
        };

        let entry_id = match self.submit_entry(side, quantity, open, at) {
            Ok(id) => id,
            Err(err) => {
                warn!(symbol = %self.symbol, error = %err, "entry not placed");
                report.errors.push(Failure::from(&err));
                return report;
            }
        };

        let filled = self
            .session
            .process_where(&self.symbol, &PriceSnapshot::opening(open), at, |o| o.id == entry_id);
        let entered = !filled.fills.is_empty();
        report.merge(filled);

        if !entered {
            if let Err(err) = self.session.cancel(entry_id, at) {
                report.errors.push(Failure::from(&err));
            }
            return report;
        }

        // A take-profit without a stop leg rides alone.
        if self.stop_leg(side, quantity, open).is_none() {
            if let Some(tp) = self.take_profit_leg(side, quantity, open) {
                if let Err(err) = tp.and_then(|req| self.session.submit(req, at)) {
                    report.errors.push(Failure::from(&err));
                }
            }
        }
        report
    }

    fn submit_entry(
        &mut self,
        side: PositionSide,
        quantity: Decimal,
        open: Decimal,
        at: DateTime<Utc>,
    ) -> Result<OrderId, EngineError> {
        let mut entry = match side {
            PositionSide::Long => OrderRequest::market(&self.symbol, OrderSide::Buy, quantity),
            PositionSide::Short => OrderRequest::market(&self.symbol, OrderSide::Sell, quantity).short(),
        };
        entry = entry
            .with_note("entry")
            .with_tags([self.strategy.name().to_string()]);

        match self.stop_leg(side, quantity, open) {
            Some(stop) => {
                let stop = stop?;
                let take_profit = self.take_profit_leg(side, quantity, open).transpose()?;
                Ok(self.session.submit_bracket(entry, stop, take_profit, at)?.entry)
            }
            None => self.session.submit(entry, at),
        }
    }

    fn exit_side(side: PositionSide) -> OrderSide {
        match side {
            PositionSide::Long => OrderSide::Sell,
            PositionSide::Short => OrderSide::Buy,
        }
    }

    fn on_book(req: OrderRequest, side: PositionSide) -> OrderRequest {
        match side {
            PositionSide::Long => req,
            PositionSide::Short => req.short(),
        }
    }

    /// Protective stop for an entry at `open`: trailing if configured,
    /// otherwise fixed.
    fn stop_leg(
        &self,
        side: PositionSide,
        quantity: Decimal,
        open: Decimal,
    ) -> Option<Result<OrderRequest, EngineError>> {
        let exit = Self::exit_side(side);
        if let Some(pct) = self.config.trailing_stop_pct {
            let req = OrderRequest::trailing_percent(&self.symbol, exit, quantity, pct).with_note("trailing stop");
            return Some(Ok(Self::on_book(req, side)));
        }
        let pct = self.config.stop_loss_pct?;
        Some(offset(open, pct, side == PositionSide::Short).map(|stop| {
            let req = OrderRequest::stop(&self.symbol, exit, quantity, stop).with_note("stop-loss");
            Self::on_book(req, side)
        }))
    }

    fn take_profit_leg(
        &self,
        side: PositionSide,
        quantity: Decimal,
        open: Decimal,
    ) -> Option<Result<OrderRequest, EngineError>> {
        let pct = self.config.take_profit_pct?;
        Some(offset(open, pct, side == PositionSide::Long).map(|target| {
            let req = OrderRequest::take_profit(&self.symbol, Self::exit_side(side), quantity, target)
                .with_note("take-profit");
            Self::on_book(req, side)
        }))
    }

    /// Whole units affordable at `price`, with headroom for costs.
    fn entry_quantity(&self, side: PositionSide, price: Decimal) -> Result<Decimal, EngineError> {
        match self.config.sizing {
            Sizing::FixedQuantity(q) => Ok(q),
            Sizing::PercentOfCash(pct) => {
                let engine = self.session.config();
                let budget = self.session.account().cash.try_mul(pct)?.try_div(dec!(100))?;
                let price_headroom = Decimal::ONE
                    .try_add(engine.spread_rate.try_div(dec!(2))?)?
                    .try_add(engine.slippage_stddev.try_mul(dec!(4))?)?;
                let per_unit = price.try_mul(price_headroom)?;
                let cash_per_unit = match side {
                    PositionSide::Long => Decimal::ONE.try_add(engine.commission_rate)?,
                    PositionSide::Short => engine.short_margin_multiple.try_add(engine.commission_rate)?,
                };
                let unit_cost = per_unit.try_mul(cash_per_unit)?;
                Ok(budget.try_div(unit_cost)?.floor().max(Decimal::ZERO))
            }
        }
    }

    /// Close the position with a market order at `price`, then cancel its
    /// working legs. A close that does not fill leaves the legs in place.
    fn exit_at(&mut self, price: Decimal, at: DateTime<Utc>, note: &str) -> EventReport {
        let mut report = EventReport::default();
        let Some(side) = self.held_side() else {
            return report;
        };
        let quantity = self.session.positions().quantity(&self.symbol, side);

        let req = Self::on_book(
            OrderRequest::market(&self.symbol, Self::exit_side(side), quantity).with_note(note),
            side,
        );
        let exit_id = match self.session.submit(req, at) {
            Ok(id) => id,
            Err(err) => {
                report.errors.push(Failure::from(&err));
                return report;
            }
        };
        let filled = self
            .session
            .process_where(&self.symbol, &PriceSnapshot::tick(price), at, |o| o.id == exit_id);
        let done = !filled.fills.is_empty();
        report.merge(filled);
        if !done {
            warn!(symbol = %self.symbol, %price, "close did not fill, exit legs kept");
            if let Err(err) = self.session.cancel(exit_id, at) {
                report.errors.push(Failure::from(&err));
            }
            return report;
        }

        let working: Vec<OrderId> = self
            .session
            .orders()
            .active_orders()
            .into_iter()
            .filter(|o| o.symbol == self.symbol)
            .map(|o| o.id)
            .collect();
        for id in working {
            if self.session.orders().get(id).is_some_and(|o| o.is_active()) {
                match self.session.cancel(id, at) {
                    Ok(cancelled) => report.cancelled.extend(cancelled),
                    Err(err) => report.errors.push(Failure::from(&err)),
                }
            }
        }
        report
    }

    fn record_equity(&mut self, at: DateTime<Utc>, report: &mut EventReport) {
        let equity = match self.session.equity() {
            Ok(e) => e,
            Err(err) => {
                report.errors.push(Failure::from(&err));
                self.equity_curve
                    .last()
                    .map(|p| p.equity)
                    .unwrap_or(self.config.initial_capital)
            }
        };
        self.equity_curve.push(EquityPoint { timestamp: at, equity });
    }

    fn absorb(&mut self, report: EventReport) {
        self.warnings.extend(report.warnings);
        self.rejections.extend(report.rejected);
        self.errors.extend(report.errors);
    }

    /// Close out (optionally liquidating) and compute the summary.
    pub fn finish(mut self) -> Result<BacktestResult, EngineError> {
        let last_sane = self.history.last().cloned();
        if self.config.force_liquidation && !self.cancelled {
            if let Some(bar) = &last_sane {
                if self.held_side().is_some() {
                    let mut report = self.exit_at(bar.close, bar.timestamp, "forced liquidation");
                    report.errors.extend(self.session.mark(&self.symbol, bar.close, bar.timestamp));
                    if let Some(last) = self.equity_curve.last_mut() {
                        last.equity = self.session.equity()?;
                    }
                    self.absorb(report);
                }
            }
        }
        self.state = SimState::Finished;

        let trades = self.session.trades().to_vec();
        let summary = BacktestSummary::compute(
            self.config.initial_capital,
            &self.equity_curve,
            &trades,
            self.history.first().map(|b| b.close),
            last_sane.map(|b| b.close),
        )?;
        info!(
            symbol = %self.symbol,
            trades = trades.len(),
            final_equity = %summary.final_equity,
            cancelled = self.cancelled,
            "backtest finished"
        );

        Ok(BacktestResult {
            symbol: self.symbol,
            strategy: self.strategy.name().to_string(),
            trades,
            equity_curve: self.equity_curve,
            summary,
            final_account: self.session.account().clone(),
            open_positions: self.session.positions().iter().cloned().collect(),
            warnings: self.warnings,
            rejections: self.rejections,
            data_gaps: self.data_gaps,
            errors: self.errors,
            bars_processed: self.cursor,
            cancelled: self.cancelled,
        })
    }
}

/// `price × (1 ± pct/100)`.
fn offset(price: Decimal, pct: Decimal, up: bool) -> Result<Decimal, EngineError> {
    let fraction = pct.try_div(dec!(100))?;
    let factor = if up {
        Decimal::ONE.try_add(fraction)?
    } else {
        Decimal::ONE.try_sub(fraction)?
    };
    Ok(price.try_mul(factor)?)
}

/// Strictly increasing timestamps, or the first violation.
pub fn check_monotonic(bars: &[Bar]) -> Result<(), EngineError> {
    for (index, pair) in bars.windows(2).enumerate() {
        if pair[1].timestamp <= pair[0].timestamp {
            return Err(EngineError::NonMonotonicTimestamps {
                index: index + 1,
                previous: pair[0].timestamp,
                current: pair[1].timestamp,
            });
        }
    }
    Ok(())
}

/// Replay `bars` for `symbol` under `strategy`.
pub fn run_backtest(
    symbol: &str,
    bars: &[Bar],
    strategy: &dyn SignalGenerator,
    engine: &EngineConfig,
    config: &BacktestConfig,
    cancel: &CancelToken,
) -> Result<BacktestResult, EngineError> {
    Backtester::new(symbol, bars, strategy, engine.clone(), config.clone())?.run(cancel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn day(i: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 21, 0, 0).unwrap() + Duration::days(i)
    }

    fn bar(i: i64, o: Decimal, h: Decimal, l: Decimal, c: Decimal) -> Bar {
        Bar::new(day(i), o, h, l, c, dec!(1000))
    }

    #[test]
    fn non_monotonic_bars_are_fatal() {
        let bars = vec![
            bar(1, dec!(10), dec!(10), dec!(10), dec!(10)),
            bar(0, dec!(10), dec!(10), dec!(10), dec!(10)),
        ];
        let hold = |_: &[Bar]| Signal::Hold;
        let err = Backtester::new("X", &bars, &hold, EngineConfig::frictionless(), BacktestConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::NonMonotonicTimestamps { index: 1, .. }));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn insane_bar_carries_equity_forward() {
        let bars = vec![
            bar(0, dec!(10), dec!(11), dec!(9), dec!(10)),
            bar(1, dec!(10), dec!(9), dec!(11), dec!(10)),
            bar(2, dec!(10), dec!(11), dec!(9), dec!(10)),
        ];
        let result = run_backtest(
            "X",
            &bars,
            &crate::backtest::BuyAndHold,
            &EngineConfig::frictionless(),
            &BacktestConfig {
                initial_capital: dec!(1000),
                ..BacktestConfig::default()
            },
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(result.data_gaps.len(), 1);
        assert_eq!(result.equity_curve.len(), 3);
        assert_eq!(result.equity_curve[1].equity, dec!(1000));
        // History was only bar 0 when bar 2 opened: entry at bar 2's open.
        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].timestamp, day(2));
    }

    #[test]
    fn step_reports_finished_and_state() {
        let bars = vec![bar(0, dec!(10), dec!(11), dec!(9), dec!(10))];
        let hold = |_: &[Bar]| Signal::Hold;
        let mut bt =
            Backtester::new("X", &bars, &hold, EngineConfig::frictionless(), BacktestConfig::default()).unwrap();
        assert_eq!(bt.state(), SimState::AwaitingBar);
        assert_eq!(bt.step().unwrap(), StepOutcome::Processed);
        assert_eq!(bt.state(), SimState::AwaitingBar);
        assert_eq!(bt.step().unwrap(), StepOutcome::Finished);
        assert_eq!(bt.state(), SimState::Finished);
    }

    #[test]
    fn percent_sizing_leaves_cost_headroom() {
        let bars = vec![bar(0, dec!(100), dec!(100), dec!(100), dec!(100))];
        let hold = |_: &[Bar]| Signal::Hold;
        let bt = Backtester::new(
            "X",
            &bars,
            &hold,
            EngineConfig::default(),
            BacktestConfig {
                initial_capital: dec!(10000),
                ..BacktestConfig::default()
            },
        )
        .unwrap();
        let q = bt.entry_quantity(PositionSide::Long, dec!(100)).unwrap();
        assert_eq!(q, dec!(99));
        let short = bt.entry_quantity(PositionSide::Short, dec!(100)).unwrap();
        assert_eq!(short, dec!(66));
    }

    #[test]
    fn config_validation() {
        let bad = BacktestConfig {
            stop_loss_pct: Some(dec!(150)),
            ..BacktestConfig::default()
        };
        assert!(bad.validate().is_err());
        let bad_size = BacktestConfig {
            sizing: Sizing::PercentOfCash(dec!(0)),
            ..BacktestConfig::default()
        };
        assert!(bad_size.validate().is_err());
        assert!(BacktestConfig::default().validate().is_ok());
    }
}
