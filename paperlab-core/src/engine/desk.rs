//! Multi-symbol desk: per-symbol order evaluation on worker threads over a
//! shared cash ledger.
//!
//! Each symbol owns its order book, position book and slippage stream, so
//! trigger evaluation (including option valuation) runs per symbol in
//! parallel. Cash and the journal are cross-symbol and sit behind
//! [`SharedLedger`]. Fills commit one symbol at a time in symbol order, so
//! trade ids and the allocation of scarce cash are the same on every run.

use super::execution::{ExecutionEngine, PreparedEvent};
use super::ledger::SharedLedger;
use super::report::{goal_breaches, margin_call, EventReport};
use super::session::check_snapshot;
use crate::config::EngineConfig;
use crate::decimal::MoneyExt;
use crate::domain::{Account, Instrument, OrderId, OrderRequest, PositionBook, PriceSnapshot, TradeJournal};
use crate::error::{EngineError, Failure};
use crate::orders::OrderBook;
use crate::rng::RngHierarchy;
use crate::valuation::{premium_at, IntrinsicValuation, OptionValuation};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Slippage stream index for a symbol's execution engine.
const SLIPPAGE_STREAM: u64 = 0;

/// Per-symbol trading state.
#[derive(Debug)]
pub struct SymbolDesk {
    symbol: String,
    orders: OrderBook,
    positions: PositionBook,
    engine: ExecutionEngine,
    last_price: Option<Decimal>,
}

impl SymbolDesk {
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn orders(&self) -> &OrderBook {
        &self.orders
    }

    pub fn positions(&self) -> &PositionBook {
        &self.positions
    }

    pub fn last_price(&self) -> Option<Decimal> {
        self.last_price
    }

    /// Decide this tick's triggers. Touches nothing shared.
    fn prepare(&self, snapshot: &PriceSnapshot, at: DateTime<Utc>) -> Result<PreparedEvent, EngineError> {
        check_snapshot(&self.symbol, snapshot, at)?;
        Ok(self.engine.prepare_event(&self.orders, &self.symbol, snapshot, at, |_| true))
    }

    fn commit(&mut self, ledger: &mut SharedLedger, prepared: PreparedEvent, at: DateTime<Utc>) -> EventReport {
        self.engine
            .apply_event(&mut self.orders, &mut self.positions, ledger, prepared, at)
    }

    /// Ratchet trailing stops and mark positions after the commit.
    fn settle(&mut self, snapshot: &PriceSnapshot, at: DateTime<Utc>) -> Vec<Failure> {
        let mut failures = self
            .engine
            .ratchet_trailing(&mut self.orders, &self.symbol, snapshot, at);
        failures.extend(
            self.engine
                .mark_positions(&mut self.positions, &self.symbol, snapshot.close, at),
        );
        self.last_price = Some(snapshot.close);
        failures
    }
}

/// Several symbols trading against one account.
pub struct MultiSymbolDesk {
    config: EngineConfig,
    rngs: RngHierarchy,
    valuation: Arc<dyn OptionValuation>,
    desks: BTreeMap<String, SymbolDesk>,
    ledger: SharedLedger,
}

impl fmt::Debug for MultiSymbolDesk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiSymbolDesk")
            .field("config", &self.config)
            .field("rngs", &self.rngs)
            .field("desks", &self.desks)
            .field("ledger", &self.ledger)
            .finish_non_exhaustive()
    }
}

impl MultiSymbolDesk {
    pub fn new(config: EngineConfig, initial_capital: Decimal, master_seed: u64) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            config,
            rngs: RngHierarchy::new(master_seed),
            valuation: Arc::new(IntrinsicValuation),
            desks: BTreeMap::new(),
            ledger: SharedLedger::new(Account::new(initial_capital), TradeJournal::new()),
        })
    }

    /// Set the valuation used by every symbol added afterwards.
    pub fn with_valuation(mut self, valuation: Arc<dyn OptionValuation>) -> Self {
        self.valuation = valuation;
        self
    }

    /// Open a desk for `symbol`. Adding an existing symbol is a no-op.
    pub fn add_symbol(&mut self, symbol: &str) {
        if self.desks.contains_key(symbol) {
            return;
        }
        let engine = ExecutionEngine::with_rng(self.config.clone(), self.rngs.rng_for(symbol, SLIPPAGE_STREAM))
            .with_valuation(Arc::clone(&self.valuation));
        self.desks.insert(
            symbol.to_string(),
            SymbolDesk {
                symbol: symbol.to_string(),
                orders: OrderBook::new(),
                positions: PositionBook::new(),
                engine,
                last_price: None,
            },
        );
        info!(%symbol, "symbol desk opened");
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.desks.keys().map(String::as_str)
    }

    pub fn desk(&self, symbol: &str) -> Result<&SymbolDesk, EngineError> {
        self.desks
            .get(symbol)
            .ok_or_else(|| EngineError::SymbolNotFound(symbol.to_string()))
    }

    fn desk_mut(&mut self, symbol: &str) -> Result<&mut SymbolDesk, EngineError> {
        self.desks
            .get_mut(symbol)
            .ok_or_else(|| EngineError::SymbolNotFound(symbol.to_string()))
    }

    pub fn submit(&mut self, req: OrderRequest, at: DateTime<Utc>) -> Result<OrderId, EngineError> {
        let desk = self.desk_mut(&req.symbol)?;
        let reference = match (desk.last_price, &req.instrument) {
            (None, _) => None,
            (Some(last), Instrument::Equity) => Some(last),
            (Some(last), Instrument::Option(contract)) => {
                Some(premium_at(desk.engine.valuation(), contract, last, at)?)
            }
        };
        desk.orders.submit(req, at, reference)
    }

    pub fn cancel(&mut self, symbol: &str, order_id: OrderId, at: DateTime<Utc>) -> Result<Vec<OrderId>, EngineError> {
        self.desk_mut(symbol)?.orders.cancel(order_id, at, "cancelled by user")
    }

    /// Process one price event per symbol.
    ///
    /// Triggers are evaluated in parallel; fills then commit in symbol
    /// order. Every symbol must have a desk. A symbol with an inconsistent
    /// snapshot is skipped and reported; the others proceed.
    pub fn process_ticks(
        &mut self,
        ticks: &BTreeMap<String, PriceSnapshot>,
        at: DateTime<Utc>,
    ) -> Result<EventReport, EngineError> {
        if let Some(unknown) = ticks.keys().find(|s| !self.desks.contains_key(*s)) {
            return Err(EngineError::SymbolNotFound(unknown.clone()));
        }

        let prepared: BTreeMap<String, Result<PreparedEvent, EngineError>> = self
            .desks
            .par_iter()
            .filter_map(|(symbol, desk)| {
                let snapshot = ticks.get(symbol)?;
                Some((symbol.clone(), desk.prepare(snapshot, at)))
            })
            .collect();

        let mut reports: BTreeMap<String, EventReport> = BTreeMap::new();
        let mut settle: BTreeMap<&str, &PriceSnapshot> = BTreeMap::new();
        let mut ledger = self.ledger.clone();
        for (symbol, event) in prepared {
            let report = match event {
                Ok(event) => {
                    let Some(desk) = self.desks.get_mut(&symbol) else {
                        continue;
                    };
                    if let Some((key, snapshot)) = ticks.get_key_value(&symbol) {
                        settle.insert(key.as_str(), snapshot);
                    }
                    desk.commit(&mut ledger, event, at)
                }
                Err(err) => {
                    warn!(%symbol, error = %err, "tick skipped");
                    EventReport {
                        errors: vec![Failure::from(&err)],
                        ..EventReport::default()
                    }
                }
            };
            reports.insert(symbol, report);
        }

        let mut settled: BTreeMap<String, Vec<Failure>> = self
            .desks
            .par_iter_mut()
            .filter_map(|(symbol, desk)| {
                let snapshot = settle.get(symbol.as_str())?;
                Some((symbol.clone(), desk.settle(snapshot, at)))
            })
            .collect();

        let mut report = EventReport::default();
        for (symbol, mut r) in reports {
            r.errors.extend(settled.remove(&symbol).unwrap_or_default());
            report.merge(r);
        }

        if report.touched_short() {
            let account = self.ledger.account();
            if let Some(w) = margin_call(&self.config, self.equity()?, account.margin_reserved)? {
                report.warnings.push(w);
            }
        }
        if !report.fills.is_empty() {
            let journal = self.ledger.journal();
            report
                .warnings
                .extend(goal_breaches(&self.config.goals, &journal, &report.fills)?);
        }
        Ok(report)
    }

    /// Cash plus every symbol's positions at their last marks.
    pub fn equity(&self) -> Result<Decimal, EngineError> {
        let mut equity = self.ledger.account().cash;
        for desk in self.desks.values() {
            equity = equity.try_add(desk.positions.market_value()?)?;
        }
        Ok(equity)
    }

    pub fn account(&self) -> Account {
        self.ledger.account()
    }

    pub fn journal(&self) -> TradeJournal {
        self.ledger.journal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OrderSide, PositionSide};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 14, 30, 0).unwrap()
    }

    fn ticks(prices: &[(&str, Decimal)]) -> BTreeMap<String, PriceSnapshot> {
        prices
            .iter()
            .map(|(s, p)| (s.to_string(), PriceSnapshot::tick(*p)))
            .collect()
    }

    fn desk(config: EngineConfig, seed: u64) -> MultiSymbolDesk {
        let mut desk = MultiSymbolDesk::new(config, dec!(100000), seed).unwrap();
        for s in ["AAPL", "MSFT", "SPY"] {
            desk.add_symbol(s);
        }
        desk
    }

    #[test]
    fn fills_across_symbols_share_one_cash_balance() {
        let mut d = desk(EngineConfig::frictionless(), 3);
        d.submit(OrderRequest::market("AAPL", OrderSide::Buy, dec!(10)), at()).unwrap();
        d.submit(OrderRequest::market("MSFT", OrderSide::Buy, dec!(20)), at()).unwrap();
        let report = d
            .process_ticks(&ticks(&[("AAPL", dec!(150)), ("MSFT", dec!(300))]), at())
            .unwrap();
        assert_eq!(report.fills.len(), 2);
        assert_eq!(d.account().cash, dec!(100000) - dec!(1500) - dec!(6000));
        assert_eq!(d.journal().len(), 2);
        assert_eq!(d.equity().unwrap(), dec!(100000));
        assert_eq!(d.desk("MSFT").unwrap().positions().quantity("MSFT", PositionSide::Long), dec!(20));
    }

    #[test]
    fn unknown_symbol_is_reported() {
        let mut d = desk(EngineConfig::frictionless(), 3);
        let err = d
            .submit(OrderRequest::market("TSLA", OrderSide::Buy, dec!(1)), at())
            .unwrap_err();
        assert_eq!(err, EngineError::SymbolNotFound("TSLA".into()));
        assert!(d.process_ticks(&ticks(&[("TSLA", dec!(1))]), at()).is_err());
    }

    #[test]
    fn per_symbol_slippage_is_reproducible() {
        let run = |seed| {
            let mut d = desk(EngineConfig::default(), seed);
            for s in ["AAPL", "MSFT", "SPY"] {
                d.submit(OrderRequest::market(s, OrderSide::Buy, dec!(5)), at()).unwrap();
            }
            d.process_ticks(&ticks(&[("AAPL", dec!(150)), ("MSFT", dec!(300)), ("SPY", dec!(500))]), at())
                .unwrap();
            let mut fills: Vec<(String, Decimal)> =
                d.journal().trades().iter().map(|t| (t.symbol.clone(), t.price)).collect();
            fills.sort();
            fills
        };
        assert_eq!(run(11), run(11));
        assert_ne!(run(11), run(12));
    }

    #[test]
    fn inconsistent_tick_skips_only_that_symbol() {
        let mut d = desk(EngineConfig::frictionless(), 3);
        d.submit(OrderRequest::market("AAPL", OrderSide::Buy, dec!(1)), at()).unwrap();
        d.submit(OrderRequest::market("SPY", OrderSide::Buy, dec!(1)), at()).unwrap();
        let mut batch = ticks(&[("SPY", dec!(500))]);
        batch.insert(
            "AAPL".into(),
            PriceSnapshot {
                open: dec!(150),
                high: dec!(140),
                low: dec!(145),
                close: dec!(150),
            },
        );
        let report = d.process_ticks(&batch, at()).unwrap();
        assert_eq!(report.fills.len(), 1);
        assert_eq!(report.errors.len(), 1);
    }

    fn crowded_desk(capital: Decimal) -> (MultiSymbolDesk, BTreeMap<String, PriceSnapshot>) {
        let mut d = MultiSymbolDesk::new(EngineConfig::frictionless(), capital, 9).unwrap();
        let mut batch = BTreeMap::new();
        for i in 0..32 {
            let symbol = format!("S{i:02}");
            d.add_symbol(&symbol);
            d.submit(OrderRequest::market(&symbol, OrderSide::Buy, dec!(1)), at()).unwrap();
            batch.insert(symbol, PriceSnapshot::tick(dec!(100)));
        }
        (d, batch)
    }

    fn pool() -> rayon::ThreadPool {
        rayon::ThreadPoolBuilder::new().num_threads(8).build().unwrap()
    }

    #[test]
    fn journal_order_follows_symbol_order_on_many_threads() {
        let expected: Vec<String> = (0..32).map(|i| format!("S{i:02}")).collect();
        pool().install(|| {
            for _ in 0..50 {
                let (mut d, batch) = crowded_desk(dec!(100000));
                let report = d.process_ticks(&batch, at()).unwrap();
                let fills: Vec<String> = report.fills.iter().map(|t| t.symbol.clone()).collect();
                assert_eq!(fills, expected);

                let journal = d.journal();
                let symbols: Vec<String> = journal.trades().iter().map(|t| t.symbol.clone()).collect();
                assert_eq!(symbols, expected);
                let ids: Vec<u64> = journal.trades().iter().map(|t| t.id.0).collect();
                assert!(ids.windows(2).all(|w| w[0] < w[1]));
            }
        });
    }

    #[test]
    fn scarce_cash_goes_to_symbols_in_order() {
        pool().install(|| {
            for _ in 0..50 {
                // Cash for ten of the thirty-two buys.
                let (mut d, batch) = crowded_desk(dec!(1000));
                let report = d.process_ticks(&batch, at()).unwrap();
                let filled: Vec<String> = report.fills.iter().map(|t| t.symbol.clone()).collect();
                let expected: Vec<String> = (0..10).map(|i| format!("S{i:02}")).collect();
                assert_eq!(filled, expected);
                assert_eq!(report.rejected.len(), 22);
                assert!(report
                    .rejected
                    .iter()
                    .all(|r| r.failure.kind == crate::error::ErrorKind::InsufficientFunds));
                assert_eq!(d.account().cash, Decimal::ZERO);
                assert!(d.desk("S10").unwrap().orders().has_active_orders());
            }
        });
    }
}
