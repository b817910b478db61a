//! Property tests for engine invariants.
//!
//! Uses proptest to verify:
//! 1. No double fills: a Filled order cannot be filled again
//! 2. OCO exclusivity: at most one leg of a pair ever fills
//! 3. Submit/cancel identity: cancelling leaves the ledger untouched
//! 4. Ratchet monotonicity: trailing stops only tighten
//! 5. Ledger identity: once flat, cash equals capital plus realized P&L
//! 6. Determinism: the same seed replays the same trades

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use paperlab_core::backtest::{run_backtest, BacktestConfig, CancelToken, SmaCrossover};
use paperlab_core::config::{EngineConfig, PathPolicy};
use paperlab_core::domain::{Bar, OrderKind, OrderRequest, OrderSide, OrderStatus, PriceSnapshot};
use paperlab_core::engine::TradingSession;
use paperlab_core::orders::OrderBook;

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_quantity() -> impl Strategy<Value = Decimal> {
    (1i64..500).prop_map(Decimal::from)
}

/// Prices in cents between 10.00 and 500.00.
fn arb_price() -> impl Strategy<Value = Decimal> {
    (1_000i64..50_000).prop_map(|c| Decimal::new(c, 2))
}

fn arb_path() -> impl Strategy<Value = Vec<Decimal>> {
    prop::collection::vec(arb_price(), 1..40)
}

fn arb_policy() -> impl Strategy<Value = PathPolicy> {
    prop_oneof![
        Just(PathPolicy::WorstCase),
        Just(PathPolicy::BestCase),
        Just(PathPolicy::Deterministic),
    ]
}

fn t(i: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, 14, 0, 0).unwrap() + Duration::minutes(i)
}

fn session(config: EngineConfig) -> TradingSession {
    TradingSession::new(config, dec!(1000000), 5).unwrap()
}

// ── 1. No Double Fills ───────────────────────────────────────────────

proptest! {
    #[test]
    fn no_double_fill(qty in arb_quantity(), price in arb_price()) {
        let mut book = OrderBook::new();
        let id = book.submit(OrderRequest::market("SPY", OrderSide::Buy, qty), t(0), None).unwrap();
        prop_assert!(book.mark_filled(id, price, t(1)).is_ok());
        prop_assert!(book.mark_filled(id, price, t(2)).is_err());
        prop_assert_eq!(&book.get(id).unwrap().status, &OrderStatus::Filled);
    }
}

// ── 2. OCO Exclusivity ───────────────────────────────────────────────

proptest! {
    #[test]
    fn oco_never_fills_both(
        low_cents in 8_000i64..=10_000,
        high_cents in 10_000i64..=12_000,
        policy in arb_policy(),
    ) {
        let mut s = session(EngineConfig { path_policy: policy, ..EngineConfig::frictionless() });
        s.submit(OrderRequest::market("SPY", OrderSide::Buy, dec!(10)), t(0)).unwrap();
        s.on_price("SPY", &PriceSnapshot::tick(dec!(100)), t(0)).unwrap();

        let (sl, tp) = s.submit_oco(
            OrderRequest::stop("SPY", OrderSide::Sell, dec!(10), dec!(95)),
            OrderRequest::take_profit("SPY", OrderSide::Sell, dec!(10), dec!(105)),
            t(0),
        ).unwrap();
        let snapshot = PriceSnapshot {
            open: dec!(100),
            high: Decimal::new(high_cents, 2),
            low: Decimal::new(low_cents, 2),
            close: dec!(100),
        };
        let report = s.on_price("SPY", &snapshot, t(1)).unwrap();
        prop_assert!(report.fills.len() <= 1);

        let filled = [sl, tp]
            .iter()
            .filter(|id| s.orders().get(**id).unwrap().status == OrderStatus::Filled)
            .count();
        prop_assert!(filled <= 1);
        if filled == 1 {
            prop_assert!(!s.orders().has_active_orders());
        }
    }
}

// ── 3. Submit/Cancel Identity ────────────────────────────────────────

proptest! {
    #[test]
    fn submit_then_cancel_is_identity(qty in arb_quantity(), limit in arb_price()) {
        let mut s = session(EngineConfig::default());
        let before = s.account().clone();
        let id = s.submit(OrderRequest::limit("SPY", OrderSide::Buy, qty, limit), t(0)).unwrap();
        let cancelled = s.cancel(id, t(1)).unwrap();
        prop_assert_eq!(cancelled, vec![id]);
        prop_assert_eq!(s.account(), &before);
        prop_assert!(s.positions().is_empty());
        prop_assert!(!s.orders().has_active_orders());
        prop_assert!(s.trades().is_empty());
    }
}

// ── 4. Ratchet Monotonicity ──────────────────────────────────────────

fn trailing_stop(book: &OrderBook, id: paperlab_core::domain::OrderId) -> Decimal {
    match book.get(id).map(|o| &o.kind) {
        Some(OrderKind::TrailingStop { stop_price, .. }) => *stop_price,
        other => panic!("not a trailing stop: {other:?}"),
    }
}

proptest! {
    #[test]
    fn sell_trailing_stop_never_loosens(start in arb_price(), path in arb_path(), pct in 1i64..50) {
        let mut book = OrderBook::new();
        let req = OrderRequest::trailing_percent("SPY", OrderSide::Sell, dec!(1), Decimal::from(pct));
        let id = book.submit(req, t(0), Some(start)).unwrap();
        let mut previous = trailing_stop(&book, id);
        for price in path {
            book.update_trailing(id, price).unwrap();
            let stop = trailing_stop(&book, id);
            prop_assert!(stop >= previous, "stop loosened from {} to {}", previous, stop);
            previous = stop;
        }
    }

    #[test]
    fn buy_trailing_stop_never_loosens(start in arb_price(), path in arb_path(), cents in 1i64..500) {
        let mut book = OrderBook::new();
        let req = OrderRequest::trailing_amount("SPY", OrderSide::Buy, dec!(1), Decimal::new(cents, 2));
        let id = book.submit(req, t(0), Some(start)).unwrap();
        let mut previous = trailing_stop(&book, id);
        for price in path {
            book.update_trailing(id, price).unwrap();
            let stop = trailing_stop(&book, id);
            prop_assert!(stop <= previous, "stop loosened from {} to {}", previous, stop);
            previous = stop;
        }
    }
}

// ── 5. Ledger Identity ───────────────────────────────────────────────

proptest! {
    #[test]
    fn flat_account_cash_matches_realized(
        legs in prop::collection::vec((arb_quantity(), arb_price(), arb_price()), 1..8),
    ) {
        let config = EngineConfig {
            commission_rate: dec!(0.001),
            spread_rate: dec!(0.0004),
            slippage_stddev: Decimal::ZERO,
            ..EngineConfig::default()
        };
        let mut s = session(config);
        let mut clock = 0;
        for (qty, entry, exit) in legs {
            s.submit(OrderRequest::market("SPY", OrderSide::Buy, qty), t(clock)).unwrap();
            s.on_price("SPY", &PriceSnapshot::tick(entry), t(clock)).unwrap();
            clock += 1;
            s.submit(OrderRequest::market("SPY", OrderSide::Sell, qty), t(clock)).unwrap();
            s.on_price("SPY", &PriceSnapshot::tick(exit), t(clock)).unwrap();
            clock += 1;
        }
        prop_assert!(s.positions().is_empty());
        let account = s.account();
        prop_assert_eq!(account.cash, account.initial_capital + account.realized_pnl);
        prop_assert_eq!(s.equity().unwrap(), account.cash);
        let realized: Decimal = s.trades().iter().map(|t| t.realized_pnl).sum();
        prop_assert_eq!(realized, account.realized_pnl);
    }
}

// ── 6. Seed Determinism ──────────────────────────────────────────────

fn random_walk(steps: &[i64]) -> Vec<Bar> {
    let start = Utc.with_ymd_and_hms(2023, 1, 3, 21, 0, 0).unwrap();
    let mut close = dec!(100);
    steps
        .iter()
        .enumerate()
        .map(|(i, step)| {
            let open = close;
            close = (close + Decimal::new(*step, 2)).max(dec!(1));
            let high = open.max(close) + dec!(0.5);
            let low = (open.min(close) - dec!(0.5)).max(dec!(0.5));
            Bar::new(start + Duration::days(i as i64), open, high, low, close, dec!(1000))
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn same_seed_replays_identically(
        seed in any::<u64>(),
        steps in prop::collection::vec(-300i64..300, 30..80),
    ) {
        let bars = random_walk(&steps);
        let strategy = SmaCrossover::new(3, 10);
        let config = BacktestConfig { seed, stop_loss_pct: Some(dec!(4)), ..BacktestConfig::default() };
        let engine = EngineConfig::default();
        let a = run_backtest("SPY", &bars, &strategy, &engine, &config, &CancelToken::new()).unwrap();
        let b = run_backtest("SPY", &bars, &strategy, &engine, &config, &CancelToken::new()).unwrap();
        prop_assert_eq!(a.trades, b.trades);
        prop_assert_eq!(a.equity_curve, b.equity_curve);
    }
}
