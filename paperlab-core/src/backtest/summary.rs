//! Terminal statistics for a finished backtest.

use crate::decimal::{to_f64_lossy, try_sum, MoneyExt};
use crate::domain::Trade;
use crate::error::EngineError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Trading days per year for annualizing the Sharpe ratio.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// One point on the equity curve: cash plus marks at a bar's close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestSummary {
    pub initial_capital: Decimal,
    pub final_equity: Decimal,
    pub total_return_pct: Decimal,
    /// Return from the first to the last close of the replayed bars.
    pub buy_and_hold_return_pct: Decimal,
    /// Fills that reduced or closed a position.
    pub closed_trades: usize,
    pub win_rate_pct: Decimal,
    /// Gross wins over gross losses. `None` when nothing lost.
    pub profit_factor: Option<Decimal>,
    pub average_trade: Decimal,
    pub best_trade: Decimal,
    pub worst_trade: Decimal,
    pub total_pnl: Decimal,
    pub total_commissions: Decimal,
    pub max_drawdown_pct: Decimal,
    /// Annualized Sharpe ratio of per-bar equity returns (zero risk-free rate).
    pub sharpe: Option<f64>,
}

impl BacktestSummary {
    /// Compute the summary of a run.
    ///
    /// `first_close`/`last_close` are the closes of the first and last bars
    /// replayed, for the buy-and-hold benchmark.
    pub fn compute(
        initial_capital: Decimal,
        equity_curve: &[EquityPoint],
        trades: &[Trade],
        first_close: Option<Decimal>,
        last_close: Option<Decimal>,
    ) -> Result<Self, EngineError> {
        let final_equity = equity_curve.last().map(|p| p.equity).unwrap_or(initial_capital);
        let total_return_pct = pct_change(initial_capital, final_equity)?;
        let buy_and_hold_return_pct = match (first_close, last_close) {
            (Some(first), Some(last)) => pct_change(first, last)?,
            _ => Decimal::ZERO,
        };

        let pnls: Vec<Decimal> = trades
            .iter()
            .filter(|t| !t.opens_position)
            .map(|t| t.realized_pnl)
            .collect();
        let wins: Vec<Decimal> = pnls.iter().copied().filter(|p| *p > Decimal::ZERO).collect();
        let losses: Vec<Decimal> = pnls.iter().copied().filter(|p| *p < Decimal::ZERO).collect();

        let total_pnl = try_sum(pnls.iter().copied())?;
        let gross_win = try_sum(wins.iter().copied())?;
        let gross_loss = try_sum(losses.iter().copied())?.abs();
        let (win_rate_pct, average_trade) = if pnls.is_empty() {
            (Decimal::ZERO, Decimal::ZERO)
        } else {
            let n = Decimal::from(pnls.len());
            (
                Decimal::from(wins.len()).try_div(n)?.try_mul(dec!(100))?,
                total_pnl.try_div(n)?,
            )
        };
        let profit_factor = if losses.is_empty() {
            None
        } else {
            Some(gross_win.try_div(gross_loss)?)
        };

        Ok(Self {
            initial_capital,
            final_equity,
            total_return_pct,
            buy_and_hold_return_pct,
            closed_trades: pnls.len(),
            win_rate_pct,
            profit_factor,
            average_trade,
            best_trade: pnls.iter().copied().max().unwrap_or(Decimal::ZERO),
            worst_trade: pnls.iter().copied().min().unwrap_or(Decimal::ZERO),
            total_pnl,
            total_commissions: try_sum(trades.iter().map(|t| t.commission))?,
            max_drawdown_pct: max_drawdown_pct(equity_curve)?,
            sharpe: sharpe(equity_curve),
        })
    }
}

fn pct_change(from: Decimal, to: Decimal) -> Result<Decimal, EngineError> {
    Ok(to.try_div(from)?.try_sub(Decimal::ONE)?.try_mul(dec!(100))?)
}

/// Largest peak-to-trough decline, in percent of the peak.
pub fn max_drawdown_pct(curve: &[EquityPoint]) -> Result<Decimal, EngineError> {
    let Some(first) = curve.first() else {
        return Ok(Decimal::ZERO);
    };
    let mut peak = first.equity;
    let mut worst = Decimal::ZERO;
    for point in curve {
        peak = peak.max(point.equity);
        if peak > Decimal::ZERO {
            let dd = peak.try_sub(point.equity)?.try_div(peak)?.try_mul(dec!(100))?;
            worst = worst.max(dd);
        }
    }
    Ok(worst)
}

/// Annualized Sharpe of bar-to-bar equity returns. `None` with fewer than
/// two returns or zero variance.
pub fn sharpe(curve: &[EquityPoint]) -> Option<f64> {
    let returns: Vec<f64> = curve
        .windows(2)
        .filter_map(|w| {
            let prev = to_f64_lossy(w[0].equity);
            let next = to_f64_lossy(w[1].equity);
            (prev != 0.0).then(|| next / prev - 1.0)
        })
        .collect();
    if returns.len() < 2 {
        return None;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std = variance.sqrt();
    if std == 0.0 || !std.is_finite() {
        return None;
    }
    Some(mean / std * TRADING_DAYS_PER_YEAR.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OrderId, OrderSide, PositionSide, TradeId};
    use chrono::{Duration, TimeZone};

    fn curve(values: &[Decimal]) -> Vec<EquityPoint> {
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 21, 0, 0).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, v)| EquityPoint {
                timestamp: start + Duration::days(i as i64),
                equity: *v,
            })
            .collect()
    }

    fn closing(pnl: Decimal) -> Trade {
        Trade {
            id: TradeId(1),
            order_id: OrderId(1),
            symbol: "SPY".into(),
            side: OrderSide::Sell,
            position_side: PositionSide::Long,
            quantity: dec!(1),
            price: dec!(100),
            reference_price: dec!(100),
            commission: dec!(1),
            slippage_applied: Decimal::ZERO,
            spread_applied: Decimal::ZERO,
            realized_pnl: pnl,
            opens_position: false,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 3, 21, 0, 0).unwrap(),
            note: String::new(),
            tags: vec![],
        }
    }

    #[test]
    fn drawdown_measures_from_peak() {
        let c = curve(&[dec!(100), dec!(120), dec!(90), dec!(130)]);
        assert_eq!(max_drawdown_pct(&c).unwrap(), dec!(25));
    }

    #[test]
    fn trade_statistics() {
        let trades = vec![closing(dec!(30)), closing(dec!(-10)), closing(dec!(20))];
        let c = curve(&[dec!(1000), dec!(1040)]);
        let s = BacktestSummary::compute(dec!(1000), &c, &trades, Some(dec!(50)), Some(dec!(55))).unwrap();
        assert_eq!(s.closed_trades, 3);
        assert_eq!(s.total_pnl, dec!(40));
        assert_eq!(s.profit_factor, Some(dec!(5)));
        assert_eq!(s.best_trade, dec!(30));
        assert_eq!(s.worst_trade, dec!(-10));
        assert_eq!(s.total_return_pct, dec!(4));
        assert_eq!(s.buy_and_hold_return_pct, dec!(10));
        assert_eq!(s.total_commissions, dec!(3));
    }

    #[test]
    fn flat_curve_has_no_sharpe() {
        assert_eq!(sharpe(&curve(&[dec!(100), dec!(100), dec!(100)])), None);
        assert!(sharpe(&curve(&[dec!(100), dec!(101), dec!(100.5), dec!(102)])).is_some());
    }
}
