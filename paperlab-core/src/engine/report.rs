//! Per-event results: fills, rejections and informational warnings.

use crate::config::{EngineConfig, Goals};
use crate::decimal::MoneyExt;
use crate::domain::{OrderId, Trade, TradeJournal};
use crate::error::{EngineError, Failure};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Informational signals. The engine never acts on them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "warning", rename_all = "snake_case")]
pub enum EngineWarning {
    /// Equity fell below the maintenance threshold relative to short margin.
    MarginCall {
        equity: Decimal,
        margin_used: Decimal,
        threshold: Decimal,
    },
    DailyTradeLimit {
        date: NaiveDate,
        trades: u32,
        limit: u32,
    },
    DailyLossLimit {
        date: NaiveDate,
        loss: Decimal,
        limit: Decimal,
    },
}

/// An order that could not fill on this event. The order stays in the book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    pub order_id: OrderId,
    pub failure: Failure,
}

/// Everything that happened while processing one price event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventReport {
    pub fills: Vec<Trade>,
    pub rejected: Vec<Rejection>,
    /// Stop-limits armed by this event.
    pub triggered: Vec<OrderId>,
    /// OCO siblings cancelled by fills.
    pub cancelled: Vec<OrderId>,
    /// Bracket legs activated by fills.
    pub activated: Vec<OrderId>,
    pub expired: Vec<OrderId>,
    pub warnings: Vec<EngineWarning>,
    /// Event-level failures not tied to one order (e.g. option marking).
    pub errors: Vec<Failure>,
}

impl EventReport {
    pub fn is_empty(&self) -> bool {
        self.fills.is_empty()
            && self.rejected.is_empty()
            && self.triggered.is_empty()
            && self.cancelled.is_empty()
            && self.activated.is_empty()
            && self.expired.is_empty()
            && self.warnings.is_empty()
            && self.errors.is_empty()
    }

    pub(crate) fn reject(&mut self, order_id: OrderId, err: &EngineError) {
        warn!(order = %order_id, error = %err, "fill rejected");
        self.rejected.push(Rejection {
            order_id,
            failure: Failure::from(err),
        });
    }

    pub fn merge(&mut self, other: EventReport) {
        self.fills.extend(other.fills);
        self.rejected.extend(other.rejected);
        self.triggered.extend(other.triggered);
        self.cancelled.extend(other.cancelled);
        self.activated.extend(other.activated);
        self.expired.extend(other.expired);
        self.warnings.extend(other.warnings);
        self.errors.extend(other.errors);
    }

    pub fn touched_short(&self) -> bool {
        self.fills
            .iter()
            .any(|t| t.position_side == crate::domain::PositionSide::Short)
    }
}

/// Margin call when `equity < threshold × margin_used`. Silent with no shorts open.
pub fn margin_call(config: &EngineConfig, equity: Decimal, margin_used: Decimal) -> Result<Option<EngineWarning>, EngineError> {
    if margin_used <= Decimal::ZERO {
        return Ok(None);
    }
    let floor = margin_used.try_mul(config.maintenance_margin_threshold)?;
    if equity < floor {
        warn!(%equity, %margin_used, "margin call");
        return Ok(Some(EngineWarning::MarginCall {
            equity,
            margin_used,
            threshold: config.maintenance_margin_threshold,
        }));
    }
    Ok(None)
}

/// Discipline-goal breaches caused by `new_fills`.
///
/// A limit is reported once per day, on the fill that crosses it.
pub fn goal_breaches(goals: &Goals, journal: &TradeJournal, new_fills: &[Trade]) -> Result<Vec<EngineWarning>, EngineError> {
    let mut warnings = Vec::new();
    let mut dates: Vec<NaiveDate> = new_fills.iter().map(|t| t.timestamp.date_naive()).collect();
    dates.dedup();

    for date in dates {
        let todays: Vec<&Trade> = journal
            .trades()
            .iter()
            .filter(|t| t.timestamp.date_naive() == date)
            .collect();
        let new_today = new_fills
            .iter()
            .filter(|t| t.timestamp.date_naive() == date)
            .count();
        let before = todays.len().saturating_sub(new_today);

        if let Some(limit) = goals.daily_max_trades {
            let limit_usize = limit as usize;
            if todays.len() > limit_usize && before <= limit_usize {
                warn!(%date, trades = todays.len(), limit, "daily trade limit exceeded");
                warnings.push(EngineWarning::DailyTradeLimit {
                    date,
                    trades: todays.len() as u32,
                    limit,
                });
            }
        }

        if let Some(limit) = goals.daily_max_loss {
            let pnl_all = crate::decimal::try_sum(todays.iter().map(|t| t.realized_pnl))?;
            let pnl_before = crate::decimal::try_sum(
                todays[..before].iter().map(|t| t.realized_pnl),
            )?;
            let loss = Decimal::ZERO.try_sub(pnl_all)?;
            let loss_before = Decimal::ZERO.try_sub(pnl_before)?;
            if loss > limit && loss_before <= limit {
                warn!(%date, %loss, %limit, "daily loss limit exceeded");
                warnings.push(EngineWarning::DailyLossLimit { date, loss, limit });
            }
        }
    }
    Ok(warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OrderSide, PositionSide, TradeId};
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn trade(pnl: Decimal) -> Trade {
        Trade {
            id: TradeId(0),
            order_id: OrderId(1),
            symbol: "SPY".into(),
            side: OrderSide::Sell,
            position_side: PositionSide::Long,
            quantity: dec!(1),
            price: dec!(100),
            reference_price: dec!(100),
            commission: Decimal::ZERO,
            slippage_applied: Decimal::ZERO,
            spread_applied: Decimal::ZERO,
            realized_pnl: pnl,
            opens_position: false,
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 15, 0, 0).unwrap(),
            note: String::new(),
            tags: vec![],
        }
    }

    #[test]
    fn margin_call_below_threshold() {
        let config = EngineConfig::default();
        assert!(margin_call(&config, dec!(1000), dec!(1500)).unwrap().is_none());
        let warning = margin_call(&config, dec!(300), dec!(1500)).unwrap();
        assert!(matches!(warning, Some(EngineWarning::MarginCall { .. })));
        assert!(margin_call(&config, dec!(-5), Decimal::ZERO).unwrap().is_none());
    }

    #[test]
    fn trade_limit_reported_once_when_crossed() {
        let goals = Goals {
            daily_max_trades: Some(2),
            daily_max_loss: None,
        };
        let mut journal = TradeJournal::new();
        for _ in 0..2 {
            journal.append(trade(Decimal::ZERO));
        }
        let third = trade(Decimal::ZERO);
        journal.append(third.clone());
        let warnings = goal_breaches(&goals, &journal, std::slice::from_ref(&third)).unwrap();
        assert_eq!(warnings.len(), 1);

        let fourth = trade(Decimal::ZERO);
        journal.append(fourth.clone());
        assert!(goal_breaches(&goals, &journal, &[fourth]).unwrap().is_empty());
    }

    #[test]
    fn loss_limit_uses_realized_pnl() {
        let goals = Goals {
            daily_max_trades: None,
            daily_max_loss: Some(dec!(500)),
        };
        let mut journal = TradeJournal::new();
        let loser = trade(dec!(-600));
        journal.append(loser.clone());
        let warnings = goal_breaches(&goals, &journal, &[loser]).unwrap();
        assert!(matches!(
            warnings.as_slice(),
            [EngineWarning::DailyLossLimit { loss, .. }] if *loss == dec!(600)
        ));
    }
}
