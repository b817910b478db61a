//! Order types: the request shape users submit, the validated closed order kind,
//! and the order record the order book owns.

use super::ids::OrderId;
use super::instrument::{Instrument, OptionContract};
use super::position::PositionSide;
use crate::decimal::MoneyExt;
use crate::error::EngineError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeInForce {
    #[default]
    GoodTillCancelled,
    /// Expires at session end.
    Day,
}

/// Trailing distance: a percentage of the water mark or a fixed price amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrailSpec {
    Percent(Decimal),
    Amount(Decimal),
}

impl TrailSpec {
    /// Stop level implied by a water mark. Sell stops trail below, buy stops above.
    pub fn stop_for(&self, side: OrderSide, water_mark: Decimal) -> Result<Decimal, EngineError> {
        let distance = match *self {
            Self::Percent(pct) => water_mark.try_mul(pct)?.try_div(dec!(100))?,
            Self::Amount(amount) => amount,
        };
        let stop = match side {
            OrderSide::Sell => water_mark.try_sub(distance)?,
            OrderSide::Buy => water_mark.try_add(distance)?,
        };
        Ok(stop)
    }
}

/// Order kind as named in a request (no parameters).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKindTag {
    Market,
    Limit,
    Stop,
    StopLimit,
    TrailingStop,
    TakeProfit,
}

/// Validated order kind with exactly the parameters it needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OrderKind {
    /// Fills on the next available price.
    Market,
    /// Fills at the limit when the market trades through it.
    Limit { limit_price: Decimal },
    /// Becomes a market order once the stop level trades.
    Stop { stop_price: Decimal },
    /// Triggers at the stop, then rests as a limit.
    StopLimit {
        stop_price: Decimal,
        limit_price: Decimal,
    },
    /// Stop whose level ratchets behind the best price seen.
    TrailingStop {
        trail: TrailSpec,
        stop_price: Decimal,
        water_mark: Decimal,
    },
    /// Profit-taking limit on an open position.
    TakeProfit { limit_price: Decimal },
}

impl OrderKind {
    pub fn tag(&self) -> OrderKindTag {
        match self {
            Self::Market => OrderKindTag::Market,
            Self::Limit { .. } => OrderKindTag::Limit,
            Self::Stop { .. } => OrderKindTag::Stop,
            Self::StopLimit { .. } => OrderKindTag::StopLimit,
            Self::TrailingStop { .. } => OrderKindTag::TrailingStop,
            Self::TakeProfit { .. } => OrderKindTag::TakeProfit,
        }
    }

    /// Stop-style kinds protect against adverse moves; the rest are favorable exits or entries.
    pub fn is_stop_like(&self) -> bool {
        matches!(
            self,
            Self::Stop { .. } | Self::StopLimit { .. } | Self::TrailingStop { .. }
        )
    }

    /// Validate a request into a closed kind.
    ///
    /// `reference_price` is the current market price, when known. It is required
    /// to seed a trailing stop and is used to reject stops and take-profits on
    /// the wrong side of the market.
    pub fn from_request(
        req: &OrderRequest,
        reference_price: Option<Decimal>,
    ) -> Result<Self, EngineError> {
        let has_trail = req.trail_percent.is_some() || req.trail_amount.is_some();
        let side = req.side;

        let forbid = |field: &str, present: bool| -> Result<(), EngineError> {
            if present {
                Err(EngineError::invalid(format!(
                    "{:?} order must not carry {field}",
                    req.kind
                )))
            } else {
                Ok(())
            }
        };
        let require_positive = |field: &str, value: Option<Decimal>| -> Result<Decimal, EngineError> {
            match value {
                Some(v) if v > Decimal::ZERO => Ok(v),
                Some(v) => Err(EngineError::invalid(format!("{field} must be positive, got {v}"))),
                None => Err(EngineError::invalid(format!("{:?} order requires {field}", req.kind))),
            }
        };

        match req.kind {
            OrderKindTag::Market => {
                forbid("limit_price", req.limit_price.is_some())?;
                forbid("stop_price", req.stop_price.is_some())?;
                forbid("a trail", has_trail)?;
                Ok(Self::Market)
            }
            OrderKindTag::Limit => {
                forbid("stop_price", req.stop_price.is_some())?;
                forbid("a trail", has_trail)?;
                let limit_price = require_positive("limit_price", req.limit_price)?;
                Ok(Self::Limit { limit_price })
            }
            OrderKindTag::Stop => {
                forbid("limit_price", req.limit_price.is_some())?;
                forbid("a trail", has_trail)?;
                let stop_price = require_positive("stop_price", req.stop_price)?;
                check_stop_side(side, stop_price, reference_price)?;
                Ok(Self::Stop { stop_price })
            }
            OrderKindTag::StopLimit => {
                forbid("a trail", has_trail)?;
                let stop_price = require_positive("stop_price", req.stop_price)?;
                let limit_price = require_positive("limit_price", req.limit_price)?;
                check_stop_side(side, stop_price, reference_price)?;
                Ok(Self::StopLimit {
                    stop_price,
                    limit_price,
                })
            }
            OrderKindTag::TrailingStop => {
                forbid("limit_price", req.limit_price.is_some())?;
                forbid("stop_price", req.stop_price.is_some())?;
                let trail = match (req.trail_percent, req.trail_amount) {
                    (Some(_), Some(_)) => {
                        return Err(EngineError::invalid(
                            "trailing stop takes a percentage or an amount, not both",
                        ))
                    }
                    (None, None) => {
                        return Err(EngineError::invalid(
                            "trailing stop requires trail_percent or trail_amount",
                        ))
                    }
                    (Some(pct), None) => {
                        if pct <= Decimal::ZERO || pct >= dec!(100) {
                            return Err(EngineError::invalid(format!(
                                "trail_percent must be in (0, 100), got {pct}"
                            )));
                        }
                        TrailSpec::Percent(pct)
                    }
                    (None, Some(amount)) => {
                        if amount <= Decimal::ZERO {
                            return Err(EngineError::invalid(format!(
                                "trail_amount must be positive, got {amount}"
                            )));
                        }
                        TrailSpec::Amount(amount)
                    }
                };
                let water_mark = reference_price.ok_or_else(|| {
                    EngineError::invalid("trailing stop requires a current market price")
                })?;
                let stop_price = trail.stop_for(side, water_mark)?;
                if stop_price <= Decimal::ZERO {
                    return Err(EngineError::invalid(format!(
                        "trail places the stop at {stop_price}, below zero"
                    )));
                }
                Ok(Self::TrailingStop {
                    trail,
                    stop_price,
                    water_mark,
                })
            }
            OrderKindTag::TakeProfit => {
                forbid("stop_price", req.stop_price.is_some())?;
                forbid("a trail", has_trail)?;
                let limit_price = require_positive("limit_price", req.limit_price)?;
                if let Some(reference) = reference_price {
                    let wrong_side = match side {
                        OrderSide::Sell => limit_price <= reference,
                        OrderSide::Buy => limit_price >= reference,
                    };
                    if wrong_side {
                        return Err(EngineError::invalid(format!(
                            "{side:?} take-profit at {limit_price} is already through the market at {reference}"
                        )));
                    }
                }
                Ok(Self::TakeProfit { limit_price })
            }
        }
    }
}

/// A sell stop must sit below the market, a buy stop above it.
fn check_stop_side(
    side: OrderSide,
    stop_price: Decimal,
    reference_price: Option<Decimal>,
) -> Result<(), EngineError> {
    let Some(reference) = reference_price else {
        return Ok(());
    };
    let wrong_side = match side {
        OrderSide::Sell => stop_price >= reference,
        OrderSide::Buy => stop_price <= reference,
    };
    if wrong_side {
        return Err(EngineError::invalid(format!(
            "{side:?} stop at {stop_price} is on the wrong side of the market at {reference}"
        )));
    }
    Ok(())
}

/// An order as submitted by a user or strategy, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    /// Which book the order acts on: buy+long opens, sell+long closes,
    /// sell+short opens a short sale, buy+short covers.
    #[serde(default = "default_position_side")]
    pub position_side: PositionSide,
    pub kind: OrderKindTag,
    pub quantity: Decimal,
    #[serde(default)]
    pub limit_price: Option<Decimal>,
    #[serde(default)]
    pub stop_price: Option<Decimal>,
    #[serde(default)]
    pub trail_percent: Option<Decimal>,
    #[serde(default)]
    pub trail_amount: Option<Decimal>,
    #[serde(default)]
    pub time_in_force: TimeInForce,
    #[serde(default)]
    pub instrument: Instrument,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_position_side() -> PositionSide {
    PositionSide::Long
}

impl OrderRequest {
    fn base(symbol: impl Into<String>, side: OrderSide, kind: OrderKindTag, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            position_side: PositionSide::Long,
            kind,
            quantity,
            limit_price: None,
            stop_price: None,
            trail_percent: None,
            trail_amount: None,
            time_in_force: TimeInForce::GoodTillCancelled,
            instrument: Instrument::Equity,
            note: String::new(),
            tags: Vec::new(),
        }
    }

    pub fn market(symbol: impl Into<String>, side: OrderSide, quantity: Decimal) -> Self {
        Self::base(symbol, side, OrderKindTag::Market, quantity)
    }

    pub fn limit(symbol: impl Into<String>, side: OrderSide, quantity: Decimal, limit_price: Decimal) -> Self {
        Self {
            limit_price: Some(limit_price),
            ..Self::base(symbol, side, OrderKindTag::Limit, quantity)
        }
    }

    pub fn stop(symbol: impl Into<String>, side: OrderSide, quantity: Decimal, stop_price: Decimal) -> Self {
        Self {
            stop_price: Some(stop_price),
            ..Self::base(symbol, side, OrderKindTag::Stop, quantity)
        }
    }

    pub fn stop_limit(
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: Decimal,
        stop_price: Decimal,
        limit_price: Decimal,
    ) -> Self {
        Self {
            stop_price: Some(stop_price),
            limit_price: Some(limit_price),
            ..Self::base(symbol, side, OrderKindTag::StopLimit, quantity)
        }
    }

    pub fn trailing_percent(symbol: impl Into<String>, side: OrderSide, quantity: Decimal, pct: Decimal) -> Self {
        Self {
            trail_percent: Some(pct),
            ..Self::base(symbol, side, OrderKindTag::TrailingStop, quantity)
        }
    }

    pub fn trailing_amount(symbol: impl Into<String>, side: OrderSide, quantity: Decimal, amount: Decimal) -> Self {
        Self {
            trail_amount: Some(amount),
            ..Self::base(symbol, side, OrderKindTag::TrailingStop, quantity)
        }
    }

    pub fn take_profit(symbol: impl Into<String>, side: OrderSide, quantity: Decimal, limit_price: Decimal) -> Self {
        Self {
            limit_price: Some(limit_price),
            ..Self::base(symbol, side, OrderKindTag::TakeProfit, quantity)
        }
    }

    /// Act on the short book (short sale or cover).
    pub fn short(mut self) -> Self {
        self.position_side = PositionSide::Short;
        self
    }

    pub fn day(mut self) -> Self {
        self.time_in_force = TimeInForce::Day;
        self
    }

    pub fn option(mut self, contract: OptionContract) -> Self {
        self.instrument = Instrument::Option(contract);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = note.into();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Whether the order adds to (rather than reduces) the position it targets.
    pub fn opens_position(&self) -> bool {
        opens_position(self.side, self.position_side)
    }
}

/// Buy+long and sell+short open exposure; the other two combinations reduce it.
pub fn opens_position(side: OrderSide, position_side: PositionSide) -> bool {
    matches!(
        (side, position_side),
        (OrderSide::Buy, PositionSide::Long) | (OrderSide::Sell, PositionSide::Short)
    )
}

/// Order lifecycle states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OrderStatus {
    /// Waiting to be triggered or filled.
    Pending,
    /// Trigger level crossed; a stop-limit waits here for its limit.
    Triggered,
    /// Completely filled.
    Filled,
    /// Cancelled with a reason (OCO sibling filled, user cancel, bracket entry cancelled).
    Cancelled { reason: String },
    /// Expired (day order at session end).
    Expired,
}

impl OrderStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Triggered => "triggered",
            Self::Filled => "filled",
            Self::Cancelled { .. } => "cancelled",
            Self::Expired => "expired",
        }
    }
}

/// A single order in the order book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub symbol: String,
    pub side: OrderSide,
    pub position_side: PositionSide,
    pub kind: OrderKind,
    pub quantity: Decimal,
    pub time_in_force: TimeInForce,
    pub instrument: Instrument,
    pub status: OrderStatus,
    /// OCO sibling, if any.
    pub linked_order_id: Option<OrderId>,
    /// Bracket entry this order protects, if any.
    pub parent_id: Option<OrderId>,
    pub created_at: DateTime<Utc>,
    /// When the order became eligible to trigger. Bracket legs activate when
    /// their entry fills; everything else at creation.
    pub activated_at: Option<DateTime<Utc>>,
    pub filled_at: Option<DateTime<Utc>>,
    pub fill_price: Option<Decimal>,
    pub note: String,
    pub tags: Vec<String>,
}

impl Order {
    pub fn is_active(&self) -> bool {
        matches!(self.status, OrderStatus::Pending | OrderStatus::Triggered)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// Active and eligible to trigger. Dormant bracket legs are active but not working.
    pub fn is_working(&self) -> bool {
        self.is_active() && self.activated_at.is_some()
    }

    pub fn opens_position(&self) -> bool {
        opens_position(self.side, self.position_side)
    }

    /// The stop or limit level that triggers this order, if it has one.
    pub fn trigger_level(&self) -> Option<Decimal> {
        match &self.kind {
            OrderKind::Market => None,
            OrderKind::Limit { limit_price } | OrderKind::TakeProfit { limit_price } => {
                Some(*limit_price)
            }
            OrderKind::Stop { stop_price }
            | OrderKind::StopLimit { stop_price, .. }
            | OrderKind::TrailingStop { stop_price, .. } => Some(*stop_price),
        }
    }
}

/// One status transition in the order book's audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAuditEntry {
    pub order_id: OrderId,
    pub at: DateTime<Utc>,
    /// `None` when the order was created.
    pub from: Option<OrderStatus>,
    pub to: OrderStatus,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn market_request_rejects_limit_price() {
        let mut req = OrderRequest::market("SPY", OrderSide::Buy, dec!(10));
        req.limit_price = Some(dec!(100));
        let err = OrderKind::from_request(&req, None).unwrap_err();
        assert!(matches!(err, EngineError::InvalidOrderSpec(_)));
    }

    #[test]
    fn limit_requires_positive_price() {
        let req = OrderRequest::limit("SPY", OrderSide::Buy, dec!(10), dec!(-1));
        assert!(OrderKind::from_request(&req, None).is_err());

        let req = OrderRequest::limit("SPY", OrderSide::Buy, dec!(10), dec!(100));
        assert_eq!(
            OrderKind::from_request(&req, None).unwrap(),
            OrderKind::Limit {
                limit_price: dec!(100)
            }
        );
    }

    #[test]
    fn sell_stop_above_market_is_rejected() {
        let req = OrderRequest::stop("SPY", OrderSide::Sell, dec!(10), dec!(105));
        assert!(OrderKind::from_request(&req, Some(dec!(100))).is_err());
        assert!(OrderKind::from_request(&req, Some(dec!(110))).is_ok());
    }

    #[test]
    fn buy_stop_below_market_is_rejected() {
        let req = OrderRequest::stop("SPY", OrderSide::Buy, dec!(10), dec!(95));
        assert!(OrderKind::from_request(&req, Some(dec!(100))).is_err());
    }

    #[test]
    fn trailing_requires_exactly_one_spec() {
        let mut req = OrderRequest::trailing_percent("SPY", OrderSide::Sell, dec!(10), dec!(5));
        req.trail_amount = Some(dec!(2));
        assert!(OrderKind::from_request(&req, Some(dec!(100))).is_err());

        req.trail_percent = None;
        req.trail_amount = None;
        assert!(OrderKind::from_request(&req, Some(dec!(100))).is_err());
    }

    #[test]
    fn trailing_percent_seeds_stop_below_market() {
        let req = OrderRequest::trailing_percent("SPY", OrderSide::Sell, dec!(10), dec!(5));
        let kind = OrderKind::from_request(&req, Some(dec!(100))).unwrap();
        assert_eq!(
            kind,
            OrderKind::TrailingStop {
                trail: TrailSpec::Percent(dec!(5)),
                stop_price: dec!(95),
                water_mark: dec!(100),
            }
        );
    }

    #[test]
    fn trailing_amount_for_short_trails_above() {
        let req = OrderRequest::trailing_amount("SPY", OrderSide::Buy, dec!(10), dec!(3)).short();
        let kind = OrderKind::from_request(&req, Some(dec!(50))).unwrap();
        assert!(matches!(kind, OrderKind::TrailingStop { stop_price, .. } if stop_price == dec!(53)));
    }

    #[test]
    fn trailing_without_reference_price_is_rejected() {
        let req = OrderRequest::trailing_percent("SPY", OrderSide::Sell, dec!(10), dec!(5));
        assert!(OrderKind::from_request(&req, None).is_err());
    }

    #[test]
    fn take_profit_must_be_beyond_market() {
        let req = OrderRequest::take_profit("SPY", OrderSide::Sell, dec!(10), dec!(99));
        assert!(OrderKind::from_request(&req, Some(dec!(100))).is_err());
        let req = OrderRequest::take_profit("SPY", OrderSide::Sell, dec!(10), dec!(110));
        assert!(OrderKind::from_request(&req, Some(dec!(100))).is_ok());
    }

    #[test]
    fn opens_position_matrix() {
        assert!(opens_position(OrderSide::Buy, PositionSide::Long));
        assert!(!opens_position(OrderSide::Sell, PositionSide::Long));
        assert!(opens_position(OrderSide::Sell, PositionSide::Short));
        assert!(!opens_position(OrderSide::Buy, PositionSide::Short));
    }

    #[test]
    fn request_deserializes_with_defaults() {
        let json = r#"{"symbol":"SPY","side":"buy","kind":"limit","quantity":"10","limit_price":"99.5"}"#;
        let req: OrderRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.position_side, PositionSide::Long);
        assert_eq!(req.time_in_force, TimeInForce::GoodTillCancelled);
        assert_eq!(req.limit_price, Some(dec!(99.5)));
    }
}
