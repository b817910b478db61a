use serde::{Deserialize, Serialize};
use std::fmt;

/// Order ID. Unique and monotonic within one order book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderId(pub u64);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ORD-{:04}", self.0)
    }
}

/// Trade (fill) ID. Sequence number in the trade journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TradeId(pub u64);

impl fmt::Display for TradeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TRD-{:04}", self.0)
    }
}

/// Monotonic ID generator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdGen {
    next_order: u64,
}

impl IdGen {
    /// Resume after the highest ID already issued.
    pub fn starting_after(last: u64) -> Self {
        Self { next_order: last }
    }

    /// Highest ID issued so far, zero when none.
    pub fn last_issued(&self) -> u64 {
        self.next_order
    }

    pub fn next_order_id(&mut self) -> OrderId {
        self.next_order += 1;
        OrderId(self.next_order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_ids_are_monotonic() {
        let mut ids = IdGen::default();
        let a = ids.next_order_id();
        let b = ids.next_order_id();
        assert!(b > a);
        assert_eq!(a, OrderId(1));
    }

    #[test]
    fn display_is_zero_padded() {
        assert_eq!(OrderId(7).to_string(), "ORD-0007");
        assert_eq!(TradeId(12).to_string(), "TRD-0012");
    }

    #[test]
    fn resume_continues_sequence() {
        let mut ids = IdGen::starting_after(41);
        assert_eq!(ids.next_order_id(), OrderId(42));
    }
}
