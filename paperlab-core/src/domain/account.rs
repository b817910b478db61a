//! Account ledger: cash, cumulative realized P&L and commission totals.

use super::position::PositionBook;
use crate::decimal::{ArithmeticError, MoneyExt};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Cash ledger. Only the execution engine mutates it, at fill time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub initial_capital: Decimal,
    pub cash: Decimal,
    pub realized_pnl: Decimal,
    pub commissions_paid: Decimal,
    /// Collateral currently held against shorts across all books.
    pub margin_reserved: Decimal,
}

impl Account {
    pub fn new(initial_capital: Decimal) -> Self {
        Self {
            initial_capital,
            cash: initial_capital,
            realized_pnl: Decimal::ZERO,
            commissions_paid: Decimal::ZERO,
            margin_reserved: Decimal::ZERO,
        }
    }

    /// Cash plus the mark value of every open position in `book`.
    pub fn equity(&self, book: &PositionBook) -> Result<Decimal, ArithmeticError> {
        self.cash.try_add(book.market_value()?)
    }

    /// Apply a committed fill. Callers check the resulting cash first.
    pub(crate) fn apply(&mut self, delta: &LedgerDelta) {
        self.cash = delta.cash_after;
        self.realized_pnl = delta.realized_after;
        self.commissions_paid = delta.commissions_after;
        self.margin_reserved = delta.margin_after;
    }
}

/// Post-fill ledger values, computed before anything is mutated.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LedgerDelta {
    pub cash_after: Decimal,
    pub realized_after: Decimal,
    pub commissions_after: Decimal,
    pub margin_after: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn new_account_is_all_cash() {
        let account = Account::new(dec!(100000));
        assert_eq!(account.cash, dec!(100000));
        assert_eq!(account.equity(&PositionBook::new()).unwrap(), dec!(100000));
        assert_eq!(account.realized_pnl, Decimal::ZERO);
    }
}
