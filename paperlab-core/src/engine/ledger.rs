//! Access to the cross-symbol resources a fill commits to: the account and
//! the trade journal.
//!
//! A single session owns them outright. A multi-symbol desk shares them
//! behind mutexes and holds the locks only for the commit itself.

use crate::domain::{Account, TradeJournal};
use std::sync::{Arc, Mutex, PoisonError};

pub trait Ledger {
    /// Run `f` with exclusive access to the account and journal.
    fn with_ledger<T>(&mut self, f: impl FnOnce(&mut Account, &mut TradeJournal) -> T) -> T;
}

/// Borrowed, single-owner ledger.
pub struct LocalLedger<'a> {
    pub account: &'a mut Account,
    pub journal: &'a mut TradeJournal,
}

impl<'a> LocalLedger<'a> {
    pub fn new(account: &'a mut Account, journal: &'a mut TradeJournal) -> Self {
        Self { account, journal }
    }
}

impl Ledger for LocalLedger<'_> {
    fn with_ledger<T>(&mut self, f: impl FnOnce(&mut Account, &mut TradeJournal) -> T) -> T {
        f(self.account, self.journal)
    }
}

/// Mutex-protected ledger shared across symbol workers.
///
/// Locks are always taken account first, then journal.
#[derive(Debug, Clone)]
pub struct SharedLedger {
    pub account: Arc<Mutex<Account>>,
    pub journal: Arc<Mutex<TradeJournal>>,
}

impl SharedLedger {
    pub fn new(account: Account, journal: TradeJournal) -> Self {
        Self {
            account: Arc::new(Mutex::new(account)),
            journal: Arc::new(Mutex::new(journal)),
        }
    }

    /// Copy of the current account.
    pub fn account(&self) -> Account {
        self.account
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Copy of the current journal.
    pub fn journal(&self) -> TradeJournal {
        self.journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Ledger for SharedLedger {
    fn with_ledger<T>(&mut self, f: impl FnOnce(&mut Account, &mut TradeJournal) -> T) -> T {
        // A panicked holder cannot leave a half-applied fill: commits only
        // mutate after every check has passed.
        let mut account = self.account.lock().unwrap_or_else(PoisonError::into_inner);
        let mut journal = self.journal.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut account, &mut journal)
    }
}
