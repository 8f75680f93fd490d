use std::ops::{Deref, DerefMut};

use chrono::{DateTime, NaiveDate, Utc};

use crate::events::{LedgerEvent, Outbox};

use super::LedgerTables;

/// staged view of the ledger inside one unit of work
pub struct Transaction {
    tables: LedgerTables,
    outbox: Outbox,
    now: DateTime<Utc>,
}

impl Transaction {
    pub(crate) fn begin(tables: LedgerTables, now: DateTime<Utc>) -> Self {
        Self {
            tables,
            outbox: Outbox::new(),
            now,
        }
    }

    /// timestamp every write in this transaction is stamped with
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn today(&self) -> NaiveDate {
        self.now.date_naive()
    }

    /// queue an event for dispatch after commit
    pub fn emit(&mut self, event: LedgerEvent) {
        self.outbox.emit(event);
    }

    pub(crate) fn finish(mut self) -> (LedgerTables, Vec<LedgerEvent>) {
        let events = self.outbox.take_events();
        (self.tables, events)
    }
}

impl Deref for Transaction {
    type Target = LedgerTables;

    fn deref(&self) -> &LedgerTables {
        &self.tables
    }
}

impl DerefMut for Transaction {
    fn deref_mut(&mut self) -> &mut LedgerTables {
        &mut self.tables
    }
}

/// value produced by a committed transaction plus its outbox
#[derive(Debug)]
pub struct Committed<T> {
    pub value: T,
    pub events: Vec<LedgerEvent>,
}
