//! Transaction records: commit and rollback hooks per touched row.
//!
//! The session owns at most one transaction with a begin-depth counter.
//! Every row created, loaded or written while it is active registers a
//! record capturing its pre-transaction state. Commit promotes overlays
//! into committed values; rollback discards overlays, reverts rowids
//! assigned inside the transaction, and re-reads committed values for rows
//! that were loaded under it.

use crate::row::Row;
use std::collections::HashSet;
use std::rc::Rc;

/// How a row first came to the transaction's attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecordKind {
    /// Created inside the transaction; a rollback unmakes it entirely.
    Created,
    /// Loaded from the database inside the transaction; a rollback re-reads
    /// its committed values.
    Loaded,
    /// Existed before the transaction; a rollback restores the saved flags.
    Touched,
}

/// Pre-transaction state of one row.
pub(crate) struct TxnRecord {
    pub(crate) row: Rc<Row>,
    pub(crate) kind: RecordKind,
    pub(crate) saved_rowid: Option<i64>,
    pub(crate) was_dirty: bool,
    pub(crate) was_deleted: bool,
}

/// The active transaction.
pub(crate) struct Txn {
    pub(crate) depth: u32,
    records: Vec<TxnRecord>,
    seen: HashSet<u64>,
}

impl Txn {
    pub(crate) fn new() -> Self {
        Self {
            depth: 1,
            records: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Record a row the first time it surfaces in this transaction. The
    /// first record wins; it captures the pre-transaction state.
    pub(crate) fn register(&mut self, row: &Rc<Row>, kind: RecordKind) {
        if !self.seen.insert(row.serial()) {
            return;
        }
        self.records.push(TxnRecord {
            row: Rc::clone(row),
            kind,
            saved_rowid: row.rowid(),
            was_dirty: row.dirty(),
            was_deleted: row.deleted(),
        });
    }

    pub(crate) fn into_records(self) -> Vec<TxnRecord> {
        self.records
    }
}

/// Promote one row's overlay after COMMIT.
pub(crate) fn commit_record(record: &TxnRecord) {
    let row = &record.row;
    row.promote_overlay();
    row.set_txn_dirty(false);
}

/// Restore one row's pre-transaction state after ROLLBACK.
pub(crate) fn rollback_record(record: &TxnRecord) -> rowmap_core::Result<()> {
    let row = &record.row;
    let entity = Rc::clone(row.entity());
    row.discard_overlay();
    row.set_txn_dirty(false);

    match record.kind {
        RecordKind::Created => {
            // The row never existed outside the transaction. Detach it from
            // every cache and poison it so stale references cannot flush.
            entity.uncache_row(row);
            entity.clear_dirty(row);
            row.set_rowid(None);
            row.set_deleted_flag(true);
        }
        RecordKind::Loaded => {
            row.set_deleted_flag(record.was_deleted);
            let rowid = record.saved_rowid.unwrap_or_default();
            row.set_rowid(record.saved_rowid);
            if !entity.reread(row, rowid)? {
                entity.clear_dirty(row);
                row.set_deleted_flag(true);
                return Ok(());
            }
            if record.was_dirty {
                entity.mark_dirty(row);
            } else {
                entity.clear_dirty(row);
            }
        }
        RecordKind::Touched => {
            // An INSERT issued inside the transaction was rolled back by the
            // engine; revert any rowid it assigned and restore the
            // pre-transaction cache entries.
            entity.uncache_row(row);
            row.set_rowid(record.saved_rowid);
            row.rebuild_lookups();
            entity.cache_row(row);
            row.set_deleted_flag(record.was_deleted);
            if record.was_dirty {
                entity.mark_dirty(row);
            } else {
                entity.clear_dirty(row);
            }
        }
    }
    Ok(())
}
