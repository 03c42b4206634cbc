//! The flush engine: a topological two-phase drain of dirty rows.
//!
//! The drain is intentionally agnostic of declared dependency order, which
//! is incomplete for non-required foreign keys. Passes alternate a
//! `skip_fkeys` flag: on a skip pass, a non-required reference to a
//! not-yet-inserted row binds NULL and leaves the row partially flushed; a
//! required one defers the whole row to a later pass. The drain stops when
//! a non-skip pass leaves nothing dirty, and fails when such a pass makes
//! no progress.

use crate::entity::Entity;
use crate::row::{Row, Stored};
use crate::session::SessionInner;
use crate::stmt::StmtKind;
use crate::txn::RecordKind;
use rowmap_core::{Error, FieldKind, LookupKey, Result, Statement, Step, Value};
use std::rc::Rc;

/// Outcome of one row in one pass.
enum RowPass {
    /// All pending work done; the row left the dirty set.
    Clean,
    /// Written with NULLed forward references; still dirty.
    Partial,
    /// Deferred entirely to a later pass; still dirty.
    Deferred,
}

/// Drain every entity's dirty set until quiescence or stall.
pub(crate) fn raw_flush(session: &Rc<SessionInner>) -> Result<()> {
    let mut to_flush = session.all_entities();
    let mut skip_fkeys = false;
    let mut prev_total = usize::MAX;
    let mut pass = 0_u32;

    while !to_flush.is_empty() {
        skip_fkeys = !skip_fkeys;
        pass += 1;

        let mut total = 0;
        let mut still = Vec::new();
        for entity in &to_flush {
            let remaining = flush_entity(entity, skip_fkeys)?;
            if remaining > 0 {
                total += remaining;
                still.push(Rc::clone(entity));
            }
        }
        tracing::debug!(pass, skip_fkeys, remaining = total, "flush pass");

        if !skip_fkeys {
            if total == 0 {
                break;
            }
            if total == prev_total {
                return Err(Error::flush(
                    total,
                    "unresolvable circular dependency between dirty rows",
                ));
            }
            prev_total = total;
        }
        to_flush = still;
    }
    Ok(())
}

/// Flush one entity's dirty rows. Returns how many remain dirty.
#[tracing::instrument(level = "trace", skip(entity), fields(entity = entity.name()))]
pub(crate) fn flush_entity(entity: &Rc<Entity>, skip_fkeys: bool) -> Result<usize> {
    let mut remaining = 0;
    for row in entity.dirty_rows() {
        match flush_row_pass(entity, &row, skip_fkeys)? {
            RowPass::Clean => {}
            RowPass::Partial | RowPass::Deferred => remaining += 1,
        }
    }
    Ok(remaining)
}

/// Flush one row alone. Returns true when no pending work remains.
pub(crate) fn flush_row(entity: &Rc<Entity>, row: &Rc<Row>, skip_fkeys: bool) -> Result<bool> {
    Ok(matches!(
        flush_row_pass(entity, row, skip_fkeys)?,
        RowPass::Clean
    ))
}

fn flush_row_pass(entity: &Rc<Entity>, row: &Rc<Row>, skip_fkeys: bool) -> Result<RowPass> {
    if !row.dirty() {
        return Ok(RowPass::Clean);
    }
    let session = entity.session()?;
    let in_txn = session.in_txn();
    if in_txn {
        session.txn_register(row, RecordKind::Touched);
    }

    if row.deleted() {
        if let Some(rowid) = row.rowid() {
            tracing::trace!(entity = entity.name(), rowid, "flushing DELETE");
            entity.with_statement(&StmtKind::Delete, &mut |stmt| {
                stmt.bind(1, &Value::Int(rowid))?;
                expect_done(session.step_stmt(stmt)?)
            })?;
        }
        entity.uncache_row(row);
        entity.clear_dirty(row);
        if in_txn {
            row.set_txn_dirty(true);
        }
        return Ok(RowPass::Clean);
    }

    // Gather bind values, observing unresolved forward references.
    let mut binds = Vec::with_capacity(entity.persisted().len());
    let mut resolved: Vec<(String, Value, bool)> = Vec::new();
    let mut partial = false;
    for def in entity.persisted() {
        let value = match row.stored_of(&def.name) {
            None => Value::Null,
            Some(Stored::Scalar(v)) => v,
            #[cfg(feature = "json")]
            Some(Stored::Json(proxy)) => Value::Text(proxy.encode()?),
            Some(Stored::Pending(referent)) => match referent.pk_if_inserted() {
                Some(pk) => {
                    resolved.push((def.name.clone(), pk.clone(), def.unique));
                    pk
                }
                None if def.required => {
                    tracing::trace!(
                        entity = entity.name(),
                        field = %def.name,
                        "required referent not inserted yet; deferring row"
                    );
                    return Ok(RowPass::Deferred);
                }
                None if skip_fkeys => {
                    partial = true;
                    Value::Null
                }
                None => return Ok(RowPass::Deferred),
            },
        };
        binds.push(value);
    }

    let insert = row.rowid().is_none();
    let kind = if insert { StmtKind::Insert } else { StmtKind::Update };
    entity.with_statement(&kind, &mut |stmt| {
        for (i, value) in binds.iter().enumerate() {
            stmt.bind(i + 1, value)?;
        }
        if let Some(rowid) = row.rowid() {
            stmt.bind(binds.len() + 1, &Value::Int(rowid))?;
        }
        expect_done(session.step_stmt(stmt)?)
    })?;

    if insert {
        let rowid = session.driver.last_insert_rowid();
        tracing::trace!(entity = entity.name(), rowid, "flushed INSERT");
        row.set_rowid(Some(rowid));
        entity.cache_row(row);
        // Merge the assigned rowid into an ID primary key.
        if let Some(pk) = entity.pk_def() {
            if pk.kind == FieldKind::Id {
                let name = pk.name.clone();
                row.store_direct(&name, Stored::Scalar(Value::Int(rowid)), Value::Int(rowid), in_txn);
                entity.cache_swap(&name, None, Some(&LookupKey::Int(rowid)), row);
            }
        }
    } else {
        tracing::trace!(entity = entity.name(), rowid = row.rowid(), "flushed UPDATE");
    }

    // Collapse resolved forward references to their primary-key scalars.
    for (name, pk, unique) in resolved {
        row.store_direct(&name, Stored::Scalar(pk.clone()), pk.clone(), in_txn);
        if unique {
            entity.cache_swap(&name, None, Some(&LookupKey::from(&pk)), row);
        }
    }

    if in_txn {
        row.set_txn_dirty(true);
    }

    if partial {
        Ok(RowPass::Partial)
    } else {
        entity.clear_dirty(row);
        Ok(RowPass::Clean)
    }
}

fn expect_done(step: Step) -> Result<()> {
    match step {
        Step::Done => Ok(()),
        other => Err(Error::driver_bare(format!(
            "write statement returned {other:?} instead of completing"
        ))),
    }
}
