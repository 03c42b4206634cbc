//! Per-entity prepared statement cache.
//!
//! Each entity lazily prepares its INSERT/UPDATE/DELETE/GET and unique
//! EXISTS statements on first use and keeps them for the life of the
//! session. A statement invalidated by an engine-level schema change is
//! dropped and re-prepared once, transparently to the caller.

use crate::entity::Entity;
use rowmap_core::{Error, Result, Statement};
use std::collections::HashMap;

/// SQLite's SQLITE_SCHEMA result code: statement needs re-preparation.
const SCHEMA_CHANGED: i32 = 17;

/// Which cached statement an operation wants.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum StmtKind {
    /// INSERT over all persisted fields.
    Insert,
    /// UPDATE over all persisted fields, keyed by rowid.
    Update,
    /// DELETE keyed by rowid.
    Delete,
    /// SELECT all persisted fields plus rowid, keyed by the primary key.
    Get,
    /// SELECT all persisted fields plus rowid, keyed by rowid.
    GetByRowid,
    /// Existence probe on one unique field (or the rowid).
    Exists(String),
}

/// Lazily-populated statement slots for one entity.
#[derive(Default)]
pub(crate) struct StatementBundle {
    slots: HashMap<StmtKind, Box<dyn Statement>>,
}

impl StatementBundle {
    /// Run `f` against the prepared statement for `kind`, preparing it on
    /// first use and re-preparing once if the engine invalidated it.
    pub(crate) fn run<T>(
        &mut self,
        entity: &Entity,
        kind: &StmtKind,
        f: &mut dyn FnMut(&mut dyn Statement) -> Result<T>,
    ) -> Result<T> {
        let session = entity.session()?;
        if !self.slots.contains_key(kind) {
            let stmt = session.driver.prepare(&sql_for(entity, kind))?;
            self.slots.insert(kind.clone(), stmt);
        }

        let first = {
            let stmt = self.slots.get_mut(kind).expect("slot populated above");
            stmt.reset()?;
            f(stmt.as_mut())
        };
        match first {
            Err(ref e) if schema_changed(e) => {
                tracing::debug!(entity = entity.name(), ?kind, "re-preparing invalidated statement");
                let mut stmt = session.driver.prepare(&sql_for(entity, kind))?;
                let out = f(stmt.as_mut());
                self.slots.insert(kind.clone(), stmt);
                out
            }
            out => out,
        }
    }
}

fn schema_changed(err: &Error) -> bool {
    matches!(err, Error::Driver(d) if d.code == Some(SCHEMA_CHANGED))
}

/// Quote an identifier for SQL.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Statement SQL for an entity and kind.
pub(crate) fn sql_for(entity: &Entity, kind: &StmtKind) -> String {
    match kind {
        StmtKind::Insert => insert_sql(entity),
        StmtKind::Update => update_sql(entity),
        StmtKind::Delete => delete_sql(entity),
        StmtKind::Get => select_sql(entity, entity.key()),
        StmtKind::GetByRowid => select_sql(entity, "rowid"),
        StmtKind::Exists(field) => exists_sql(entity, field),
    }
}

pub(crate) fn insert_sql(entity: &Entity) -> String {
    let columns: Vec<String> = entity
        .persisted()
        .iter()
        .map(|f| quote_ident(&f.name))
        .collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(entity.name()),
        columns.join(", "),
        placeholders.join(", ")
    )
}

pub(crate) fn update_sql(entity: &Entity) -> String {
    let assignments: Vec<String> = entity
        .persisted()
        .iter()
        .enumerate()
        .map(|(i, f)| format!("{} = ?{}", quote_ident(&f.name), i + 1))
        .collect();
    format!(
        "UPDATE {} SET {} WHERE rowid = ?{}",
        quote_ident(entity.name()),
        assignments.join(", "),
        assignments.len() + 1
    )
}

pub(crate) fn delete_sql(entity: &Entity) -> String {
    format!("DELETE FROM {} WHERE rowid = ?1", quote_ident(entity.name()))
}

/// SELECT of every persisted field plus the rowid, keyed by `key_column`.
pub(crate) fn select_sql(entity: &Entity, key_column: &str) -> String {
    format!(
        "SELECT {}, rowid FROM {} WHERE {} = ?1",
        select_columns(entity),
        quote_ident(entity.name()),
        key_expr(key_column)
    )
}

pub(crate) fn exists_sql(entity: &Entity, field: &str) -> String {
    format!(
        "SELECT rowid FROM {} WHERE {} = ?1 LIMIT 1",
        quote_ident(entity.name()),
        key_expr(field)
    )
}

pub(crate) fn select_columns(entity: &Entity) -> String {
    entity
        .persisted()
        .iter()
        .map(|f| quote_ident(&f.name))
        .collect::<Vec<_>>()
        .join(", ")
}

fn key_expr(column: &str) -> String {
    if column == "rowid" {
        "rowid".to_string()
    } else {
        quote_ident(column)
    }
}
