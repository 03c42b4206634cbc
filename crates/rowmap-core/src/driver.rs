//! The SQL driver contract.
//!
//! The entity layer talks to the embedded engine exclusively through these
//! two object-safe traits. The session is single-threaded, so neither trait
//! requires `Send` or `Sync`; statements may hold shared handles into their
//! driver internally.

use crate::error::Result;
use crate::value::Value;

/// Outcome of stepping a prepared statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// A result row is available.
    Row,
    /// The statement has run to completion.
    Done,
    /// The engine is busy; the caller decides whether to retry.
    Busy,
}

/// A prepared statement.
///
/// Bind indices are 1-based, matching the engine's convention. A statement
/// must be `reset` before it can be stepped again from the start.
pub trait Statement {
    /// Bind a value at a positional index.
    fn bind(&mut self, index: usize, value: &Value) -> Result<()>;

    /// Bind named parameters (`:name`). Unknown names are ignored, so one
    /// parameter map can serve several statements.
    fn bind_named(&mut self, params: &[(String, Value)]) -> Result<()>;

    /// Advance the statement one step.
    fn step(&mut self) -> Result<Step>;

    /// Reset the statement so it can be re-executed. Bindings are cleared.
    fn reset(&mut self) -> Result<()>;

    /// Values of the current result row, valid after `step` returned `Row`.
    fn values(&self) -> Vec<Value>;

    /// Number of result columns.
    fn column_count(&self) -> usize;
}

/// A connection to the embedded SQL engine.
pub trait Driver {
    /// Execute SQL directly, without preparing. Used for DDL and
    /// transaction control.
    fn exec(&self, sql: &str) -> Result<()>;

    /// Prepare a statement.
    fn prepare(&self, sql: &str) -> Result<Box<dyn Statement>>;

    /// Rowid assigned by the most recent successful INSERT.
    fn last_insert_rowid(&self) -> i64;

    /// Number of rows changed by the most recent statement.
    fn changes(&self) -> i64;

    /// True until `close` has been called.
    fn is_open(&self) -> bool;

    /// Close the connection. Later operations fail. Idempotent.
    fn close(&self) -> Result<()>;

    /// Version string of the underlying engine.
    fn engine_version(&self) -> String;
}
