//! rowmap: an identity-mapped entity layer over embedded SQLite.
//!
//! Applications declare related tables at runtime, fetch and mutate rows as
//! first-class objects with typed fields and foreign-key navigation, and
//! defer all database writes into a single atomic flush that respects
//! cross-table dependency order.
//!
//! The load-bearing pieces:
//!
//! - a **schema registry** with field classification and a closure check
//!   that rejects circular required foreign keys
//! - an **identity map** per entity: weak caches by rowid and by each
//!   unique field, so one database row is one live object
//! - **dirty tracking** with a two-phase flush that tolerates forward
//!   foreign-key references by NULLing non-required ones and retrying
//! - a **transaction overlay** so writes inside a transaction mask
//!   committed values until commit, and rollback restores cached rows
//! - a **dual-evaluator query compiler** emitting SQL for the database and
//!   an equivalent predicate over pending in-memory rows
//!
//! # Example
//!
//! ```no_run
//! use rowmap::Session;
//!
//! # fn main() -> rowmap::Result<()> {
//! let session = Session::open_memory()?;
//! let map = session.declare(
//!     "map",
//!     "key",
//!     vec![("key", "text!".into()), ("value", "text".into())],
//! )?;
//! map.create()?;
//!
//! map.new_row(vec![("key", "a".into()), ("value", "b".into())])?;
//! session.flush()?;
//!
//! let row = map.get("a")?.expect("flushed above");
//! assert_eq!(row.get("value")?.as_str(), Some("b"));
//! # Ok(())
//! # }
//! ```

mod ddl;
mod entity;
mod flush;
#[cfg(feature = "json")]
mod json;
mod query;
mod row;
mod schema;
mod session;
mod stmt;
mod txn;

pub use entity::Entity;
#[cfg(feature = "json")]
pub use json::JsonProxy;
pub use query::{CmpOp, Q, Query};
pub use row::{Arg, Resolved, Row};
pub use schema::{FieldSpec, KeySpec};
pub use session::{Retry, Session, VERSION};

// Field factories and the shared core types.
pub use rowmap_core::{
    Driver, Error, FieldDef, FieldKind, Result, Statement, Step, Value, blob, fkey, id, int,
    numeric, real, text,
};

/// Field factory: structured JSON stored as TEXT.
#[cfg(feature = "json")]
pub fn json() -> FieldDef {
    FieldDef::new(FieldKind::Json)
}
