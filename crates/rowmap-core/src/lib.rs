//! Core types for rowmap.
//!
//! This crate provides the foundational pieces shared by the entity layer
//! and the driver adapters:
//!
//! - `Value` and `LookupKey` for dynamically-typed SQL values and cache keys
//! - `FieldKind` / `FieldDef` and scalar coercion
//! - `Driver` / `Statement`, the contract every SQL adapter implements
//! - `Error` and `Result` for all rowmap operations

pub mod driver;
pub mod error;
pub mod field;
pub mod value;

pub use driver::{Driver, Statement, Step};
pub use error::{
    BUSY_CODE, DriverError, Error, FlushError, LOCKED_CODE, Result, SchemaError, SchemaErrorKind,
    StateError, StateErrorKind, UniqueError, ValueError, ValueErrorKind,
};
pub use field::{FieldDef, FieldKind, ResolvedNav, blob, coerce_scalar, fkey, id, int, numeric,
    real, text};
pub use value::{LookupKey, Value};
