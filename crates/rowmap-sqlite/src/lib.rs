//! SQLite driver adapter for rowmap.
//!
//! Implements the `rowmap_core::Driver` contract over the bundled SQLite
//! library. The adapter is single-threaded by design, matching the entity
//! layer it serves; a statement keeps its connection alive internally, so
//! prepared statements can be cached freely.

#![allow(unsafe_code)]

mod connection;
mod types;

pub use connection::{SqliteDriver, SqliteStatement, sqlite_version};
