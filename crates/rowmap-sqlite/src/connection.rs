//! SQLite connection and statement wrappers.
//!
//! Safe single-threaded wrappers around SQLite's C API, implementing the
//! `Driver` and `Statement` contracts from `rowmap-core`. Statements keep
//! their connection handle alive through an `Rc`, so a cached statement can
//! outlive the `SqliteDriver` value that prepared it; the underlying
//! database is closed with `sqlite3_close_v2`, which defers teardown until
//! the last statement is finalized.

use crate::types;
use libsqlite3_sys as ffi;
use rowmap_core::{Driver, Error, Result, StateErrorKind, Statement, Step, Value};
use std::cell::Cell;
use std::ffi::{CStr, CString, c_int};
use std::ptr;
use std::rc::Rc;

// `sqlite3_close_v2` is present in the bundled SQLite amalgamation but is not
// emitted by libsqlite3-sys's pregenerated bindings; declare it directly so
// we can link against the symbol the vendored build already compiles in.
unsafe extern "C" {
    fn sqlite3_close_v2(db: *mut ffi::sqlite3) -> c_int;
}

/// Shared connection handle. `db` is null once the connection is closed.
struct Handle {
    db: Cell<*mut ffi::sqlite3>,
}

impl Handle {
    fn db(&self) -> Result<*mut ffi::sqlite3> {
        let db = self.db.get();
        if db.is_null() {
            Err(Error::state(
                StateErrorKind::Closed,
                "database connection is closed",
            ))
        } else {
            Ok(db)
        }
    }

    /// Error carrying the engine's current message and extended code.
    fn error(&self, fallback: c_int) -> Error {
        let db = self.db.get();
        if db.is_null() {
            return Error::driver(fallback, types::error_string(fallback));
        }
        // SAFETY: db is valid, errmsg returns a valid C string
        unsafe {
            let code = ffi::sqlite3_errcode(db);
            let msg = CStr::from_ptr(ffi::sqlite3_errmsg(db))
                .to_string_lossy()
                .into_owned();
            Error::driver(code, msg)
        }
    }

    fn close(&self) {
        let db = self.db.replace(ptr::null_mut());
        if !db.is_null() {
            // SAFETY: db is valid; close_v2 defers until statements finalize
            unsafe {
                sqlite3_close_v2(db);
            }
        }
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        self.close();
    }
}

/// A connection to a SQLite database.
pub struct SqliteDriver {
    handle: Rc<Handle>,
    path: String,
}

impl SqliteDriver {
    /// Open a database file, or an in-memory database when `path` is `None`.
    pub fn open(path: Option<&str>) -> Result<Self> {
        let path = path.unwrap_or(":memory:");
        let c_path = CString::new(path).map_err(|_| {
            Error::driver_bare(format!("invalid database path: {path:?}"))
        })?;

        let mut db: *mut ffi::sqlite3 = ptr::null_mut();
        let flags = ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE | ffi::SQLITE_OPEN_URI;

        // SAFETY: valid pointers; the return code is checked below
        let rc = unsafe { ffi::sqlite3_open_v2(c_path.as_ptr(), &mut db, flags, ptr::null()) };

        if rc != ffi::SQLITE_OK {
            let msg = if db.is_null() {
                types::error_string(rc)
            } else {
                // SAFETY: db is valid even on failure and must still be closed
                unsafe {
                    let msg = CStr::from_ptr(ffi::sqlite3_errmsg(db))
                        .to_string_lossy()
                        .into_owned();
                    ffi::sqlite3_close(db);
                    msg
                }
            };
            return Err(Error::driver(rc, format!("failed to open {path}: {msg}")));
        }

        tracing::debug!(path, "opened sqlite database");
        Ok(Self {
            handle: Rc::new(Handle { db: Cell::new(db) }),
            path: path.to_string(),
        })
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self> {
        Self::open(None)
    }

    /// Path the database was opened with.
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Driver for SqliteDriver {
    fn exec(&self, sql: &str) -> Result<()> {
        let db = self.handle.db()?;
        let c_sql = CString::new(sql)
            .map_err(|_| Error::driver_bare("SQL contains interior null byte"))?;

        let mut errmsg: *mut std::ffi::c_char = ptr::null_mut();
        // SAFETY: all pointers are valid
        let rc = unsafe { ffi::sqlite3_exec(db, c_sql.as_ptr(), None, ptr::null_mut(), &mut errmsg) };

        if rc != ffi::SQLITE_OK {
            let msg = if errmsg.is_null() {
                types::error_string(rc)
            } else {
                // SAFETY: errmsg is valid and must be freed by sqlite3_free
                unsafe {
                    let msg = CStr::from_ptr(errmsg).to_string_lossy().into_owned();
                    ffi::sqlite3_free(errmsg.cast());
                    msg
                }
            };
            return Err(Error::driver(rc, msg));
        }
        Ok(())
    }

    fn prepare(&self, sql: &str) -> Result<Box<dyn Statement>> {
        let db = self.handle.db()?;
        let c_sql = CString::new(sql)
            .map_err(|_| Error::driver_bare("SQL contains interior null byte"))?;

        let mut stmt: *mut ffi::sqlite3_stmt = ptr::null_mut();
        // SAFETY: all pointers are valid; rc is checked
        let rc = unsafe {
            ffi::sqlite3_prepare_v2(db, c_sql.as_ptr(), -1, &mut stmt, ptr::null_mut())
        };
        if rc != ffi::SQLITE_OK || stmt.is_null() {
            return Err(self.handle.error(rc));
        }

        tracing::trace!(sql, "prepared statement");
        Ok(Box::new(SqliteStatement {
            handle: Rc::clone(&self.handle),
            stmt,
        }))
    }

    fn last_insert_rowid(&self) -> i64 {
        match self.handle.db() {
            // SAFETY: db is valid
            Ok(db) => unsafe { ffi::sqlite3_last_insert_rowid(db) },
            Err(_) => 0,
        }
    }

    fn changes(&self) -> i64 {
        match self.handle.db() {
            // SAFETY: db is valid
            Ok(db) => i64::from(unsafe { ffi::sqlite3_changes(db) }),
            Err(_) => 0,
        }
    }

    fn is_open(&self) -> bool {
        !self.handle.db.get().is_null()
    }

    fn close(&self) -> Result<()> {
        self.handle.close();
        Ok(())
    }

    fn engine_version(&self) -> String {
        sqlite_version().to_string()
    }
}

/// Version of the linked SQLite library.
pub fn sqlite_version() -> &'static str {
    // SAFETY: sqlite3_libversion returns a static string
    unsafe {
        CStr::from_ptr(ffi::sqlite3_libversion())
            .to_str()
            .unwrap_or("unknown")
    }
}

/// A prepared SQLite statement.
pub struct SqliteStatement {
    handle: Rc<Handle>,
    stmt: *mut ffi::sqlite3_stmt,
}

impl SqliteStatement {
    fn check(&self, rc: c_int) -> Result<()> {
        if rc == ffi::SQLITE_OK {
            Ok(())
        } else {
            Err(self.handle.error(rc))
        }
    }
}

impl Statement for SqliteStatement {
    fn bind(&mut self, index: usize, value: &Value) -> Result<()> {
        // SAFETY: stmt is valid for the lifetime of self
        let rc = unsafe { types::bind_value(self.stmt, index as c_int, value) };
        self.check(rc)
    }

    fn bind_named(&mut self, params: &[(String, Value)]) -> Result<()> {
        for (name, value) in params {
            let c_name = CString::new(format!(":{name}"))
                .map_err(|_| Error::driver_bare("parameter name contains null byte"))?;
            // SAFETY: stmt and name are valid
            let index = unsafe { ffi::sqlite3_bind_parameter_index(self.stmt, c_name.as_ptr()) };
            if index == 0 {
                continue;
            }
            // SAFETY: index came from the engine
            let rc = unsafe { types::bind_value(self.stmt, index, value) };
            self.check(rc)?;
        }
        Ok(())
    }

    fn step(&mut self) -> Result<Step> {
        // SAFETY: stmt is valid
        let rc = unsafe { ffi::sqlite3_step(self.stmt) };
        match rc {
            ffi::SQLITE_ROW => Ok(Step::Row),
            ffi::SQLITE_DONE => Ok(Step::Done),
            ffi::SQLITE_BUSY | ffi::SQLITE_LOCKED => Ok(Step::Busy),
            _ => Err(self.handle.error(rc)),
        }
    }

    fn reset(&mut self) -> Result<()> {
        // SAFETY: stmt is valid
        unsafe {
            ffi::sqlite3_reset(self.stmt);
            ffi::sqlite3_clear_bindings(self.stmt);
        }
        Ok(())
    }

    fn values(&self) -> Vec<Value> {
        // SAFETY: stmt is valid and positioned on a row
        unsafe {
            let count = ffi::sqlite3_column_count(self.stmt);
            (0..count).map(|i| types::read_column(self.stmt, i)).collect()
        }
    }

    fn column_count(&self) -> usize {
        // SAFETY: stmt is valid
        unsafe { ffi::sqlite3_column_count(self.stmt) as usize }
    }
}

impl Drop for SqliteStatement {
    fn drop(&mut self) {
        // SAFETY: stmt is valid and finalized exactly once
        unsafe {
            ffi::sqlite3_finalize(self.stmt);
        }
    }
}
