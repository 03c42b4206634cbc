//! The session: one driver connection, the schema registry, transaction
//! state and the behavior registers.
//!
//! A session is single-threaded. Entities hold weak references back to it,
//! rows hold strong references to their entity, and the session owns the
//! registry, so everything an application can reach stays wired together
//! for the session's lifetime.

use crate::entity::Entity;
use crate::flush;
use crate::row::Row;
use crate::schema::{self, FieldSpec, KeySpec, Registry};
use crate::txn::{self, RecordKind, Txn};
use rowmap_core::{BUSY_CODE, Driver, Error, Result, StateErrorKind, Statement, Step};
use rowmap_sqlite::SqliteDriver;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Policy consulted when the engine reports BUSY outside a transaction.
pub enum Retry {
    /// Fail immediately.
    Never,
    /// Retry until the engine yields.
    Forever,
    /// Retry up to this many times.
    UpTo(u32),
    /// Ask the predicate, passing the attempt count.
    Predicate(Box<dyn Fn(u32) -> bool>),
}

impl Retry {
    fn allows(&self, attempt: u32) -> bool {
        match self {
            Retry::Never => false,
            Retry::Forever => true,
            Retry::UpTo(n) => attempt <= *n,
            Retry::Predicate(f) => f(attempt),
        }
    }
}

pub(crate) struct SessionInner {
    pub(crate) driver: Box<dyn Driver>,
    pub(crate) registry: RefCell<Registry>,
    pub(crate) txn: RefCell<Option<Txn>>,
    pub(crate) pending: Cell<bool>,
    pub(crate) on_change: RefCell<Option<Box<dyn Fn()>>>,
    pub(crate) retry: RefCell<Retry>,
    pub(crate) default_key: RefCell<Option<String>>,
    serial: Cell<u64>,
}

impl SessionInner {
    pub(crate) fn entity(&self, name: &str) -> Option<Rc<Entity>> {
        self.registry.borrow().get(&name.to_lowercase())
    }

    pub(crate) fn all_entities(&self) -> Vec<Rc<Entity>> {
        self.registry.borrow().all()
    }

    pub(crate) fn next_serial(&self) -> u64 {
        let serial = self.serial.get() + 1;
        self.serial.set(serial);
        serial
    }

    /// Raise the pending-changes flag, invoking `on_change` exactly once
    /// per transition from clean to dirty.
    pub(crate) fn note_change(&self) {
        if self.pending.get() {
            return;
        }
        self.pending.set(true);
        if let Some(callback) = &*self.on_change.borrow() {
            callback();
        }
    }

    pub(crate) fn in_txn(&self) -> bool {
        self.txn.borrow().is_some()
    }

    pub(crate) fn txn_register(&self, row: &Rc<Row>, kind: RecordKind) {
        if let Some(txn) = &mut *self.txn.borrow_mut() {
            txn.register(row, kind);
        }
    }

    /// Step a statement, applying the retry register on BUSY. Transactions
    /// never retry.
    pub(crate) fn step_stmt(&self, stmt: &mut dyn Statement) -> Result<Step> {
        let mut attempt = 0_u32;
        loop {
            match stmt.step()? {
                Step::Busy => {
                    if self.in_txn() {
                        return Err(Error::driver(
                            BUSY_CODE,
                            "database is busy inside a transaction",
                        ));
                    }
                    attempt += 1;
                    if !self.retry.borrow().allows(attempt) {
                        return Err(Error::driver(BUSY_CODE, "database is busy"));
                    }
                    tracing::warn!(attempt, "engine busy; retrying");
                }
                done => return Ok(done),
            }
        }
    }
}

/// An entity manager session over one embedded database.
pub struct Session {
    inner: Rc<SessionInner>,
}

impl Session {
    /// Open a database file, or an in-memory database when `path` is `None`.
    pub fn open(path: Option<&str>) -> Result<Self> {
        Ok(Self::with_driver(Box::new(SqliteDriver::open(path)?)))
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self> {
        Self::open(None)
    }

    /// Build a session over an already-open driver.
    pub fn with_driver(driver: Box<dyn Driver>) -> Self {
        Self {
            inner: Rc::new(SessionInner {
                driver,
                registry: RefCell::new(Registry::default()),
                txn: RefCell::new(None),
                pending: Cell::new(false),
                on_change: RefCell::new(None),
                retry: RefCell::new(Retry::Never),
                default_key: RefCell::new(None),
                serial: Cell::new(0),
            }),
        }
    }

    /// Close the underlying database. Idempotent; later driver operations
    /// fail with a state error.
    pub fn close(&self) -> Result<()> {
        self.inner.driver.close()
    }

    /// True until `close` has been called.
    pub fn is_open(&self) -> bool {
        self.inner.driver.is_open()
    }

    /// The driver handle.
    pub fn driver(&self) -> &dyn Driver {
        self.inner.driver.as_ref()
    }

    /// Library version.
    pub fn version(&self) -> &'static str {
        VERSION
    }

    /// Human-readable version of the library and its engine.
    pub fn version_string(&self) -> String {
        format!("rowmap {VERSION} (sqlite {})", self.inner.driver.engine_version())
    }

    // ------------------------------------------------------------------
    // Schema
    // ------------------------------------------------------------------

    /// Declare a new entity.
    ///
    /// `key` selects the primary key: a field name, `KeySpec::Id` for a
    /// fresh ID field, or `None` for the `default_key` register / implicit
    /// rowid. Fields are shorthand strings or full definitions, in order.
    pub fn declare(
        &self,
        name: &str,
        key: impl Into<KeySpec>,
        fields: Vec<(&str, FieldSpec)>,
    ) -> Result<Rc<Entity>> {
        schema::declare(&self.inner, name, key.into(), fields)
    }

    /// Look up a registered entity by name.
    pub fn entity(&self, name: &str) -> Option<Rc<Entity>> {
        self.inner.entity(name)
    }

    /// All registered entities, in declaration order.
    pub fn entities(&self) -> Vec<Rc<Entity>> {
        self.inner.all_entities()
    }

    // ------------------------------------------------------------------
    // Registers
    // ------------------------------------------------------------------

    /// Default primary-key field name used by `declare` when no key is
    /// specified, instead of the implicit rowid.
    pub fn set_default_key(&self, name: Option<&str>) {
        *self.inner.default_key.borrow_mut() = name.map(|n| n.to_lowercase());
    }

    pub fn default_key(&self) -> Option<String> {
        self.inner.default_key.borrow().clone()
    }

    /// Callback invoked on each transition of `pending_changes` from clean
    /// to dirty.
    pub fn set_on_change(&self, callback: Option<Box<dyn Fn()>>) {
        *self.inner.on_change.borrow_mut() = callback;
    }

    /// BUSY retry policy. Ignored inside transactions.
    pub fn set_retry(&self, retry: Retry) {
        *self.inner.retry.borrow_mut() = retry;
    }

    /// True when any row has pending database effects since the last
    /// successful whole-session flush.
    pub fn pending_changes(&self) -> bool {
        self.inner.pending.get()
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    /// Begin a transaction, or increase the depth of the active one.
    /// With `strict`, an already-active transaction is an error.
    pub fn begin(&self, strict: bool) -> Result<()> {
        let mut txn = self.inner.txn.borrow_mut();
        match &mut *txn {
            Some(active) => {
                if strict {
                    return Err(Error::state(
                        StateErrorKind::AlreadyInTransaction,
                        "a transaction is already active",
                    ));
                }
                active.depth += 1;
                Ok(())
            }
            None => {
                self.inner.driver.exec("BEGIN")?;
                tracing::debug!("transaction begun");
                *txn = Some(Txn::new());
                Ok(())
            }
        }
    }

    /// Decrease the transaction depth; at zero (or with `force`) issue the
    /// COMMIT and promote every touched row's overlay.
    pub fn commit(&self, force: bool) -> Result<()> {
        {
            let mut txn = self.inner.txn.borrow_mut();
            let Some(active) = &mut *txn else {
                return Err(Error::state(
                    StateErrorKind::NoTransaction,
                    "no active transaction to commit",
                ));
            };
            if active.depth > 1 && !force {
                active.depth -= 1;
                return Ok(());
            }
        }

        self.inner.driver.exec("COMMIT")?;
        let txn = self
            .inner
            .txn
            .borrow_mut()
            .take()
            .expect("transaction checked above");
        let records = txn.into_records();
        tracing::debug!(rows = records.len(), "transaction committed");
        for record in &records {
            txn::commit_record(record);
        }
        Ok(())
    }

    /// Roll back the active transaction and restore every touched row's
    /// in-memory state.
    pub fn rollback(&self) -> Result<()> {
        let Some(txn) = self.inner.txn.borrow_mut().take() else {
            return Err(Error::state(
                StateErrorKind::NoTransaction,
                "no active transaction to roll back",
            ));
        };

        let exec_result = self.inner.driver.exec("ROLLBACK");
        let records = txn.into_records();
        tracing::debug!(rows = records.len(), "transaction rolled back");
        for record in records.iter().rev() {
            txn::rollback_record(record)?;
        }
        exec_result
    }

    /// True while a transaction is active.
    pub fn transaction(&self) -> bool {
        self.inner.in_txn()
    }

    // ------------------------------------------------------------------
    // Flush
    // ------------------------------------------------------------------

    /// Drain every entity's dirty set, without transaction wrapping.
    pub fn raw_flush(&self) -> Result<()> {
        flush::raw_flush(&self.inner)?;
        self.inner.pending.set(false);
        Ok(())
    }

    /// Flush atomically: `raw_flush` wrapped in a strict transaction, with
    /// rollback on any error.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn flush(&self) -> Result<()> {
        self.begin(true)?;
        let result = flush::raw_flush(&self.inner).and_then(|()| self.commit(true));
        match result {
            Ok(()) => {
                self.inner.pending.set(false);
                Ok(())
            }
            Err(err) => {
                if let Err(rollback_err) = self.rollback() {
                    tracing::warn!(error = %rollback_err, "rollback after failed flush also failed");
                }
                Err(err)
            }
        }
    }
}
