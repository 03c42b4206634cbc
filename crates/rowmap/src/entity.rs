//! Entity descriptors: identity-mapped row caches and the dirty set.
//!
//! An entity guarantees at most one live `Row` per rowid and per unique
//! lookup value. The caches hold rows weakly, so cold rows are reclaimed
//! when the application drops them; rows with pending changes are owned
//! strongly by the dirty set until they flush.

use crate::ddl;
use crate::flush;
use crate::query::{self, Q, Query};
use crate::row::{Arg, Row};
use crate::session::SessionInner;
use crate::stmt::{StatementBundle, StmtKind};
use crate::txn::RecordKind;
use rowmap_core::{
    Error, FieldDef, FieldKind, LookupKey, Result, StateErrorKind, Statement, Step, Value,
    ValueErrorKind, coerce_scalar,
};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::{Rc, Weak};

impl std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entity")
            .field("name", &self.name)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// A registered entity: one table plus its row caches and dirty set.
pub struct Entity {
    this: Weak<Entity>,
    session: Weak<SessionInner>,
    name: String,
    /// Primary key field name, or `"rowid"` for the implicit integer key.
    key: String,
    /// Persisted fields, in declaration order.
    persisted: Vec<Rc<FieldDef>>,
    /// All fields in declaration order, virtual navigation included.
    all_fields: Vec<Rc<FieldDef>>,
    by_name: HashMap<String, Rc<FieldDef>>,
    unique_names: Vec<String>,
    /// Weak cache by rowid.
    rows: RefCell<HashMap<i64, Weak<Row>>>,
    /// Weak cache per unique field, keyed by lookup value.
    caches: RefCell<HashMap<String, HashMap<LookupKey, Weak<Row>>>>,
    /// Rows with pending changes, keyed by serial so iteration is stable.
    dirty: RefCell<BTreeMap<u64, Rc<Row>>>,
    stmts: RefCell<StatementBundle>,
}

impl Entity {
    pub(crate) fn build(
        session: Weak<SessionInner>,
        name: String,
        key: String,
        all_fields: Vec<Rc<FieldDef>>,
    ) -> Rc<Self> {
        let persisted: Vec<Rc<FieldDef>> = all_fields
            .iter()
            .filter(|f| !f.virtual_nav)
            .cloned()
            .collect();
        let by_name: HashMap<String, Rc<FieldDef>> = all_fields
            .iter()
            .map(|f| (f.name.clone(), Rc::clone(f)))
            .collect();
        let unique_names: Vec<String> = persisted
            .iter()
            .filter(|f| f.unique)
            .map(|f| f.name.clone())
            .collect();
        let caches = unique_names
            .iter()
            .map(|n| (n.clone(), HashMap::new()))
            .collect();

        Rc::new_cyclic(|this| Self {
            this: this.clone(),
            session,
            name,
            key,
            persisted,
            all_fields,
            by_name,
            unique_names,
            rows: RefCell::new(HashMap::new()),
            caches: RefCell::new(caches),
            dirty: RefCell::new(BTreeMap::new()),
            stmts: RefCell::new(StatementBundle::default()),
        })
    }

    /// A strong handle to this entity; the registry keeps it alive.
    pub(crate) fn rc(&self) -> Rc<Entity> {
        self.this.upgrade().expect("entity outlives its handles")
    }

    /// Entity (table) name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Primary key field name, `"rowid"` when implicit.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The primary key definition, unless the key is the implicit rowid.
    pub fn pk_def(&self) -> Option<&Rc<FieldDef>> {
        if self.key == "rowid" {
            None
        } else {
            self.by_name.get(&self.key)
        }
    }

    /// SQL type of the primary key, as adopted by referencing fkey columns.
    pub(crate) fn key_sql_type(&self) -> &'static str {
        self.pk_def().map_or("INTEGER", |def| def.kind.sql_type())
    }

    /// Look up a field definition by (case-insensitive) name.
    pub fn field(&self, name: &str) -> Option<&Rc<FieldDef>> {
        self.by_name.get(&name.to_lowercase())
    }

    /// All fields in declaration order, virtual navigation included.
    pub fn fields(&self) -> impl Iterator<Item = &Rc<FieldDef>> {
        self.all_fields.iter()
    }

    /// Persisted fields in declaration order.
    pub(crate) fn persisted(&self) -> &[Rc<FieldDef>] {
        &self.persisted
    }

    /// Number of rows with pending changes.
    pub fn dirty_count(&self) -> usize {
        self.dirty.borrow().len()
    }

    pub(crate) fn session(&self) -> Result<Rc<SessionInner>> {
        self.session.upgrade().ok_or_else(|| {
            Error::state(StateErrorKind::Closed, "session has been dropped")
        })
    }

    // ------------------------------------------------------------------
    // Row construction
    // ------------------------------------------------------------------

    /// Create a new row from field/value pairs.
    ///
    /// The row joins the dirty set and is INSERTed on the next flush.
    /// Unique fields are checked against both the in-memory caches and the
    /// database.
    pub fn new_row(&self, data: Vec<(&str, Arg)>) -> Result<Rc<Row>> {
        self.new_row_with(data, false)
    }

    /// Like `new_row`, but skips the database side of the unique checks.
    pub fn new_row_unchecked(&self, data: Vec<(&str, Arg)>) -> Result<Rc<Row>> {
        self.new_row_with(data, true)
    }

    fn new_row_with(&self, data: Vec<(&str, Arg)>, skip_check: bool) -> Result<Rc<Row>> {
        let session = self.session()?;
        let row = Row::fresh(self.rc(), session.next_serial());

        for (name, arg) in data {
            if let Err(e) = row.set_with(name, arg, !skip_check) {
                self.uncache_row(&row);
                return Err(e);
            }
        }

        for def in &self.persisted {
            if def.required && def.kind != FieldKind::Id && !row.has_field(&def.name) {
                self.uncache_row(&row);
                return Err(Error::value(
                    ValueErrorKind::RequiredMissing,
                    def.name.clone(),
                    "required field missing",
                ));
            }
        }

        self.mark_dirty(&row);
        session.txn_register(&row, RecordKind::Created);
        tracing::trace!(entity = %self.name, serial = row.serial(), "new row");
        Ok(row)
    }

    /// Build a row object from a database result (persisted fields plus a
    /// trailing rowid), deduplicating through the rowid cache.
    pub(crate) fn materialize(&self, values: Vec<Value>) -> Result<Rc<Row>> {
        let session = self.session()?;
        let rowid = values
            .last()
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::driver_bare("result row is missing its rowid"))?;

        if let Some(existing) = self.row_by_id(rowid) {
            return Ok(existing);
        }

        let mut committed = HashMap::new();
        let mut lookups = HashMap::new();
        for (def, value) in self.persisted.iter().zip(values.iter()) {
            committed.insert(def.name.clone(), value.clone());
            lookups.insert(def.name.clone(), value.clone());
        }

        let row = Row::from_db(
            self.rc(),
            session.next_serial(),
            rowid,
            committed,
            lookups,
        );
        self.cache_row(&row);
        session.txn_register(&row, RecordKind::Loaded);
        Ok(row)
    }

    // ------------------------------------------------------------------
    // Fetch
    // ------------------------------------------------------------------

    /// Coerce a caller-supplied key to the primary key's lookup form.
    fn coerce_key(&self, key: Value) -> Result<Value> {
        match self.pk_def() {
            Some(def) => coerce_scalar(def, &key),
            None => key.as_i64().map(Value::Int).ok_or_else(|| {
                Error::value(
                    ValueErrorKind::Uncoercible,
                    "rowid",
                    format!("rowid key must be an integer, got {}", key.type_name()),
                )
            }),
        }
    }

    /// Fetch a row by primary key. Consults the identity map first.
    pub fn get(&self, key: impl Into<Value>) -> Result<Option<Rc<Row>>> {
        let lookup = self.coerce_key(key.into())?;

        let cached = if self.key == "rowid" {
            lookup.as_i64().and_then(|id| self.row_by_id(id))
        } else {
            self.cache_get(&self.key, &LookupKey::from(&lookup))
        };
        if let Some(row) = cached {
            return Ok(if row.deleted() { None } else { Some(row) });
        }

        let session = self.session()?;
        let fetched = self.with_statement(&StmtKind::Get, &mut |stmt| {
            stmt.bind(1, &lookup)?;
            match session.step_stmt(stmt)? {
                Step::Row => Ok(Some(stmt.values())),
                _ => Ok(None),
            }
        })?;

        match fetched {
            Some(values) => Ok(Some(self.materialize(values)?)),
            None => Ok(None),
        }
    }

    /// Check whether a row with this primary key exists, in memory or in
    /// the database, without materializing it.
    pub fn has(&self, key: impl Into<Value>) -> Result<bool> {
        let lookup = self.coerce_key(key.into())?;

        let cached = if self.key == "rowid" {
            lookup.as_i64().and_then(|id| self.row_by_id(id))
        } else {
            self.cache_get(&self.key, &LookupKey::from(&lookup))
        };
        if let Some(row) = cached {
            return Ok(!row.deleted());
        }

        self.probe(&self.key, &lookup).map(|found| found.is_some())
    }

    /// Existence probe against the database on one unique field (or the
    /// rowid). Returns the matching rowid, if any.
    pub(crate) fn probe(&self, field: &str, lookup: &Value) -> Result<Option<i64>> {
        let session = self.session()?;
        self.with_statement(&StmtKind::Exists(field.to_string()), &mut |stmt| {
            stmt.bind(1, lookup)?;
            match session.step_stmt(stmt)? {
                Step::Row => Ok(stmt.values().first().and_then(Value::as_i64)),
                _ => Ok(None),
            }
        })
    }

    // ------------------------------------------------------------------
    // DDL, flush, query
    // ------------------------------------------------------------------

    /// The `CREATE TABLE IF NOT EXISTS` statement for this entity.
    pub fn create_sql(&self) -> Result<String> {
        ddl::create_sql(self)
    }

    /// Create the backing table if it does not exist.
    pub fn create(&self) -> Result<()> {
        let session = self.session()?;
        let sql = self.create_sql()?;
        tracing::debug!(entity = %self.name, "creating table");
        session.driver.exec(&sql)
    }

    /// Flush this entity's dirty rows. Returns how many remain dirty.
    pub fn flush(&self, skip_fkeys: bool) -> Result<usize> {
        flush::flush_entity(&self.rc(), skip_fkeys)
    }

    /// Compile a query against this entity.
    pub fn query(&self, args: Vec<Q>) -> Result<Query> {
        query::compile(&self.rc(), args)
    }

    // ------------------------------------------------------------------
    // Cache and dirty-set internals
    // ------------------------------------------------------------------

    pub(crate) fn row_by_id(&self, rowid: i64) -> Option<Rc<Row>> {
        let mut rows = self.rows.borrow_mut();
        let upgraded = rows.get(&rowid).and_then(Weak::upgrade);
        if upgraded.is_none() {
            rows.remove(&rowid);
        }
        upgraded
    }

    pub(crate) fn cache_get(&self, field: &str, key: &LookupKey) -> Option<Rc<Row>> {
        let mut caches = self.caches.borrow_mut();
        let cache = caches.get_mut(field)?;
        let upgraded = cache.get(key).and_then(Weak::upgrade);
        if upgraded.is_none() {
            cache.remove(key);
        }
        upgraded
    }

    /// Swap a row's entry in one unique cache from `old` to `new`.
    pub(crate) fn cache_swap(
        &self,
        field: &str,
        old: Option<&LookupKey>,
        new: Option<&LookupKey>,
        row: &Rc<Row>,
    ) {
        let mut caches = self.caches.borrow_mut();
        let Some(cache) = caches.get_mut(field) else {
            return;
        };
        if let Some(old) = old {
            let held_by_row = cache
                .get(old)
                .and_then(Weak::upgrade)
                .is_some_and(|r| r.serial() == row.serial());
            if held_by_row {
                cache.remove(old);
            }
        }
        if let Some(new) = new {
            cache.insert(new.clone(), Rc::downgrade(row));
        }
    }

    /// Insert a row into the rowid cache and every unique cache its current
    /// lookups populate.
    pub(crate) fn cache_row(&self, row: &Rc<Row>) {
        if let Some(rowid) = row.rowid() {
            self.rows.borrow_mut().insert(rowid, Rc::downgrade(row));
        }
        for field in &self.unique_names {
            if let Some(lookup) = row.lookup_of(field) {
                if !lookup.is_null() {
                    self.cache_swap(field, None, Some(&LookupKey::from(&lookup)), row);
                }
            }
        }
    }

    /// Remove a row from the rowid cache and from every unique cache entry
    /// that still points at it.
    pub(crate) fn uncache_row(&self, row: &Rc<Row>) {
        if let Some(rowid) = row.rowid() {
            let mut rows = self.rows.borrow_mut();
            if rows
                .get(&rowid)
                .and_then(Weak::upgrade)
                .is_some_and(|r| r.serial() == row.serial())
            {
                rows.remove(&rowid);
            }
        }
        for field in &self.unique_names {
            if let Some(lookup) = row.lookup_of(field) {
                self.cache_swap(field, Some(&LookupKey::from(&lookup)), None, row);
            }
        }
    }

    /// Add a row to the dirty set and raise the session's pending flag.
    pub(crate) fn mark_dirty(&self, row: &Rc<Row>) {
        row.set_dirty(true);
        let fresh = self
            .dirty
            .borrow_mut()
            .insert(row.serial(), Rc::clone(row))
            .is_none();
        if fresh {
            tracing::trace!(entity = %self.name, serial = row.serial(), "row marked dirty");
        }
        if let Ok(session) = self.session() {
            session.note_change();
        }
    }

    /// Drop a row from the dirty set.
    pub(crate) fn clear_dirty(&self, row: &Row) {
        row.set_dirty(false);
        self.dirty.borrow_mut().remove(&row.serial());
    }

    /// Snapshot of the dirty rows, in serial order.
    pub(crate) fn dirty_rows(&self) -> Vec<Rc<Row>> {
        self.dirty.borrow().values().cloned().collect()
    }

    /// Run a statement from this entity's bundle.
    pub(crate) fn with_statement<T>(
        &self,
        kind: &StmtKind,
        f: &mut dyn FnMut(&mut dyn Statement) -> Result<T>,
    ) -> Result<T> {
        self.stmts.borrow_mut().run(self, kind, f)
    }

    /// Re-read a row's committed state from the database by rowid, after a
    /// rollback. Returns false when the row no longer exists.
    pub(crate) fn reread(&self, row: &Rc<Row>, rowid: i64) -> Result<bool> {
        let session = self.session()?;
        let fetched = self.with_statement(&StmtKind::GetByRowid, &mut |stmt| {
            stmt.bind(1, &Value::Int(rowid))?;
            match session.step_stmt(stmt)? {
                Step::Row => Ok(Some(stmt.values())),
                _ => Ok(None),
            }
        })?;

        match fetched {
            Some(values) => {
                self.uncache_row(row);
                let mut committed = HashMap::new();
                let mut lookups = HashMap::new();
                for (def, value) in self.persisted.iter().zip(values.iter()) {
                    committed.insert(def.name.clone(), value.clone());
                    lookups.insert(def.name.clone(), value.clone());
                }
                row.replace_committed(committed, lookups);
                self.cache_row(row);
                Ok(true)
            }
            None => {
                self.uncache_row(row);
                Ok(false)
            }
        }
    }
}
