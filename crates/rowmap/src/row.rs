//! The row object: three value maps, the accessor protocol, and virtual
//! foreign-key navigation.
//!
//! A row keeps *committed* values (known to match the database), *overlay*
//! values (written during the current transaction) and per-field *lookup*
//! values (the primitive form used for equality against the database).
//! Reads consult the overlay before the committed map; `raw` and the
//! underscore-prefixed accessor return the lookup form.

#[cfg(feature = "json")]
use crate::json::JsonProxy;
use crate::entity::Entity;
use crate::query::{CmpOp, Node, Term};
use crate::txn::RecordKind;
use rowmap_core::{
    Error, FieldDef, FieldKind, LookupKey, ResolvedNav, Result, SchemaErrorKind, Value,
    ValueErrorKind, coerce_scalar,
};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

/// A caller-supplied field value.
///
/// Scalars coerce per the field kind; `Row` assigns foreign keys by
/// reference; `Json` carries a structured value for JSON fields.
#[derive(Debug, Clone)]
pub enum Arg {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Row(Rc<Row>),
    #[cfg(feature = "json")]
    Json(serde_json::Value),
}

impl From<i64> for Arg {
    fn from(v: i64) -> Self {
        Arg::Int(v)
    }
}

impl From<i32> for Arg {
    fn from(v: i32) -> Self {
        Arg::Int(i64::from(v))
    }
}

impl From<f64> for Arg {
    fn from(v: f64) -> Self {
        Arg::Real(v)
    }
}

impl From<&str> for Arg {
    fn from(v: &str) -> Self {
        Arg::Text(v.to_string())
    }
}

impl From<String> for Arg {
    fn from(v: String) -> Self {
        Arg::Text(v)
    }
}

impl From<Vec<u8>> for Arg {
    fn from(v: Vec<u8>) -> Self {
        Arg::Blob(v)
    }
}

impl From<Rc<Row>> for Arg {
    fn from(v: Rc<Row>) -> Self {
        Arg::Row(v)
    }
}

impl From<&Rc<Row>> for Arg {
    fn from(v: &Rc<Row>) -> Self {
        Arg::Row(Rc::clone(v))
    }
}

#[cfg(feature = "json")]
impl From<serde_json::Value> for Arg {
    fn from(v: serde_json::Value) -> Self {
        Arg::Json(v)
    }
}

impl From<Value> for Arg {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => Arg::Null,
            Value::Int(v) => Arg::Int(v),
            Value::Real(v) => Arg::Real(v),
            Value::Text(v) => Arg::Text(v),
            Value::Blob(v) => Arg::Blob(v),
        }
    }
}

impl Arg {
    /// The plain-scalar view of this argument, if it has one.
    fn as_scalar(&self) -> Option<Value> {
        match self {
            Arg::Null => Some(Value::Null),
            Arg::Int(v) => Some(Value::Int(*v)),
            Arg::Real(v) => Some(Value::Real(*v)),
            Arg::Text(v) => Some(Value::Text(v.clone())),
            Arg::Blob(v) => Some(Value::Blob(v.clone())),
            _ => None,
        }
    }
}

/// The stored form of a field value inside a row's value maps.
#[derive(Clone, Debug)]
pub(crate) enum Stored {
    /// A plain scalar; for ENTITY fields, the referent's primary key.
    Scalar(Value),
    /// An ENTITY referent that has not been inserted yet. The flush engine
    /// observes this and defers or resolves the reference.
    Pending(Rc<Row>),
    /// A structured JSON value behind its mutation-tracking proxy.
    #[cfg(feature = "json")]
    Json(Rc<JsonProxy>),
}

/// The result of resolving a field read.
#[derive(Clone, Debug)]
pub enum Resolved {
    /// NULL or never-set.
    Null,
    /// A scalar value.
    Value(Value),
    /// A foreign-key referent or singular navigation result.
    Row(Rc<Row>),
    /// A multi-valued navigation result, ordered.
    Rows(Vec<Rc<Row>>),
    /// A structured JSON value; mutations through the proxy re-dirty the row.
    #[cfg(feature = "json")]
    Json(Rc<JsonProxy>),
}

impl Resolved {
    pub fn is_null(&self) -> bool {
        matches!(self, Resolved::Null)
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Resolved::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_value().and_then(Value::as_str)
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_value().and_then(Value::as_i64)
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.as_value().and_then(Value::as_f64)
    }

    pub fn as_row(&self) -> Option<&Rc<Row>> {
        match self {
            Resolved::Row(row) => Some(row),
            _ => None,
        }
    }

    pub fn as_rows(&self) -> Option<&[Rc<Row>]> {
        match self {
            Resolved::Rows(rows) => Some(rows),
            _ => None,
        }
    }

    #[cfg(feature = "json")]
    pub fn as_json(&self) -> Option<&Rc<JsonProxy>> {
        match self {
            Resolved::Json(proxy) => Some(proxy),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Row {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Row")
            .field("serial", &self.serial)
            .field("rowid", &self.rowid.get())
            .field("deleted", &self.deleted.get())
            .field("dirty", &self.dirty.get())
            .finish_non_exhaustive()
    }
}

/// An identity-mapped row.
pub struct Row {
    this: std::rc::Weak<Row>,
    entity: Rc<Entity>,
    serial: u64,
    rowid: Cell<Option<i64>>,
    committed: RefCell<HashMap<String, Stored>>,
    overlay: RefCell<HashMap<String, Stored>>,
    lookups: RefCell<HashMap<String, Value>>,
    deleted: Cell<bool>,
    dirty: Cell<bool>,
    txn_dirty: Cell<bool>,
}

impl Row {
    pub(crate) fn fresh(entity: Rc<Entity>, serial: u64) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            this: this.clone(),
            entity,
            serial,
            rowid: Cell::new(None),
            committed: RefCell::new(HashMap::new()),
            overlay: RefCell::new(HashMap::new()),
            lookups: RefCell::new(HashMap::new()),
            deleted: Cell::new(false),
            dirty: Cell::new(false),
            txn_dirty: Cell::new(false),
        })
    }

    pub(crate) fn from_db(
        entity: Rc<Entity>,
        serial: u64,
        rowid: i64,
        committed: HashMap<String, Value>,
        lookups: HashMap<String, Value>,
    ) -> Rc<Self> {
        let committed = committed
            .into_iter()
            .map(|(k, v)| (k, Stored::Scalar(v)))
            .collect();
        Rc::new_cyclic(|this| Self {
            this: this.clone(),
            entity,
            serial,
            rowid: Cell::new(Some(rowid)),
            committed: RefCell::new(committed),
            overlay: RefCell::new(HashMap::new()),
            lookups: RefCell::new(lookups),
            deleted: Cell::new(false),
            dirty: Cell::new(false),
            txn_dirty: Cell::new(false),
        })
    }

    /// A strong handle to this row; valid while any strong handle exists.
    fn rc(&self) -> Rc<Row> {
        self.this.upgrade().expect("row reachable through a handle")
    }

    /// The entity this row belongs to.
    pub fn entity(&self) -> &Rc<Entity> {
        &self.entity
    }

    /// The rowid, once the row has been inserted.
    pub fn rowid(&self) -> Option<i64> {
        self.rowid.get()
    }

    /// True once `delete` has been called.
    pub fn deleted(&self) -> bool {
        self.deleted.get()
    }

    /// True while the row has pending database effects.
    pub fn dirty(&self) -> bool {
        self.dirty.get()
    }

    /// Iterate the row's field definitions, virtual navigation included.
    pub fn fields(&self) -> impl Iterator<Item = &Rc<FieldDef>> {
        self.entity.fields()
    }

    pub(crate) fn serial(&self) -> u64 {
        self.serial
    }

    pub(crate) fn set_dirty(&self, dirty: bool) {
        self.dirty.set(dirty);
    }

    pub(crate) fn set_txn_dirty(&self, v: bool) {
        self.txn_dirty.set(v);
    }

    pub(crate) fn set_deleted_flag(&self, v: bool) {
        self.deleted.set(v);
    }

    pub(crate) fn set_rowid(&self, rowid: Option<i64>) {
        self.rowid.set(rowid);
    }

    /// True when the field has been assigned (or loaded) in any map.
    pub(crate) fn has_field(&self, name: &str) -> bool {
        self.overlay.borrow().contains_key(name) || self.committed.borrow().contains_key(name)
    }

    /// Current lookup value of a field, if one has been recorded.
    pub(crate) fn lookup_of(&self, name: &str) -> Option<Value> {
        self.lookups.borrow().get(name).cloned()
    }

    /// The primary key in lookup form, regardless of insertion state.
    pub(crate) fn pk_lookup(&self) -> Option<Value> {
        if self.entity.key() == "rowid" {
            self.rowid.get().map(Value::Int)
        } else {
            self.lookup_of(self.entity.key()).filter(|v| !v.is_null())
        }
    }

    /// The primary key in lookup form, only once the row is in the database.
    pub(crate) fn pk_if_inserted(&self) -> Option<Value> {
        if self.rowid.get().is_some() {
            self.pk_lookup()
        } else {
            None
        }
    }

    /// The stored form of a field, overlay masking committed.
    pub(crate) fn stored_of(&self, name: &str) -> Option<Stored> {
        if let Some(stored) = self.overlay.borrow().get(name) {
            return Some(stored.clone());
        }
        self.committed.borrow().get(name).cloned()
    }

    // ------------------------------------------------------------------
    // Accessor protocol
    // ------------------------------------------------------------------

    /// Read a field. Field names are case-insensitive; a leading underscore
    /// returns the raw (lookup) value instead of the resolved one.
    pub fn get(&self, name: &str) -> Result<Resolved> {
        if let Some(stripped) = name.strip_prefix('_') {
            let value = self.raw(stripped)?;
            return Ok(if value.is_null() {
                Resolved::Null
            } else {
                Resolved::Value(value)
            });
        }

        let lname = name.to_lowercase();
        let def = self.field_def(&lname)?;
        if def.virtual_nav {
            return self.resolve_nav(&def);
        }

        let Some(stored) = self.stored_of(&lname) else {
            return Ok(Resolved::Null);
        };

        match stored {
            Stored::Scalar(Value::Null) => Ok(Resolved::Null),
            Stored::Scalar(value) => match def.kind {
                FieldKind::Entity => {
                    let session = self.entity.session()?;
                    let target_name = def.target.as_deref().unwrap_or_default();
                    let target = session.entity(target_name).ok_or_else(|| {
                        Error::schema(
                            SchemaErrorKind::UnknownEntity,
                            format!("entity '{target_name}' is not registered"),
                        )
                    })?;
                    Ok(match target.get(value)? {
                        Some(row) => Resolved::Row(row),
                        None => Resolved::Null,
                    })
                }
                #[cfg(feature = "json")]
                FieldKind::Json => {
                    let Value::Text(encoded) = value else {
                        return Err(Error::value(
                            ValueErrorKind::InvalidJson,
                            lname,
                            "json column holds a non-text value",
                        ));
                    };
                    let proxy = JsonProxy::decode(&encoded, self.this.clone(), &lname)?;
                    self.install_json(&lname, &proxy);
                    Ok(Resolved::Json(proxy))
                }
                _ => Ok(Resolved::Value(value)),
            },
            Stored::Pending(row) => Ok(Resolved::Row(row)),
            #[cfg(feature = "json")]
            Stored::Json(proxy) => Ok(Resolved::Json(proxy)),
        }
    }

    /// Read a field's raw (lookup) value.
    pub fn raw(&self, name: &str) -> Result<Value> {
        let lname = name.to_lowercase();
        let def = self.field_def(&lname)?;
        if def.virtual_nav {
            return Ok(Value::Null);
        }

        #[cfg(feature = "json")]
        if def.kind == FieldKind::Json {
            if let Some(Stored::Json(proxy)) = self.stored_of(&lname) {
                let encoded = proxy.encode()?;
                self.lookups
                    .borrow_mut()
                    .insert(lname, Value::Text(encoded.clone()));
                return Ok(Value::Text(encoded));
            }
        }

        Ok(self
            .lookups
            .borrow()
            .get(&lname)
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Write a field, coercing the value per the field kind.
    pub fn set(&self, name: &str, value: impl Into<Arg>) -> Result<()> {
        self.set_with(name, value.into(), true)
    }

    pub(crate) fn set_with(&self, name: &str, arg: Arg, check_db: bool) -> Result<()> {
        let lname = name.to_lowercase();
        let def = self.field_def(&lname)?;
        if def.virtual_nav {
            return Err(Error::value(
                ValueErrorKind::VirtualWrite,
                lname,
                "virtual navigation fields cannot be written",
            ));
        }
        let session = self.entity.session()?;

        let (stored, lookup) = self.coerce_arg(&def, arg)?;
        let pending = matches!(stored, Stored::Pending(_));

        // `set(f, raw(f))` must leave a clean row clean.
        if !pending
            && self.has_field(&lname)
            && self.lookup_of(&lname).as_ref() == Some(&lookup)
        {
            return Ok(());
        }

        if def.unique && !lookup.is_null() {
            let key = LookupKey::from(&lookup);
            if let Some(other) = self.entity.cache_get(&lname, &key) {
                if other.serial() != self.serial {
                    return Err(Error::unique(
                        self.entity.name(),
                        &lname,
                        format!("value '{lookup}' is already present"),
                    ));
                }
            }
            if check_db {
                if let Some(found) = self.entity.probe(&lname, &lookup)? {
                    if self.rowid.get() != Some(found) {
                        return Err(Error::unique(
                            self.entity.name(),
                            &lname,
                            format!("value '{lookup}' already exists in the database"),
                        ));
                    }
                }
            }
        }

        if def.unique {
            let old = self.lookup_of(&lname).map(|v| LookupKey::from(&v));
            let new = (!lookup.is_null()).then(|| LookupKey::from(&lookup));
            self.entity.cache_swap(&lname, old.as_ref(), new.as_ref(), &self.rc());
        }

        if session.in_txn() {
            session.txn_register(&self.rc(), RecordKind::Touched);
            self.overlay.borrow_mut().insert(lname.clone(), stored);
        } else {
            self.committed.borrow_mut().insert(lname.clone(), stored);
        }
        self.lookups.borrow_mut().insert(lname, lookup);
        self.entity.mark_dirty(&self.rc());
        Ok(())
    }

    /// Mark the row for deletion on the next flush.
    pub fn delete(&self) -> Result<()> {
        if self.deleted.get() {
            return Ok(());
        }
        let session = self.entity.session()?;
        session.txn_register(&self.rc(), RecordKind::Touched);
        self.deleted.set(true);
        self.entity.mark_dirty(&self.rc());
        Ok(())
    }

    /// Flush this row alone. Returns true when no pending work remains.
    pub fn flush(&self, skip_fkeys: bool) -> Result<bool> {
        crate::flush::flush_row(&self.entity, &self.rc(), skip_fkeys)
    }

    /// Structured snapshot of the row's state, for diagnostics.
    pub fn debug_snapshot(&self) -> serde_json::Value {
        let lookups = self.lookups.borrow();
        let mut fields = serde_json::Map::new();
        for (name, value) in lookups.iter() {
            fields.insert(name.clone(), lookup_to_json(value));
        }
        let overlayed: Vec<String> = self.overlay.borrow().keys().cloned().collect();
        serde_json::json!({
            "entity": self.entity.name(),
            "rowid": self.rowid.get(),
            "deleted": self.deleted.get(),
            "dirty": self.dirty.get(),
            "dirty_in_transaction": self.txn_dirty.get(),
            "lookups": serde_json::Value::Object(fields),
            "overlayed_fields": overlayed,
        })
    }

    fn field_def(&self, lname: &str) -> Result<Rc<FieldDef>> {
        self.entity.field(lname).cloned().ok_or_else(|| {
            Error::value(
                ValueErrorKind::UnknownField,
                lname.to_string(),
                format!("no such field on entity '{}'", self.entity.name()),
            )
        })
    }

    // ------------------------------------------------------------------
    // Coercion
    // ------------------------------------------------------------------

    fn coerce_arg(&self, def: &Rc<FieldDef>, arg: Arg) -> Result<(Stored, Value)> {
        if matches!(arg, Arg::Null) {
            if def.required {
                return Err(Error::value(
                    ValueErrorKind::RequiredMissing,
                    def.name.clone(),
                    "required field cannot be null",
                ));
            }
            return Ok((Stored::Scalar(Value::Null), Value::Null));
        }

        match def.kind {
            FieldKind::Entity => match arg {
                Arg::Row(row) => {
                    let target = def.target.as_deref().unwrap_or_default();
                    if row.entity().name() != target {
                        return Err(Error::value(
                            ValueErrorKind::WrongEntity,
                            def.name.clone(),
                            format!(
                                "expected a '{target}' row, got '{}'",
                                row.entity().name()
                            ),
                        ));
                    }
                    match row.pk_if_inserted() {
                        Some(pk) => Ok((Stored::Scalar(pk.clone()), pk)),
                        None => Ok((Stored::Pending(row), Value::Null)),
                    }
                }
                #[cfg(feature = "json")]
                Arg::Json(_) => Err(Error::value(
                    ValueErrorKind::Uncoercible,
                    def.name.clone(),
                    "cannot assign a json value to a foreign key",
                )),
                other => {
                    let value = other.as_scalar().expect("non-composite argument");
                    Ok((Stored::Scalar(value.clone()), value))
                }
            },
            #[cfg(feature = "json")]
            FieldKind::Json => {
                let (proxy, encoded) = match arg {
                    Arg::Text(text) => {
                        let proxy =
                            JsonProxy::decode(&text, self.this.clone(), &def.name)?;
                        (proxy, text)
                    }
                    Arg::Json(value) => {
                        let proxy = JsonProxy::wrap(value, self.this.clone(), &def.name);
                        let encoded = proxy.encode()?;
                        (proxy, encoded)
                    }
                    Arg::Int(v) => {
                        let proxy = JsonProxy::wrap(
                            serde_json::Value::from(v),
                            self.this.clone(),
                            &def.name,
                        );
                        let encoded = proxy.encode()?;
                        (proxy, encoded)
                    }
                    Arg::Real(v) => {
                        let proxy = JsonProxy::wrap(
                            serde_json::Value::from(v),
                            self.this.clone(),
                            &def.name,
                        );
                        let encoded = proxy.encode()?;
                        (proxy, encoded)
                    }
                    _ => {
                        return Err(Error::value(
                            ValueErrorKind::Uncoercible,
                            def.name.clone(),
                            "cannot coerce value to json",
                        ));
                    }
                };
                Ok((Stored::Json(proxy), Value::Text(encoded)))
            }
            _ => {
                let Some(scalar) = arg.as_scalar() else {
                    return Err(Error::value(
                        ValueErrorKind::Uncoercible,
                        def.name.clone(),
                        format!("composite value rejected for {:?} field", def.kind),
                    ));
                };
                let coerced = coerce_scalar(def, &scalar)?;
                Ok((Stored::Scalar(coerced.clone()), coerced))
            }
        }
    }

    #[cfg(feature = "json")]
    fn install_json(&self, lname: &str, proxy: &Rc<JsonProxy>) {
        // Replace the encoded text with the live proxy in whichever map the
        // value came from, so later reads share the same proxy.
        let mut overlay = self.overlay.borrow_mut();
        if overlay.contains_key(lname) {
            overlay.insert(lname.to_string(), Stored::Json(Rc::clone(proxy)));
            return;
        }
        drop(overlay);
        self.committed
            .borrow_mut()
            .insert(lname.to_string(), Stored::Json(Rc::clone(proxy)));
    }

    // ------------------------------------------------------------------
    // Virtual navigation
    // ------------------------------------------------------------------

    fn resolve_nav(&self, def: &Rc<FieldDef>) -> Result<Resolved> {
        let session = self.entity.session()?;
        let child_name = def.target.as_deref().unwrap_or_default();
        let child = session.entity(child_name).ok_or_else(|| {
            Error::schema(
                SchemaErrorKind::UnknownEntity,
                format!("entity '{child_name}' is not registered"),
            )
        })?;

        let nav = match def.resolved_nav() {
            Some(nav) => nav.clone(),
            None => {
                let nav = infer_nav(&self.entity, &child, def)?;
                def.cache_nav(nav).clone()
            }
        };

        let Some(pk) = self.pk_lookup() else {
            return Ok(if nav.multi {
                Resolved::Rows(Vec::new())
            } else {
                Resolved::Null
            });
        };

        if !nav.multi {
            if let Some(hit) = child.cache_get(&nav.child_field, &LookupKey::from(&pk)) {
                if !hit.deleted() {
                    return Ok(Resolved::Row(hit));
                }
            }
        }

        let query = crate::query::compile_node(
            &child,
            Node::Cmp {
                op: CmpOp::Eq,
                lhs: Term::Field(nav.child_field.clone()),
                rhs: Term::Const(pk),
            },
        )?;
        let rows = query.run(&[])?;
        Ok(if nav.multi {
            Resolved::Rows(rows)
        } else {
            match rows.into_iter().next() {
                Some(row) => Resolved::Row(row),
                None => Resolved::Null,
            }
        })
    }
}

/// Find the child-side fkey field backing a virtual navigation and infer
/// its multiplicity from the field's uniqueness.
fn infer_nav(parent: &Rc<Entity>, child: &Rc<Entity>, def: &Rc<FieldDef>) -> Result<ResolvedNav> {
    let candidates: Vec<&Rc<FieldDef>> = child
        .persisted()
        .iter()
        .filter(|f| f.kind == FieldKind::Entity && f.target.as_deref() == Some(parent.name()))
        .collect();

    let chosen = if let Some(wanted) = &def.child_field {
        candidates
            .iter()
            .find(|f| &f.name == wanted)
            .ok_or_else(|| {
                Error::schema(
                    SchemaErrorKind::InvalidField,
                    format!(
                        "'{}' has no fkey field '{}' pointing at '{}'",
                        child.name(),
                        wanted,
                        parent.name()
                    ),
                )
            })?
    } else if candidates.len() == 1 {
        candidates.first().expect("one candidate")
    } else {
        candidates
            .iter()
            .find(|f| f.name == parent.name())
            .ok_or_else(|| {
                Error::schema(
                    SchemaErrorKind::InvalidField,
                    format!(
                        "ambiguous navigation from '{}' to '{}': {} candidate fkeys",
                        parent.name(),
                        child.name(),
                        candidates.len()
                    ),
                )
            })?
    };

    let multi = !chosen.unique;
    if let Some(declared) = def.multi {
        if declared != multi {
            return Err(Error::schema(
                SchemaErrorKind::InvalidField,
                format!(
                    "navigation '{}' declared multi={declared} but '{}.{}' is {}",
                    def.name,
                    child.name(),
                    chosen.name,
                    if chosen.unique { "unique" } else { "not unique" }
                ),
            ));
        }
    }

    Ok(ResolvedNav {
        child_field: chosen.name.clone(),
        multi,
    })
}

// ------------------------------------------------------------------
// Rollback support
// ------------------------------------------------------------------

impl Row {
    /// Promote overlay values into the committed map after a commit.
    pub(crate) fn promote_overlay(&self) {
        let mut overlay = self.overlay.borrow_mut();
        if overlay.is_empty() {
            return;
        }
        let mut committed = self.committed.borrow_mut();
        for (name, stored) in overlay.drain() {
            committed.insert(name, stored);
        }
    }

    /// Discard overlay values after a rollback.
    pub(crate) fn discard_overlay(&self) {
        self.overlay.borrow_mut().clear();
        // Lookup values for overlayed fields are rebuilt from the committed
        // map by the caller's reread, or fall back to committed lookups.
    }

    /// Replace the committed state wholesale after a rollback reread.
    pub(crate) fn replace_committed(
        &self,
        committed: HashMap<String, Value>,
        lookups: HashMap<String, Value>,
    ) {
        let committed = committed
            .into_iter()
            .map(|(k, v)| (k, Stored::Scalar(v)))
            .collect();
        *self.committed.borrow_mut() = committed;
        *self.lookups.borrow_mut() = lookups;
    }

    /// Record a value produced by the flush engine (an assigned ID key or a
    /// resolved forward reference). Under a transaction the write lands in
    /// the overlay, so a rollback discards it.
    pub(crate) fn store_direct(&self, name: &str, stored: Stored, lookup: Value, in_txn: bool) {
        if in_txn {
            self.overlay.borrow_mut().insert(name.to_string(), stored);
        } else {
            self.committed.borrow_mut().insert(name.to_string(), stored);
        }
        self.lookups.borrow_mut().insert(name.to_string(), lookup);
    }

    /// Rebuild lookup values from the committed map, for rows whose overlay
    /// was discarded without a database reread.
    pub(crate) fn rebuild_lookups(&self) {
        let committed = self.committed.borrow();
        let mut lookups = self.lookups.borrow_mut();
        lookups.clear();
        for (name, stored) in committed.iter() {
            match stored {
                Stored::Scalar(v) => {
                    lookups.insert(name.clone(), v.clone());
                }
                Stored::Pending(_) => {
                    lookups.insert(name.clone(), Value::Null);
                }
                #[cfg(feature = "json")]
                Stored::Json(proxy) => {
                    if let Ok(encoded) = proxy.encode() {
                        lookups.insert(name.clone(), Value::Text(encoded));
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for Row {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Row")
            .field("entity", &self.entity.name())
            .field("rowid", &self.rowid.get())
            .field("deleted", &self.deleted.get())
            .field("dirty", &self.dirty.get())
            .finish_non_exhaustive()
    }
}

fn lookup_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Int(v) => serde_json::Value::from(*v),
        Value::Real(v) => serde_json::Value::from(*v),
        Value::Text(s) => serde_json::Value::from(s.clone()),
        Value::Blob(b) => serde_json::Value::from(format!("<blob {} bytes>", b.len())),
    }
}
