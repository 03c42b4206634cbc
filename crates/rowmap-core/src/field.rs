//! Field taxonomy and scalar coercion.
//!
//! Every declared field has a kind from a closed set. For scalar kinds the
//! coercion here maps a caller-supplied value to the stored form; the stored
//! and lookup forms coincide. ENTITY and JSON kinds carry richer stored
//! forms (a row reference, a mutation-tracking proxy) and are coerced one
//! layer up, in the row protocol.

use crate::error::{Error, Result, ValueErrorKind};
use crate::value::Value;
use std::cell::OnceCell;

/// The closed set of field kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Numeric,
    Int,
    Real,
    Blob,
    /// Integer primary key that mirrors the rowid. Only valid as the key.
    Id,
    /// Foreign key to another entity.
    Entity,
    /// Structured value stored as TEXT behind a mutation-tracking proxy.
    Json,
}

impl FieldKind {
    /// Parse a built-in kind tag, as used by the declaration shorthand.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "text" => Some(FieldKind::Text),
            "numeric" => Some(FieldKind::Numeric),
            "int" => Some(FieldKind::Int),
            "real" => Some(FieldKind::Real),
            "blob" => Some(FieldKind::Blob),
            "id" => Some(FieldKind::Id),
            "json" => Some(FieldKind::Json),
            _ => None,
        }
    }

    /// SQL column type emitted by the DDL generator.
    ///
    /// ENTITY fields adopt the referenced primary key's type instead; that
    /// resolution happens in the generator, which can see the registry.
    pub const fn sql_type(self) -> &'static str {
        match self {
            FieldKind::Text => "TEXT",
            FieldKind::Numeric => "NUMERIC",
            FieldKind::Int => "INTEGER",
            FieldKind::Real => "REAL",
            FieldKind::Blob => "BLOB",
            FieldKind::Id => "INTEGER",
            FieldKind::Entity => "TEXT",
            FieldKind::Json => "TEXT",
        }
    }
}

/// Resolved navigation metadata for a virtual foreign key.
///
/// Computed lazily on first traversal and cached on the descriptor.
#[derive(Debug, Clone)]
pub struct ResolvedNav {
    /// Child-side ENTITY field that points back at the parent.
    pub child_field: String,
    /// True when the navigation yields a sequence of rows.
    pub multi: bool,
}

/// Definition of a single declared field.
#[derive(Debug)]
pub struct FieldDef {
    /// Lowercased field name, assigned at registration.
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    pub unique: bool,
    /// True for virtual navigation fields; never persisted.
    pub virtual_nav: bool,
    /// Referenced entity name, for ENTITY kinds.
    pub target: Option<String>,
    /// Explicit child-side field name, for virtual navigation.
    pub child_field: Option<String>,
    /// Explicit multiplicity, for virtual navigation.
    pub multi: Option<bool>,
    resolved: OnceCell<ResolvedNav>,
}

impl Clone for FieldDef {
    fn clone(&self) -> Self {
        // The navigation cache is per-registration; a clone starts cold.
        Self {
            name: self.name.clone(),
            kind: self.kind,
            required: self.required,
            unique: self.unique,
            virtual_nav: self.virtual_nav,
            target: self.target.clone(),
            child_field: self.child_field.clone(),
            multi: self.multi,
            resolved: OnceCell::new(),
        }
    }
}

impl FieldDef {
    /// Create an unnamed definition of the given kind.
    pub fn new(kind: FieldKind) -> Self {
        Self {
            name: String::new(),
            kind,
            required: false,
            unique: false,
            virtual_nav: false,
            target: None,
            child_field: None,
            multi: None,
            resolved: OnceCell::new(),
        }
    }

    /// Mark as required (NOT NULL).
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Mark as unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Turn a foreign key into a virtual navigation field.
    pub fn virtual_nav(mut self) -> Self {
        self.virtual_nav = true;
        self
    }

    /// Name the child-side field of a virtual navigation.
    pub fn child(mut self, field: impl Into<String>) -> Self {
        self.child_field = Some(field.into().to_lowercase());
        self
    }

    /// Declare the multiplicity of a virtual navigation explicitly.
    pub fn multi(mut self, multi: bool) -> Self {
        self.multi = Some(multi);
        self
    }

    /// Cached navigation resolution, if one has been computed.
    pub fn resolved_nav(&self) -> Option<&ResolvedNav> {
        self.resolved.get()
    }

    /// Store the navigation resolution. Later calls keep the first value.
    pub fn cache_nav(&self, nav: ResolvedNav) -> &ResolvedNav {
        self.resolved.get_or_init(|| nav)
    }
}

/// Field factory: TEXT.
pub fn text() -> FieldDef {
    FieldDef::new(FieldKind::Text)
}

/// Field factory: NUMERIC.
pub fn numeric() -> FieldDef {
    FieldDef::new(FieldKind::Numeric)
}

/// Field factory: INT.
pub fn int() -> FieldDef {
    FieldDef::new(FieldKind::Int)
}

/// Field factory: REAL.
pub fn real() -> FieldDef {
    FieldDef::new(FieldKind::Real)
}

/// Field factory: BLOB.
pub fn blob() -> FieldDef {
    FieldDef::new(FieldKind::Blob)
}

/// Field factory: ID primary key.
pub fn id() -> FieldDef {
    FieldDef::new(FieldKind::Id).unique()
}

/// Field factory: foreign key to `target`.
pub fn fkey(target: impl Into<String>) -> FieldDef {
    let mut def = FieldDef::new(FieldKind::Entity);
    def.target = Some(target.into());
    def
}

/// Coerce a caller-supplied scalar to the stored form of a scalar kind.
///
/// For scalar kinds the lookup form equals the stored form. NULL handling
/// (accepted iff the field is not required) happens in the caller, which
/// also owns ENTITY and JSON coercion.
pub fn coerce_scalar(def: &FieldDef, value: &Value) -> Result<Value> {
    let reject = |found: &Value| {
        Err(Error::value(
            ValueErrorKind::Uncoercible,
            def.name.clone(),
            format!("cannot coerce {} to {:?}", found.type_name(), def.kind),
        ))
    };

    match def.kind {
        FieldKind::Text => match value {
            Value::Text(s) => Ok(Value::Text(s.clone())),
            Value::Int(v) => Ok(Value::Text(v.to_string())),
            Value::Real(v) => Ok(Value::Text(v.to_string())),
            Value::Blob(b) => match std::str::from_utf8(b) {
                Ok(s) => Ok(Value::Text(s.to_string())),
                Err(_) => reject(value),
            },
            Value::Null => reject(value),
        },
        FieldKind::Blob => match value {
            Value::Blob(b) => Ok(Value::Blob(b.clone())),
            Value::Text(s) => Ok(Value::Blob(s.as_bytes().to_vec())),
            Value::Int(v) => Ok(Value::Blob(v.to_string().into_bytes())),
            Value::Real(v) => Ok(Value::Blob(v.to_string().into_bytes())),
            Value::Null => reject(value),
        },
        FieldKind::Numeric | FieldKind::Real => match parse_real(value) {
            Some(v) => Ok(Value::Real(v)),
            None => reject(value),
        },
        FieldKind::Int | FieldKind::Id => match parse_real(value) {
            Some(v) => {
                let floored = v.floor();
                if floored != v {
                    tracing::warn!(
                        field = %def.name,
                        value = v,
                        stored = floored,
                        "fractional value floored for INT field"
                    );
                }
                Ok(Value::Int(floored as i64))
            }
            None => reject(value),
        },
        FieldKind::Entity | FieldKind::Json => Err(Error::value(
            ValueErrorKind::Uncoercible,
            def.name.clone(),
            "entity and json kinds are coerced by the row protocol",
        )),
    }
}

fn parse_real(value: &Value) -> Option<f64> {
    match value {
        Value::Int(v) => Some(*v as f64),
        Value::Real(v) => Some(*v),
        Value::Text(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(def: FieldDef, name: &str) -> FieldDef {
        let mut def = def;
        def.name = name.to_string();
        def
    }

    #[test]
    fn text_stringifies_numbers() {
        let def = named(text(), "t");
        assert_eq!(
            coerce_scalar(&def, &Value::Int(5)).unwrap(),
            Value::Text("5".into())
        );
        assert_eq!(
            coerce_scalar(&def, &Value::Text("x".into())).unwrap(),
            Value::Text("x".into())
        );
    }

    #[test]
    fn numeric_parses_strings() {
        let def = named(numeric(), "n");
        assert_eq!(
            coerce_scalar(&def, &Value::Text("7.1".into())).unwrap(),
            Value::Real(7.1)
        );
        assert!(coerce_scalar(&def, &Value::Text("blah".into())).is_err());
    }

    #[test]
    fn int_floors_fractional_input() {
        let def = named(int(), "i");
        assert_eq!(
            coerce_scalar(&def, &Value::Text("5.2".into())).unwrap(),
            Value::Int(5)
        );
        assert_eq!(
            coerce_scalar(&def, &Value::Real(9.7)).unwrap(),
            Value::Int(9)
        );
    }

    #[test]
    fn real_keeps_fraction() {
        let def = named(real(), "r");
        assert_eq!(
            coerce_scalar(&def, &Value::Text("9.7".into())).unwrap(),
            Value::Real(9.7)
        );
    }

    #[test]
    fn blob_accepts_text_bytes() {
        let def = named(blob(), "b");
        assert_eq!(
            coerce_scalar(&def, &Value::Text("ab".into())).unwrap(),
            Value::Blob(vec![b'a', b'b'])
        );
    }

    #[test]
    fn id_is_unique_by_construction() {
        assert!(id().unique);
        assert_eq!(id().kind, FieldKind::Id);
    }

    #[test]
    fn kind_tags() {
        assert_eq!(FieldKind::from_tag("text"), Some(FieldKind::Text));
        assert_eq!(FieldKind::from_tag("id"), Some(FieldKind::Id));
        assert_eq!(FieldKind::from_tag("person"), None);
    }

    #[test]
    fn nav_cache_keeps_first_resolution() {
        let def = fkey("child").virtual_nav();
        assert!(def.resolved_nav().is_none());
        def.cache_nav(ResolvedNav {
            child_field: "parent".into(),
            multi: true,
        });
        def.cache_nav(ResolvedNav {
            child_field: "other".into(),
            multi: false,
        });
        let nav = def.resolved_nav().unwrap();
        assert_eq!(nav.child_field, "parent");
        assert!(nav.multi);
    }
}
