//! Schema registry: entity declaration, shorthand expansion, and the
//! closure check that rejects cycles of required foreign keys.

use crate::entity::Entity;
use crate::session::SessionInner;
use regex::Regex;
use rowmap_core::{Error, FieldDef, FieldKind, Result, SchemaErrorKind, fkey, id};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::LazyLock;

static FIELD_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("valid pattern"));
static SHORTHAND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([a-z][a-z0-9_]*)([?!*]*)$").expect("valid pattern"));

/// How the primary key of a new entity is specified.
#[derive(Debug, Clone)]
pub enum KeySpec {
    /// Use the `default_key` register if set, otherwise the implicit rowid.
    Default,
    /// The implicit integer rowid.
    Rowid,
    /// An existing field, forced unique.
    Field(String),
    /// A fresh ID field with this name, prepended to the field list.
    Id(String),
}

impl From<&str> for KeySpec {
    fn from(name: &str) -> Self {
        KeySpec::Field(name.to_string())
    }
}

impl From<Option<&str>> for KeySpec {
    fn from(name: Option<&str>) -> Self {
        name.map_or(KeySpec::Default, KeySpec::from)
    }
}

/// A field in a declaration: a shorthand string or a full definition.
#[derive(Debug, Clone)]
pub enum FieldSpec {
    Short(String),
    Def(FieldDef),
}

impl From<&str> for FieldSpec {
    fn from(s: &str) -> Self {
        FieldSpec::Short(s.to_string())
    }
}

impl From<FieldDef> for FieldSpec {
    fn from(def: FieldDef) -> Self {
        FieldSpec::Def(def)
    }
}

/// The registered entities, in declaration order.
#[derive(Default)]
pub(crate) struct Registry {
    entities: Vec<Rc<Entity>>,
    by_name: HashMap<String, usize>,
}

impl Registry {
    pub(crate) fn get(&self, name: &str) -> Option<Rc<Entity>> {
        self.by_name
            .get(name)
            .map(|&i| Rc::clone(&self.entities[i]))
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub(crate) fn insert(&mut self, entity: Rc<Entity>) {
        self.by_name
            .insert(entity.name().to_string(), self.entities.len());
        self.entities.push(entity);
    }

    pub(crate) fn all(&self) -> Vec<Rc<Entity>> {
        self.entities.clone()
    }
}

/// Expand a `"<tag><flags>"` shorthand into a field definition.
///
/// The tag names a built-in kind or, failing that, a foreign-key target.
/// Flags: `!` required, `?` explicitly optional, `*` unique on built-in
/// kinds and virtual navigation on entity tags.
pub(crate) fn parse_shorthand(input: &str) -> Result<FieldDef> {
    let lowered = input.to_lowercase();
    let captures = SHORTHAND.captures(lowered.trim()).ok_or_else(|| {
        Error::schema(
            SchemaErrorKind::InvalidField,
            format!("invalid field shorthand '{input}'"),
        )
    })?;
    let tag = captures.get(1).expect("tag group").as_str();
    let flags = captures.get(2).expect("flags group").as_str();

    let mut def = match FieldKind::from_tag(tag) {
        Some(FieldKind::Id) => id(),
        Some(kind) => FieldDef::new(kind),
        None => fkey(tag),
    };

    for flag in flags.chars() {
        match flag {
            '!' => def.required = true,
            '?' => def.required = false,
            '*' => {
                if def.kind == FieldKind::Entity {
                    def.virtual_nav = true;
                } else {
                    def.unique = true;
                }
            }
            _ => unreachable!("pattern admits only ?!*"),
        }
    }
    Ok(def)
}

/// Declare a new entity on the session.
pub(crate) fn declare(
    inner: &Rc<SessionInner>,
    name: &str,
    key: KeySpec,
    fields: Vec<(&str, FieldSpec)>,
) -> Result<Rc<Entity>> {
    let name = name.to_lowercase();
    if !FIELD_NAME.is_match(&name) {
        return Err(Error::schema(
            SchemaErrorKind::ReservedName,
            format!("invalid entity name '{name}'"),
        ));
    }
    if inner.registry.borrow().contains(&name) {
        return Err(Error::schema(
            SchemaErrorKind::DuplicateEntity,
            format!("entity '{name}' is already registered"),
        ));
    }

    let mut defs: Vec<Rc<FieldDef>> = Vec::with_capacity(fields.len());
    let mut names = HashSet::new();
    for (fname, spec) in fields {
        let lname = fname.to_lowercase();
        if lname == "rowid" {
            return Err(Error::schema(
                SchemaErrorKind::ReservedName,
                "'rowid' is a reserved field name",
            ));
        }
        if !FIELD_NAME.is_match(&lname) {
            return Err(Error::schema(
                SchemaErrorKind::ReservedName,
                format!("invalid field name '{fname}'"),
            ));
        }
        if !names.insert(lname.clone()) {
            return Err(Error::schema(
                SchemaErrorKind::InvalidField,
                format!("field '{lname}' declared twice"),
            ));
        }
        let mut def = match spec {
            FieldSpec::Short(s) => parse_shorthand(&s)?,
            FieldSpec::Def(def) => def,
        };
        def.name = lname;
        if let Some(target) = def.target.take() {
            def.target = Some(target.to_lowercase());
        }
        defs.push(Rc::new(def));
    }

    let key = resolve_key(inner, &name, key, &mut defs, &mut names)?;
    validate_fields(&name, &key, &defs)?;
    check_cycles(inner, &name, &defs)?;

    let entity = Entity::build(Rc::downgrade(inner), name.clone(), key, defs);
    inner.registry.borrow_mut().insert(Rc::clone(&entity));
    tracing::debug!(
        entity = %name,
        fields = entity.fields().count(),
        key = entity.key(),
        "registered entity"
    );
    Ok(entity)
}

fn resolve_key(
    inner: &Rc<SessionInner>,
    name: &str,
    key: KeySpec,
    defs: &mut Vec<Rc<FieldDef>>,
    names: &mut HashSet<String>,
) -> Result<String> {
    let key = match key {
        KeySpec::Default => match inner.default_key.borrow().clone() {
            Some(default) => KeySpec::Field(default),
            None => KeySpec::Rowid,
        },
        other => other,
    };

    match key {
        KeySpec::Rowid => Ok("rowid".to_string()),
        KeySpec::Field(pk) => {
            let pk = pk.to_lowercase();
            let def = defs
                .iter_mut()
                .find(|d| d.name == pk)
                .ok_or_else(|| {
                    Error::schema(
                        SchemaErrorKind::MissingKeyField,
                        format!("entity '{name}' has no field '{pk}' to use as key"),
                    )
                })?;
            // The primary key is always unique.
            Rc::make_mut(def).unique = true;
            Ok(pk)
        }
        KeySpec::Id(pk) => {
            let pk = pk.to_lowercase();
            if !names.insert(pk.clone()) {
                return Err(Error::schema(
                    SchemaErrorKind::InvalidField,
                    format!("key field '{pk}' collides with a declared field"),
                ));
            }
            let mut def = id();
            def.name = pk.clone();
            defs.insert(0, Rc::new(def));
            Ok(pk)
        }
        KeySpec::Default => unreachable!("resolved above"),
    }
}

fn validate_fields(name: &str, key: &str, defs: &[Rc<FieldDef>]) -> Result<()> {
    for def in defs {
        if def.kind == FieldKind::Id && def.name != key {
            return Err(Error::schema(
                SchemaErrorKind::IdOffPrimaryKey,
                format!("'{name}.{}': ID fields are only valid as the primary key", def.name),
            ));
        }
        if def.virtual_nav && def.kind != FieldKind::Entity {
            return Err(Error::schema(
                SchemaErrorKind::InvalidField,
                format!("'{name}.{}': only foreign keys can be virtual", def.name),
            ));
        }
        if def.name == key && matches!(def.kind, FieldKind::Entity | FieldKind::Json) {
            return Err(Error::schema(
                SchemaErrorKind::InvalidField,
                format!("'{name}.{}': the primary key must be a scalar kind", def.name),
            ));
        }
        if def.kind == FieldKind::Json && cfg!(not(feature = "json")) {
            return Err(Error::schema(
                SchemaErrorKind::JsonUnavailable,
                format!("'{name}.{}': json support is not enabled", def.name),
            ));
        }
    }
    Ok(())
}

/// Walk required foreign keys transitively; reject a walk that reaches the
/// entity being declared.
fn check_cycles(inner: &Rc<SessionInner>, name: &str, defs: &[Rc<FieldDef>]) -> Result<()> {
    let registry = inner.registry.borrow();
    let mut stack: Vec<String> = required_targets(defs.iter());
    let mut visited = HashSet::new();

    while let Some(target) = stack.pop() {
        if target == name {
            return Err(Error::schema(
                SchemaErrorKind::CircularDependency,
                format!("circular required foreign keys through entity '{name}'"),
            ));
        }
        if !visited.insert(target.clone()) {
            continue;
        }
        if let Some(entity) = registry.get(&target) {
            stack.extend(required_targets(entity.persisted().iter()));
        }
    }
    Ok(())
}

fn required_targets<'a>(defs: impl Iterator<Item = &'a Rc<FieldDef>>) -> Vec<String> {
    defs.filter(|d| d.kind == FieldKind::Entity && d.required && !d.virtual_nav)
        .filter_map(|d| d.target.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shorthand_builtin_kinds() {
        let def = parse_shorthand("text").unwrap();
        assert_eq!(def.kind, FieldKind::Text);
        assert!(!def.required);
        assert!(!def.unique);

        let def = parse_shorthand("int!").unwrap();
        assert_eq!(def.kind, FieldKind::Int);
        assert!(def.required);

        let def = parse_shorthand("text!*").unwrap();
        assert!(def.required);
        assert!(def.unique);
    }

    #[test]
    fn shorthand_explicit_optional() {
        let def = parse_shorthand("numeric?").unwrap();
        assert!(!def.required);
    }

    #[test]
    fn shorthand_entity_reference() {
        let def = parse_shorthand("person!").unwrap();
        assert_eq!(def.kind, FieldKind::Entity);
        assert_eq!(def.target.as_deref(), Some("person"));
        assert!(def.required);
        assert!(!def.virtual_nav);
    }

    #[test]
    fn shorthand_star_means_virtual_on_entity_tags() {
        let def = parse_shorthand("child*").unwrap();
        assert_eq!(def.kind, FieldKind::Entity);
        assert!(def.virtual_nav);
        assert!(!def.unique);
    }

    #[test]
    fn shorthand_rejects_garbage() {
        assert!(parse_shorthand("").is_err());
        assert!(parse_shorthand("9lives").is_err());
        assert!(parse_shorthand("text#").is_err());
    }

    #[test]
    fn shorthand_lowercases() {
        let def = parse_shorthand("TEXT!").unwrap();
        assert_eq!(def.kind, FieldKind::Text);
        assert!(def.required);
    }
}
