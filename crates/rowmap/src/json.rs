//! Structured JSON values behind a mutation-tracking proxy.
//!
//! A JSON field stores TEXT in the database but presents a structured value.
//! All mutations go through the proxy, which re-marks the owning row dirty
//! and invalidates the cached encoded form, so callers never write back
//! explicitly.

use crate::row::Row;
use rowmap_core::{Error, Result, ValueErrorKind};
use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// A structured JSON value owned by one row field.
#[derive(Debug)]
pub struct JsonProxy {
    owner: Weak<Row>,
    field: String,
    value: RefCell<serde_json::Value>,
    encoded: RefCell<Option<String>>,
}

impl JsonProxy {
    /// Wrap an already-structured value.
    pub(crate) fn wrap(
        value: serde_json::Value,
        owner: Weak<Row>,
        field: &str,
    ) -> Rc<Self> {
        Rc::new(Self {
            owner,
            field: field.to_string(),
            value: RefCell::new(value),
            encoded: RefCell::new(None),
        })
    }

    /// Decode an encoded form, keeping the original text cached.
    pub(crate) fn decode(encoded: &str, owner: Weak<Row>, field: &str) -> Result<Rc<Self>> {
        let value: serde_json::Value = serde_json::from_str(encoded).map_err(|e| {
            Error::value(
                ValueErrorKind::InvalidJson,
                field.to_string(),
                format!("invalid json content: {e}"),
            )
        })?;
        Ok(Rc::new(Self {
            owner,
            field: field.to_string(),
            value: RefCell::new(value),
            encoded: RefCell::new(Some(encoded.to_string())),
        }))
    }

    /// A snapshot of the structured value.
    pub fn value(&self) -> serde_json::Value {
        self.value.borrow().clone()
    }

    /// Read a nested value by dotted path. Missing segments yield NULL.
    pub fn get(&self, path: &str) -> serde_json::Value {
        let mut current = self.value.borrow().clone();
        for segment in path.split('.') {
            current = match current.get(segment) {
                Some(v) => v.clone(),
                None => return serde_json::Value::Null,
            };
        }
        current
    }

    /// Write a nested value by dotted path, creating intermediate objects.
    ///
    /// The owning row is re-marked dirty and any cached encoded form is
    /// dropped.
    pub fn set(&self, path: &str, value: impl Into<serde_json::Value>) {
        {
            let mut root = self.value.borrow_mut();
            let mut slot = &mut *root;
            let segments: Vec<&str> = path.split('.').collect();
            for segment in &segments[..segments.len() - 1] {
                if !slot.is_object() {
                    *slot = serde_json::Value::Object(serde_json::Map::new());
                }
                slot = slot
                    .as_object_mut()
                    .expect("object ensured above")
                    .entry((*segment).to_string())
                    .or_insert(serde_json::Value::Null);
            }
            if !slot.is_object() {
                *slot = serde_json::Value::Object(serde_json::Map::new());
            }
            let last = segments.last().expect("split yields at least one segment");
            slot.as_object_mut()
                .expect("object ensured above")
                .insert((*last).to_string(), value.into());
        }
        self.touch();
    }

    /// Replace the whole structured value.
    pub fn replace(&self, value: serde_json::Value) {
        *self.value.borrow_mut() = value;
        self.touch();
    }

    /// The encoded TEXT form, computed lazily and cached until the next
    /// mutation.
    pub fn encode(&self) -> Result<String> {
        if let Some(encoded) = self.encoded.borrow().as_ref() {
            return Ok(encoded.clone());
        }
        let encoded = serde_json::to_string(&*self.value.borrow()).map_err(|e| {
            Error::value(
                ValueErrorKind::InvalidJson,
                self.field.clone(),
                format!("failed to encode json: {e}"),
            )
        })?;
        *self.encoded.borrow_mut() = Some(encoded.clone());
        Ok(encoded)
    }

    fn touch(&self) {
        self.encoded.borrow_mut().take();
        if let Some(row) = self.owner.upgrade() {
            row.entity().mark_dirty(&row);
        }
    }
}
