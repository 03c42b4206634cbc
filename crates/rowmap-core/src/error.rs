//! Error types for rowmap operations.

use std::fmt;

/// The primary error type for all rowmap operations.
#[derive(Debug)]
pub enum Error {
    /// Schema declaration and registry errors
    Schema(SchemaError),
    /// Value coercion and field access errors
    Value(ValueError),
    /// Unique constraint violations detected on set or new
    Unique(UniqueError),
    /// Session / transaction state errors
    State(StateError),
    /// Errors reported by the SQL driver
    Driver(DriverError),
    /// Flush protocol errors
    Flush(FlushError),
}

#[derive(Debug)]
pub struct SchemaError {
    pub kind: SchemaErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaErrorKind {
    /// Entity with this name already registered
    DuplicateEntity,
    /// Entity not found in the registry
    UnknownEntity,
    /// Primary key names a field that was not declared
    MissingKeyField,
    /// Field name is reserved (`rowid`) or otherwise invalid
    ReservedName,
    /// Shorthand or field definition could not be parsed
    InvalidField,
    /// ID kind used outside the primary key position
    IdOffPrimaryKey,
    /// Cycle of required ENTITY fields detected at registration
    CircularDependency,
    /// JSON kind declared without the json codec enabled
    JsonUnavailable,
}

#[derive(Debug)]
pub struct ValueError {
    pub kind: ValueErrorKind,
    /// Field the value was destined for, when known.
    pub field: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueErrorKind {
    /// A required field was missing or assigned nil
    RequiredMissing,
    /// The value could not be coerced to the field kind
    Uncoercible,
    /// A row of the wrong entity was assigned to an ENTITY field
    WrongEntity,
    /// JSON content failed to encode or decode
    InvalidJson,
    /// The named field does not exist on the entity
    UnknownField,
    /// The named field is a virtual navigation field and cannot be written
    VirtualWrite,
}

#[derive(Debug)]
pub struct UniqueError {
    /// Entity whose constraint was violated.
    pub entity: String,
    /// Unique field holding the colliding lookup value.
    pub field: String,
    pub message: String,
}

#[derive(Debug)]
pub struct StateError {
    pub kind: StateErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateErrorKind {
    /// The database connection has been closed
    Closed,
    /// `begin(strict)` while a transaction is already active
    AlreadyInTransaction,
    /// Commit or rollback without an active transaction
    NoTransaction,
    /// Query execution attempted inside a transaction
    QueryInTransaction,
}

#[derive(Debug)]
pub struct DriverError {
    /// Numeric engine result code, when the engine reported one.
    pub code: Option<i32>,
    pub message: String,
}

#[derive(Debug)]
pub struct FlushError {
    /// Rows still dirty when the drain stalled.
    pub remaining: usize,
    pub message: String,
}

impl Error {
    /// Shorthand for a schema error.
    pub fn schema(kind: SchemaErrorKind, message: impl Into<String>) -> Self {
        Error::Schema(SchemaError {
            kind,
            message: message.into(),
        })
    }

    /// Shorthand for a value error attached to a field.
    pub fn value(kind: ValueErrorKind, field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Value(ValueError {
            kind,
            field: Some(field.into()),
            message: message.into(),
        })
    }

    /// Shorthand for a value error with no field context.
    pub fn value_bare(kind: ValueErrorKind, message: impl Into<String>) -> Self {
        Error::Value(ValueError {
            kind,
            field: None,
            message: message.into(),
        })
    }

    /// Shorthand for a unique violation.
    pub fn unique(
        entity: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::Unique(UniqueError {
            entity: entity.into(),
            field: field.into(),
            message: message.into(),
        })
    }

    /// Shorthand for a state error.
    pub fn state(kind: StateErrorKind, message: impl Into<String>) -> Self {
        Error::State(StateError {
            kind,
            message: message.into(),
        })
    }

    /// Shorthand for a driver error with an engine code.
    pub fn driver(code: i32, message: impl Into<String>) -> Self {
        Error::Driver(DriverError {
            code: Some(code),
            message: message.into(),
        })
    }

    /// Shorthand for a driver error with no engine code.
    pub fn driver_bare(message: impl Into<String>) -> Self {
        Error::Driver(DriverError {
            code: None,
            message: message.into(),
        })
    }

    /// Shorthand for a flush error.
    pub fn flush(remaining: usize, message: impl Into<String>) -> Self {
        Error::Flush(FlushError {
            remaining,
            message: message.into(),
        })
    }

    /// True when the error is the engine's BUSY signal.
    ///
    /// The retry register is consulted only for these.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            Error::Driver(DriverError {
                code: Some(code),
                ..
            }) if *code == BUSY_CODE || *code == LOCKED_CODE
        )
    }
}

/// SQLite's SQLITE_BUSY result code.
pub const BUSY_CODE: i32 = 5;
/// SQLite's SQLITE_LOCKED result code, treated the same as BUSY.
pub const LOCKED_CODE: i32 = 6;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Schema(e) => write!(f, "schema error: {}", e.message),
            Error::Value(e) => {
                if let Some(field) = &e.field {
                    write!(f, "value error on field '{}': {}", field, e.message)
                } else {
                    write!(f, "value error: {}", e.message)
                }
            }
            Error::Unique(e) => write!(
                f,
                "unique violation on {}.{}: {}",
                e.entity, e.field, e.message
            ),
            Error::State(e) => write!(f, "state error: {}", e.message),
            Error::Driver(e) => {
                if let Some(code) = e.code {
                    write!(f, "driver error ({}): {}", code, e.message)
                } else {
                    write!(f, "driver error: {}", e.message)
                }
            }
            Error::Flush(e) => write!(f, "flush error: {}", e.message),
        }
    }
}

impl std::error::Error for Error {}

/// Result type alias for rowmap operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_field_context() {
        let err = Error::value(ValueErrorKind::Uncoercible, "age", "not a number: 'blah'");
        assert_eq!(
            err.to_string(),
            "value error on field 'age': not a number: 'blah'"
        );
    }

    #[test]
    fn busy_detection() {
        assert!(Error::driver(BUSY_CODE, "database is locked").is_busy());
        assert!(Error::driver(LOCKED_CODE, "table is locked").is_busy());
        assert!(!Error::driver(1, "SQL logic error").is_busy());
        assert!(!Error::driver_bare("no code").is_busy());
    }

    #[test]
    fn unique_display_names_entity_and_field() {
        let err = Error::unique("person", "email", "value 'a@b' already present");
        assert!(err.to_string().contains("person.email"));
    }
}
