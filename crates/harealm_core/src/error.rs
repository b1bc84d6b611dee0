//! Error types for HARealm core.

use harealm_storage::StorageError;
use std::fmt;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Broad classification of [`CoreError`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Invalid type, property, primary key or value.
    Schema,
    /// The operation needs a different transaction state.
    TransactionState,
    /// Primary-key collision.
    Uniqueness,
    /// Cross-realm link or access to an invalidated row.
    Reference,
    /// Collection index out of range.
    Bounds,
    /// Version downgrade or failed migration.
    Migration,
    /// Aggregate over an unsupported property kind.
    AggregateType,
    /// Storage or I/O failure.
    Storage,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Schema => "schema",
            Self::TransactionState => "transaction state",
            Self::Uniqueness => "uniqueness",
            Self::Reference => "reference",
            Self::Bounds => "bounds",
            Self::Migration => "migration",
            Self::AggregateType => "aggregate type",
            Self::Storage => "storage",
        };
        f.write_str(name)
    }
}

/// Errors that can occur in HARealm core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Two object schemas share a type name.
    #[error("duplicate type: {type_name}")]
    DuplicateType {
        /// The repeated type name.
        type_name: String,
    },

    /// A declared primary key is missing or not a string/integer property.
    #[error("invalid primary key '{property}' on type {type_name}")]
    InvalidPrimaryKey {
        /// Type declaring the key.
        type_name: String,
        /// The declared key property.
        property: String,
    },

    /// A property name is unknown or a property declaration is invalid.
    #[error("invalid property '{property}' on type {type_name}: {reason}")]
    InvalidProperty {
        /// Type name.
        type_name: String,
        /// Property name.
        property: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The type is not part of the schema.
    #[error("unknown type: {type_name}")]
    UnknownType {
        /// The requested type name.
        type_name: String,
    },

    /// A primary-key operation on a type without a primary key.
    #[error("type {type_name} has no primary key")]
    NoPrimaryKey {
        /// Type name.
        type_name: String,
    },

    /// A value does not fit the property's kind.
    #[error("invalid value for {type_name}.{property}: {reason}")]
    InvalidValue {
        /// Type name.
        type_name: String,
        /// Property name.
        property: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// An initializer omitted a required property without a default.
    #[error("missing value for required property {type_name}.{property}")]
    MissingRequiredProperty {
        /// Type name.
        type_name: String,
        /// Property name.
        property: String,
    },

    /// An initializer has a shape that cannot build an object.
    #[error("invalid initializer for {type_name}: {reason}")]
    InvalidInitValue {
        /// Type name.
        type_name: String,
        /// Why the initializer was rejected.
        reason: String,
    },

    /// A mutation was attempted outside a write transaction.
    #[error("cannot modify a realm outside a write transaction")]
    NotInWriteTransaction,

    /// A write transaction is already open on this realm.
    #[error("the realm is already in a write transaction")]
    NestedWriteTransaction,

    /// The realm was closed.
    #[error("the realm has been closed")]
    RealmClosed,

    /// A live row of the type already has this primary-key value.
    #[error("duplicate primary key value {value} for type {type_name}")]
    DuplicatePrimaryKey {
        /// Type name.
        type_name: String,
        /// The colliding value, rendered for display.
        value: String,
    },

    /// An object from another realm was linked without `ALLOW_COPY`.
    #[error("object of type {type_name} belongs to a different realm")]
    CrossRealmReference {
        /// Type of the foreign object.
        type_name: String,
    },

    /// The object was deleted or its realm was closed.
    #[error("object has been deleted or invalidated")]
    InvalidatedObject,

    /// A collection index is out of range.
    #[error("index {index} is out of bounds (count: {count})")]
    IndexOutOfBounds {
        /// The requested index.
        index: usize,
        /// Number of elements in the collection.
        count: usize,
    },

    /// The stored schema version cannot be opened at the requested version.
    #[error("invalid schema version: {message}")]
    InvalidSchemaVersion {
        /// Description of the mismatch.
        message: String,
    },

    /// A migration could not be completed; nothing was committed.
    #[error("migration failed: {message}")]
    MigrationFailed {
        /// Description of the failure.
        message: String,
        /// The error that caused the failure.
        #[source]
        source: Option<Box<CoreError>>,
    },

    /// An aggregate was requested on a property kind that does not support it.
    #[error("cannot compute {operation} of {type_name}.{property}")]
    UnsupportedAggregateProperty {
        /// The aggregate operation.
        operation: &'static str,
        /// Type name.
        type_name: String,
        /// Property name.
        property: String,
    },

    /// Storage core error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CoreError {
    /// Returns the taxonomy bucket of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DuplicateType { .. }
            | Self::InvalidPrimaryKey { .. }
            | Self::InvalidProperty { .. }
            | Self::UnknownType { .. }
            | Self::NoPrimaryKey { .. }
            | Self::InvalidValue { .. }
            | Self::MissingRequiredProperty { .. }
            | Self::InvalidInitValue { .. } => ErrorKind::Schema,
            Self::NotInWriteTransaction | Self::NestedWriteTransaction | Self::RealmClosed => {
                ErrorKind::TransactionState
            }
            Self::DuplicatePrimaryKey { .. } => ErrorKind::Uniqueness,
            Self::CrossRealmReference { .. } | Self::InvalidatedObject => ErrorKind::Reference,
            Self::IndexOutOfBounds { .. } => ErrorKind::Bounds,
            Self::InvalidSchemaVersion { .. } | Self::MigrationFailed { .. } => ErrorKind::Migration,
            Self::UnsupportedAggregateProperty { .. } => ErrorKind::AggregateType,
            Self::Storage(_) | Self::Io(_) => ErrorKind::Storage,
        }
    }

    /// Creates an unknown type error.
    pub fn unknown_type(type_name: impl Into<String>) -> Self {
        Self::UnknownType {
            type_name: type_name.into(),
        }
    }

    /// Creates an invalid property error.
    pub fn invalid_property(
        type_name: impl Into<String>,
        property: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidProperty {
            type_name: type_name.into(),
            property: property.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid value error.
    pub fn invalid_value(
        type_name: impl Into<String>,
        property: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            type_name: type_name.into(),
            property: property.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid initializer error.
    pub fn invalid_init_value(type_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInitValue {
            type_name: type_name.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid schema version error.
    pub fn invalid_schema_version(message: impl Into<String>) -> Self {
        Self::InvalidSchemaVersion {
            message: message.into(),
        }
    }

    /// Creates a migration failure without an underlying cause.
    pub fn migration_failed(message: impl Into<String>) -> Self {
        Self::MigrationFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Wraps an error raised while migrating.
    ///
    /// Migration failures are passed through unchanged.
    pub fn migration_cause(cause: CoreError) -> Self {
        match cause {
            Self::MigrationFailed { .. } => cause,
            other => Self::MigrationFailed {
                message: other.to_string(),
                source: Some(Box::new(other)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(
            CoreError::unknown_type("Dog").kind(),
            ErrorKind::Schema
        );
        assert_eq!(
            CoreError::NotInWriteTransaction.kind(),
            ErrorKind::TransactionState
        );
        assert_eq!(
            CoreError::IndexOutOfBounds { index: 3, count: 1 }.kind(),
            ErrorKind::Bounds
        );
        assert_eq!(
            CoreError::Storage(StorageError::ReadOnly).kind(),
            ErrorKind::Storage
        );
    }

    #[test]
    fn migration_cause_keeps_source() {
        let err = CoreError::migration_cause(CoreError::InvalidatedObject);
        assert_eq!(err.kind(), ErrorKind::Migration);
        assert!(err.source().is_some());

        let nested = CoreError::migration_cause(err);
        assert!(matches!(nested, CoreError::MigrationFailed { .. }));
    }

    #[test]
    fn messages_name_the_property() {
        let err = CoreError::MissingRequiredProperty {
            type_name: "Person".into(),
            property: "name".into(),
        };
        assert_eq!(
            err.to_string(),
            "missing value for required property Person.name"
        );
    }
}
