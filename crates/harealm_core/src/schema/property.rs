//! Property declarations.

use crate::value::Value;
use harealm_storage::ColumnType;
use std::fmt;

/// The kind of value a property holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PropertyType {
    /// 64-bit signed integer.
    Int,
    /// Boolean.
    Bool,
    /// 32-bit float.
    Float,
    /// 64-bit float.
    Double,
    /// UTF-8 string.
    String,
    /// Binary data.
    Data,
    /// Any scalar value.
    Any,
    /// Timestamp with millisecond precision.
    Date,
    /// Optional link to an object of the target type.
    Object,
    /// Ordered links to objects of the target type.
    Array,
}

impl PropertyType {
    /// Returns the code persisted in the metadata table.
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::Int => 0,
            Self::Bool => 1,
            Self::String => 2,
            Self::Data => 4,
            Self::Any => 6,
            Self::Date => 7,
            Self::Float => 9,
            Self::Double => 10,
            Self::Object => 12,
            Self::Array => 13,
        }
    }

    /// Parses a persisted kind code.
    #[must_use]
    pub const fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            0 => Self::Int,
            1 => Self::Bool,
            2 => Self::String,
            4 => Self::Data,
            6 => Self::Any,
            7 => Self::Date,
            9 => Self::Float,
            10 => Self::Double,
            12 => Self::Object,
            13 => Self::Array,
            _ => return None,
        })
    }

    /// Returns the storage column type backing this kind.
    #[must_use]
    pub const fn column_type(self) -> ColumnType {
        match self {
            Self::Int => ColumnType::Int,
            Self::Bool => ColumnType::Bool,
            Self::Float => ColumnType::Float,
            Self::Double => ColumnType::Double,
            Self::String => ColumnType::String,
            Self::Data => ColumnType::Binary,
            Self::Any => ColumnType::Mixed,
            Self::Date => ColumnType::Date,
            Self::Object => ColumnType::Link,
            Self::Array => ColumnType::LinkList,
        }
    }

    /// Returns true for object and array links.
    #[must_use]
    pub const fn is_link(self) -> bool {
        matches!(self, Self::Object | Self::Array)
    }

    /// Returns true if the kind can serve as a primary key.
    #[must_use]
    pub const fn is_primary_key_kind(self) -> bool {
        matches!(self, Self::Int | Self::String)
    }

    /// Returns true if a search index can be declared.
    #[must_use]
    pub const fn is_indexable(self) -> bool {
        matches!(self, Self::Int | Self::Bool | Self::String | Self::Date)
    }

    /// Returns true if the kind accepts an absent value.
    #[must_use]
    pub const fn is_nullable(self) -> bool {
        matches!(self, Self::Object | Self::Any)
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Int => "int",
            Self::Bool => "bool",
            Self::Float => "float",
            Self::Double => "double",
            Self::String => "string",
            Self::Data => "data",
            Self::Any => "any",
            Self::Date => "date",
            Self::Object => "object",
            Self::Array => "array",
        };
        f.write_str(name)
    }
}

/// A single persisted property of an object type.
///
/// Properties are immutable once constructed; the builder methods consume
/// and return the property.
///
/// Equality covers name, kind, indexed flag and link target. The declared
/// default is not part of a property's identity.
#[derive(Debug, Clone)]
pub struct Property {
    name: String,
    kind: PropertyType,
    indexed: bool,
    object_type: Option<String>,
    default: Option<Value>,
}

impl Property {
    fn scalar(name: impl Into<String>, kind: PropertyType) -> Self {
        Self {
            name: name.into(),
            kind,
            indexed: false,
            object_type: None,
            default: None,
        }
    }

    /// Integer property.
    #[must_use]
    pub fn int(name: impl Into<String>) -> Self {
        Self::scalar(name, PropertyType::Int)
    }

    /// Boolean property.
    #[must_use]
    pub fn bool(name: impl Into<String>) -> Self {
        Self::scalar(name, PropertyType::Bool)
    }

    /// Single-precision float property.
    #[must_use]
    pub fn float(name: impl Into<String>) -> Self {
        Self::scalar(name, PropertyType::Float)
    }

    /// Double-precision float property.
    #[must_use]
    pub fn double(name: impl Into<String>) -> Self {
        Self::scalar(name, PropertyType::Double)
    }

    /// String property.
    #[must_use]
    pub fn string(name: impl Into<String>) -> Self {
        Self::scalar(name, PropertyType::String)
    }

    /// Binary data property.
    #[must_use]
    pub fn data(name: impl Into<String>) -> Self {
        Self::scalar(name, PropertyType::Data)
    }

    /// Date property.
    #[must_use]
    pub fn date(name: impl Into<String>) -> Self {
        Self::scalar(name, PropertyType::Date)
    }

    /// Dynamically typed scalar property.
    #[must_use]
    pub fn any(name: impl Into<String>) -> Self {
        Self::scalar(name, PropertyType::Any)
    }

    /// Optional link to an object of `target`.
    #[must_use]
    pub fn object(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            object_type: Some(target.into()),
            ..Self::scalar(name, PropertyType::Object)
        }
    }

    /// Ordered list of links to objects of `target`.
    #[must_use]
    pub fn array(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            object_type: Some(target.into()),
            ..Self::scalar(name, PropertyType::Array)
        }
    }

    /// Creates a property of any kind. Used when reading stored schemas.
    #[must_use]
    pub fn with_kind(
        name: impl Into<String>,
        kind: PropertyType,
        object_type: Option<String>,
    ) -> Self {
        Self {
            object_type,
            ..Self::scalar(name, kind)
        }
    }

    /// Marks the property as indexed.
    #[must_use]
    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    /// Sets the indexed flag.
    #[must_use]
    pub fn set_indexed(mut self, indexed: bool) -> Self {
        self.indexed = indexed;
        self
    }

    /// Declares the value used when an initializer omits the property.
    #[must_use]
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Returns the property name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the property kind.
    #[must_use]
    pub fn kind(&self) -> PropertyType {
        self.kind
    }

    /// Returns true if the property is indexed.
    #[must_use]
    pub fn is_indexed(&self) -> bool {
        self.indexed
    }

    /// Returns the link target type for object and array properties.
    #[must_use]
    pub fn object_type(&self) -> Option<&str> {
        self.object_type.as_deref()
    }

    /// Returns the declared default value.
    #[must_use]
    pub fn default(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    /// Returns true if an initializer must supply a value.
    ///
    /// Object links default to null and arrays to empty.
    #[must_use]
    pub fn is_required(&self) -> bool {
        self.default.is_none() && !matches!(self.kind, PropertyType::Object | PropertyType::Array)
    }

    /// Returns true if name, kind and link target match, ignoring the index.
    #[must_use]
    pub fn same_storage(&self, other: &Self) -> bool {
        self.name == other.name && self.kind == other.kind && self.object_type == other.object_type
    }
}

impl PartialEq for Property {
    fn eq(&self, other: &Self) -> bool {
        self.same_storage(other) && self.indexed == other.indexed
    }
}

impl Eq for Property {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_codes_round_trip() {
        for kind in [
            PropertyType::Int,
            PropertyType::Bool,
            PropertyType::Float,
            PropertyType::Double,
            PropertyType::String,
            PropertyType::Data,
            PropertyType::Any,
            PropertyType::Date,
            PropertyType::Object,
            PropertyType::Array,
        ] {
            assert_eq!(PropertyType::from_code(kind.code()), Some(kind));
        }
        assert_eq!(PropertyType::from_code(3), None);
    }

    #[test]
    fn default_is_not_identity() {
        let plain = Property::int("age");
        let defaulted = Property::int("age").default_value(0);
        assert_eq!(plain, defaulted);
        assert_ne!(plain, Property::int("age").indexed());
    }

    #[test]
    fn links_are_optional() {
        assert!(Property::string("name").is_required());
        assert!(!Property::string("name").default_value("").is_required());
        assert!(!Property::object("owner", "Person").is_required());
        assert!(!Property::array("dogs", "Dog").is_required());
    }
}
