//! Property values and object initializers.

use crate::error::{CoreError, CoreResult};
use crate::list::List;
use crate::object::Object;
use crate::schema::{Property, PropertyType};
use chrono::{DateTime, Utc};
use harealm_storage::Cell;
use std::collections::BTreeMap;
use std::fmt;

/// A property value read from or written to an object.
///
/// Links are returned as live handles: `Object` for object properties (or
/// `Null` when unset) and `List` for array properties.
#[derive(Debug, Clone)]
pub enum Value {
    /// No value.
    Null,
    /// Integer.
    Int(i64),
    /// Boolean.
    Bool(bool),
    /// Single-precision float.
    Float(f32),
    /// Double-precision float.
    Double(f64),
    /// String.
    String(String),
    /// Binary data.
    Data(Vec<u8>),
    /// Timestamp.
    Date(DateTime<Utc>),
    /// Linked object.
    Object(Object),
    /// Array of linked objects.
    List(List),
}

impl Value {
    /// Returns true for `Null`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the integer value.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the boolean value.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns any numeric value widened to `f64`.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            #[allow(clippy::cast_precision_loss)]
            Self::Int(n) => Some(*n as f64),
            Self::Float(f) => Some(f64::from(*f)),
            Self::Double(d) => Some(*d),
            _ => None,
        }
    }

    /// Returns the string value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the binary value.
    #[must_use]
    pub fn as_data(&self) -> Option<&[u8]> {
        match self {
            Self::Data(d) => Some(d),
            _ => None,
        }
    }

    /// Returns the date value.
    #[must_use]
    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Date(d) => Some(*d),
            _ => None,
        }
    }

    /// Returns the linked object.
    #[must_use]
    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Returns the array handle.
    #[must_use]
    pub fn as_list(&self) -> Option<&List> {
        match self {
            Self::List(l) => Some(l),
            _ => None,
        }
    }

    /// Converts a scalar storage cell into a value.
    pub(crate) fn from_cell(cell: &Cell) -> Self {
        match cell {
            Cell::Null | Cell::Link(_) | Cell::LinkList(_) => Self::Null,
            Cell::Int(n) => Self::Int(*n),
            Cell::Bool(b) => Self::Bool(*b),
            Cell::Float(f) => Self::Float(*f),
            Cell::Double(d) => Self::Double(*d),
            Cell::String(s) => Self::String(s.clone()),
            Cell::Binary(b) => Self::Data(b.clone()),
            Cell::Date(ms) => {
                Self::Date(DateTime::<Utc>::from_timestamp_millis(*ms).unwrap_or_default())
            }
            Cell::Mixed(inner) => Self::from_cell(inner),
        }
    }

    /// Converts a scalar value into the cell stored for `property`.
    ///
    /// Numbers widen or narrow between integer and floating kinds, and
    /// RFC 3339 strings are accepted for dates.
    pub(crate) fn to_cell(&self, type_name: &str, property: &Property) -> CoreResult<Cell> {
        let invalid =
            |reason: String| CoreError::invalid_value(type_name, property.name(), reason);
        let mismatch =
            || invalid(format!("expected {}, got {}", property.kind(), self.type_name()));
        #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
        let cell = match (property.kind(), self) {
            (PropertyType::Any, value) => {
                Cell::Mixed(Box::new(value.scalar_cell().ok_or_else(mismatch)?))
            }
            (_, Self::Null) if !property.kind().is_nullable() => {
                return Err(invalid("null is not allowed".into()));
            }
            (PropertyType::Int, Self::Int(n)) => Cell::Int(*n),
            (PropertyType::Bool, Self::Bool(b)) => Cell::Bool(*b),
            (PropertyType::Float, Self::Float(f)) => Cell::Float(*f),
            (PropertyType::Float, Self::Double(d)) => Cell::Float(*d as f32),
            (PropertyType::Float, Self::Int(n)) => Cell::Float(*n as f32),
            (PropertyType::Double, Self::Double(d)) => Cell::Double(*d),
            (PropertyType::Double, Self::Float(f)) => Cell::Double(f64::from(*f)),
            (PropertyType::Double, Self::Int(n)) => Cell::Double(*n as f64),
            (PropertyType::String, Self::String(s)) => Cell::String(s.clone()),
            (PropertyType::Data, Self::Data(d)) => Cell::Binary(d.clone()),
            (PropertyType::Date, Self::Date(d)) => Cell::Date(d.timestamp_millis()),
            (PropertyType::Date, Self::String(s)) => {
                let parsed = DateTime::parse_from_rfc3339(s)
                    .map_err(|e| invalid(format!("invalid date '{s}': {e}")))?;
                Cell::Date(parsed.with_timezone(&Utc).timestamp_millis())
            }
            _ => return Err(mismatch()),
        };
        Ok(cell)
    }

    /// Returns the storage cell of a scalar value, `None` for links.
    fn scalar_cell(&self) -> Option<Cell> {
        Some(match self {
            Self::Null => Cell::Null,
            Self::Int(n) => Cell::Int(*n),
            Self::Bool(b) => Cell::Bool(*b),
            Self::Float(f) => Cell::Float(*f),
            Self::Double(d) => Cell::Double(*d),
            Self::String(s) => Cell::String(s.clone()),
            Self::Data(d) => Cell::Binary(d.clone()),
            Self::Date(d) => Cell::Date(d.timestamp_millis()),
            Self::Object(_) | Self::List(_) => return None,
        })
    }

    /// Returns a short name of the value's variant.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Int(_) => "int",
            Self::Bool(_) => "bool",
            Self::Float(_) => "float",
            Self::Double(_) => "double",
            Self::String(_) => "string",
            Self::Data(_) => "data",
            Self::Date(_) => "date",
            Self::Object(_) => "object",
            Self::List(_) => "array",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Double(a), Self::Double(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Data(a), Self::Data(b)) => a == b,
            (Self::Date(a), Self::Date(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a.is_same_object(b),
            (Self::List(a), Self::List(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Double(x) => write!(f, "{x}"),
            Self::String(s) => write!(f, "'{s}'"),
            Self::Data(d) => write!(f, "<{} bytes>", d.len()),
            Self::Date(d) => write!(f, "{}", d.to_rfc3339()),
            Self::Object(o) => write!(f, "{o:?}"),
            Self::List(_) => f.write_str("<array>"),
        }
    }
}

macro_rules! impl_from_scalar {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Self::$variant(v.into())
                }
            }

            impl From<$ty> for InitValue {
                fn from(v: $ty) -> Self {
                    Self::Value(Value::from(v))
                }
            }
        )*
    };
}

impl_from_scalar! {
    i64 => Int,
    i32 => Int,
    u32 => Int,
    bool => Bool,
    f32 => Float,
    f64 => Double,
    String => String,
    &str => String,
    Vec<u8> => Data,
    DateTime<Utc> => Date,
}

impl From<Object> for Value {
    fn from(object: Object) -> Self {
        Self::Object(object)
    }
}

impl From<List> for Value {
    fn from(list: List) -> Self {
        Self::List(list)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// An initializer payload for creating or updating an object.
///
/// - `Mapping`: property name to value; absent properties take defaults
/// - `List`: positional values matching the property order exactly
/// - `Object`: an existing object, linked or copied
/// - `Value`: a scalar, valid only for a single property
#[derive(Debug, Clone, PartialEq)]
pub enum InitValue {
    /// A single property value.
    Value(Value),
    /// Values keyed by property name.
    Mapping(BTreeMap<String, InitValue>),
    /// Positional values, or the elements of an array property.
    List(Vec<InitValue>),
    /// An existing managed object.
    Object(Object),
}

impl InitValue {
    /// The null value.
    pub const NULL: Self = Self::Value(Value::Null);

    /// Builds a mapping from key/value pairs.
    pub fn mapping<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<InitValue>,
    {
        Self::Mapping(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Builds a positional list.
    pub fn list<V: Into<InitValue>>(values: impl IntoIterator<Item = V>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }

    /// Returns true if this is the null value.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Value(Value::Null))
    }

    /// Returns a short description of the payload shape.
    #[must_use]
    pub fn shape(&self) -> &'static str {
        match self {
            Self::Value(v) => v.type_name(),
            Self::Mapping(_) => "mapping",
            Self::List(_) => "list",
            Self::Object(_) => "object",
        }
    }
}

impl From<Value> for InitValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(object) => Self::Object(object),
            other => Self::Value(other),
        }
    }
}

impl From<Object> for InitValue {
    fn from(object: Object) -> Self {
        Self::Object(object)
    }
}

impl From<&Object> for InitValue {
    fn from(object: &Object) -> Self {
        Self::Object(object.clone())
    }
}

impl From<Vec<InitValue>> for InitValue {
    fn from(values: Vec<InitValue>) -> Self {
        Self::List(values)
    }
}

impl From<Vec<Object>> for InitValue {
    fn from(objects: Vec<Object>) -> Self {
        Self::List(objects.into_iter().map(Self::Object).collect())
    }
}

impl From<BTreeMap<String, InitValue>> for InitValue {
    fn from(map: BTreeMap<String, InitValue>) -> Self {
        Self::Mapping(map)
    }
}

impl<K: Into<String>, const N: usize> From<[(K, InitValue); N]> for InitValue {
    fn from(entries: [(K, InitValue); N]) -> Self {
        Self::mapping(entries)
    }
}

impl<T: Into<InitValue>> From<Option<T>> for InitValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::NULL, Into::into)
    }
}

impl From<serde_json::Value> for InitValue {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match json {
            Json::Null => Self::NULL,
            Json::Bool(b) => b.into(),
            Json::Number(n) => match n.as_i64() {
                Some(i) => i.into(),
                None => n.as_f64().unwrap_or(f64::NAN).into(),
            },
            Json::String(s) => s.into(),
            Json::Array(items) => Self::List(items.into_iter().map(Into::into).collect()),
            Json::Object(map) => {
                Self::Mapping(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numbers_coerce_between_kinds() {
        let weight = Property::double("weight");
        assert_eq!(
            Value::Int(3).to_cell("Dog", &weight).unwrap(),
            Cell::Double(3.0)
        );
        let age = Property::int("age");
        assert!(matches!(
            Value::Double(3.5).to_cell("Dog", &age),
            Err(CoreError::InvalidValue { .. })
        ));
    }

    #[test]
    fn null_rejected_for_required_scalars() {
        let name = Property::string("name");
        assert!(Value::Null.to_cell("Dog", &name).is_err());
        let any = Property::any("extra");
        assert_eq!(
            Value::Null.to_cell("Dog", &any).unwrap(),
            Cell::Mixed(Box::new(Cell::Null))
        );
    }

    #[test]
    fn dates_accept_rfc3339_strings() {
        let born = Property::date("born");
        let cell = Value::from("2014-05-01T12:00:00Z")
            .to_cell("Dog", &born)
            .unwrap();
        let Cell::Date(ms) = cell else {
            panic!("expected a date cell");
        };
        assert_eq!(Value::from_cell(&Cell::Date(ms)).as_date().unwrap().timestamp(), 1_398_945_600);
    }

    #[test]
    fn json_converts_to_nested_initializers() {
        let init = InitValue::from(json!({
            "name": "Rex",
            "age": 3,
            "owner": {"name": "Alice"},
            "tags": [1, 2.5, null]
        }));
        let InitValue::Mapping(map) = init else {
            panic!("expected a mapping");
        };
        assert_eq!(map["name"], InitValue::from("Rex"));
        assert_eq!(map["age"], InitValue::from(3i64));
        assert!(matches!(map["owner"], InitValue::Mapping(_)));
        assert_eq!(
            map["tags"],
            InitValue::List(vec![1i64.into(), 2.5f64.into(), InitValue::NULL])
        );
    }

    #[test]
    fn array_literals_build_mappings() {
        let init = InitValue::from([("name", InitValue::from("Rex")), ("age", 3i64.into())]);
        assert_eq!(init.shape(), "mapping");
    }
}
