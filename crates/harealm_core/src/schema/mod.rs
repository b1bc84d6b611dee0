//! Schema registry.
//!
//! A [`Schema`] is the validated, immutable set of object types persisted by
//! a realm. Producing a variant means registering a new schema; the
//! migration engine compares the stored schema with the target one through
//! [`Schema::diff`].

mod object_schema;
mod property;

pub use object_schema::{ObjectSchema, ObjectSchemaBuilder};
pub use property::{Property, PropertyType};

use crate::error::{CoreError, CoreResult};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Stable position of an object schema within its [`Schema`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SchemaIndex(usize);

impl SchemaIndex {
    /// Returns the raw position.
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0
    }
}

/// A validated mapping from type name to [`ObjectSchema`].
#[derive(Debug, Clone, Default)]
pub struct Schema {
    object_schemas: Vec<ObjectSchema>,
    by_name: BTreeMap<String, SchemaIndex>,
}

impl Schema {
    /// Returns a schema with no types.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Validates and registers a set of object schemas.
    ///
    /// # Errors
    ///
    /// - `DuplicateType` if two schemas share a name
    /// - `InvalidPrimaryKey` if a primary key names a missing property or one
    ///   that is neither string nor integer
    /// - `InvalidProperty` for repeated property names, links without a
    ///   known target and indexes on unindexable kinds
    pub fn register(object_schemas: impl IntoIterator<Item = ObjectSchema>) -> CoreResult<Self> {
        let mut schema = Self::default();
        for object_schema in object_schemas {
            let name = object_schema.name().to_string();
            if schema.by_name.contains_key(&name) {
                return Err(CoreError::DuplicateType { type_name: name });
            }
            schema
                .by_name
                .insert(name, SchemaIndex(schema.object_schemas.len()));
            schema.object_schemas.push(object_schema);
        }
        for object_schema in &schema.object_schemas {
            schema.validate(object_schema)?;
        }
        Ok(schema)
    }

    fn validate(&self, object_schema: &ObjectSchema) -> CoreResult<()> {
        let type_name = object_schema.name();
        let mut seen = HashSet::new();
        for property in object_schema.properties() {
            let invalid = |reason: &str| CoreError::invalid_property(type_name, property.name(), reason);
            if !seen.insert(property.name()) {
                return Err(invalid("declared more than once"));
            }
            match (property.kind().is_link(), property.object_type()) {
                (true, None) => return Err(invalid("link property without a target type")),
                (true, Some(target)) if !self.by_name.contains_key(target) => {
                    return Err(invalid(&format!("target type {target} is not in the schema")));
                }
                (false, Some(_)) => return Err(invalid("only links may have a target type")),
                _ => {}
            }
            if property.is_indexed() && !property.kind().is_indexable() {
                return Err(invalid(&format!(
                    "{} properties cannot be indexed",
                    property.kind()
                )));
            }
        }
        if let Some(key) = object_schema.primary_key() {
            let valid = object_schema
                .property(key)
                .is_some_and(|p| p.kind().is_primary_key_kind());
            if !valid {
                return Err(CoreError::InvalidPrimaryKey {
                    type_name: type_name.to_string(),
                    property: key.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Looks up an object schema by type name.
    #[must_use]
    pub fn lookup(&self, type_name: &str) -> Option<&ObjectSchema> {
        self.index_of(type_name).map(|index| self.get(index))
    }

    /// Returns the arena index of a type.
    #[must_use]
    pub fn index_of(&self, type_name: &str) -> Option<SchemaIndex> {
        self.by_name.get(type_name).copied()
    }

    /// Returns the object schema at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` did not come from this schema.
    #[must_use]
    pub fn get(&self, index: SchemaIndex) -> &ObjectSchema {
        &self.object_schemas[index.0]
    }

    /// Looks up a type, failing with `UnknownType`.
    pub fn require(&self, type_name: &str) -> CoreResult<(SchemaIndex, &ObjectSchema)> {
        let index = self
            .index_of(type_name)
            .ok_or_else(|| CoreError::unknown_type(type_name))?;
        Ok((index, self.get(index)))
    }

    /// Iterates the object schemas in registration order.
    pub fn object_schemas(&self) -> impl Iterator<Item = &ObjectSchema> {
        self.object_schemas.iter()
    }

    /// Iterates the type names in sorted order.
    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }

    /// Returns the number of types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.object_schemas.len()
    }

    /// Returns true if the schema has no types.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.object_schemas.is_empty()
    }

    /// Lists the structural differences from `old` to `new`.
    ///
    /// An empty list means a stored `old` schema can be opened as `new`
    /// without touching the file.
    #[must_use]
    pub fn diff(old: &Self, new: &Self) -> Vec<SchemaChange> {
        let mut changes = Vec::new();
        for new_type in new.object_schemas() {
            let type_name = new_type.name().to_string();
            let Some(old_type) = old.lookup(&type_name) else {
                changes.push(SchemaChange::AddType { type_name });
                continue;
            };
            for property in new_type.properties() {
                let name = property.name().to_string();
                match old_type.property(&name) {
                    None => changes.push(SchemaChange::AddProperty {
                        type_name: type_name.clone(),
                        property: name,
                    }),
                    Some(old_property) if !old_property.same_storage(property) => {
                        changes.push(SchemaChange::ChangePropertyType {
                            type_name: type_name.clone(),
                            property: name,
                            old: old_property.kind(),
                            new: property.kind(),
                        });
                    }
                    Some(old_property) if old_property.is_indexed() != property.is_indexed() => {
                        changes.push(SchemaChange::ChangeIndex {
                            type_name: type_name.clone(),
                            property: name,
                            indexed: property.is_indexed(),
                        });
                    }
                    Some(_) => {}
                }
            }
            for old_property in old_type.properties() {
                if new_type.property(old_property.name()).is_none() {
                    changes.push(SchemaChange::RemoveProperty {
                        type_name: type_name.clone(),
                        property: old_property.name().to_string(),
                    });
                }
            }
            if old_type.primary_key() != new_type.primary_key() {
                changes.push(SchemaChange::ChangePrimaryKey {
                    type_name,
                    old: old_type.primary_key().map(str::to_string),
                    new: new_type.primary_key().map(str::to_string),
                });
            }
        }
        for old_type in old.object_schemas() {
            if new.lookup(old_type.name()).is_none() {
                changes.push(SchemaChange::RemoveType {
                    type_name: old_type.name().to_string(),
                });
            }
        }
        changes
    }
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .object_schemas()
                .all(|s| other.lookup(s.name()) == Some(s))
    }
}

impl Eq for Schema {}

/// One structural difference between two schemas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaChange {
    /// A type exists only in the new schema.
    AddType {
        /// Type name.
        type_name: String,
    },
    /// A type exists only in the old schema.
    RemoveType {
        /// Type name.
        type_name: String,
    },
    /// A property exists only in the new schema.
    AddProperty {
        /// Type name.
        type_name: String,
        /// Property name.
        property: String,
    },
    /// A property exists only in the old schema.
    RemoveProperty {
        /// Type name.
        type_name: String,
        /// Property name.
        property: String,
    },
    /// A property's kind or link target changed.
    ChangePropertyType {
        /// Type name.
        type_name: String,
        /// Property name.
        property: String,
        /// Stored kind.
        old: PropertyType,
        /// Requested kind.
        new: PropertyType,
    },
    /// A property gained or lost its index.
    ChangeIndex {
        /// Type name.
        type_name: String,
        /// Property name.
        property: String,
        /// Whether the property is now indexed.
        indexed: bool,
    },
    /// The primary key moved to another property or was added or removed.
    ChangePrimaryKey {
        /// Type name.
        type_name: String,
        /// Stored primary key.
        old: Option<String>,
        /// Requested primary key.
        new: Option<String>,
    },
}

impl fmt::Display for SchemaChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddType { type_name } => write!(f, "add type {type_name}"),
            Self::RemoveType { type_name } => write!(f, "remove type {type_name}"),
            Self::AddProperty {
                type_name,
                property,
            } => write!(f, "add property {type_name}.{property}"),
            Self::RemoveProperty {
                type_name,
                property,
            } => write!(f, "remove property {type_name}.{property}"),
            Self::ChangePropertyType {
                type_name,
                property,
                old,
                new,
            } => write!(f, "change {type_name}.{property} from {old} to {new}"),
            Self::ChangeIndex {
                type_name,
                property,
                indexed,
            } => {
                let action = if *indexed { "index" } else { "unindex" };
                write!(f, "{action} {type_name}.{property}")
            }
            Self::ChangePrimaryKey {
                type_name,
                old,
                new,
            } => write!(
                f,
                "change primary key of {type_name} from {} to {}",
                old.as_deref().unwrap_or("none"),
                new.as_deref().unwrap_or("none")
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person() -> ObjectSchema {
        ObjectSchema::builder("Person")
            .property(Property::string("name"))
            .property(Property::array("dogs", "Dog"))
            .primary_key("name")
            .build()
    }

    fn dog() -> ObjectSchema {
        ObjectSchema::builder("Dog")
            .property(Property::string("name"))
            .property(Property::object("owner", "Person"))
            .build()
    }

    #[test]
    fn register_and_lookup() {
        let schema = Schema::register([person(), dog()]).unwrap();
        assert_eq!(schema.len(), 2);
        assert_eq!(schema.lookup("Dog").unwrap().name(), "Dog");
        assert!(schema.lookup("Cat").is_none());
        let (index, person) = schema.require("Person").unwrap();
        assert_eq!(schema.get(index), person);
    }

    #[test]
    fn duplicate_type_rejected() {
        let err = Schema::register([dog(), dog(), person()]).unwrap_err();
        assert!(matches!(err, CoreError::DuplicateType { .. }));
    }

    #[test]
    fn invalid_primary_key_rejected() {
        let missing = ObjectSchema::builder("A")
            .property(Property::int("id"))
            .primary_key("uuid")
            .build();
        assert!(matches!(
            Schema::register([missing]).unwrap_err(),
            CoreError::InvalidPrimaryKey { .. }
        ));

        let wrong_kind = ObjectSchema::builder("A")
            .property(Property::double("id"))
            .primary_key("id")
            .build();
        assert!(matches!(
            Schema::register([wrong_kind]).unwrap_err(),
            CoreError::InvalidPrimaryKey { .. }
        ));
    }

    #[test]
    fn dangling_link_rejected() {
        let err = Schema::register([person()]).unwrap_err();
        assert!(matches!(err, CoreError::InvalidProperty { .. }));
    }

    #[test]
    fn unindexable_property_rejected() {
        let schema = ObjectSchema::builder("A")
            .property(Property::data("blob").indexed())
            .build();
        assert!(matches!(
            Schema::register([schema]).unwrap_err(),
            CoreError::InvalidProperty { .. }
        ));
    }

    #[test]
    fn diff_reports_structural_changes() {
        let old = Schema::register([ObjectSchema::builder("Person")
            .property(Property::string("name"))
            .property(Property::string("nickname"))
            .property(Property::int("rank"))
            .build()])
        .unwrap();
        let new = Schema::register([
            ObjectSchema::builder("Person")
                .property(Property::string("name"))
                .property(Property::int("age").default_value(0))
                .property(Property::double("rank"))
                .primary_key("name")
                .build(),
            ObjectSchema::builder("Tag").build(),
        ])
        .unwrap();

        let changes = Schema::diff(&old, &new);
        assert!(changes.contains(&SchemaChange::AddType {
            type_name: "Tag".into()
        }));
        assert!(changes.contains(&SchemaChange::AddProperty {
            type_name: "Person".into(),
            property: "age".into()
        }));
        assert!(changes.contains(&SchemaChange::RemoveProperty {
            type_name: "Person".into(),
            property: "nickname".into()
        }));
        assert!(changes.contains(&SchemaChange::ChangePropertyType {
            type_name: "Person".into(),
            property: "rank".into(),
            old: PropertyType::Int,
            new: PropertyType::Double,
        }));
        assert!(changes.contains(&SchemaChange::ChangeIndex {
            type_name: "Person".into(),
            property: "name".into(),
            indexed: true,
        }));
        assert!(changes
            .iter()
            .any(|c| matches!(c, SchemaChange::ChangePrimaryKey { .. })));

        assert!(Schema::diff(&new, &new).is_empty());
    }

    #[test]
    fn schema_equality_is_pairwise() {
        let a = Schema::register([person(), dog()]).unwrap();
        let b = Schema::register([dog(), person()]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, Schema::empty());
    }
}
