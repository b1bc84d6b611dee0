//! Object schemas: the persisted shape of one type.

use super::property::Property;

/// Description of one persisted object type.
///
/// Property order is significant: it defines the positional mapping for
/// sequence initializers and the column order on disk.
///
/// Two object schemas are equal when their type names match and they hold
/// the same set of properties, regardless of order.
///
/// # Example
///
/// ```rust
/// use harealm_core::{ObjectSchema, Property};
///
/// let person = ObjectSchema::builder("Person")
///     .property(Property::string("name"))
///     .property(Property::int("age").default_value(0))
///     .primary_key("name")
///     .build();
/// assert_eq!(person.primary_key(), Some("name"));
/// ```
#[derive(Debug, Clone)]
pub struct ObjectSchema {
    name: String,
    properties: Vec<Property>,
    primary_key: Option<String>,
}

impl ObjectSchema {
    /// Starts building a schema for `name`.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> ObjectSchemaBuilder {
        ObjectSchemaBuilder {
            name: name.into(),
            properties: Vec::new(),
            primary_key: None,
        }
    }

    /// Returns the type name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the properties in declaration order.
    #[must_use]
    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    /// Returns the property with the given name.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name() == name)
    }

    /// Returns the position of the named property.
    #[must_use]
    pub fn property_index(&self, name: &str) -> Option<usize> {
        self.properties.iter().position(|p| p.name() == name)
    }

    /// Returns the primary-key property name.
    #[must_use]
    pub fn primary_key(&self) -> Option<&str> {
        self.primary_key.as_deref()
    }

    /// Returns the primary-key property.
    #[must_use]
    pub fn primary_key_property(&self) -> Option<&Property> {
        self.primary_key().and_then(|name| self.property(name))
    }

    /// Returns the position of the primary-key property.
    #[must_use]
    pub fn primary_key_index(&self) -> Option<usize> {
        self.primary_key().and_then(|name| self.property_index(name))
    }
}

impl PartialEq for ObjectSchema {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.primary_key == other.primary_key
            && self.properties.len() == other.properties.len()
            && self
                .properties
                .iter()
                .all(|p| other.property(p.name()) == Some(p))
    }
}

impl Eq for ObjectSchema {}

/// Builder for [`ObjectSchema`].
#[derive(Debug, Clone)]
pub struct ObjectSchemaBuilder {
    name: String,
    properties: Vec<Property>,
    primary_key: Option<String>,
}

impl ObjectSchemaBuilder {
    /// Appends a property.
    #[must_use]
    pub fn property(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }

    /// Appends several properties.
    #[must_use]
    pub fn properties(mut self, properties: impl IntoIterator<Item = Property>) -> Self {
        self.properties.extend(properties);
        self
    }

    /// Declares the primary-key property.
    #[must_use]
    pub fn primary_key(mut self, name: impl Into<String>) -> Self {
        self.primary_key = Some(name.into());
        self
    }

    /// Finishes the schema. The primary key, if valid, is indexed.
    ///
    /// Validation happens when the schema is registered.
    #[must_use]
    pub fn build(self) -> ObjectSchema {
        let Self {
            name,
            mut properties,
            primary_key,
        } = self;
        if let Some(key) = primary_key.as_deref() {
            for property in &mut properties {
                if property.name() == key && property.kind().is_primary_key_kind() {
                    *property = property.clone().indexed();
                }
            }
        }
        ObjectSchema {
            name,
            properties,
            primary_key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_key_is_indexed() {
        let schema = ObjectSchema::builder("Person")
            .property(Property::string("name"))
            .primary_key("name")
            .build();
        assert!(schema.property("name").unwrap().is_indexed());
        assert_eq!(schema.primary_key_index(), Some(0));
    }

    #[test]
    fn equality_ignores_property_order() {
        let a = ObjectSchema::builder("Dog")
            .property(Property::string("name"))
            .property(Property::int("age"))
            .build();
        let b = ObjectSchema::builder("Dog")
            .property(Property::int("age"))
            .property(Property::string("name"))
            .build();
        assert_eq!(a, b);

        let c = ObjectSchema::builder("Dog")
            .property(Property::string("name"))
            .build();
        assert_ne!(a, c);
    }

    #[test]
    fn equality_covers_primary_key() {
        let plain = ObjectSchema::builder("Tag")
            .property(Property::int("id").indexed())
            .build();
        let keyed = ObjectSchema::builder("Tag")
            .property(Property::int("id").indexed())
            .primary_key("id")
            .build();
        assert_eq!(plain.properties(), keyed.properties());
        assert_ne!(plain, keyed);
    }
}
