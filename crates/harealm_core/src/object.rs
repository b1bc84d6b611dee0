//! Managed objects.

use crate::accessor::Accessor;
use crate::error::{CoreError, CoreResult};
use crate::list::List;
use crate::realm::{Realm, RealmInner};
use crate::schema::{ObjectSchema, PropertyType, SchemaIndex};
use crate::store::{CreationOptions, Writer};
use crate::value::{InitValue, Value};
use harealm_storage::{Cell, Group, RowKey, Table};
use std::fmt;
use std::rc::{Rc, Weak};

/// A handle to one row of a realm.
///
/// The handle does not keep the realm alive. Once the row is deleted or the
/// realm is closed, every accessor fails with `InvalidatedObject`.
#[derive(Clone)]
pub struct Object {
    realm: Weak<RealmInner>,
    session: u64,
    index: SchemaIndex,
    type_name: Rc<str>,
    row: RowKey,
}

impl Object {
    pub(crate) fn new(realm: &Rc<RealmInner>, index: SchemaIndex, row: RowKey) -> Self {
        Self {
            realm: Rc::downgrade(realm),
            session: realm.session,
            index,
            type_name: Rc::from(realm.schema.get(index).name()),
            row,
        }
    }

    pub(crate) fn session(&self) -> u64 {
        self.session
    }

    pub(crate) fn schema_index(&self) -> SchemaIndex {
        self.index
    }

    pub(crate) fn row_key(&self) -> RowKey {
        self.row
    }

    /// Returns the object's type name.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Returns the realm the object belongs to.
    ///
    /// # Errors
    ///
    /// `InvalidatedObject` if the realm was closed or dropped.
    pub fn realm(&self) -> CoreResult<Realm> {
        self.live().map(Realm::from_inner)
    }

    pub(crate) fn live(&self) -> CoreResult<Rc<RealmInner>> {
        let inner = self.realm.upgrade().ok_or(CoreError::InvalidatedObject)?;
        if inner.is_closed() {
            return Err(CoreError::InvalidatedObject);
        }
        Ok(inner)
    }

    /// Runs `f` against the object's row after checking it is still live.
    pub(crate) fn read<R>(
        &self,
        f: impl FnOnce(&Rc<RealmInner>, &Group, &Accessor, &Table) -> CoreResult<R>,
    ) -> CoreResult<R> {
        let inner = self.live()?;
        inner.read(|group| {
            let accessor = inner.accessor(group, self.index)?;
            let table = group.require_table(accessor.table_name())?;
            if !table.contains(self.row) {
                return Err(CoreError::InvalidatedObject);
            }
            f(&inner, group, accessor.as_ref(), table)
        })
    }

    /// Returns true if the row was deleted or the realm was closed.
    #[must_use]
    pub fn is_invalidated(&self) -> bool {
        self.read(|_, _, _, _| Ok(())).is_err()
    }

    /// Returns true if both handles address the same row of the same realm.
    #[must_use]
    pub fn is_same_object(&self, other: &Object) -> bool {
        self.session == other.session && self.index == other.index && self.row == other.row
    }

    fn object_schema<'a>(inner: &'a RealmInner, index: SchemaIndex) -> &'a ObjectSchema {
        inner.schema.get(index)
    }

    fn position(&self, inner: &RealmInner, name: &str) -> CoreResult<usize> {
        Self::object_schema(inner, self.index)
            .property_index(name)
            .ok_or_else(|| CoreError::invalid_property(self.type_name(), name, "no such property"))
    }

    /// Reads a property.
    ///
    /// Object properties yield `Value::Object` or `Value::Null`; array
    /// properties yield a live `Value::List`.
    ///
    /// # Errors
    ///
    /// `InvalidProperty` for unknown names, `InvalidatedObject` for deleted
    /// rows.
    pub fn get(&self, name: &str) -> CoreResult<Value> {
        self.read(|inner, _, accessor, table| {
            let position = self.position(inner, name)?;
            let cell = table.get(self.row, accessor.column(position))?;
            self.cell_value(inner, position, cell)
        })
    }

    fn cell_value(&self, inner: &Rc<RealmInner>, position: usize, cell: &Cell) -> CoreResult<Value> {
        let property = &Self::object_schema(inner, self.index).properties()[position];
        Ok(match property.kind() {
            PropertyType::Object => match cell {
                Cell::Link(Some(key)) => {
                    Value::Object(Object::new(inner, target_index(inner, property.object_type())?, *key))
                }
                _ => Value::Null,
            },
            PropertyType::Array => Value::List(List::new(self.clone(), position)),
            _ => Value::from_cell(cell),
        })
    }

    /// Writes a property.
    ///
    /// Link properties accept objects, nested initializers or null; array
    /// properties accept a list of them.
    ///
    /// # Errors
    ///
    /// - `NotInWriteTransaction` outside a write
    /// - `InvalidProperty` / `InvalidValue` for unknown names or values of
    ///   the wrong kind
    /// - `DuplicatePrimaryKey` if the primary key collides with another row
    pub fn set(&self, name: &str, value: impl Into<InitValue>) -> CoreResult<()> {
        let inner = self.live()?;
        let position = self.position(&inner, name)?;
        let value = value.into();
        inner.mutate(|group| {
            Writer::new(&inner, group, CreationOptions::ENFORCE_UNIQUE)
                .update_field(self.index, self.row, position, &value)
        })
    }

    /// Returns the live list stored in an array property.
    ///
    /// # Errors
    ///
    /// `InvalidProperty` if `name` is unknown or not an array property.
    pub fn list(&self, name: &str) -> CoreResult<List> {
        self.read(|inner, _, _, _| {
            let position = self.position(inner, name)?;
            let property = &Self::object_schema(inner, self.index).properties()[position];
            if property.kind() != PropertyType::Array {
                return Err(CoreError::invalid_property(
                    self.type_name(),
                    name,
                    "not an array property",
                ));
            }
            Ok(List::new(self.clone(), position))
        })
    }

    /// Returns the objects of `type_name` whose `property` links to this
    /// object, in row order.
    ///
    /// # Errors
    ///
    /// `UnknownType` or `InvalidProperty` if `property` is not a link to this
    /// object's type.
    pub fn linking_objects(&self, type_name: &str, property: &str) -> CoreResult<Vec<Object>> {
        self.read(|inner, group, _, _| {
            let (index, object_schema) = inner.schema.require(type_name)?;
            let position = object_schema
                .property_index(property)
                .ok_or_else(|| CoreError::invalid_property(type_name, property, "no such property"))?;
            let declared = &object_schema.properties()[position];
            if !declared.kind().is_link() || declared.object_type() != Some(self.type_name()) {
                return Err(CoreError::invalid_property(
                    type_name,
                    property,
                    format!("does not link to {}", self.type_name()),
                ));
            }
            let accessor = inner.accessor(group, index)?;
            let table = group.require_table(accessor.table_name())?;
            let column = accessor.column(position);
            Ok(table
                .row_keys()
                .filter(|row| match table.get(*row, column) {
                    Ok(Cell::Link(Some(key))) => *key == self.row,
                    Ok(Cell::LinkList(keys)) => keys.contains(&self.row),
                    _ => false,
                })
                .map(|row| Object::new(inner, index, row))
                .collect())
        })
    }

    /// Snapshots every property as an initializer, following links as
    /// managed objects.
    pub(crate) fn to_fields(&self) -> CoreResult<Vec<(String, InitValue)>> {
        self.read(|inner, _, accessor, table| {
            let object_schema = Self::object_schema(inner, self.index);
            let mut fields = Vec::with_capacity(object_schema.properties().len());
            for (position, property) in object_schema.properties().iter().enumerate() {
                let cell = table.get(self.row, accessor.column(position))?;
                let value = match (property.kind(), cell) {
                    (PropertyType::Array, Cell::LinkList(keys)) => {
                        let target = target_index(inner, property.object_type())?;
                        InitValue::List(
                            keys.iter()
                                .map(|key| InitValue::Object(Object::new(inner, target, *key)))
                                .collect(),
                        )
                    }
                    (PropertyType::Array, _) => InitValue::List(Vec::new()),
                    _ => self.cell_value(inner, position, cell)?.into(),
                };
                fields.push((property.name().to_string(), value));
            }
            Ok(fields)
        })
    }
}

/// Resolves the schema index of a link target.
pub(crate) fn target_index(inner: &RealmInner, target: Option<&str>) -> CoreResult<SchemaIndex> {
    let target = target.unwrap_or_default();
    inner
        .schema
        .index_of(target)
        .ok_or_else(|| CoreError::unknown_type(target))
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        self.is_same_object(other)
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("type", &self.type_name)
            .field("row", &self.row)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RealmConfig;
    use crate::schema::{Property, Schema};

    fn realm(id: &str) -> Realm {
        let schema = Schema::register([
            ObjectSchema::builder("Person")
                .property(Property::string("name"))
                .property(Property::int("age").default_value(0))
                .property(Property::object("best_friend", "Person"))
                .property(Property::array("dogs", "Dog"))
                .primary_key("name")
                .build(),
            ObjectSchema::builder("Dog")
                .property(Property::string("name"))
                .property(Property::object("owner", "Person"))
                .build(),
        ])
        .unwrap();
        Realm::open(RealmConfig::in_memory(id).schema(schema)).unwrap()
    }

    #[test]
    fn get_reads_properties_and_defaults() {
        let realm = realm("object-get");
        let alice = realm
            .write(|r| r.create("Person", [("name", "Alice".into())]))
            .unwrap();
        assert_eq!(alice.get("name").unwrap(), Value::from("Alice"));
        assert_eq!(alice.get("age").unwrap(), Value::Int(0));
        assert!(alice.get("best_friend").unwrap().is_null());
        assert_eq!(alice.list("dogs").unwrap().len().unwrap(), 0);
        assert_eq!(alice.type_name(), "Person");
    }

    #[test]
    fn unknown_property_is_schema_error() {
        let realm = realm("object-unknown");
        let alice = realm
            .write(|r| r.create("Person", [("name", "Alice".into())]))
            .unwrap();
        let err = alice.get("height").unwrap_err();
        assert!(matches!(err, CoreError::InvalidProperty { .. }));
        let err = alice.list("age").unwrap_err();
        assert!(matches!(err, CoreError::InvalidProperty { .. }));
    }

    #[test]
    fn set_requires_write_and_matching_kind() {
        let realm = realm("object-set");
        let alice = realm
            .write(|r| r.create("Person", [("name", "Alice".into())]))
            .unwrap();
        assert!(matches!(
            alice.set("age", 3i64),
            Err(CoreError::NotInWriteTransaction)
        ));

        realm.begin_write().unwrap();
        alice.set("age", 31i64).unwrap();
        let err = alice.set("age", "old").unwrap_err();
        assert!(matches!(err, CoreError::InvalidValue { .. }));
        realm.commit_write().unwrap();
        assert_eq!(alice.get("age").unwrap(), Value::Int(31));
    }

    #[test]
    fn set_primary_key_enforces_uniqueness() {
        let realm = realm("object-set-pk");
        realm.begin_write().unwrap();
        realm.create("Person", [("name", "Alice".into())]).unwrap();
        let bob = realm.create("Person", [("name", "Bob".into())]).unwrap();
        let err = bob.set("name", "Alice").unwrap_err();
        assert!(matches!(err, CoreError::DuplicatePrimaryKey { .. }));
        bob.set("name", "Bob").unwrap();
        realm.commit_write().unwrap();
        assert_eq!(bob.get("name").unwrap(), Value::from("Bob"));
    }

    #[test]
    fn links_resolve_to_objects() {
        let realm = realm("object-links");
        let (alice, rex) = realm
            .write(|r| {
                let alice = r.create("Person", [("name", "Alice".into())])?;
                let rex = r.create(
                    "Dog",
                    [("name", "Rex".into()), ("owner", InitValue::from(&alice))],
                )?;
                alice.list("dogs")?.add(&rex)?;
                Ok((alice, rex))
            })
            .unwrap();

        let owner = rex.get("owner").unwrap();
        assert!(owner.as_object().unwrap().is_same_object(&alice));
        assert_eq!(alice.linking_objects("Dog", "owner").unwrap(), [rex.clone()]);
        assert_eq!(rex.linking_objects("Person", "dogs").unwrap(), [alice]);
        assert!(matches!(
            rex.linking_objects("Person", "best_friend"),
            Err(CoreError::InvalidProperty { .. })
        ));
    }

    #[test]
    fn deleted_object_is_invalidated() {
        let realm = realm("object-deleted");
        let alice = realm
            .write(|r| r.create("Person", [("name", "Alice".into())]))
            .unwrap();
        let stale = alice.clone();
        realm.write(|r| r.delete(&alice)).unwrap();
        assert!(stale.is_invalidated());
        assert!(matches!(stale.get("name"), Err(CoreError::InvalidatedObject)));
    }

    #[test]
    fn identity_is_per_session() {
        let first = realm("object-identity");
        let second = Realm::open(first.config().clone()).unwrap();
        let alice = first
            .write(|r| r.create("Person", [("name", "Alice".into())]))
            .unwrap();
        second.refresh().unwrap();
        let again = second
            .object_for_primary_key("Person", "Alice")
            .unwrap()
            .unwrap();
        assert!(!again.is_same_object(&alice));
        assert_eq!(again.get("name").unwrap(), alice.get("name").unwrap());
    }
}
