//! Object store: creating, updating and deleting rows.
//!
//! All mutations run inside [`RealmInner::mutate`], so a failure anywhere in
//! a nested create leaves the write transaction as it was.

use crate::error::{CoreError, CoreResult};
use crate::object::{target_index, Object};
use crate::query::Predicate;
use crate::realm::{Realm, RealmInner};
use crate::results::Results;
use crate::schema::{PropertyType, Schema, SchemaIndex};
use crate::value::{InitValue, Value};
use crate::{accessor::Accessor, metadata};
use harealm_storage::{Cell, Group, RowKey};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::rc::Rc;
use std::sync::Arc;
use tracing::debug;

/// Flags controlling how initializers become rows.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CreationOptions(u8);

impl CreationOptions {
    /// Fail with `DuplicatePrimaryKey` if a live row has the primary key.
    pub const ENFORCE_UNIQUE: Self = Self(1);
    /// Update the row with the same primary key instead of inserting.
    pub const UPDATE_OR_CREATE: Self = Self(1 << 1);
    /// Copy objects from other realms instead of failing.
    pub const ALLOW_COPY: Self = Self(1 << 2);

    /// No flags. Uniqueness is verified at commit.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Returns true if every flag of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    fn checks_uniqueness(self) -> bool {
        self.0 & (Self::ENFORCE_UNIQUE.0 | Self::UPDATE_OR_CREATE.0) != 0
    }
}

impl BitOr for CreationOptions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for CreationOptions {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for CreationOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(Self::ENFORCE_UNIQUE) {
            names.push("ENFORCE_UNIQUE");
        }
        if self.contains(Self::UPDATE_OR_CREATE) {
            names.push("UPDATE_OR_CREATE");
        }
        if self.contains(Self::ALLOW_COPY) {
            names.push("ALLOW_COPY");
        }
        write!(f, "CreationOptions({})", names.join(" | "))
    }
}

/// An object that is not yet part of any realm.
#[derive(Debug, Clone, PartialEq)]
pub struct UnmanagedObject {
    type_name: String,
    values: BTreeMap<String, InitValue>,
}

impl UnmanagedObject {
    /// Creates an empty object of a type.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            values: BTreeMap::new(),
        }
    }

    /// Sets a property, builder style.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<InitValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Sets a property.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<InitValue>) {
        self.values.insert(name.into(), value.into());
    }

    /// Returns a property value, if set.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&InitValue> {
        self.values.get(name)
    }

    /// Returns the type name.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }
}

type CopyKey = (u64, SchemaIndex, RowKey);

/// Builds rows from initializers within one mutation.
pub(crate) struct Writer<'a> {
    realm: &'a Rc<RealmInner>,
    group: &'a mut Group,
    options: CreationOptions,
    /// Rows already copied from other realms.
    copied: HashMap<CopyKey, RowKey>,
}

impl<'a> Writer<'a> {
    pub(crate) fn new(realm: &'a Rc<RealmInner>, group: &'a mut Group, options: CreationOptions) -> Self {
        Self {
            realm,
            group,
            options,
            copied: HashMap::new(),
        }
    }

    fn accessor(&self, index: SchemaIndex) -> CoreResult<Arc<Accessor>> {
        self.realm.accessor(&*self.group, index)
    }

    fn type_name(&self, index: SchemaIndex) -> &str {
        self.realm.schema.get(index).name()
    }

    /// Creates (or resolves) the row described by `init`.
    pub(crate) fn create_row(&mut self, index: SchemaIndex, init: &InitValue) -> CoreResult<RowKey> {
        match init {
            InitValue::Object(object) | InitValue::Value(Value::Object(object)) => {
                self.adopt(index, object)
            }
            InitValue::Mapping(map) => {
                let object_schema = self.realm.schema.get(index);
                let mut fields = Vec::with_capacity(map.len());
                for (name, value) in map {
                    if object_schema.property(name).is_some() {
                        fields.push((name.clone(), value.clone()));
                    } else {
                        debug!(
                            type_name = object_schema.name(),
                            key = name.as_str(),
                            "ignoring initializer key without a property"
                        );
                    }
                }
                self.insert_fields(index, &fields, None)
            }
            InitValue::List(values) => {
                let object_schema = self.realm.schema.get(index);
                let expected = object_schema.properties().len();
                if values.len() != expected {
                    return Err(CoreError::invalid_init_value(
                        object_schema.name(),
                        format!("expected {expected} positional values, got {}", values.len()),
                    ));
                }
                let fields: Vec<_> = object_schema
                    .properties()
                    .iter()
                    .map(|p| p.name().to_string())
                    .zip(values.iter().cloned())
                    .collect();
                self.insert_fields(index, &fields, None)
            }
            InitValue::Value(value) => Err(CoreError::invalid_init_value(
                self.type_name(index),
                format!("expected a mapping, list or object, got {}", value.type_name()),
            )),
        }
    }

    /// Resolves an existing object to a row of this realm.
    fn adopt(&mut self, index: SchemaIndex, object: &Object) -> CoreResult<RowKey> {
        let type_name = self.type_name(index).to_string();
        if object.session() == self.realm.session {
            if object.schema_index() != index {
                return Err(CoreError::invalid_init_value(
                    type_name,
                    format!("cannot use an object of type {}", object.type_name()),
                ));
            }
            let accessor = self.accessor(index)?;
            let table = self.group.require_table(accessor.table_name())?;
            if !table.contains(object.row_key()) {
                return Err(CoreError::InvalidatedObject);
            }
            return Ok(object.row_key());
        }

        // Another realm: the object is only usable as a source of values.
        object.live()?;
        if !self.options.contains(CreationOptions::ALLOW_COPY) {
            return Err(CoreError::CrossRealmReference {
                type_name: object.type_name().to_string(),
            });
        }
        if object.type_name() != type_name {
            return Err(CoreError::invalid_init_value(
                type_name,
                format!("cannot copy an object of type {}", object.type_name()),
            ));
        }
        let key = (object.session(), object.schema_index(), object.row_key());
        if let Some(row) = self.copied.get(&key) {
            return Ok(*row);
        }
        let fields: Vec<_> = object
            .to_fields()?
            .into_iter()
            .filter(|(name, _)| self.realm.schema.get(index).property(name).is_some())
            .collect();
        self.insert_fields(index, &fields, Some(key))
    }

    fn insert_fields(
        &mut self,
        index: SchemaIndex,
        fields: &[(String, InitValue)],
        copy_key: Option<CopyKey>,
    ) -> CoreResult<RowKey> {
        let schema = Arc::clone(&self.realm.schema);
        let object_schema = schema.get(index);
        let accessor = self.accessor(index)?;
        let provided = |name: &str| fields.iter().find(|(n, _)| n == name).map(|(_, v)| v);

        for property in object_schema.properties() {
            if property.is_required() && provided(property.name()).is_none() {
                return Err(CoreError::MissingRequiredProperty {
                    type_name: object_schema.name().to_string(),
                    property: property.name().to_string(),
                });
            }
        }

        if let (Some(position), Some(property)) = (
            object_schema.primary_key_index(),
            object_schema.primary_key_property(),
        ) {
            let key_value = match provided(property.name()) {
                Some(InitValue::Value(value)) => value.clone(),
                Some(other) => {
                    return Err(CoreError::invalid_value(
                        object_schema.name(),
                        property.name(),
                        format!("expected a {} value, got {}", property.kind(), other.shape()),
                    ))
                }
                None => property.default().cloned().unwrap_or(Value::Null),
            };
            let cell = key_value.to_cell(object_schema.name(), property)?;

            if self.options.checks_uniqueness() {
                let table = self.group.require_table(accessor.table_name())?;
                if let Some(existing) = table.find_first(accessor.column(position), &cell)? {
                    if !self.options.contains(CreationOptions::UPDATE_OR_CREATE) {
                        return Err(CoreError::DuplicatePrimaryKey {
                            type_name: object_schema.name().to_string(),
                            value: key_value.to_string(),
                        });
                    }
                    if let Some(key) = copy_key {
                        self.copied.insert(key, existing);
                    }
                    for (name, value) in fields {
                        if name == property.name() {
                            continue;
                        }
                        if let Some(p) = object_schema.property_index(name) {
                            self.write_field(index, &accessor, existing, p, value)?;
                        }
                    }
                    return Ok(existing);
                }
            } else {
                self.realm.unchecked.borrow_mut().insert(index);
            }
        }

        let row = self.group.require_table_mut(accessor.table_name())?.add_row();
        if let Some(key) = copy_key {
            self.copied.insert(key, row);
        }
        for (position, property) in object_schema.properties().iter().enumerate() {
            match provided(property.name()) {
                Some(value) => self.write_field(index, &accessor, row, position, value)?,
                None => {
                    if let Some(default) = property.default() {
                        let value = InitValue::Value(default.clone());
                        self.write_field(index, &accessor, row, position, &value)?;
                    }
                }
            }
        }
        Ok(row)
    }

    /// Updates one property of an existing row.
    pub(crate) fn update_field(
        &mut self,
        index: SchemaIndex,
        row: RowKey,
        position: usize,
        value: &InitValue,
    ) -> CoreResult<()> {
        let schema = Arc::clone(&self.realm.schema);
        let object_schema = schema.get(index);
        let accessor = self.accessor(index)?;
        let column = accessor.column(position);
        let table = self.group.require_table(accessor.table_name())?;
        if !table.contains(row) {
            return Err(CoreError::InvalidatedObject);
        }

        if object_schema.primary_key_index() == Some(position) {
            let property = &object_schema.properties()[position];
            let InitValue::Value(key_value) = value else {
                return Err(CoreError::invalid_value(
                    object_schema.name(),
                    property.name(),
                    format!("expected a {} value, got {}", property.kind(), value.shape()),
                ));
            };
            let cell = key_value.to_cell(object_schema.name(), property)?;
            if self.realm.in_migration.get() {
                self.realm.unchecked.borrow_mut().insert(index);
            } else if table.get(row, column)? != &cell && table.count_equal(column, &cell)? > 0 {
                return Err(CoreError::DuplicatePrimaryKey {
                    type_name: object_schema.name().to_string(),
                    value: key_value.to_string(),
                });
            }
        }
        self.write_field(index, &accessor, row, position, value)
    }

    fn write_field(
        &mut self,
        index: SchemaIndex,
        accessor: &Accessor,
        row: RowKey,
        position: usize,
        value: &InitValue,
    ) -> CoreResult<()> {
        let schema = Arc::clone(&self.realm.schema);
        let object_schema = schema.get(index);
        let property = &object_schema.properties()[position];
        let cell = match property.kind() {
            PropertyType::Object => {
                if value.is_null() {
                    Cell::Link(None)
                } else {
                    let target = target_index(self.realm, property.object_type())?;
                    Cell::Link(Some(self.create_row(target, value)?))
                }
            }
            PropertyType::Array => {
                let target = target_index(self.realm, property.object_type())?;
                let items = match value {
                    InitValue::List(items) => items.clone(),
                    InitValue::Value(Value::Null) => Vec::new(),
                    InitValue::Value(Value::List(list)) => self
                        .list_objects(list)?
                        .into_iter()
                        .map(InitValue::Object)
                        .collect(),
                    other => {
                        return Err(CoreError::invalid_value(
                            object_schema.name(),
                            property.name(),
                            format!("expected a list, got {}", other.shape()),
                        ))
                    }
                };
                let mut keys = Vec::with_capacity(items.len());
                for item in &items {
                    keys.push(self.create_row(target, item)?);
                }
                Cell::LinkList(keys)
            }
            _ => match value {
                InitValue::Value(v) => v.to_cell(object_schema.name(), property)?,
                other => {
                    return Err(CoreError::invalid_value(
                        object_schema.name(),
                        property.name(),
                        format!("expected a {} value, got {}", property.kind(), other.shape()),
                    ))
                }
            },
        };
        self.group
            .require_table_mut(accessor.table_name())?
            .set(row, accessor.column(position), cell)?;
        Ok(())
    }

    /// Returns the elements of a list, reading this transaction directly
    /// for lists of this realm.
    fn list_objects(&self, list: &crate::list::List) -> CoreResult<Vec<Object>> {
        if list.parent().session() != self.realm.session {
            return list.to_vec();
        }
        list.keys_in(self.realm, &*self.group)
            .map(|(target, keys)| keys.into_iter().map(|k| Object::new(self.realm, target, k)).collect())
    }
}

/// Verifies that no two rows of a type share a primary-key value.
pub(crate) fn verify_unique(group: &Group, schema: &Schema, index: SchemaIndex) -> CoreResult<()> {
    let object_schema = schema.get(index);
    let Some(property) = object_schema.primary_key() else {
        return Ok(());
    };
    let Some(table) = group.table(&metadata::table_name(object_schema.name())) else {
        return Ok(());
    };
    let column = table
        .column_index(property)
        .ok_or_else(|| CoreError::invalid_property(object_schema.name(), property, "no column"))?;
    for row in table.row_keys() {
        let cell = table.get(row, column)?;
        if table.count_equal(column, cell)? > 1 {
            return Err(CoreError::DuplicatePrimaryKey {
                type_name: object_schema.name().to_string(),
                value: Value::from_cell(cell).to_string(),
            });
        }
    }
    Ok(())
}

impl Realm {
    /// Creates an object, failing if its primary key is already used.
    ///
    /// `value` may be a mapping keyed by property name, a positional list
    /// in property order, or a `serde_json::Value` of either shape.
    ///
    /// # Errors
    ///
    /// - `NotInWriteTransaction` outside a write
    /// - `UnknownType` if the type is not in the schema
    /// - `MissingRequiredProperty`, `InvalidInitValue`, `InvalidValue` for
    ///   malformed initializers
    /// - `DuplicatePrimaryKey` on a primary-key collision
    pub fn create(&self, type_name: &str, value: impl Into<InitValue>) -> CoreResult<Object> {
        self.create_with_options(type_name, value, CreationOptions::ENFORCE_UNIQUE)
    }

    /// Creates an object with explicit creation options.
    pub fn create_with_options(
        &self,
        type_name: &str,
        value: impl Into<InitValue>,
        options: CreationOptions,
    ) -> CoreResult<Object> {
        let inner = &self.inner;
        if inner.is_closed() {
            return Err(CoreError::RealmClosed);
        }
        let (index, _) = inner.schema.require(type_name)?;
        let value = value.into();
        let row = inner.mutate(|group| Writer::new(inner, group, options).create_row(index, &value))?;
        Ok(Object::new(inner, index, row))
    }

    /// Adds an unmanaged object, failing if its primary key is already used.
    pub fn add(&self, object: UnmanagedObject) -> CoreResult<Object> {
        self.add_with_options(object, CreationOptions::ENFORCE_UNIQUE)
    }

    /// Adds an unmanaged object with explicit creation options.
    pub fn add_with_options(&self, object: UnmanagedObject, options: CreationOptions) -> CoreResult<Object> {
        self.create_with_options(&object.type_name, InitValue::Mapping(object.values), options)
    }

    /// Deletes an object.
    ///
    /// Links to it become null and it is removed from every list. Linked
    /// objects are not deleted.
    ///
    /// # Errors
    ///
    /// `CrossRealmReference` for objects of another realm,
    /// `InvalidatedObject` if it was already deleted.
    pub fn delete(&self, object: &Object) -> CoreResult<()> {
        let inner = &self.inner;
        if inner.is_closed() {
            return Err(CoreError::RealmClosed);
        }
        if object.session() != inner.session {
            return Err(CoreError::CrossRealmReference {
                type_name: object.type_name().to_string(),
            });
        }
        inner.mutate(|group| {
            let table = metadata::table_name(object.type_name());
            if !group.require_table(&table)?.contains(object.row_key()) {
                return Err(CoreError::InvalidatedObject);
            }
            group.delete_row(&table, object.row_key())?;
            Ok(())
        })
    }

    /// Deletes every object of every type.
    pub fn delete_all(&self) -> CoreResult<()> {
        let inner = &self.inner;
        inner.mutate(|group| {
            for object_schema in inner.schema.object_schemas() {
                group.clear_table(&metadata::table_name(object_schema.name()))?;
            }
            Ok(())
        })
    }

    /// Returns all objects of a type.
    pub fn objects(&self, type_name: &str) -> CoreResult<Results> {
        if self.is_closed() {
            return Err(CoreError::RealmClosed);
        }
        let (index, _) = self.inner.schema.require(type_name)?;
        Ok(Results::table(&self.inner, index))
    }

    /// Returns the objects of a type matching `predicate`.
    pub fn objects_where(&self, type_name: &str, predicate: Predicate) -> CoreResult<Results> {
        self.objects(type_name)?.filter(predicate)
    }

    /// Looks up an object by primary key.
    ///
    /// # Errors
    ///
    /// `NoPrimaryKey` if the type declares none, `InvalidValue` if `key`
    /// does not fit the key property.
    pub fn object_for_primary_key(
        &self,
        type_name: &str,
        key: impl Into<Value>,
    ) -> CoreResult<Option<Object>> {
        let inner = &self.inner;
        let (index, object_schema) = inner.schema.require(type_name)?;
        let (Some(position), Some(property)) = (
            object_schema.primary_key_index(),
            object_schema.primary_key_property(),
        ) else {
            return Err(CoreError::NoPrimaryKey {
                type_name: type_name.to_string(),
            });
        };
        let key: Value = key.into();
        let cell = key.to_cell(type_name, property)?;
        let row = inner.read(|group| {
            let accessor = inner.accessor(group, index)?;
            let table = group.require_table(accessor.table_name())?;
            Ok(table.find_first(accessor.column(position), &cell)?)
        })?;
        Ok(row.map(|row| Object::new(inner, index, row)))
    }
}
