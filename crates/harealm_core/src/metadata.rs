//! Persisted schema metadata.
//!
//! ## Layout
//!
//! User types live in tables named `class_<TypeName>`. The reserved table
//! `metadata` records the schema version and the realized schema:
//!
//! ```text
//! key       | type_name | property | kind | indexed | link_target | primary_key | value
//! "version" |           |          |      |         |             |             | <version>
//! "type"    | Person    | <pk>     |      |         |             | <has pk>    |
//! "property"| Person    | name     | 2    | true    |             | true        |
//! ```
//!
//! Property rows appear in property order. The metadata table is the only
//! source used to reconstruct a stored schema.

use crate::error::{CoreError, CoreResult};
use crate::schema::{ObjectSchema, Property, PropertyType, Schema};
use harealm_storage::{Cell, ColumnSpec, ColumnType, Group, RowKey, StorageError, Table};

/// Name of the reserved metadata table.
pub const METADATA_TABLE: &str = "metadata";

/// Version reported for files that were never versioned.
pub const NOT_VERSIONED: u64 = u64::MAX;

const TYPE_PREFIX: &str = "class_";

const KEY: usize = 0;
const TYPE_NAME: usize = 1;
const PROPERTY: usize = 2;
const KIND: usize = 3;
const INDEXED: usize = 4;
const LINK_TARGET: usize = 5;
const PRIMARY_KEY: usize = 6;
const VALUE: usize = 7;

/// A schema read back from a file.
#[derive(Debug, Clone)]
pub struct StoredSchema {
    /// Schema version.
    pub version: u64,
    /// Realized schema.
    pub schema: Schema,
}

/// Returns the table name backing a type.
#[must_use]
pub fn table_name(type_name: &str) -> String {
    format!("{TYPE_PREFIX}{type_name}")
}

/// Returns the type stored in a table, if it is a type table.
#[must_use]
pub fn type_name(table_name: &str) -> Option<&str> {
    table_name.strip_prefix(TYPE_PREFIX)
}

/// Returns the column declaration of a property.
#[must_use]
pub fn column_spec(property: &Property) -> ColumnSpec {
    let ty = property.kind().column_type();
    let spec = match property.object_type() {
        Some(target) => ColumnSpec::link(property.name(), ty, table_name(target)),
        None => ColumnSpec::new(property.name(), ty),
    };
    if property.is_indexed() {
        spec.with_index()
    } else {
        spec
    }
}

/// Creates the table for a type with one column per property.
pub fn create_type_table(group: &mut Group, object_schema: &ObjectSchema) -> CoreResult<()> {
    let table = group.create_table(&table_name(object_schema.name()))?;
    for property in object_schema.properties() {
        table.add_column(column_spec(property))?;
    }
    Ok(())
}

/// Reads the schema version, or `None` if the file is unversioned.
pub fn read_version(group: &Group) -> CoreResult<Option<u64>> {
    let Some(table) = group.table(METADATA_TABLE) else {
        return Ok(None);
    };
    for row in table.row_keys() {
        if table.get(row, KEY)?.as_str() == Some("version") {
            let value = table.get(row, VALUE)?.as_int().unwrap_or(-1);
            let version = u64::try_from(value)
                .map_err(|_| StorageError::corrupted(format!("invalid schema version {value}")))?;
            return Ok(Some(version));
        }
    }
    Ok(None)
}

/// Reads the stored schema and version, or `None` for unversioned files.
pub fn read(group: &Group) -> CoreResult<Option<StoredSchema>> {
    let Some(version) = read_version(group)? else {
        return Ok(None);
    };
    let Some(table) = group.table(METADATA_TABLE) else {
        return Ok(None);
    };

    // (type name, primary key, properties) in stored order.
    let mut types: Vec<(String, Option<String>, Vec<Property>)> = Vec::new();
    for row in table.row_keys() {
        let text = |column: usize| -> CoreResult<String> {
            Ok(table.get(row, column)?.as_str().unwrap_or_default().to_string())
        };
        let flag = |column: usize| -> CoreResult<bool> {
            Ok(table.get(row, column)?.as_bool().unwrap_or(false))
        };
        match table.get(row, KEY)?.as_str() {
            Some("type") => {
                let primary_key = if flag(PRIMARY_KEY)? {
                    Some(text(PROPERTY)?)
                } else {
                    None
                };
                types.push((text(TYPE_NAME)?, primary_key, Vec::new()));
            }
            Some("property") => {
                let owner = text(TYPE_NAME)?;
                let code = table.get(row, KIND)?.as_int().unwrap_or(-1);
                let kind = PropertyType::from_code(code).ok_or_else(|| {
                    StorageError::corrupted(format!("unknown property kind {code}"))
                })?;
                let target = Some(text(LINK_TARGET)?).filter(|t| !t.is_empty());
                let property =
                    Property::with_kind(text(PROPERTY)?, kind, target).set_indexed(flag(INDEXED)?);
                let (_, _, properties) = types
                    .iter_mut()
                    .find(|(name, _, _)| *name == owner)
                    .ok_or_else(|| {
                        StorageError::corrupted(format!("property row for unknown type {owner}"))
                    })?;
                properties.push(property);
            }
            _ => {}
        }
    }
    let schema = Schema::register(types.into_iter().map(|(name, primary_key, properties)| {
        let builder = ObjectSchema::builder(name).properties(properties);
        match primary_key {
            Some(key) => builder.primary_key(key).build(),
            None => builder.build(),
        }
    }))?;
    Ok(Some(StoredSchema { version, schema }))
}

/// Replaces the stored version and schema.
pub fn write(group: &mut Group, version: u64, schema: &Schema) -> CoreResult<()> {
    let version = i64::try_from(version)
        .map_err(|_| CoreError::invalid_schema_version(format!("{version} is out of range")))?;
    if !group.has_table(METADATA_TABLE) {
        let table = group.create_table(METADATA_TABLE)?;
        for spec in [
            ColumnSpec::new("key", ColumnType::String),
            ColumnSpec::new("type_name", ColumnType::String),
            ColumnSpec::new("property", ColumnType::String),
            ColumnSpec::new("kind", ColumnType::Int),
            ColumnSpec::new("indexed", ColumnType::Bool),
            ColumnSpec::new("link_target", ColumnType::String),
            ColumnSpec::new("primary_key", ColumnType::Bool),
            ColumnSpec::new("value", ColumnType::Int),
        ] {
            table.add_column(spec)?;
        }
    }
    let table = group.require_table_mut(METADATA_TABLE)?;
    table.clear();

    let row = add_row(table, "version", "", "")?;
    table.set(row, VALUE, Cell::Int(version))?;

    for object_schema in schema.object_schemas() {
        let type_name = object_schema.name();
        let primary_key = object_schema.primary_key();
        let row = add_row(table, "type", type_name, primary_key.unwrap_or_default())?;
        table.set(row, PRIMARY_KEY, Cell::Bool(primary_key.is_some()))?;

        for property in object_schema.properties() {
            let row = add_row(table, "property", type_name, property.name())?;
            table.set(row, KIND, Cell::Int(property.kind().code()))?;
            table.set(row, INDEXED, Cell::Bool(property.is_indexed()))?;
            table.set(
                row,
                LINK_TARGET,
                Cell::String(property.object_type().unwrap_or_default().to_string()),
            )?;
            table.set(
                row,
                PRIMARY_KEY,
                Cell::Bool(primary_key == Some(property.name())),
            )?;
        }
    }
    Ok(())
}

fn add_row(
    table: &mut Table,
    key: &str,
    type_name: &str,
    property: &str,
) -> CoreResult<RowKey> {
    let row = table.add_row();
    table.set(row, KEY, Cell::String(key.to_string()))?;
    table.set(row, TYPE_NAME, Cell::String(type_name.to_string()))?;
    table.set(row, PROPERTY, Cell::String(property.to_string()))?;
    Ok(row)
}
