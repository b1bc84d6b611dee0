//! Accessor cache: compiled bindings from properties to storage columns.
//!
//! An [`Accessor`] is built once per distinct pair of object schema and
//! table layout, identified by a SHA-256 fingerprint, and shared by every
//! object of that type.

use crate::error::{CoreError, CoreResult};
use crate::metadata;
use crate::schema::ObjectSchema;
use harealm_storage::{StorageError, Table};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// Layout fingerprint of a type bound to a table.
pub type Fingerprint = [u8; 32];

/// Property-to-column bindings for one type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accessor {
    type_name: String,
    table: String,
    columns: Vec<usize>,
    primary_key: Option<usize>,
    fingerprint: Fingerprint,
}

impl Accessor {
    /// Returns the bound type name.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Returns the backing table name.
    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.table
    }

    /// Returns the column holding the property at `property`.
    ///
    /// # Panics
    ///
    /// Panics if `property` is not a position of the bound schema.
    #[must_use]
    pub fn column(&self, property: usize) -> usize {
        self.columns[property]
    }

    /// Returns the columns in property order.
    #[must_use]
    pub fn columns(&self) -> &[usize] {
        &self.columns
    }

    /// Returns the column of the primary-key property.
    #[must_use]
    pub fn primary_key_column(&self) -> Option<usize> {
        self.primary_key.map(|p| self.columns[p])
    }

    /// Returns the layout fingerprint this accessor was built for.
    #[must_use]
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }
}

type Cache = Mutex<HashMap<(String, Fingerprint), Arc<Accessor>>>;

fn cache() -> &'static Cache {
    static CACHE: OnceLock<Cache> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Computes the fingerprint of a type over a table layout.
#[must_use]
pub fn fingerprint(object_schema: &ObjectSchema, table: &Table) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(object_schema.name().as_bytes());
    hasher.update([0]);
    for property in object_schema.properties() {
        hasher.update(property.name().as_bytes());
        hasher.update(property.kind().code().to_le_bytes());
        hasher.update(property.object_type().unwrap_or_default().as_bytes());
        hasher.update([0]);
    }
    hasher.update([1]);
    for column in table.columns() {
        hasher.update(column.name.as_bytes());
        hasher.update(format!("{:?}", column.ty).as_bytes());
        hasher.update(column.link_target.as_deref().unwrap_or_default().as_bytes());
        hasher.update([0]);
    }
    hasher.finalize().into()
}

/// Returns the accessor for a type over a table, building it on a cache miss.
///
/// # Errors
///
/// Returns a storage error if a property has no column of the right type
/// and link target.
pub fn bind(object_schema: &ObjectSchema, table: &Table) -> CoreResult<Arc<Accessor>> {
    let fingerprint = fingerprint(object_schema, table);
    let key = (object_schema.name().to_string(), fingerprint);
    if let Some(accessor) = cache().lock().get(&key) {
        return Ok(Arc::clone(accessor));
    }

    debug!(type_name = object_schema.name(), table = table.name(), "accessor cache miss");
    let mut columns = Vec::with_capacity(object_schema.properties().len());
    for property in object_schema.properties() {
        let column = table
            .column_index(property.name())
            .ok_or_else(|| StorageError::NoSuchColumn {
                table: table.name().to_string(),
                column: property.name().to_string(),
            })?;
        let spec = &table.columns()[column];
        let target = property.object_type().map(metadata::table_name);
        if spec.ty != property.kind().column_type() || spec.link_target != target {
            return Err(CoreError::Storage(StorageError::corrupted(format!(
                "column {}.{} does not match property kind {}",
                table.name(),
                spec.name,
                property.kind()
            ))));
        }
        columns.push(column);
    }

    let accessor = Arc::new(Accessor {
        type_name: object_schema.name().to_string(),
        table: table.name().to_string(),
        columns,
        primary_key: object_schema.primary_key_index(),
        fingerprint,
    });
    cache().lock().insert(key, Arc::clone(&accessor));
    Ok(accessor)
}

/// Drops every cached binding.
///
/// Called after any migration that altered a table layout.
pub fn clear_cache() {
    let mut cache = cache().lock();
    debug!(entries = cache.len(), "clearing accessor cache");
    cache.clear();
}

/// Returns the number of cached bindings.
#[must_use]
pub fn cache_len() -> usize {
    cache().lock().len()
}

/// Reorders a table's columns to follow the schema's property order.
///
/// Columns without a property keep their relative order after the bound
/// ones. Must only run inside a write transaction.
///
/// # Errors
///
/// Returns a storage error if a property has no column.
pub fn align(object_schema: &ObjectSchema, table: &mut Table) -> CoreResult<()> {
    for (position, property) in object_schema.properties().iter().enumerate() {
        let current = table
            .column_index(property.name())
            .ok_or_else(|| StorageError::NoSuchColumn {
                table: table.name().to_string(),
                column: property.name().to_string(),
            })?;
        if current != position {
            table.move_column(current, position)?;
        }
    }
    Ok(())
}
