//! Opening realms and migrating stored schemas.
//!
//! Opening compares the stored schema and version with the configured ones
//! and takes one of three paths:
//!
//! - **Fresh**: nothing stored yet; tables and metadata are created.
//! - **Up to date**: same version and schema; nothing is written.
//! - **Migrate**: older version or different schema; the layout is changed
//!   inside one write transaction and the migration callback runs if the
//!   version increased.
//!
//! A stored version newer than the configured one fails before anything is
//! written.

use crate::accessor;
use crate::config::{Location, MigrationFn, RealmConfig};
use crate::error::{CoreError, CoreResult};
use crate::metadata::{self, StoredSchema};
use crate::object::Object;
use crate::realm::{Realm, State};
use crate::schema::{ObjectSchema, Property, Schema, SchemaChange};
use crate::store::{self, CreationOptions};
use crate::value::InitValue;
use harealm_storage::{Group, ReadTransaction, SharedGroup, StorageError, WriteTransaction};
use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

enum Plan {
    Fresh,
    UpToDate,
    Migrate(StoredSchema),
}

fn plan(stored: Option<StoredSchema>, target: &Schema, version: u64) -> CoreResult<Plan> {
    let Some(stored) = stored else {
        return Ok(Plan::Fresh);
    };
    if stored.version > version {
        return Err(CoreError::invalid_schema_version(format!(
            "stored schema version {} is newer than requested version {version}",
            stored.version
        )));
    }
    if stored.version == version
        && stored.schema == *target
        && Schema::diff(&stored.schema, target).is_empty()
    {
        return Ok(Plan::UpToDate);
    }
    Ok(Plan::Migrate(stored))
}

fn open_shared(config: &RealmConfig) -> CoreResult<Arc<SharedGroup>> {
    match &config.location {
        Location::File(path) => {
            if !path.exists() && (config.read_only || !config.create_if_missing) {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("realm file {} does not exist", path.display()),
                )
                .into());
            }
            Ok(SharedGroup::open_file(path)?)
        }
        Location::Memory(identifier) => Ok(SharedGroup::open_memory(identifier)?),
    }
}

/// Opens a realm as described by `config`.
pub(crate) fn open(config: RealmConfig) -> CoreResult<Realm> {
    let shared = open_shared(&config)?;
    let snapshot = shared.begin_read()?;
    let stored = metadata::read(snapshot.group())?;

    let Some(target) = config.schema.clone() else {
        let schema = stored.map(|s| s.schema).unwrap_or_default();
        info!(
            identity = shared.identity(),
            types = schema.len(),
            "opened realm with stored schema"
        );
        return Ok(Realm::from_parts(
            config,
            shared,
            Arc::new(schema),
            State::Read(snapshot),
            false,
        ));
    };
    let version = config.schema_version;

    if let Plan::UpToDate = plan(stored, &target, version)? {
        return open_current(config, shared, target, snapshot);
    }
    if config.read_only {
        return Err(StorageError::ReadOnly.into());
    }
    drop(snapshot);

    let mut txn = shared.begin_write()?;
    // Another session may have created or migrated the file meanwhile.
    match plan(metadata::read(txn.group())?, &target, version) {
        Ok(Plan::Fresh) => {
            create_tables(txn.group_mut(), &target, version)?;
            let committed = txn.commit()?;
            info!(
                identity = shared.identity(),
                schema_version = version,
                committed,
                "created realm"
            );
            let snapshot = shared.begin_read()?;
            open_current(config, shared, target, snapshot)
        }
        Ok(Plan::UpToDate) => {
            txn.rollback();
            let snapshot = shared.begin_read()?;
            open_current(config, shared, target, snapshot)
        }
        Ok(Plan::Migrate(stored)) => migrate(config, shared, target, txn, stored),
        Err(e) => {
            txn.rollback();
            Err(e)
        }
    }
}

fn open_current(
    config: RealmConfig,
    shared: Arc<SharedGroup>,
    schema: Arc<Schema>,
    snapshot: ReadTransaction,
) -> CoreResult<Realm> {
    let version = snapshot.version();
    let realm = Realm::from_parts(config, shared, schema, State::Read(snapshot), false);
    let inner = &realm.inner;
    inner.read(|group| {
        for object_schema in inner.schema.object_schemas() {
            let (index, _) = inner.schema.require(object_schema.name())?;
            inner.accessor(group, index)?;
        }
        Ok(())
    })?;
    info!(identity = inner.shared.identity(), version, "opened realm");
    Ok(realm)
}

fn create_tables(group: &mut Group, schema: &Schema, version: u64) -> CoreResult<()> {
    for object_schema in schema.object_schemas() {
        if !group.has_table(&metadata::table_name(object_schema.name())) {
            metadata::create_type_table(group, object_schema)?;
        }
    }
    metadata::write(group, version, schema)
}

/// Appends a column for `property`, filling existing rows with its default.
fn add_column(group: &mut Group, object_schema: &ObjectSchema, property: &Property) -> CoreResult<()> {
    let table = group.require_table_mut(&metadata::table_name(object_schema.name()))?;
    let column = table.add_column(metadata::column_spec(property))?;
    if let Some(default) = property.default() {
        let cell = default.to_cell(object_schema.name(), property)?;
        let rows: Vec<_> = table.row_keys().collect();
        for row in rows {
            table.set(row, column, cell.clone())?;
        }
    }
    Ok(())
}

fn remove_column(group: &mut Group, type_name: &str, property: &str) -> CoreResult<()> {
    let table = group.require_table_mut(&metadata::table_name(type_name))?;
    if let Some(column) = table.column_index(property) {
        table.remove_column(column)?;
    }
    Ok(())
}

/// Applies the changes that must exist before the callback runs.
fn prepare(group: &mut Group, target: &Schema, changes: &[SchemaChange]) -> CoreResult<()> {
    for change in changes {
        match change {
            SchemaChange::AddType { type_name } => {
                let (_, object_schema) = target.require(type_name)?;
                if !group.has_table(&metadata::table_name(type_name)) {
                    metadata::create_type_table(group, object_schema)?;
                }
            }
            SchemaChange::AddProperty {
                type_name,
                property,
            } => {
                let (_, object_schema) = target.require(type_name)?;
                if let Some(property) = object_schema.property(property) {
                    add_column(group, object_schema, property)?;
                }
            }
            SchemaChange::ChangePropertyType {
                type_name,
                property,
                ..
            } => {
                let (_, object_schema) = target.require(type_name)?;
                remove_column(group, type_name, property)?;
                if let Some(property) = object_schema.property(property) {
                    add_column(group, object_schema, property)?;
                }
            }
            SchemaChange::ChangeIndex {
                type_name,
                property,
                indexed,
            } => {
                let table = group.require_table_mut(&metadata::table_name(type_name))?;
                if let Some(column) = table.column_index(property) {
                    table.set_indexed(column, *indexed)?;
                }
            }
            SchemaChange::RemoveType { .. }
            | SchemaChange::RemoveProperty { .. }
            | SchemaChange::ChangePrimaryKey { .. } => {}
        }
    }
    Ok(())
}

/// Removes what the target schema dropped and re-checks the result.
fn finish(group: &mut Group, target: &Schema, changes: &[SchemaChange], version: u64) -> CoreResult<()> {
    for change in changes {
        match change {
            SchemaChange::RemoveProperty {
                type_name,
                property,
            } => remove_column(group, type_name, property)?,
            SchemaChange::RemoveType { type_name } => {
                let table = metadata::table_name(type_name);
                if group.has_table(&table) {
                    group.remove_table(&table)?;
                }
            }
            _ => {}
        }
    }
    for object_schema in target.object_schemas() {
        let table = group.require_table_mut(&metadata::table_name(object_schema.name()))?;
        accessor::align(object_schema, table)?;
    }
    group.rebuild_indexes();
    for object_schema in target.object_schemas() {
        let (index, _) = target.require(object_schema.name())?;
        store::verify_unique(group, target, index).map_err(CoreError::migration_cause)?;
    }
    metadata::write(group, version, target)
}

fn migrate(
    config: RealmConfig,
    shared: Arc<SharedGroup>,
    target: Arc<Schema>,
    mut txn: WriteTransaction,
    stored: StoredSchema,
) -> CoreResult<Realm> {
    let version = config.schema_version;
    let changes = Schema::diff(&stored.schema, &target);
    info!(
        identity = shared.identity(),
        from = stored.version,
        to = version,
        changes = changes.len(),
        "migrating realm"
    );

    for change in &changes {
        if let SchemaChange::ChangePropertyType {
            type_name,
            property,
            old,
            new,
        } = change
        {
            if target.lookup(type_name).and_then(ObjectSchema::primary_key) == Some(property.as_str()) {
                txn.rollback();
                return Err(CoreError::migration_failed(format!(
                    "primary key {type_name}.{property} cannot change from {old} to {new}"
                )));
            }
        }
    }
    if let Err(e) = prepare(txn.group_mut(), &target, &changes) {
        txn.rollback();
        return Err(CoreError::migration_cause(e));
    }

    let before = ReadTransaction::detached(Arc::clone(txn.base()), txn.base_version());
    let old_schema = Arc::new(stored.schema);
    let old = Realm::from_parts(
        RealmConfig {
            schema: Some(Arc::clone(&old_schema)),
            schema_version: stored.version,
            migration: None,
            read_only: true,
            ..config.clone()
        },
        Arc::clone(&shared),
        old_schema,
        State::Read(before),
        true,
    );
    let callback: Option<MigrationFn> = config.migration.clone();
    let new = Realm::from_parts(config, Arc::clone(&shared), Arc::clone(&target), State::Write(txn), false);
    new.inner.in_migration.set(true);

    let result = run(&old, &new, stored.version, version, callback.as_ref())
        .and_then(|()| new.inner.mutate(|group| finish(group, &target, &changes, version)))
        .and_then(|()| {
            new.inner.unchecked.borrow_mut().clear();
            let committed = new.inner.take_write()?.commit()?;
            new.inner.install(State::Read(shared.begin_read()?));
            Ok(committed)
        });
    old.close();

    match result {
        Ok(committed) => {
            accessor::clear_cache();
            new.rebind();
            new.inner.in_migration.set(false);
            info!(
                identity = shared.identity(),
                from = stored.version,
                to = version,
                committed,
                "migrated realm"
            );
            Ok(new)
        }
        Err(e) => {
            warn!(error = %e, from = stored.version, to = version, "migration failed, rolled back");
            new.close();
            Err(CoreError::migration_cause(e))
        }
    }
}

fn run(
    old: &Realm,
    new: &Realm,
    from: u64,
    to: u64,
    callback: Option<&MigrationFn>,
) -> CoreResult<()> {
    let Some(callback) = callback else {
        return Ok(());
    };
    if to <= from {
        debug!(from, to, "schema version unchanged, skipping migration callback");
        return Ok(());
    }
    let mut migration = Migration {
        old,
        new,
        old_version: from,
    };
    callback(&mut migration)
}

/// Context passed to a migration callback.
///
/// Old objects read the file as it was before the migration, through the
/// stored schema. New objects read and write the migrating transaction.
pub struct Migration<'a> {
    old: &'a Realm,
    new: &'a Realm,
    old_version: u64,
}

impl Migration<'_> {
    /// Returns the schema stored before the migration.
    #[must_use]
    pub fn old_schema(&self) -> &Schema {
        self.old.schema()
    }

    /// Returns the schema being migrated to.
    #[must_use]
    pub fn new_schema(&self) -> &Schema {
        self.new.schema()
    }

    /// Returns the schema version stored before the migration.
    #[must_use]
    pub fn old_schema_version(&self) -> u64 {
        self.old_version
    }

    /// Returns the schema version being migrated to.
    #[must_use]
    pub fn new_schema_version(&self) -> u64 {
        self.new.config().schema_version
    }

    /// Returns the read-only realm over the pre-migration data.
    #[must_use]
    pub fn old_realm(&self) -> &Realm {
        self.old
    }

    /// Returns the realm being migrated, inside its write transaction.
    #[must_use]
    pub fn new_realm(&self) -> &Realm {
        self.new
    }

    /// Calls `f` for every stored object of `type_name`.
    ///
    /// `f` receives the old object and, if the type still exists and the
    /// row was not deleted, the same object in the new realm. Types only in
    /// the new schema have no stored objects.
    ///
    /// # Errors
    ///
    /// `UnknownType` if neither schema has the type, or the first error
    /// returned by `f`.
    pub fn enumerate_objects<F>(&mut self, type_name: &str, mut f: F) -> CoreResult<()>
    where
        F: FnMut(&Object, Option<&Object>) -> CoreResult<()>,
    {
        let new_index = self.new.schema().index_of(type_name);
        let Some(old_index) = self.old.schema().index_of(type_name) else {
            return match new_index {
                Some(_) => Ok(()),
                None => Err(CoreError::unknown_type(type_name)),
            };
        };

        let old = &self.old.inner;
        let rows: Vec<_> = old.read(|group| {
            let accessor = old.accessor(group, old_index)?;
            Ok(group.require_table(accessor.table_name())?.row_keys().collect())
        })?;

        let new = &self.new.inner;
        let table = metadata::table_name(type_name);
        for row in rows {
            let old_object = Object::new(old, old_index, row);
            let new_object = match new_index {
                Some(index) => new
                    .read(|group| Ok(group.table(&table).is_some_and(|t| t.contains(row))))?
                    .then(|| Object::new(new, index, row)),
                None => None,
            };
            f(&old_object, new_object.as_ref())?;
        }
        Ok(())
    }

    /// Creates an object in the new realm.
    ///
    /// Primary-key uniqueness is checked once the callback returns.
    pub fn create_object(&mut self, type_name: &str, value: impl Into<InitValue>) -> CoreResult<Object> {
        self.new
            .create_with_options(type_name, value, CreationOptions::empty())
    }

    /// Deletes an object of the new realm.
    pub fn delete_object(&mut self, object: &Object) -> CoreResult<()> {
        self.new.delete(object)
    }

    /// Deletes every object of a type.
    ///
    /// Types missing from the new schema lose their table as well.
    /// Returns false if nothing was stored for the type.
    pub fn delete_data(&mut self, type_name: &str) -> CoreResult<bool> {
        let keep = self.new.schema().lookup(type_name).is_some();
        let table = metadata::table_name(type_name);
        self.new.inner.mutate(|group| {
            if !group.has_table(&table) {
                return Ok(false);
            }
            if keep {
                group.clear_table(&table)?;
            } else {
                group.remove_table(&table)?;
            }
            Ok(true)
        })
    }
}

/// Returns the schema version stored in a file without opening a session.
///
/// Missing and unversioned files report `None`.
pub fn schema_version_at_path(path: impl AsRef<Path>) -> CoreResult<Option<u64>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(None);
    }
    let shared = SharedGroup::open_file(path)?;
    let snapshot = shared.begin_read()?;
    metadata::read_version(snapshot.group())
}
