//! Realm configuration.

use crate::error::CoreResult;
use crate::migration::Migration;
use crate::schema::Schema;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Migration callback invoked when the schema version increases.
pub type MigrationFn = Arc<dyn Fn(&mut Migration<'_>) -> CoreResult<()> + Send + Sync>;

/// Where a realm's data lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// A file on disk.
    File(PathBuf),
    /// A process-local in-memory store shared by identifier.
    Memory(String),
}

/// Configuration for opening a realm.
#[derive(Clone)]
pub struct RealmConfig {
    /// Storage location.
    pub location: Location,

    /// Target schema. `None` opens the realm dynamically with the stored schema.
    pub schema: Option<Arc<Schema>>,

    /// Target schema version.
    pub schema_version: u64,

    /// Callback run when the stored version is older than `schema_version`.
    pub migration: Option<MigrationFn>,

    /// Whether write transactions are refused.
    pub read_only: bool,

    /// Whether `notify_idle` advances the realm to the latest commit.
    pub auto_refresh: bool,

    /// Whether to create the file if it doesn't exist.
    pub create_if_missing: bool,
}

impl fmt::Debug for RealmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealmConfig")
            .field("location", &self.location)
            .field(
                "schema",
                &self
                    .schema
                    .as_ref()
                    .map(|s| s.type_names().collect::<Vec<_>>()),
            )
            .field("schema_version", &self.schema_version)
            .field("migration", &self.migration.is_some())
            .field("read_only", &self.read_only)
            .field("auto_refresh", &self.auto_refresh)
            .field("create_if_missing", &self.create_if_missing)
            .finish()
    }
}

impl RealmConfig {
    fn with_location(location: Location) -> Self {
        Self {
            location,
            schema: None,
            schema_version: 0,
            migration: None,
            read_only: false,
            auto_refresh: true,
            create_if_missing: true,
        }
    }

    /// Creates a configuration for a file realm.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self::with_location(Location::File(path.as_ref().to_path_buf()))
    }

    /// Creates a configuration for an in-memory realm.
    ///
    /// Realms opened with the same identifier share data while at least one
    /// of them is open.
    pub fn in_memory(identifier: impl Into<String>) -> Self {
        Self::with_location(Location::Memory(identifier.into()))
    }

    /// Creates a configuration that adopts the schema stored in the file.
    pub fn dynamic(path: impl AsRef<Path>) -> Self {
        Self::new(path)
    }

    /// Returns the file path, if this is a file realm.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match &self.location {
            Location::File(path) => Some(path),
            Location::Memory(_) => None,
        }
    }

    /// Returns true if no target schema is set.
    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        self.schema.is_none()
    }

    /// Sets the target schema.
    #[must_use]
    pub fn schema(mut self, schema: Schema) -> Self {
        self.schema = Some(Arc::new(schema));
        self
    }

    /// Sets the target schema version.
    #[must_use]
    pub const fn schema_version(mut self, version: u64) -> Self {
        self.schema_version = version;
        self
    }

    /// Sets the migration callback.
    #[must_use]
    pub fn migration<F>(mut self, migration: F) -> Self
    where
        F: Fn(&mut Migration<'_>) -> CoreResult<()> + Send + Sync + 'static,
    {
        self.migration = Some(Arc::new(migration));
        self
    }

    /// Sets whether the realm is read-only.
    #[must_use]
    pub const fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    /// Sets whether idle notifications refresh the realm.
    #[must_use]
    pub const fn auto_refresh(mut self, value: bool) -> Self {
        self.auto_refresh = value;
        self
    }

    /// Sets whether to create the file if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = RealmConfig::new("data.realm");
        assert_eq!(config.path(), Some(Path::new("data.realm")));
        assert!(config.is_dynamic());
        assert_eq!(config.schema_version, 0);
        assert!(config.auto_refresh);
        assert!(config.create_if_missing);
        assert!(!config.read_only);
        assert!(config.migration.is_none());
    }

    #[test]
    fn builder_pattern() {
        let config = RealmConfig::in_memory("builder")
            .schema(Schema::empty())
            .schema_version(3)
            .migration(|_| Ok(()))
            .read_only(true)
            .auto_refresh(false)
            .create_if_missing(false);

        assert_eq!(config.location, Location::Memory("builder".into()));
        assert!(config.path().is_none());
        assert!(!config.is_dynamic());
        assert_eq!(config.schema_version, 3);
        assert!(config.migration.is_some());
        assert!(config.read_only);
        assert!(!config.auto_refresh);
        assert!(!config.create_if_missing);
    }

    #[test]
    fn debug_hides_callback() {
        let config = RealmConfig::new("x.realm").migration(|_| Ok(()));
        let rendered = format!("{config:?}");
        assert!(rendered.contains("migration: true"));
    }
}
