//! Test fixtures and realm helpers.
//!
//! Provides the shared `Person`/`Dog` schema and realms that clean up
//! after themselves.

use harealm_core::{ObjectSchema, Property, Realm, RealmConfig, Schema};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tempfile::TempDir;

static NEXT_MEMORY_ID: AtomicU64 = AtomicU64::new(1);

/// `Person { name: string (primary key), age: int = 0, dogs: [Dog] }`.
pub fn person_schema() -> ObjectSchema {
    ObjectSchema::builder("Person")
        .property(Property::string("name"))
        .property(Property::int("age").default_value(0))
        .property(Property::array("dogs", "Dog"))
        .primary_key("name")
        .build()
}

/// `Dog { name: string, age: int = 0, owner: Person? }`.
pub fn dog_schema() -> ObjectSchema {
    ObjectSchema::builder("Dog")
        .property(Property::string("name"))
        .property(Property::int("age").default_value(0))
        .property(Property::object("owner", "Person"))
        .build()
}

/// The registered `Person` and `Dog` schema.
pub fn pets_schema() -> Schema {
    Schema::register([person_schema(), dog_schema()]).expect("fixture schema is valid")
}

/// A realm with automatic cleanup.
pub struct TestRealm {
    /// The realm instance.
    pub realm: Realm,
    config: RealmConfig,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestRealm {
    /// Opens a fresh in-memory realm with `schema`.
    pub fn memory(schema: Schema) -> Self {
        let id = NEXT_MEMORY_ID.fetch_add(1, Ordering::Relaxed);
        let config = RealmConfig::in_memory(format!("testkit-{}-{id}", std::process::id())).schema(schema);
        Self {
            realm: Realm::open(config.clone()).expect("Failed to open in-memory realm"),
            config,
            _temp_dir: None,
        }
    }

    /// Opens a fresh file realm with `schema` in a temporary directory.
    pub fn file(schema: Schema) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = RealmConfig::new(temp_dir.path().join("test.realm")).schema(schema);
        Self {
            realm: Realm::open(config.clone()).expect("Failed to open file realm"),
            config,
            _temp_dir: Some(temp_dir),
        }
    }

    /// Opens an in-memory realm with the `Person`/`Dog` schema.
    pub fn pets() -> Self {
        Self::memory(pets_schema())
    }

    /// Returns the configuration the realm was opened with.
    pub fn config(&self) -> &RealmConfig {
        &self.config
    }

    /// Returns the file path if file-based, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        self.config.path().map(Path::to_path_buf)
    }

    /// Opens another session on the same data.
    pub fn session(&self) -> Realm {
        Realm::open(self.config.clone()).expect("Failed to open second session")
    }
}

impl std::ops::Deref for TestRealm {
    type Target = Realm;

    fn deref(&self) -> &Self::Target {
        &self.realm
    }
}

/// Runs a test with a temporary in-memory `Person`/`Dog` realm.
pub fn with_pets_realm<F, R>(f: F) -> R
where
    F: FnOnce(&Realm) -> R,
{
    let test_realm = TestRealm::pets();
    f(&test_realm.realm)
}

/// Runs a test with a temporary file realm.
pub fn with_file_realm<F, R>(schema: Schema, f: F) -> R
where
    F: FnOnce(&Realm, &Path) -> R,
{
    let test_realm = TestRealm::file(schema);
    let path = test_realm.path().expect("File realm should have a path");
    f(&test_realm.realm, &path)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;
    use serde_json::json;

    /// Creates a realm with `count` people named `person-<i>`, aged `i`.
    pub fn populated_realm(count: usize) -> TestRealm {
        let test_realm = TestRealm::pets();
        test_realm
            .write(|realm| {
                for i in 0..count {
                    realm.create("Person", json!({"name": format!("person-{i}"), "age": i}))?;
                }
                Ok(())
            })
            .expect("Failed to populate realm");
        test_realm
    }

    /// Creates a realm where `Alice` owns `Rex` and `Fido`.
    pub fn owner_with_dogs() -> TestRealm {
        let test_realm = TestRealm::pets();
        test_realm
            .write(|realm| {
                realm.create(
                    "Person",
                    json!({"name": "Alice", "age": 30, "dogs": [{"name": "Rex", "age": 2}, {"name": "Fido", "age": 5}]}),
                )
            })
            .expect("Failed to populate realm");
        test_realm
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_realms_are_isolated() {
        let a = scenarios::populated_realm(3);
        let b = TestRealm::pets();
        assert_eq!(a.objects("Person").unwrap().len().unwrap(), 3);
        assert_eq!(b.objects("Person").unwrap().len().unwrap(), 0);
    }

    #[test]
    fn test_file_realm_has_path() {
        with_file_realm(pets_schema(), |realm, path| {
            assert!(path.exists());
            assert_eq!(realm.path(), Some(path));
        });
    }

    #[test]
    fn test_second_session_shares_data() {
        let test_realm = scenarios::owner_with_dogs();
        let other = test_realm.session();
        assert_eq!(other.objects("Dog").unwrap().len().unwrap(), 2);
    }
}
