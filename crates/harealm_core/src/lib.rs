//! # HARealm Core
//!
//! Object store for HARealm, layered over [`harealm_storage`].
//!
//! This crate provides:
//! - Schema registry: object types, properties and primary keys
//! - Accessor cache binding properties to storage columns
//! - Object store: create, update-or-create, copy, delete, primary-key lookup
//! - Migration engine driven by schema versions
//! - Live collections: lists, filtered and sorted results, aggregates
//!
//! ## Example
//!
//! ```rust
//! use harealm_core::{CoreError, ObjectSchema, Predicate, Property, Realm, RealmConfig, Schema};
//!
//! let schema = Schema::register([ObjectSchema::builder("Person")
//!     .property(Property::string("name"))
//!     .property(Property::int("age").default_value(0))
//!     .primary_key("name")
//!     .build()])?;
//! let realm = Realm::open(RealmConfig::in_memory("lib-doc").schema(schema))?;
//!
//! realm.write(|realm| {
//!     realm.create("Person", serde_json::json!({"name": "Ada", "age": 36}))?;
//!     realm.create("Person", serde_json::json!({"name": "Alan"}))?;
//!     Ok(())
//! })?;
//!
//! let adults = realm.objects_where("Person", Predicate::gte("age", 18))?;
//! assert_eq!(adults.len()?, 1);
//! # Ok::<(), CoreError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod accessor;
mod config;
mod error;
mod list;
pub mod metadata;
mod migration;
mod object;
mod query;
mod realm;
mod results;
mod schema;
mod store;
mod value;

pub use accessor::Accessor;
pub use config::{Location, MigrationFn, RealmConfig};
pub use error::{CoreError, CoreResult, ErrorKind};
pub use list::List;
pub use migration::{schema_version_at_path, Migration};
pub use object::Object;
pub use query::{CompareOp, Evaluator, Predicate};
pub use realm::{NotificationToken, Realm, RealmNotification};
pub use results::{Results, SortDescriptor};
pub use schema::{
    ObjectSchema, ObjectSchemaBuilder, Property, PropertyType, Schema, SchemaChange, SchemaIndex,
};
pub use store::{CreationOptions, UnmanagedObject};
pub use value::{InitValue, Value};
