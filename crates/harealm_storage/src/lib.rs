//! # HARealm Storage
//!
//! Table storage core for HARealm.
//!
//! This crate provides the lowest layer underneath the object store: typed
//! cells in tables, groups of tables forming one database state, and shared
//! groups that hand out snapshot readers and a single writer.
//!
//! ## Design Principles
//!
//! - Tables know columns and cells, never object schemas
//! - Groups are copy-on-write, so snapshots and savepoints are cheap
//! - Backends are **opaque image stores** and know nothing about tables
//! - One writer per file, readers never block
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral realms
//! - [`FileBackend`] - For persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use harealm_storage::{Cell, ColumnSpec, ColumnType, SharedGroup};
//!
//! let shared = SharedGroup::open_memory("doc-example").unwrap();
//! let mut txn = shared.begin_write().unwrap();
//! let table = txn.group_mut().create_table("class_Person").unwrap();
//! let name = table
//!     .add_column(ColumnSpec::new("name", ColumnType::String))
//!     .unwrap();
//! let row = table.add_row();
//! table.set(row, name, Cell::String("Ada".into())).unwrap();
//! assert_eq!(txn.commit().unwrap(), 1);
//!
//! let snapshot = shared.begin_read().unwrap();
//! assert_eq!(snapshot.group().table("class_Person").unwrap().len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod cell;
mod error;
mod file;
mod group;
pub mod image;
mod memory;
mod shared;
mod table;

pub use backend::StorageBackend;
pub use cell::{Cell, ColumnType, RowKey};
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use group::Group;
pub use memory::InMemoryBackend;
pub use shared::{ReadTransaction, SharedGroup, WriteTransaction};
pub use table::{ColumnSpec, Table};
