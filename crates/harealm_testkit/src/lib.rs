//! # HARealm Testkit
//!
//! Test utilities for HARealm.
//!
//! This crate provides:
//! - Fixture schemas and self-cleaning realms
//! - Property-based test generators using proptest
//! - An integration harness comparing a realm against a plain model
//!
//! ## Usage
//!
//! ```rust
//! use harealm_testkit::prelude::*;
//!
//! with_pets_realm(|realm| {
//!     realm
//!         .write(|realm| realm.create("Person", serde_json::json!({"name": "Ada"})))
//!         .unwrap();
//!     assert_eq!(realm.objects("Person").unwrap().len().unwrap(), 1);
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;
