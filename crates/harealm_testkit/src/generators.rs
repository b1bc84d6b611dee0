//! Property-based test generators using proptest.
//!
//! Provides strategies for generating person records and operation
//! sequences over the fixture schema.

use harealm_core::{CreationOptions, InitValue};
use proptest::prelude::*;
use serde::Serialize;

/// A generated `Person` record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersonRecord {
    /// Primary key.
    pub name: String,
    /// Age; `None` leaves the default in place.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<i64>,
}

impl PersonRecord {
    /// Returns the record as an initializer mapping.
    pub fn to_init(&self) -> InitValue {
        serde_json::to_value(self)
            .expect("person records always serialize")
            .into()
    }

    /// Returns the age the stored object should report.
    pub fn expected_age(&self) -> i64 {
        self.age.unwrap_or(0)
    }
}

/// Strategy for generating person names.
///
/// Names are drawn from a small alphabet so collisions are common.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-d]{1,2}").expect("Invalid regex")
}

/// Strategy for generating person records.
pub fn person_record_strategy() -> impl Strategy<Value = PersonRecord> {
    (name_strategy(), prop::option::of(0i64..120)).prop_map(|(name, age)| PersonRecord { name, age })
}

/// An object-store operation on `Person`.
#[derive(Debug, Clone)]
pub enum PersonOperation {
    /// Create with the given options.
    Create {
        /// The record to create.
        record: PersonRecord,
        /// Creation options.
        options: CreationOptions,
    },
    /// Delete the person with this name, if present.
    Delete {
        /// Primary key.
        name: String,
    },
}

/// Strategy for generating creation options that keep keys unique.
pub fn unique_options_strategy() -> impl Strategy<Value = CreationOptions> {
    prop_oneof![
        Just(CreationOptions::ENFORCE_UNIQUE),
        Just(CreationOptions::UPDATE_OR_CREATE),
        Just(CreationOptions::ENFORCE_UNIQUE | CreationOptions::UPDATE_OR_CREATE),
    ]
}

/// Strategy for generating person operations.
pub fn person_operation_strategy() -> impl Strategy<Value = PersonOperation> {
    prop_oneof![
        4 => (person_record_strategy(), unique_options_strategy())
            .prop_map(|(record, options)| PersonOperation::Create { record, options }),
        1 => name_strategy().prop_map(|name| PersonOperation::Delete { name }),
    ]
}

/// Strategy for generating a sequence of operations.
pub fn operation_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<PersonOperation>> {
    prop::collection::vec(person_operation_strategy(), min_ops..max_ops)
}

/// Strategy for generating a sequence of primary keys, with repeats.
pub fn primary_key_sequence_strategy(max_len: usize) -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(name_strategy(), 0..max_len)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn names_are_short_and_lowercase(name in name_strategy()) {
            prop_assert!((1..=2).contains(&name.len()));
            prop_assert!(name.chars().all(|c| ('a'..='d').contains(&c)));
        }

        #[test]
        fn records_become_mappings(record in person_record_strategy()) {
            match record.to_init() {
                InitValue::Mapping(map) => {
                    prop_assert!(map.contains_key("name"));
                    prop_assert_eq!(map.contains_key("age"), record.age.is_some());
                }
                other => prop_assert!(false, "unexpected initializer {:?}", other),
            }
        }
    }
}
