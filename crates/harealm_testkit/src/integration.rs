//! Cross-crate integration test helpers.
//!
//! The harness applies generated operations to a realm and to a plain
//! model, so tests can compare the two after every commit.

use crate::fixtures::TestRealm;
use crate::generators::{PersonOperation, PersonRecord};
use harealm_core::{CoreError, CreationOptions, Predicate, Realm, Value};
use std::collections::BTreeMap;

/// A test harness tracking the expected `Person` rows.
pub struct IntegrationHarness {
    /// The realm under test.
    pub realm: TestRealm,
    /// Expected age by name.
    people: BTreeMap<String, i64>,
}

impl IntegrationHarness {
    /// Creates a harness over a fresh `Person`/`Dog` realm.
    pub fn new() -> Self {
        Self {
            realm: TestRealm::pets(),
            people: BTreeMap::new(),
        }
    }

    /// Applies one operation in its own write transaction.
    ///
    /// Returns the error the realm reported, if any. Rejected operations
    /// leave the model unchanged.
    pub fn apply(&mut self, operation: &PersonOperation) -> Result<(), CoreError> {
        match operation {
            PersonOperation::Create { record, options } => self.create(record, *options),
            PersonOperation::Delete { name } => self.delete(name),
        }
    }

    fn create(&mut self, record: &PersonRecord, options: CreationOptions) -> Result<(), CoreError> {
        self.realm
            .write(|realm| realm.create_with_options("Person", record.to_init(), options))?;
        let existing = self.people.get(&record.name).copied();
        let age = match (record.age, existing) {
            (Some(age), _) => age,
            (None, Some(age)) => age,
            (None, None) => 0,
        };
        self.people.insert(record.name.clone(), age);
        Ok(())
    }

    fn delete(&mut self, name: &str) -> Result<(), CoreError> {
        self.realm.write(|realm| {
            if let Some(person) = realm.object_for_primary_key("Person", name)? {
                realm.delete(&person)?;
            }
            Ok(())
        })?;
        self.people.remove(name);
        Ok(())
    }

    /// Verifies the realm holds exactly the tracked people.
    pub fn verify_all(&self) {
        let realm: &Realm = &self.realm;
        let people = realm.objects("Person").expect("Person is in the schema");
        assert_eq!(people.len().expect("realm is open"), self.people.len());
        for (name, age) in &self.people {
            let matches = realm
                .objects_where("Person", Predicate::eq("name", name.as_str()))
                .expect("valid predicate");
            assert_eq!(matches.len().expect("realm is open"), 1, "rows named {name}");
            let person = matches.get(0).expect("one row");
            assert_eq!(person.get("age").expect("valid property"), Value::Int(*age));
        }
    }

    /// Returns the count of tracked people.
    pub fn tracked_count(&self) -> usize {
        self.people.len()
    }
}

impl Default for IntegrationHarness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, age: Option<i64>) -> PersonRecord {
        PersonRecord {
            name: name.to_string(),
            age,
        }
    }

    #[test]
    fn test_harness_tracks_updates() {
        let mut harness = IntegrationHarness::new();
        harness
            .apply(&PersonOperation::Create {
                record: record("a", Some(3)),
                options: CreationOptions::ENFORCE_UNIQUE,
            })
            .unwrap();
        harness
            .apply(&PersonOperation::Create {
                record: record("a", None),
                options: CreationOptions::UPDATE_OR_CREATE,
            })
            .unwrap();
        assert_eq!(harness.tracked_count(), 1);
        harness.verify_all();
    }

    #[test]
    fn test_harness_rejects_duplicates() {
        let mut harness = IntegrationHarness::new();
        let create = PersonOperation::Create {
            record: record("b", None),
            options: CreationOptions::ENFORCE_UNIQUE,
        };
        harness.apply(&create).unwrap();
        let err = harness.apply(&create).unwrap_err();
        assert!(matches!(err, CoreError::DuplicatePrimaryKey { .. }));
        harness
            .apply(&PersonOperation::Delete { name: "b".into() })
            .unwrap();
        assert_eq!(harness.tracked_count(), 0);
        harness.verify_all();
    }
}
