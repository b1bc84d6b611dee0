//! Store-wide properties checked against live realms.

use harealm_core::{
    CoreError, CreationOptions, InitValue, ObjectSchema, Predicate, Property, Realm, RealmConfig,
    Schema, SortDescriptor, Value,
};
use harealm_testkit::prelude::*;
use proptest::prelude::*;
use serde_json::json;
use std::collections::BTreeSet;
use tempfile::tempdir;

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn primary_keys_stay_unique(keys in primary_key_sequence_strategy(24)) {
        let realm = TestRealm::pets();
        for key in &keys {
            let result = realm.write(|r| r.create("Person", json!({"name": key})));
            if let Err(e) = result {
                prop_assert!(
                    matches!(e, CoreError::DuplicatePrimaryKey { .. }),
                    "unexpected error: {}",
                    e
                );
            }
        }
        let names: Vec<Value> = realm
            .objects("Person")
            .unwrap()
            .iter()
            .unwrap()
            .map(|p| p.get("name").unwrap())
            .collect();
        let distinct: BTreeSet<String> = keys.iter().cloned().collect();
        prop_assert_eq!(names.len(), distinct.len());
    }

    #[test]
    fn model_matches_realm(operations in operation_sequence_strategy(1, 24)) {
        let mut harness = IntegrationHarness::new();
        for operation in &operations {
            let _ = harness.apply(operation);
        }
        harness.verify_all();
    }

    #[test]
    fn filter_then_sort_matches_manual(records in prop::collection::vec(person_record_strategy(), 0..20), bound in 0i64..120) {
        let realm = TestRealm::pets();
        realm.write(|r| {
            for record in &records {
                r.create_with_options("Person", record.to_init(), CreationOptions::UPDATE_OR_CREATE)?;
            }
            Ok(())
        }).unwrap();

        let results = realm
            .objects("Person").unwrap()
            .filter(Predicate::gte("age", bound)).unwrap()
            .sorted([SortDescriptor::desc("age"), SortDescriptor::asc("name")]).unwrap();

        let mut expected: Vec<(i64, String)> = realm
            .objects("Person").unwrap()
            .iter().unwrap()
            .map(|p| (p.get("age").unwrap().as_int().unwrap(), p.get("name").unwrap().as_str().unwrap().to_string()))
            .filter(|(age, _)| *age >= bound)
            .collect();
        expected.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

        let actual: Vec<(i64, String)> = results
            .iter().unwrap()
            .map(|p| (p.get("age").unwrap().as_int().unwrap(), p.get("name").unwrap().as_str().unwrap().to_string()))
            .collect();
        prop_assert_eq!(actual, expected);
    }
}

#[test]
fn update_or_create_is_idempotent() {
    with_pets_realm(|realm| {
        for _ in 0..2 {
            realm
                .write(|r| {
                    r.create_with_options(
                        "Person",
                        json!({"name": "Ada", "age": 36}),
                        CreationOptions::UPDATE_OR_CREATE,
                    )
                })
                .unwrap();
        }
        let people = realm.objects("Person").unwrap();
        assert_eq!(people.len().unwrap(), 1);
        assert_eq!(people.get(0).unwrap().get("age").unwrap(), Value::Int(36));
    });
}

#[test]
fn created_objects_read_back_with_defaults() {
    with_pets_realm(|realm| {
        let dog = realm
            .write(|r| r.create("Dog", [("name", InitValue::from("Rex"))]))
            .unwrap();
        assert_eq!(dog.get("name").unwrap(), Value::from("Rex"));
        assert_eq!(dog.get("age").unwrap(), Value::Int(0));
        assert!(dog.get("owner").unwrap().is_null());

        let person = realm
            .write(|r| r.create("Person", InitValue::list([InitValue::from("Ada"), 36.into(), InitValue::list(Vec::<InitValue>::new())])))
            .unwrap();
        assert_eq!(person.get("age").unwrap(), Value::Int(36));
        assert!(person.list("dogs").unwrap().is_empty().unwrap());
    });
}

#[test]
fn deletion_reaches_lists_and_results() {
    let realm = scenarios::owner_with_dogs();
    let alice = realm.object_for_primary_key("Person", "Alice").unwrap().unwrap();
    let dogs = alice.list("dogs").unwrap();
    let young = realm
        .objects_where("Dog", Predicate::lt("age", 10))
        .unwrap();
    assert_eq!(young.len().unwrap(), 2);

    let rex = dogs.get(0).unwrap();
    realm.write(|r| r.delete(&rex)).unwrap();

    assert!(rex.is_invalidated());
    assert_eq!(dogs.len().unwrap(), 1);
    assert_eq!(young.len().unwrap(), 1);
    assert_eq!(
        dogs.get(0).unwrap().get("name").unwrap(),
        Value::from("Fido")
    );
}

#[test]
fn other_sessions_observe_deletes_after_refresh() {
    let realm = scenarios::owner_with_dogs();
    let other = realm.session();
    let fido = other
        .objects_where("Dog", Predicate::eq("name", "Fido"))
        .unwrap()
        .first()
        .unwrap()
        .unwrap();

    realm.write(|r| r.delete_all()).unwrap();
    assert!(!fido.is_invalidated());
    assert!(other.refresh().unwrap());
    assert!(fido.is_invalidated());
}

fn person_schema_v0() -> Schema {
    Schema::register([ObjectSchema::builder("Person")
        .property(Property::string("name"))
        .build()])
    .unwrap()
}

#[test]
fn migration_adds_age_and_callback_sets_it() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("people.realm");
    {
        let realm = Realm::open(RealmConfig::new(&path).schema(person_schema_v0())).unwrap();
        realm
            .write(|r| {
                r.create("Person", json!({"name": "Alice"}))?;
                r.create("Person", json!({"name": "Bob"}))?;
                r.create("Person", json!({"name": "Carol"}))
            })
            .unwrap();
    }

    let v1 = Schema::register([ObjectSchema::builder("Person")
        .property(Property::string("name"))
        .property(Property::int("age").default_value(0))
        .build()])
    .unwrap();
    let realm = Realm::open_or_migrate(&path, 1, v1, |migration| {
        migration.enumerate_objects("Person", |old, new| {
            if let (Some(new), Some("Alice")) = (new, old.get("name")?.as_str()) {
                new.set("age", 42)?;
            }
            Ok(())
        })
    })
    .unwrap();

    let people = realm.objects("Person").unwrap().sorted_by("name", true).unwrap();
    let rows: Vec<(String, i64)> = people
        .iter()
        .unwrap()
        .map(|p| {
            (
                p.get("name").unwrap().as_str().unwrap().to_string(),
                p.get("age").unwrap().as_int().unwrap(),
            )
        })
        .collect();
    assert_eq!(
        rows,
        [("Alice".to_string(), 42), ("Bob".to_string(), 0), ("Carol".to_string(), 0)]
    );
    assert_eq!(
        people.filter(Predicate::eq("age", 42)).unwrap().len().unwrap(),
        1
    );
}

#[test]
fn downgrade_is_rejected_without_touching_the_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("v5.realm");
    drop(Realm::open(RealmConfig::new(&path).schema(person_schema_v0()).schema_version(5)).unwrap());
    let before = std::fs::read(&path).unwrap();

    let err = Realm::open(RealmConfig::new(&path).schema(person_schema_v0()).schema_version(3))
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidSchemaVersion { .. }));
    assert_eq!(std::fs::read(&path).unwrap(), before);
}

#[test]
fn empty_results_aggregate_to_nothing() {
    with_pets_realm(|realm| {
        let people = realm.objects("Person").unwrap();
        assert_eq!(people.average("age").unwrap(), None);
        assert_eq!(people.sum("age").unwrap(), Value::Int(0));
        assert_eq!(people.min("age").unwrap(), None);
    });
}
