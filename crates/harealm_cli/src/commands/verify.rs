//! Verify command implementation.

use harealm_core::{accessor, metadata};
use harealm_storage::{Group, SharedGroup};
use std::path::Path;
use tracing::info;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of types checked.
    pub types_checked: usize,
    /// Number of rows checked.
    pub rows_checked: usize,
    /// List of errors found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No realm found at {}", path.display()).into());
    }
    info!("Verifying realm at {:?}", path);

    let shared = SharedGroup::open_file(path)?;
    let snapshot = shared.begin_read()?;
    let result = verify_group(snapshot.group())?;

    println!("Types checked: {}", result.types_checked);
    println!("Rows checked:  {}", result.rows_checked);
    for error in &result.errors {
        println!("  ✗ {error}");
    }
    println!();
    if result.is_ok() {
        println!("✓ Realm verification passed");
        Ok(())
    } else {
        println!("✗ Realm verification failed");
        Err("Verification failed".into())
    }
}

/// Checks every stored type against its table and primary-key uniqueness.
pub fn verify_group(group: &Group) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    let mut result = VerifyResult::default();
    let Some(stored) = metadata::read(group)? else {
        result.errors.push("file has no schema metadata".to_string());
        return Ok(result);
    };

    for object_schema in stored.schema.object_schemas() {
        result.types_checked += 1;
        let name = object_schema.name();
        let Some(table) = group.table(&metadata::table_name(name)) else {
            result.errors.push(format!("type {name} has no table"));
            continue;
        };
        result.rows_checked += table.len();

        let bound = match accessor::bind(object_schema, table) {
            Ok(bound) => bound,
            Err(e) => {
                result.errors.push(format!("type {name}: {e}"));
                continue;
            }
        };
        if let (Some(column), Some(key)) = (bound.primary_key_column(), object_schema.primary_key()) {
            for row in table.row_keys() {
                let cell = table.get(row, column)?;
                if table.count_equal(column, cell)? > 1 {
                    result
                        .errors
                        .push(format!("type {name}: duplicate primary key {key} = {cell:?}"));
                    break;
                }
            }
        }
    }

    for table in group.table_names() {
        if let Some(name) = metadata::type_name(table) {
            if stored.schema.lookup(name).is_none() {
                result.errors.push(format!("table {table} has no type in the schema"));
            }
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use harealm_core::{ObjectSchema, Property, Realm, RealmConfig, Schema};
    use harealm_storage::Cell;
    use tempfile::tempdir;

    #[test]
    fn healthy_realm_passes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ok.realm");
        let schema = Schema::register([ObjectSchema::builder("Tag")
            .property(Property::int("id"))
            .primary_key("id")
            .build()])
        .unwrap();
        let realm = Realm::open(RealmConfig::new(&path).schema(schema)).unwrap();
        realm
            .write(|r| {
                r.create("Tag", serde_json::json!({"id": 1}))?;
                r.create("Tag", serde_json::json!({"id": 2}))
            })
            .unwrap();

        let shared = SharedGroup::open_file(&path).unwrap();
        let result = verify_group(shared.begin_read().unwrap().group()).unwrap();
        assert!(result.is_ok(), "{:?}", result.errors);
        assert_eq!(result.types_checked, 1);
        assert_eq!(result.rows_checked, 2);
    }

    #[test]
    fn duplicate_keys_and_orphan_tables_are_reported() {
        let schema = Schema::register([ObjectSchema::builder("Tag")
            .property(Property::int("id"))
            .primary_key("id")
            .build()])
        .unwrap();
        let mut group = Group::new();
        for object_schema in schema.object_schemas() {
            metadata::create_type_table(&mut group, object_schema).unwrap();
        }
        metadata::write(&mut group, 0, &schema).unwrap();
        let table = group.require_table_mut("class_Tag").unwrap();
        for _ in 0..2 {
            let row = table.add_row();
            table.set(row, 0, Cell::Int(7)).unwrap();
        }
        group.create_table("class_Orphan").unwrap();

        let result = verify_group(&group).unwrap();
        assert_eq!(result.errors.len(), 2, "{:?}", result.errors);
    }

    #[test]
    fn unversioned_group_fails() {
        let result = verify_group(&Group::new()).unwrap();
        assert!(!result.is_ok());
    }
}
