//! Inspect command implementation.

use harealm_core::{metadata, Realm, RealmConfig};
use serde::Serialize;
use std::path::Path;
use tracing::debug;

/// Realm inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Realm file path.
    pub path: String,
    /// File size in bytes.
    pub file_size: u64,
    /// Schema version, absent for unversioned files.
    pub schema_version: Option<u64>,
    /// Storage commit version of the snapshot inspected.
    pub commit_version: u64,
    /// Per-type statistics.
    pub types: Vec<TypeStats>,
}

/// Statistics for a single object type.
#[derive(Debug, Serialize)]
pub struct TypeStats {
    /// Type name.
    pub name: String,
    /// Primary key property.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<String>,
    /// Number of live objects.
    pub count: usize,
    /// Property descriptions (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<Vec<PropertyInfo>>,
}

/// Description of one property.
#[derive(Debug, Serialize)]
pub struct PropertyInfo {
    /// Property name.
    pub name: String,
    /// Property kind.
    pub kind: String,
    /// Whether a search index is declared.
    pub indexed: bool,
    /// Link target type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

/// Runs the inspect command.
pub fn run(path: &Path, show_schema: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = collect(path, show_schema)?;
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }
    Ok(())
}

/// Reads the stored schema and row counts of a realm file.
pub fn collect(path: &Path, show_schema: bool) -> Result<InspectResult, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No realm found at {}", path.display()).into());
    }
    let realm = Realm::open(
        RealmConfig::dynamic(path)
            .read_only(true)
            .create_if_missing(false),
    )?;
    debug!(?realm, "opened realm for inspection");

    let schema_version = Some(realm.schema_version()?).filter(|v| *v != metadata::NOT_VERSIONED);
    let mut types = Vec::new();
    for object_schema in realm.schema().object_schemas() {
        let properties = show_schema.then(|| {
            object_schema
                .properties()
                .iter()
                .map(|p| PropertyInfo {
                    name: p.name().to_string(),
                    kind: p.kind().to_string(),
                    indexed: p.is_indexed(),
                    target: p.object_type().map(str::to_string),
                })
                .collect()
        });
        types.push(TypeStats {
            name: object_schema.name().to_string(),
            primary_key: object_schema.primary_key().map(str::to_string),
            count: realm.objects(object_schema.name())?.len()?,
            properties,
        });
    }

    Ok(InspectResult {
        path: path.display().to_string(),
        file_size: std::fs::metadata(path)?.len(),
        schema_version,
        commit_version: realm.version()?,
        types,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("HARealm Inspection");
    println!("==================");
    println!();
    println!("Path: {}", result.path);
    println!("Size: {}", format_size(result.file_size));
    match result.schema_version {
        Some(version) => println!("Schema version: {version}"),
        None => println!("Schema version: (unversioned)"),
    }
    println!("Commit version: {}", result.commit_version);
    println!();
    println!("Types:");
    if result.types.is_empty() {
        println!("  (none)");
    }
    for ty in &result.types {
        match &ty.primary_key {
            Some(key) => println!("  {} ({} objects, primary key {key})", ty.name, ty.count),
            None => println!("  {} ({} objects)", ty.name, ty.count),
        }
        for property in ty.properties.iter().flatten() {
            let index = if property.indexed { " indexed" } else { "" };
            match &property.target {
                Some(target) => {
                    println!("    {}: {}<{target}>{index}", property.name, property.kind);
                }
                None => println!("    {}: {}{index}", property.name, property.kind),
            }
        }
    }
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} bytes")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harealm_core::{ObjectSchema, Property, Schema};
    use tempfile::tempdir;

    #[test]
    fn collects_counts_and_schema() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("inspect.realm");
        let schema = Schema::register([ObjectSchema::builder("Dog")
            .property(Property::string("name").indexed())
            .primary_key("name")
            .build()])
        .unwrap();
        let realm = Realm::open(RealmConfig::new(&path).schema(schema).schema_version(2)).unwrap();
        realm
            .write(|r| {
                r.create("Dog", serde_json::json!({"name": "Rex"}))?;
                r.create("Dog", serde_json::json!({"name": "Fido"}))
            })
            .unwrap();

        let result = collect(&path, true).unwrap();
        assert_eq!(result.schema_version, Some(2));
        assert_eq!(result.types.len(), 1);
        assert_eq!(result.types[0].count, 2);
        assert_eq!(result.types[0].primary_key.as_deref(), Some("name"));
        let properties = result.types[0].properties.as_ref().unwrap();
        assert!(properties[0].indexed);

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["types"][0]["name"], "Dog");
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(collect(&dir.path().join("nope.realm"), false).is_err());
    }

    #[test]
    fn sizes_are_human_readable() {
        assert_eq!(format_size(12), "12 bytes");
        assert_eq!(format_size(2048), "2.0 KB");
    }
}
