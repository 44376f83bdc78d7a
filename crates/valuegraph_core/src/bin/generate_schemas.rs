//! Writes JSON schemas for the serialized value graph types.
//!
//! Usage: generate-schemas [OUT_DIR]
//! Prints all schemas as one JSON object when no directory is given.

use std::fs;
use std::path::PathBuf;

use schemars::{Schema, schema_for};
use valuegraph_core::{PersistedSources, RegistryConfig, ValueDefinition};

fn schemas() -> Vec<(&'static str, Schema)> {
    vec![
        ("value-definition", schema_for!(ValueDefinition)),
        ("persisted-sources", schema_for!(PersistedSources)),
        ("registry-config", schema_for!(RegistryConfig)),
    ]
}

fn main() -> std::io::Result<()> {
    let schemas = schemas();

    match std::env::args().nth(1).map(PathBuf::from) {
        Some(dir) => {
            fs::create_dir_all(&dir)?;
            for (name, schema) in &schemas {
                let path = dir.join(format!("{name}.schema.json"));
                fs::write(&path, serde_json::to_string_pretty(schema)?)?;
                println!("wrote {}", path.display());
            }
        }
        None => {
            let all: serde_json::Map<String, serde_json::Value> = schemas
                .into_iter()
                .map(|(name, schema)| (name.to_string(), schema.to_value()))
                .collect();
            println!("{}", serde_json::to_string_pretty(&all)?);
        }
    }
    Ok(())
}
