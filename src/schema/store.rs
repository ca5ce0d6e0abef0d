//! Schema persistence.
//!
//! The engine reads the store once when a job starts; edits made while a job
//! runs apply to the next job.
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::{Schema, SchemaRegistry};

/// Current schema version for the schema store file.
pub const STORE_SCHEMA_VERSION: u32 = 1;

/// Loading and saving the full schema set plus the active name.
pub trait SchemaStore {
    fn load(&self) -> Result<(BTreeMap<String, Schema>, Option<String>)>;
    fn save(&self, schemas: &BTreeMap<String, Schema>, active: Option<&str>) -> Result<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    schema_version: u32,
    #[serde(default)]
    active_schema: Option<String>,
    #[serde(default)]
    schemas: BTreeMap<String, Schema>,
}

/// Pretty-printed JSON file store.
#[derive(Debug, Clone)]
pub struct JsonSchemaStore {
    path: PathBuf,
}

impl JsonSchemaStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SchemaStore for JsonSchemaStore {
    fn load(&self) -> Result<(BTreeMap<String, Schema>, Option<String>)> {
        let bytes = fs::read(&self.path)
            .with_context(|| format!("read schema store {}", self.path.display()))?;
        let file: StoreFile =
            serde_json::from_slice(&bytes).context("parse schema store JSON")?;
        if file.schema_version != 0 && file.schema_version != STORE_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema store schema_version {} (expected {})",
                file.schema_version,
                STORE_SCHEMA_VERSION
            ));
        }
        Ok((file.schemas, file.active_schema))
    }

    fn save(&self, schemas: &BTreeMap<String, Schema>, active: Option<&str>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("create schema store dir")?;
        }
        let file = StoreFile {
            schema_version: STORE_SCHEMA_VERSION,
            active_schema: active.map(str::to_string),
            schemas: schemas.clone(),
        };
        let text = serde_json::to_string_pretty(&file).context("serialize schema store")?;
        fs::write(&self.path, text.as_bytes())
            .with_context(|| format!("write {}", self.path.display()))?;
        Ok(())
    }
}

/// Load a registry from any store.
pub fn load_registry(store: &dyn SchemaStore) -> Result<SchemaRegistry> {
    let (schemas, active) = store.load()?;
    SchemaRegistry::from_parts(schemas, active).context("validate stored schemas")
}

/// Persist a registry to any store.
pub fn save_registry(store: &dyn SchemaStore, registry: &SchemaRegistry) -> Result<()> {
    store.save(registry.schemas(), registry.active_name())
}
