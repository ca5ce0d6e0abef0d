use std::collections::BTreeMap;

use super::Schema;
use crate::error::RegistryError;

/// In-memory owner of named schemas and the active-schema pointer.
///
/// Persistence lives behind [`SchemaStore`](super::SchemaStore); the registry
/// itself never touches disk.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: BTreeMap<String, Schema>,
    active: Option<String>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from persisted state, validating every schema.
    ///
    /// An active name that does not resolve is dropped.
    pub fn from_parts(
        schemas: BTreeMap<String, Schema>,
        active: Option<String>,
    ) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for (name, schema) in schemas {
            registry.put(&name, schema)?;
        }
        if let Some(name) = active {
            if !registry.set_active(&name) {
                tracing::warn!(schema = %name, "active schema not found; none selected");
            }
        }
        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Result<&Schema, RegistryError> {
        self.schemas
            .get(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// Insert or overwrite `name`. The registry key becomes the schema id.
    pub fn put(&mut self, name: &str, mut schema: Schema) -> Result<(), RegistryError> {
        schema.id = name.to_string();
        schema.validate()?;
        self.schemas.insert(name.to_string(), schema);
        Ok(())
    }

    /// Remove `name`, clearing the active pointer if it pointed there.
    pub fn delete(&mut self, name: &str) -> bool {
        if self.schemas.remove(name).is_none() {
            return false;
        }
        if self.active.as_deref() == Some(name) {
            self.active = None;
        }
        true
    }

    pub fn active_schema(&self) -> Result<&Schema, RegistryError> {
        let name = self.active.as_deref().ok_or(RegistryError::NoneSelected)?;
        self.get(name)
    }

    pub fn active_name(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Point at `name`; leaves the pointer unchanged when `name` is unknown.
    pub fn set_active(&mut self, name: &str) -> bool {
        if !self.schemas.contains_key(name) {
            return false;
        }
        self.active = Some(name.to_string());
        true
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }

    pub fn schemas(&self) -> &BTreeMap<String, Schema> {
        &self.schemas
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}
