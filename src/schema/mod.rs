//! Schema registry: input/output column contracts and prompt templates.
mod registry;
mod store;
mod template;
mod types;

pub use registry::SchemaRegistry;
pub use store::{load_registry, save_registry, JsonSchemaStore, SchemaStore, STORE_SCHEMA_VERSION};
pub use template::{Template, TemplateKind, BATCH_RESERVED, SINGLE_RESERVED};
pub use types::{example_schema, ColumnDecl, ColumnType, Schema};
