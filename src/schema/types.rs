use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::template::{Template, TemplateKind};
use crate::error::SchemaValidationError;

/// Semantic type of a declared column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    #[default]
    #[serde(alias = "text", alias = "str")]
    String,
    #[serde(alias = "integer", alias = "int", alias = "float", alias = "decimal")]
    Number,
    #[serde(alias = "bool")]
    Boolean,
    #[serde(alias = "datetime")]
    Date,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Number => write!(f, "number"),
            Self::Boolean => write!(f, "boolean"),
            Self::Date => write!(f, "date"),
        }
    }
}

/// One input or output column declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDecl {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: ColumnType,
    /// Only meaningful for input columns.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
    #[serde(default)]
    pub description: String,
}

impl ColumnDecl {
    pub fn new(name: impl Into<String>, kind: ColumnType) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            description: String::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn described(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// User-defined contract for one enrichment task.
///
/// The `id` doubles as the registry key and as the cache namespace, so two
/// schemas never share cached results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(default)]
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub input_columns: Vec<ColumnDecl>,
    pub output_columns: Vec<ColumnDecl>,
    /// Single-record template; a default is derived when empty.
    #[serde(default)]
    pub prompt_template: String,
    /// Batch template; must contain `{batch_data}` when set.
    #[serde(default)]
    pub batch_prompt_template: String,
}

impl Schema {
    pub fn input_column(&self, name: &str) -> Option<&ColumnDecl> {
        self.input_columns.iter().find(|column| column.name == name)
    }

    pub fn output_column(&self, name: &str) -> Option<&ColumnDecl> {
        self.output_columns.iter().find(|column| column.name == name)
    }

    pub fn output_names(&self) -> impl Iterator<Item = &str> {
        self.output_columns.iter().map(|column| column.name.as_str())
    }

    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    /// Single-record template, falling back to a generated one.
    pub fn single_template(&self) -> String {
        if self.prompt_template.trim().is_empty() {
            "Fill in the missing fields for this record.\n\n{input_data}\n\nFields to provide:\n{output_fields_description}".to_string()
        } else {
            self.prompt_template.clone()
        }
    }

    /// Batch template, falling back to a generated one.
    pub fn batch_template(&self) -> String {
        if self.batch_prompt_template.trim().is_empty() {
            "Fill in the missing fields for each of the {record_count} records below.\n\n{batch_data}\n\nFields to provide for every record:\n{output_fields_description}".to_string()
        } else {
            self.batch_prompt_template.clone()
        }
    }

    /// Check column declarations and both templates.
    pub fn validate(&self) -> Result<(), SchemaValidationError> {
        if self.id.trim().is_empty() {
            return Err(SchemaValidationError::EmptyId);
        }
        if self.input_columns.is_empty() {
            return Err(SchemaValidationError::NoColumns {
                schema: self.id.clone(),
                kind: "input",
            });
        }
        if self.output_columns.is_empty() {
            return Err(SchemaValidationError::NoColumns {
                schema: self.id.clone(),
                kind: "output",
            });
        }
        let inputs = self.unique_names(&self.input_columns)?;
        let outputs = self.unique_names(&self.output_columns)?;
        if let Some(column) = inputs.intersection(&outputs).next() {
            return Err(SchemaValidationError::OverlappingColumn {
                schema: self.id.clone(),
                column: column.to_string(),
            });
        }
        self.validate_templates()
    }

    /// Re-check only the templates; they may be edited after registration.
    pub fn validate_templates(&self) -> Result<(), SchemaValidationError> {
        for kind in [TemplateKind::Single, TemplateKind::Batch] {
            let source = match kind {
                TemplateKind::Single => self.single_template(),
                TemplateKind::Batch => self.batch_template(),
            };
            let template = Template::parse(&source);
            for placeholder in template.placeholders() {
                if kind.is_reserved(placeholder) || self.input_column(placeholder).is_some() {
                    continue;
                }
                return Err(SchemaValidationError::UnknownPlaceholder {
                    schema: self.id.clone(),
                    template: kind.label(),
                    placeholder: placeholder.to_string(),
                });
            }
            if kind == TemplateKind::Batch && !template.placeholders().any(|p| p == "batch_data")
            {
                return Err(SchemaValidationError::MissingBatchData {
                    schema: self.id.clone(),
                });
            }
        }
        Ok(())
    }

    fn unique_names<'a>(
        &self,
        columns: &'a [ColumnDecl],
    ) -> Result<BTreeSet<&'a str>, SchemaValidationError> {
        let mut seen = BTreeSet::new();
        for column in columns {
            let name = column.name.as_str();
            if name.trim().is_empty() {
                return Err(SchemaValidationError::EmptyColumnName {
                    schema: self.id.clone(),
                });
            }
            if !seen.insert(name) {
                return Err(SchemaValidationError::DuplicateColumn {
                    schema: self.id.clone(),
                    column: name.to_string(),
                });
            }
        }
        Ok(seen)
    }
}

/// The example schema written by `lmenrich init`.
pub fn example_schema() -> Schema {
    Schema {
        id: "company_enrichment".to_string(),
        name: "Company enrichment".to_string(),
        description: "Look up industry and headquarters for a company".to_string(),
        input_columns: vec![ColumnDecl::new("company_name", ColumnType::String)
            .required()
            .described("Registered company name")],
        output_columns: vec![
            ColumnDecl::new("industry", ColumnType::String).described("Primary industry"),
            ColumnDecl::new("headquarters", ColumnType::String).described("City and country"),
            ColumnDecl::new("founded", ColumnType::Number).described("Year founded"),
        ],
        prompt_template: "Research the company `{company_name}`.\n\n{input_data}\n\nProvide:\n{output_fields_description}".to_string(),
        batch_prompt_template: "Research each of these {record_count} companies.\n\n{batch_data}\n\nProvide for every company:\n{output_fields_description}".to_string(),
    }
}
