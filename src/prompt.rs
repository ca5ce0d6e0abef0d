//! Prompt generation from schema templates.
//!
//! Rendering is pure: no network, no I/O. The only failure is a template that
//! references a placeholder the schema does not declare, which is re-checked
//! here because templates can be edited after registration.
use crate::error::SchemaValidationError;
use crate::record::{display_value, is_blank, Record};
use crate::schema::{ColumnType, Schema, Template, TemplateKind};

/// Written in place of a missing or blank input value in single mode.
pub const EMPTY_MARKER: &str = "(empty)";

const SINGLE_RESPONSE_FORMAT: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/prompts/single_response_format.md"
));
const BATCH_RESPONSE_FORMAT: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/prompts/batch_response_format.md"
));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptMode {
    Single,
    Batch,
}

/// Render a complete prompt for `records`.
///
/// Single mode uses only the first record; callers pass exactly one. Any
/// mode with no records renders an empty prompt.
pub fn render(
    schema: &Schema,
    records: &[&Record],
    mode: PromptMode,
    context: Option<&str>,
) -> Result<String, SchemaValidationError> {
    let body = match (mode, records.first()) {
        (_, None) => return Ok(String::new()),
        (PromptMode::Single, Some(record)) => render_single_body(schema, record)?,
        (PromptMode::Batch, Some(_)) => render_batch_body(schema, records)?,
    };
    Ok(with_context(body, context))
}

pub fn render_single(
    schema: &Schema,
    record: &Record,
    context: Option<&str>,
) -> Result<String, SchemaValidationError> {
    render(schema, &[record], PromptMode::Single, context)
}

pub fn render_batch(
    schema: &Schema,
    records: &[&Record],
    context: Option<&str>,
) -> Result<String, SchemaValidationError> {
    render(schema, records, PromptMode::Batch, context)
}

fn render_single_body(schema: &Schema, record: &Record) -> Result<String, SchemaValidationError> {
    let template = Template::parse(&schema.single_template());
    let rendered = template
        .render(|name| match name {
            "input_data" => Some(input_data(schema, record)),
            "output_fields_description" => Some(output_fields_description(schema)),
            _ => schema
                .input_column(name)
                .map(|column| single_value(record, &column.name)),
        })
        .map_err(|placeholder| unknown(schema, TemplateKind::Single, placeholder))?;
    let format = SINGLE_RESPONSE_FORMAT.replace("{output_example}", &output_example(schema, None));
    Ok(format!("{}\n{}", rendered.trim_end(), format))
}

fn render_batch_body(schema: &Schema, records: &[&Record]) -> Result<String, SchemaValidationError> {
    let template = Template::parse(&schema.batch_template());
    let count = records.len().to_string();
    let rendered = template
        .render(|name| match name {
            "batch_data" => Some(batch_data(schema, records)),
            "record_count" => Some(count.clone()),
            "output_fields_description" => Some(output_fields_description(schema)),
            _ => schema
                .input_column(name)
                .map(|column| column_listing(records, &column.name)),
        })
        .map_err(|placeholder| unknown(schema, TemplateKind::Batch, placeholder))?;
    let format = BATCH_RESPONSE_FORMAT
        .replace("{record_count}", &count)
        .replace("{output_example}", &output_example(schema, Some(0)));
    Ok(format!("{}\n{}", rendered.trim_end(), format))
}

fn with_context(body: String, context: Option<&str>) -> String {
    match context.map(str::trim).filter(|text| !text.is_empty()) {
        Some(context) => format!("## Context\n{context}\n\n{body}"),
        None => body,
    }
}

fn unknown(schema: &Schema, kind: TemplateKind, placeholder: String) -> SchemaValidationError {
    SchemaValidationError::UnknownPlaceholder {
        schema: schema.id.clone(),
        template: kind.label(),
        placeholder,
    }
}

fn single_value(record: &Record, column: &str) -> String {
    let value = record.get(column);
    if is_blank(value) {
        return EMPTY_MARKER.to_string();
    }
    value.map(display_value).unwrap_or_default()
}

fn input_data(schema: &Schema, record: &Record) -> String {
    schema
        .input_columns
        .iter()
        .map(|column| format!("{}: {}", column.name, single_value(record, &column.name)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// `- name (type): description` per output column.
pub fn output_fields_description(schema: &Schema) -> String {
    schema
        .output_columns
        .iter()
        .map(|column| {
            let mut line = format!("- {} ({})", column.name, column.kind);
            if !column.description.trim().is_empty() {
                line.push_str(": ");
                line.push_str(column.description.trim());
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// One JSON object per record, tagged with its 0-based position.
fn batch_data(schema: &Schema, records: &[&Record]) -> String {
    let lines = records
        .iter()
        .enumerate()
        .map(|(index, record)| {
            let mut line = format!("  {{\"index\": {index}");
            for column in &schema.input_columns {
                let value = record
                    .get(&column.name)
                    .filter(|value| !is_blank(Some(*value)))
                    .cloned()
                    .unwrap_or(serde_json::Value::Null);
                line.push_str(&format!(
                    ", {}: {}",
                    json_string(&column.name),
                    serde_json::to_string(&value).unwrap_or_else(|_| "null".to_string())
                ));
            }
            line.push('}');
            line
        })
        .collect::<Vec<_>>();
    format!("[\n{}\n]", lines.join(",\n"))
}

fn column_listing(records: &[&Record], column: &str) -> String {
    records
        .iter()
        .enumerate()
        .map(|(index, record)| format!("{index}. {}", single_value(record, column)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn output_example(schema: &Schema, index: Option<usize>) -> String {
    let mut parts = Vec::new();
    if let Some(index) = index {
        parts.push(format!("\"index\": {index}"));
    }
    for column in &schema.output_columns {
        let sample = match column.kind {
            ColumnType::String => "\"...\"",
            ColumnType::Number => "0",
            ColumnType::Boolean => "false",
            ColumnType::Date => "\"YYYY-MM-DD\"",
        };
        parts.push(format!("{}: {}", json_string(&column.name), sample));
    }
    format!("{{{}}}", parts.join(", "))
}

fn json_string(text: &str) -> String {
    serde_json::to_string(text).unwrap_or_else(|_| format!("\"{text}\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::FieldMap;
    use crate::schema::{example_schema, ColumnDecl};
    use serde_json::json;

    fn record(row: usize, name: &str) -> Record {
        let mut fields = FieldMap::new();
        fields.insert("company_name".to_string(), json!(name));
        Record::new(row, fields)
    }

    #[test]
    fn single_mode_substitutes_columns_and_builtins() {
        let schema = example_schema();
        let prompt = render_single(&schema, &record(7, "Acme"), None).expect("render");
        assert!(prompt.starts_with("Research the company `Acme`."));
        assert!(prompt.contains("company_name: Acme"));
        assert!(prompt.contains("- founded (number): Year founded"));
        assert!(prompt.contains(r#"{"industry": "...", "headquarters": "...", "founded": 0}"#));
    }

    #[test]
    fn no_records_render_an_empty_prompt() {
        let schema = example_schema();
        for mode in [PromptMode::Single, PromptMode::Batch] {
            let prompt = render(&schema, &[], mode, Some("Use 2024 data.")).expect("render");
            assert!(prompt.is_empty(), "{prompt}");
        }
    }

    #[test]
    fn single_mode_marks_missing_optional_values() {
        let mut schema = example_schema();
        schema
            .input_columns
            .push(ColumnDecl::new("country", ColumnType::String));
        schema.prompt_template = "{company_name} in {country}".to_string();
        let prompt = render_single(&schema, &record(0, "Acme"), None).expect("render");
        assert!(prompt.starts_with("Acme in (empty)"));
    }

    #[test]
    fn batch_mode_tags_positions_in_order() {
        let schema = example_schema();
        let a = record(10, "Acme");
        let b = record(11, "Globex");
        let prompt = render_batch(&schema, &[&a, &b], Some("Fiscal year 2024")).expect("render");
        assert!(prompt.starts_with("## Context\nFiscal year 2024\n\nResearch each of these 2 companies."));
        let first = prompt
            .find(r#"{"index": 0, "company_name": "Acme"}"#)
            .expect("first record");
        let second = prompt
            .find(r#"{"index": 1, "company_name": "Globex"}"#)
            .expect("second record");
        assert!(first < second);
        assert!(prompt.contains("2 objects in total"));
    }

    #[test]
    fn batch_mode_lists_input_column_placeholder() {
        let mut schema = example_schema();
        schema.batch_prompt_template = "Companies:\n{company_name}\n{batch_data}".to_string();
        let a = record(0, "Acme");
        let b = record(1, "Globex");
        let prompt = render_batch(&schema, &[&a, &b], None).expect("render");
        assert!(prompt.starts_with("Companies:\n0. Acme\n1. Globex\n"));
    }

    #[test]
    fn rendering_rechecks_edited_templates() {
        let mut schema = example_schema();
        schema.prompt_template = "Tell me about {ticker}".to_string();
        let err = render_single(&schema, &record(0, "Acme"), None).expect_err("undeclared");
        assert!(matches!(
            err,
            SchemaValidationError::UnknownPlaceholder { placeholder, .. } if placeholder == "ticker"
        ));
    }

    #[test]
    fn rendering_is_deterministic() {
        let schema = example_schema();
        let a = record(0, "Acme");
        let b = record(1, "Globex");
        let first = render(&schema, &[&a, &b], PromptMode::Batch, None).expect("render");
        let second = render(&schema, &[&a, &b], PromptMode::Batch, None).expect("render");
        assert_eq!(first, second);
    }
}
