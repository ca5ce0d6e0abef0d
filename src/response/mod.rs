//! Turning raw model text into per-record output mappings.
//!
//! Parsing never fails loudly: every call returns tagged results, and batch
//! parsing always yields exactly one result per requested position.
use serde_json::{Map, Value};
use std::collections::BTreeMap;

mod batch;
mod extract;
mod fallback;

pub use batch::{parse_batch, parse_batch_keyed};

use crate::error::ParseFailure;
use crate::record::FieldMap;
use crate::schema::Schema;
use crate::value::coerce;
use extract::{candidate_regions, repair_json, values_starting_with};

/// Output mapping for one record, or why it could not be extracted.
pub type ParsedOutput = Result<FieldMap, ParseFailure>;

/// How far into wrapper objects (`{"result": {...}}`) projection looks.
const MAX_ENVELOPE_DEPTH: usize = 2;

/// Extract one record's output columns from a single-mode response.
pub fn parse_single(raw: &str, schema: &Schema) -> ParsedOutput {
    if raw.trim().is_empty() {
        return Err(ParseFailure::new("empty response", raw));
    }
    if let Some(fields) = first_projection(raw, schema) {
        return Ok(fields);
    }
    if let Some(fields) = repair_json(raw).and_then(|repaired| first_projection(&repaired, schema)) {
        tracing::debug!(schema = %schema.id, "parsed response after JSON repair");
        return Ok(fields);
    }
    if let Some(fields) = fallback::scan_lines(raw, schema) {
        tracing::debug!(schema = %schema.id, columns = fields.len(), "parsed response by line scan");
        return Ok(fields);
    }
    Err(ParseFailure::new(
        "no JSON object or `key: value` lines matched the output columns",
        raw,
    ))
}

fn first_projection(text: &str, schema: &Schema) -> Option<FieldMap> {
    candidate_regions(text).into_iter().find_map(|region| {
        values_starting_with(region, '{')
            .iter()
            .find_map(|value| project(value, schema, MAX_ENVELOPE_DEPTH))
    })
}

/// Project a JSON value onto the schema's output columns, unwrapping common
/// envelopes (`structured_output`, `result`, `data`, JSON-in-a-string).
///
/// Returns `None` unless at least one output column is present. An answer
/// whose output columns are all null projects to an empty mapping.
pub(crate) fn project(value: &Value, schema: &Schema, depth: usize) -> Option<FieldMap> {
    let object = value.as_object()?;
    if let Some(fields) = project_object(object, schema) {
        return Some(fields);
    }
    if depth == 0 {
        return None;
    }
    object.values().find_map(|nested| match nested {
        Value::Object(_) => project(nested, schema, depth - 1),
        Value::Array(items) if items.len() == 1 => project(&items[0], schema, depth - 1),
        Value::String(text) if text.contains('{') => candidate_regions(text)
            .into_iter()
            .flat_map(|region| values_starting_with(region, '{'))
            .find_map(|inner| project(&inner, schema, depth - 1)),
        _ => None,
    })
}

/// Declared output columns present in `object`, matched by normalized key
/// and coerced to the declared type. Null values are left out.
///
/// `None` when the object names no output column at all.
pub(crate) fn project_object(object: &Map<String, Value>, schema: &Schema) -> Option<FieldMap> {
    let by_key: BTreeMap<String, &Value> = object
        .iter()
        .map(|(key, value)| (normalize_key(key), value))
        .collect();
    let mut fields = FieldMap::new();
    let mut present = 0;
    for column in &schema.output_columns {
        let Some(value) = object
            .get(&column.name)
            .or_else(|| by_key.get(&normalize_key(&column.name)).copied())
        else {
            continue;
        };
        present += 1;
        let coerced = coerce(value.clone(), column.kind);
        if !coerced.is_null() {
            fields.insert(column.name.clone(), coerced);
        }
    }
    (present > 0).then_some(fields)
}

/// Key comparison that ignores case, spaces, underscores and hyphens.
pub(crate) fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| !matches!(c, ' ' | '_' | '-'))
        .flat_map(char::to_lowercase)
        .collect()
}

#[cfg(test)]
#[path = "parse_tests.rs"]
mod tests;
