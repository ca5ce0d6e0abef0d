//! Last-resort `key: value` line scanning for responses without usable JSON.
use serde_json::Value;

use super::normalize_key;
use crate::record::FieldMap;
use crate::schema::Schema;
use crate::value::coerce;

/// Scan lines such as `- **Industry**: Tools` for declared output columns.
/// The first occurrence of a column wins.
pub(super) fn scan_lines(raw: &str, schema: &Schema) -> Option<FieldMap> {
    let mut fields = FieldMap::new();
    for line in raw.lines() {
        let Some((key, value)) = split_line(line) else {
            continue;
        };
        let key = normalize_key(&key);
        let Some(column) = schema
            .output_columns
            .iter()
            .find(|column| normalize_key(&column.name) == key)
        else {
            continue;
        };
        if fields.contains_key(&column.name) || value.is_empty() {
            continue;
        }
        let coerced = coerce(Value::String(value), column.kind);
        if !coerced.is_null() {
            fields.insert(column.name.clone(), coerced);
        }
    }
    (!fields.is_empty()).then_some(fields)
}

fn split_line(line: &str) -> Option<(String, String)> {
    let line = strip_bullet(line.trim()).replace("**", "");
    let split = line.find([':', '：'])?;
    let separator_len = line[split..].chars().next()?.len_utf8();
    let key = clean(&line[..split]);
    let value = clean(&line[split + separator_len..]);
    if key.is_empty() {
        return None;
    }
    Some((key, value))
}

fn strip_bullet(line: &str) -> &str {
    let line = line.trim_start_matches(['-', '*', '•', '#']).trim_start();
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        if let Some(rest) = line[digits..].strip_prefix(['.', ')']) {
            return rest.trim_start();
        }
    }
    line
}

fn clean(text: &str) -> String {
    text.trim()
        .trim_end_matches(',')
        .trim()
        .trim_matches(['"', '\'', '`'])
        .trim()
        .to_string()
}
