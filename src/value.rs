//! Scalar helpers shared by fingerprinting and response coercion.
use serde_json::{Number, Value};

use crate::schema::ColumnType;

/// Trim and collapse internal whitespace runs to one space.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_lowercase().as_str() {
        "true" | "yes" | "y" | "1" => Some(true),
        "false" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

/// Parse a number, tolerating thousands separators.
pub fn parse_number(text: &str) -> Option<Number> {
    let cleaned: String = text.trim().chars().filter(|c| *c != ',' && *c != '_').collect();
    if cleaned.is_empty() {
        return None;
    }
    if let Ok(int) = cleaned.parse::<i64>() {
        return Some(Number::from(int));
    }
    cleaned
        .parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
}

/// Coerce a parsed value to the declared column type.
///
/// Values that do not fit the type are kept as trimmed strings rather than
/// dropped.
pub fn coerce(value: Value, kind: ColumnType) -> Value {
    match (kind, value) {
        (_, Value::String(text)) if is_null_word(&text) => Value::Null,
        (ColumnType::Number, Value::String(text)) => match parse_number(&text) {
            Some(number) => Value::Number(number),
            None => Value::String(text.trim().to_string()),
        },
        (ColumnType::Boolean, Value::String(text)) => match parse_bool(&text) {
            Some(flag) => Value::Bool(flag),
            None => Value::String(text.trim().to_string()),
        },
        (ColumnType::Boolean, Value::Number(number)) => match number.as_i64() {
            Some(0) => Value::Bool(false),
            Some(1) => Value::Bool(true),
            _ => Value::Number(number),
        },
        (ColumnType::String | ColumnType::Date, Value::String(text)) => {
            Value::String(text.trim().to_string())
        }
        (ColumnType::String, Value::Array(items)) => Value::String(
            items
                .iter()
                .map(crate::record::display_value)
                .collect::<Vec<_>>()
                .join(", "),
        ),
        (_, other) => other,
    }
}

fn is_null_word(text: &str) -> bool {
    matches!(text.trim().to_lowercase().as_str(), "null" | "none")
}

/// Canonical text for a value, so cosmetic differences compare equal.
pub fn normalize(value: Option<&Value>, kind: ColumnType) -> String {
    let value = match value {
        None | Some(Value::Null) => return String::new(),
        Some(value) => value,
    };
    match (kind, value) {
        (ColumnType::Number, Value::Number(number)) => canonical_number(number),
        (ColumnType::Number, Value::String(text)) => match parse_number(text) {
            Some(number) => canonical_number(&number),
            None => collapse_whitespace(text).to_lowercase(),
        },
        (ColumnType::Boolean, Value::Bool(flag)) => flag.to_string(),
        (ColumnType::Boolean, Value::String(text)) => match parse_bool(text) {
            Some(flag) => flag.to_string(),
            None => collapse_whitespace(text).to_lowercase(),
        },
        (ColumnType::Date, Value::String(text)) => text.trim().to_string(),
        (ColumnType::String, Value::String(text)) => collapse_whitespace(text).to_lowercase(),
        (_, other) => collapse_whitespace(&crate::record::display_value(other)).to_lowercase(),
    }
}

fn canonical_number(number: &Number) -> String {
    if let Some(int) = number.as_i64() {
        return int.to_string();
    }
    match number.as_f64() {
        Some(float) if float.fract() == 0.0 && float.abs() < 1e15 => (float as i64).to_string(),
        Some(float) => float.to_string(),
        None => number.to_string(),
    }
}
