//! Records, per-record outcomes and merge-back.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::schema::Schema;

/// Column name to scalar value.
pub type FieldMap = BTreeMap<String, Value>;

/// Marker written into output columns that received no value.
pub const FILL_MARKER: &str = "N/A";
/// Merge-back column holding the outcome kind.
pub const STATUS_COLUMN: &str = "_enrich_status";
/// Merge-back column holding the failure reason.
pub const ERROR_COLUMN: &str = "_enrich_error";

/// One input row, identified by its position in the source dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub row: usize,
    pub fields: FieldMap,
}

impl Record {
    pub fn new(row: usize, fields: FieldMap) -> Self {
        Self { row, fields }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields.get(column)
    }

    /// The record's values for the schema's input columns only.
    pub fn inputs(&self, schema: &Schema) -> FieldMap {
        schema
            .input_columns
            .iter()
            .filter_map(|column| {
                self.fields
                    .get(&column.name)
                    .map(|value| (column.name.clone(), value.clone()))
            })
            .collect()
    }

    /// Reason the record may not be queried, if any required input is empty.
    pub fn missing_required(&self, schema: &Schema) -> Option<String> {
        let missing: Vec<&str> = schema
            .input_columns
            .iter()
            .filter(|column| column.required && is_blank(self.fields.get(&column.name)))
            .map(|column| column.name.as_str())
            .collect();
        if missing.is_empty() {
            return None;
        }
        Some(format!(
            "required input column(s) empty: {}",
            missing.join(", ")
        ))
    }

    /// Existing values when every output column is already filled.
    pub fn filled_outputs(&self, schema: &Schema) -> Option<FieldMap> {
        let mut fields = FieldMap::new();
        for column in &schema.output_columns {
            let value = self.fields.get(&column.name)?;
            if !is_filled(value) {
                return None;
            }
            fields.insert(column.name.clone(), value.clone());
        }
        Some(fields)
    }
}

/// Missing, null, or whitespace-only.
pub fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(text)) => text.trim().is_empty(),
        Some(_) => false,
    }
}

fn is_filled(value: &Value) -> bool {
    !is_blank(Some(value)) && value.as_str().map(str::trim) != Some(FILL_MARKER)
}

/// Render a scalar for prompts: strings verbatim, null as empty.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Outcome for exactly one input record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success {
        fields: FieldMap,
    },
    ValidationError {
        reason: String,
    },
    ProviderError {
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        raw_response: Option<String>,
    },
    ParseError {
        reason: String,
        raw_response: String,
    },
    /// The job was cancelled before this record's chunk was dispatched.
    Cancelled,
}

impl Outcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Self::Success { .. } => OutcomeKind::Success,
            Self::ValidationError { .. } => OutcomeKind::ValidationError,
            Self::ProviderError { .. } => OutcomeKind::ProviderError,
            Self::ParseError { .. } => OutcomeKind::ParseError,
            Self::Cancelled => OutcomeKind::Cancelled,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn fields(&self) -> Option<&FieldMap> {
        match self {
            Self::Success { fields } => Some(fields),
            _ => None,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Success { .. } => None,
            Self::ValidationError { reason }
            | Self::ProviderError { reason, .. }
            | Self::ParseError { reason, .. } => Some(reason.as_str()),
            Self::Cancelled => Some("job cancelled before dispatch"),
        }
    }

    pub fn raw_response(&self) -> Option<&str> {
        match self {
            Self::ProviderError { raw_response, .. } => raw_response.as_deref(),
            Self::ParseError { raw_response, .. } => Some(raw_response.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Success,
    ValidationError,
    ProviderError,
    ParseError,
    Cancelled,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::ValidationError => write!(f, "validation_error"),
            Self::ProviderError => write!(f, "provider_error"),
            Self::ParseError => write!(f, "parse_error"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Count of each outcome kind in a finished job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeSummary {
    pub total: usize,
    pub success: usize,
    pub validation_error: usize,
    pub provider_error: usize,
    pub parse_error: usize,
    pub cancelled: usize,
}

impl OutcomeSummary {
    pub fn from_outcomes(outcomes: &[Outcome]) -> Self {
        let mut summary = Self {
            total: outcomes.len(),
            ..Self::default()
        };
        for outcome in outcomes {
            match outcome.kind() {
                OutcomeKind::Success => summary.success += 1,
                OutcomeKind::ValidationError => summary.validation_error += 1,
                OutcomeKind::ProviderError => summary.provider_error += 1,
                OutcomeKind::ParseError => summary.parse_error += 1,
                OutcomeKind::Cancelled => summary.cancelled += 1,
            }
        }
        summary
    }

    pub fn failed(&self) -> usize {
        self.total - self.success
    }
}

impl fmt::Display for OutcomeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} rows: {} success, {} validation_error, {} provider_error, {} parse_error",
            self.total, self.success, self.validation_error, self.provider_error, self.parse_error
        )?;
        if self.cancelled > 0 {
            write!(f, ", {} cancelled", self.cancelled)?;
        }
        Ok(())
    }
}

/// Write outcomes back into their records as output and status columns.
///
/// `records` and `outcomes` are positionally aligned.
pub fn merge_outcomes(records: &[Record], outcomes: &[Outcome], schema: &Schema) -> Vec<FieldMap> {
    records
        .iter()
        .zip(outcomes)
        .map(|(record, outcome)| {
            let mut merged = record.fields.clone();
            for column in &schema.output_columns {
                let value = outcome
                    .fields()
                    .and_then(|fields| fields.get(&column.name))
                    .filter(|value| !is_blank(Some(*value)))
                    .cloned();
                match value {
                    Some(value) => {
                        merged.insert(column.name.clone(), value);
                    }
                    None => {
                        merged
                            .entry(column.name.clone())
                            .and_modify(|existing| {
                                if is_blank(Some(existing)) {
                                    *existing = Value::String(FILL_MARKER.to_string());
                                }
                            })
                            .or_insert_with(|| Value::String(FILL_MARKER.to_string()));
                    }
                }
            }
            merged.insert(
                STATUS_COLUMN.to_string(),
                Value::String(outcome.kind().to_string()),
            );
            merged.insert(
                ERROR_COLUMN.to_string(),
                outcome
                    .reason()
                    .map(|reason| Value::String(reason.to_string()))
                    .unwrap_or(Value::Null),
            );
            merged
        })
        .collect()
}
