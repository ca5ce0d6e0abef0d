//! Record files in and result files out.
//!
//! Input is a JSON array of objects or JSON Lines; a record's row number is
//! its position in the file. Results are published with a tmp + rename so a
//! reader never sees a half-written file.
use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::Path;

use crate::dispatch::DispatchMode;
use crate::job::JobReport;
use crate::record::{merge_outcomes, FieldMap, Outcome, OutcomeSummary, Record};
use crate::schema::Schema;

/// Current schema version for result files.
pub const RESULTS_SCHEMA_VERSION: u32 = 1;

pub fn load_records(path: &Path) -> Result<Vec<Record>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("read records {}", path.display()))?;
    parse_records(&text).with_context(|| format!("parse records {}", path.display()))
}

pub fn parse_records(text: &str) -> Result<Vec<Record>> {
    let trimmed = text.trim_start();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if trimmed.starts_with('[') {
        let values: Vec<Value> = serde_json::from_str(trimmed).context("parse records JSON")?;
        return values
            .into_iter()
            .enumerate()
            .map(|(row, value)| to_record(row, value))
            .collect();
    }

    let mut records = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(line)
            .with_context(|| format!("parse JSONL line {}", line_no + 1))?;
        records.push(to_record(records.len(), value)?);
    }
    Ok(records)
}

fn to_record(row: usize, value: Value) -> Result<Record> {
    match value {
        Value::Object(map) => Ok(Record::new(row, map.into_iter().collect())),
        other => Err(anyhow!(
            "record {row} must be a JSON object (got {})",
            kind_name(&other)
        )),
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, Serialize)]
pub struct ResultsFile<'a> {
    pub schema_version: u32,
    pub schema: &'a str,
    pub mode: DispatchMode,
    pub summary: OutcomeSummary,
    pub cancelled: bool,
    pub elapsed_ms: u64,
    pub outcomes: Vec<RowOutcome<'a>>,
    /// Input records with output and status columns merged in.
    pub records: Vec<FieldMap>,
}

#[derive(Debug, Serialize)]
pub struct RowOutcome<'a> {
    pub row: usize,
    #[serde(flatten)]
    pub outcome: &'a Outcome,
}

pub fn build_results<'a>(
    records: &[Record],
    report: &'a JobReport,
    schema: &Schema,
) -> ResultsFile<'a> {
    ResultsFile {
        schema_version: RESULTS_SCHEMA_VERSION,
        schema: &report.schema,
        mode: report.mode,
        summary: report.summary,
        cancelled: report.cancelled,
        elapsed_ms: report.elapsed_ms,
        outcomes: records
            .iter()
            .zip(&report.outcomes)
            .map(|(record, outcome)| RowOutcome {
                row: record.row,
                outcome,
            })
            .collect(),
        records: merge_outcomes(records, &report.outcomes, schema),
    }
}

pub fn write_results(
    path: &Path,
    records: &[Record],
    report: &JobReport,
    schema: &Schema,
) -> Result<()> {
    let results = build_results(records, report, schema);
    let text = serde_json::to_string_pretty(&results).context("serialize results")?;
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).context("create results dir")?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, text.as_bytes()).with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("publish {}", path.display()))?;
    Ok(())
}
