//! AI call logging for enrichment transparency.
//!
//! One JSONL entry per provider call attempt, so users can see what was sent,
//! how long it took and which rows it answered.
//!
//! ```jsonl
//! {"schema_version":1,"ts":1707900000000,"chunk":0,"mode":"batch","attempt":1,...}
//! {"schema_version":1,"ts":1707900004200,"chunk":1,"mode":"batch","attempt":1,...}
//! ```
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use crate::dispatch::DispatchMode;
use crate::util::{now_epoch_ms, preview};

/// Current schema version for lm_log entries.
pub const LM_LOG_SCHEMA_VERSION: u32 = 1;

/// Characters of prompt and response kept in each entry.
const PREVIEW_BYTES: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LmOutcome {
    /// Every row in the call was answered.
    Success,
    /// Some rows answered, some failed to parse.
    Partial,
    /// Provider error, or no row could be parsed.
    Failed,
}

impl std::fmt::Display for LmOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Partial => write!(f, "partial"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LmLogEntry {
    pub schema_version: u32,

    /// Unix timestamp in milliseconds when the entry was finished.
    pub ts: u64,

    /// Chunk number within the job (0-indexed).
    pub chunk: usize,

    pub mode: DispatchMode,

    /// 1 for the first call, incremented per retry.
    pub attempt: u32,

    pub duration_ms: u64,

    /// Source row indices answered by this call.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub rows: Vec<usize>,

    pub outcome: LmOutcome,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub succeeded: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_preview: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_preview: Option<String>,
}

/// Builder for log entries with timing.
pub struct LmLogBuilder {
    start: Instant,
    chunk: usize,
    mode: DispatchMode,
    attempt: u32,
    rows: Vec<usize>,
    prompt_preview: Option<String>,
    response_preview: Option<String>,
}

impl LmLogBuilder {
    pub fn new(chunk: usize, mode: DispatchMode, attempt: u32) -> Self {
        Self {
            start: Instant::now(),
            chunk,
            mode,
            attempt,
            rows: Vec::new(),
            prompt_preview: None,
            response_preview: None,
        }
    }

    pub fn with_rows(mut self, rows: Vec<usize>) -> Self {
        self.rows = rows;
        self
    }

    pub fn with_prompt_preview(mut self, prompt: &str) -> Self {
        self.prompt_preview = Some(preview(prompt, PREVIEW_BYTES));
        self
    }

    pub fn with_response_preview(mut self, response: &str) -> Self {
        self.response_preview = Some(preview(response, PREVIEW_BYTES));
        self
    }

    /// Finish with success, partial or failed depending on the counts.
    pub fn parsed(self, succeeded: usize, failed: usize) -> LmLogEntry {
        let outcome = match (succeeded, failed) {
            (_, 0) => LmOutcome::Success,
            (0, _) => LmOutcome::Failed,
            _ => LmOutcome::Partial,
        };
        self.build(outcome, Some(succeeded), Some(failed), None)
    }

    /// Finish with a provider failure.
    pub fn failed(self, error: impl Into<String>) -> LmLogEntry {
        let rows = self.rows.len();
        self.build(LmOutcome::Failed, None, Some(rows), Some(error.into()))
    }

    fn build(
        self,
        outcome: LmOutcome,
        succeeded: Option<usize>,
        failed: Option<usize>,
        error: Option<String>,
    ) -> LmLogEntry {
        LmLogEntry {
            schema_version: LM_LOG_SCHEMA_VERSION,
            ts: now_epoch_ms(),
            chunk: self.chunk,
            mode: self.mode,
            attempt: self.attempt,
            duration_ms: self.start.elapsed().as_millis() as u64,
            rows: self.rows,
            outcome,
            succeeded,
            failed,
            error,
            prompt_preview: self.prompt_preview,
            response_preview: self.response_preview,
        }
    }
}

/// Append-only log shared by every dispatch worker of a job.
#[derive(Debug)]
pub struct LmLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl LmLog {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("create lm_log directory")?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open lm_log for append: {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, entry: &LmLogEntry) -> Result<()> {
        let line = serde_json::to_string(entry).context("serialize lm_log entry")?;
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(file, "{line}").context("write lm_log entry")?;
        Ok(())
    }

    /// Append, downgrading failures to a warning; logging never fails a job.
    pub fn record(&self, entry: &LmLogEntry) {
        if let Err(err) = self.append(entry) {
            tracing::warn!(path = %self.path.display(), error = %err, "lm_log append failed");
        }
    }
}

/// Load all entries, skipping corrupt lines.
pub fn load_lm_log(path: &Path) -> Result<Vec<LmLogEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(path).with_context(|| format!("open lm_log: {}", path.display()))?;
    let reader = BufReader::new(file);
    let mut entries = Vec::new();
    for (line_num, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("read line {} of lm_log", line_num + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<LmLogEntry>(&line) {
            Ok(entry) => entries.push(entry),
            Err(err) => {
                tracing::warn!(line = line_num + 1, error = %err, "skip corrupt lm_log entry");
            }
        }
    }
    Ok(entries)
}
