//! Typed errors for the enrichment engine.
//!
//! Per-record failures never surface here; they are recorded as
//! [`Outcome`](crate::record::Outcome) values. These types cover the
//! operations that can fail as a whole: schema registration, provider calls,
//! and starting a job.
use thiserror::Error;

/// A schema or template that cannot be used.
///
/// Fatal to the schema operation that raised it; never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaValidationError {
    #[error("schema id must be non-empty")]
    EmptyId,
    #[error("schema `{schema}` declares no {kind} columns")]
    NoColumns { schema: String, kind: &'static str },
    #[error("schema `{schema}` has a column with an empty name")]
    EmptyColumnName { schema: String },
    #[error("schema `{schema}` declares column `{column}` more than once")]
    DuplicateColumn { schema: String, column: String },
    #[error("schema `{schema}` uses `{column}` as both input and output column")]
    OverlappingColumn { schema: String, column: String },
    #[error("{template} template of schema `{schema}` references undeclared placeholder `{{{placeholder}}}`")]
    UnknownPlaceholder {
        schema: String,
        template: &'static str,
        placeholder: String,
    },
    #[error("batch template of schema `{schema}` must contain `{{batch_data}}`")]
    MissingBatchData { schema: String },
}

/// Failures raised by the schema registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("schema `{0}` not found")]
    NotFound(String),
    #[error("no active schema selected")]
    NoneSelected,
    #[error(transparent)]
    Invalid(#[from] SchemaValidationError),
}

/// A failed AI client call (transport, auth, rate limit, server, timeout).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ProviderError {
    pub message: String,
    /// HTTP status when the provider answered with one.
    pub status: Option<u16>,
    /// Whether resending the same prompt may succeed.
    pub retryable: bool,
    /// Raw provider body, when one was received.
    pub raw_response: Option<String>,
}

impl ProviderError {
    /// A transient failure worth retrying.
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            retryable: true,
            raw_response: None,
        }
    }

    /// A failure that will not improve on retry (bad credentials, bad request).
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            retryable: false,
            raw_response: None,
        }
    }

    /// Classify an HTTP error status.
    pub fn from_status(status: u16, body: String) -> Self {
        let retryable = status == 408 || status == 429 || status >= 500;
        Self {
            message: format!("provider returned HTTP {status}"),
            status: Some(status),
            retryable,
            raw_response: (!body.is_empty()).then_some(body),
        }
    }

    pub fn with_raw_response(mut self, raw: impl Into<String>) -> Self {
        self.raw_response = Some(raw.into());
        self
    }
}

/// An AI response that could not be mapped to the schema's output columns.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct ParseFailure {
    pub reason: String,
    pub raw_response: String,
}

impl ParseFailure {
    pub fn new(reason: impl Into<String>, raw_response: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            raw_response: raw_response.into(),
        }
    }
}

/// Failures that prevent a job from starting.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Schema(#[from] SchemaValidationError),
    #[error("invalid strategy parameters: {0}")]
    Strategy(String),
    #[error("start job worker: {0}")]
    Spawn(String),
}
