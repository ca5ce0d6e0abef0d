//! Dispatch strategies: how cache misses are grouped into AI calls.
//!
//! Every strategy resolves cache hits first, keeps them at their original
//! position, and hands only misses to the provider. Results are always
//! aligned with the input slice.
use serde::{Deserialize, Serialize};
use std::fmt;

mod batch;
mod chunk;
mod retry;
mod single;
mod turbo;

pub use batch::BatchStrategy;
pub use retry::RetryPolicy;
pub use single::SingleStrategy;
pub use turbo::TurboStrategy;

use crate::cache::ResultCache;
use crate::client::AiClient;
use crate::error::JobError;
use crate::job::Progress;
use crate::lm_log::LmLog;
use crate::record::{Outcome, Record};
use crate::schema::Schema;

pub const DEFAULT_BATCH_SIZE: usize = 15;
pub const DEFAULT_TURBO_CHUNK_SIZE: usize = 80;
pub const DEFAULT_TURBO_CONCURRENCY: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    Single,
    Batch,
    Turbo,
}

impl fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single => write!(f, "single"),
            Self::Batch => write!(f, "batch"),
            Self::Turbo => write!(f, "turbo"),
        }
    }
}

/// Everything a strategy needs besides the records themselves.
///
/// All members are shared references to `Sync` data, so one context serves
/// every turbo worker.
pub struct DispatchContext<'a> {
    pub schema: &'a Schema,
    pub client: &'a dyn AiClient,
    pub cache: Option<&'a ResultCache>,
    pub retry: &'a RetryPolicy,
    pub progress: &'a Progress,
    pub lm_log: Option<&'a LmLog>,
    /// Free text prefixed to every prompt.
    pub context: Option<&'a str>,
}

impl<'a> DispatchContext<'a> {
    pub fn new(
        schema: &'a Schema,
        client: &'a dyn AiClient,
        retry: &'a RetryPolicy,
        progress: &'a Progress,
    ) -> Self {
        Self {
            schema,
            client,
            cache: None,
            retry,
            progress,
            lm_log: None,
            context: None,
        }
    }

    pub fn with_cache(mut self, cache: &'a ResultCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_lm_log(mut self, lm_log: Option<&'a LmLog>) -> Self {
        self.lm_log = lm_log;
        self
    }

    pub fn with_context(mut self, context: Option<&'a str>) -> Self {
        self.context = context;
        self
    }
}

/// One interchangeable execution policy.
pub trait DispatchStrategy: Send + Sync {
    fn mode(&self) -> DispatchMode;

    /// One outcome per record, positionally aligned with `records`.
    ///
    /// Records left undispatched after cancellation get [`Outcome::Cancelled`].
    fn run(&self, records: &[&Record], ctx: &DispatchContext<'_>) -> Vec<Outcome>;
}

/// Strategy selection plus parameters, as stored in config files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum StrategyConfig {
    Single,
    Batch {
        #[serde(default = "default_batch_size")]
        batch_size: usize,
    },
    Turbo {
        #[serde(default = "default_chunk_size")]
        chunk_size: usize,
        #[serde(default = "default_concurrency")]
        concurrency: usize,
    },
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_chunk_size() -> usize {
    DEFAULT_TURBO_CHUNK_SIZE
}

fn default_concurrency() -> usize {
    DEFAULT_TURBO_CONCURRENCY
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self::Batch {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl StrategyConfig {
    pub fn mode(&self) -> DispatchMode {
        match self {
            Self::Single => DispatchMode::Single,
            Self::Batch { .. } => DispatchMode::Batch,
            Self::Turbo { .. } => DispatchMode::Turbo,
        }
    }

    /// Defaults for a mode, e.g. from a `--mode` flag.
    pub fn for_mode(mode: DispatchMode) -> Self {
        match mode {
            DispatchMode::Single => Self::Single,
            DispatchMode::Batch => Self::default(),
            DispatchMode::Turbo => Self::Turbo {
                chunk_size: DEFAULT_TURBO_CHUNK_SIZE,
                concurrency: DEFAULT_TURBO_CONCURRENCY,
            },
        }
    }

    pub fn validate(&self) -> Result<(), JobError> {
        match self {
            Self::Single => Ok(()),
            Self::Batch { batch_size: 0 } => {
                Err(JobError::Strategy("batch_size must be at least 1".to_string()))
            }
            Self::Turbo { chunk_size: 0, .. } => {
                Err(JobError::Strategy("chunk_size must be at least 1".to_string()))
            }
            Self::Turbo { concurrency: 0, .. } => {
                Err(JobError::Strategy("concurrency must be at least 1".to_string()))
            }
            _ => Ok(()),
        }
    }

    pub fn build(&self) -> Result<Box<dyn DispatchStrategy>, JobError> {
        self.validate()?;
        Ok(match *self {
            Self::Single => Box::new(SingleStrategy),
            Self::Batch { batch_size } => Box::new(BatchStrategy::new(batch_size)),
            Self::Turbo {
                chunk_size,
                concurrency,
            } => Box::new(TurboStrategy::new(chunk_size, concurrency)),
        })
    }
}

/// A record still needing an AI call, with its position in the strategy's
/// input slice.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Pending<'r> {
    pub position: usize,
    pub record: &'r Record,
}

/// Fill cache hits into their slots and return the misses in input order.
pub(crate) fn resolve_cached<'r>(
    records: &[&'r Record],
    ctx: &DispatchContext<'_>,
) -> (Vec<Option<Outcome>>, Vec<Pending<'r>>) {
    let mut slots: Vec<Option<Outcome>> = (0..records.len()).map(|_| None).collect();
    let mut misses = Vec::new();
    for (position, record) in records.iter().enumerate() {
        let hit = ctx
            .cache
            .and_then(|cache| cache.lookup(ctx.schema, &record.inputs(ctx.schema)));
        match hit {
            Some(fields) => slots[position] = Some(Outcome::Success { fields }),
            None => misses.push(Pending { position, record }),
        }
    }
    let hits = records.len() - misses.len();
    if hits > 0 {
        ctx.progress.advance(hits);
        tracing::debug!(hits, misses = misses.len(), "resolved cached records");
    }
    (slots, misses)
}

/// Place a finished chunk's outcomes at their members' positions.
pub(crate) fn place(slots: &mut [Option<Outcome>], members: &[Pending<'_>], outcomes: Vec<Outcome>) {
    for (member, outcome) in members.iter().zip(outcomes) {
        slots[member.position] = Some(outcome);
    }
}

/// Close the slot array; any record never dispatched was cancelled.
pub(crate) fn finish(slots: Vec<Option<Outcome>>) -> Vec<Outcome> {
    slots
        .into_iter()
        .map(|slot| slot.unwrap_or(Outcome::Cancelled))
        .collect()
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
