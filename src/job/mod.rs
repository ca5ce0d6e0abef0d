//! Job runner: one end-to-end enrichment job over an ordered record set.
//!
//! A job snapshots its schema at start, routes records that fail the
//! required-input rule straight to `ValidationError`, hands the rest to the
//! chosen dispatch strategy on a worker thread, and reassembles one outcome
//! per input record.
use serde::Serialize;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

mod progress;

pub use progress::Progress;

use crate::cache::ResultCache;
use crate::client::AiClient;
use crate::dispatch::{DispatchContext, DispatchMode, RetryPolicy, StrategyConfig};
use crate::error::JobError;
use crate::lm_log::LmLog;
use crate::record::{Outcome, OutcomeSummary, Record};
use crate::schema::{Schema, SchemaRegistry};

/// Per-job knobs that are not part of the strategy.
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    pub retry: RetryPolicy,
    /// Free text prefixed to every prompt.
    pub context: Option<String>,
    /// Rows whose output columns are all filled keep their values without
    /// a cache lookup or AI call.
    pub skip_filled: bool,
}

/// Final state of a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobReport {
    pub schema: String,
    pub mode: DispatchMode,
    /// One outcome per input record, in input order.
    pub outcomes: Vec<Outcome>,
    pub summary: OutcomeSummary,
    pub cancelled: bool,
    pub elapsed_ms: u64,
}

/// Owns the schema registry and the shared collaborators jobs run against.
pub struct JobRunner {
    registry: SchemaRegistry,
    client: Arc<dyn AiClient>,
    cache: Arc<ResultCache>,
    lm_log: Option<Arc<LmLog>>,
    options: JobOptions,
}

impl JobRunner {
    pub fn new(registry: SchemaRegistry, client: Arc<dyn AiClient>) -> Self {
        Self {
            registry,
            client,
            cache: Arc::new(ResultCache::default()),
            lm_log: None,
            options: JobOptions::default(),
        }
    }

    pub fn with_cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_lm_log(mut self, lm_log: Arc<LmLog>) -> Self {
        self.lm_log = Some(lm_log);
        self
    }

    pub fn with_options(mut self, options: JobOptions) -> Self {
        self.options = options;
        self
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Edits apply to jobs started afterwards, never to running ones.
    pub fn registry_mut(&mut self) -> &mut SchemaRegistry {
        &mut self.registry
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    /// Start a job on a worker thread.
    ///
    /// `schema_name` of `None` uses the active schema. Fails only when the
    /// schema or strategy parameters are unusable; per-record problems become
    /// outcomes.
    pub fn start_job(
        &self,
        schema_name: Option<&str>,
        records: Vec<Record>,
        strategy: &StrategyConfig,
    ) -> Result<JobHandle, JobError> {
        let schema = self.resolve_schema(schema_name)?;
        strategy.validate()?;
        let progress = Arc::new(Progress::new(records.len()));
        let total = records.len();
        let schema_id = schema.id.clone();
        let job = Job {
            schema,
            records,
            strategy: strategy.clone(),
            client: Arc::clone(&self.client),
            cache: Arc::clone(&self.cache),
            lm_log: self.lm_log.clone(),
            options: self.options.clone(),
            progress: Arc::clone(&progress),
        };
        let worker = thread::Builder::new()
            .name("lmenrich-job".to_string())
            .spawn(move || job.execute())
            .map_err(|err| JobError::Spawn(err.to_string()))?;
        Ok(JobHandle {
            progress,
            worker: Some(worker),
            total,
            schema: schema_id,
            mode: strategy.mode(),
        })
    }

    /// Start a job and block until it finishes.
    pub fn run_job(
        &self,
        schema_name: Option<&str>,
        records: Vec<Record>,
        strategy: &StrategyConfig,
    ) -> Result<JobReport, JobError> {
        Ok(self.start_job(schema_name, records, strategy)?.wait())
    }

    fn resolve_schema(&self, schema_name: Option<&str>) -> Result<Schema, JobError> {
        let schema = match schema_name {
            Some(name) => self.registry.get(name)?,
            None => self.registry.active_schema()?,
        };
        // Templates may have been edited since registration.
        schema.validate()?;
        Ok(schema.clone())
    }
}

/// Caller's view of a running job.
pub struct JobHandle {
    progress: Arc<Progress>,
    worker: Option<JoinHandle<JobReport>>,
    total: usize,
    schema: String,
    mode: DispatchMode,
}

impl JobHandle {
    /// `(completed, total)` record counts.
    pub fn progress(&self) -> (usize, usize) {
        self.progress.snapshot()
    }

    /// Stop issuing new chunks. In-flight chunks finish; records never
    /// dispatched end as `Cancelled`.
    pub fn cancel(&self) {
        self.progress.cancel();
    }

    pub fn is_finished(&self) -> bool {
        match &self.worker {
            Some(worker) => worker.is_finished(),
            None => true,
        }
    }

    /// Block until the job reaches its terminal state.
    pub fn wait(mut self) -> JobReport {
        let Some(worker) = self.worker.take() else {
            return self.lost_report("job already collected");
        };
        match worker.join() {
            Ok(report) => report,
            Err(_) => {
                tracing::error!("job worker panicked");
                self.lost_report("job worker panicked")
            }
        }
    }

    /// Every record fails with `reason`; keeps the one-outcome-per-record rule
    /// even when the worker is gone.
    fn lost_report(&self, reason: &str) -> JobReport {
        let outcomes: Vec<Outcome> = (0..self.total)
            .map(|_| Outcome::ProviderError {
                reason: reason.to_string(),
                raw_response: None,
            })
            .collect();
        JobReport {
            schema: self.schema.clone(),
            mode: self.mode,
            summary: OutcomeSummary::from_outcomes(&outcomes),
            outcomes,
            cancelled: self.progress.is_cancelled(),
            elapsed_ms: 0,
        }
    }
}

struct Job {
    schema: Schema,
    records: Vec<Record>,
    strategy: StrategyConfig,
    client: Arc<dyn AiClient>,
    cache: Arc<ResultCache>,
    lm_log: Option<Arc<LmLog>>,
    options: JobOptions,
    progress: Arc<Progress>,
}

impl Job {
    fn execute(self) -> JobReport {
        let start = Instant::now();
        let schema = &self.schema;
        let mode = self.strategy.mode();
        tracing::info!(schema = %schema.id, rows = self.records.len(), %mode, "job started");

        let mut slots: Vec<Option<Outcome>> = (0..self.records.len()).map(|_| None).collect();
        let mut eligible: Vec<usize> = Vec::new();
        for (position, record) in self.records.iter().enumerate() {
            if let Some(reason) = record.missing_required(schema) {
                slots[position] = Some(Outcome::ValidationError { reason });
                self.progress.advance(1);
                continue;
            }
            if self.options.skip_filled {
                if let Some(fields) = record.filled_outputs(schema) {
                    slots[position] = Some(Outcome::Success { fields });
                    self.progress.advance(1);
                    continue;
                }
            }
            eligible.push(position);
        }

        let dispatched = eligible.len();
        if dispatched > 0 {
            match self.strategy.build() {
                Ok(strategy) => {
                    let refs: Vec<&Record> =
                        eligible.iter().map(|position| &self.records[*position]).collect();
                    let ctx = DispatchContext::new(
                        schema,
                        self.client.as_ref(),
                        &self.options.retry,
                        &self.progress,
                    )
                    .with_cache(&self.cache)
                    .with_lm_log(self.lm_log.as_deref())
                    .with_context(self.options.context.as_deref());
                    let outcomes = strategy.run(&refs, &ctx);
                    for (position, outcome) in eligible.iter().zip(outcomes) {
                        slots[*position] = Some(outcome);
                    }
                }
                Err(err) => {
                    // Parameters are validated before the worker starts.
                    tracing::error!(error = %err, "strategy rejected after validation");
                }
            }
        }

        let outcomes: Vec<Outcome> = slots
            .into_iter()
            .map(|slot| slot.unwrap_or(Outcome::Cancelled))
            .collect();
        let summary = OutcomeSummary::from_outcomes(&outcomes);
        let elapsed_ms = start.elapsed().as_millis() as u64;
        let cancelled = self.progress.is_cancelled();
        tracing::info!(
            schema = %schema.id,
            elapsed_ms,
            dispatched,
            success = summary.success,
            failed = summary.failed(),
            cancelled,
            "job finished"
        );
        JobReport {
            schema: schema.id.clone(),
            mode,
            outcomes,
            summary,
            cancelled,
            elapsed_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ProviderError, RegistryError};
    use crate::record::FieldMap;
    use crate::schema::example_schema;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        calls: AtomicUsize,
        reply: String,
    }

    impl AiClient for Fixed {
        fn send(&self, _prompt: &str) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.reply.clone())
        }
    }

    fn runner(reply: &str) -> (JobRunner, Arc<Fixed>) {
        let mut registry = SchemaRegistry::new();
        registry.put("companies", example_schema()).expect("put");
        assert!(registry.set_active("companies"));
        let client = Arc::new(Fixed {
            calls: AtomicUsize::new(0),
            reply: reply.to_string(),
        });
        let runner = JobRunner::new(registry, client.clone()).with_options(JobOptions {
            retry: RetryPolicy::none(),
            ..JobOptions::default()
        });
        (runner, client)
    }

    fn record(row: usize, fields: serde_json::Value) -> Record {
        let fields: FieldMap = fields
            .as_object()
            .map(|map| map.clone().into_iter().collect())
            .unwrap_or_default();
        Record::new(row, fields)
    }

    #[test]
    fn validation_failures_never_reach_the_client() {
        let (runner, client) = runner(r#"{"industry": "Tools"}"#);
        let records = vec![
            record(0, json!({"company_name": "Acme"})),
            record(1, json!({"company_name": ""})),
        ];
        let report = runner
            .run_job(None, records, &StrategyConfig::Single)
            .expect("job");
        assert_eq!(report.outcomes.len(), 2);
        assert!(report.outcomes[0].is_success());
        assert!(matches!(report.outcomes[1], Outcome::ValidationError { .. }));
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        assert_eq!(runner.cache().len(), 1);
        assert_eq!(report.summary.validation_error, 1);
        assert_eq!(report.schema, "companies");
    }

    #[test]
    fn skip_filled_keeps_existing_values() {
        let (runner, client) = runner(r#"{"industry": "Tools"}"#);
        let runner = runner.with_options(JobOptions {
            retry: RetryPolicy::none(),
            skip_filled: true,
            context: None,
        });
        let filled = record(
            0,
            json!({"company_name": "Acme", "industry": "Rockets", "headquarters": "Reno", "founded": 1949}),
        );
        let marked = record(
            1,
            json!({"company_name": "Globex", "industry": "N/A", "headquarters": "Springfield", "founded": 1989}),
        );
        let report = runner
            .run_job(Some("companies"), vec![filled, marked], &StrategyConfig::Single)
            .expect("job");
        assert_eq!(report.outcomes[0].fields().expect("fields")["industry"], json!("Rockets"));
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unknown_schema_and_bad_parameters_fail_to_start() {
        let (runner, _) = runner("{}");
        let err = runner
            .start_job(Some("nope"), Vec::new(), &StrategyConfig::Single)
            .err()
            .expect("unknown schema");
        assert_eq!(err, JobError::Registry(RegistryError::NotFound("nope".to_string())));
        let err = runner
            .start_job(None, Vec::new(), &StrategyConfig::Batch { batch_size: 0 })
            .err()
            .expect("bad batch size");
        assert!(matches!(err, JobError::Strategy(_)));
    }

    #[test]
    fn empty_job_finishes_with_no_outcomes() {
        let (runner, client) = runner("{}");
        let handle = runner
            .start_job(None, Vec::new(), &StrategyConfig::default())
            .expect("start");
        let report = handle.wait();
        assert!(report.outcomes.is_empty());
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    struct Exploding;

    impl AiClient for Exploding {
        fn send(&self, _prompt: &str) -> Result<String, ProviderError> {
            panic!("client bug");
        }
    }

    #[test]
    fn worker_panic_fails_every_record_under_the_resolved_schema() {
        let mut registry = SchemaRegistry::new();
        registry.put("companies", example_schema()).expect("put");
        assert!(registry.set_active("companies"));
        let runner = JobRunner::new(registry, Arc::new(Exploding));
        let records = vec![
            record(0, json!({"company_name": "Acme"})),
            record(1, json!({"company_name": "Globex"})),
        ];
        let report = runner
            .start_job(None, records, &StrategyConfig::Single)
            .expect("start")
            .wait();
        assert_eq!(report.schema, "companies");
        assert_eq!(report.summary.provider_error, 2);
        assert!(report
            .outcomes
            .iter()
            .all(|outcome| matches!(outcome, Outcome::ProviderError { reason, .. } if reason == "job worker panicked")));
    }

    #[test]
    fn handle_reports_progress_to_completion() {
        let (runner, _) = runner(r#"[{"index": 0, "industry": "A"}, {"index": 1, "industry": "B"}]"#);
        let records = vec![
            record(0, json!({"company_name": "Acme"})),
            record(1, json!({"company_name": "Globex"})),
        ];
        let handle = runner
            .start_job(None, records, &StrategyConfig::Batch { batch_size: 2 })
            .expect("start");
        assert_eq!(handle.progress().1, 2);
        let report = handle.wait();
        assert_eq!(report.summary.success, 2);
        assert!(!report.cancelled);
    }
}
