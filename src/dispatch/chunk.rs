//! One chunk end to end: render, call with retries, parse, cache.
use std::thread;

use super::{DispatchContext, DispatchMode, Pending};
use crate::lm_log::LmLogBuilder;
use crate::prompt;
use crate::record::{Outcome, Record};
use crate::response::{parse_batch_keyed, parse_single, ParsedOutput};

/// Run one chunk and return outcomes aligned with `members`.
///
/// Single mode expects exactly one member and uses the single-record template;
/// batch and turbo chunks always use the batch template, even for one record.
pub(crate) fn run_chunk(
    ctx: &DispatchContext<'_>,
    chunk: usize,
    mode: DispatchMode,
    members: &[Pending<'_>],
) -> Vec<Outcome> {
    let records: Vec<&Record> = members.iter().map(|member| member.record).collect();
    let rows: Vec<usize> = records.iter().map(|record| record.row).collect();
    let rendered = match mode {
        DispatchMode::Single => prompt::render_single(ctx.schema, records[0], ctx.context),
        DispatchMode::Batch | DispatchMode::Turbo => {
            prompt::render_batch(ctx.schema, &records, ctx.context)
        }
    };
    let prompt = match rendered {
        Ok(prompt) => prompt,
        Err(err) => {
            tracing::warn!(chunk, error = %err, "prompt render failed");
            let reason = err.to_string();
            let outcomes = (0..members.len())
                .map(|_| Outcome::ValidationError {
                    reason: reason.clone(),
                })
                .collect();
            ctx.progress.advance(members.len());
            return outcomes;
        }
    };

    let outcomes = call_with_retry(ctx, chunk, mode, &prompt, &records, &rows);
    if let Some(cache) = ctx.cache {
        for (record, outcome) in records.iter().zip(&outcomes) {
            cache.insert(ctx.schema, &record.inputs(ctx.schema), outcome);
        }
    }
    ctx.progress.advance(members.len());
    outcomes
}

fn call_with_retry(
    ctx: &DispatchContext<'_>,
    chunk: usize,
    mode: DispatchMode,
    prompt: &str,
    records: &[&Record],
    rows: &[usize],
) -> Vec<Outcome> {
    let max_attempts = ctx.retry.max_attempts();
    let mut attempt = 1;
    loop {
        let log = LmLogBuilder::new(chunk, mode, attempt)
            .with_rows(rows.to_vec())
            .with_prompt_preview(prompt);
        match ctx.client.send(prompt) {
            Ok(raw) => {
                let outcomes = parse(ctx, mode, &raw, records);
                let succeeded = outcomes.iter().filter(|outcome| outcome.is_success()).count();
                let failed = outcomes.len() - succeeded;
                tracing::debug!(chunk, attempt, rows = records.len(), succeeded, failed, "chunk parsed");
                if let Some(lm_log) = ctx.lm_log {
                    lm_log.record(&log.with_response_preview(&raw).parsed(succeeded, failed));
                }
                return outcomes;
            }
            Err(err) => {
                if let Some(lm_log) = ctx.lm_log {
                    lm_log.record(&log.failed(err.to_string()));
                }
                if !err.retryable || attempt >= max_attempts {
                    tracing::warn!(
                        chunk,
                        attempt,
                        retryable = err.retryable,
                        error = %err,
                        "provider call failed; giving up on chunk"
                    );
                    return records
                        .iter()
                        .map(|_| Outcome::ProviderError {
                            reason: err.message.clone(),
                            raw_response: err.raw_response.clone(),
                        })
                        .collect();
                }
                let delay = ctx.retry.delay_before(attempt);
                tracing::warn!(
                    chunk,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "provider call failed; retrying chunk"
                );
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                attempt += 1;
            }
        }
    }
}

fn parse(ctx: &DispatchContext<'_>, mode: DispatchMode, raw: &str, records: &[&Record]) -> Vec<Outcome> {
    match mode {
        DispatchMode::Single => vec![to_outcome(parse_single(raw, ctx.schema))],
        DispatchMode::Batch | DispatchMode::Turbo => parse_batch_keyed(raw, ctx.schema, records)
            .into_iter()
            .map(|(_, parsed)| to_outcome(parsed))
            .collect(),
    }
}

fn to_outcome(parsed: ParsedOutput) -> Outcome {
    match parsed {
        Ok(fields) => Outcome::Success { fields },
        Err(failure) => Outcome::ParseError {
            reason: failure.reason,
            raw_response: failure.raw_response,
        },
    }
}
