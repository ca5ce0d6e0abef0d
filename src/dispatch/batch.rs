use super::chunk::run_chunk;
use super::{finish, place, resolve_cached, DispatchContext, DispatchMode, DispatchStrategy};
use crate::record::{Outcome, Record};

/// Fixed-size chunks, one call each, processed in order.
#[derive(Debug, Clone, Copy)]
pub struct BatchStrategy {
    batch_size: usize,
}

impl BatchStrategy {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

impl DispatchStrategy for BatchStrategy {
    fn mode(&self) -> DispatchMode {
        DispatchMode::Batch
    }

    fn run(&self, records: &[&Record], ctx: &DispatchContext<'_>) -> Vec<Outcome> {
        let (mut slots, misses) = resolve_cached(records, ctx);
        let chunks: Vec<_> = misses.chunks(self.batch_size).collect();
        tracing::debug!(rows = misses.len(), chunks = chunks.len(), batch_size = self.batch_size, "batch dispatch");
        for (chunk, members) in chunks.iter().enumerate() {
            if ctx.progress.is_cancelled() {
                tracing::info!(dispatched = chunk, remaining = chunks.len() - chunk, "job cancelled");
                break;
            }
            let outcomes = run_chunk(ctx, chunk, DispatchMode::Batch, members);
            place(&mut slots, members, outcomes);
        }
        finish(slots)
    }
}
