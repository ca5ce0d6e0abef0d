use super::chunk::run_chunk;
use super::{finish, place, resolve_cached, DispatchContext, DispatchMode, DispatchStrategy};
use crate::record::{Outcome, Record};

/// One prompt and one call per record, strictly sequential.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleStrategy;

impl DispatchStrategy for SingleStrategy {
    fn mode(&self) -> DispatchMode {
        DispatchMode::Single
    }

    fn run(&self, records: &[&Record], ctx: &DispatchContext<'_>) -> Vec<Outcome> {
        let (mut slots, misses) = resolve_cached(records, ctx);
        for (chunk, member) in misses.chunks(1).enumerate() {
            if ctx.progress.is_cancelled() {
                tracing::info!(dispatched = chunk, remaining = misses.len() - chunk, "job cancelled");
                break;
            }
            let outcomes = run_chunk(ctx, chunk, DispatchMode::Single, member);
            place(&mut slots, member, outcomes);
        }
        finish(slots)
    }
}
