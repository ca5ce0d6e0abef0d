//! Concurrent batch dispatch.
//!
//! A bounded pool of scoped worker threads pulls chunk numbers from a shared
//! counter and sends `(chunk, outcomes)` back over a channel. The collector
//! writes each chunk into the position-indexed slot array, so completion order
//! never affects result order.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;

use super::chunk::run_chunk;
use super::{finish, place, resolve_cached, DispatchContext, DispatchMode, DispatchStrategy};
use crate::record::{Outcome, Record};

#[derive(Debug, Clone, Copy)]
pub struct TurboStrategy {
    chunk_size: usize,
    concurrency: usize,
}

impl TurboStrategy {
    pub fn new(chunk_size: usize, concurrency: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            concurrency: concurrency.max(1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }
}

impl DispatchStrategy for TurboStrategy {
    fn mode(&self) -> DispatchMode {
        DispatchMode::Turbo
    }

    fn run(&self, records: &[&Record], ctx: &DispatchContext<'_>) -> Vec<Outcome> {
        let (mut slots, misses) = resolve_cached(records, ctx);
        let chunks: Vec<_> = misses.chunks(self.chunk_size).collect();
        if chunks.is_empty() {
            return finish(slots);
        }
        let workers = self.concurrency.min(chunks.len());
        tracing::debug!(
            rows = misses.len(),
            chunks = chunks.len(),
            workers,
            chunk_size = self.chunk_size,
            "turbo dispatch"
        );

        let next = AtomicUsize::new(0);
        let (sender, receiver) = mpsc::channel::<(usize, Vec<Outcome>)>();
        thread::scope(|scope| {
            for worker in 0..workers {
                let sender = sender.clone();
                let chunks = &chunks;
                let next = &next;
                scope.spawn(move || loop {
                    if ctx.progress.is_cancelled() {
                        tracing::debug!(worker, "turbo worker stopping after cancel");
                        break;
                    }
                    let chunk = next.fetch_add(1, Ordering::AcqRel);
                    let Some(members) = chunks.get(chunk) else {
                        break;
                    };
                    let outcomes = run_chunk(ctx, chunk, DispatchMode::Turbo, members);
                    if sender.send((chunk, outcomes)).is_err() {
                        break;
                    }
                });
            }
            drop(sender);
            for (chunk, outcomes) in receiver {
                place(&mut slots, chunks[chunk], outcomes);
            }
        });
        finish(slots)
    }
}
