use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Progress counters and the cancellation flag shared between a running job,
/// its dispatch workers and the caller's handle.
#[derive(Debug, Default)]
pub struct Progress {
    total: usize,
    completed: AtomicUsize,
    cancelled: AtomicBool,
}

impl Progress {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            completed: AtomicUsize::new(0),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Mark `count` more records as having a final outcome.
    pub fn advance(&self, count: usize) {
        self.completed.fetch_add(count, Ordering::AcqRel);
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Acquire).min(self.total)
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// `(completed, total)`.
    pub fn snapshot(&self) -> (usize, usize) {
        (self.completed(), self.total)
    }

    /// Stop issuing new chunks; in-flight chunks still finish.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_and_cancels() {
        let progress = Progress::new(3);
        progress.advance(2);
        assert_eq!(progress.snapshot(), (2, 3));
        assert!(!progress.is_cancelled());
        progress.cancel();
        assert!(progress.is_cancelled());
    }
}
