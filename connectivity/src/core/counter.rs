//! Monotonic id source handed to components that need unique suffixes.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// A shared, monotonically increasing counter.
///
/// Cloning shares the underlying sequence. Components that need unique
/// request ids or generated names take one of these in their constructor so
/// tests can start from a known value.
#[derive(Debug, Clone, Default)]
pub struct Counter {
    next: Arc<AtomicU64>,
}

impl Counter {
    /// A counter whose first [`next`](Self::next) returns `start`.
    pub fn starting_at(start: u64) -> Self {
        Self {
            next: Arc::new(AtomicU64::new(start)),
        }
    }

    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_sequence() {
        let a = Counter::starting_at(1);
        let b = a.clone();
        assert_eq!(a.next(), 1);
        assert_eq!(b.next(), 2);
        assert_eq!(a.next(), 3);
    }
}
