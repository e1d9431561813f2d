//! Pending queue entry.

use tokio::time::Instant;

use crate::domain::Task;

/// A submitted task waiting for the worker.
///
/// Entries are ordered by `(release_at, seq)` with the comparison reversed, so
/// `BinaryHeap` pops the earliest release first and breaks ties by submission
/// order. Immediate submissions are released at their submission instant.
pub(super) struct PendingTask {
    pub release_at: Instant,
    pub seq: u64,
    pub task: Task,
}

impl PendingTask {
    fn key(&self) -> (Instant, u64) {
        (self.release_at, self.seq)
    }
}

impl PartialEq for PendingTask {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for PendingTask {}

impl PartialOrd for PendingTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingTask {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse ordering: earlier release (then lower seq) has higher priority
        other.key().cmp(&self.key())
    }
}
