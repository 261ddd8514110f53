use serde::{Deserialize, Serialize};

/// Snapshot of a `WorkerPool`'s load.
///
/// Each field is read separately, so a snapshot taken while work is moving
/// may be slightly inconsistent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolCounts {
    /// Dispatched but waiting for a worker (fixed queue or permit wait).
    pub queued: usize,

    /// Executing on a worker and not yet settled. A forced stop drops its
    /// cancelled jobs from this count even if their threads are still blocked.
    pub running: usize,

    /// Accepted and not yet settled, gated chain links included.
    pub outstanding: usize,

    /// Notification deliveries still in flight.
    pub background: usize,
}

impl PoolCounts {
    pub fn is_idle(&self) -> bool {
        self.outstanding == 0 && self.background == 0
    }
}
