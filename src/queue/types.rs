use std::cmp::Ordering;

use uuid::Uuid;

/// Coarse cost bucket for an extraction attempt (spec §4.2).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComplexityClass {
    Cheap,
    Normal,
    Expensive,
}

/// One unit of scheduled work (spec §4.2: `Enqueue(item)`).
#[derive(Clone, Debug)]
pub struct QueueItem {
    pub url_id: Uuid,
    pub domain: String,
    /// Dispatch score: earlier due time sorts first (ascending).
    pub dispatch_score_ms: u64,
    pub priority: u8,
    pub deadline_ms: u64,
    pub complexity_class: ComplexityClass,
    pub attempt: u32,
}

impl QueueItem {
    /// `(dispatch_score, priority, url_id)` ascending, per spec §4.1's
    /// explicit tie-break rule.
    fn sort_key(&self) -> (u64, u8, Uuid) {
        (self.dispatch_score_ms, self.priority, self.url_id)
    }
}

impl PartialEq for QueueItem {
    fn eq(&self, other: &Self) -> bool {
        self.sort_key() == other.sort_key()
    }
}
impl Eq for QueueItem {}

impl PartialOrd for QueueItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Reversed so a `BinaryHeap` (a max-heap) pops the earliest-due item first.
impl Ord for QueueItem {
    fn cmp(&self, other: &Self) -> Ordering {
        other.sort_key().cmp(&self.sort_key())
    }
}

/// Queue depth/backlog snapshot (spec §4.2: `Stats()`).
#[derive(Clone, Debug, Default)]
pub struct QueueStats {
    pub pending: usize,
    pub in_flight: usize,
    pub in_flight_by_domain: std::collections::HashMap<String, usize>,
    pub requeued_total: u64,
}
