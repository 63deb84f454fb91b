use std::sync::Arc;
use std::sync::atomic::AtomicU64;

/// Minimal counters for operational visibility. Cloning shares the same
/// atomics (all fields are `Arc`), so one `Counters` can be handed to the
/// scheduler, queue, and learning layer alike.
#[derive(Clone, Default)]
pub struct Counters {
    pub ticks_run: Arc<AtomicU64>,
    pub ticks_skipped: Arc<AtomicU64>,
    pub urls_dispatched: Arc<AtomicU64>,
    pub dispatch_rollbacks: Arc<AtomicU64>,

    pub attempts_ok: Arc<AtomicU64>,
    pub attempts_partial: Arc<AtomicU64>,
    pub attempts_failed: Arc<AtomicU64>,
    pub attempts_blocked: Arc<AtomicU64>,
    pub attempts_captcha: Arc<AtomicU64>,
    pub attempts_network_error: Arc<AtomicU64>,

    pub queue_full_rejections: Arc<AtomicU64>,
    pub requeues: Arc<AtomicU64>,
    pub retries_exhausted: Arc<AtomicU64>,

    pub strategies_retired: Arc<AtomicU64>,
    pub strategies_spawned: Arc<AtomicU64>,
    pub strategies_forked: Arc<AtomicU64>,
}
