use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::models::domain_state::DomainState;

/// Per-domain runtime state held by the Queue: a lazily-created semaphore
/// bounding `max_per_domain` concurrent extractions, plus the
/// store-reconstructable `DomainState` (token bucket, cooldown, streak).
///
/// Grounded on `backend::execution::executor::PairExecutorRouter`'s
/// `pair_txs: Mutex<HashMap<String, Sender<...>>>` — one isolated lane per
/// key, created on first use.
pub struct DomainSlot {
    pub semaphore: Arc<Semaphore>,
    pub state: DomainState,
}

impl DomainSlot {
    pub fn new(domain: String, now_ms: u64, max_per_domain: usize, burst: u32) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_per_domain)),
            state: DomainState::new(domain, now_ms, burst),
        }
    }
}
