pub mod domain_slot;
pub mod token_bucket;
pub mod types;

use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::config::RuntimeConfig;
use crate::error::CoreError;
use crate::models::DomainState;
use crate::queue::domain_slot::DomainSlot;
use crate::queue::types::{ComplexityClass, QueueItem, QueueStats};
use crate::time::now_ms;

/// Number of heap entries inspected per sub-queue before giving up on a
/// dispatch attempt, mirroring `backend::session::cache::SessionCache`'s
/// bounded eviction scan rather than walking an unbounded backlog.
const SCAN_WINDOW: usize = 32;

struct Backlog {
    cheap: BinaryHeap<QueueItem>,
    normal: BinaryHeap<QueueItem>,
    expensive: BinaryHeap<QueueItem>,
    pending_urls: HashSet<Uuid>,
}

/// Bounded multi-priority work queue (spec §4.2). Gates global and
/// per-domain parallelism, enforces per-domain token buckets and
/// cooldowns, and hands ready items to a fixed worker pool via
/// `dequeue`.
///
/// Deviates from the teacher's per-pair-channel router
/// (`PairExecutorRouter`): channels can't express "block until a domain
/// both has tokens and isn't in cooldown", so workers instead pull via a
/// `Notify`-driven blocking `dequeue`, scoped-acquisition guaranteed by
/// `Dispatched`'s `Drop` impl releasing both semaphore permits and the
/// in-flight marker.
pub struct ConcurrencyQueue {
    config: Arc<RuntimeConfig>,
    general: Arc<Semaphore>,
    expensive: Arc<Semaphore>,
    domains: Mutex<HashMap<String, DomainSlot>>,
    backlog: Mutex<Backlog>,
    in_flight: Mutex<HashMap<Uuid, String>>,
    pending: AtomicUsize,
    requeued_total: AtomicU64,
    paused: AtomicBool,
    notify: Notify,
}

/// A work item that has cleared all concurrency gates and is ready to
/// run. Releases its permits and its in-flight marker when dropped.
pub struct Dispatched {
    item: QueueItem,
    queue: Arc<ConcurrencyQueue>,
    _domain_permit: OwnedSemaphorePermit,
    _class_permit: OwnedSemaphorePermit,
}

impl Dispatched {
    pub fn item(&self) -> &QueueItem {
        &self.item
    }

    /// Consumes the dispatch, releasing its permits, and returns the item
    /// for a possible `requeue`.
    pub fn into_item(self) -> QueueItem {
        self.item.clone()
    }
}

impl Drop for Dispatched {
    fn drop(&mut self) {
        self.queue.in_flight.lock().remove(&self.item.url_id);
        self.queue.notify.notify_waiters();
    }
}

impl ConcurrencyQueue {
    pub fn new(config: Arc<RuntimeConfig>) -> Self {
        let general_permits = config.max_concurrency.saturating_sub(1).max(1);
        Self {
            general: Arc::new(Semaphore::new(general_permits)),
            expensive: Arc::new(Semaphore::new(1)),
            domains: Mutex::new(HashMap::new()),
            backlog: Mutex::new(Backlog {
                cheap: BinaryHeap::new(),
                normal: BinaryHeap::new(),
                expensive: BinaryHeap::new(),
                pending_urls: HashSet::new(),
            }),
            in_flight: Mutex::new(HashMap::new()),
            pending: AtomicUsize::new(0),
            requeued_total: AtomicU64::new(0),
            paused: AtomicBool::new(false),
            notify: Notify::new(),
            config,
        }
    }

    /// Seeds in-memory domain state (cooldown, token bucket) from the
    /// Strategy Store on startup, per §3's restart-safety clause.
    pub fn load_domain_states(&self, states: Vec<DomainState>) {
        let mut domains = self.domains.lock();
        for state in states {
            let domain = state.domain.clone();
            domains.insert(
                domain,
                DomainSlot {
                    semaphore: Arc::new(Semaphore::new(self.config.max_per_domain)),
                    state,
                },
            );
        }
    }

    pub fn domain_state_snapshot(&self, domain: &str) -> Option<DomainState> {
        self.domains.lock().get(domain).map(|s| s.state.clone())
    }

    pub fn all_domain_states(&self) -> Vec<DomainState> {
        self.domains.lock().values().map(|s| s.state.clone()).collect()
    }

    pub fn report_block(&self, domain: &str, now_ms: u64) {
        let mut domains = self.domains.lock();
        let slot = domains
            .entry(domain.to_string())
            .or_insert_with(|| DomainSlot::new(domain.to_string(), now_ms, self.config.max_per_domain, self.config.burst));
        crate::cooldown::apply_block(&mut slot.state, now_ms, &self.config);
    }

    pub fn report_success(&self, domain: &str) {
        if let Some(slot) = self.domains.lock().get_mut(domain) {
            crate::cooldown::apply_success(&mut slot.state);
        }
    }

    /// Accepts an item, or returns `Ok(false)` if a prior attempt for the
    /// same `url_id` is already pending or in flight (invariant: no
    /// concurrent duplication).
    #[instrument(skip(self, item), target = "queue", fields(url_id = %item.url_id, domain = %item.domain))]
    pub fn enqueue(&self, item: QueueItem) -> Result<bool, CoreError> {
        let mut backlog = self.backlog.lock();
        if self.in_flight.lock().contains_key(&item.url_id) || backlog.pending_urls.contains(&item.url_id) {
            debug!("skipping enqueue: already pending or in-flight");
            return Ok(false);
        }
        if self.pending.load(Ordering::SeqCst) >= self.config.max_pending {
            return Err(CoreError::QueueFull);
        }

        backlog.pending_urls.insert(item.url_id);
        match item.complexity_class {
            ComplexityClass::Cheap => backlog.cheap.push(item),
            ComplexityClass::Normal => backlog.normal.push(item),
            ComplexityClass::Expensive => backlog.expensive.push(item),
        }
        drop(backlog);

        self.pending.fetch_add(1, Ordering::SeqCst);
        self.notify.notify_waiters();
        Ok(true)
    }

    /// Requeues a failed item with exponential backoff (§4.2). Returns
    /// `false` once `attempt` exceeds `max_retries`, meaning the item is
    /// dropped and left for the Scheduler's next due-check.
    pub fn requeue(&self, mut item: QueueItem, now_ms: u64) -> bool {
        item.attempt += 1;
        if item.attempt > self.config.max_retries {
            info!(url_id = %item.url_id, attempt = item.attempt, "requeue budget exhausted; handing back to scheduler");
            return false;
        }

        let base_ms = self.config.backoff_base.as_millis() as u64;
        let cap_ms = self.config.backoff_cap.as_millis() as u64;
        let exp = base_ms.saturating_mul(1u64 << item.attempt.min(32));
        let backoff_ms = exp.min(cap_ms);
        let jitter = rand::thread_rng().gen_range(0.5..1.5_f64);
        let delay_ms = (backoff_ms as f64 * jitter) as u64;

        item.dispatch_score_ms = now_ms.saturating_add(delay_ms);
        self.requeued_total.fetch_add(1, Ordering::SeqCst);
        let _ = self.enqueue(item);
        true
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn stats(&self) -> QueueStats {
        let in_flight = self.in_flight.lock();
        let mut in_flight_by_domain: HashMap<String, usize> = HashMap::new();
        for domain in in_flight.values() {
            *in_flight_by_domain.entry(domain.clone()).or_insert(0) += 1;
        }
        QueueStats {
            pending: self.pending.load(Ordering::SeqCst),
            in_flight: in_flight.len(),
            in_flight_by_domain,
            requeued_total: self.requeued_total.load(Ordering::SeqCst),
        }
    }

    /// Blocks until an item whose domain has available tokens, an
    /// available per-domain slot, and isn't in cooldown is ready,
    /// honoring `Pause`/`Resume` (spec §4.2: `Dequeue() -> item`).
    pub async fn dequeue(self: &Arc<Self>) -> Dispatched {
        loop {
            if let Some(d) = self.try_dequeue_once() {
                return d;
            }

            let wait_ms = self.next_wake_hint_ms().clamp(50, 2_000);
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(Duration::from_millis(wait_ms)) => {}
            }
        }
    }

    fn try_dequeue_once(self: &Arc<Self>) -> Option<Dispatched> {
        if self.paused.load(Ordering::SeqCst) {
            return None;
        }

        let now = now_ms();
        let mut domains = self.domains.lock();
        let mut backlog = self.backlog.lock();
        let Backlog {
            cheap,
            normal,
            expensive,
            pending_urls,
        } = &mut *backlog;

        let picked = Self::scan_class(cheap, &mut domains, pending_urls, &self.general, &self.config, now)
            .or_else(|| Self::scan_class(normal, &mut domains, pending_urls, &self.general, &self.config, now))
            .or_else(|| Self::scan_class(expensive, &mut domains, pending_urls, &self.expensive, &self.config, now));

        let (item, domain_permit, class_permit) = picked?;

        drop(domains);
        drop(backlog);

        self.in_flight.lock().insert(item.url_id, item.domain.clone());
        self.pending.fetch_sub(1, Ordering::SeqCst);

        Some(Dispatched {
            item,
            queue: self.clone(),
            _domain_permit: domain_permit,
            _class_permit: class_permit,
        })
    }

    /// Scans up to `SCAN_WINDOW` candidates from `heap`, skipping ones
    /// whose domain is in cooldown or out of tokens/slots, and returns
    /// the first that clears every gate. Skipped items are pushed back.
    fn scan_class(
        heap: &mut BinaryHeap<QueueItem>,
        domains: &mut HashMap<String, DomainSlot>,
        pending_urls: &mut HashSet<Uuid>,
        class_semaphore: &Arc<Semaphore>,
        config: &RuntimeConfig,
        now: u64,
    ) -> Option<(QueueItem, OwnedSemaphorePermit, OwnedSemaphorePermit)> {
        let mut held = Vec::new();
        let mut result = None;

        for _ in 0..SCAN_WINDOW {
            let Some(item) = heap.pop() else { break };

            let slot = domains
                .entry(item.domain.clone())
                .or_insert_with(|| DomainSlot::new(item.domain.clone(), now, config.max_per_domain, config.burst));

            if slot.state.is_in_cooldown(now) {
                held.push(item);
                continue;
            }
            if slot.semaphore.available_permits() == 0 || class_semaphore.available_permits() == 0 {
                held.push(item);
                continue;
            }
            if !token_bucket::try_consume(&mut slot.state.token_bucket, now, config.rate_per_second, config.burst) {
                held.push(item);
                continue;
            }

            let Ok(domain_permit) = slot.semaphore.clone().try_acquire_owned() else {
                held.push(item);
                continue;
            };
            let Ok(class_permit) = class_semaphore.clone().try_acquire_owned() else {
                held.push(item);
                continue;
            };

            pending_urls.remove(&item.url_id);
            result = Some((item, domain_permit, class_permit));
            break;
        }

        for item in held {
            heap.push(item);
        }
        result
    }

    fn next_wake_hint_ms(&self) -> u64 {
        let domains = self.domains.lock();
        let now = now_ms();
        domains
            .values()
            .filter_map(|slot| {
                if let Some(until) = slot.state.cooldown_until_ms {
                    if until > now {
                        return Some(until - now);
                    }
                }
                let wait = token_bucket::millis_until_next_token(&slot.state.token_bucket, self.config.rate_per_second);
                if wait > 0 { Some(wait) } else { None }
            })
            .min()
            .unwrap_or(500)
    }
}


#[cfg(test)]
mod proptests {
    use super::tests::mk_item;
    use super::*;
    use proptest::prelude::*;

    proptest! {
        // Invariant 1 (spec §8): a url_id already pending or in-flight is
        // never accepted a second time, for any interleaving of repeats.
        #[test]
        fn duplicate_enqueue_is_always_rejected_while_pending(
            repeats in prop::collection::vec(0usize..5, 1..50),
        ) {
            let mut config = RuntimeConfig::from_env();
            config.max_pending = 10_000;
            let q = ConcurrencyQueue::new(Arc::new(config));

            let mut items = Vec::new();
            for _ in 0..5 {
                items.push(mk_item("a.com", 0).url_id);
            }

            let mut accepted = std::collections::HashSet::new();
            for idx in repeats {
                let url_id = items[idx];
                let item = QueueItem { url_id, ..mk_item("a.com", 0) };
                let was_already_pending = accepted.contains(&url_id);
                let ok = q.enqueue(item).unwrap();

                if was_already_pending {
                    prop_assert!(!ok, "duplicate url_id {url_id} was accepted while still pending");
                } else {
                    prop_assert!(ok);
                    accepted.insert(url_id);
                }
            }
        }
    }
}
