use std::sync::Arc;
use std::sync::atomic::Ordering;

use tracing::warn;
use uuid::Uuid;

use crate::config::RuntimeConfig;
use crate::engine::{ExtractionEngine, FingerprintProfile, PageSessionPool, ProxyPool};
use crate::learning::LearningLayer;
use crate::metrics::Counters;
use crate::models::{AttemptOutcome, MonitoredUrl};
use crate::queue::ConcurrencyQueue;
use crate::scheduler::Scheduler;
use crate::store::{StrategyStore, UrlFilter};

/// Bundles every long-lived handle the process needs, threaded through
/// explicitly rather than reached for via globals (spec §9 Design Note:
/// "no ambient globals, explicit `Runtime` value").
pub struct Runtime {
    pub config: Arc<RuntimeConfig>,
    pub store: Arc<dyn StrategyStore>,
    pub queue: Arc<ConcurrencyQueue>,
    pub scheduler: Arc<Scheduler>,
    pub engine: Arc<ExtractionEngine>,
    pub learning: Arc<LearningLayer>,
    pub counters: Counters,
    pub fingerprints: Vec<FingerprintProfile>,
}

impl Runtime {
    pub fn new(
        config: Arc<RuntimeConfig>,
        store: Arc<dyn StrategyStore>,
        sessions: Arc<dyn PageSessionPool>,
        proxies: Arc<dyn ProxyPool>,
    ) -> Self {
        let counters = Counters::default();
        let queue = Arc::new(ConcurrencyQueue::new(config.clone()));
        let scheduler = Arc::new(Scheduler::new(store.clone(), queue.clone(), config.clone(), counters.clone()));
        let engine = Arc::new(ExtractionEngine::new(sessions, proxies, config.clone()));
        let learning = Arc::new(LearningLayer::new(store.clone(), config.clone()));

        Self {
            config,
            store,
            queue,
            scheduler,
            engine,
            learning,
            counters,
            fingerprints: vec![FingerprintProfile::generic_desktop()],
        }
    }

    /// One worker lane (spec §5: "parallel workers, default 10"): pulls
    /// ready work off the Queue, runs one engine attempt, and feeds the
    /// outcome to the Scheduler and Learning Layer. Intended to be spawned
    /// `max_concurrency` times by the caller.
    pub async fn run_worker(self: Arc<Self>) {
        loop {
            let dispatched = self.queue.dequeue().await;
            let item = dispatched.item().clone();

            let Some(url) = self.fetch_url(&item.domain, item.url_id).await else {
                warn!(url_id = %item.url_id, "dispatched url vanished from the store; dropping");
                continue;
            };

            let strategies = match self.store.list_strategies(&item.domain).await {
                Ok(s) => s,
                Err(err) => {
                    warn!(domain = %item.domain, error = %err, "failed to load strategies for dispatch");
                    Vec::new()
                }
            };

            let result = self.engine.run_attempt(&url, &strategies, &self.fingerprints).await;

            if let Some(record) = &result.record {
                if let Err(err) = self.store.insert_price_record(record).await {
                    warn!(url_id = %url.id, error = %err, "failed to persist price record");
                }
            }

            self.scheduler.on_outcome(&item.domain, &result).await;

            if let Err(err) = self.learning.apply_outcome(&item.domain, &result).await {
                warn!(domain = %item.domain, error = %err, "failed to apply learning outcome");
            }

            let transient = matches!(result.outcome, AttemptOutcome::NetworkError | AttemptOutcome::Blocked | AttemptOutcome::Captcha);
            if transient {
                let now = crate::time::now_ms();
                let mut retry_item = dispatched.into_item();
                retry_item.attempt += 1;
                if !self.queue.requeue(retry_item, now) {
                    self.counters.retries_exhausted.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    async fn fetch_url(&self, domain: &str, url_id: Uuid) -> Option<MonitoredUrl> {
        let urls = self
            .store
            .list_urls(&UrlFilter { domain: Some(domain.to_string()), active_only: false, due_before_ms: None })
            .await
            .ok()?;
        urls.into_iter().find(|u| u.id == url_id)
    }
}
