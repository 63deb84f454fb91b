pub mod ledger;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::RuntimeConfig;
use crate::metrics::Counters;
use crate::models::{AttemptResult, MonitoredUrl, Strategy, StrategyKind};
use crate::queue::ConcurrencyQueue;
use crate::queue::types::{ComplexityClass, QueueItem};
use crate::scheduler::ledger::SuccessLedger;
use crate::store::{StrategyStore, UrlFilter};

/// Caps the adaptive-rate stretch applied to a struggling domain's
/// `base_interval` (spec §4.1: "capped at 3x").
const MAX_ADAPTIVE_MULTIPLIER: f64 = 3.0;

/// Linear interpolation of the priority→interval-multiplier curve from
/// spec §4.1: `f(0)=1.5`, `f(9)=0.5`.
fn priority_factor(priority: u8) -> f64 {
    let p = priority.min(9) as f64;
    1.5 + (p / 9.0) * (0.5 - 1.5)
}

/// Decides a domain's `complexity_class` from its strongest strategy kind.
/// Not named explicitly in the data model; resolved here (see DESIGN.md)
/// by the richest matcher kind present in the ranked portfolio, since
/// richer matchers (composite recursion, semantic distance search) cost
/// more wall-clock per attempt than a flat regex or CSS selector.
fn classify_complexity(strategies: &[Strategy]) -> ComplexityClass {
    let mut class = ComplexityClass::Cheap;
    for s in strategies {
        let candidate = match &s.kind {
            StrategyKind::Composite { .. } => ComplexityClass::Expensive,
            StrategyKind::Semantic { .. } | StrategyKind::Xpath { .. } => ComplexityClass::Normal,
            StrategyKind::Css { .. } | StrategyKind::Regex { .. } => ComplexityClass::Cheap,
        };
        class = match (class, candidate) {
            (ComplexityClass::Expensive, _) | (_, ComplexityClass::Expensive) => ComplexityClass::Expensive,
            (ComplexityClass::Normal, _) | (_, ComplexityClass::Normal) => ComplexityClass::Normal,
            _ => ComplexityClass::Cheap,
        };
    }
    class
}

/// Drives the periodic monitoring tick for every active `MonitoredUrl`
/// (spec §4.1). Grounded on `backend::scheduler::Scheduler::on_tick`: a
/// single instrumented async function that lists candidates, applies
/// domain gates, and hands dispatch records to the Queue.
pub struct Scheduler {
    store: Arc<dyn StrategyStore>,
    queue: Arc<ConcurrencyQueue>,
    config: Arc<RuntimeConfig>,
    counters: Counters,
    ledgers: Mutex<HashMap<String, SuccessLedger>>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn StrategyStore>, queue: Arc<ConcurrencyQueue>, config: Arc<RuntimeConfig>, counters: Counters) -> Self {
        Self {
            store,
            queue,
            config,
            counters,
            ledgers: Mutex::new(HashMap::new()),
        }
    }

    /// One scheduling cycle. Never fails fatally: store errors are logged
    /// and the tick is skipped (spec §4.1 Failure semantics).
    #[instrument(skip(self), target = "scheduler")]
    pub async fn on_tick(&self, now_ms: u64) {
        let urls = match self
            .store
            .list_urls(&UrlFilter {
                domain: None,
                active_only: true,
                due_before_ms: None,
            })
            .await
        {
            Ok(urls) => urls,
            Err(err) => {
                warn!(error = %err, "skipping tick: failed to list monitored urls");
                self.counters.ticks_skipped.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                return;
            }
        };

        let mut by_domain: HashMap<String, Vec<MonitoredUrl>> = HashMap::new();
        for url in urls {
            by_domain.entry(url.domain.clone()).or_default().push(url);
        }

        for (domain, urls) in by_domain {
            if let Some(snapshot) = self.queue.domain_state_snapshot(&domain) {
                if snapshot.is_in_cooldown(now_ms) {
                    debug!(%domain, "domain in cooldown; skipping this tick");
                    continue;
                }
            }

            let multiplier = self.adaptive_multiplier(&domain, now_ms);

            let strategies = match self.store.list_strategies(&domain).await {
                Ok(s) => s,
                Err(err) => {
                    warn!(%domain, error = %err, "failed to load strategies; defaulting to cheap complexity");
                    Vec::new()
                }
            };
            let complexity = classify_complexity(&strategies);

            for url in urls {
                self.consider_url(&url, complexity, multiplier, now_ms).await;
            }
        }

        self.counters.ticks_run.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    async fn consider_url(&self, url: &MonitoredUrl, complexity: ComplexityClass, multiplier: f64, now_ms: u64) {
        let base_interval_ms = (url.base_interval_minutes as u64).saturating_mul(60_000);
        let interval_ms = (base_interval_ms as f64 * priority_factor(url.priority) * multiplier) as u64;

        let anchor_ms = url.last_check_ms.unwrap_or(0);
        let mut scheduled_ms = anchor_ms.saturating_add(interval_ms);

        let jitter_span = (interval_ms as f64 * self.config.jitter_fraction) as i64;
        if jitter_span > 0 {
            let offset = rand::thread_rng().gen_range(-jitter_span..=jitter_span);
            scheduled_ms = (scheduled_ms as i64 + offset).max(0) as u64;
        }

        let half_tick = self.config.tick_interval.as_millis() as u64 / 2;
        if now_ms + half_tick < scheduled_ms {
            return; // not due yet
        }

        let dispatch_score_ms = scheduled_ms.saturating_sub(now_ms);
        let prev_last_check = url.last_check_ms;

        // Optimistic CAS: write last_check before enqueue, roll back on rejection.
        match self.store.update_last_check(url.id, prev_last_check, now_ms).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(url_id = %url.id, "last_check CAS lost the race; another tick already claimed this url");
                return;
            }
            Err(err) => {
                warn!(url_id = %url.id, error = %err, "failed to write last_check; skipping dispatch");
                return;
            }
        }

        let item = QueueItem {
            url_id: url.id,
            domain: url.domain.clone(),
            dispatch_score_ms,
            priority: url.priority,
            deadline_ms: now_ms.saturating_add(self.config.attempt_deadline.as_millis() as u64),
            complexity_class: complexity,
            attempt: 0,
        };

        match self.queue.enqueue(item) {
            Ok(true) => {
                self.counters.urls_dispatched.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
            Ok(false) => {
                // Already pending/in-flight; the CAS write stands, next tick will re-derive it.
            }
            Err(err) => {
                warn!(url_id = %url.id, error = %err, "enqueue rejected; rolling back last_check");
                self.counters.dispatch_rollbacks.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                if let Err(rollback_err) = self.store.update_last_check(url.id, Some(now_ms), prev_last_check.unwrap_or(0)).await {
                    warn!(url_id = %url.id, error = %rollback_err, "rollback of last_check also failed");
                }
            }
        }
    }

    /// Updates the domain's rolling success ledger and propagates
    /// block/success signal to the Queue's cooldown state (spec §4.1:
    /// `OnOutcome`).
    #[instrument(skip(self, result), target = "scheduler", fields(url_id = %result.url_id))]
    pub async fn on_outcome(&self, domain: &str, result: &AttemptResult) {
        let is_ok = result.outcome == crate::models::AttemptOutcome::Ok;
        self.ledgers
            .lock()
            .entry(domain.to_string())
            .or_insert_with(SuccessLedger::new)
            .record(result.finished_at_ms, is_ok);

        if result.is_block() {
            self.queue.report_block(domain, result.finished_at_ms);
        } else if is_ok {
            self.queue.report_success(domain);
        }

        if let Err(err) = self.store.insert_attempt_log(result).await {
            warn!(domain, error = %err, "failed to persist attempt log");
        }

        match result.outcome {
            crate::models::AttemptOutcome::Ok => {
                self.counters.attempts_ok.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
            crate::models::AttemptOutcome::Partial => {
                self.counters.attempts_partial.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
            crate::models::AttemptOutcome::Captcha => {
                self.counters.attempts_captcha.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
            crate::models::AttemptOutcome::Blocked => {
                self.counters.attempts_blocked.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
            crate::models::AttemptOutcome::NetworkError => {
                self.counters.attempts_network_error.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
            crate::models::AttemptOutcome::ExtractionFailed => {
                self.counters.attempts_failed.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
        }
    }

    /// `1 + (success_floor - rate)` capped at `MAX_ADAPTIVE_MULTIPLIER`,
    /// per spec §4.1's adaptive-rate clause. `1.0` (no stretch) when the
    /// domain is healthy or has no recorded attempts yet.
    fn adaptive_multiplier(&self, domain: &str, now_ms: u64) -> f64 {
        let rate = self
            .ledgers
            .lock()
            .get(domain)
            .map(|l| l.success_rate(now_ms))
            .unwrap_or(1.0);

        if rate >= self.config.success_floor {
            1.0
        } else {
            (1.0 + (self.config.success_floor - rate)).min(MAX_ADAPTIVE_MULTIPLIER)
        }
    }

    /// Runs `on_tick` on `config.tick_interval` cadence until cancelled.
    pub async fn run_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.tick_interval);
        loop {
            interval.tick().await;
            let now_ms = crate::time::now_ms();
            crate::logger::warn_if_slow("scheduler_tick", Duration::from_millis(500), self.on_tick(now_ms)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_factor_matches_endpoints() {
        assert!((priority_factor(0) - 1.5).abs() < 1e-9);
        assert!((priority_factor(9) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn priority_factor_is_monotonically_decreasing() {
        assert!(priority_factor(0) > priority_factor(4));
        assert!(priority_factor(4) > priority_factor(9));
    }

    #[test]
    fn classify_complexity_escalates_to_richest_kind() {
        use crate::models::strategy::{TargetField, TextMode};

        let cheap = Strategy {
            id: Uuid::new_v4(),
            domain: "a.com".into(),
            target_field: TargetField::Price,
            kind: StrategyKind::Css {
                selector: ".price".into(),
                attribute: None,
                text_mode: TextMode::InnerText,
                context_terms: vec![],
            },
            confidence: 0.9,
            priority: 0,
            attempts: 10,
            successes: 9,
            last_success_ms: None,
            sample_urls: vec![],
            parent_id: None,
        };
        let mut expensive = cheap.clone();
        expensive.kind = StrategyKind::Composite {
            steps: vec![],
            transformation: None,
            validation: None,
        };

        assert_eq!(classify_complexity(&[cheap.clone()]), ComplexityClass::Cheap);
        assert_eq!(classify_complexity(&[cheap, expensive]), ComplexityClass::Expensive);
    }
}
