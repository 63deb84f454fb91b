use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::config::RuntimeConfig;
use crate::engine::fingerprint::{self, FingerprintProfile};
use crate::engine::page_session::{InteractionScript, PageSessionGuard, PageSessionPool, ReadyPredicate, ScrollStep};
use crate::engine::proxy::ProxyPool;
use crate::models::strategy::TargetField;
use crate::models::{AttemptOutcome, AttemptResult, BlockSignal, MonitoredUrl, Strategy, StrategyOutcome};
use crate::time::now_ms;

/// Caps per-domain navigation-time history used to derive the adaptive
/// timeout extension (spec §4.3 step 2).
const NAV_HISTORY_CAP: usize = 32;
const NAV_TIMEOUT_CEILING_MS: u64 = 60_000;
const WAIT_READY_FLOOR_MS: u64 = 1_500;

/// Tracks recent per-domain navigation durations to extend
/// `navigation_timeout` adaptively (spec: "adaptive per-domain extension
/// up to 60s based on rolling median").
#[derive(Default)]
struct NavigationHistory {
    by_domain: Mutex<HashMap<String, VecDeque<u64>>>,
}

impl NavigationHistory {
    fn record(&self, domain: &str, elapsed_ms: u64) {
        let mut map = self.by_domain.lock();
        let entry = map.entry(domain.to_string()).or_default();
        entry.push_back(elapsed_ms);
        if entry.len() > NAV_HISTORY_CAP {
            entry.pop_front();
        }
    }

    fn adaptive_timeout(&self, domain: &str, base_ms: u64) -> Duration {
        let map = self.by_domain.lock();
        let Some(samples) = map.get(domain) else {
            return Duration::from_millis(base_ms);
        };
        if samples.is_empty() {
            return Duration::from_millis(base_ms);
        }
        let mut sorted: Vec<u64> = samples.iter().copied().collect();
        sorted.sort_unstable();
        let median = sorted[sorted.len() / 2];
        let extended = median.saturating_mul(12) / 10; // +20% margin over observed median
        Duration::from_millis(base_ms.max(extended).min(NAV_TIMEOUT_CEILING_MS))
    }
}

fn default_interaction_script() -> InteractionScript {
    InteractionScript {
        scrolls: vec![
            ScrollStep { delta_y: 400, pause: Duration::from_millis(250) },
            ScrollStep { delta_y: 800, pause: Duration::from_millis(400) },
        ],
        hover_selectors: vec![".price".to_string(), "[itemprop=price]".to_string()],
        dwell: Duration::from_millis(300),
    }
}

/// Performs one URL attempt end-to-end (spec §4.3). Grounded on
/// `ExecutorWorker::execute_batch`'s "no mutation before commit, stop on
/// first failure" discipline: the state machine is a straight-line async
/// function with early returns to the short-circuit outcomes.
pub struct ExtractionEngine {
    sessions: Arc<dyn PageSessionPool>,
    proxies: Arc<dyn ProxyPool>,
    config: Arc<RuntimeConfig>,
    nav_history: NavigationHistory,
}

impl ExtractionEngine {
    pub fn new(sessions: Arc<dyn PageSessionPool>, proxies: Arc<dyn ProxyPool>, config: Arc<RuntimeConfig>) -> Self {
        Self { sessions, proxies, config, nav_history: NavigationHistory::default() }
    }

    #[instrument(skip(self, strategies, fingerprints), target = "engine", fields(url_id = %url.id, domain = %url.domain))]
    pub async fn run_attempt(&self, url: &MonitoredUrl, strategies: &[Strategy], fingerprints: &[FingerprintProfile]) -> AttemptResult {
        let started_ms = now_ms();
        match tokio::time::timeout(self.config.attempt_deadline, self.run_inner(url, strategies, fingerprints, started_ms)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(url_id = %url.id, "attempt deadline exceeded");
                self.finish(url.id, started_ms, AttemptOutcome::NetworkError, vec![], None, vec![BlockSignal::Timeout])
            }
        }
    }

    async fn run_inner(&self, url: &MonitoredUrl, strategies: &[Strategy], fingerprints: &[FingerprintProfile], started_ms: u64) -> AttemptResult {
        if strategies.is_empty() {
            warn!(domain = %url.domain, "no strategies configured for domain");
            let placeholder = StrategyOutcome {
                strategy_id: Uuid::nil(),
                field: TargetField::Price,
                success: false,
                confidence_before: 0.0,
                elapsed_ms: 0,
            };
            return self.finish(url.id, started_ms, AttemptOutcome::ExtractionFailed, vec![placeholder], None, vec![]);
        }

        // --- AcquiringSession ---
        let proxy = match self.proxies.select(&url.domain).await {
            Ok(p) => p,
            Err(err) => {
                warn!(domain = %url.domain, error = %err, "proxy selection failed");
                return self.finish(url.id, started_ms, AttemptOutcome::NetworkError, vec![], None, vec![]);
            }
        };

        let fingerprint = fingerprint::pick(fingerprints);
        let session = match self.sessions.acquire(fingerprint, proxy.clone()).await {
            Ok(s) => s,
            Err(err) => {
                warn!(domain = %url.domain, error = %err, "session acquisition failed");
                let _ = self.proxies.report(&proxy, AttemptOutcome::NetworkError).await;
                return self.finish(url.id, started_ms, AttemptOutcome::NetworkError, vec![], None, vec![]);
            }
        };
        let mut guard = PageSessionGuard::new(session, self.sessions.clone());

        // --- Navigating ---
        let nav_timeout = self.nav_history.adaptive_timeout(&url.domain, self.config.navigation_timeout.as_millis() as u64);
        let nav_start = now_ms();
        if let Err(err) = guard.session_mut().navigate(&url.url, nav_timeout).await {
            warn!(domain = %url.domain, error = %err, "navigation failed");
            let _ = self.proxies.report(&proxy, AttemptOutcome::NetworkError).await;
            return self.finish(url.id, started_ms, AttemptOutcome::NetworkError, vec![], None, vec![]);
        }
        self.nav_history.record(&url.domain, now_ms().saturating_sub(nav_start));

        // --- WaitingReady ---
        let predicate = ReadyPredicate::NetworkIdle { idle_for: Duration::from_millis(500) };
        let wait_timeout = Duration::from_millis(WAIT_READY_FLOOR_MS).max(nav_timeout / 4);
        if let Err(err) = guard.session_mut().wait_ready(&predicate, wait_timeout).await {
            warn!(domain = %url.domain, error = %err, "wait_ready failed");
            let _ = self.proxies.report(&proxy, AttemptOutcome::NetworkError).await;
            return self.finish(url.id, started_ms, AttemptOutcome::NetworkError, vec![], None, vec![]);
        }

        // --- Block detection ---
        match guard.session_mut().detect_block().await {
            Ok(Some(signal)) => {
                let outcome = match &signal {
                    BlockSignal::CaptchaIframe(_) => AttemptOutcome::Captcha,
                    _ => AttemptOutcome::Blocked,
                };
                let _ = self.proxies.report(&proxy, outcome).await;
                return self.finish(url.id, started_ms, outcome, vec![], None, vec![signal]);
            }
            Ok(None) => {}
            Err(err) => {
                warn!(domain = %url.domain, error = %err, "block detection failed");
                return self.finish(url.id, started_ms, AttemptOutcome::NetworkError, vec![], None, vec![]);
            }
        }

        // --- Interacting ---
        let script = default_interaction_script();
        if let Err(err) = guard.session_mut().interact(&script).await {
            warn!(domain = %url.domain, error = %err, "interaction failed");
            let _ = self.proxies.report(&proxy, AttemptOutcome::NetworkError).await;
            return self.finish(url.id, started_ms, AttemptOutcome::NetworkError, vec![], None, vec![]);
        }

        // --- Snapshotting ---
        let snapshot = match guard.session_mut().snapshot().await {
            Ok(s) => s,
            Err(err) => {
                warn!(domain = %url.domain, error = %err, "snapshot failed");
                let _ = self.proxies.report(&proxy, AttemptOutcome::NetworkError).await;
                return self.finish(url.id, started_ms, AttemptOutcome::NetworkError, vec![], None, vec![]);
            }
        };

        // --- Extracting + Validating ---
        let (record, strategies_tried, degraded) = crate::evaluator::evaluate_domain(url.id, &snapshot, strategies, now_ms());

        // No strategy even targets `price` for this domain (e.g. every
        // price strategy was retired): there was nothing to try, not a
        // failed attempt at matching (spec §7: "no strategy produced a
        // validated record" still requires at least one attempt to record).
        if strategies_tried.is_empty() {
            let placeholder = StrategyOutcome {
                strategy_id: Uuid::nil(),
                field: TargetField::Price,
                success: false,
                confidence_before: 0.0,
                elapsed_ms: 0,
            };
            let _ = self.proxies.report(&proxy, AttemptOutcome::Partial).await;
            return self.finish(url.id, started_ms, AttemptOutcome::ExtractionFailed, vec![placeholder], None, vec![]);
        }

        let outcome = match &record {
            Some(_) if degraded => AttemptOutcome::Partial,
            Some(_) => AttemptOutcome::Ok,
            None => AttemptOutcome::ExtractionFailed,
        };

        let report_outcome = if outcome == AttemptOutcome::Ok { AttemptOutcome::Ok } else { AttemptOutcome::Partial };
        let _ = self.proxies.report(&proxy, report_outcome).await;

        // A degraded record (one or more optional fields dropped for
        // violating a cross-field relation) is still persisted, just
        // reported as `Partial` rather than `Ok` (spec §8 scenario 3).
        self.finish(url.id, started_ms, outcome, strategies_tried, record, vec![])
    }

    fn finish(
        &self,
        url_id: Uuid,
        started_ms: u64,
        outcome: AttemptOutcome,
        strategies_tried: Vec<StrategyOutcome>,
        record: Option<crate::models::PriceRecord>,
        signals: Vec<BlockSignal>,
    ) -> AttemptResult {
        let finished_ms = now_ms().max(started_ms);
        AttemptResult::new(url_id, started_ms, finished_ms, outcome, strategies_tried, record, signals)
            .expect("engine only constructs attempt result shapes it has already validated")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::page_session::mock::MockPageSessionPool;
    use crate::engine::proxy::RoundRobinProxyPool;
    use crate::models::strategy::{MatchScope, TargetField};
    use crate::models::StrategyKind;

    fn test_url() -> MonitoredUrl {
        MonitoredUrl::new(Uuid::new_v4(), "https://example.com/item".into(), 5, 360).unwrap()
    }

    fn price_strategy(domain: &str) -> Strategy {
        Strategy {
            id: Uuid::new_v4(),
            domain: domain.to_string(),
            target_field: TargetField::Price,
            kind: StrategyKind::Regex {
                pattern: r"R\$\s*(\d+,\d{2})".into(),
                group_index: 1,
                scope: MatchScope::WholeDocument,
            },
            confidence: 0.8,
            priority: 0,
            attempts: 10,
            successes: 8,
            last_success_ms: None,
            sample_urls: vec![],
            parent_id: None,
        }
    }

    fn old_price_strategy(domain: &str) -> Strategy {
        Strategy {
            id: Uuid::new_v4(),
            domain: domain.to_string(),
            target_field: TargetField::OldPrice,
            kind: StrategyKind::Regex {
                pattern: r"old R\$\s*(\d+,\d{2})".into(),
                group_index: 1,
                scope: MatchScope::WholeDocument,
            },
            confidence: 0.8,
            priority: 0,
            attempts: 10,
            successes: 8,
            last_success_ms: None,
            sample_urls: vec![],
            parent_id: None,
        }
    }

    fn engine_with(html: &str, block: Option<BlockSignal>) -> ExtractionEngine {
        let mut pool = MockPageSessionPool::new(html);
        pool.block_signal = block;
        let sessions = Arc::new(pool);
        let proxies = Arc::new(RoundRobinProxyPool::new(vec![crate::engine::proxy::ProxyEndpoint {
            id: "p1".into(),
            address: "proxy:8080".into(),
        }]));
        ExtractionEngine::new(sessions, proxies, Arc::new(RuntimeConfig::from_env()))
    }

    #[tokio::test]
    async fn block_signal_short_circuits_to_blocked() {
        let engine = engine_with("<html></html>", Some(BlockSignal::EmptyBody));
        let url = test_url();
        let result = engine.run_attempt(&url, &[price_strategy(&url.domain)], &[]).await;
        assert_eq!(result.outcome, AttemptOutcome::Blocked);
        assert!(result.record.is_none());
    }

    #[tokio::test]
    async fn captcha_iframe_signal_short_circuits_to_captcha() {
        let engine = engine_with("<html></html>", Some(BlockSignal::CaptchaIframe("recaptcha".into())));
        let url = test_url();
        let result = engine.run_attempt(&url, &[price_strategy(&url.domain)], &[]).await;
        assert_eq!(result.outcome, AttemptOutcome::Captcha);
    }

    #[tokio::test]
    async fn successful_extraction_yields_ok_with_record() {
        let engine = engine_with("<html>R$ 19,90</html>", None);
        let url = test_url();
        let result = engine.run_attempt(&url, &[price_strategy(&url.domain)], &[]).await;
        assert_eq!(result.outcome, AttemptOutcome::Ok);
        assert!(result.record.is_some());
    }

    #[tokio::test]
    async fn no_match_yields_extraction_failed() {
        let engine = engine_with("<html>no price here</html>", None);
        let url = test_url();
        let result = engine.run_attempt(&url, &[price_strategy(&url.domain)], &[]).await;
        assert_eq!(result.outcome, AttemptOutcome::ExtractionFailed);
    }

    #[tokio::test]
    async fn no_price_strategy_yields_extraction_failed_without_panicking() {
        let engine = engine_with("<html>R$ 19,90</html>", None);
        let url = test_url();
        // Portfolio has an OldPrice strategy but none targeting Price (e.g.
        // after every Price strategy was retired): evaluate_domain returns
        // no candidates at all, not a failed match.
        let result = engine.run_attempt(&url, &[old_price_strategy(&url.domain)], &[]).await;
        assert_eq!(result.outcome, AttemptOutcome::ExtractionFailed);
        assert!(result.record.is_none());
    }

    #[tokio::test]
    async fn cross_field_violation_yields_partial_with_degraded_record_persisted() {
        let engine = engine_with("R$ 50,00 old R$ 10,00", None);
        let url = test_url();
        let strategies = vec![price_strategy(&url.domain), old_price_strategy(&url.domain)];
        let result = engine.run_attempt(&url, &strategies, &[]).await;
        assert_eq!(result.outcome, AttemptOutcome::Partial);
        let record = result.record.expect("a degraded record is still persisted, not discarded");
        assert_eq!(record.old_price, None, "the offending old_price value was dropped");
        assert!(record.validate().is_ok());
    }

    #[tokio::test]
    async fn empty_strategy_list_yields_extraction_failed_without_touching_session() {
        let engine = engine_with("<html></html>", None);
        let url = test_url();
        let result = engine.run_attempt(&url, &[], &[]).await;
        assert_eq!(result.outcome, AttemptOutcome::ExtractionFailed);
        assert_eq!(result.strategies_tried.len(), 1);
    }
}
