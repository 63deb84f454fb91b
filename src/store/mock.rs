//! In-memory `StrategyStore`, grounded on
//! `backend::session::store::tests::MockSessionRepository`: plain
//! `Mutex`-guarded vectors, no persistence, used by engine/learning/queue
//! unit tests that need a store without a database.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::models::{AttemptResult, DomainState, MonitoredUrl, PriceRecord, Strategy};
use crate::store::{StrategyStore, UrlFilter};

#[derive(Default)]
pub struct MockStrategyStore {
    pub urls: Mutex<HashMap<Uuid, MonitoredUrl>>,
    pub strategies: Mutex<HashMap<Uuid, Strategy>>,
    pub archived: Mutex<Vec<Uuid>>,
    pub price_records: Mutex<Vec<PriceRecord>>,
    pub attempt_logs: Mutex<Vec<AttemptResult>>,
    pub domain_states: Mutex<HashMap<String, DomainState>>,
}

impl MockStrategyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_url(&self, url: MonitoredUrl) {
        self.urls.lock().insert(url.id, url);
    }

    pub fn seed_strategy(&self, strategy: Strategy) {
        self.strategies.lock().insert(strategy.id, strategy);
    }
}

#[async_trait]
impl StrategyStore for MockStrategyStore {
    async fn list_urls(&self, filter: &UrlFilter) -> anyhow::Result<Vec<MonitoredUrl>> {
        Ok(self
            .urls
            .lock()
            .values()
            .filter(|u| filter.domain.as_deref().map_or(true, |d| d == u.domain))
            .filter(|u| !filter.active_only || u.active)
            .filter(|u| {
                filter
                    .due_before_ms
                    .map_or(true, |t| u.last_check_ms.map_or(true, |lc| lc < t))
            })
            .cloned()
            .collect())
    }

    async fn update_last_check(
        &self,
        url_id: Uuid,
        prev_ms: Option<u64>,
        new_ms: u64,
    ) -> anyhow::Result<bool> {
        let mut urls = self.urls.lock();
        let Some(u) = urls.get_mut(&url_id) else {
            return Ok(false);
        };
        if u.last_check_ms != prev_ms {
            return Ok(false);
        }
        u.last_check_ms = Some(new_ms);
        Ok(true)
    }

    async fn list_strategies(&self, domain: &str) -> anyhow::Result<Vec<Strategy>> {
        Ok(self
            .strategies
            .lock()
            .values()
            .filter(|s| s.domain == domain || s.is_generic())
            .cloned()
            .collect())
    }

    async fn upsert_strategies(&self, strategies: &[Strategy]) -> anyhow::Result<()> {
        let mut map = self.strategies.lock();
        for s in strategies {
            map.insert(s.id, s.clone());
        }
        Ok(())
    }

    async fn insert_price_record(&self, record: &PriceRecord) -> anyhow::Result<()> {
        self.price_records.lock().push(record.clone());
        Ok(())
    }

    async fn insert_attempt_log(&self, attempt: &AttemptResult) -> anyhow::Result<()> {
        let mut logs = self.attempt_logs.lock();
        let dup = logs
            .iter()
            .any(|a| a.url_id == attempt.url_id && a.started_at_ms == attempt.started_at_ms);
        if !dup {
            logs.push(attempt.clone());
        }
        Ok(())
    }

    async fn archive_strategy(&self, strategy_id: Uuid) -> anyhow::Result<()> {
        if self.strategies.lock().remove(&strategy_id).is_some() {
            self.archived.lock().push(strategy_id);
        }
        Ok(())
    }

    async fn upsert_domain_state(&self, state: &DomainState) -> anyhow::Result<()> {
        self.domain_states
            .lock()
            .insert(state.domain.clone(), state.clone());
        Ok(())
    }

    async fn list_domain_states(&self) -> anyhow::Result<Vec<DomainState>> {
        Ok(self.domain_states.lock().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_url(domain: &str) -> MonitoredUrl {
        MonitoredUrl::new(
            Uuid::new_v4(),
            format!("https://{domain}/product/1"),
            3,
            360,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn update_last_check_is_a_cas() {
        let store = MockStrategyStore::new();
        let url = mk_url("example.com");
        let id = url.id;
        store.seed_url(url);

        assert!(store.update_last_check(id, None, 100).await.unwrap());
        // stale prev (still None) is rejected now that the row is Some(100)
        assert!(!store.update_last_check(id, None, 200).await.unwrap());
        assert!(store.update_last_check(id, Some(100), 200).await.unwrap());
    }

    #[tokio::test]
    async fn attempt_log_insert_is_idempotent_by_url_and_started_at() {
        let store = MockStrategyStore::new();
        let url_id = Uuid::new_v4();
        let a = AttemptResult::new(
            url_id,
            0,
            10,
            crate::models::AttemptOutcome::NetworkError,
            vec![],
            None,
            vec![],
        )
        .unwrap();

        store.insert_attempt_log(&a).await.unwrap();
        store.insert_attempt_log(&a).await.unwrap();

        assert_eq!(store.attempt_logs.lock().len(), 1);
    }

    #[tokio::test]
    async fn archive_strategy_moves_id_out_of_active_set() {
        let store = MockStrategyStore::new();
        let s = Strategy {
            id: Uuid::new_v4(),
            domain: "example.com".into(),
            target_field: crate::models::TargetField::Price,
            kind: crate::models::StrategyKind::Regex {
                pattern: r"\d+".into(),
                group_index: 0,
                scope: crate::models::strategy::MatchScope::WholeDocument,
            },
            confidence: 0.05,
            priority: 0,
            attempts: 25,
            successes: 0,
            last_success_ms: None,
            sample_urls: vec![],
            parent_id: None,
        };
        let id = s.id;
        store.seed_strategy(s);

        store.archive_strategy(id).await.unwrap();

        assert!(store.list_strategies("example.com").await.unwrap().is_empty());
        assert_eq!(*store.archived.lock(), vec![id]);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        // Invariant 8 (spec §8): inserting the same (url_id, started_at_ms)
        // attempt log twice leaves the same single row as inserting it once.
        #[test]
        fn attempt_log_insert_is_idempotent_for_any_attempt(
            started_at_ms in 0u64..1_000_000,
            extra_ms in 0u64..10_000,
            insert_count in 1u32..5,
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let store = MockStrategyStore::new();
                let url_id = Uuid::new_v4();
                let attempt = AttemptResult::new(
                    url_id,
                    started_at_ms,
                    started_at_ms + extra_ms,
                    crate::models::AttemptOutcome::NetworkError,
                    vec![],
                    None,
                    vec![],
                )
                .unwrap();

                for _ in 0..insert_count {
                    store.insert_attempt_log(&attempt).await.unwrap();
                }

                assert_eq!(store.attempt_logs.lock().len(), 1);
            });
        }
    }
}
