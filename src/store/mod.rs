pub mod mock;
pub mod schema;
pub mod sqlite_store;

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{AttemptResult, DomainState, MonitoredUrl, PriceRecord, Strategy};

pub use sqlite_store::SqlxStrategyStore;

/// Selection criteria for `StrategyStore::list_urls`.
#[derive(Clone, Debug, Default)]
pub struct UrlFilter {
    pub domain: Option<String>,
    pub active_only: bool,
    pub due_before_ms: Option<u64>,
}

/// The durable portfolio of monitored URLs and extraction strategies
/// (spec §6). Owned externally; the core reads it mostly and writes it
/// from the Scheduler (`update_last_check`) and the Learning Layer
/// (`upsert_strategies`, `archive_strategy`).
///
/// `upsert_domain_state`/`list_domain_states` are not named as methods in
/// spec §6 but are required by the §3 ownership clause that
/// `DomainState.cooldown_until` must survive a restart.
#[async_trait]
pub trait StrategyStore: Send + Sync {
    async fn list_urls(&self, filter: &UrlFilter) -> anyhow::Result<Vec<MonitoredUrl>>;

    /// Optimistic write of `last_check_ms`. Succeeds (returns `true`) only
    /// if the stored value still equals `prev_ms`.
    async fn update_last_check(
        &self,
        url_id: Uuid,
        prev_ms: Option<u64>,
        new_ms: u64,
    ) -> anyhow::Result<bool>;

    async fn list_strategies(&self, domain: &str) -> anyhow::Result<Vec<Strategy>>;

    async fn upsert_strategies(&self, strategies: &[Strategy]) -> anyhow::Result<()>;

    async fn insert_price_record(&self, record: &PriceRecord) -> anyhow::Result<()>;

    async fn insert_attempt_log(&self, attempt: &AttemptResult) -> anyhow::Result<()>;

    /// Moves a strategy to the archive table, per the §3 retirement rule.
    async fn archive_strategy(&self, strategy_id: Uuid) -> anyhow::Result<()>;

    async fn upsert_domain_state(&self, state: &DomainState) -> anyhow::Result<()>;

    async fn list_domain_states(&self) -> anyhow::Result<Vec<DomainState>>;
}
