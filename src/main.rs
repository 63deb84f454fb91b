use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pricecore::config::RuntimeConfig;
use pricecore::engine::{DomSnapshot, FingerprintProfile, PageSession, PageSessionPool, ProxyEndpoint, ProxyPool, ReadyPredicate, RoundRobinProxyPool};
use pricecore::error::CoreError;
use pricecore::learning;
use pricecore::logger::init_tracing;
use pricecore::models::BlockSignal;
use pricecore::runtime::Runtime;
use pricecore::store::{SqlxStrategyStore, StrategyStore};
use tracing::info;

/// Placeholder `PageSession` until a real browser driver (e.g. a
/// chromiumoxide/playwright adapter) is wired in. Every call is a no-op
/// that never detects a block and snapshots an empty document, so the
/// rest of the pipeline runs end-to-end without a real browser attached.
struct NoopPageSession;

#[async_trait]
impl PageSession for NoopPageSession {
    async fn navigate(&mut self, _url: &str, _timeout: Duration) -> Result<(), CoreError> {
        Ok(())
    }
    async fn wait_ready(&mut self, _predicate: &ReadyPredicate, _timeout: Duration) -> Result<(), CoreError> {
        Ok(())
    }
    async fn snapshot(&mut self) -> Result<DomSnapshot, CoreError> {
        Ok(DomSnapshot { html: String::new(), rendered_text: String::new(), captured_at_ms: pricecore::time::now_ms() })
    }
    async fn interact(&mut self, _script: &pricecore::engine::page_session::InteractionScript) -> Result<(), CoreError> {
        Ok(())
    }
    async fn detect_block(&mut self) -> Result<Option<BlockSignal>, CoreError> {
        Ok(None)
    }
    async fn close(&mut self) -> Result<(), CoreError> {
        Ok(())
    }
}

/// Placeholder session pool handing out `NoopPageSession`s. Swap for a
/// real browser-context pool (TODO: chromiumoxide) before pointing this
/// at live traffic.
struct NoopPageSessionPool;

#[async_trait]
impl PageSessionPool for NoopPageSessionPool {
    async fn acquire(&self, _fingerprint: FingerprintProfile, _proxy: ProxyEndpoint) -> anyhow::Result<Box<dyn PageSession>> {
        Ok(Box::new(NoopPageSession))
    }

    async fn release(&self, _session: Box<dyn PageSession>) {}
}

fn proxy_pool_from_env() -> Arc<dyn ProxyPool> {
    let endpoints = std::env::var("PROXY_ENDPOINTS")
        .ok()
        .map(|raw| {
            raw.split(',')
                .filter(|s| !s.trim().is_empty())
                .enumerate()
                .map(|(i, addr)| ProxyEndpoint { id: format!("proxy-{i}"), address: addr.trim().to_string() })
                .collect::<Vec<_>>()
        })
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| vec![ProxyEndpoint { id: "direct".to_string(), address: "direct".to_string() }]);

    Arc::new(RoundRobinProxyPool::new(endpoints))
}

/// Connects the store, runs migrations, and seeds the generic starter
/// portfolio the first time the archive is empty (spec §4.5 "Starter
/// portfolio").
async fn init_store(config: &RuntimeConfig) -> anyhow::Result<Arc<SqlxStrategyStore>> {
    let store = SqlxStrategyStore::connect(&config.database_url).await?;
    store.migrate().await?;

    let existing = store.list_strategies("*").await?;
    if existing.is_empty() {
        info!("no generic strategies found; seeding starter portfolio");
        store.upsert_strategies(&learning::generic_starter_portfolio()).await?;
    }

    Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sqlx::any::install_default_drivers();

    let is_production = std::env::var("APP_ENV").unwrap_or_default() == "production";
    init_tracing(is_production);

    info!("starting pricecore");

    let config = Arc::new(RuntimeConfig::from_env());
    let store = init_store(&config).await?;
    let proxies = proxy_pool_from_env();
    let sessions: Arc<dyn PageSessionPool> = Arc::new(NoopPageSessionPool);

    let runtime = Arc::new(Runtime::new(config.clone(), store, sessions, proxies));

    for worker_id in 0..config.max_concurrency {
        let runtime = runtime.clone();
        tokio::spawn(async move {
            info!(worker_id, "worker starting");
            runtime.run_worker().await;
        });
    }

    tokio::spawn(runtime.scheduler.clone().run_loop());

    info!("pricecore started; waiting for shutdown signal");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    Ok(())
}
