use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::models::AttemptOutcome;

/// A single proxy endpoint, opaque beyond its address (spec §6: `Select(domain) → ProxyEndpoint`).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ProxyEndpoint {
    pub id: String,
    pub address: String,
}

/// Proxy capability abstraction (spec §1, §6). Implementations own health
/// tracking; the engine only selects and reports.
#[async_trait]
pub trait ProxyPool: Send + Sync {
    async fn select(&self, domain: &str) -> anyhow::Result<ProxyEndpoint>;
    async fn report(&self, endpoint: &ProxyEndpoint, outcome: AttemptOutcome) -> anyhow::Result<()>;
}

/// Round-robins over a fixed endpoint set, steering away from endpoints
/// with a recent failure streak. Grounded on
/// `backend::market::manager::MarketManager`'s "one active resource per
/// key, tracked in a guarded set" pattern, adapted from a dedup set to a
/// failure-streak tally per endpoint.
pub struct RoundRobinProxyPool {
    endpoints: Vec<ProxyEndpoint>,
    cursor: Mutex<usize>,
    failure_streak: Mutex<HashMap<String, u32>>,
}

impl RoundRobinProxyPool {
    pub fn new(endpoints: Vec<ProxyEndpoint>) -> Self {
        Self {
            endpoints,
            cursor: Mutex::new(0),
            failure_streak: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl ProxyPool for RoundRobinProxyPool {
    async fn select(&self, _domain: &str) -> anyhow::Result<ProxyEndpoint> {
        if self.endpoints.is_empty() {
            anyhow::bail!("no proxy endpoints configured");
        }

        let streaks = self.failure_streak.lock();
        let healthiest = self
            .endpoints
            .iter()
            .min_by_key(|e| streaks.get(&e.id).copied().unwrap_or(0))
            .cloned();
        drop(streaks);

        if let Some(endpoint) = healthiest {
            if self.failure_streak.lock().get(&endpoint.id).copied().unwrap_or(0) == 0 {
                return Ok(endpoint);
            }
        }

        // All endpoints have some failure streak; fall back to plain
        // round robin so a universally-struggling pool still rotates.
        let mut cursor = self.cursor.lock();
        let endpoint = self.endpoints[*cursor % self.endpoints.len()].clone();
        *cursor = cursor.wrapping_add(1);
        Ok(endpoint)
    }

    async fn report(&self, endpoint: &ProxyEndpoint, outcome: AttemptOutcome) -> anyhow::Result<()> {
        let mut streaks = self.failure_streak.lock();
        let entry = streaks.entry(endpoint.id.clone()).or_insert(0);
        match outcome {
            AttemptOutcome::Ok | AttemptOutcome::Partial => *entry = 0,
            AttemptOutcome::Captcha | AttemptOutcome::Blocked | AttemptOutcome::NetworkError => {
                *entry = entry.saturating_add(1);
            }
            AttemptOutcome::ExtractionFailed => {}
        }
        Ok(())
    }
}
