use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::engine::fingerprint::FingerprintProfile;
use crate::engine::proxy::ProxyEndpoint;
use crate::error::CoreError;
use crate::models::BlockSignal;

/// Serializable DOM capture handed to the Strategy Evaluator (spec §6:
/// `Snapshot() → DOMSnapshot`).
#[derive(Clone, Debug, PartialEq)]
pub struct DomSnapshot {
    pub html: String,
    pub rendered_text: String,
    pub captured_at_ms: u64,
}

/// What `WaitReady` waits for, whichever condition is met first (spec
/// §4.3 step 3).
#[derive(Clone, Debug, PartialEq)]
pub enum ReadyPredicate {
    NetworkIdle { idle_for: Duration },
    DomainSpecific(String),
}

/// One scroll step of a human-interaction simulation.
#[derive(Clone, Debug, PartialEq)]
pub struct ScrollStep {
    pub delta_y: i32,
    pub pause: Duration,
}

/// A human-interaction simulation (spec §4.3 step 5): not cosmetic, it
/// triggers lazy-loaded price blocks on sites that defer rendering until
/// scroll/hover.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct InteractionScript {
    pub scrolls: Vec<ScrollStep>,
    pub hover_selectors: Vec<String>,
    pub dwell: Duration,
}

/// Capability abstraction over a single browser tab (spec §4.3, §6).
/// Implementations hide transport/driver detail entirely; the engine
/// never reaches past this trait.
#[async_trait]
pub trait PageSession: Send + Sync {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), CoreError>;
    async fn wait_ready(&mut self, predicate: &ReadyPredicate, timeout: Duration) -> Result<(), CoreError>;
    async fn snapshot(&mut self) -> Result<DomSnapshot, CoreError>;
    async fn interact(&mut self, script: &InteractionScript) -> Result<(), CoreError>;
    async fn detect_block(&mut self) -> Result<Option<BlockSignal>, CoreError>;
    /// Idempotent: safe to call more than once, including from `Drop`-driven cleanup.
    async fn close(&mut self) -> Result<(), CoreError>;
}

/// Browser pool capability: hands out a configured `PageSession`, scoped
/// by `PageSessionGuard` (spec §4.3 step 1: "session is returned to the
/// pool on all exit paths").
#[async_trait]
pub trait PageSessionPool: Send + Sync {
    async fn acquire(&self, fingerprint: FingerprintProfile, proxy: ProxyEndpoint) -> anyhow::Result<Box<dyn PageSession>>;
    async fn release(&self, session: Box<dyn PageSession>);
}

/// Scoped acquisition wrapper. Grounded on the teacher's "acquired
/// scoped, released on all exit paths" discipline around
/// `PairExecutorRouter`'s per-pair resources; here the return path goes
/// through `Drop` so a short-circuit `?` anywhere in the state machine
/// still releases the session.
pub struct PageSessionGuard {
    session: Option<Box<dyn PageSession>>,
    pool: Arc<dyn PageSessionPool>,
}

impl PageSessionGuard {
    pub fn new(session: Box<dyn PageSession>, pool: Arc<dyn PageSessionPool>) -> Self {
        Self { session: Some(session), pool }
    }

    pub fn session_mut(&mut self) -> &mut (dyn PageSession + 'static) {
        self.session
            .as_mut()
            .expect("session taken before guard dropped")
            .as_mut()
    }
}

impl Drop for PageSessionGuard {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            let pool = self.pool.clone();
            tokio::spawn(async move {
                pool.release(session).await;
            });
        }
    }
}


#[cfg(test)]
mod tests {
    use super::mock::*;
    use super::*;

    #[tokio::test]
    async fn dropping_guard_releases_session_to_pool() {
        let pool = Arc::new(MockPageSessionPool::new("<html></html>"));
        let session = pool
            .acquire(FingerprintProfile::generic_desktop(), ProxyEndpoint { id: "a".into(), address: "x".into() })
            .await
            .unwrap();
        let guard = PageSessionGuard::new(session, pool.clone());
        drop(guard);

        // release() is spawned onto the runtime; yield so it runs.
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(pool.release_count.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
