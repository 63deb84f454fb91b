pub mod attempt;
pub mod fingerprint;
pub mod page_session;
pub mod proxy;

pub use attempt::ExtractionEngine;
pub use fingerprint::FingerprintProfile;
pub use page_session::{DomSnapshot, PageSession, PageSessionGuard, PageSessionPool, ReadyPredicate};
pub use proxy::{ProxyEndpoint, ProxyPool, RoundRobinProxyPool};
