use thiserror::Error;

/// Error taxonomy for the adaptive scraping core (spec §7).
///
/// Only `ConfigError` is fatal. Everything else is either retried by the
/// Queue (transient) or fed to the Learning Layer as signal (persistent).
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("network error: {0}")]
    Network(String),

    #[error("browser session error: {0}")]
    Browser(String),

    #[error("block signal detected: {0}")]
    Block(String),

    #[error("no strategy produced a validated record")]
    ExtractionFailed,

    #[error("cross-field validation failed: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("strategy store error: {0}")]
    Store(String),

    #[error("queue is full (max_pending exceeded)")]
    QueueFull,

    #[error("attempt deadline exceeded")]
    DeadlineExceeded,
}

impl CoreError {
    /// Whether the Queue should retry this error with backoff (transient),
    /// as opposed to surfacing it to the Learning Layer as signal.
    pub fn is_transient(&self) -> bool {
        matches!(self, CoreError::Network(_) | CoreError::Browser(_))
    }
}
