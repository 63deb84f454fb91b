use std::time::Duration;

/// Process-wide configuration, loaded once at startup and threaded through
/// constructors as an explicit value (Design Note §9: no ambient globals).
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Database connection string for the Strategy Store.
    pub database_url: String,

    // =========================
    // Scheduler configuration
    // =========================
    /// Cadence of the scheduler loop. Every tick it re-evaluates which
    /// active URLs are due and dispatches them to the Queue.
    pub tick_interval: Duration,

    /// Half-width of the uniform jitter applied to each URL's computed
    /// due time, expressed as a fraction of `base_interval`.
    ///
    /// Default 0.083 (~±30 min on a 6h interval), sampled once per cycle
    /// so a single URL doesn't jitter differently every tick.
    pub jitter_fraction: f64,

    /// 24h domain success-rate floor. Below this, the scheduler stretches
    /// that domain's `base_interval` for the next cycle (capped at 3x).
    pub success_floor: f64,

    // =========================
    // Concurrency Queue configuration
    // =========================
    /// Global concurrent-extraction bound across all domains.
    pub max_concurrency: usize,

    /// Per-domain concurrent-extraction bound.
    pub max_per_domain: usize,

    /// Maximum pending items before `Enqueue` returns `QueueFull`.
    pub max_pending: usize,

    /// Per-domain token bucket fill rate (tokens/second).
    pub rate_per_second: f64,

    /// Per-domain token bucket burst capacity.
    pub burst: u32,

    /// Backoff base duration for requeue-on-transient-failure.
    pub backoff_base: Duration,

    /// Backoff cap; requeue delay never exceeds this.
    pub backoff_cap: Duration,

    /// Number of requeue attempts before the Scheduler takes back over.
    pub max_retries: u32,

    // =========================
    // Extraction Engine configuration
    // =========================
    /// Hard per-navigation timeout before adaptive extension.
    pub navigation_timeout: Duration,

    /// Hard ceiling on the whole attempt (navigate+wait+interact+extract).
    pub attempt_deadline: Duration,

    // =========================
    // Cooldown policy configuration
    // =========================
    pub cooldown_base: Duration,
    pub cooldown_max: Duration,
    pub cooldown_block_multiplier: f64,

    // =========================
    // Learning layer configuration
    // =========================
    /// Reprioritize a domain's strategies every N attempts against it.
    pub reprioritize_every: u32,

    /// Consider variant generation every N attempts (in addition to the
    /// confidence-threshold trigger).
    pub variant_every: u32,

    /// Max child strategies spawned per variant-generation pass.
    pub variant_fanout: usize,

    /// Strategies below this confidence, with enough attempts, are retired.
    pub retire_confidence: f64,
    pub retire_min_attempts: u32,
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://pricecore_dev.db".to_string());

        Self {
            database_url,

            tick_interval: Duration::from_secs(60),
            jitter_fraction: 0.083,
            success_floor: 0.5,

            max_concurrency: 10,
            max_per_domain: 2,
            max_pending: 10_000,
            rate_per_second: 0.2,
            burst: 3,
            backoff_base: Duration::from_secs(30),
            backoff_cap: Duration::from_secs(600),
            max_retries: 3,

            navigation_timeout: Duration::from_secs(30),
            attempt_deadline: Duration::from_secs(90),

            cooldown_base: Duration::from_secs(60),
            cooldown_max: Duration::from_secs(3600),
            cooldown_block_multiplier: 2.0,

            reprioritize_every: 50,
            variant_every: 50,
            variant_fanout: 3,
            retire_confidence: 0.1,
            retire_min_attempts: 20,
        }
    }
}
