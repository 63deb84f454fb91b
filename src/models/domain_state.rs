use crate::models::attempt::AttemptOutcome;

/// Per-domain token bucket state (spec §3, §4.2). Kept alongside
/// `DomainState` rather than inside the Queue so it can be reconstructed
/// from the Strategy Store on restart along with cooldown state.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TokenBucketState {
    pub tokens: f64,
    pub last_refill_ms: u64,
}

impl TokenBucketState {
    pub fn new(burst: u32, now_ms: u64) -> Self {
        Self {
            tokens: burst as f64,
            last_refill_ms: now_ms,
        }
    }
}

/// In-memory (but restart-safe on the `cooldown_until` field) per-domain
/// state (spec §3: `DomainState`).
#[derive(Clone, Debug, PartialEq)]
pub struct DomainState {
    pub domain: String,
    pub cooldown_until_ms: Option<u64>,
    pub consecutive_blocks: u32,
    pub last_outcome: Option<AttemptOutcome>,
    pub token_bucket: TokenBucketState,
}

impl DomainState {
    pub fn new(domain: String, now_ms: u64, burst: u32) -> Self {
        Self {
            domain,
            cooldown_until_ms: None,
            consecutive_blocks: 0,
            last_outcome: None,
            token_bucket: TokenBucketState::new(burst, now_ms),
        }
    }

    pub fn is_in_cooldown(&self, now_ms: u64) -> bool {
        self.cooldown_until_ms.is_some_and(|until| until > now_ms)
    }

    /// Extends `cooldown_until` monotonically (spec §3: "subsequent block
    /// events extend but never shorten `cooldown_until`").
    pub fn extend_cooldown(&mut self, candidate_ms: u64) {
        self.cooldown_until_ms = Some(match self.cooldown_until_ms {
            Some(existing) => existing.max(candidate_ms),
            None => candidate_ms,
        });
    }

    /// Resets the block streak on a successful (`ok`) outcome, per the
    /// cooldown policy in spec §7.
    pub fn record_success(&mut self) {
        self.consecutive_blocks = 0;
        self.last_outcome = Some(AttemptOutcome::Ok);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cooldown_is_monotonic_during_a_block_streak() {
        let mut s = DomainState::new("example.com".into(), 0, 3);
        s.extend_cooldown(1_000);
        assert_eq!(s.cooldown_until_ms, Some(1_000));

        s.extend_cooldown(500);
        assert_eq!(
            s.cooldown_until_ms,
            Some(1_000),
            "a shorter cooldown must never shorten the existing one"
        );

        s.extend_cooldown(2_000);
        assert_eq!(s.cooldown_until_ms, Some(2_000));
    }

    #[test]
    fn success_resets_block_streak() {
        let mut s = DomainState::new("example.com".into(), 0, 3);
        s.consecutive_blocks = 4;
        s.record_success();
        assert_eq!(s.consecutive_blocks, 0);
    }

    #[test]
    fn cooldown_boundary_is_exclusive() {
        let mut s = DomainState::new("example.com".into(), 0, 3);
        s.extend_cooldown(1_000);
        assert!(s.is_in_cooldown(999));
        assert!(!s.is_in_cooldown(1_000));
    }
}
