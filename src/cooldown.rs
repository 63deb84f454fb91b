use crate::config::RuntimeConfig;
use crate::models::domain_state::DomainState;

/// Applies the §7 cooldown policy to a domain that just produced a block
/// signal: bump `consecutive_blocks`, extend `cooldown_until` by an
/// exponential function of the new streak length.
pub fn apply_block(state: &mut DomainState, now_ms: u64, config: &RuntimeConfig) {
    state.consecutive_blocks += 1;
    state.last_outcome = Some(crate::models::AttemptOutcome::Blocked);

    let base_ms = config.cooldown_base.as_millis() as u64;
    let max_ms = config.cooldown_max.as_millis() as u64;
    let factor = config
        .cooldown_block_multiplier
        .powi(state.consecutive_blocks as i32);
    let extension_ms = ((base_ms as f64) * factor).min(max_ms as f64) as u64;

    state.extend_cooldown(now_ms.saturating_add(extension_ms));
}

/// Resets the block streak on a successful attempt, per §7: "on the next
/// `ok` outcome, `consecutive_blocks := 0`".
pub fn apply_success(state: &mut DomainState) {
    state.record_success();
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        // Invariant 9 (spec §8): cooldown_until never decreases across a
        // streak of blocks, even as now_ms itself jumps around arbitrarily.
        #[test]
        fn cooldown_until_is_monotonic_across_a_block_streak(
            ticks in prop::collection::vec(0u64..10_000_000, 1..20),
        ) {
            let config = RuntimeConfig::from_env();
            let mut s = DomainState::new("example.com".into(), 0, 3);
            let mut prev = None;

            for now_ms in ticks {
                apply_block(&mut s, now_ms, &config);
                let current = s.cooldown_until_ms.unwrap();
                if let Some(prev) = prev {
                    prop_assert!(current >= prev, "cooldown_until decreased: {current} < {prev}");
                }
                prev = Some(current);
            }
        }
    }
}
