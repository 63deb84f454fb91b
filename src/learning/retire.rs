use crate::models::Strategy;

/// Strategies meeting this bar move to the archive and are excluded from
/// future selection (spec §4.5). Archived rows are never deleted.
pub fn should_retire(s: &Strategy, retire_confidence: f64, retire_min_attempts: u32) -> bool {
    s.should_retire(retire_confidence, retire_min_attempts)
}

/// Partitions a domain's strategies into those that stay active and
/// those that should be archived this pass.
pub fn partition_retirements(strategies: Vec<Strategy>, retire_confidence: f64, retire_min_attempts: u32) -> (Vec<Strategy>, Vec<Strategy>) {
    strategies.into_iter().partition(|s| !should_retire(s, retire_confidence, retire_min_attempts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::strategy::MatchScope;
    use crate::models::{StrategyKind, TargetField};
    use uuid::Uuid;

    fn mk(confidence: f64, attempts: u64) -> Strategy {
        Strategy {
            id: Uuid::new_v4(),
            domain: "example.com".into(),
            target_field: TargetField::Price,
            kind: StrategyKind::Regex { pattern: r"\d+".into(), group_index: 0, scope: MatchScope::WholeDocument },
            confidence,
            priority: 0,
            attempts,
            successes: 0,
            last_success_ms: None,
            sample_urls: vec![],
            parent_id: None,
        }
    }

    #[test]
    fn partition_separates_retired_from_active() {
        let strategies = vec![mk(0.05, 25), mk(0.9, 25), mk(0.05, 5)];
        let (active, retired) = partition_retirements(strategies, 0.1, 20);
        assert_eq!(active.len(), 2);
        assert_eq!(retired.len(), 1);
    }
}
