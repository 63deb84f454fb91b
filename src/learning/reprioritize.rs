use crate::models::Strategy;

fn score(s: &Strategy) -> f64 {
    s.confidence * s.success_rate()
}

/// Re-ranks every strategy for a single domain by descending `score`
/// (spec §4.5), ties broken by `last_success_ms` descending then `id`,
/// and writes the resulting rank back into `priority` starting at 0.
/// Operates on one domain's slice at a time; callers serialize this per
/// domain so two reprioritization passes for the same domain never race.
pub fn reprioritize(strategies: &mut [Strategy]) {
    let mut order: Vec<usize> = (0..strategies.len()).collect();
    order.sort_by(|&a, &b| {
        let sa = &strategies[a];
        let sb = &strategies[b];
        score(sb)
            .partial_cmp(&score(sa))
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| sb.last_success_ms.cmp(&sa.last_success_ms))
            .then_with(|| sa.id.cmp(&sb.id))
    });

    for (rank, &idx) in order.iter().enumerate() {
        strategies[idx].priority = rank as i64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::strategy::MatchScope;
    use crate::models::{StrategyKind, TargetField};
    use uuid::Uuid;

    pub(super) fn mk(confidence: f64, attempts: u64, successes: u64, last_success_ms: Option<u64>) -> Strategy {
        Strategy {
            id: Uuid::new_v4(),
            domain: "example.com".into(),
            target_field: TargetField::Price,
            kind: StrategyKind::Regex { pattern: r"\d+".into(), group_index: 0, scope: MatchScope::WholeDocument },
            confidence,
            priority: 99,
            attempts,
            successes,
            last_success_ms,
            sample_urls: vec![],
            parent_id: None,
        }
    }

    #[test]
    fn higher_score_gets_lower_priority_rank() {
        let mut strategies = vec![mk(0.5, 10, 5, None), mk(0.9, 10, 9, None)];
        reprioritize(&mut strategies);
        assert_eq!(strategies[1].priority, 0, "higher score (0.9*0.9) ranks first");
        assert_eq!(strategies[0].priority, 1);
    }

    #[test]
    fn ties_break_by_recency_then_id() {
        let mut strategies = vec![mk(0.5, 10, 5, Some(100)), mk(0.5, 10, 5, Some(200))];
        reprioritize(&mut strategies);
        assert_eq!(strategies[1].priority, 0, "more recent success wins the tie");
    }
}
