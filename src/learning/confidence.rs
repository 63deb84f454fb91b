use crate::models::Strategy;

/// EMA step size for confidence updates (spec §4.5: half-life ≈ 7 attempts).
const STEP: f64 = 0.1;

/// Applies one confidence update in place: `c' = 0.9c + 0.1` on success,
/// `c' = 0.9c` on failure. Bounded in `[0, 1]` by construction since
/// `confidence` starts in range and every update is a convex combination
/// (or plain decay) of values already in range. Grounded on
/// `accumulate_credit`'s saturating, capped accumulation shape.
pub fn accumulate_confidence(s: &mut Strategy, now_ms: u64, success: bool) {
    s.confidence = if success { (1.0 - STEP) * s.confidence + STEP } else { (1.0 - STEP) * s.confidence };

    s.attempts += 1;
    if success {
        s.successes += 1;
        s.last_success_ms = Some(now_ms);
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use uuid::Uuid;

    fn mk_strategy(confidence: f64) -> Strategy {
        Strategy {
            id: Uuid::new_v4(),
            domain: "example.com".into(),
            target_field: crate::models::TargetField::Price,
            kind: crate::models::StrategyKind::Regex { pattern: r"\d+".into(), group_index: 0, scope: crate::models::strategy::MatchScope::WholeDocument },
            confidence,
            priority: 0,
            attempts: 0,
            successes: 0,
            last_success_ms: None,
            sample_urls: vec![],
            parent_id: None,
        }
    }

    proptest! {
        // Invariant 2 (spec §8): after any sequence of updates, 0 <= confidence <= 1.
        #[test]
        fn confidence_stays_in_unit_interval(
            start in 0.0f64..=1.0,
            outcomes in prop::collection::vec(any::<bool>(), 0..200),
        ) {
            let mut s = mk_strategy(start);
            for (i, success) in outcomes.into_iter().enumerate() {
                accumulate_confidence(&mut s, i as u64, success);
                prop_assert!(s.confidence >= 0.0 && s.confidence <= 1.0);
            }
        }

        // Invariant 3: one success after a streak of k failures raises
        // confidence by at most STEP and at least STEP - STEP*0.9^k.
        #[test]
        fn success_after_failure_streak_bounded(
            start in 0.0f64..=1.0,
            k in 0u32..30,
        ) {
            let mut s = mk_strategy(start);
            for i in 0..k {
                accumulate_confidence(&mut s, i as u64, false);
            }
            let before = s.confidence;
            accumulate_confidence(&mut s, k as u64, true);
            let delta = s.confidence - before;

            let lower_bound = STEP - STEP * 0.9f64.powi(k as i32);
            prop_assert!(delta <= STEP + 1e-9, "delta={delta} exceeds STEP");
            prop_assert!(delta >= lower_bound - 1e-9, "delta={delta} below lower_bound={lower_bound}");
        }
    }
}
