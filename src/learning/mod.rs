pub mod confidence;
pub mod reprioritize;
pub mod retire;
pub mod variants;

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::RuntimeConfig;
use crate::models::strategy::{MatchScope, SemanticMatcher};
use crate::models::{AttemptResult, Strategy, StrategyKind, TargetField};
use crate::store::StrategyStore;

/// Width of the per-domain lock stripe (spec §5: "serialized per domain
/// via a striped lock"), grounded on the teacher's per-pair
/// `PairExecutorRouter` isolation generalized from "one lane per trading
/// pair" to "one lane per domain".
const STRIPE_WIDTH: usize = 256;

fn stripe_index(domain: &str) -> usize {
    let mut hasher = DefaultHasher::new();
    domain.hash(&mut hasher);
    (hasher.finish() as usize) % STRIPE_WIDTH
}

#[derive(Default)]
struct DomainCounters {
    since_reprioritize: u32,
    since_variant_pass: u32,
}

/// Bounded recent-event window for `apply_outcome`'s idempotence guard
/// (spec §8 invariant 8), capped the same way `NavigationHistory` caps its
/// per-domain samples rather than growing an unbounded log.
const PROCESSED_WINDOW: usize = 4096;

#[derive(Default)]
struct ProcessedLog {
    seen: HashSet<(Uuid, u64)>,
    order: VecDeque<(Uuid, u64)>,
}

impl ProcessedLog {
    /// Returns `true` the first time `key` is seen, `false` on a repeat.
    fn mark_if_new(&mut self, key: (Uuid, u64)) -> bool {
        if !self.seen.insert(key) {
            return false;
        }
        self.order.push_back(key);
        if self.order.len() > PROCESSED_WINDOW {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        true
    }
}

/// Maintains expected-utility estimates for every strategy and evolves
/// the portfolio (spec §4.5). Mutations for a given domain are applied
/// one attempt at a time under that domain's stripe lane, then batched
/// and flushed to the store together.
pub struct LearningLayer {
    store: Arc<dyn StrategyStore>,
    config: Arc<RuntimeConfig>,
    stripe: Vec<AsyncMutex<()>>,
    counters: SyncMutex<HashMap<String, DomainCounters>>,
    processed: SyncMutex<ProcessedLog>,
}

impl LearningLayer {
    pub fn new(store: Arc<dyn StrategyStore>, config: Arc<RuntimeConfig>) -> Self {
        let stripe = (0..STRIPE_WIDTH).map(|_| AsyncMutex::new(())).collect();
        Self {
            store,
            config,
            stripe,
            counters: SyncMutex::new(HashMap::new()),
            processed: SyncMutex::new(ProcessedLog::default()),
        }
    }

    /// Applies one `AttemptResult` to `domain`'s portfolio: per-strategy
    /// confidence EMA, generic→domain forking on first successful use,
    /// then (on their respective triggers) reprioritization, variant
    /// generation, and retirement. A repeat of the same `(url_id,
    /// started_at_ms)` (e.g. a requeue racing a retry) is a no-op: the
    /// portfolio is only ever mutated once per attempt (spec §8 invariant
    /// 8).
    #[instrument(skip(self, result), target = "learning", fields(domain = %domain))]
    pub async fn apply_outcome(&self, domain: &str, result: &AttemptResult) -> anyhow::Result<()> {
        if !self.processed.lock().mark_if_new((result.url_id, result.started_at_ms)) {
            return Ok(());
        }

        let idx = stripe_index(domain);
        let _guard = self.stripe[idx].lock().await;

        let mut strategies = self.store.list_strategies(domain).await?;
        let now_ms = result.finished_at_ms;

        for outcome in &result.strategies_tried {
            let Some(pos) = strategies.iter().position(|s| s.id == outcome.strategy_id) else { continue };

            if strategies[pos].is_generic() {
                // Read-only until a domain fork exists (spec §4.5 Open
                // Question 2): a failed attempt against the shared row
                // leaves it untouched rather than penalizing every domain.
                if outcome.success {
                    let mut forked = fork_generic_on_success(&strategies[pos], domain);
                    confidence::accumulate_confidence(&mut forked, now_ms, true);
                    strategies.push(forked);
                }
                continue;
            }

            confidence::accumulate_confidence(&mut strategies[pos], now_ms, outcome.success);
        }

        let (do_reprioritize, do_variant_pass) = self.advance_counters(domain);

        if do_reprioritize {
            reprioritize::reprioritize(&mut strategies);
        }

        let existing_parents: HashSet<Uuid> = strategies.iter().filter_map(|s| s.parent_id).collect();
        let mut spawned = Vec::new();
        for s in &strategies {
            if s.parent_id.is_some() || s.is_generic() {
                continue; // children don't spawn further generations; generics never mutate
            }
            if variants::confidence_trigger(s, existing_parents.contains(&s.id)) || do_variant_pass {
                spawned.extend(variants::generate_variants(s, self.config.variant_fanout));
            }
        }
        strategies.extend(spawned);

        strategies.retain(|s| {
            if variants::should_retire_probationary_child(s) {
                warn!(strategy_id = %s.id, domain, "retiring probationary child below confidence floor");
                false
            } else {
                true
            }
        });

        let (active, retired) = retire::partition_retirements(strategies, self.config.retire_confidence, self.config.retire_min_attempts);

        self.store.upsert_strategies(&active).await?;
        for s in &retired {
            info!(strategy_id = %s.id, domain, "retiring low-confidence strategy");
            self.store.archive_strategy(s.id).await?;
        }

        Ok(())
    }

    fn advance_counters(&self, domain: &str) -> (bool, bool) {
        let mut counters = self.counters.lock();
        let entry = counters.entry(domain.to_string()).or_default();
        entry.since_reprioritize += 1;
        entry.since_variant_pass += 1;

        let do_reprioritize = entry.since_reprioritize >= self.config.reprioritize_every;
        let do_variant_pass = entry.since_variant_pass >= self.config.variant_every;
        if do_reprioritize {
            entry.since_reprioritize = 0;
        }
        if do_variant_pass {
            entry.since_variant_pass = 0;
        }
        (do_reprioritize, do_variant_pass)
    }
}

/// Clones a read-only generic (`domain="*"`) strategy into a domain-scoped
/// copy, reset to zero attempts, before any mutation (resolves Open
/// Question 2). The fork has no `parent_id`: it is a new root in that
/// domain's strategy forest, not a variant of the generic.
fn fork_generic_on_success(generic: &Strategy, domain: &str) -> Strategy {
    Strategy {
        id: Uuid::new_v4(),
        domain: domain.to_string(),
        target_field: generic.target_field,
        kind: generic.kind.clone(),
        confidence: generic.confidence,
        priority: generic.priority,
        attempts: 0,
        successes: 0,
        last_success_ms: None,
        sample_urls: generic.sample_urls.clone(),
        parent_id: None,
    }
}

fn generic_regex(field: TargetField, pattern: &str) -> Strategy {
    Strategy {
        id: Uuid::new_v4(),
        domain: "*".to_string(),
        target_field: field,
        kind: StrategyKind::Regex { pattern: pattern.to_string(), group_index: 1, scope: MatchScope::WholeDocument },
        confidence: 0.5,
        priority: 0,
        attempts: 0,
        successes: 0,
        last_success_ms: None,
        sample_urls: vec![],
        parent_id: None,
    }
}

/// Generic (`domain="*"`) starter strategies seeded once at system
/// bootstrap, before any concrete domain has been seen (spec §4.5
/// "Starter portfolio"). Domain-specific seeds from static configuration
/// are a deployment concern and are layered in by the caller, not here.
pub fn generic_starter_portfolio() -> Vec<Strategy> {
    vec![
        generic_regex(TargetField::Price, r"R\$\s*(\d+[.,]\d{2})"),
        generic_regex(TargetField::OldPrice, r"(?:de|antes)\s*R\$\s*(\d+[.,]\d{2})"),
        generic_regex(TargetField::PixPrice, r"pix[^\d]{0,20}R\$\s*(\d+[.,]\d{2})"),
        Strategy {
            id: Uuid::new_v4(),
            domain: "*".to_string(),
            target_field: TargetField::Price,
            kind: StrategyKind::Semantic {
                attributes: vec![
                    SemanticMatcher { attribute: "itemprop".to_string(), value: Some("price".to_string()) },
                    SemanticMatcher { attribute: "data-price".to_string(), value: None },
                ],
                context_terms: vec!["pix".to_string(), "à vista".to_string()],
                max_distance_chars: 80,
            },
            confidence: 0.5,
            priority: 1,
            attempts: 0,
            successes: 0,
            last_success_ms: None,
            sample_urls: vec![],
            parent_id: None,
        },
    ]
}


#[cfg(test)]
mod proptests {
    use super::tests::{mk_url, price_record};
    use super::*;
    use crate::models::{AttemptOutcome, StrategyOutcome};
    use crate::store::mock::MockStrategyStore;
    use proptest::prelude::*;

    proptest! {
        // Invariant 8 (spec §8): applying the same AttemptResult to the
        // learning layer any number of times leaves a strategy's metrics
        // identical to applying it once.
        #[test]
        fn apply_outcome_is_idempotent_for_the_same_attempt(
            started_at_ms in 0u64..1_000_000,
            extra_ms in 0u64..10_000,
            starting_confidence in 0.0f64..1.0,
            success in any::<bool>(),
            apply_count in 1u32..5,
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let store = Arc::new(MockStrategyStore::new());
                let mut s = generic_regex(TargetField::Price, r"R\$\s*(\d+[.,]\d{2})");
                s.domain = "example.com".to_string();
                s.confidence = starting_confidence;
                let id = s.id;
                store.seed_strategy(s);

                let layer = LearningLayer::new(store.clone(), Arc::new(RuntimeConfig::from_env()));
                let url = mk_url();
                let outcome = StrategyOutcome {
                    strategy_id: id,
                    field: TargetField::Price,
                    success,
                    confidence_before: starting_confidence,
                    elapsed_ms: 0,
                };
                let record = if success { Some(price_record(url.id, id)) } else { None };
                let attempt_outcome = if success { AttemptOutcome::Ok } else { AttemptOutcome::ExtractionFailed };
                let result = AttemptResult::new(
                    url.id,
                    started_at_ms,
                    started_at_ms + extra_ms,
                    attempt_outcome,
                    vec![outcome],
                    record,
                    vec![],
                )
                .unwrap();

                for _ in 0..apply_count {
                    layer.apply_outcome("example.com", &result).await.unwrap();
                }

                let strategies = store.list_strategies("example.com").await.unwrap();
                let updated = strategies.iter().find(|s| s.id == id).unwrap();
                prop_assert_eq!(updated.attempts, 1);
            });
        }
    }
}
