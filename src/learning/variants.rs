use uuid::Uuid;

use crate::models::strategy::{MatchScope, TextMode};
use crate::models::{Strategy, StrategyKind};

/// Minimum parent attempts before it's eligible for variant generation
/// (spec §4.5: "reaches c > 0.8 after ≥ 10 attempts").
const MIN_PARENT_ATTEMPTS: u64 = 10;
const CONFIDENCE_TRIGGER: f64 = 0.8;
/// Children start at half the parent's confidence and are on probation.
const CHILD_CONFIDENCE_FACTOR: f64 = 0.5;
/// Probation window and confidence floor (spec §4.5: "if after 5 attempts
/// confidence < 0.2, immediately retire").
pub const PROBATION_ATTEMPTS: u64 = 5;
pub const PROBATION_CONFIDENCE_FLOOR: f64 = 0.2;

/// Whether `parent` has earned a confidence-threshold variant pass. The
/// `variant_every`-attempts periodic trigger is a domain-wide counter the
/// caller tracks separately; this only covers the per-strategy condition.
pub fn confidence_trigger(parent: &Strategy, has_existing_variant: bool) -> bool {
    parent.attempts >= MIN_PARENT_ATTEMPTS && parent.confidence > CONFIDENCE_TRIGGER && !has_existing_variant
}

/// A strategy on probation that has failed to earn its keep.
pub fn should_retire_probationary_child(child: &Strategy) -> bool {
    child.parent_id.is_some() && child.attempts >= PROBATION_ATTEMPTS && child.confidence < PROBATION_CONFIDENCE_FLOOR
}

fn child_of(parent: &Strategy, kind: StrategyKind) -> Strategy {
    Strategy {
        id: Uuid::new_v4(),
        domain: parent.domain.clone(),
        target_field: parent.target_field,
        kind,
        confidence: parent.confidence * CHILD_CONFIDENCE_FACTOR,
        priority: parent.priority + 1,
        attempts: 0,
        successes: 0,
        last_success_ms: None,
        sample_urls: parent.sample_urls.clone(),
        parent_id: Some(parent.id),
    }
}

/// Produces up to `fanout` mutated children of `parent`'s `kind` (spec
/// §4.5). The mutation rule depends on the kind; composite mutates one
/// step in place via the same rule, recursively.
pub fn generate_variants(parent: &Strategy, fanout: usize) -> Vec<Strategy> {
    mutate_kind(&parent.kind).into_iter().take(fanout).map(|kind| child_of(parent, kind)).collect()
}

fn mutate_kind(kind: &StrategyKind) -> Vec<StrategyKind> {
    match kind {
        StrategyKind::Css { selector, attribute, text_mode, context_terms } => {
            mutate_css(selector, attribute, *text_mode, context_terms)
        }
        StrategyKind::Xpath { expression } => mutate_xpath(expression),
        StrategyKind::Regex { pattern, group_index, scope } => mutate_regex(pattern, *group_index, scope),
        StrategyKind::Semantic { .. } => Vec::new(),
        StrategyKind::Composite { steps, transformation, validation } => mutate_composite(steps, transformation, validation),
    }
}

fn mutate_css(selector: &str, attribute: &Option<String>, text_mode: TextMode, context_terms: &[String]) -> Vec<StrategyKind> {
    let mut out = Vec::new();

    if let Some(widened) = drop_last_qualifier(selector) {
        out.push(StrategyKind::Css {
            selector: widened,
            attribute: attribute.clone(),
            text_mode,
            context_terms: context_terms.to_vec(),
        });
    }

    out.push(StrategyKind::Css {
        selector: format!("{selector}[data-price]"),
        attribute: attribute.clone(),
        text_mode,
        context_terms: context_terms.to_vec(),
    });

    out.push(StrategyKind::Css {
        selector: format!("main {selector}"),
        attribute: attribute.clone(),
        text_mode,
        context_terms: context_terms.to_vec(),
    });

    out
}

/// Drops the last `.class`/`#id`/`[attr]` qualifier from a selector, or
/// `None` if there's nothing left to drop.
fn drop_last_qualifier(selector: &str) -> Option<String> {
    let cut = selector.rfind(['.', '#', '[']).filter(|&idx| idx > 0)?;
    Some(selector[..cut].to_string())
}

fn mutate_xpath(expression: &str) -> Vec<StrategyKind> {
    vec![
        StrategyKind::Xpath { expression: strip_last_predicate(expression).unwrap_or_else(|| expression.to_string()) },
        StrategyKind::Xpath { expression: format!("{expression}[1]") },
        StrategyKind::Xpath { expression: format!("//div{expression}") },
    ]
}

fn strip_last_predicate(expression: &str) -> Option<String> {
    let open = expression.rfind('[')?;
    let close = expression.rfind(']')?;
    if close < open {
        return None;
    }
    let mut out = expression.to_string();
    out.replace_range(open..=close, "");
    Some(out)
}

fn mutate_regex(pattern: &str, group_index: usize, scope: &MatchScope) -> Vec<StrategyKind> {
    let mut out = Vec::new();

    out.push(StrategyKind::Regex {
        pattern: pattern.replace(' ', r"\s*"),
        group_index,
        scope: scope.clone(),
    });

    if pattern.contains(',') && !pattern.contains("[.,]") {
        out.push(StrategyKind::Regex { pattern: pattern.replace(',', "[.,]"), group_index, scope: scope.clone() });
    }
    if pattern.contains("[.,]") {
        out.push(StrategyKind::Regex { pattern: pattern.replace("[.,]", ","), group_index, scope: scope.clone() });
    }

    out
}

fn mutate_composite(steps: &[StrategyKind], transformation: &Option<crate::models::strategy::Transformation>, validation: &Option<crate::models::strategy::ValidationRule>) -> Vec<StrategyKind> {
    let Some(first) = steps.first() else { return Vec::new() };

    mutate_kind(first)
        .into_iter()
        .map(|mutated_first| {
            let mut new_steps = steps.to_vec();
            new_steps[0] = mutated_first;
            StrategyKind::Composite { steps: new_steps, transformation: transformation.clone(), validation: validation.clone() }
        })
        .collect()
}
