pub mod normalize;
pub mod strategy_kind;
pub mod validate;

use std::str::FromStr;

use regex::Regex;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::engine::DomSnapshot;
use crate::models::{Availability, InstallmentPlan, PriceRecord, Strategy, StrategyOutcome, TargetField};

/// A strategy that produced a value, paired with the text it read.
struct FieldMatch {
    strategy: Strategy,
    raw: strategy_kind::RawMatch,
}

/// Strategies targeting `field`, ordered the way spec §4.4 resolves ties:
/// lower `priority` first, then higher `confidence`, then `id` for a
/// total, deterministic order.
fn candidates_for(strategies: &[Strategy], field: TargetField) -> Vec<&Strategy> {
    let mut out: Vec<&Strategy> = strategies.iter().filter(|s| s.target_field == field).collect();
    out.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal))
            .then_with(|| a.id.cmp(&b.id))
    });
    out
}

/// Tries each candidate strategy for `field` in resolution order, first
/// match wins. Every attempted strategy is recorded in `outcomes`
/// regardless of the eventual winner (spec §4.4: "every attempted
/// (field, strategy) pair yields a success: bool").
fn resolve_field(
    strategies: &[Strategy],
    field: TargetField,
    snapshot: &DomSnapshot,
    now_ms: u64,
    outcomes: &mut Vec<StrategyOutcome>,
) -> Option<FieldMatch> {
    resolve_field_excluding(strategies, field, snapshot, now_ms, outcomes, None)
}

/// Same as `resolve_field`, but skips a single strategy id. Used by the
/// cross-field retry (spec §4.4) to re-resolve a field after discarding
/// the strategy that produced an invalid value.
fn resolve_field_excluding(
    strategies: &[Strategy],
    field: TargetField,
    snapshot: &DomSnapshot,
    now_ms: u64,
    outcomes: &mut Vec<StrategyOutcome>,
    exclude: Option<Uuid>,
) -> Option<FieldMatch> {
    let mut winner = None;
    for strategy in candidates_for(strategies, field) {
        if Some(strategy.id) == exclude {
            continue;
        }
        let started = now_ms;
        let raw = strategy_kind::matches(&strategy.kind, snapshot);
        let success = raw.is_some();
        outcomes.push(StrategyOutcome {
            strategy_id: strategy.id,
            field,
            success,
            confidence_before: strategy.confidence,
            elapsed_ms: now_ms.saturating_sub(started),
        });
        if let Some(raw) = raw {
            winner = Some(FieldMatch { strategy: strategy.clone(), raw });
            break;
        }
    }
    winner
}

/// Parses installment-plan phrasing such as `"12x de R$ 19,90 sem juros"`
/// into `InstallmentPlan` entries. A document can advertise more than one
/// plan (e.g. a debit vs. credit breakdown); each match on the pattern
/// yields one entry.
fn parse_installment(text: &str) -> Vec<InstallmentPlan> {
    let Ok(pattern) = Regex::new(r"(\d{1,2})\s*x\s*(?:de)?\s*R?\$?\s*(\d{1,3}(?:\.\d{3})*,\d{2}|\d+[.,]\d{2})") else {
        return vec![];
    };
    let lower = text.to_lowercase();

    pattern
        .captures_iter(text)
        .filter_map(|caps| {
            let times: u32 = caps.get(1)?.as_str().parse().ok()?;
            let raw_value = caps.get(2)?.as_str();
            let cleaned = if raw_value.contains(',') {
                raw_value.replace('.', "").replace(',', ".")
            } else {
                raw_value.to_string()
            };
            let value = Decimal::from_str(&cleaned).ok()?;
            let interest_flag = !lower.contains("sem juros");
            Some(InstallmentPlan { value, times, interest_flag })
        })
        .collect()
}

/// Evaluates every strategy against `snapshot` and builds a `PriceRecord`
/// if the required `price` field resolves (spec §4.4). Returns every
/// attempted `(field, strategy)` outcome alongside the record, whether or
/// not the record ultimately validates, and whether the record is
/// "degraded": an optional field had to be dropped or re-resolved because
/// its first value violated a cross-field relation (spec §8 scenario 3).
pub fn evaluate_domain(
    url_id: Uuid,
    snapshot: &DomSnapshot,
    strategies: &[Strategy],
    now_ms: u64,
) -> (Option<PriceRecord>, Vec<StrategyOutcome>, bool) {
    let mut outcomes = Vec::new();
    let mut degraded = false;

    let Some(price_match) = resolve_field(strategies, TargetField::Price, snapshot, now_ms, &mut outcomes) else {
        return (None, outcomes, degraded);
    };
    let Some(price) = normalize::extract_decimal(&price_match.raw.text) else {
        return (None, outcomes, degraded);
    };

    let old_price_match = resolve_field(strategies, TargetField::OldPrice, snapshot, now_ms, &mut outcomes);
    let old_price = old_price_match.as_ref().and_then(|m| normalize::extract_decimal(&m.raw.text));

    let pix_match = resolve_field(strategies, TargetField::PixPrice, snapshot, now_ms, &mut outcomes);
    let pix_price = pix_match.as_ref().and_then(|m| normalize::extract_decimal(&m.raw.text));

    let availability_match = resolve_field(strategies, TargetField::Availability, snapshot, now_ms, &mut outcomes);
    let availability_text = availability_match.as_ref().map(|m| m.raw.text.clone());
    let availability = availability_text
        .as_deref()
        .and_then(normalize::availability_from_text)
        .unwrap_or(Availability::Unknown);

    let installment_match = resolve_field(strategies, TargetField::Installment, snapshot, now_ms, &mut outcomes);
    let installment = installment_match.as_ref().map(|m| parse_installment(&m.raw.text)).unwrap_or_default();

    let mut record = PriceRecord {
        url_id,
        checked_at_ms: now_ms,
        price,
        old_price,
        pix_price,
        installment,
        availability,
        availability_text,
        seller: None,
        promotion_labels: vec![],
        promotion_end_ms: None,
        extraction_strategy_id: price_match.strategy.id,
        extraction_confidence: price_match.strategy.confidence,
    };

    let mut retried = std::collections::HashSet::new();
    let mut excluded: std::collections::HashMap<TargetField, Uuid> = std::collections::HashMap::new();
    if let Some(m) = &old_price_match {
        excluded.insert(TargetField::OldPrice, m.strategy.id);
    }
    if let Some(m) = &pix_match {
        excluded.insert(TargetField::PixPrice, m.strategy.id);
    }

    while let Err(violation) = record.validate() {
        let Some(field) = validate::retriable_field(violation) else {
            return (None, outcomes, degraded);
        };
        degraded = true;
        if !retried.insert(field) {
            validate::clear_field(&mut record, field);
            break;
        }

        let exclude = excluded.get(&field).copied();
        // The strategy that produced the offending value is penalized once,
        // even though its own match succeeded (spec §8 scenario 3).
        if let Some(offender) = exclude {
            if let Some(o) = outcomes.iter_mut().find(|o| o.field == field && o.strategy_id == offender) {
                o.success = false;
            }
        }
        let retry = resolve_field_excluding(strategies, field, snapshot, now_ms, &mut outcomes, exclude);
        match retry {
            Some(m) => {
                let value = normalize::extract_decimal(&m.raw.text);
                match field {
                    TargetField::OldPrice => record.old_price = value,
                    TargetField::PixPrice => record.pix_price = value,
                    _ => {}
                }
            }
            None => validate::clear_field(&mut record, field),
        }
    }

    (Some(record), outcomes, degraded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::strategy::{MatchScope, StrategyKind, TextMode};

    fn snapshot(html: &str) -> DomSnapshot {
        DomSnapshot { html: html.to_string(), rendered_text: html.to_string(), captured_at_ms: 0 }
    }

    fn strategy(field: TargetField, kind: StrategyKind, priority: i64) -> Strategy {
        Strategy {
            id: Uuid::new_v4(),
            domain: "example.com".into(),
            target_field: field,
            kind,
            confidence: 0.8,
            priority,
            attempts: 10,
            successes: 8,
            last_success_ms: None,
            sample_urls: vec![],
            parent_id: None,
        }
    }

    fn css(selector: &str) -> StrategyKind {
        StrategyKind::Css { selector: selector.into(), attribute: None, text_mode: TextMode::InnerText, context_terms: vec![] }
    }

    #[test]
    fn resolves_price_and_builds_valid_record() {
        let html = r#"<span class="price">R$ 19,90</span>"#;
        let strategies = vec![strategy(TargetField::Price, css(".price"), 0)];
        let (record, outcomes, degraded) = evaluate_domain(Uuid::new_v4(), &snapshot(html), &strategies, 1_000);
        let record = record.expect("price resolves");
        assert_eq!(record.price, rust_decimal::Decimal::new(1990, 2));
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].success);
        assert!(!degraded);
    }

    #[test]
    fn missing_price_yields_no_record() {
        let strategies = vec![strategy(TargetField::Price, css(".price"), 0)];
        let (record, outcomes, degraded) = evaluate_domain(Uuid::new_v4(), &snapshot("<div></div>"), &strategies, 1_000);
        assert!(record.is_none());
        assert_eq!(outcomes.len(), 1);
        assert!(!outcomes[0].success);
        assert!(!degraded);
    }

    #[test]
    fn lower_priority_strategy_wins_over_higher() {
        let html = r#"<span class="a">R$ 10,00</span><span class="b">R$ 20,00</span>"#;
        let strategies = vec![
            strategy(TargetField::Price, css(".b"), 5),
            strategy(TargetField::Price, css(".a"), 0),
        ];
        let (record, outcomes, _) = evaluate_domain(Uuid::new_v4(), &snapshot(html), &strategies, 1_000);
        assert_eq!(record.unwrap().price, rust_decimal::Decimal::new(1000, 2));
        assert_eq!(outcomes.len(), 1, "second candidate is never tried once the first wins");
    }

    #[test]
    fn cross_field_retry_drops_old_price_when_below_price() {
        let html = r#"<span class="price">R$ 50,00</span><span class="old">R$ 10,00</span>"#;
        let strategies = vec![
            strategy(TargetField::Price, css(".price"), 0),
            strategy(TargetField::OldPrice, css(".old"), 0),
        ];
        let (record, _, degraded) = evaluate_domain(Uuid::new_v4(), &snapshot(html), &strategies, 1_000);
        let record = record.expect("price still resolves");
        assert_eq!(record.old_price, None);
        assert!(record.validate().is_ok());
        assert!(degraded, "record needed a cross-field correction");
    }

    #[test]
    fn cross_field_retry_penalizes_offending_pix_strategy_once() {
        let html = r#"<span class="price">R$ 100,00</span><span class="pix">R$ 110,00</span>"#;
        let strategies = vec![
            strategy(TargetField::Price, css(".price"), 0),
            strategy(TargetField::PixPrice, css(".pix"), 0),
        ];
        let (record, outcomes, degraded) = evaluate_domain(Uuid::new_v4(), &snapshot(html), &strategies, 1_000);
        let record = record.expect("price still resolves");
        assert_eq!(record.pix_price, None, "pix dropped: no fallback candidate exists");
        assert!(record.validate().is_ok());
        assert!(degraded);

        let pix_outcome = outcomes.iter().find(|o| o.field == TargetField::PixPrice).expect("pix was attempted");
        assert!(!pix_outcome.success, "offending pix strategy is penalized once it invalidates the record");
    }

    #[test]
    fn availability_text_maps_to_enum() {
        let html = r#"<span class="price">R$ 9,90</span><span class="avail">Em estoque</span>"#;
        let strategies = vec![
            strategy(TargetField::Price, css(".price"), 0),
            strategy(TargetField::Availability, css(".avail"), 0),
        ];
        let (record, _, _) = evaluate_domain(Uuid::new_v4(), &snapshot(html), &strategies, 1_000);
        assert_eq!(record.unwrap().availability, Availability::InStock);
    }

    #[test]
    fn installment_text_parses_into_plans() {
        let text = "12x de R$ 19,90 sem juros";
        let plans = parse_installment(text);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].times, 12);
        assert_eq!(plans[0].value, rust_decimal::Decimal::new(1990, 2));
        assert!(!plans[0].interest_flag);
    }
}
