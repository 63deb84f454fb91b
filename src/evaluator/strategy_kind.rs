use regex::Regex;
use scraper::{Html, Selector};

use crate::engine::DomSnapshot;
use crate::models::strategy::{MatchScope, TextMode, Transformation, ValidationRule};
use crate::models::StrategyKind;

/// A matched value before normalization, plus nothing else: normalization
/// and validation happen one layer up so a kind's matcher stays a pure,
/// testable function (spec §9 Design Notes style).
#[derive(Clone, Debug, PartialEq)]
pub struct RawMatch {
    pub text: String,
}

/// Dispatches on the strategy kind tag (spec §4.4 "Kind semantics").
/// Composite recursion is bounded by the shape invariant enforced at
/// `StrategyKind::validate_shape` (spec §9: `MAX_COMPOSITE_DEPTH = 4`).
pub fn matches(kind: &StrategyKind, snapshot: &DomSnapshot) -> Option<RawMatch> {
    match kind {
        StrategyKind::Regex { pattern, group_index, scope } => match_regex(pattern, *group_index, scope, snapshot),
        StrategyKind::Css { selector, attribute, text_mode, context_terms } => {
            match_css(selector, attribute.as_deref(), *text_mode, context_terms, snapshot)
        }
        StrategyKind::Xpath { expression } => match_xpath(expression, snapshot),
        StrategyKind::Semantic { attributes, context_terms, max_distance_chars } => {
            match_semantic(attributes, context_terms, *max_distance_chars, snapshot)
        }
        StrategyKind::Composite { steps, transformation, validation } => match_composite(steps, transformation, validation, snapshot),
    }
}

fn css_text(selector: &str, snapshot: &DomSnapshot) -> Option<String> {
    let doc = Html::parse_document(&snapshot.html);
    let sel = Selector::parse(selector).ok()?;
    let el = doc.select(&sel).next()?;
    Some(el.text().collect::<Vec<_>>().join(""))
}

fn match_regex(pattern: &str, group_index: usize, scope: &MatchScope, snapshot: &DomSnapshot) -> Option<RawMatch> {
    let re = Regex::new(pattern).ok()?;
    let haystack = match scope {
        MatchScope::WholeDocument => snapshot.rendered_text.clone(),
        MatchScope::TextOfSelector(selector) => css_text(selector, snapshot)?,
    };
    let caps = re.captures(&haystack)?;
    let value = caps.get(group_index)?.as_str().to_string();
    Some(RawMatch { text: value })
}

fn match_css(selector: &str, attribute: Option<&str>, _text_mode: TextMode, context_terms: &[String], snapshot: &DomSnapshot) -> Option<RawMatch> {
    let doc = Html::parse_document(&snapshot.html);
    let sel = Selector::parse(selector).ok()?;

    let mut candidates = Vec::new();
    for el in doc.select(&sel) {
        let value = match attribute {
            Some(attr) => match el.value().attr(attr) {
                Some(v) => v.to_string(),
                None => continue,
            },
            None => el.text().collect::<Vec<_>>().join(""),
        };
        if !value.trim().is_empty() {
            candidates.push(value);
        }
    }
    if candidates.is_empty() {
        return None;
    }

    if !context_terms.is_empty() {
        if let Some(best) = candidates.iter().find(|c| context_terms.iter().any(|t| c.contains(t.as_str()))) {
            return Some(RawMatch { text: best.clone() });
        }
    }
    Some(RawMatch { text: candidates.into_iter().next().unwrap() })
}

/// Translates the practical subset of XPath this corpus actually
/// produces (`//tag[@attr='val']`, optionally `/@attr` or `/text()`)
/// into a CSS selector plus an optional attribute to read.
fn xpath_to_css(expression: &str) -> Option<(String, Option<String>)> {
    let expr = expression.trim();

    let (path_part, attr_part) = if let Some(idx) = expr.rfind("/@") {
        (&expr[..idx], Some(expr[idx + 2..].to_string()))
    } else if let Some(stripped) = expr.strip_suffix("/text()") {
        (stripped, None)
    } else {
        (expr, None)
    };

    let path_part = path_part.strip_prefix("//")?;
    let re = Regex::new(r"^([a-zA-Z*][\w-]*)(?:\[@([\w-]+)(?:='([^']*)')?\])?$").ok()?;
    let caps = re.captures(path_part)?;
    let tag = caps.get(1)?.as_str();

    let mut css = tag.to_string();
    if let Some(attr) = caps.get(2) {
        match caps.get(3) {
            Some(val) => css.push_str(&format!("[{}='{}']", attr.as_str(), val.as_str())),
            None => css.push_str(&format!("[{}]", attr.as_str())),
        }
    }
    Some((css, attr_part))
}

fn match_xpath(expression: &str, snapshot: &DomSnapshot) -> Option<RawMatch> {
    let (css, attr) = xpath_to_css(expression)?;
    let doc = Html::parse_document(&snapshot.html);
    let sel = Selector::parse(&css).ok()?;
    let el = doc.select(&sel).next()?;

    let text = match attr {
        Some(a) => el.value().attr(&a)?.to_string(),
        None => el.text().collect::<Vec<_>>().join(""),
    };
    Some(RawMatch { text })
}

fn match_semantic(
    attributes: &[crate::models::strategy::SemanticMatcher],
    context_terms: &[String],
    max_distance_chars: usize,
    snapshot: &DomSnapshot,
) -> Option<RawMatch> {
    let doc = Html::parse_document(&snapshot.html);

    for matcher in attributes {
        let selector_str = match &matcher.value {
            Some(v) => format!("[{}='{}']", matcher.attribute, v),
            None => format!("[{}]", matcher.attribute),
        };
        let Ok(sel) = Selector::parse(&selector_str) else { continue };

        for el in doc.select(&sel) {
            let text = el.text().collect::<Vec<_>>().join("");
            if text.trim().is_empty() {
                continue;
            }
            if context_terms.is_empty() || near_any_context_term(&text, &snapshot.rendered_text, context_terms, max_distance_chars) {
                return Some(RawMatch { text });
            }
        }
    }
    None
}

fn near_any_context_term(needle_text: &str, rendered_text: &str, context_terms: &[String], max_distance_chars: usize) -> bool {
    let Some(pos) = rendered_text.find(needle_text) else {
        return true; // can't locate it in rendered text; don't over-reject
    };
    context_terms.iter().any(|term| {
        rendered_text
            .match_indices(term.as_str())
            .any(|(term_pos, _)| pos.abs_diff(term_pos) <= max_distance_chars)
    })
}

/// Composite pipeline (spec §4.4): steps are tried in order, the first
/// match wins, then the optional transformation/validation apply.
///
/// Simplified from the spec's "threads a current scope" wording: each
/// step matches independently against the full snapshot rather than a
/// narrowed node set carried from the previous step, since `scraper`'s
/// borrowed `ElementRef` can't be threaded across kind-specific matcher
/// functions without a generic scope type this corpus has no use for
/// elsewhere. Recorded in DESIGN.md.
fn match_composite(
    steps: &[StrategyKind],
    transformation: &Option<Transformation>,
    validation: &Option<ValidationRule>,
    snapshot: &DomSnapshot,
) -> Option<RawMatch> {
    let mut result = steps.iter().find_map(|step| matches(step, snapshot))?;

    if let Some(Transformation::ExtractDecimal) = transformation {
        let decimal = crate::evaluator::normalize::extract_decimal(&result.text)?;
        result.text = decimal.to_string();
    }

    if let Some(rule) = validation {
        if !validate_rule(rule, &result.text) {
            return None;
        }
    }

    Some(result)
}

fn validate_rule(rule: &ValidationRule, text: &str) -> bool {
    match rule {
        ValidationRule::NumericRange { min, max } => text.parse::<f64>().is_ok_and(|v| v >= *min && v <= *max),
        // Cross-field relations are re-checked at the record level once all fields resolve.
        ValidationRule::RelatesTo { .. } => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(html: &str) -> DomSnapshot {
        DomSnapshot { html: html.to_string(), rendered_text: html.to_string(), captured_at_ms: 0 }
    }

    #[test]
    fn regex_whole_document_extracts_group() {
        let kind = StrategyKind::Regex {
            pattern: r"R\$\s*(\d+,\d{2})".into(),
            group_index: 1,
            scope: MatchScope::WholeDocument,
        };
        let m = matches(&kind, &snapshot("preco R$ 19,90 a vista")).unwrap();
        assert_eq!(m.text, "19,90");
    }

    #[test]
    fn css_selector_reads_attribute() {
        let kind = StrategyKind::Css {
            selector: "[data-price]".into(),
            attribute: Some("data-price".into()),
            text_mode: TextMode::InnerText,
            context_terms: vec![],
        };
        let m = matches(&kind, &snapshot(r#"<span data-price="19.90">R$ 19,90</span>"#)).unwrap();
        assert_eq!(m.text, "19.90");
    }

    #[test]
    fn xpath_attribute_subset_translates() {
        let kind = StrategyKind::Xpath { expression: "//span[@class='price']/@data-value".into() };
        let m = matches(&kind, &snapshot(r#"<span class="price" data-value="9.99">x</span>"#)).unwrap();
        assert_eq!(m.text, "9.99");
    }

    #[test]
    fn xpath_text_node_subset_translates() {
        let kind = StrategyKind::Xpath { expression: "//div[@id='price']/text()".into() };
        let m = matches(&kind, &snapshot(r#"<div id="price">R$ 9,99</div>"#)).unwrap();
        assert_eq!(m.text, "R$ 9,99");
    }

    #[test]
    fn semantic_matcher_requires_proximity_to_context_term() {
        use crate::models::strategy::SemanticMatcher;
        let kind = StrategyKind::Semantic {
            attributes: vec![SemanticMatcher { attribute: "itemprop".into(), value: Some("price".into()) }],
            context_terms: vec!["R$".into()],
            max_distance_chars: 20,
        };
        let html = r#"<span>R$</span><span itemprop="price">19,90</span>"#;
        let m = matches(&kind, &snapshot(html)).unwrap();
        assert_eq!(m.text, "19,90");
    }

    #[test]
    fn composite_applies_transformation() {
        let kind = StrategyKind::Composite {
            steps: vec![StrategyKind::Css {
                selector: ".price".into(),
                attribute: None,
                text_mode: TextMode::InnerText,
                context_terms: vec![],
            }],
            transformation: Some(Transformation::ExtractDecimal),
            validation: None,
        };
        let m = matches(&kind, &snapshot(r#"<div class="price">R$ 19,90</div>"#)).unwrap();
        assert_eq!(m.text, "19.90");
    }
}
