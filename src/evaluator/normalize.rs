use std::str::FromStr;

use regex::Regex;
use rust_decimal::Decimal;

use crate::models::Availability;

/// Extracts the first decimal number from `text`, handling both the
/// Brazilian `1.234,56` style and the plain `1234.56`/`1234` style.
/// Fails (returns `None`) rather than guessing on an ambiguous separator,
/// the same "narrow or fail, never silently truncate" discipline as the
/// store's numeric-safety helpers.
pub fn extract_decimal(text: &str) -> Option<Decimal> {
    let pattern = Regex::new(r"\d{1,3}(?:\.\d{3})*,\d{2}|\d+\.\d{2}|\d+,\d{2}|\d+").ok()?;
    let raw = pattern.find(text)?.as_str();
    normalize_numeral(raw)
}

fn normalize_numeral(raw: &str) -> Option<Decimal> {
    if raw.contains(',') {
        let cleaned = raw.replace('.', "").replace(',', ".");
        Decimal::from_str(&cleaned).ok()
    } else {
        Decimal::from_str(raw).ok()
    }
}

/// Maps common availability phrasing (Portuguese and English) to
/// `Availability`. Returns `None` on unrecognized text so the caller can
/// treat it as a non-match and fall through to the next strategy.
pub fn availability_from_text(text: &str) -> Option<Availability> {
    let lower = text.to_lowercase();
    if lower.contains("indispon") || lower.contains("esgotado") || lower.contains("out of stock") || lower.contains("sold out") {
        Some(Availability::OutOfStock)
    } else if lower.contains("últimas unidades") || lower.contains("poucas unidades") || lower.contains("low stock") {
        Some(Availability::LowStock)
    } else if lower.contains("pré-venda") || lower.contains("pre-order") || lower.contains("em breve") {
        Some(Availability::PreOrder)
    } else if lower.contains("em estoque") || lower.contains("dispon") || lower.contains("in stock") || lower.contains("available") {
        Some(Availability::InStock)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_brl_style_decimal() {
        assert_eq!(extract_decimal("R$ 1.234,56 à vista"), Some(Decimal::new(123456, 2)));
    }

    #[test]
    fn extracts_plain_decimal() {
        assert_eq!(extract_decimal("total: 19.90 USD"), Some(Decimal::new(1990, 2)));
    }

    #[test]
    fn no_digits_is_a_non_match() {
        assert_eq!(extract_decimal("unavailable"), None);
    }

    #[test]
    fn maps_out_of_stock_phrasing() {
        assert_eq!(availability_from_text("Produto indisponível"), Some(Availability::OutOfStock));
    }

    #[test]
    fn maps_in_stock_phrasing() {
        assert_eq!(availability_from_text("Em estoque"), Some(Availability::InStock));
    }

    #[test]
    fn unrecognized_text_is_none() {
        assert_eq!(availability_from_text("lorem ipsum"), None);
    }
}
