use rust_decimal::Decimal;
use uuid::Uuid;

/// Availability state of a monitored product (spec §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Availability {
    InStock,
    LowStock,
    OutOfStock,
    PreOrder,
    Unknown,
}

/// One installment plan offered alongside the price.
///
/// Resolves Open Question 1 (spec §9): `installment` is an opaque ordered
/// list of plans rather than a single structure, matching what the source
/// data actually carries.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct InstallmentPlan {
    pub value: Decimal,
    pub times: u32,
    pub interest_flag: bool,
}

/// A validated price record produced by a single successful attempt
/// (spec §3: `PriceRecord`). Written once, never mutated.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PriceRecord {
    pub url_id: Uuid,
    pub checked_at_ms: u64,
    pub price: Decimal,
    pub old_price: Option<Decimal>,
    pub pix_price: Option<Decimal>,
    pub installment: Vec<InstallmentPlan>,
    pub availability: Availability,
    pub availability_text: Option<String>,
    pub seller: Option<String>,
    pub promotion_labels: Vec<String>,
    pub promotion_end_ms: Option<u64>,
    pub extraction_strategy_id: Uuid,
    pub extraction_confidence: f64,
}

/// A relation violated by `PriceRecord::validate`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordViolation {
    NegativePrice,
    PixExceedsMargin,
    OldPriceBelowPrice,
    ConfidenceOutOfRange,
}

impl PriceRecord {
    /// Checks the invariants in spec §3:
    /// - `price >= 0`
    /// - `pix_price <= price * 1.05` if set
    /// - `old_price >= price` if set
    /// - `extraction_confidence` in `[0, 1]`
    pub fn validate(&self) -> Result<(), RecordViolation> {
        if self.price.is_sign_negative() {
            return Err(RecordViolation::NegativePrice);
        }

        if let Some(pix) = self.pix_price {
            let margin = self.price * Decimal::new(105, 2);
            if pix > margin {
                return Err(RecordViolation::PixExceedsMargin);
            }
        }

        if let Some(old) = self.old_price {
            if old < self.price {
                return Err(RecordViolation::OldPriceBelowPrice);
            }
        }

        if !(0.0..=1.0).contains(&self.extraction_confidence) {
            return Err(RecordViolation::ConfidenceOutOfRange);
        }

        Ok(())
    }
}


#[cfg(test)]
mod proptests {
    use super::tests::base;
    use super::*;
    use proptest::prelude::*;

    proptest! {
        // Invariant 6 (spec §8): validate() accepts a record iff price >= 0,
        // pix <= price*1.05 (if set), old_price >= price (if set), and
        // confidence is in [0, 1] -- and rejects it otherwise.
        #[test]
        fn validate_matches_the_stated_relations(
            price_cents in -10_000i64..1_000_000,
            pix_cents in prop::option::of(-10_000i64..1_000_000),
            old_cents in prop::option::of(-10_000i64..1_000_000),
            confidence in -1.0f64..2.0,
        ) {
            let mut r = base(Decimal::new(price_cents, 2));
            r.pix_price = pix_cents.map(|c| Decimal::new(c, 2));
            r.old_price = old_cents.map(|c| Decimal::new(c, 2));
            r.extraction_confidence = confidence;

            let expect_valid = price_cents >= 0
                && pix_cents.map_or(true, |c| Decimal::new(c, 2) <= Decimal::new(price_cents, 2) * Decimal::new(105, 2))
                && old_cents.map_or(true, |c| Decimal::new(c, 2) >= Decimal::new(price_cents, 2))
                && (0.0..=1.0).contains(&confidence);

            prop_assert_eq!(r.validate().is_ok(), expect_valid);
        }
    }
}
