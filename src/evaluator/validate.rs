use crate::models::record::RecordViolation;
use crate::models::{PriceRecord, TargetField};

/// Which optional field a retriable violation implicates, if any. The two
/// required-field violations (`NegativePrice`, `ConfidenceOutOfRange`) stem
/// from the `price` field itself, which has no fallback to drop, so they
/// are not retriable here (spec §4.4 "drop the offending optional field
/// and retry once").
pub fn retriable_field(violation: RecordViolation) -> Option<TargetField> {
    match violation {
        RecordViolation::PixExceedsMargin => Some(TargetField::PixPrice),
        RecordViolation::OldPriceBelowPrice => Some(TargetField::OldPrice),
        RecordViolation::NegativePrice | RecordViolation::ConfidenceOutOfRange => None,
    }
}

/// Clears the optional field implicated by a retriable violation, leaving
/// the rest of the record untouched.
pub fn clear_field(record: &mut PriceRecord, field: TargetField) {
    match field {
        TargetField::PixPrice => record.pix_price = None,
        TargetField::OldPrice => record.old_price = None,
        TargetField::Price | TargetField::Installment | TargetField::Availability => {}
    }
}
