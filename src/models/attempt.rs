use uuid::Uuid;

use crate::models::record::PriceRecord;
use crate::models::strategy::TargetField;

/// Outcome of a single engine attempt (spec §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AttemptOutcome {
    Ok,
    Partial,
    Captcha,
    Blocked,
    NetworkError,
    ExtractionFailed,
}

/// A positive indicator that the target site recognized automation.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum BlockSignal {
    CaptchaIframe(String),
    KnownChallengeUrl(String),
    HttpStatusClass(u16),
    EmptyBody,
    Timeout,
}

/// Per-(strategy, field) outcome, regardless of whether an earlier field in
/// the same attempt already succeeded (spec §4.4: "every attempted
/// (field, strategy) pair yields a success: bool").
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StrategyOutcome {
    pub strategy_id: Uuid,
    pub field: TargetField,
    pub success: bool,
    pub confidence_before: f64,
    pub elapsed_ms: u64,
}

/// Result of one engine invocation for one `MonitoredUrl` (spec §3:
/// `AttemptResult`). Immutable after emission.
#[derive(Clone, Debug, PartialEq)]
pub struct AttemptResult {
    pub url_id: Uuid,
    pub started_at_ms: u64,
    pub finished_at_ms: u64,
    pub outcome: AttemptOutcome,
    pub strategies_tried: Vec<StrategyOutcome>,
    pub record: Option<PriceRecord>,
    pub signals: Vec<BlockSignal>,
}

impl AttemptResult {
    /// Constructs an `AttemptResult`, rejecting shapes that violate spec §3:
    /// - `finished_at >= started_at`
    /// - `outcome=ok` implies a validated `record`
    /// - `strategies_tried` non-empty for `{ok, partial, extraction_failed}`
    pub fn new(
        url_id: Uuid,
        started_at_ms: u64,
        finished_at_ms: u64,
        outcome: AttemptOutcome,
        strategies_tried: Vec<StrategyOutcome>,
        record: Option<PriceRecord>,
        signals: Vec<BlockSignal>,
    ) -> anyhow::Result<Self> {
        if finished_at_ms < started_at_ms {
            anyhow::bail!("finished_at ({finished_at_ms}) precedes started_at ({started_at_ms})");
        }

        if outcome == AttemptOutcome::Ok {
            match &record {
                Some(r) if r.validate().is_ok() => {}
                Some(_) => anyhow::bail!("outcome=ok but record fails validation"),
                None => anyhow::bail!("outcome=ok requires a record"),
            }
        }

        let requires_strategies = matches!(
            outcome,
            AttemptOutcome::Ok | AttemptOutcome::Partial | AttemptOutcome::ExtractionFailed
        );
        if requires_strategies && strategies_tried.is_empty() {
            anyhow::bail!("outcome {outcome:?} requires a non-empty strategies_tried");
        }

        Ok(Self {
            url_id,
            started_at_ms,
            finished_at_ms,
            outcome,
            strategies_tried,
            record,
            signals,
        })
    }

    pub fn is_block(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Captcha | AttemptOutcome::Blocked)
    }
}
