use uuid::Uuid;

/// Upper bound on composite nesting depth (spec §9 Design Notes: "bound
/// depth at 4 to prevent pathological nesting").
pub const MAX_COMPOSITE_DEPTH: u32 = 4;

/// Field a strategy is responsible for extracting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum TargetField {
    Price,
    OldPrice,
    PixPrice,
    Installment,
    Availability,
}

/// Where a regex strategy looks for its match.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum MatchScope {
    WholeDocument,
    TextOfSelector(String),
}

/// `text_mode` for CSS strategies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TextMode {
    InnerText,
    TextContent,
}

/// A semantic attribute matcher, e.g. `data-price` or `itemprop=price`.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SemanticMatcher {
    pub attribute: String,
    pub value: Option<String>,
}

/// An optional final step applied to a composite pipeline's collected value.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Transformation {
    ExtractDecimal,
}

/// An optional final validation applied to a composite pipeline's result.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ValidationRule {
    NumericRange { min: f64, max: f64 },
    RelatesTo { other: TargetField },
}

/// Tagged variant over strategy kinds (spec §9 Design Notes: "model
/// strategies as a tagged variant over {regex, xpath, css, semantic,
/// composite}; the evaluator dispatches on the tag").
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum StrategyKind {
    Regex {
        pattern: String,
        group_index: usize,
        scope: MatchScope,
    },
    Xpath {
        expression: String,
    },
    Css {
        selector: String,
        attribute: Option<String>,
        text_mode: TextMode,
        context_terms: Vec<String>,
    },
    Semantic {
        attributes: Vec<SemanticMatcher>,
        context_terms: Vec<String>,
        max_distance_chars: usize,
    },
    Composite {
        steps: Vec<StrategyKind>,
        transformation: Option<Transformation>,
        validation: Option<ValidationRule>,
    },
}

impl StrategyKind {
    /// Nesting depth of this kind (1 for a leaf, 1 + max(child depth) for
    /// a composite).
    pub fn depth(&self) -> u32 {
        match self {
            StrategyKind::Composite { steps, .. } => {
                1 + steps.iter().map(StrategyKind::depth).max().unwrap_or(0)
            }
            _ => 1,
        }
    }

    /// Validates the `composite.steps non-empty` invariant and the depth
    /// bound, recursively.
    pub fn validate_shape(&self) -> anyhow::Result<()> {
        if self.depth() > MAX_COMPOSITE_DEPTH {
            anyhow::bail!(
                "composite strategy nests {} deep, exceeds MAX_COMPOSITE_DEPTH={}",
                self.depth(),
                MAX_COMPOSITE_DEPTH
            );
        }
        if let StrategyKind::Composite { steps, .. } = self {
            if steps.is_empty() {
                anyhow::bail!("composite strategy must have at least one step");
            }
            for s in steps {
                s.validate_shape()?;
            }
        }
        Ok(())
    }
}

/// A single extraction strategy (spec §3: `Strategy`).
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Strategy {
    pub id: Uuid,
    /// Domain this strategy applies to, or `"*"` for a generic starter.
    pub domain: String,
    pub target_field: TargetField,
    pub kind: StrategyKind,
    pub confidence: f64,
    /// Lower is evaluated earlier.
    pub priority: i64,
    pub attempts: u64,
    pub successes: u64,
    pub last_success_ms: Option<u64>,
    pub sample_urls: Vec<String>,
    pub parent_id: Option<Uuid>,
}

impl Strategy {
    pub fn is_generic(&self) -> bool {
        self.domain == "*"
    }

    /// `attempts >= successes` invariant (spec §3).
    pub fn invariants_hold(&self) -> bool {
        self.attempts >= self.successes
            && (0.0..=1.0).contains(&self.confidence)
            && self.kind.validate_shape().is_ok()
    }

    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.successes as f64 / self.attempts as f64
        }
    }

    /// Whether this strategy should be retired (spec §3/§4.5).
    pub fn should_retire(&self, retire_confidence: f64, retire_min_attempts: u32) -> bool {
        self.confidence < retire_confidence && self.attempts > retire_min_attempts as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf() -> StrategyKind {
        StrategyKind::Regex {
            pattern: r"R\$\s*\d+[.,]\d{2}".into(),
            group_index: 0,
            scope: MatchScope::WholeDocument,
        }
    }

    #[test]
    fn leaf_depth_is_one() {
        assert_eq!(leaf().depth(), 1);
    }

    #[test]
    fn composite_depth_accumulates() {
        let nested = StrategyKind::Composite {
            steps: vec![StrategyKind::Composite {
                steps: vec![leaf()],
                transformation: None,
                validation: None,
            }],
            transformation: None,
            validation: None,
        };
        assert_eq!(nested.depth(), 3);
    }

    #[test]
    fn composite_beyond_max_depth_is_rejected() {
        let mut k = leaf();
        for _ in 0..MAX_COMPOSITE_DEPTH {
            k = StrategyKind::Composite {
                steps: vec![k],
                transformation: None,
                validation: None,
            };
        }
        assert!(k.validate_shape().is_err());
    }

    #[test]
    fn empty_composite_steps_is_rejected() {
        let k = StrategyKind::Composite {
            steps: vec![],
            transformation: None,
            validation: None,
        };
        assert!(k.validate_shape().is_err());
    }

    fn mk_strategy(confidence: f64, attempts: u64, successes: u64) -> Strategy {
        Strategy {
            id: Uuid::new_v4(),
            domain: "example.com".into(),
            target_field: TargetField::Price,
            kind: leaf(),
            confidence,
            priority: 0,
            attempts,
            successes,
            last_success_ms: None,
            sample_urls: vec![],
            parent_id: None,
        }
    }

    #[test]
    fn retirement_requires_both_low_confidence_and_enough_attempts() {
        let s = mk_strategy(0.05, 21, 0);
        assert!(s.should_retire(0.1, 20));

        let not_enough_attempts = mk_strategy(0.05, 20, 0);
        assert!(!not_enough_attempts.should_retire(0.1, 20));

        let confident_enough = mk_strategy(0.2, 100, 0);
        assert!(!confident_enough.should_retire(0.1, 20));
    }

    #[test]
    fn success_rate_handles_zero_attempts() {
        let s = mk_strategy(0.5, 0, 0);
        assert_eq!(s.success_rate(), 0.0);
    }
}
