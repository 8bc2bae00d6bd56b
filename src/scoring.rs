//! Confidence scoring.
//!
//! A [`Scorer`] turns one attempt into a trust score in `0.0..=1.0`. The
//! controller accepts an attempt only when it validates *and* its score is
//! at or above the policy threshold.
//!
//! ## Built-in scorers
//!
//! | Scorer                  | Use for                                   |
//! |-------------------------|-------------------------------------------|
//! | [`FieldPresenceScorer`] | structured (JSON) extraction/classification |
//! | [`TextHeuristicScorer`] | free-text generation (emails, replies)    |
//! | [`FixedScorer`]         | policies that rely on validators alone    |
//!
//! Every scorer is pure: no I/O, no interior state, never panics, never
//! returns a value outside `[0, 1]` (NaN maps to `0.0`).

use serde_json::Value;

use crate::task::{AttemptResult, OutputShape, TaskRequest};
use crate::validation::{extract_json, lookup_path};

/// Starting point for heuristic scorers.
const BASELINE: f64 = 0.5;

/// Score given to structured output that cannot be parsed at all.
const UNPARSEABLE_SCORE: f64 = 0.1;

/// Trust score for one attempt.
pub trait Scorer: Send + Sync {
    /// Score `attempt`, produced for `request`, in `[0, 1]`.
    fn score(&self, attempt: &AttemptResult, request: &TaskRequest) -> f64;
}

/// Per-signal contributions behind a [`FieldPresenceScorer`] score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreBreakdown {
    /// Starting value.
    pub baseline: f64,
    /// Sum of weights of the expected fields that were present.
    pub field_bonus: f64,
    /// Model's own confidence, clamped, if it reported one.
    pub self_reported: Option<f64>,
    /// Final clamped score.
    pub total: f64,
}

/// Scores JSON output by which expected fields it fills in.
///
/// Starts at 0.5, adds each present field's weight, then optionally blends
/// in a confidence value the model reported about itself.
///
/// # Example
///
/// ```rust
/// use escalation_orchestrator::FieldPresenceScorer;
/// let scorer = FieldPresenceScorer::new()
///     .expect_field("date", 0.2)
///     .expect_field("venue", 0.2)
///     .with_self_report("confidence", 0.5);
/// # let _ = scorer;
/// ```
#[derive(Debug, Clone, Default)]
pub struct FieldPresenceScorer {
    fields: Vec<(String, f64)>,
    self_report: Option<(String, f64)>,
}

impl FieldPresenceScorer {
    /// Scorer with no expected fields: valid JSON scores the baseline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `weight` when `field` (dotted path) is present and non-empty.
    pub fn expect_field(mut self, field: impl Into<String>, weight: f64) -> Self {
        self.fields.push((field.into(), weight));
        self
    }

    /// Blend the model's self-reported confidence from `field` into the
    /// score with the given weight in `[0, 1]`.
    pub fn with_self_report(mut self, field: impl Into<String>, weight: f64) -> Self {
        self.self_report = Some((field.into(), weight.clamp(0.0, 1.0)));
        self
    }

    /// Explain how a score was reached.
    ///
    /// Returns `None` when the content is not parseable JSON.
    pub fn breakdown(&self, attempt: &AttemptResult) -> Option<ScoreBreakdown> {
        let doc = extract_json(&attempt.content)?;

        let field_bonus: f64 = self
            .fields
            .iter()
            .filter(|(path, _)| lookup_path(&doc, path).is_some_and(is_filled))
            .map(|(_, weight)| *weight)
            .sum();

        let mut total = clamp_score(BASELINE + field_bonus);

        let self_reported = self.self_report.as_ref().and_then(|(path, weight)| {
            let reported = lookup_path(&doc, path).and_then(as_number)?;
            let reported = clamp_score(reported);
            total = clamp_score((1.0 - weight) * total + weight * reported);
            Some(reported)
        });

        Some(ScoreBreakdown {
            baseline: BASELINE,
            field_bonus,
            self_reported,
            total,
        })
    }
}

impl Scorer for FieldPresenceScorer {
    fn score(&self, attempt: &AttemptResult, _request: &TaskRequest) -> f64 {
        if attempt.content.trim().is_empty() {
            return 0.0;
        }
        self.breakdown(attempt)
            .map_or(UNPARSEABLE_SCORE, |b| b.total)
    }
}

/// Heuristic trust score for prose.
///
/// ## Signals
///
/// 1. **Empty output** → `0.0`, nothing else considered
/// 2. **Length** — at least `min_words` words → +0.3
/// 3. **Completeness** — ends in terminal punctuation → +0.1
/// 4. **Hedging** — each hedging phrase ("i'm not sure", …) → −0.15
/// 5. **Wrong shape** — JSON was requested but none came back → capped at 0.1
#[derive(Debug, Clone)]
pub struct TextHeuristicScorer {
    min_words: usize,
}

impl TextHeuristicScorer {
    /// Scorer with a 20-word length floor.
    pub fn new() -> Self {
        Self { min_words: 20 }
    }

    /// Scorer with a custom length floor.
    pub fn with_min_words(min_words: usize) -> Self {
        Self { min_words }
    }
}

impl Default for TextHeuristicScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl Scorer for TextHeuristicScorer {
    fn score(&self, attempt: &AttemptResult, request: &TaskRequest) -> f64 {
        let text = attempt.content.trim();
        if text.is_empty() {
            return 0.0;
        }

        if request.shape == OutputShape::Structured && extract_json(text).is_none() {
            return UNPARSEABLE_SCORE;
        }

        let mut total = BASELINE;

        if text.split_whitespace().count() >= self.min_words {
            total += 0.3;
        }

        if text.ends_with(['.', '!', '?']) {
            total += 0.1;
        }

        let lower = text.to_lowercase();
        let hedges = HEDGING_PHRASES
            .iter()
            .filter(|phrase| lower.contains(*phrase))
            .count();
        total -= 0.15 * hedges as f64;

        clamp_score(total)
    }
}

/// Phrases that signal the model is unsure of its own answer.
const HEDGING_PHRASES: [&str; 8] = [
    "i'm not sure",
    "i am not sure",
    "i don't know",
    "i'm uncertain",
    "it's unclear",
    "i cannot determine",
    "i can't determine",
    "i may be wrong",
];

/// Constant score, for policies that rely on validators alone.
#[derive(Debug, Clone, Copy)]
pub struct FixedScorer {
    value: f64,
}

impl FixedScorer {
    /// Always return `value`, clamped to `[0, 1]`.
    pub fn new(value: f64) -> Self {
        Self {
            value: clamp_score(value),
        }
    }
}

impl Scorer for FixedScorer {
    fn score(&self, _attempt: &AttemptResult, _request: &TaskRequest) -> f64 {
        self.value
    }
}

// ── Helpers ────────────────────────────────────────────────────────────

/// Clamp into `[0, 1]`; NaN becomes `0.0`.
pub(crate) fn clamp_score(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn is_filled(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
