//! # Stage: Validator Pipeline
//!
//! ## Responsibility
//! Run an ordered list of caller-supplied structural checks against one
//! [`AttemptResult`] and report every problem in a single pass.
//!
//! ## Guarantees
//! - Pure: validators read the attempt and nothing else; no I/O, no state.
//! - No short-circuit: every validator runs, all error strings are kept in
//!   pipeline order.
//! - Overall validity is the logical AND of every outcome.
//!
//! ## NOT Responsible For
//! - Scoring trust in a valid answer (that belongs to `scoring`)
//! - Deciding whether to escalate (that belongs to `escalation`)

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;

use crate::task::AttemptResult;

/// Result of one validator, or of the whole pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationOutcome {
    /// `true` if the check passed.
    pub valid: bool,
    /// Human-readable problems; empty when `valid`.
    pub errors: Vec<String>,
}

impl ValidationOutcome {
    /// A passing outcome.
    pub fn pass() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    /// A failing outcome with one message.
    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            errors: vec![error.into()],
        }
    }

    /// A failing outcome with several messages; passes if `errors` is empty.
    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}

/// A pure structural check on a model's output.
pub trait Validator: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Inspect the attempt.
    fn check(&self, attempt: &AttemptResult) -> ValidationOutcome;
}

/// Ordered collection of validators evaluated without short-circuit.
#[derive(Clone, Default)]
pub struct ValidatorPipeline {
    validators: Vec<Arc<dyn Validator>>,
}

impl ValidatorPipeline {
    /// Build a pipeline from validators in evaluation order.
    pub fn new(validators: Vec<Arc<dyn Validator>>) -> Self {
        Self { validators }
    }

    /// Run every validator and merge the outcomes.
    ///
    /// An empty pipeline accepts everything.
    pub fn run(&self, attempt: &AttemptResult) -> ValidationOutcome {
        let mut valid = true;
        let mut errors = Vec::new();
        for validator in &self.validators {
            let outcome = validator.check(attempt);
            if !outcome.valid {
                valid = false;
                tracing::debug!(
                    validator = validator.name(),
                    model = %attempt.model_id,
                    errors = outcome.errors.len(),
                    "validator rejected attempt"
                );
            }
            errors.extend(outcome.errors);
        }
        ValidationOutcome { valid, errors }
    }

    /// Number of validators.
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    /// Return `true` if there are no validators.
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }
}

// ── Built-in validators ────────────────────────────────────────────────

/// Content must parse as a JSON object.
///
/// A surrounding Markdown code fence is tolerated.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonShape;

impl Validator for JsonShape {
    fn name(&self) -> &str {
        "json_shape"
    }

    fn check(&self, attempt: &AttemptResult) -> ValidationOutcome {
        match extract_json(&attempt.content) {
            Some(Value::Object(_)) => ValidationOutcome::pass(),
            Some(_) => ValidationOutcome::fail("content is JSON but not an object"),
            None => ValidationOutcome::fail("content is not valid JSON"),
        }
    }
}

/// Named fields must be present and non-null.
///
/// Field names may be dotted paths (`"venue.city"`). Unparseable content
/// fails every field.
#[derive(Debug, Clone)]
pub struct RequiredFields {
    fields: Vec<String>,
}

impl RequiredFields {
    /// Require each of `fields`.
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }
}

impl Validator for RequiredFields {
    fn name(&self) -> &str {
        "required_fields"
    }

    fn check(&self, attempt: &AttemptResult) -> ValidationOutcome {
        let doc = extract_json(&attempt.content);
        let errors = self
            .fields
            .iter()
            .filter(|field| {
                doc.as_ref()
                    .and_then(|d| lookup_path(d, field))
                    .map_or(true, Value::is_null)
            })
            .map(|field| format!("missing required field '{field}'"))
            .collect();
        ValidationOutcome::from_errors(errors)
    }
}

/// Trimmed content must be at least `min_chars` characters long.
#[derive(Debug, Clone, Copy)]
pub struct MinLength {
    min_chars: usize,
}

impl MinLength {
    /// Require at least `min_chars` characters.
    pub fn new(min_chars: usize) -> Self {
        Self { min_chars }
    }
}

impl Validator for MinLength {
    fn name(&self) -> &str {
        "min_length"
    }

    fn check(&self, attempt: &AttemptResult) -> ValidationOutcome {
        let len = attempt.content.trim().chars().count();
        if len >= self.min_chars {
            ValidationOutcome::pass()
        } else {
            ValidationOutcome::fail(format!(
                "content length {len} below minimum {}",
                self.min_chars
            ))
        }
    }
}

/// A string field must hold one of an allowed set of values.
///
/// Used for classification outputs such as `"match" | "no_match"`.
#[derive(Debug, Clone)]
pub struct FieldOneOf {
    field: String,
    allowed: BTreeSet<String>,
}

impl FieldOneOf {
    /// Constrain `field` to `allowed`.
    pub fn new<I, S>(field: impl Into<String>, allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            field: field.into(),
            allowed: allowed.into_iter().map(Into::into).collect(),
        }
    }
}

impl Validator for FieldOneOf {
    fn name(&self) -> &str {
        "field_one_of"
    }

    fn check(&self, attempt: &AttemptResult) -> ValidationOutcome {
        let value = extract_json(&attempt.content)
            .and_then(|doc| lookup_path(&doc, &self.field).cloned());
        match value {
            Some(Value::String(s)) if self.allowed.contains(&s) => ValidationOutcome::pass(),
            Some(Value::String(s)) => ValidationOutcome::fail(format!(
                "field '{}' has unexpected value '{s}'",
                self.field
            )),
            Some(_) => ValidationOutcome::fail(format!("field '{}' is not a string", self.field)),
            None => ValidationOutcome::fail(format!("missing required field '{}'", self.field)),
        }
    }
}

// ── JSON helpers ───────────────────────────────────────────────────────

/// Parse model output as JSON, tolerating a Markdown fence or leading and
/// trailing prose around a single object.
///
/// Returns `None` if no JSON document can be recovered.
pub fn extract_json(content: &str) -> Option<Value> {
    let trimmed = content.trim();
    if let Ok(v) = serde_json::from_str(trimmed) {
        return Some(v);
    }

    if let Some(inner) = strip_code_fence(trimmed) {
        if let Ok(v) = serde_json::from_str(inner) {
            return Some(v);
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

/// Follow a dotted path through nested objects.
pub fn lookup_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(doc, |node, key| node.as_object().and_then(|o| o.get(key)))
}

fn strip_code_fence(s: &str) -> Option<&str> {
    let body = s.strip_prefix("```")?;
    let body = body.strip_suffix("```")?;
    // Drop an optional language tag on the opening line.
    let body = match body.find('\n') {
        Some(nl) if !body[..nl].trim().contains(['{', '[']) => &body[nl + 1..],
        _ => body,
    };
    Some(body.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(content: &str) -> AttemptResult {
        AttemptResult {
            content: content.to_string(),
            model_id: "test-model".to_string(),
            input_tokens: 10,
            output_tokens: 10,
            cost_cents: 1,
            attempt_index: 0,
            confidence: 0.0,
            validation_errors: Vec::new(),
        }
    }

    #[test]
    fn test_json_shape_accepts_object() {
        assert!(JsonShape.check(&attempt(r#"{"a": 1}"#)).valid);
    }

    #[test]
    fn test_json_shape_accepts_fenced_object() {
        let content = "```json\n{\"a\": 1}\n```";
        assert!(JsonShape.check(&attempt(content)).valid);
    }

    #[test]
    fn test_json_shape_accepts_object_wrapped_in_prose() {
        let content = "Sure! Here you go: {\"a\": 1} Hope that helps.";
        assert!(JsonShape.check(&attempt(content)).valid);
    }

    #[test]
    fn test_json_shape_rejects_garbage() {
        let outcome = JsonShape.check(&attempt("not json at all"));
        assert!(!outcome.valid);
        assert_eq!(outcome.errors, vec!["content is not valid JSON"]);
    }

    #[test]
    fn test_json_shape_rejects_array() {
        let outcome = JsonShape.check(&attempt("[1, 2, 3]"));
        assert!(!outcome.valid);
    }

    #[test]
    fn test_required_fields_reports_each_missing_field() {
        let v = RequiredFields::new(["date", "venue.city", "fee"]);
        let outcome = v.check(&attempt(r#"{"date": "2026-11-01", "venue": {}}"#));
        assert!(!outcome.valid);
        assert_eq!(
            outcome.errors,
            vec![
                "missing required field 'venue.city'",
                "missing required field 'fee'"
            ]
        );
    }

    #[test]
    fn test_required_fields_treats_null_as_missing() {
        let v = RequiredFields::new(["fee"]);
        assert!(!v.check(&attempt(r#"{"fee": null}"#)).valid);
    }

    #[test]
    fn test_required_fields_passes_nested_path() {
        let v = RequiredFields::new(["venue.city"]);
        assert!(v.check(&attempt(r#"{"venue": {"city": "Leeds"}}"#)).valid);
    }

    #[test]
    fn test_min_length_counts_trimmed_chars() {
        let v = MinLength::new(5);
        assert!(v.check(&attempt("  hello  ")).valid);
        let outcome = v.check(&attempt(" hi "));
        assert!(!outcome.valid);
        assert!(outcome.errors[0].contains("below minimum 5"));
    }

    #[test]
    fn test_field_one_of_checks_membership() {
        let v = FieldOneOf::new("verdict", ["match", "no_match"]);
        assert!(v.check(&attempt(r#"{"verdict": "match"}"#)).valid);
        assert!(!v.check(&attempt(r#"{"verdict": "maybe"}"#)).valid);
        assert!(!v.check(&attempt(r#"{"verdict": 1}"#)).valid);
        assert!(!v.check(&attempt(r#"{}"#)).valid);
    }

    #[test]
    fn test_pipeline_runs_every_validator_without_short_circuit() {
        let pipeline = ValidatorPipeline::new(vec![
            Arc::new(JsonShape),
            Arc::new(RequiredFields::new(["a"])),
            Arc::new(MinLength::new(100)),
        ]);
        let outcome = pipeline.run(&attempt("oops"));
        assert!(!outcome.valid);
        assert_eq!(outcome.errors.len(), 3, "every validator must contribute");
        assert_eq!(outcome.errors[0], "content is not valid JSON");
        assert_eq!(outcome.errors[1], "missing required field 'a'");
    }

    #[test]
    fn test_pipeline_valid_only_when_all_pass() {
        let pipeline = ValidatorPipeline::new(vec![
            Arc::new(JsonShape),
            Arc::new(RequiredFields::new(["a"])),
        ]);
        assert!(pipeline.run(&attempt(r#"{"a": true}"#)).valid);
        assert!(!pipeline.run(&attempt(r#"{"b": true}"#)).valid);
    }

    #[test]
    fn test_empty_pipeline_accepts() {
        let outcome = ValidatorPipeline::default().run(&attempt(""));
        assert!(outcome.valid);
        assert!(outcome.errors.is_empty());
    }

    #[test]
    fn test_pipeline_is_deterministic() {
        let pipeline = ValidatorPipeline::new(vec![Arc::new(JsonShape), Arc::new(MinLength::new(3))]);
        let a = attempt("{x");
        assert_eq!(pipeline.run(&a), pipeline.run(&a));
    }

    #[test]
    fn test_lookup_path_walks_objects_only() {
        let doc: Value = serde_json::json!({"a": {"b": [1, 2]}});
        assert!(lookup_path(&doc, "a.b").is_some());
        assert!(lookup_path(&doc, "a.b.0").is_none());
        assert!(lookup_path(&doc, "z").is_none());
    }
}
