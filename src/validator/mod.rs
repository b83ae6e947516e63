//! Response validation: decode, unwrap, count-check and schema-check a raw
//! model response against its [`GenerationTask`].
//!
//! Validation is pure. The same text and task always give the same result,
//! and a [`GenerationResult`] can only be obtained by passing through here.
//!
//! Checks run in a fixed order and stop at the first failure:
//!
//! 1. **Syntax**: think blocks are stripped; the text must decode as JSON,
//!    either directly or from its outermost bracketed span.
//! 2. **Shape**: the decoded value is unwrapped to an item array.
//! 3. **Count**: the array holds exactly `required_count` items.
//! 4. **Schema**: every item carries the fields its kind requires.

pub mod error;
pub mod extract;
mod schema;

pub use error::{ValidationError, ValidationReason};

use serde_json::Value;

use crate::types::{GeneratedItems, GenerationResult, GenerationTask, TaskKind};
use error::truncate;

/// Validate a raw response for `task`.
///
/// # Examples
///
/// ```
/// use workbook_pipeline::types::GenerationTask;
/// use workbook_pipeline::validator::validate;
///
/// let raw = r#"{"tf_questions": [{"statement": "Mara is brave.", "correct": true}]}"#;
/// let result = validate(raw, &GenerationTask::true_false(1)).unwrap();
/// assert_eq!(result.len(), 1);
/// ```
pub fn validate(raw_text: &str, task: &GenerationTask) -> Result<GenerationResult, ValidationError> {
    check(raw_text, task, None).map_err(|reason| ValidationError::new(reason, raw_text))
}

/// Validate a synonym list for `term`. Same as [`validate`] with a
/// [`TaskKind::Synonyms`] task, plus the list may not repeat the term.
pub fn validate_synonyms(
    raw_text: &str,
    task: &GenerationTask,
    term: &str,
) -> Result<GenerationResult, ValidationError> {
    check(raw_text, task, Some(term)).map_err(|reason| ValidationError::new(reason, raw_text))
}

fn check(
    raw_text: &str,
    task: &GenerationTask,
    term: Option<&str>,
) -> Result<GenerationResult, ValidationReason> {
    let value = decode(raw_text)?;
    let items = unwrap_items(value, task.kind)?;

    if items.len() != task.required_count {
        return Err(ValidationReason::CountMismatch {
            expected: task.required_count,
            actual: items.len(),
        });
    }

    let generated = match task.kind {
        TaskKind::MultipleChoice => {
            GeneratedItems::MultipleChoice(schema::multiple_choice(&items, task.option_count)?)
        }
        TaskKind::TrueFalse => GeneratedItems::TrueFalse(schema::true_false(&items)?),
        TaskKind::Vocabulary => GeneratedItems::Vocabulary(schema::vocabulary(&items)?),
        TaskKind::Synonyms => GeneratedItems::Synonyms(schema::synonyms(&items, term)?),
    };
    Ok(GenerationResult::new(generated))
}

/// Strict decode first, then the outermost bracketed spans.
fn decode(raw_text: &str) -> Result<Value, ValidationReason> {
    let cleaned = extract::preprocess(raw_text);
    if cleaned.is_empty() {
        return Err(ValidationReason::malformed("empty response"));
    }

    let strict_err = match serde_json::from_str::<Value>(&cleaned) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };

    extract::outermost_bracketed(&cleaned)
        .into_iter()
        .find_map(|candidate| serde_json::from_str::<Value>(candidate).ok())
        .ok_or_else(|| {
            ValidationReason::malformed(format!(
                "no JSON payload found ({}) in: {}",
                strict_err,
                truncate(&cleaned, 120)
            ))
        })
}

/// Reduce a decoded value to the item array.
///
/// Accepts a bare array, an object wrapping the array under the kind's
/// envelope key or `items`, an object with exactly one array field, and a
/// lone item object (treated as a one-item array).
fn unwrap_items(value: Value, kind: TaskKind) -> Result<Vec<Value>, ValidationReason> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => {
            for key in [kind.envelope_key(), "items"] {
                match map.remove(key) {
                    Some(Value::Array(items)) => return Ok(items),
                    Some(other) => {
                        return Err(ValidationReason::malformed(format!(
                            "'{}' must be an array",
                            key
                        )))
                    }
                    None => {}
                }
            }

            let single_array_key = match (map.len(), map.iter().next()) {
                (1, Some((key, Value::Array(_)))) => Some(key.clone()),
                _ => None,
            };
            if let Some(key) = single_array_key {
                if let Some(Value::Array(items)) = map.remove(&key) {
                    return Ok(items);
                }
            }

            Ok(vec![Value::Object(map)])
        }
        _ => Err(ValidationReason::malformed("expected a JSON array")),
    }
}
