//! Error types for response validation.

/// Why a model response was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationReason {
    /// No JSON payload could be decoded, even after bracket recovery.
    #[error("malformed_syntax: {detail}")]
    MalformedSyntax { detail: String },

    /// The payload decoded but holds the wrong number of items.
    #[error("count_mismatch: expected {expected} items, got {actual}")]
    CountMismatch { expected: usize, actual: usize },

    /// An item is missing a field, has the wrong type, or breaks a constraint.
    #[error("schema_violation: item {index}, field '{field}': {problem}")]
    SchemaViolation {
        /// 0-based position of the offending item.
        index: usize,
        field: String,
        problem: String,
    },
}

impl ValidationReason {
    /// `malformed_syntax`, `count_mismatch` or `schema_violation`.
    pub fn label(&self) -> &'static str {
        match self {
            ValidationReason::MalformedSyntax { .. } => "malformed_syntax",
            ValidationReason::CountMismatch { .. } => "count_mismatch",
            ValidationReason::SchemaViolation { .. } => "schema_violation",
        }
    }

    pub(crate) fn schema(index: usize, field: impl Into<String>, problem: impl Into<String>) -> Self {
        ValidationReason::SchemaViolation {
            index,
            field: field.into(),
            problem: problem.into(),
        }
    }

    pub(crate) fn malformed(detail: impl Into<String>) -> Self {
        ValidationReason::MalformedSyntax {
            detail: detail.into(),
        }
    }
}

/// A model response that violated the output contract.
///
/// Carries the full raw text so callers can log or display what the model
/// actually said.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid model output ({reason})")]
pub struct ValidationError {
    pub reason: ValidationReason,
    pub raw_text: String,
}

impl ValidationError {
    pub fn new(reason: ValidationReason, raw_text: impl Into<String>) -> Self {
        Self {
            reason,
            raw_text: raw_text.into(),
        }
    }
}

/// Truncate a string to at most `max_len` characters, appending "..." if truncated.
pub(crate) fn truncate(s: &str, max_len: usize) -> String {
    match s.char_indices().nth(max_len) {
        None => s.to_string(),
        Some((cut, _)) => format!("{}...", &s[..cut]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_labels() {
        assert_eq!(ValidationReason::malformed("x").label(), "malformed_syntax");
        assert_eq!(
            ValidationReason::CountMismatch {
                expected: 5,
                actual: 4
            }
            .label(),
            "count_mismatch"
        );
        assert_eq!(
            ValidationReason::schema(2, "options", "too few").label(),
            "schema_violation"
        );
    }

    #[test]
    fn test_schema_violation_display_names_item_and_field() {
        let reason = ValidationReason::schema(2, "options", "expected 4 options, found 3");
        assert_eq!(
            reason.to_string(),
            "schema_violation: item 2, field 'options': expected 4 options, found 3"
        );
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("héllo wörld", 5), "héllo...");
    }
}
