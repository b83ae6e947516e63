use std::time::Duration;
use thiserror::Error;

use crate::types::{TaskKey, TaskKind};
use crate::validator::ValidationError;

/// Errors produced by the pipeline and its components.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The backend could not be reached (connection refused, DNS, TLS, ...).
    #[error("backend '{backend}' unavailable: {message}")]
    BackendUnavailable {
        backend: &'static str,
        message: String,
    },

    /// No response arrived within the configured per-call timeout.
    #[error("backend '{backend}' timed out after {timeout:?}")]
    BackendTimeout {
        backend: &'static str,
        timeout: Duration,
    },

    /// The backend answered, but not with a usable success response.
    ///
    /// `status` is the HTTP status code; `retry_after` is parsed from the
    /// `Retry-After` header when present.
    #[error("backend '{backend}' returned HTTP {status}: {body}")]
    BackendError {
        backend: &'static str,
        status: u16,
        body: String,
        retry_after: Option<Duration>,
    },

    /// The model answered but its output broke the output contract.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Retries for one task were exhausted. Terminal.
    #[error("{task} generation failed for chunk {chunk} after {attempts} attempt(s): {last_reason}")]
    GenerationFailed {
        task: TaskKind,
        chunk: usize,
        last_reason: Box<PipelineError>,
        attempts: u32,
    },

    /// Assembly was asked to build a workbook with required results missing. Terminal.
    #[error("incomplete workbook, missing: {}", format_keys(.missing))]
    IncompleteArtifact { missing: Vec<TaskKey> },

    /// The run was cancelled via the cancellation flag.
    #[error("pipeline was cancelled")]
    Cancelled,

    /// Invalid configuration detected at load or build time.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization of a workbook failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    /// Transient errors the retry controller may recover from.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::BackendUnavailable { .. }
                | PipelineError::BackendTimeout { .. }
                | PipelineError::BackendError { .. }
                | PipelineError::Validation(_)
        )
    }

    /// Backend-suggested delay before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            PipelineError::BackendError { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Short machine-friendly label, used in logs and correction prompts.
    pub fn kind_label(&self) -> &'static str {
        match self {
            PipelineError::BackendUnavailable { .. } => "backend_unavailable",
            PipelineError::BackendTimeout { .. } => "backend_timeout",
            PipelineError::BackendError { .. } => "backend_error",
            PipelineError::Validation(v) => v.reason.label(),
            PipelineError::GenerationFailed { .. } => "generation_failed",
            PipelineError::IncompleteArtifact { .. } => "incomplete_artifact",
            PipelineError::Cancelled => "cancelled",
            PipelineError::InvalidConfig(_) => "invalid_config",
            PipelineError::Io(_) => "io",
            PipelineError::Json(_) => "json",
        }
    }
}

fn format_keys(keys: &[TaskKey]) -> String {
    keys.iter()
        .map(|k| k.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::ValidationReason;

    #[test]
    fn test_backend_errors_are_retryable() {
        let unavailable = PipelineError::BackendUnavailable {
            backend: "ollama",
            message: "connection refused".into(),
        };
        let timeout = PipelineError::BackendTimeout {
            backend: "ollama",
            timeout: Duration::from_secs(5),
        };
        let http = PipelineError::BackendError {
            backend: "openai",
            status: 503,
            body: "overloaded".into(),
            retry_after: Some(Duration::from_secs(2)),
        };
        assert!(unavailable.is_retryable());
        assert!(timeout.is_retryable());
        assert!(http.is_retryable());
        assert_eq!(http.retry_after(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_terminal_errors_not_retryable() {
        assert!(!PipelineError::Cancelled.is_retryable());
        assert!(!PipelineError::IncompleteArtifact { missing: vec![] }.is_retryable());
        assert!(!PipelineError::InvalidConfig("x".into()).is_retryable());
    }

    #[test]
    fn test_generation_failed_display_carries_reason_and_attempts() {
        let err = PipelineError::GenerationFailed {
            task: TaskKind::MultipleChoice,
            chunk: 1,
            last_reason: Box::new(PipelineError::Validation(ValidationError::new(
                ValidationReason::CountMismatch {
                    expected: 5,
                    actual: 4,
                },
                "[]",
            ))),
            attempts: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("multiple_choice"));
        assert!(msg.contains("chunk 1"));
        assert!(msg.contains("3 attempt"));
        assert!(msg.contains("expected 5 items, got 4"));
    }

    #[test]
    fn test_incomplete_artifact_lists_missing_keys() {
        let err = PipelineError::IncompleteArtifact {
            missing: vec![
                TaskKey::new(0, TaskKind::Vocabulary),
                TaskKey::new(2, TaskKind::TrueFalse),
            ],
        };
        assert_eq!(
            err.to_string(),
            "incomplete workbook, missing: vocabulary (chunk 0), true_false (chunk 2)"
        );
    }

    #[test]
    fn test_kind_label_for_validation_uses_reason() {
        let err: PipelineError =
            ValidationError::new(ValidationReason::MalformedSyntax { detail: "x".into() }, "")
                .into();
        assert_eq!(err.kind_label(), "malformed_syntax");
    }
}
