//! Model gateway trait and shared HTTP plumbing.
//!
//! The [`ModelGateway`] trait hides which text-generation service is in use.
//! One call is exactly one request: gateways never retry on their own, that
//! is the [`RetryController`](crate::retry::RetryController)'s job.
//!
//! ```text
//! RetryController ──► ModelGateway::generate(prompt, options) ──► raw text
//!                                   │
//!                  ┌────────────────┼────────────────┐
//!             OllamaGateway    OpenAiGateway     MockGateway
//!             /api/generate    /v1/chat/...      scripted replies
//! ```

pub mod mock;
pub mod ollama;
#[cfg(feature = "openai")]
pub mod openai;

pub use mock::{MockGateway, MockReply};
pub use ollama::OllamaGateway;
#[cfg(feature = "openai")]
pub use openai::OpenAiGateway;

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

use crate::error::{PipelineError, Result};
use crate::validator::error::truncate;

/// Longest slice of an error body kept in a [`PipelineError::BackendError`].
const MAX_ERROR_BODY: usize = 500;

/// Per-call generation parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateOptions {
    /// Model identifier (e.g. `"deepseek-r1:8b"`, `"gpt-4o"`).
    pub model: String,
    pub temperature: f64,
    /// Upper bound on generated tokens.
    pub max_tokens: u32,
    /// Wall-clock limit for the whole call.
    pub timeout: Duration,
    /// Ask the backend to constrain output to a JSON object.
    pub json_mode: bool,
}

impl GenerateOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_json_mode(mut self, enabled: bool) -> Self {
        self.json_mode = enabled;
        self
    }
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            model: "deepseek-r1:8b".to_string(),
            temperature: 0.3,
            max_tokens: 2048,
            timeout: Duration::from_secs(120),
            json_mode: true,
        }
    }
}

/// A text-generation service.
///
/// Object-safe; the pipeline holds it as `Arc<dyn ModelGateway>`.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// Send one prompt and return the raw response text.
    ///
    /// Errors are [`PipelineError::BackendUnavailable`],
    /// [`PipelineError::BackendTimeout`] or [`PipelineError::BackendError`].
    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String>;

    /// Short backend name for logs and error messages.
    fn name(&self) -> &'static str;
}

/// Run `call`, failing with [`PipelineError::BackendTimeout`] once `timeout` elapses.
pub(crate) async fn with_timeout<F>(backend: &'static str, timeout: Duration, call: F) -> Result<String>
where
    F: Future<Output = Result<String>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(PipelineError::BackendTimeout { backend, timeout }),
    }
}

/// Classify a transport failure.
pub(crate) fn transport_error(
    backend: &'static str,
    timeout: Duration,
    err: reqwest::Error,
) -> PipelineError {
    if err.is_timeout() {
        PipelineError::BackendTimeout { backend, timeout }
    } else {
        PipelineError::BackendUnavailable {
            backend,
            message: err.to_string(),
        }
    }
}

/// Read a response body as JSON, mapping non-2xx statuses and undecodable
/// bodies to [`PipelineError::BackendError`].
pub(crate) async fn read_json(
    backend: &'static str,
    timeout: Duration,
    resp: reqwest::Response,
) -> Result<serde_json::Value> {
    let status = resp.status();
    let retry_after = resp
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after);
    let body = resp
        .text()
        .await
        .map_err(|e| transport_error(backend, timeout, e))?;

    if !status.is_success() {
        return Err(PipelineError::BackendError {
            backend,
            status: status.as_u16(),
            body: truncate(&body, MAX_ERROR_BODY),
            retry_after,
        });
    }

    serde_json::from_str(&body).map_err(|e| {
        unusable_body(
            backend,
            status.as_u16(),
            format!("invalid JSON body ({}): {}", e, truncate(&body, 200)),
        )
    })
}

/// A 2xx response whose body did not carry generated text.
pub(crate) fn unusable_body(backend: &'static str, status: u16, body: String) -> PipelineError {
    PipelineError::BackendError {
        backend,
        status,
        body,
        retry_after: None,
    }
}

/// Parse a `Retry-After` header value given in whole seconds.
pub(crate) fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Strip known provider path suffixes from a base URL.
/// e.g., "https://api.openai.com/v1" -> "https://api.openai.com"
/// e.g., "http://localhost:11434/api" -> "http://localhost:11434"
pub fn normalize_base_url(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    for suffix in [
        "/v1/chat/completions",
        "/v1",
        "/api/generate",
        "/api",
    ] {
        if let Some(stripped) = trimmed.strip_suffix(suffix) {
            return stripped.to_string();
        }
    }
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(normalize_base_url("https://api.openai.com/v1/"), "https://api.openai.com");
        assert_eq!(
            normalize_base_url("https://api.openai.com/v1/chat/completions"),
            "https://api.openai.com"
        );
        assert_eq!(normalize_base_url("http://localhost:11434/api"), "http://localhost:11434");
        assert_eq!(normalize_base_url("http://localhost:11434/"), "http://localhost:11434");
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after(" 30 "), Some(Duration::from_secs(30)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[test]
    fn test_options_builder() {
        let opts = GenerateOptions::new("gpt-4o")
            .with_temperature(0.0)
            .with_max_tokens(1000)
            .with_timeout(Duration::from_secs(5))
            .with_json_mode(false);
        assert_eq!(opts.model, "gpt-4o");
        assert_eq!(opts.temperature, 0.0);
        assert_eq!(opts.max_tokens, 1000);
        assert_eq!(opts.timeout, Duration::from_secs(5));
        assert!(!opts.json_mode);
    }

    #[tokio::test]
    async fn test_with_timeout_elapses() {
        let err = with_timeout("test", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".to_string())
        })
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::BackendTimeout {
                backend: "test",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_with_timeout_passes_result_through() {
        let text = with_timeout("test", Duration::from_secs(5), async { Ok("ok".to_string()) })
            .await
            .unwrap();
        assert_eq!(text, "ok");
    }
}
