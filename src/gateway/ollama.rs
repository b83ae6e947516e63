//! Gateway for Ollama's native `/api/generate` endpoint.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::{normalize_base_url, read_json, transport_error, unusable_body, with_timeout};
use super::{GenerateOptions, ModelGateway};
use crate::error::Result;

const NAME: &str = "ollama";

/// Gateway for a local (or remote) Ollama server.
///
/// Sends non-streaming `/api/generate` requests. With `json_mode` the request
/// carries `"format": "json"`, which constrains output to a JSON object.
///
/// # Example
///
/// ```
/// use workbook_pipeline::gateway::OllamaGateway;
///
/// let gateway = OllamaGateway::new(reqwest::Client::new(), "http://localhost:11434/api");
/// assert_eq!(gateway.base_url(), "http://localhost:11434");
/// ```
#[derive(Debug, Clone)]
pub struct OllamaGateway {
    client: Client,
    base_url: String,
}

impl OllamaGateway {
    pub fn new(client: Client, base_url: impl AsRef<str>) -> Self {
        Self {
            client,
            base_url: normalize_base_url(base_url.as_ref()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_body(prompt: &str, options: &GenerateOptions) -> Value {
        let mut body = json!({
            "model": options.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": options.temperature,
                "num_predict": options.max_tokens,
            },
        });
        if options.json_mode {
            body["format"] = json!("json");
        }
        body
    }

    fn extract_text(resp: &Value) -> Result<String> {
        match resp.get("response").and_then(Value::as_str) {
            Some(text) => Ok(text.to_string()),
            None => Err(unusable_body(
                NAME,
                200,
                match resp.get("error").and_then(Value::as_str) {
                    Some(err) => err.to_string(),
                    None => "response has no 'response' field".to_string(),
                },
            )),
        }
    }
}

#[async_trait]
impl ModelGateway for OllamaGateway {
    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);
        let body = Self::build_body(prompt, options);
        tracing::debug!(model = %options.model, url = %url, "ollama generate");

        with_timeout(NAME, options.timeout, async {
            let resp = self
                .client
                .post(&url)
                .json(&body)
                .send()
                .await
                .map_err(|e| transport_error(NAME, options.timeout, e))?;
            let json = read_json(NAME, options.timeout, resp).await?;
            Self::extract_text(&json)
        })
        .await
    }

    fn name(&self) -> &'static str {
        NAME
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use std::time::Duration;

    #[test]
    fn test_build_body_json_mode() {
        let opts = GenerateOptions::new("deepseek-r1:8b")
            .with_temperature(0.5)
            .with_max_tokens(512);
        let body = OllamaGateway::build_body("Write questions", &opts);
        assert_eq!(body["model"], "deepseek-r1:8b");
        assert_eq!(body["prompt"], "Write questions");
        assert_eq!(body["stream"], false);
        assert_eq!(body["format"], "json");
        assert_eq!(body["options"]["temperature"], 0.5);
        assert_eq!(body["options"]["num_predict"], 512);
    }

    #[test]
    fn test_build_body_without_json_mode() {
        let opts = GenerateOptions::new("llama3").with_json_mode(false);
        let body = OllamaGateway::build_body("p", &opts);
        assert!(body.get("format").is_none());
    }

    #[test]
    fn test_extract_text() {
        let resp = json!({"model": "llama3", "response": "[1, 2]", "done": true});
        assert_eq!(OllamaGateway::extract_text(&resp).unwrap(), "[1, 2]");

        let err = OllamaGateway::extract_text(&json!({"error": "model not found"})).unwrap_err();
        match err {
            PipelineError::BackendError { body, .. } => assert_eq!(body, "model not found"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        // Port 9 (discard) is closed on typical hosts; connection is refused.
        let gateway = OllamaGateway::new(Client::new(), "http://127.0.0.1:9");
        let opts = GenerateOptions::new("llama3").with_timeout(Duration::from_secs(5));
        let err = gateway.generate("hi", &opts).await.unwrap_err();
        assert!(
            matches!(
                err,
                PipelineError::BackendUnavailable { .. } | PipelineError::BackendTimeout { .. }
            ),
            "unexpected error: {:?}",
            err
        );
        assert!(err.is_retryable());
    }
}
