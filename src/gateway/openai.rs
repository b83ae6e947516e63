//! Gateway for OpenAI-compatible chat completion APIs.
//!
//! Endpoint: `/v1/chat/completions`. Works against OpenAI itself and the
//! usual compatible servers (vLLM, llama.cpp, LM Studio, Ollama's `/v1/`).

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::{normalize_base_url, read_json, transport_error, unusable_body, with_timeout};
use super::{GenerateOptions, ModelGateway};
use crate::error::Result;

const NAME: &str = "openai";

/// Gateway for any OpenAI-compatible API.
///
/// # Example
///
/// ```
/// use workbook_pipeline::gateway::OpenAiGateway;
///
/// let gateway = OpenAiGateway::new(reqwest::Client::new(), "https://api.openai.com/v1")
///     .with_api_key("sk-test-key");
/// assert!(gateway.has_api_key());
/// assert!(!format!("{:?}", gateway).contains("test-key"));
/// ```
#[derive(Clone)]
pub struct OpenAiGateway {
    client: Client,
    base_url: String,
    /// Sent as `Authorization: Bearer {key}` when set.
    api_key: Option<String>,
}

impl std::fmt::Debug for OpenAiGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiGateway")
            .field("base_url", &self.base_url)
            .field(
                "api_key",
                &self
                    .api_key
                    .as_ref()
                    .map(|k| format!("{}***", k.chars().take(3).collect::<String>())),
            )
            .finish()
    }
}

impl OpenAiGateway {
    pub fn new(client: Client, base_url: impl AsRef<str>) -> Self {
        Self {
            client,
            base_url: normalize_base_url(base_url.as_ref()),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn build_body(prompt: &str, options: &GenerateOptions) -> Value {
        let mut body = json!({
            "model": options.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": options.temperature,
            "max_tokens": options.max_tokens,
            "stream": false,
        });
        if options.json_mode {
            body["response_format"] = json!({"type": "json_object"});
        }
        body
    }

    fn extract_text(resp: &Value) -> Result<String> {
        resp.get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| unusable_body(NAME, 200, "response has no choices[0].message.content".into()))
    }
}

#[async_trait]
impl ModelGateway for OpenAiGateway {
    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = Self::build_body(prompt, options);
        tracing::debug!(model = %options.model, url = %url, "openai chat completion");

        with_timeout(NAME, options.timeout, async {
            let mut req = self.client.post(&url).json(&body);
            if let Some(ref key) = self.api_key {
                req = req.bearer_auth(key);
            }
            let resp = req
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

    #[test]
    fn test_build_body() {
        let opts = GenerateOptions::new("gpt-4o")
            .with_temperature(0.3)
            .with_max_tokens(1000);
        let body = OpenAiGateway::build_body("List five words", &opts);
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "List five words");
        assert_eq!(body["temperature"], 0.3);
        assert_eq!(body["max_tokens"], 1000);
        assert_eq!(body["response_format"]["type"], "json_object");
    }

    #[test]
    fn test_build_body_without_json_mode() {
        let opts = GenerateOptions::new("gpt-4o").with_json_mode(false);
        let body = OpenAiGateway::build_body("p", &opts);
        assert!(body.get("response_format").is_none());
    }

    #[test]
    fn test_extract_text() {
        let resp = json!({
            "id": "chatcmpl-1",
            "choices": [{"message": {"role": "assistant", "content": "{\"vocabulary\": []}"}}]
        });
        assert_eq!(
            OpenAiGateway::extract_text(&resp).unwrap(),
            "{\"vocabulary\": []}"
        );

        let err = OpenAiGateway::extract_text(&json!({"choices": []})).unwrap_err();
        assert!(matches!(err, PipelineError::BackendError { status: 200, .. }));
    }

    #[test]
    fn test_debug_redacts_key() {
        let gateway = OpenAiGateway::new(Client::new(), "https://api.openai.com")
            .with_api_key("sk-secret-value");
        let debug = format!("{:?}", gateway);
        assert!(debug.contains("sk-***"));
        assert!(!debug.contains("secret"));
    }
}
