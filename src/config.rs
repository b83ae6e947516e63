//! Run configuration.
//!
//! Precedence, lowest first: built-in defaults, the TOML file, environment
//! variables (a `.env` file is honored), then CLI flags applied by the
//! binary. The result is validated once and only read afterwards.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{PipelineError, Result};
use crate::gateway::{GenerateOptions, ModelGateway, OllamaGateway};
use crate::retry::{BackoffConfig, JitterStrategy, RetryPolicy};
use crate::types::{GenerationTask, TaskKind};

pub const ENV_BACKEND: &str = "WORKBOOK_BACKEND";
pub const ENV_BASE_URL: &str = "WORKBOOK_BASE_URL";
pub const ENV_MODEL: &str = "WORKBOOK_MODEL";
pub const ENV_API_KEY: &str = "OPENAI_API_KEY";

/// Top-level configuration for one workbook run.
///
/// # Example
///
/// ```
/// use workbook_pipeline::config::WorkbookConfig;
///
/// let config = WorkbookConfig::from_toml_str(r#"
///     chunk_target_lines = 800
///
///     [tasks]
///     kinds = ["multiple_choice", "vocabulary"]
///
///     [backend]
///     model = "llama3"
/// "#).unwrap();
/// assert_eq!(config.chunk_target_lines, 800);
/// assert_eq!(config.backend.model(), "llama3");
/// assert_eq!(config.tasks.multiple_choice_count, 5);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkbookConfig {
    /// Target chunk size in lines.
    pub chunk_target_lines: usize,
    pub tasks: TasksConfig,
    pub retry: RetryConfig,
    pub backend: BackendConfig,
    /// Maximum `(chunk, task)` generations in flight. 1 runs sequentially.
    pub concurrency: usize,
    /// Stop at the first task that exhausts its retries.
    pub fail_fast: bool,
}

impl Default for WorkbookConfig {
    fn default() -> Self {
        Self {
            chunk_target_lines: 1300,
            tasks: TasksConfig::default(),
            retry: RetryConfig::default(),
            backend: BackendConfig::default(),
            concurrency: 1,
            fail_fast: true,
        }
    }
}

/// Which artifacts to generate and how many of each per chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TasksConfig {
    pub kinds: Vec<TaskKind>,
    pub multiple_choice_count: usize,
    pub true_false_count: usize,
    pub vocabulary_count: usize,
    /// Options per multiple-choice question.
    pub option_count: usize,
    /// Enrich vocabulary entries with synonyms.
    pub synonyms: bool,
    pub synonym_count: usize,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            kinds: vec![
                TaskKind::MultipleChoice,
                TaskKind::TrueFalse,
                TaskKind::Vocabulary,
            ],
            multiple_choice_count: 5,
            true_false_count: 5,
            vocabulary_count: 5,
            option_count: 4,
            synonyms: false,
            synonym_count: 4,
        }
    }
}

impl TasksConfig {
    /// One task per requested kind, in kind order.
    pub fn generation_tasks(&self) -> Vec<GenerationTask> {
        let mut kinds = self.kinds.clone();
        kinds.sort();
        kinds.dedup();
        kinds
            .into_iter()
            .filter_map(|kind| match kind {
                TaskKind::MultipleChoice => Some(GenerationTask::multiple_choice(
                    self.multiple_choice_count,
                    self.option_count,
                )),
                TaskKind::TrueFalse => Some(GenerationTask::true_false(self.true_false_count)),
                TaskKind::Vocabulary => Some(GenerationTask::vocabulary(self.vocabulary_count)),
                TaskKind::Synonyms => None,
            })
            .collect()
    }

    /// Whether synonym enrichment will run (needs vocabulary to enrich).
    pub fn enrich_synonyms(&self) -> bool {
        self.synonyms && self.kinds.contains(&TaskKind::Vocabulary)
    }
}

/// Attempt budget and pacing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter: JitterStrategy,
    pub respect_retry_after: bool,
    /// Lower the temperature by 0.2 per retry.
    pub cool_down: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 60_000,
            multiplier: 2.0,
            jitter: JitterStrategy::Full,
            respect_retry_after: true,
            cool_down: true,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        let policy = RetryPolicy::new(self.max_attempts).with_backoff(BackoffConfig {
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            multiplier: self.multiplier,
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter: self.jitter,
            respect_retry_after: self.respect_retry_after,
        });
        if self.cool_down {
            policy
        } else {
            policy.no_cool_down()
        }
    }
}

/// Text-generation service to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Ollama's native API.
    #[default]
    Ollama,
    /// Any OpenAI-compatible chat completion API.
    OpenAi,
}

impl Provider {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::Ollama => "http://localhost:11434",
            Provider::OpenAi => "https://api.openai.com",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::Ollama => "deepseek-r1:8b",
            Provider::OpenAi => "gpt-4o",
        }
    }
}

impl std::str::FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(Provider::Ollama),
            "openai" | "open_ai" | "open-ai" => Ok(Provider::OpenAi),
            other => Err(format!("unknown backend '{}' (expected ollama or openai)", other)),
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Provider::Ollama => "ollama",
            Provider::OpenAi => "openai",
        })
    }
}

/// Backend connection and sampling settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub provider: Provider,
    /// Defaults to the provider's usual address.
    pub base_url: Option<String>,
    /// Defaults to the provider's default model.
    pub model: Option<String>,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Per-call timeout in seconds.
    pub timeout_secs: u64,
    pub json_mode: bool,
    /// Bearer key for OpenAI-compatible APIs. Never written back out.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Ollama,
            base_url: None,
            model: None,
            temperature: 0.3,
            max_tokens: 2048,
            timeout_secs: 120,
            json_mode: true,
            api_key: None,
        }
    }
}

impl BackendConfig {
    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.provider.default_base_url())
    }

    pub fn model(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.provider.default_model())
    }

    pub fn generate_options(&self) -> GenerateOptions {
        GenerateOptions::new(self.model())
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens)
            .with_timeout(Duration::from_secs(self.timeout_secs))
            .with_json_mode(self.json_mode)
    }

    /// Build the gateway for the configured provider.
    pub fn build_gateway(&self, client: reqwest::Client) -> Result<Arc<dyn ModelGateway>> {
        match self.provider {
            Provider::Ollama => Ok(Arc::new(OllamaGateway::new(client, self.base_url()))),
            #[cfg(feature = "openai")]
            Provider::OpenAi => {
                let mut gateway = crate::gateway::OpenAiGateway::new(client, self.base_url());
                if let Some(ref key) = self.api_key {
                    gateway = gateway.with_api_key(key.clone());
                }
                Ok(Arc::new(gateway))
            }
            #[cfg(not(feature = "openai"))]
            Provider::OpenAi => Err(PipelineError::InvalidConfig(
                "the openai backend requires the 'openai' feature".into(),
            )),
        }
    }
}

impl WorkbookConfig {
    /// Load `.env`, then the TOML file at `path` (if any), then environment
    /// overrides, and validate the result.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, |_| {})
    }

    /// Like [`load`](Self::load), but `overrides` runs after the environment
    /// layer and before validation. The binary applies its flags here.
    pub fn load_with(path: Option<&Path>, overrides: impl FnOnce(&mut Self)) -> Result<Self> {
        // A missing .env is fine
        let _ = dotenvy::dotenv();

        let mut config = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path)?;
                Self::from_toml_str(&contents).map_err(|e| match e {
                    PipelineError::InvalidConfig(msg) => {
                        PipelineError::InvalidConfig(format!("{}: {}", path.display(), msg))
                    }
                    other => other,
                })?
            }
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        overrides(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document; missing keys take their defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| PipelineError::InvalidConfig(e.to_string()))
    }

    /// Apply environment overrides read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let lookup = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(provider) = lookup(ENV_BACKEND) {
            self.backend.provider = provider.parse().map_err(PipelineError::InvalidConfig)?;
        }
        if let Some(url) = lookup(ENV_BASE_URL) {
            self.backend.base_url = Some(url);
        }
        if let Some(model) = lookup(ENV_MODEL) {
            self.backend.model = Some(model);
        }
        if let Some(key) = lookup(ENV_API_KEY) {
            self.backend.api_key = Some(key);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| -> Result<()> { Err(PipelineError::InvalidConfig(msg)) };

        if self.chunk_target_lines == 0 {
            return invalid("chunk_target_lines must be at least 1".into());
        }
        if self.concurrency == 0 {
            return invalid("concurrency must be at least 1".into());
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1".into());
        }
        if self.retry.multiplier < 1.0 {
            return invalid("retry.multiplier must be at least 1.0".into());
        }

        let tasks = &self.tasks;
        if tasks.kinds.is_empty() {
            return invalid("tasks.kinds must name at least one kind".into());
        }
        if tasks.kinds.contains(&TaskKind::Synonyms) {
            return invalid(
                "synonyms is not a workbook section; set tasks.synonyms = true instead".into(),
            );
        }
        for task in tasks.generation_tasks() {
            if task.required_count == 0 {
                return invalid(format!("count for {} must be at least 1", task.kind));
            }
        }
        if tasks.kinds.contains(&TaskKind::MultipleChoice) && !(2..=26).contains(&tasks.option_count) {
            return invalid("tasks.option_count must be between 2 and 26".into());
        }
        if tasks.enrich_synonyms() && tasks.synonym_count == 0 {
            return invalid("tasks.synonym_count must be at least 1".into());
        }

        let backend = &self.backend;
        if !(0.0..=2.0).contains(&backend.temperature) {
            return invalid("backend.temperature must be between 0.0 and 2.0".into());
        }
        if backend.timeout_secs == 0 {
            return invalid("backend.timeout_secs must be at least 1".into());
        }
        if backend.max_tokens == 0 {
            return invalid("backend.max_tokens must be at least 1".into());
        }
        if backend.provider == Provider::OpenAi
            && backend.api_key.is_none()
            && backend.base_url().contains("api.openai.com")
        {
            return invalid(format!("{} is required for api.openai.com", ENV_API_KEY));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = WorkbookConfig::default();
        config.validate().unwrap();
        assert_eq!(config.chunk_target_lines, 1300);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.tasks.option_count, 4);
        assert_eq!(config.tasks.synonym_count, 4);
        assert!(config.fail_fast);
        assert_eq!(config.backend.base_url(), "http://localhost:11434");
        assert_eq!(config.backend.model(), "deepseek-r1:8b");
    }

    #[test]
    fn test_generation_tasks_follow_kinds() {
        let tasks = TasksConfig {
            kinds: vec![TaskKind::Vocabulary, TaskKind::MultipleChoice, TaskKind::Vocabulary],
            ..TasksConfig::default()
        };
        let generated = tasks.generation_tasks();
        assert_eq!(
            generated,
            vec![
                GenerationTask::multiple_choice(5, 4),
                GenerationTask::vocabulary(5),
            ]
        );
    }

    #[test]
    fn test_env_overrides() {
        let mut config = WorkbookConfig::default();
        config
            .apply_env(env(&[
                (ENV_BACKEND, "openai"),
                (ENV_MODEL, "gpt-4o-mini"),
                (ENV_API_KEY, "sk-test"),
                (ENV_BASE_URL, ""),
            ]))
            .unwrap();
        assert_eq!(config.backend.provider, Provider::OpenAi);
        assert_eq!(config.backend.model(), "gpt-4o-mini");
        assert_eq!(config.backend.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.backend.base_url(), "https://api.openai.com");
        config.validate().unwrap();
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let mut config = WorkbookConfig::default();
        let err = config.apply_env(env(&[(ENV_BACKEND, "bard")])).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let zero_chunk = WorkbookConfig {
            chunk_target_lines: 0,
            ..WorkbookConfig::default()
        };
        assert!(zero_chunk.validate().is_err());

        let mut synonyms_kind = WorkbookConfig::default();
        synonyms_kind.tasks.kinds.push(TaskKind::Synonyms);
        assert!(synonyms_kind.validate().is_err());

        let mut one_option = WorkbookConfig::default();
        one_option.tasks.option_count = 1;
        assert!(one_option.validate().is_err());

        let mut openai_no_key = WorkbookConfig::default();
        openai_no_key.backend.provider = Provider::OpenAi;
        assert!(openai_no_key.validate().is_err());
        openai_no_key.backend.base_url = Some("http://localhost:8000/v1".into());
        openai_no_key.validate().unwrap();
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "concurrency = 4\nfail_fast = false\n\n[retry]\nmax_attempts = 5\njitter = \"none\"\n\n[tasks]\nsynonyms = true"
        )
        .unwrap();

        let config = WorkbookConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.concurrency, 4);
        assert!(!config.fail_fast);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.jitter, JitterStrategy::None);
        assert!(config.tasks.enrich_synonyms());
    }

    #[test]
    fn test_load_with_validates_after_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "chunk_target_lines = 0\n\n[backend]\nprovider = \"openai\"").unwrap();

        let config = WorkbookConfig::load_with(Some(file.path()), |c| {
            c.chunk_target_lines = 400;
            c.backend.base_url = Some("http://localhost:8000/v1".into());
        })
        .unwrap();
        assert_eq!(config.chunk_target_lines, 400);
        assert_eq!(config.backend.provider, Provider::OpenAi);

        let err = WorkbookConfig::load_with(Some(file.path()), |c| {
            c.backend.base_url = Some("http://localhost:8000/v1".into());
        })
        .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(ref msg) if msg.contains("chunk_target_lines")));
    }

    #[test]
    fn test_load_reports_bad_toml_with_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "concurrency = \"many\"").unwrap();
        let err = WorkbookConfig::load(Some(file.path())).unwrap_err();
        match err {
            PipelineError::InvalidConfig(msg) => {
                assert!(msg.contains(&file.path().display().to_string()))
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_api_key_not_serialized() {
        let mut config = WorkbookConfig::default();
        config.backend.api_key = Some("sk-secret".into());
        let toml = toml::to_string(&config).unwrap();
        assert!(!toml.contains("sk-secret"));
    }

    #[test]
    fn test_retry_policy_from_config() {
        let retry = RetryConfig {
            max_attempts: 4,
            cool_down: false,
            ..RetryConfig::default()
        };
        let policy = retry.policy();
        assert_eq!(policy.max_attempts, 4);
        assert!(!policy.cool_down);
        assert_eq!(policy.backoff.initial_delay, Duration::from_secs(1));
    }
}
