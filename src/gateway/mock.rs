//! Scripted gateway for testing without a live model.
//!
//! [`MockGateway`] plays back a script of [`MockReply`]s in order (cycling
//! when exhausted), or answers through a closure that sees the prompt. It
//! records every prompt it receives.
//!
//! # Example
//!
//! ```
//! use workbook_pipeline::gateway::{MockGateway, MockReply};
//!
//! let mock = MockGateway::new(vec![
//!     MockReply::Unavailable("connection refused".into()),
//!     MockReply::text("[]"),
//! ]);
//! assert_eq!(mock.calls(), 0);
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{GenerateOptions, ModelGateway};
use crate::error::{PipelineError, Result};

const NAME: &str = "mock";

/// One scripted outcome of a [`MockGateway`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum MockReply {
    /// Successful raw response text.
    Text(String),
    /// Fails with [`PipelineError::BackendUnavailable`].
    Unavailable(String),
    /// Fails with [`PipelineError::BackendTimeout`] using the call's timeout.
    Timeout,
    /// Fails with [`PipelineError::BackendError`].
    Status {
        status: u16,
        body: String,
        retry_after: Option<Duration>,
    },
}

impl MockReply {
    pub fn text(text: impl Into<String>) -> Self {
        MockReply::Text(text.into())
    }

    fn into_result(self, options: &GenerateOptions) -> Result<String> {
        match self {
            MockReply::Text(text) => Ok(text),
            MockReply::Unavailable(message) => Err(PipelineError::BackendUnavailable {
                backend: NAME,
                message,
            }),
            MockReply::Timeout => Err(PipelineError::BackendTimeout {
                backend: NAME,
                timeout: options.timeout,
            }),
            MockReply::Status {
                status,
                body,
                retry_after,
            } => Err(PipelineError::BackendError {
                backend: NAME,
                status,
                body,
                retry_after,
            }),
        }
    }
}

type Responder = Box<dyn Fn(&str) -> MockReply + Send + Sync>;

enum Script {
    Replies(Vec<MockReply>),
    Responder(Responder),
}

/// A test gateway with scripted replies.
pub struct MockGateway {
    script: Script,
    index: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl std::fmt::Debug for MockGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let script = match &self.script {
            Script::Replies(r) => format!("{} replies", r.len()),
            Script::Responder(_) => "responder".to_string(),
        };
        f.debug_struct("MockGateway")
            .field("script", &script)
            .field("calls", &self.calls())
            .finish()
    }
}

impl MockGateway {
    /// Replies are returned in order; when exhausted, cycles from the beginning.
    /// An empty script answers every call with `BackendUnavailable`.
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self::with_script(Script::Replies(replies))
    }

    /// Always return the same text.
    pub fn fixed(text: impl Into<String>) -> Self {
        Self::new(vec![MockReply::Text(text.into())])
    }

    /// Successful replies, in order.
    pub fn texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(texts.into_iter().map(|t| MockReply::Text(t.into())).collect())
    }

    /// Compute each reply from the prompt. Useful when calls run concurrently
    /// and arrival order is not fixed.
    pub fn responder(f: impl Fn(&str) -> MockReply + Send + Sync + 'static) -> Self {
        Self::with_script(Script::Responder(Box::new(f)))
    }

    fn with_script(script: Script) -> Self {
        Self {
            script,
            index: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Number of `generate` calls so far.
    pub fn calls(&self) -> usize {
        self.index.load(Ordering::SeqCst)
    }

    /// Every prompt received, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn next_reply(&self, prompt: &str) -> MockReply {
        let idx = self.index.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Script::Replies(replies) if replies.is_empty() => {
                MockReply::Unavailable("mock script is empty".into())
            }
            Script::Replies(replies) => replies[idx % replies.len()].clone(),
            Script::Responder(f) => f(prompt),
        }
    }
}

#[async_trait]
impl ModelGateway for MockGateway {
    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(prompt.to_string());
        self.next_reply(prompt).into_result(options)
    }

    fn name(&self) -> &'static str {
        NAME
    }
}
