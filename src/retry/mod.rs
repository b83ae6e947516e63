//! Bounded retries around prompt → gateway → validator.
//!
//! Each `(chunk, task)` pair runs through a small state machine:
//!
//! ```text
//! Pending ──► Attempting{1} ──► Attempting{2} ──► ... ──► Exhausted
//!                  │                  │
//!                  └──────────────────┴──────────────────► Succeeded
//! ```
//!
//! Every failure (backend unavailable, timeout, HTTP error, invalid output)
//! counts as one attempt. Between attempts the controller sleeps the backoff
//! delay, and from the second attempt on the prompt carries a corrective
//! clause naming the previous failure.

pub mod backoff;

pub use backoff::{BackoffConfig, JitterStrategy};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{PipelineError, Result};
use crate::events::{emit, Event, EventHandler};
use crate::gateway::{GenerateOptions, ModelGateway};
use crate::prompt;
use crate::types::{GenerationResult, GenerationTask, TaskKey, TaskKind, TextChunk};
use crate::validator::{self, ValidationError};

/// Temperature drop per retry when cool-down is on.
const COOL_DOWN_STEP: f64 = 0.2;

/// How many attempts to make and how to pace them.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. At least 1. Default: 3.
    pub max_attempts: u32,
    pub backoff: BackoffConfig,
    /// Lower the temperature by 0.2 per retry (floored at 0.0). Default: `true`.
    pub cool_down: bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn no_cool_down(mut self) -> Self {
        self.cool_down = false;
        self
    }

    /// Sampling temperature for attempt `attempt` (1-indexed).
    pub fn temperature_for(&self, base: f64, attempt: u32) -> f64 {
        if !self.cool_down {
            return base;
        }
        let retries = attempt.saturating_sub(1) as f64;
        (base - COOL_DOWN_STEP * retries).max(0.0)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffConfig::standard(),
            cool_down: true,
        }
    }
}

/// Where one `(chunk, task)` pair is in its retry lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Pending,
    Attempting { attempt: u32 },
    Succeeded { attempts: u32 },
    Exhausted { attempts: u32 },
}

/// A validated result and the number of attempts it took.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOutcome {
    pub result: GenerationResult,
    /// 1-indexed attempt that succeeded.
    pub attempts: u32,
}

/// Drives generation for one task at a time with bounded retries.
///
/// Cheap to clone; all clones share the gateway, cancellation flag and
/// event handler.
#[derive(Clone)]
pub struct RetryController {
    gateway: Arc<dyn ModelGateway>,
    options: GenerateOptions,
    policy: RetryPolicy,
    cancel: Option<Arc<AtomicBool>>,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl std::fmt::Debug for RetryController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryController")
            .field("gateway", &self.gateway.name())
            .field("options", &self.options)
            .field("policy", &self.policy)
            .field("has_cancel", &self.cancel.is_some())
            .field("has_event_handler", &self.event_handler.is_some())
            .finish()
    }
}

impl RetryController {
    pub fn new(gateway: Arc<dyn ModelGateway>, options: GenerateOptions) -> Self {
        Self {
            gateway,
            options,
            policy: RetryPolicy::default(),
            cancel: None,
            event_handler: None,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Stop before the next attempt once `flag` is set.
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn options(&self) -> &GenerateOptions {
        &self.options
    }

    pub fn gateway_name(&self) -> &'static str {
        self.gateway.name()
    }

    /// Generate and validate `task` for `chunk`.
    ///
    /// Returns [`PipelineError::GenerationFailed`] once `max_attempts`
    /// attempts have failed, or [`PipelineError::Cancelled`] if the
    /// cancellation flag is set.
    pub async fn generate(&self, chunk: &TextChunk, task: &GenerationTask) -> Result<RetryOutcome> {
        let key = TaskKey::new(chunk.index, task.kind);
        let outcome = self
            .drive(
                key,
                |failure| match failure {
                    None => prompt::build(chunk, task),
                    Some(f) => prompt::build_retry(chunk, task, f),
                },
                |raw| validator::validate(raw, task),
            )
            .await?;
        Ok(RetryOutcome {
            result: outcome.result.with_source(chunk),
            attempts: outcome.attempts,
        })
    }

    /// Generate exactly `count` synonyms for `term`. `chunk` is the index of
    /// the chunk the term came from; it only labels logs and errors.
    pub async fn generate_synonyms(&self, chunk: usize, term: &str, count: usize) -> Result<RetryOutcome> {
        let task = GenerationTask::synonyms(count);
        self.drive(
            TaskKey::new(chunk, TaskKind::Synonyms),
            |failure| match failure {
                None => prompt::build_synonyms(term, count),
                Some(f) => prompt::build_synonyms_retry(term, count, f),
            },
            |raw| validator::validate_synonyms(raw, &task, term),
        )
        .await
    }

    async fn drive<P, V>(&self, key: TaskKey, prompt_for: P, validate: V) -> Result<RetryOutcome>
    where
        P: Fn(Option<&PipelineError>) -> String,
        V: Fn(&str) -> std::result::Result<GenerationResult, ValidationError>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut state = AttemptState::Pending;
        let mut last_error: Option<PipelineError> = None;

        for attempt in 1..=max_attempts {
            self.check_cancelled()?;
            transition(key, &mut state, AttemptState::Attempting { attempt });
            emit(&self.event_handler, Event::AttemptStart { key, attempt });

            let prompt = prompt_for(last_error.as_ref());
            let options = GenerateOptions {
                temperature: self.policy.temperature_for(self.options.temperature, attempt),
                ..self.options.clone()
            };

            let outcome = match self.gateway.generate(&prompt, &options).await {
                Ok(raw) => validate(&raw).map_err(PipelineError::from),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(result) => {
                    transition(key, &mut state, AttemptState::Succeeded { attempts: attempt });
                    tracing::info!(task = %key, attempts = attempt, items = result.len(), "task succeeded");
                    emit(
                        &self.event_handler,
                        Event::TaskSucceeded {
                            key,
                            attempts: attempt,
                        },
                    );
                    return Ok(RetryOutcome {
                        result,
                        attempts: attempt,
                    });
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    if attempt < max_attempts {
                        let delay = self.policy.backoff.delay_after(attempt, &e);
                        tracing::warn!(
                            task = %key,
                            attempt,
                            reason = e.kind_label(),
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "attempt failed, retrying"
                        );
                        emit(
                            &self.event_handler,
                            Event::AttemptFailed {
                                key,
                                attempt,
                                reason: e.kind_label(),
                                delay,
                            },
                        );
                        tokio::time::sleep(delay).await;
                        self.check_cancelled()?;
                    } else {
                        tracing::warn!(task = %key, attempt, reason = e.kind_label(), error = %e, "attempt failed");
                    }
                    last_error = Some(e);
                }
            }
        }

        transition(key, &mut state, AttemptState::Exhausted { attempts: max_attempts });
        emit(
            &self.event_handler,
            Event::TaskExhausted {
                key,
                attempts: max_attempts,
            },
        );
        let last_reason = last_error.unwrap_or_else(|| {
            PipelineError::InvalidConfig("retry loop made no attempts".into())
        });
        Err(PipelineError::GenerationFailed {
            task: key.kind,
            chunk: key.chunk,
            last_reason: Box::new(last_reason),
            attempts: max_attempts,
        })
    }

    fn check_cancelled(&self) -> Result<()> {
        match self.cancel {
            Some(ref flag) if flag.load(Ordering::Relaxed) => Err(PipelineError::Cancelled),
            _ => Ok(()),
        }
    }
}

fn transition(key: TaskKey, state: &mut AttemptState, next: AttemptState) {
    tracing::debug!(task = %key, from = ?*state, to = ?next, "attempt state");
    *state = next;
}
