//! Delay schedule between generation attempts: exponential growth, capped,
//! with jitter.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::PipelineError;

/// How long to wait before retrying a failed attempt.
///
/// # Example
///
/// ```
/// use workbook_pipeline::retry::backoff::{BackoffConfig, JitterStrategy};
/// use std::time::Duration;
///
/// let config = BackoffConfig {
///     jitter: JitterStrategy::None,
///     ..BackoffConfig::standard()
/// };
/// assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
/// assert_eq!(config.delay_for_attempt(2), Duration::from_secs(4));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first retry. Default: 1 second.
    pub initial_delay: Duration,

    /// Delay grows: initial, initial * multiplier, initial * multiplier^2, ...
    pub multiplier: f64,

    /// Cap on any single delay. Default: 60 seconds.
    pub max_delay: Duration,

    pub jitter: JitterStrategy,

    /// Use the backend's `Retry-After` hint instead of the computed delay.
    pub respect_retry_after: bool,
}

/// Jitter applied to the computed delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// Delay is exactly the calculated value.
    None,

    /// Random value in `[0, calculated_delay]`.
    #[default]
    Full,

    /// `calculated_delay/2 + random in [0, calculated_delay/2]`.
    Equal,
}

impl BackoffConfig {
    /// 1s initial, 2x multiplier, 60s cap, full jitter, respects Retry-After.
    pub fn standard() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            jitter: JitterStrategy::Full,
            respect_retry_after: true,
        }
    }

    /// Retry immediately. For tests and for callers that pace themselves.
    pub fn none() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: JitterStrategy::None,
            respect_retry_after: false,
            ..Self::standard()
        }
    }

    /// Calculate the delay for retry N (0-indexed).
    ///
    /// The base delay is `initial_delay * multiplier^attempt`, capped at
    /// `max_delay`. Jitter is then applied.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64()).max(0.0);

        let jittered = match self.jitter {
            JitterStrategy::None => capped,
            JitterStrategy::Full => fastrand::f64() * capped,
            JitterStrategy::Equal => capped / 2.0 + fastrand::f64() * (capped / 2.0),
        };

        Duration::from_secs_f64(jittered)
    }

    /// Delay after failed attempt `attempt` (1-indexed) ended with `error`.
    pub fn delay_after(&self, attempt: u32, error: &PipelineError) -> Duration {
        match error.retry_after() {
            Some(hint) if self.respect_retry_after => hint,
            _ => self.delay_for_attempt(attempt.saturating_sub(1)),
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exact() -> BackoffConfig {
        BackoffConfig {
            jitter: JitterStrategy::None,
            ..BackoffConfig::standard()
        }
    }

    #[test]
    fn test_backoff_delay_exponential() {
        let config = exact();
        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(8));
    }

    #[test]
    fn test_backoff_delay_capped_at_max() {
        let config = BackoffConfig {
            max_delay: Duration::from_secs(5),
            ..exact()
        };
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(5));
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(5));
    }

    #[test]
    fn test_backoff_jitter_in_range() {
        let full = BackoffConfig::standard();
        let equal = BackoffConfig {
            jitter: JitterStrategy::Equal,
            ..BackoffConfig::standard()
        };
        for _ in 0..100 {
            assert!(full.delay_for_attempt(1) <= Duration::from_secs(2));
            let d = equal.delay_for_attempt(1);
            assert!(d >= Duration::from_secs(1) && d <= Duration::from_secs(2));
        }
    }

    #[test]
    fn test_none_is_immediate() {
        let config = BackoffConfig::none();
        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(4), Duration::ZERO);
    }

    #[test]
    fn test_retry_after_hint_wins() {
        let config = exact();
        let throttled = PipelineError::BackendError {
            backend: "openai",
            status: 429,
            body: "rate limited".into(),
            retry_after: Some(Duration::from_secs(30)),
        };
        assert_eq!(config.delay_after(1, &throttled), Duration::from_secs(30));

        let ignoring = BackoffConfig {
            respect_retry_after: false,
            ..exact()
        };
        assert_eq!(ignoring.delay_after(1, &throttled), Duration::from_secs(1));
    }

    #[test]
    fn test_delay_after_uses_attempt_number() {
        let config = exact();
        let timeout = PipelineError::BackendTimeout {
            backend: "ollama",
            timeout: Duration::from_secs(1),
        };
        assert_eq!(config.delay_after(1, &timeout), Duration::from_secs(1));
        assert_eq!(config.delay_after(2, &timeout), Duration::from_secs(2));
    }
}
