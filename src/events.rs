//! Progress events for the enclosing application.
//!
//! The pipeline logs through `tracing`; events are the structured channel a
//! caller can hook into for a progress bar or status line. Implement
//! [`EventHandler`] (or wrap a closure in [`FnEventHandler`]) and pass it to
//! the pipeline builder.

use std::sync::Arc;
use std::time::Duration;

use crate::types::TaskKey;

/// Events emitted during a pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The input has been chunked.
    Chunked {
        /// Non-blank chunks that will be processed.
        chunks: usize,
        /// Whitespace-only chunks that were skipped.
        skipped: usize,
    },
    /// A model call for `key` is about to be made.
    AttemptStart {
        key: TaskKey,
        /// 1-indexed.
        attempt: u32,
    },
    /// An attempt failed and will be retried after `delay`.
    AttemptFailed {
        key: TaskKey,
        attempt: u32,
        /// Short failure label, e.g. `count_mismatch` or `backend_timeout`.
        reason: &'static str,
        delay: Duration,
    },
    /// `key` produced a valid result.
    TaskSucceeded { key: TaskKey, attempts: u32 },
    /// `key` ran out of attempts.
    TaskExhausted { key: TaskKey, attempts: u32 },
    /// The workbook was assembled.
    Assembled {
        multiple_choice: usize,
        true_false: usize,
        vocabulary: usize,
    },
}

/// Handler for pipeline progress events.
///
/// Entirely optional; the pipeline behaves the same without one.
///
/// # Example
///
/// ```
/// use workbook_pipeline::events::{Event, EventHandler};
///
/// struct PrintHandler;
///
/// impl EventHandler for PrintHandler {
///     fn on_event(&self, event: Event) {
///         match event {
///             Event::TaskSucceeded { key, attempts } => println!("[ok] {} in {}", key, attempts),
///             Event::TaskExhausted { key, .. } => println!("[failed] {}", key),
///             _ => {}
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: Event);
}

/// Emit an event if a handler is present. No-op otherwise.
pub(crate) fn emit(handler: &Option<Arc<dyn EventHandler>>, event: Event) {
    if let Some(ref h) = handler {
        h.on_event(event);
    }
}

/// An [`EventHandler`] backed by a closure.
///
/// # Example
///
/// ```
/// use workbook_pipeline::events::{Event, FnEventHandler};
/// use std::sync::Arc;
///
/// let handler = Arc::new(FnEventHandler(|event: Event| {
///     if let Event::Chunked { chunks, .. } = event {
///         println!("{} chunks", chunks);
///     }
/// }));
/// ```
pub struct FnEventHandler<F: Fn(Event) + Send + Sync>(pub F);

impl<F: Fn(Event) + Send + Sync> EventHandler for FnEventHandler<F> {
    fn on_event(&self, event: Event) {
        (self.0)(event);
    }
}

/// Collects every event; for tests.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingHandler {
    pub events: std::sync::Mutex<Vec<Event>>,
}

#[cfg(test)]
impl RecordingHandler {
    pub fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }
}

#[cfg(test)]
impl EventHandler for RecordingHandler {
    fn on_event(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}
