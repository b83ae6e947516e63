//! # Workbook Pipeline
//!
//! Turns a narrative text into a validated comprehension workbook:
//! multiple-choice questions, true/false statements and vocabulary, each
//! generated by a language model and checked before it is accepted.
//!
//! Model output is treated as untrusted. Every response must decode as JSON,
//! contain exactly the requested number of items and match the item schema;
//! anything else is retried with a corrective prompt until the attempt
//! budget runs out. A workbook is only produced when every section of every
//! chunk validated.
//!
//! ## Core Concepts
//!
//! - **[`chunker::split`]** cuts the text into line-based chunks, preferring
//!   paragraph breaks.
//! - **[`prompt`]** renders a chunk and a [`GenerationTask`] into a model
//!   instruction.
//! - **[`ModelGateway`]** is one request to a model backend (Ollama, an
//!   OpenAI-compatible API, or the scripted [`MockGateway`]).
//! - **[`validator::validate`]** turns raw text into a [`GenerationResult`]
//!   or a typed [`ValidationError`].
//! - **[`RetryController`]** drives prompt, gateway and validator with
//!   backoff until a result validates.
//! - **[`ArtifactAssembler`]** merges per-chunk results into a
//!   [`WorkbookArtifact`].
//! - **[`WorkbookPipeline`]** runs all of the above for one input.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use workbook_pipeline::config::WorkbookConfig;
//! use workbook_pipeline::WorkbookPipeline;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = WorkbookConfig::load(None)?;
//!     let gateway = config.backend.build_gateway(reqwest::Client::new())?;
//!     let pipeline = WorkbookPipeline::from_config(&config, gateway).build()?;
//!
//!     let text = std::fs::read_to_string("story.txt")?;
//!     let workbook = pipeline.run("story.txt", &text).await?;
//!     println!("{}", workbook.to_text());
//!     Ok(())
//! }
//! ```

pub mod assembler;
pub mod chunker;
pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod output;
pub mod pipeline;
pub mod prompt;
pub mod retry;
pub mod synonyms;
pub mod types;
pub mod validator;

#[cfg(test)]
mod fixtures;

pub use assembler::{ArtifactAssembler, WorkbookArtifact, WorkbookMeta};
pub use config::WorkbookConfig;
pub use error::{PipelineError, Result};
pub use events::{Event, EventHandler, FnEventHandler};
pub use gateway::{GenerateOptions, MockGateway, MockReply, ModelGateway, OllamaGateway};
#[cfg(feature = "openai")]
pub use gateway::OpenAiGateway;
pub use pipeline::{WorkbookPipeline, WorkbookPipelineBuilder};
pub use retry::{BackoffConfig, RetryController, RetryOutcome, RetryPolicy};
pub use synonyms::SynonymEnricher;
pub use types::{GenerationResult, GenerationTask, TaskKey, TaskKind, TextChunk};
pub use validator::{ValidationError, ValidationReason};
