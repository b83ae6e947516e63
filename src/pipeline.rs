use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::assembler::{ArtifactAssembler, WorkbookArtifact, WorkbookMeta};
use crate::chunker;
use crate::config::WorkbookConfig;
use crate::error::{PipelineError, Result};
use crate::events::{emit, Event, EventHandler};
use crate::gateway::{GenerateOptions, ModelGateway};
use crate::retry::{RetryController, RetryPolicy};
use crate::synonyms::SynonymEnricher;
use crate::types::{GenerationResult, GenerationTask, TaskKey, TaskKind, TextChunk};

/// Runs the whole generation flow for one source text.
///
/// Chunks the text, generates every requested task for every chunk under the
/// [`RetryController`], optionally enriches vocabulary with synonyms, and
/// assembles the [`WorkbookArtifact`].
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use workbook_pipeline::gateway::{GenerateOptions, OllamaGateway};
/// use workbook_pipeline::types::GenerationTask;
/// use workbook_pipeline::WorkbookPipeline;
///
/// # async fn run() -> workbook_pipeline::Result<()> {
/// let gateway = Arc::new(OllamaGateway::new(reqwest::Client::new(), "http://localhost:11434"));
/// let pipeline = WorkbookPipeline::builder(gateway, GenerateOptions::new("deepseek-r1:8b"))
///     .add_task(GenerationTask::multiple_choice(5, 4))
///     .add_task(GenerationTask::true_false(5))
///     .build()?;
///
/// let text = std::fs::read_to_string("story.txt")?;
/// let workbook = pipeline.run("story.txt", &text).await?;
/// println!("{}", workbook.to_text());
/// # Ok(())
/// # }
/// ```
pub struct WorkbookPipeline {
    chunk_target_lines: usize,
    tasks: Vec<GenerationTask>,
    controller: RetryController,
    synonyms: Option<SynonymEnricher>,
    concurrency: usize,
    fail_fast: bool,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl std::fmt::Debug for WorkbookPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkbookPipeline")
            .field("chunk_target_lines", &self.chunk_target_lines)
            .field("tasks", &self.tasks)
            .field("controller", &self.controller)
            .field("synonyms", &self.synonyms.is_some())
            .field("concurrency", &self.concurrency)
            .field("fail_fast", &self.fail_fast)
            .finish()
    }
}

impl WorkbookPipeline {
    pub fn builder(gateway: Arc<dyn ModelGateway>, options: GenerateOptions) -> WorkbookPipelineBuilder {
        WorkbookPipelineBuilder::new(gateway, options)
    }

    /// A builder preloaded from `config`. Callers may still attach a
    /// cancellation flag or event handler before building.
    pub fn from_config(config: &WorkbookConfig, gateway: Arc<dyn ModelGateway>) -> WorkbookPipelineBuilder {
        let mut builder = Self::builder(gateway, config.backend.generate_options())
            .chunk_target_lines(config.chunk_target_lines)
            .retry_policy(config.retry.policy())
            .concurrency(config.concurrency)
            .fail_fast(config.fail_fast);
        for task in config.tasks.generation_tasks() {
            builder = builder.add_task(task);
        }
        if config.tasks.enrich_synonyms() {
            builder = builder.with_synonyms(config.tasks.synonym_count);
        }
        builder
    }

    pub fn tasks(&self) -> &[GenerationTask] {
        &self.tasks
    }

    /// Generate the workbook for `text`. `source_name` labels the result.
    ///
    /// With `fail_fast` the first exhausted task ends the run with its
    /// [`PipelineError::GenerationFailed`]; otherwise every task still runs
    /// and the run ends with [`PipelineError::IncompleteArtifact`].
    pub async fn run(&self, source_name: &str, text: &str) -> Result<WorkbookArtifact> {
        let (chunks, skipped): (Vec<TextChunk>, Vec<TextChunk>) =
            chunker::split(text, self.chunk_target_lines)?.partition(|c| !c.is_blank());
        for chunk in &skipped {
            tracing::warn!(chunk = chunk.index, lines = ?chunk.lines, "skipping whitespace-only chunk");
        }
        emit(
            &self.event_handler,
            Event::Chunked {
                chunks: chunks.len(),
                skipped: skipped.len(),
            },
        );
        tracing::info!(
            source = source_name,
            chunks = chunks.len(),
            tasks = self.tasks.len(),
            concurrency = self.concurrency,
            "starting workbook run"
        );

        let mut results = self.generate_all(&chunks).await?;

        if let Some(ref enricher) = self.synonyms {
            if self.has_all(&chunks, &results) {
                enricher.enrich(&mut results).await?;
            }
        }

        let kinds: Vec<TaskKind> = self.tasks.iter().map(|t| t.kind).collect();
        let mut assembler = ArtifactAssembler::new(&kinds, chunks.iter().map(|c| c.index));
        if let Some(ref handler) = self.event_handler {
            assembler = assembler.with_event_handler(handler.clone());
        }
        assembler.assemble(
            results,
            WorkbookMeta {
                source_name: source_name.to_string(),
                model: self.controller.options().model.clone(),
            },
        )
    }

    /// [`run`](Self::run), abandoned as soon as `shutdown` completes. Calls
    /// still in flight are dropped and the result is
    /// [`PipelineError::Cancelled`].
    pub async fn run_until<F>(&self, source_name: &str, text: &str, shutdown: F) -> Result<WorkbookArtifact>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            result = self.run(source_name, text) => result,
            () = shutdown => {
                tracing::warn!(source = source_name, "run abandoned, dropping in-flight calls");
                Err(PipelineError::Cancelled)
            }
        }
    }

    /// Every `(chunk, task)` pair, at most `concurrency` in flight, keyed so
    /// that completion order does not matter.
    async fn generate_all(&self, chunks: &[TextChunk]) -> Result<BTreeMap<TaskKey, GenerationResult>> {
        let jobs = chunks
            .iter()
            .flat_map(move |chunk| self.tasks.iter().map(move |task| (chunk, task)));

        let mut in_flight = stream::iter(jobs)
            .map(|(chunk, task)| async move {
                let key = TaskKey::new(chunk.index, task.kind);
                (key, self.controller.generate(chunk, task).await)
            })
            .buffer_unordered(self.concurrency);

        let mut results = BTreeMap::new();
        let mut failed = 0usize;
        while let Some((key, outcome)) = in_flight.next().await {
            match outcome {
                Ok(outcome) => {
                    results.insert(key, outcome.result);
                }
                Err(e @ PipelineError::GenerationFailed { .. }) if !self.fail_fast => {
                    failed += 1;
                    tracing::error!(task = %key, error = %e, "task failed, continuing");
                }
                // Dropping the stream cancels whatever is still in flight.
                Err(e) => return Err(e),
            }
        }
        if failed > 0 {
            tracing::warn!(failed, "some tasks failed");
        }
        Ok(results)
    }

    fn has_all(&self, chunks: &[TextChunk], results: &BTreeMap<TaskKey, GenerationResult>) -> bool {
        results.len() == chunks.len() * self.tasks.len()
    }
}

/// Builder for [`WorkbookPipeline`].
pub struct WorkbookPipelineBuilder {
    gateway: Arc<dyn ModelGateway>,
    options: GenerateOptions,
    chunk_target_lines: usize,
    tasks: Vec<GenerationTask>,
    policy: RetryPolicy,
    synonym_count: Option<usize>,
    concurrency: usize,
    fail_fast: bool,
    cancellation: Option<Arc<AtomicBool>>,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl WorkbookPipelineBuilder {
    pub fn new(gateway: Arc<dyn ModelGateway>, options: GenerateOptions) -> Self {
        Self {
            gateway,
            options,
            chunk_target_lines: 1300,
            tasks: Vec::new(),
            policy: RetryPolicy::default(),
            synonym_count: None,
            concurrency: 1,
            fail_fast: true,
            cancellation: None,
            event_handler: None,
        }
    }

    /// Add a task to run against every chunk. A second task of the same
    /// kind replaces the first.
    pub fn add_task(mut self, task: GenerationTask) -> Self {
        self.tasks.retain(|t| t.kind != task.kind);
        self.tasks.push(task);
        self
    }

    pub fn chunk_target_lines(mut self, lines: usize) -> Self {
        self.chunk_target_lines = lines;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Enrich vocabulary entries with exactly `count` synonyms each.
    pub fn with_synonyms(mut self, count: usize) -> Self {
        self.synonym_count = Some(count);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.concurrency = n;
        self
    }

    pub fn fail_fast(mut self, enabled: bool) -> Self {
        self.fail_fast = enabled;
        self
    }

    /// Set a cancellation flag that can be used to abort execution.
    pub fn with_cancellation(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancellation = Some(cancel);
        self
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    /// Build the pipeline, validating configuration.
    pub fn build(self) -> Result<WorkbookPipeline> {
        if self.tasks.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "pipeline must have at least one task".to_string(),
            ));
        }
        if self.tasks.iter().any(|t| t.kind == TaskKind::Synonyms) {
            return Err(PipelineError::InvalidConfig(
                "synonyms are requested with with_synonyms, not as a task".to_string(),
            ));
        }
        if let Some(task) = self.tasks.iter().find(|t| t.required_count == 0) {
            return Err(PipelineError::InvalidConfig(format!(
                "{} count must be at least 1",
                task.kind
            )));
        }
        if self.chunk_target_lines == 0 {
            return Err(PipelineError::InvalidConfig(
                "chunk target size must be at least 1 line".to_string(),
            ));
        }
        if self.concurrency == 0 {
            return Err(PipelineError::InvalidConfig(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.synonym_count == Some(0) {
            return Err(PipelineError::InvalidConfig(
                "synonym count must be at least 1".to_string(),
            ));
        }

        let mut tasks = self.tasks;
        tasks.sort_by_key(|t| t.kind);

        let mut controller =
            RetryController::new(self.gateway, self.options).with_policy(self.policy);
        if let Some(flag) = self.cancellation {
            controller = controller.with_cancellation(flag);
        }
        if let Some(ref handler) = self.event_handler {
            controller = controller.with_event_handler(handler.clone());
        }

        let has_vocabulary = tasks.iter().any(|t| t.kind == TaskKind::Vocabulary);
        let synonyms = match self.synonym_count {
            Some(count) if has_vocabulary => Some(
                SynonymEnricher::new(controller.clone(), count).with_concurrency(self.concurrency),
            ),
            _ => None,
        };

        Ok(WorkbookPipeline {
            chunk_target_lines: self.chunk_target_lines,
            tasks,
            controller,
            synonyms,
            concurrency: self.concurrency,
            fail_fast: self.fail_fast,
            event_handler: self.event_handler,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingHandler;
    use crate::fixtures::{mc_payload, synonyms_payload, tf_payload, vocab_payload};
    use crate::gateway::{MockGateway, MockReply};
    use crate::retry::BackoffConfig;
    use serde_json::json;

    fn lines(n: usize) -> String {
        (0..n).map(|i| format!("line {}\n", i)).collect()
    }

    /// Answers every prompt correctly, by envelope key.
    fn answer(prompt: &str) -> MockReply {
        if prompt.contains("\"synonyms\"") {
            MockReply::text(synonyms_payload(&["alpha", "beta"]))
        } else if prompt.contains("\"mc_questions\"") {
            MockReply::text(mc_payload(5))
        } else if prompt.contains("\"tf_questions\"") {
            MockReply::text(tf_payload(5))
        } else {
            MockReply::text(vocab_payload(&["gale", "harbor", "bravery", "ember", "quay"]))
        }
    }

    fn builder(mock: Arc<MockGateway>) -> WorkbookPipelineBuilder {
        WorkbookPipeline::builder(mock, GenerateOptions::new("test-model"))
            .chunk_target_lines(10)
            .retry_policy(RetryPolicy::new(3).with_backoff(BackoffConfig::none()))
            .add_task(GenerationTask::multiple_choice(5, 4))
            .add_task(GenerationTask::true_false(5))
    }

    #[test]
    fn test_build_requires_a_task() {
        let mock = Arc::new(MockGateway::fixed("[]"));
        let err = WorkbookPipeline::builder(mock, GenerateOptions::default())
            .build()
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }

    #[test]
    fn test_build_rejects_zero_concurrency_and_target() {
        let mock = Arc::new(MockGateway::fixed("[]"));
        assert!(builder(mock.clone()).concurrency(0).build().is_err());
        assert!(builder(mock).chunk_target_lines(0).build().is_err());
    }

    #[test]
    fn test_from_config_copies_tasks() {
        let mock = Arc::new(MockGateway::fixed("[]"));
        let pipeline = WorkbookPipeline::from_config(&WorkbookConfig::default(), mock)
            .build()
            .unwrap();
        let kinds: Vec<_> = pipeline.tasks().iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![TaskKind::MultipleChoice, TaskKind::TrueFalse, TaskKind::Vocabulary]
        );
    }

    #[tokio::test]
    async fn test_run_two_chunks() {
        let mock = Arc::new(MockGateway::responder(answer));
        let pipeline = builder(mock.clone()).build().unwrap();
        let artifact = pipeline.run("story.txt", &lines(20)).await.unwrap();

        assert_eq!(artifact.chunk_count(), 2);
        assert_eq!(artifact.multiple_choice().len(), 10);
        assert_eq!(artifact.true_false().len(), 10);
        assert_eq!(artifact.model(), "test-model");
        assert_eq!(mock.calls(), 4);
    }

    #[tokio::test]
    async fn test_blank_chunk_skipped() {
        // Target 2 cuts "a\nb\n" | "\n\n" | "\nc\n"; the middle chunk is blank.
        let mock = Arc::new(MockGateway::responder(answer));
        let handler = Arc::new(RecordingHandler::default());
        let pipeline = builder(mock.clone())
            .chunk_target_lines(2)
            .with_event_handler(handler.clone())
            .build()
            .unwrap();

        let artifact = pipeline.run("gaps.txt", "a\nb\n\n\n\nc\n").await.unwrap();
        assert_eq!(artifact.chunk_count(), 2);
        assert_eq!(mock.calls(), 4);
        assert_eq!(
            handler.take()[0],
            Event::Chunked {
                chunks: 2,
                skipped: 1
            }
        );
    }

    #[tokio::test]
    async fn test_fail_fast_returns_generation_failed() {
        let mock = Arc::new(MockGateway::responder(|prompt| {
            if prompt.contains("\"tf_questions\"") {
                MockReply::text("I can't do that.")
            } else {
                answer(prompt)
            }
        }));
        let err = builder(mock).build().unwrap().run("s.txt", &lines(20)).await.unwrap_err();
        match err {
            PipelineError::GenerationFailed {
                task,
                chunk,
                attempts,
                ..
            } => {
                assert_eq!(task, TaskKind::TrueFalse);
                assert_eq!(chunk, 0);
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_without_fail_fast_reports_incomplete() {
        let mock = Arc::new(MockGateway::responder(|prompt| {
            if prompt.contains("\"tf_questions\"") {
                MockReply::Unavailable("connection refused".into())
            } else {
                answer(prompt)
            }
        }));
        let err = builder(mock.clone())
            .fail_fast(false)
            .build()
            .unwrap()
            .run("s.txt", &lines(20))
            .await
            .unwrap_err();
        match err {
            PipelineError::IncompleteArtifact { missing } => assert_eq!(
                missing,
                vec![
                    TaskKey::new(0, TaskKind::TrueFalse),
                    TaskKey::new(1, TaskKind::TrueFalse)
                ]
            ),
            other => panic!("unexpected error: {:?}", other),
        }
        // 2 MC calls + 2 x 3 TF attempts
        assert_eq!(mock.calls(), 8);
    }

    #[tokio::test]
    async fn test_concurrent_run_keeps_chunk_order() {
        // Each question names the first line of its chunk.
        let mock = Arc::new(MockGateway::responder(|prompt| {
            let first_line = prompt
                .split("## Text\n")
                .nth(1)
                .and_then(|t| t.lines().next())
                .unwrap_or("?")
                .to_string();
            if prompt.contains("\"mc_questions\"") {
                let items: Vec<_> = (0..5)
                    .map(|i| {
                        json!({
                            "question": format!("{} q{}", first_line, i),
                            "options": ["w", "x", "y", "z"],
                            "correct": "A"
                        })
                    })
                    .collect();
                MockReply::text(json!({ "mc_questions": items }).to_string())
            } else {
                answer(prompt)
            }
        }));
        let artifact = builder(mock)
            .concurrency(4)
            .build()
            .unwrap()
            .run("s.txt", &lines(30))
            .await
            .unwrap();

        let firsts: Vec<_> = artifact
            .multiple_choice()
            .iter()
            .step_by(5)
            .map(|q| q.question.as_str())
            .collect();
        assert_eq!(firsts, vec!["line 0 q0", "line 10 q0", "line 20 q0"]);
    }

    #[tokio::test]
    async fn test_synonym_enrichment() {
        let mock = Arc::new(MockGateway::responder(answer));
        let pipeline = builder(mock)
            .add_task(GenerationTask::vocabulary(5))
            .with_synonyms(2)
            .build()
            .unwrap();
        let artifact = pipeline.run("s.txt", &lines(20)).await.unwrap();

        // Same five terms from both chunks collapse to one entry each.
        assert_eq!(artifact.vocabulary().len(), 5);
        for entry in artifact.vocabulary() {
            assert_eq!(entry.synonyms, vec!["alpha", "beta"]);
            assert_eq!(entry.source.as_ref().map(|s| s.chunk), Some(0));
        }
    }

    /// Never answers.
    struct StalledGateway;

    #[async_trait::async_trait]
    impl ModelGateway for StalledGateway {
        async fn generate(&self, _prompt: &str, _options: &GenerateOptions) -> Result<String> {
            std::future::pending().await
        }

        fn name(&self) -> &'static str {
            "stalled"
        }
    }

    #[tokio::test]
    async fn test_run_until_drops_stalled_calls() {
        let pipeline = WorkbookPipeline::builder(Arc::new(StalledGateway), GenerateOptions::new("m"))
            .add_task(GenerationTask::true_false(5))
            .build()
            .unwrap();
        let shutdown = tokio::time::sleep(std::time::Duration::from_millis(20));
        let err = pipeline
            .run_until("s.txt", &lines(5), shutdown)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
    }

    #[tokio::test]
    async fn test_run_until_without_shutdown_finishes() {
        let mock = Arc::new(MockGateway::responder(answer));
        let artifact = builder(mock)
            .build()
            .unwrap()
            .run_until("s.txt", &lines(20), std::future::pending::<()>())
            .await
            .unwrap();
        assert_eq!(artifact.true_false().len(), 10);
    }

    #[tokio::test]
    async fn test_cancellation_stops_run() {
        let mock = Arc::new(MockGateway::responder(answer));
        let flag = Arc::new(AtomicBool::new(true));
        let err = builder(mock.clone())
            .with_cancellation(flag)
            .build()
            .unwrap()
            .run("s.txt", &lines(20))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
        assert_eq!(mock.calls(), 0);
    }
}
