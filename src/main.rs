//! `workbook` - generate a comprehension workbook from a text file.
//!
//! Reads the input, chunks it, prompts the configured model for each
//! requested section and writes `workbook-<stem>.json` and
//! `workbook-<stem>.txt`. Nothing is written when any task fails.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use workbook_pipeline::config::{Provider, WorkbookConfig};
use workbook_pipeline::events::{Event, FnEventHandler};
use workbook_pipeline::output::write_artifacts;
use workbook_pipeline::types::TaskKind;
use workbook_pipeline::{PipelineError, WorkbookPipeline};

#[derive(Parser, Debug)]
#[command(name = "workbook", author, version, about = "Generate comprehension workbooks from narrative text", long_about = None)]
struct Cli {
    /// UTF-8 text file to build the workbook from.
    input: PathBuf,

    /// TOML configuration file.
    #[arg(short, long, env = "WORKBOOK_CONFIG")]
    config: Option<PathBuf>,

    /// Directory the workbook files are written to.
    #[arg(short, long, default_value = ".")]
    out_dir: PathBuf,

    /// Model backend: ollama or openai.
    #[arg(long)]
    backend: Option<Provider>,

    /// Backend base URL.
    #[arg(long)]
    base_url: Option<String>,

    /// Model name.
    #[arg(short, long)]
    model: Option<String>,

    /// Sections to generate (repeatable): mc, tf, vocab.
    #[arg(short = 'k', long = "kind")]
    kinds: Vec<TaskKind>,

    /// Target chunk size in lines.
    #[arg(long)]
    chunk_lines: Option<usize>,

    /// Attempts per task before giving up.
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Generations in flight at once.
    #[arg(short = 'j', long)]
    concurrency: Option<usize>,

    /// Add synonyms to every vocabulary entry.
    #[arg(long)]
    synonyms: bool,

    /// Keep going after a task fails and report every missing section.
    #[arg(long)]
    no_fail_fast: bool,

    /// Suppress progress output
    #[arg(short, long)]
    quiet: bool,
}

impl Cli {
    /// Flags override file and environment settings.
    fn apply(&self, config: &mut WorkbookConfig) {
        if let Some(provider) = self.backend {
            config.backend.provider = provider;
        }
        if let Some(ref url) = self.base_url {
            config.backend.base_url = Some(url.clone());
        }
        if let Some(ref model) = self.model {
            config.backend.model = Some(model.clone());
        }
        if !self.kinds.is_empty() {
            config.tasks.kinds = self.kinds.clone();
        }
        if let Some(lines) = self.chunk_lines {
            config.chunk_target_lines = lines;
        }
        if let Some(n) = self.max_attempts {
            config.retry.max_attempts = n;
        }
        if let Some(n) = self.concurrency {
            config.concurrency = n;
        }
        if self.synonyms {
            config.tasks.synonyms = true;
        }
        if self.no_fail_fast {
            config.fail_fast = false;
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn print_progress(event: Event) {
    match event {
        Event::Chunked { chunks, skipped } => {
            eprintln!("{} chunk(s) to process, {} blank skipped", chunks, skipped)
        }
        Event::AttemptFailed {
            key,
            attempt,
            reason,
            delay,
        } => eprintln!("  {} attempt {} failed ({}), retrying in {:?}", key, attempt, reason, delay),
        Event::TaskSucceeded { key, attempts } => eprintln!("  {} done ({} attempt(s))", key, attempts),
        Event::TaskExhausted { key, attempts } => {
            eprintln!("  {} FAILED after {} attempt(s)", key, attempts)
        }
        Event::Assembled {
            multiple_choice,
            true_false,
            vocabulary,
        } => eprintln!(
            "assembled {} multiple-choice, {} true/false, {} vocabulary",
            multiple_choice, true_false, vocabulary
        ),
        Event::AttemptStart { .. } => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = WorkbookConfig::load_with(cli.config.as_deref(), |c| cli.apply(c))
        .context("failed to load configuration")?;

    let text = std::fs::read_to_string(&cli.input)
        .with_context(|| format!("failed to read {}", cli.input.display()))?;
    if text.trim().is_empty() {
        bail!("{} is empty; nothing to build a workbook from", cli.input.display());
    }

    let client = reqwest::Client::new();
    let gateway = config.backend.build_gateway(client)?;
    tracing::info!(
        backend = gateway.name(),
        base_url = config.backend.base_url(),
        model = config.backend.model(),
        "using model backend"
    );

    let cancel = Arc::new(AtomicBool::new(false));
    let mut builder = WorkbookPipeline::from_config(&config, gateway).with_cancellation(cancel.clone());
    if !cli.quiet {
        builder = builder.with_event_handler(Arc::new(FnEventHandler(print_progress)));
    }
    let pipeline = builder.build()?;

    let source_name = cli
        .input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| cli.input.display().to_string());

    let artifact = match pipeline
        .run_until(&source_name, &text, second_interrupt(cancel))
        .await
    {
        Ok(artifact) => artifact,
        Err(e) => {
            report_failure(&e);
            return Err(e).context("no workbook was written");
        }
    };

    let paths = write_artifacts(&artifact, &cli.out_dir, &cli.input)
        .with_context(|| format!("failed to write workbook to {}", cli.out_dir.display()))?;
    println!("{}", paths.json.display());
    println!("{}", paths.text.display());
    Ok(())
}

/// The first Ctrl-C stops new attempts; this resolves on the second, which
/// abandons the attempts still in flight.
async fn second_interrupt(cancel: Arc<AtomicBool>) {
    if tokio::signal::ctrl_c().await.is_err() {
        return std::future::pending().await;
    }
    tracing::warn!("interrupted, finishing in-flight attempts (Ctrl-C again to abort them)");
    cancel.store(true, Ordering::Relaxed);
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn report_failure(err: &PipelineError) {
    match err {
        PipelineError::GenerationFailed {
            task,
            chunk,
            last_reason,
            attempts,
        } => {
            eprintln!("error: {} failed for chunk {} after {} attempt(s)", task, chunk, attempts);
            eprintln!("  last reason: {}", last_reason);
        }
        PipelineError::IncompleteArtifact { missing } => {
            eprintln!("error: {} task(s) did not complete:", missing.len());
            for key in missing {
                eprintln!("  {}", key);
            }
        }
        _ => {}
    }
}
