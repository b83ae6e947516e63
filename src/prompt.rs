//! Prompt construction for generation tasks.
//!
//! Every prompt is a pure function of its inputs: the same chunk and task
//! always render to the same text.

use crate::error::PipelineError;
use crate::types::{GenerationTask, TaskKind, TextChunk};
use crate::validator::error::truncate;

/// Longest excerpt of a rejected response quoted back to the model.
const MAX_ECHOED_RESPONSE: usize = 400;

/// Build the generation prompt for one chunk and task.
///
/// # Example
///
/// ```
/// use workbook_pipeline::chunker::split;
/// use workbook_pipeline::prompt::build;
/// use workbook_pipeline::types::GenerationTask;
///
/// let chunk = split("Mara crossed the river at dawn.\n", 100).unwrap().next().unwrap();
/// let prompt = build(&chunk, &GenerationTask::multiple_choice(5, 4));
/// assert!(prompt.contains("exactly 5"));
/// assert!(prompt.contains("exactly 4 options labeled A-D"));
/// assert!(prompt.contains("Mara crossed the river at dawn."));
/// ```
pub fn build(chunk: &TextChunk, task: &GenerationTask) -> String {
    [
        instruction(task),
        section("Output format", &output_format(task)),
        section("Rules", &numbered_list(&rules(task))),
        section("Text", chunk.content.trim_end()),
    ]
    .join("\n\n")
}

/// [`build`] plus a corrective clause describing why the previous attempt
/// was rejected.
pub fn build_retry(chunk: &TextChunk, task: &GenerationTask, failure: &PipelineError) -> String {
    format!("{}\n\n{}", build(chunk, task), corrective_clause(task, failure))
}

/// Build the prompt asking for `count` synonyms of `term`.
pub fn build_synonyms(term: &str, count: usize) -> String {
    let task = GenerationTask::synonyms(count);
    [
        format!(
            "List exactly {} synonyms for the word \"{}\", as used in a story for students.",
            count, term
        ),
        section("Output format", &output_format(&task)),
        section(
            "Rules",
            &numbered_list(&[
                format!("Return exactly {} synonyms.", count),
                "Each synonym is a single word or short phrase.".to_string(),
                format!("Do not repeat \"{}\" itself or any synonym twice.", term),
                "Respond with the JSON object only, no commentary.".to_string(),
            ]),
        ),
    ]
    .join("\n\n")
}

/// [`build_synonyms`] plus the corrective clause.
pub fn build_synonyms_retry(term: &str, count: usize, failure: &PipelineError) -> String {
    format!(
        "{}\n\n{}",
        build_synonyms(term, count),
        corrective_clause(&GenerationTask::synonyms(count), failure)
    )
}

fn instruction(task: &GenerationTask) -> String {
    let n = task.required_count;
    match task.kind {
        TaskKind::MultipleChoice => format!(
            "Read the text below and write exactly {} multiple-choice questions about it.",
            n
        ),
        TaskKind::TrueFalse => format!(
            "Read the text below and write exactly {} true/false statements about it.",
            n
        ),
        TaskKind::Vocabulary => format!(
            "Read the text below and pick exactly {} challenging vocabulary words from it.",
            n
        ),
        TaskKind::Synonyms => format!("List exactly {} synonyms.", n),
    }
}

/// The JSON shape, shown as an example object with the envelope key.
fn output_format(task: &GenerationTask) -> String {
    let item = match task.kind {
        TaskKind::MultipleChoice => {
            let options = task
                .option_labels()
                .iter()
                .map(|l| format!("\"{}\": \"<option text>\"", l))
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                "{{\"question\": \"<question text>\", \"options\": {{{}}}, \"correct\": \"<label>\"}}",
                options
            )
        }
        TaskKind::TrueFalse => {
            "{\"statement\": \"<statement text>\", \"correct\": true | false}".to_string()
        }
        TaskKind::Vocabulary => "{\"term\": \"<word>\", \"definition\": \"<short definition>\", \"quote\": \"<passage from the text with the **word** in bold>\"}".to_string(),
        TaskKind::Synonyms => "\"<synonym>\"".to_string(),
    };
    format!(
        "Respond with a single JSON object of this form:\n{{\"{}\": [{}, ...]}}",
        task.kind.envelope_key(),
        item
    )
}

fn rules(task: &GenerationTask) -> Vec<String> {
    let n = task.required_count;
    let mut rules = vec![format!(
        "The \"{}\" array must contain exactly {} items.",
        task.kind.envelope_key(),
        n
    )];
    match task.kind {
        TaskKind::MultipleChoice => {
            let labels = task.option_labels();
            let range = match (labels.first(), labels.last()) {
                (Some(first), Some(last)) => format!("{}-{}", first, last),
                _ => String::new(),
            };
            rules.push(format!(
                "Each question has exactly {} options labeled {}, all different.",
                task.option_count, range
            ));
            rules.push(format!(
                "\"correct\" is the label ({}) of the single right option.",
                labels.join(", ")
            ));
            rules.push("Questions must be answerable from the text alone.".to_string());
        }
        TaskKind::TrueFalse => {
            rules.push("\"correct\" is the JSON boolean true or false.".to_string());
            rules.push("Mix true and false statements.".to_string());
        }
        TaskKind::Vocabulary => {
            rules.push("Every term is a single word that appears in the text.".to_string());
            rules.push("No term may appear twice.".to_string());
            rules.push(
                "\"quote\" copies from the text the sentence before the word, the sentence \
                 containing it with the word in **bold**, and the sentence after, if there is one."
                    .to_string(),
            );
        }
        TaskKind::Synonyms => {}
    }
    rules.push("Respond with the JSON object only, no commentary.".to_string());
    rules
}

fn corrective_clause(task: &GenerationTask, failure: &PipelineError) -> String {
    let mut clause = match failure {
        PipelineError::Validation(v) => format!(
            "Your previous response was rejected: {}.",
            v.reason
        ),
        other => format!("The previous attempt failed: {}.", other),
    };
    if let PipelineError::Validation(v) = failure {
        if !v.raw_text.trim().is_empty() {
            clause.push_str("\nPrevious response:\n");
            clause.push_str(&truncate(v.raw_text.trim(), MAX_ECHOED_RESPONSE));
        }
    }
    clause.push_str(&format!(
        "\nTry again. Return exactly {} items in the \"{}\" array and nothing else.",
        task.required_count,
        task.kind.envelope_key()
    ));
    section("Correction", &clause)
}

/// Create a numbered list from items (1-indexed).
pub fn numbered_list(items: &[String]) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("{}. {}", i + 1, item))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Wrap text in a labeled section for structured prompts.
pub fn section(label: &str, content: &str) -> String {
    format!("## {}\n{}", label, content)
}
