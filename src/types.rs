use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

/// A contiguous, non-empty slice of the source text.
///
/// Produced by [`chunker::split`](crate::chunker::split). `lines` is a
/// 0-based half-open line range, `bytes` the matching byte range into the
/// original input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// Ordinal position of the chunk in the source (0-based).
    pub index: usize,
    /// Line span covered by this chunk.
    pub lines: Range<usize>,
    /// Byte span covered by this chunk.
    pub bytes: Range<usize>,
    /// The raw text, including its trailing line break if any.
    pub content: String,
}

impl TextChunk {
    /// Number of lines in the chunk.
    pub fn line_count(&self) -> usize {
        self.lines.end - self.lines.start
    }

    /// Whether the chunk holds nothing but whitespace.
    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty()
    }
}

/// What a generation task produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    MultipleChoice,
    TrueFalse,
    Vocabulary,
    /// Synonyms for one vocabulary term. Only used by the synonym enricher.
    Synonyms,
}

impl TaskKind {
    /// Stable snake_case identifier (matches the serde form).
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::MultipleChoice => "multiple_choice",
            TaskKind::TrueFalse => "true_false",
            TaskKind::Vocabulary => "vocabulary",
            TaskKind::Synonyms => "synonyms",
        }
    }

    /// JSON key the model is asked to wrap its array in.
    pub fn envelope_key(&self) -> &'static str {
        match self {
            TaskKind::MultipleChoice => "mc_questions",
            TaskKind::TrueFalse => "tf_questions",
            TaskKind::Vocabulary => "vocabulary",
            TaskKind::Synonyms => "synonyms",
        }
    }

    /// Human-readable section title used in the plain-text workbook.
    pub fn title(&self) -> &'static str {
        match self {
            TaskKind::MultipleChoice => "Multiple-Choice Questions",
            TaskKind::TrueFalse => "True/False Questions",
            TaskKind::Vocabulary => "Vocabulary",
            TaskKind::Synonyms => "Synonyms",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "multiple_choice" | "mc" => Ok(TaskKind::MultipleChoice),
            "true_false" | "tf" => Ok(TaskKind::TrueFalse),
            "vocabulary" | "vocab" => Ok(TaskKind::Vocabulary),
            "synonyms" => Ok(TaskKind::Synonyms),
            other => Err(format!("unknown task kind: '{}'", other)),
        }
    }
}

/// Describes what to produce from one chunk: kind, exact count, schema limits.
///
/// Built once per run from configuration and only read afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationTask {
    pub kind: TaskKind,
    /// Exact number of items a valid response must contain.
    pub required_count: usize,
    /// Options per multiple-choice item. Ignored by other kinds.
    pub option_count: usize,
}

impl GenerationTask {
    pub fn multiple_choice(required_count: usize, option_count: usize) -> Self {
        Self {
            kind: TaskKind::MultipleChoice,
            required_count,
            option_count,
        }
    }

    pub fn true_false(required_count: usize) -> Self {
        Self {
            kind: TaskKind::TrueFalse,
            required_count,
            option_count: 0,
        }
    }

    pub fn vocabulary(required_count: usize) -> Self {
        Self {
            kind: TaskKind::Vocabulary,
            required_count,
            option_count: 0,
        }
    }

    pub fn synonyms(required_count: usize) -> Self {
        Self {
            kind: TaskKind::Synonyms,
            required_count,
            option_count: 0,
        }
    }

    /// Option labels for multiple-choice items: `A`, `B`, `C`, ...
    pub fn option_labels(&self) -> Vec<String> {
        option_labels(self.option_count)
    }
}

/// The first `n` upper-case letters, used as option labels.
pub(crate) fn option_labels(n: usize) -> Vec<String> {
    (b'A'..=b'Z')
        .take(n)
        .map(|b| (b as char).to_string())
        .collect()
}

/// One labeled answer of a multiple-choice question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerOption {
    pub label: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultipleChoiceQuestion {
    pub question: String,
    /// Options in label order.
    pub options: Vec<AnswerOption>,
    /// Label of the correct option; always one of `options`.
    pub correct: String,
}

impl MultipleChoiceQuestion {
    pub fn correct_option(&self) -> Option<&AnswerOption> {
        self.options.iter().find(|o| o.label == self.correct)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrueFalseQuestion {
    pub statement: String,
    pub correct: bool,
}

/// Where in the source a vocabulary entry was found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpan {
    pub chunk: usize,
    pub lines: Range<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VocabularyEntry {
    /// Lower-cased, trimmed term.
    pub term: String,
    pub definition: String,
    /// Passage from the text showing the term in context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceSpan>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub synonyms: Vec<String>,
}

/// Items of a single kind, as produced by one validated model call.
#[derive(Debug, Clone, PartialEq)]
pub enum GeneratedItems {
    MultipleChoice(Vec<MultipleChoiceQuestion>),
    TrueFalse(Vec<TrueFalseQuestion>),
    Vocabulary(Vec<VocabularyEntry>),
    Synonyms(Vec<String>),
}

impl GeneratedItems {
    pub fn kind(&self) -> TaskKind {
        match self {
            GeneratedItems::MultipleChoice(_) => TaskKind::MultipleChoice,
            GeneratedItems::TrueFalse(_) => TaskKind::TrueFalse,
            GeneratedItems::Vocabulary(_) => TaskKind::Vocabulary,
            GeneratedItems::Synonyms(_) => TaskKind::Synonyms,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            GeneratedItems::MultipleChoice(v) => v.len(),
            GeneratedItems::TrueFalse(v) => v.len(),
            GeneratedItems::Vocabulary(v) => v.len(),
            GeneratedItems::Synonyms(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The validated output of one model call for one task.
///
/// Only the [`validator`](crate::validator) constructs these, so the item
/// count always equals the task's required count.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationResult {
    items: GeneratedItems,
}

impl GenerationResult {
    pub(crate) fn new(items: GeneratedItems) -> Self {
        Self { items }
    }

    pub fn kind(&self) -> TaskKind {
        self.items.kind()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &GeneratedItems {
        &self.items
    }

    pub fn into_items(self) -> GeneratedItems {
        self.items
    }

    /// The synonym list of a [`TaskKind::Synonyms`] result; empty for other kinds.
    pub fn into_synonyms(self) -> Vec<String> {
        match self.items {
            GeneratedItems::Synonyms(words) => words,
            _ => Vec::new(),
        }
    }

    pub(crate) fn vocabulary_mut(&mut self) -> Option<&mut Vec<VocabularyEntry>> {
        match self.items {
            GeneratedItems::Vocabulary(ref mut entries) => Some(entries),
            _ => None,
        }
    }

    /// Stamp vocabulary entries with the chunk they came from.
    pub(crate) fn with_source(self, chunk: &TextChunk) -> Self {
        match self.items {
            GeneratedItems::Vocabulary(entries) => Self::new(GeneratedItems::Vocabulary(
                entries
                    .into_iter()
                    .map(|mut e| {
                        e.source = Some(SourceSpan {
                            chunk: chunk.index,
                            lines: chunk.lines.clone(),
                        });
                        e
                    })
                    .collect(),
            )),
            other => Self::new(other),
        }
    }
}

/// Identifies one unit of work: a task kind applied to one chunk.
///
/// Ordered by chunk first, then kind, which is the order items appear in
/// the final workbook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskKey {
    pub chunk: usize,
    pub kind: TaskKind,
}

impl TaskKey {
    pub fn new(chunk: usize, kind: TaskKind) -> Self {
        Self { chunk, kind }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (chunk {})", self.kind, self.chunk)
    }
}
