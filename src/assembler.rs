//! Merges per-chunk results into the final [`WorkbookArtifact`].

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;
use std::sync::Arc;

use crate::error::{PipelineError, Result};
use crate::events::{emit, Event, EventHandler};
use crate::types::{
    GeneratedItems, GenerationResult, MultipleChoiceQuestion, TaskKey, TaskKind,
    TrueFalseQuestion, VocabularyEntry,
};

/// The finished workbook for one run.
///
/// Built once by [`ArtifactAssembler::assemble`] and read-only afterwards.
/// Serializes to pretty JSON ([`to_json`](Self::to_json), lossless) and to
/// a plain-text worksheet ([`to_text`](Self::to_text)).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkbookArtifact {
    source_name: String,
    generated_at: DateTime<Utc>,
    model: String,
    chunk_count: usize,
    kinds: Vec<TaskKind>,
    #[serde(default)]
    multiple_choice: Vec<MultipleChoiceQuestion>,
    #[serde(default)]
    true_false: Vec<TrueFalseQuestion>,
    #[serde(default)]
    vocabulary: Vec<VocabularyEntry>,
}

impl WorkbookArtifact {
    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    /// Requested kinds, in workbook section order.
    pub fn kinds(&self) -> &[TaskKind] {
        &self.kinds
    }

    pub fn multiple_choice(&self) -> &[MultipleChoiceQuestion] {
        &self.multiple_choice
    }

    pub fn true_false(&self) -> &[TrueFalseQuestion] {
        &self.true_false
    }

    pub fn vocabulary(&self) -> &[VocabularyEntry] {
        &self.vocabulary
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Plain-text worksheet: a header naming the source, then one numbered
    /// section per requested kind with the correct answers marked.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Workbook for {}", self.source_name);
        let _ = writeln!(
            out,
            "Generated {} by {} from {} chunk(s)",
            self.generated_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.model,
            self.chunk_count
        );

        for kind in &self.kinds {
            out.push('\n');
            let _ = writeln!(out, "=== {} ===", kind.title());
            out.push('\n');
            match kind {
                TaskKind::MultipleChoice => {
                    for (i, q) in self.multiple_choice.iter().enumerate() {
                        let _ = writeln!(out, "{}. {}", i + 1, q.question);
                        for opt in &q.options {
                            let _ = writeln!(out, "   {}: {}", opt.label, opt.text);
                        }
                        let _ = writeln!(out, "   Correct Answer: {}", q.correct);
                        out.push('\n');
                    }
                }
                TaskKind::TrueFalse => {
                    for (i, q) in self.true_false.iter().enumerate() {
                        let _ = writeln!(out, "{}. {}", i + 1, q.statement);
                        let answer = if q.correct { "True" } else { "False" };
                        let _ = writeln!(out, "   Correct Answer: {}", answer);
                        out.push('\n');
                    }
                }
                TaskKind::Vocabulary => {
                    for (i, entry) in self.vocabulary.iter().enumerate() {
                        let _ = writeln!(out, "{}. WORD: {}", i + 1, entry.term);
                        let _ = writeln!(out, "   DEFINITION: {}", entry.definition);
                        if let Some(ref quote) = entry.quote {
                            let _ = writeln!(out, "   QUOTE: {}", quote);
                        }
                        if !entry.synonyms.is_empty() {
                            let _ = writeln!(out, "   SYNONYMS: {}", entry.synonyms.join(", "));
                        }
                        out.push('\n');
                    }
                }
                TaskKind::Synonyms => {}
            }
        }
        out
    }
}

/// Run-level metadata stamped onto the workbook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkbookMeta {
    pub source_name: String,
    pub model: String,
}

/// Checks completeness and merges results in chunk/kind order.
#[derive(Clone, Default)]
pub struct ArtifactAssembler {
    kinds: Vec<TaskKind>,
    chunks: Vec<usize>,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl ArtifactAssembler {
    /// Expect one result per `(chunk, kind)` for every chunk index in
    /// `chunks` and every kind in `kinds`. [`TaskKind::Synonyms`] is never
    /// a workbook section and is ignored here.
    pub fn new(kinds: &[TaskKind], chunks: impl IntoIterator<Item = usize>) -> Self {
        let mut unique: Vec<TaskKind> = Vec::new();
        for kind in kinds {
            if *kind != TaskKind::Synonyms && !unique.contains(kind) {
                unique.push(*kind);
            }
        }
        Self {
            kinds: unique,
            chunks: chunks.into_iter().collect(),
            event_handler: None,
        }
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    /// Every key a complete workbook needs, in assembly order.
    pub fn required_keys(&self) -> Vec<TaskKey> {
        let mut keys: Vec<TaskKey> = self
            .chunks
            .iter()
            .flat_map(|&chunk| self.kinds.iter().map(move |&kind| TaskKey::new(chunk, kind)))
            .collect();
        keys.sort();
        keys
    }

    /// Build the workbook, or fail with [`PipelineError::IncompleteArtifact`]
    /// listing every required key without a result.
    ///
    /// Vocabulary terms that repeat across chunks keep their first occurrence.
    pub fn assemble(
        &self,
        mut results: BTreeMap<TaskKey, GenerationResult>,
        meta: WorkbookMeta,
    ) -> Result<WorkbookArtifact> {
        let required = self.required_keys();
        let missing: Vec<TaskKey> = required
            .iter()
            .filter(|k| !results.contains_key(k))
            .copied()
            .collect();
        if !missing.is_empty() {
            tracing::warn!(missing = missing.len(), "cannot assemble incomplete workbook");
            return Err(PipelineError::IncompleteArtifact { missing });
        }

        let mut multiple_choice = Vec::new();
        let mut true_false = Vec::new();
        let mut vocabulary: Vec<VocabularyEntry> = Vec::new();
        let mut seen_terms: HashSet<String> = HashSet::new();

        for key in &required {
            let Some(result) = results.remove(key) else {
                continue;
            };
            match result.into_items() {
                GeneratedItems::MultipleChoice(qs) => multiple_choice.extend(qs),
                GeneratedItems::TrueFalse(qs) => true_false.extend(qs),
                GeneratedItems::Vocabulary(entries) => {
                    for entry in entries {
                        if seen_terms.insert(entry.term.clone()) {
                            vocabulary.push(entry);
                        } else {
                            tracing::debug!(term = %entry.term, chunk = key.chunk, "dropping repeated vocabulary term");
                        }
                    }
                }
                GeneratedItems::Synonyms(_) => {}
            }
        }

        tracing::info!(
            source = %meta.source_name,
            multiple_choice = multiple_choice.len(),
            true_false = true_false.len(),
            vocabulary = vocabulary.len(),
            "workbook assembled"
        );
        emit(
            &self.event_handler,
            Event::Assembled {
                multiple_choice: multiple_choice.len(),
                true_false: true_false.len(),
                vocabulary: vocabulary.len(),
            },
        );

        Ok(WorkbookArtifact {
            source_name: meta.source_name,
            generated_at: Utc::now(),
            model: meta.model,
            chunk_count: self.chunks.len(),
            kinds: self.kinds.clone(),
            multiple_choice,
            true_false,
            vocabulary,
        })
    }
}

impl std::fmt::Debug for ArtifactAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactAssembler")
            .field("kinds", &self.kinds)
            .field("chunks", &self.chunks)
            .finish()
    }
}
