//! Optional pass that fills in synonyms for every vocabulary term.

use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::{BTreeMap, HashMap};

use crate::error::Result;
use crate::retry::RetryController;
use crate::types::{GeneratedItems, GenerationResult, TaskKey};

/// Asks the model for exactly `count` synonyms per vocabulary term.
///
/// Each distinct term is requested once, even when several chunks produced
/// it. A term whose retries run out fails the whole pass with
/// [`GenerationFailed`](crate::PipelineError::GenerationFailed); entries are
/// never given made-up filler.
#[derive(Debug, Clone)]
pub struct SynonymEnricher {
    controller: RetryController,
    count: usize,
    concurrency: usize,
}

impl SynonymEnricher {
    pub fn new(controller: RetryController, count: usize) -> Self {
        Self {
            controller,
            count,
            concurrency: 1,
        }
    }

    /// At most `n` synonym requests in flight. Default: 1.
    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    /// Fill `synonyms` on every vocabulary entry in `results`.
    ///
    /// Returns the number of distinct terms requested. Entries are only
    /// touched once every request has succeeded.
    pub async fn enrich(&self, results: &mut BTreeMap<TaskKey, GenerationResult>) -> Result<usize> {
        // (chunk, term) in workbook order, first occurrence only
        let mut terms: Vec<(usize, String)> = Vec::new();
        for (key, result) in results.iter() {
            if let GeneratedItems::Vocabulary(entries) = result.items() {
                for entry in entries {
                    if !terms.iter().any(|(_, t)| *t == entry.term) {
                        terms.push((key.chunk, entry.term.clone()));
                    }
                }
            }
        }
        if terms.is_empty() {
            return Ok(0);
        }
        tracing::info!(terms = terms.len(), count = self.count, "requesting synonyms");

        let found: HashMap<String, Vec<String>> = stream::iter(terms)
            .map(|(chunk, term)| async move {
                let outcome = self
                    .controller
                    .generate_synonyms(chunk, &term, self.count)
                    .await?;
                Ok::<_, crate::PipelineError>((term, outcome.result.into_synonyms()))
            })
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        for result in results.values_mut() {
            if let Some(entries) = result.vocabulary_mut() {
                for entry in entries.iter_mut() {
                    if let Some(words) = found.get(&entry.term) {
                        entry.synonyms = words.clone();
                    }
                }
            }
        }
        Ok(found.len())
    }
}
