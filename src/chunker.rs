//! Line-based splitting of source text into model-sized chunks.

use crate::error::{PipelineError, Result};
use crate::types::TextChunk;

/// Split `text` into chunks of roughly `target_lines` lines.
///
/// A cut prefers a paragraph break (the line before it is blank) within
/// ±10% of the target, nearest first, and otherwise falls on the line break
/// at the target. Lines are never split. Once no more than `target_lines`
/// plus that 10% window remain they form the last chunk, so a cut that
/// lands early never leaves a sliver behind.
///
/// The returned iterator is lazy and can be cloned to walk the chunks again.
/// Concatenating every chunk's `content` gives back `text` exactly.
///
/// # Examples
///
/// ```
/// use workbook_pipeline::chunker::split;
///
/// let text = "one\ntwo\n\nthree\nfour\n";
/// let chunks: Vec<_> = split(text, 3).unwrap().collect();
/// assert_eq!(chunks.len(), 2);
/// assert_eq!(chunks[0].content, "one\ntwo\n\n");
/// assert_eq!(chunks[1].content, "three\nfour\n");
/// ```
pub fn split(text: &str, target_lines: usize) -> Result<Chunks<'_>> {
    if target_lines == 0 {
        return Err(PipelineError::InvalidConfig(
            "chunk target size must be at least 1 line".into(),
        ));
    }

    let mut line_starts: Vec<usize> = text
        .split_inclusive('\n')
        .scan(0, |offset, line| {
            let start = *offset;
            *offset += line.len();
            Some(start)
        })
        .collect();
    line_starts.push(text.len());

    Ok(Chunks {
        text,
        line_starts,
        target: target_lines,
        next_line: 0,
        next_index: 0,
    })
}

/// Iterator over the chunks of one text. See [`split`].
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    text: &'a str,
    /// Byte offset of every line start, plus `text.len()` as a sentinel.
    line_starts: Vec<usize>,
    target: usize,
    next_line: usize,
    next_index: usize,
}

impl<'a> Chunks<'a> {
    fn line_count(&self) -> usize {
        self.line_starts.len() - 1
    }

    fn line(&self, i: usize) -> &'a str {
        &self.text[self.line_starts[i]..self.line_starts[i + 1]]
    }

    /// Line index the chunk starting at `start` should end before.
    fn cut_after(&self, start: usize) -> usize {
        let total = self.line_count();
        let slack = self.target / 10;
        if total - start <= self.target + slack {
            return total;
        }

        let ideal = start + self.target;
        let lo = (ideal - slack).max(start + 1);
        let hi = (ideal + slack).min(total - 1);

        (lo..=hi)
            .filter(|&cut| self.line(cut - 1).trim().is_empty())
            .min_by_key(|&cut| cut.abs_diff(ideal))
            .unwrap_or(ideal)
    }
}

impl Iterator for Chunks<'_> {
    type Item = TextChunk;

    fn next(&mut self) -> Option<TextChunk> {
        let start = self.next_line;
        if start >= self.line_count() {
            return None;
        }
        let end = self.cut_after(start);
        let bytes = self.line_starts[start]..self.line_starts[end];

        let chunk = TextChunk {
            index: self.next_index,
            lines: start..end,
            content: self.text[bytes.clone()].to_string(),
            bytes,
        };
        self.next_line = end;
        self.next_index += 1;
        Some(chunk)
    }
}
