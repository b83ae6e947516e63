//! Text cleanup and payload extraction applied before JSON decoding.
//!
//! Every response goes through [`preprocess`] first. When strict decoding of
//! the cleaned text fails, [`outermost_bracketed`] supplies the recovery
//! candidates.

/// Strips `<think>`/`<thinking>` blocks, then trims whitespace.
pub fn preprocess(text: &str) -> String {
    let stripped = strip_think_tags(text);
    stripped.trim().to_string()
}

/// Strip all `<think>...</think>` and `<thinking>...</thinking>` blocks from text.
///
/// Handles complete blocks, incomplete blocks (no closing tag),
/// and multiple sequential blocks.
///
/// # Examples
///
/// ```
/// use workbook_pipeline::validator::extract::strip_think_tags;
///
/// assert_eq!(strip_think_tags("<think>reasoning</think>[1]"), "[1]");
/// assert_eq!(strip_think_tags("<think>no closing tag"), "");
/// ```
pub fn strip_think_tags(text: &str) -> String {
    let result = strip_tag_variant(text, "<think>", "</think>");
    strip_tag_variant(&result, "<thinking>", "</thinking>")
}

fn strip_tag_variant(text: &str, open: &str, close: &str) -> String {
    let mut result = text.to_string();
    while let Some(start) = result.find(open) {
        if let Some(end_offset) = result[start..].find(close) {
            let end = start + end_offset + close.len();
            result = format!("{}{}", &result[..start], &result[end..]);
        } else {
            // Unterminated block swallows the rest.
            result.truncate(start);
            break;
        }
    }
    result
}

/// Candidate payloads delimited by the outermost structural brackets.
///
/// For each bracket pair (`[`/`]` and `{`/`}`) that occurs, the candidate
/// runs from the first opener to the last closer. Candidates are returned
/// largest first; the prose a model wraps around its payload falls outside
/// both spans.
///
/// # Examples
///
/// ```
/// use workbook_pipeline::validator::extract::outermost_bracketed;
///
/// let raw = r#"Sure! Here you go: [{"a": 1}, {"a": 2}] Hope that helps."#;
/// assert_eq!(outermost_bracketed(raw)[0], r#"[{"a": 1}, {"a": 2}]"#);
/// ```
pub fn outermost_bracketed(text: &str) -> Vec<&str> {
    let mut candidates: Vec<&str> = [('[', ']'), ('{', '}')]
        .iter()
        .filter_map(|&(open, close)| {
            let start = text.find(open)?;
            let end = text.rfind(close)?;
            (end > start).then(|| &text[start..=end])
        })
        .collect();
    candidates.sort_by(|a, b| b.len().cmp(&a.len()));
    candidates
}
