//! Per-item schema checks for each task kind.
//!
//! Each checker takes the decoded item array (already count-checked) and
//! either converts every item into its typed record or reports the first
//! offending item index and field.

use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

use super::error::ValidationReason;
use crate::types::{
    option_labels, AnswerOption, MultipleChoiceQuestion, TrueFalseQuestion, VocabularyEntry,
};

type Checked<T> = Result<T, ValidationReason>;

fn as_object(item: &Value, index: usize) -> Checked<&Map<String, Value>> {
    item.as_object().ok_or_else(|| {
        ValidationReason::schema(index, "<item>", format!("expected an object, found {}", type_name(item)))
    })
}

/// Look up the first present key among `names` (canonical name first).
fn lookup<'a>(
    obj: &'a Map<String, Value>,
    names: &[&'static str],
) -> Option<(&'static str, &'a Value)> {
    names
        .iter()
        .find_map(|name| obj.get(*name).map(|v| (*name, v)))
}

/// A required, non-empty string field. Returns the trimmed text.
fn required_text(obj: &Map<String, Value>, index: usize, names: &[&'static str]) -> Checked<String> {
    let canonical = names[0];
    match lookup(obj, names) {
        None | Some((_, Value::Null)) => Err(ValidationReason::schema(index, canonical, "missing")),
        Some((name, Value::String(s))) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Err(ValidationReason::schema(index, name, "must not be empty"))
            } else {
                Ok(trimmed.to_string())
            }
        }
        Some((name, other)) => Err(ValidationReason::schema(
            index,
            name,
            format!("expected a string, found {}", type_name(other)),
        )),
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Normalizes an option label: trims, drops a trailing `)` or `.`, upper-cases.
fn normalize_label(label: &str) -> String {
    label
        .trim()
        .trim_end_matches([')', '.', ':'])
        .trim()
        .to_uppercase()
}

pub(crate) fn multiple_choice(
    items: &[Value],
    option_count: usize,
) -> Checked<Vec<MultipleChoiceQuestion>> {
    items
        .iter()
        .enumerate()
        .map(|(index, item)| multiple_choice_item(item, index, option_count))
        .collect()
}

fn multiple_choice_item(
    item: &Value,
    index: usize,
    option_count: usize,
) -> Checked<MultipleChoiceQuestion> {
    let obj = as_object(item, index)?;
    let question = required_text(obj, index, &["question", "prompt"])?;
    let options = collect_options(obj, index)?;

    if options.len() != option_count {
        return Err(ValidationReason::schema(
            index,
            "options",
            format!("expected {} options, found {}", option_count, options.len()),
        ));
    }

    let expected = option_labels(option_count);
    let mut seen_labels: HashSet<String> = HashSet::new();
    let mut seen_texts: HashMap<String, String> = HashMap::new();
    for opt in &options {
        if opt.label.is_empty() {
            return Err(ValidationReason::schema(index, "options", "option label must not be empty"));
        }
        if !expected.contains(&opt.label) {
            return Err(ValidationReason::schema(
                index,
                format!("options.{}", opt.label),
                format!("label must be one of {}", expected.join(", ")),
            ));
        }
        if !seen_labels.insert(opt.label.clone()) {
            return Err(ValidationReason::schema(
                index,
                "options",
                format!("duplicate option label '{}'", opt.label),
            ));
        }
        let field = format!("options.{}", opt.label);
        if opt.text.is_empty() {
            return Err(ValidationReason::schema(index, field, "option text must not be empty"));
        }
        if let Some(other) = seen_texts.insert(opt.text.to_lowercase(), opt.label.clone()) {
            return Err(ValidationReason::schema(
                index,
                field,
                format!("same text as option {}", other),
            ));
        }
    }

    let correct_raw = required_text(obj, index, &["correct", "answer"])?;
    let correct_label = normalize_label(&correct_raw);
    let correct = if options.iter().any(|o| o.label == correct_label) {
        correct_label
    } else if let Some(by_text) = options
        .iter()
        .find(|o| o.text.eq_ignore_ascii_case(correct_raw.trim()))
    {
        // Models sometimes answer with the option text instead of its label.
        by_text.label.clone()
    } else {
        return Err(ValidationReason::schema(
            index,
            "correct",
            format!("'{}' is not one of the option labels", correct_raw),
        ));
    };

    Ok(MultipleChoiceQuestion {
        question,
        options,
        correct,
    })
}

/// Options arrive either as a `{"A": "...", ...}` object or as an array of
/// texts (labeled `A`, `B`, ... in order) or `{"label", "text"}` objects.
fn collect_options(obj: &Map<String, Value>, index: usize) -> Checked<Vec<AnswerOption>> {
    let mut options = match obj.get("options").or_else(|| obj.get("choices")) {
        None | Some(Value::Null) => return Err(ValidationReason::schema(index, "options", "missing")),
        Some(Value::Object(map)) => map
            .iter()
            .map(|(label, text)| option_from(index, normalize_label(label), text))
            .collect::<Checked<Vec<_>>>()?,
        Some(Value::Array(list)) => {
            let labels = option_labels(list.len());
            list.iter()
                .enumerate()
                .map(|(i, entry)| match entry {
                    Value::Object(o) => {
                        let label = o
                            .get("label")
                            .and_then(Value::as_str)
                            .map(normalize_label)
                            .unwrap_or_else(|| labels.get(i).cloned().unwrap_or_default());
                        let text = o.get("text").unwrap_or(&Value::Null);
                        option_from(index, label, text)
                    }
                    other => option_from(index, labels.get(i).cloned().unwrap_or_default(), other),
                })
                .collect::<Checked<Vec<_>>>()?
        }
        Some(other) => {
            return Err(ValidationReason::schema(
                index,
                "options",
                format!("expected an object or array, found {}", type_name(other)),
            ))
        }
    };
    options.sort_by(|a, b| a.label.cmp(&b.label));
    Ok(options)
}

fn option_from(index: usize, label: String, text: &Value) -> Checked<AnswerOption> {
    match text {
        Value::String(s) => Ok(AnswerOption {
            label,
            text: s.trim().to_string(),
        }),
        other => Err(ValidationReason::schema(
            index,
            format!("options.{}", label),
            format!("expected a string, found {}", type_name(other)),
        )),
    }
}

pub(crate) fn true_false(items: &[Value]) -> Checked<Vec<TrueFalseQuestion>> {
    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let obj = as_object(item, index)?;
            let statement = required_text(obj, index, &["statement", "question"])?;
            let correct = match lookup(obj, &["correct", "answer"]) {
                None | Some((_, Value::Null)) => {
                    return Err(ValidationReason::schema(index, "correct", "missing"))
                }
                Some((_, Value::Bool(b))) => *b,
                Some((name, Value::String(s))) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" => true,
                    "false" => false,
                    _ => {
                        return Err(ValidationReason::schema(
                            index,
                            name,
                            format!("expected a boolean, found '{}'", s),
                        ))
                    }
                },
                Some((name, other)) => {
                    return Err(ValidationReason::schema(
                        index,
                        name,
                        format!("expected a boolean, found {}", type_name(other)),
                    ))
                }
            };
            Ok(TrueFalseQuestion { statement, correct })
        })
        .collect()
}

pub(crate) fn vocabulary(items: &[Value]) -> Checked<Vec<VocabularyEntry>> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut entries = Vec::with_capacity(items.len());

    for (index, item) in items.iter().enumerate() {
        let obj = as_object(item, index)?;
        let term = required_text(obj, index, &["term", "word"])?.to_lowercase();
        let definition = required_text(obj, index, &["definition", "meaning"])?;
        let quote = match obj.get("quote") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.trim().is_empty() => None,
            Some(Value::String(s)) => Some(s.trim().to_string()),
            Some(other) => {
                return Err(ValidationReason::schema(
                    index,
                    "quote",
                    format!("expected a string, found {}", type_name(other)),
                ))
            }
        };

        if let Some(first) = seen.insert(term.clone(), index) {
            return Err(ValidationReason::schema(
                index,
                "term",
                format!("duplicate term '{}' (also item {})", term, first),
            ));
        }

        entries.push(VocabularyEntry {
            term,
            definition,
            quote,
            source: None,
            synonyms: Vec::new(),
        });
    }
    Ok(entries)
}

pub(crate) fn synonyms(items: &[Value], term: Option<&str>) -> Checked<Vec<String>> {
    let term = term.map(|t| t.trim().to_lowercase());
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut out = Vec::with_capacity(items.len());

    for (index, item) in items.iter().enumerate() {
        let word = match item {
            Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
            Value::String(_) => {
                return Err(ValidationReason::schema(index, "<item>", "must not be empty"))
            }
            other => {
                return Err(ValidationReason::schema(
                    index,
                    "<item>",
                    format!("expected a string, found {}", type_name(other)),
                ))
            }
        };
        let key = word.to_lowercase();
        if term.as_deref() == Some(key.as_str()) {
            return Err(ValidationReason::schema(index, "<item>", "repeats the term itself"));
        }
        if let Some(first) = seen.insert(key, index) {
            return Err(ValidationReason::schema(
                index,
                "<item>",
                format!("duplicate synonym '{}' (also item {})", word, first),
            ));
        }
        out.push(word);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mc(options: Value, correct: &str) -> Value {
        json!({"question": "What does Mara do?", "options": options, "correct": correct})
    }

    #[test]
    fn mc_object_options_sorted_by_label() {
        let item = mc(json!({"b": "Runs", "A": "Hides", "D": "Sings", "C": "Waits"}), "b");
        let q = multiple_choice(&[item], 4).unwrap().remove(0);
        let labels: Vec<_> = q.options.iter().map(|o| o.label.as_str()).collect();
        assert_eq!(labels, vec!["A", "B", "C", "D"]);
        assert_eq!(q.correct, "B");
        assert_eq!(q.correct_option().unwrap().text, "Runs");
    }

    #[test]
    fn mc_array_options_get_letter_labels() {
        let item = mc(json!(["Hides", "Runs", "Sings", "Waits"]), "C)");
        let q = multiple_choice(&[item], 4).unwrap().remove(0);
        assert_eq!(q.options[2].label, "C");
        assert_eq!(q.correct, "C");
    }

    #[test]
    fn mc_correct_given_as_option_text() {
        let item = mc(json!({"A": "Hides", "B": "Runs", "C": "Sings", "D": "Waits"}), "runs");
        let q = multiple_choice(&[item], 4).unwrap().remove(0);
        assert_eq!(q.correct, "B");
    }

    #[test]
    fn mc_three_options_rejected() {
        let item = mc(json!({"A": "Hides", "B": "Runs", "C": "Sings"}), "A");
        let err = multiple_choice(&[item], 4).unwrap_err();
        assert_eq!(
            err,
            ValidationReason::schema(0, "options", "expected 4 options, found 3")
        );
    }

    #[test]
    fn mc_labels_outside_range_rejected() {
        let item = mc(json!({"1": "Hides", "2": "Runs", "3": "Sings", "W": "Waits"}), "2");
        let err = multiple_choice(&[item], 4).unwrap_err();
        assert_eq!(
            err,
            ValidationReason::schema(0, "options.1", "label must be one of A, B, C, D")
        );

        let item = mc(json!({"A": "Hides", "B": "Runs", "C": "Sings", "E": "Waits"}), "A");
        let err = multiple_choice(&[item], 4).unwrap_err();
        assert!(matches!(err, ValidationReason::SchemaViolation { ref field, .. } if field == "options.E"));
    }

    #[test]
    fn mc_lowercase_labels_normalized() {
        let item = mc(json!({"a)": "Hides", "b)": "Runs", "c)": "Sings", "d)": "Waits"}), "b");
        let q = multiple_choice(&[item], 4).unwrap().remove(0);
        assert_eq!(q.correct, "B");
    }

    #[test]
    fn mc_duplicate_option_text_rejected() {
        let item = mc(json!({"A": "Runs", "B": "runs", "C": "Sings", "D": "Waits"}), "A");
        let err = multiple_choice(&[item], 4).unwrap_err();
        assert!(matches!(err, ValidationReason::SchemaViolation { ref field, .. } if field == "options.B"));
    }

    #[test]
    fn mc_unknown_correct_label_rejected() {
        let item = mc(json!({"A": "Hides", "B": "Runs", "C": "Sings", "D": "Waits"}), "E");
        let err = multiple_choice(&[item], 4).unwrap_err();
        assert!(matches!(err, ValidationReason::SchemaViolation { ref field, .. } if field == "correct"));
    }

    #[test]
    fn mc_empty_question_rejected() {
        let item = json!({"question": "  ", "options": ["a", "b", "c", "d"], "correct": "A"});
        let err = multiple_choice(&[item], 4).unwrap_err();
        assert_eq!(err, ValidationReason::schema(0, "question", "must not be empty"));
    }

    #[test]
    fn tf_accepts_bool_and_string_answers() {
        let items = vec![
            json!({"statement": "Mara is brave.", "correct": true}),
            json!({"question": "Mara hides.", "correct": "False"}),
        ];
        let qs = true_false(&items).unwrap();
        assert!(qs[0].correct);
        assert!(!qs[1].correct);
        assert_eq!(qs[1].statement, "Mara hides.");
    }

    #[test]
    fn tf_missing_answer_rejected() {
        let err = true_false(&[json!({"statement": "x"})]).unwrap_err();
        assert_eq!(err, ValidationReason::schema(0, "correct", "missing"));
    }

    #[test]
    fn tf_non_boolean_answer_rejected() {
        let err = true_false(&[json!({"statement": "x", "correct": "maybe"})]).unwrap_err();
        assert_eq!(err.label(), "schema_violation");
    }

    #[test]
    fn vocab_terms_lowercased_and_quote_optional() {
        let items = vec![
            json!({"term": "Bravery", "definition": "courage", "quote": "Her **bravery** shone."}),
            json!({"word": "gale", "definition": "a strong wind"}),
        ];
        let entries = vocabulary(&items).unwrap();
        assert_eq!(entries[0].term, "bravery");
        assert_eq!(entries[0].quote.as_deref(), Some("Her **bravery** shone."));
        assert_eq!(entries[1].term, "gale");
        assert!(entries[1].quote.is_none());
    }

    #[test]
    fn vocab_duplicate_term_case_insensitive() {
        let items = vec![
            json!({"term": "Bravery", "definition": "courage"}),
            json!({"term": "bravery", "definition": "valor"}),
        ];
        let err = vocabulary(&items).unwrap_err();
        assert_eq!(
            err,
            ValidationReason::schema(1, "term", "duplicate term 'bravery' (also item 0)")
        );
    }

    #[test]
    fn vocab_missing_definition_rejected() {
        let err = vocabulary(&[json!({"term": "gale"})]).unwrap_err();
        assert_eq!(err, ValidationReason::schema(0, "definition", "missing"));
    }

    #[test]
    fn synonyms_reject_term_echo_and_duplicates() {
        let items = vec![json!("courage"), json!("Courage")];
        assert!(synonyms(&items, None).is_err());

        let items = vec![json!("Bravery")];
        let err = synonyms(&items, Some("bravery")).unwrap_err();
        assert_eq!(err, ValidationReason::schema(0, "<item>", "repeats the term itself"));

        let ok = synonyms(&[json!("valor"), json!("courage")], Some("bravery")).unwrap();
        assert_eq!(ok, vec!["valor", "courage"]);
    }
}
