//! Canned model responses shared by unit tests.

use serde_json::{json, Value};

pub(crate) fn mc_item(n: usize) -> Value {
    json!({
        "question": format!("What happens in scene {}?", n),
        "options": {"A": "She hides", "B": "She runs", "C": "She sings", "D": "She waits"},
        "correct": "B"
    })
}

pub(crate) fn mc_payload(count: usize) -> String {
    let items: Vec<Value> = (0..count).map(mc_item).collect();
    json!({ "mc_questions": items }).to_string()
}

pub(crate) fn tf_payload(count: usize) -> String {
    let items: Vec<Value> = (0..count)
        .map(|n| json!({"statement": format!("Statement {} is accurate.", n), "correct": n % 2 == 0}))
        .collect();
    json!({ "tf_questions": items }).to_string()
}

pub(crate) fn vocab_payload(terms: &[&str]) -> String {
    let items: Vec<Value> = terms
        .iter()
        .map(|t| {
            json!({
                "term": t,
                "definition": format!("meaning of {}", t),
                "quote": format!("A sentence using {}.", t)
            })
        })
        .collect();
    json!({ "vocabulary": items }).to_string()
}

pub(crate) fn synonyms_payload(words: &[&str]) -> String {
    json!({ "synonyms": words }).to_string()
}
