use std::collections::BTreeSet;

const STOPWORDS: &[&str] = &[
    "the", "and", "with", "for", "has", "have", "had", "are", "was", "patient", "presents",
];

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 0.0;
    }

    let score = dot / (norm_a.sqrt() * norm_b.sqrt());
    score.clamp(0.0, 1.0)
}

/// Lowercased alphanumeric terms of three or more characters.
pub fn terms(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 3)
        .map(|t| t.to_lowercase())
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect()
}

/// Fraction of query terms present in the document, in `[0, 1]`.
pub fn lexical_score(query: &str, document: &str) -> f32 {
    let query_terms = terms(query);
    if query_terms.is_empty() {
        return 0.0;
    }
    let doc_terms = terms(document);
    let hits = query_terms.iter().filter(|t| doc_terms.contains(*t)).count();
    hits as f32 / query_terms.len() as f32
}

pub(crate) fn embedding_to_json(embedding: &[f32]) -> String {
    match serde_json::to_string(embedding) {
        Ok(json) => json,
        Err(_) => "[]".to_owned(),
    }
}

pub(crate) fn json_to_embedding(json: &str) -> serde_json::Result<Vec<f32>> {
    serde_json::from_str::<Vec<f32>>(json)
}
