//! Single-dataset hybrid ranking: cosine similarity fused with a TF-IDF style
//! lexical score.

use crate::models::RetrievedResult;
use crate::store::{Dataset, DatasetStore};
use crate::tokenizer::tokenize;

/// Fusion weights. Existing tuning depends on these exact values.
pub const VECTOR_WEIGHT: f64 = 0.7;
pub const TEXT_WEIGHT: f64 = 0.3;

/// Cosine similarity over the longer of the two vectors. Missing and
/// non-finite components read as zero. A zero magnitude yields 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let length = a.len().max(b.len());
    if length == 0 {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut magnitude_a = 0.0f64;
    let mut magnitude_b = 0.0f64;
    for position in 0..length {
        let left = component(a, position);
        let right = component(b, position);
        dot += left * right;
        magnitude_a += left * left;
        magnitude_b += right * right;
    }

    let denominator = magnitude_a.sqrt() * magnitude_b.sqrt();
    let denominator = if denominator == 0.0 { 1.0 } else { denominator };
    (dot / denominator).clamp(-1.0, 1.0)
}

fn component(vector: &[f32], position: usize) -> f64 {
    vector
        .get(position)
        .copied()
        .filter(|value| value.is_finite())
        .map_or(0.0, f64::from)
}

/// Unclamped lexical score per passage position.
pub fn lexical_scores(dataset: &Dataset, query_terms: &[String]) -> Vec<f64> {
    let passages = dataset.passages();
    let mut scores = vec![0.0; passages.len()];
    if passages.is_empty() || query_terms.is_empty() {
        return scores;
    }

    let total = passages.len() as f64;
    for term in query_terms {
        let Some(positions) = dataset.index().postings(term) else {
            continue;
        };
        let idf = (total / (positions.len() as f64 + 1.0)).ln() + 1.0;
        for &position in positions {
            if let Some(passage) = passages.get(position) {
                scores[position] += passage.term_frequency(term) * idf;
            }
        }
    }

    scores
}

/// Ranks every passage of `dataset` and keeps the best `k` (at least one).
/// Ties keep passage order.
pub fn rank_passages(
    dataset: &Dataset,
    query_embedding: &[f32],
    query_text: &str,
    k: usize,
    use_hybrid: bool,
) -> Vec<RetrievedResult> {
    if dataset.is_empty() {
        return Vec::new();
    }

    let text_scores = if use_hybrid {
        Some(lexical_scores(dataset, &tokenize(query_text)))
    } else {
        None
    };

    let mut results = dataset
        .passages()
        .iter()
        .enumerate()
        .map(|(position, passage)| {
            let cosine = cosine_similarity(query_embedding, passage.embedding());
            let (score, vector_score, text_score) = match &text_scores {
                Some(text_scores) => {
                    let vector_score = cosine.clamp(0.0, 1.0);
                    let text_score = text_scores[position].clamp(0.0, 1.0);
                    (
                        VECTOR_WEIGHT * vector_score + TEXT_WEIGHT * text_score,
                        vector_score,
                        Some(text_score),
                    )
                }
                None => (cosine, cosine, None),
            };

            RetrievedResult {
                text: passage.text().to_string(),
                source_url: passage.source_url().map(str::to_string),
                dataset: dataset.name().to_string(),
                score,
                vector_score: Some(vector_score),
                text_score,
            }
        })
        .collect::<Vec<_>>();

    results.sort_by(|left, right| right.score.total_cmp(&left.score));
    results.truncate(k.max(1));
    results
}

/// Searches one dataset. A dataset that is unknown or fails to load yields no
/// results.
pub fn search_top_k(
    store: &DatasetStore,
    dataset: &str,
    query_embedding: &[f32],
    query_text: &str,
    k: usize,
    use_hybrid: bool,
) -> Vec<RetrievedResult> {
    store
        .with_dataset(dataset, |loaded| {
            rank_passages(loaded, query_embedding, query_text, k, use_hybrid)
        })
        .unwrap_or_default()
}
