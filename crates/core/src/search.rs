//! Cross-dataset search and the bigram proximity re-ranker.

use crate::models::{RetrievedResult, SearchOptions};
use crate::retriever::search_top_k;
use crate::store::DatasetStore;
use crate::tokenizer::tokenize;
use std::collections::HashSet;
use tracing::debug;

pub const RERANK_BIGRAM_BONUS: f64 = 0.05;

/// Trims, drops blanks and keeps the first occurrence of each name.
pub fn dedupe_dataset_names<S: AsRef<str>>(names: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .iter()
        .map(|name| name.as_ref().trim())
        .filter(|name| !name.is_empty())
        .filter(|name| seen.insert(name.to_string()))
        .map(str::to_string)
        .collect()
}

/// Queries every dataset for `2k` candidates, merges them by fused score and
/// keeps the best `k`. With `options.rerank` the whole merged pool is
/// re-ranked before the cut.
pub fn search_datasets<S: AsRef<str>>(
    store: &DatasetStore,
    datasets: &[S],
    query_embedding: &[f32],
    query_text: &str,
    k: usize,
    options: SearchOptions,
) -> Vec<RetrievedResult> {
    let k = k.max(1);
    let per_dataset = k.saturating_mul(2);

    let mut merged = Vec::new();
    for dataset in dedupe_dataset_names(datasets) {
        let results = search_top_k(
            store,
            &dataset,
            query_embedding,
            query_text,
            per_dataset,
            options.use_hybrid,
        );
        debug!(dataset = %dataset, candidates = results.len(), "dataset searched");
        merged.extend(results);
    }

    merged.sort_by(|left, right| right.score.total_cmp(&left.score));
    if options.rerank {
        merged = rerank_by_bigrams(query_text, merged);
    }
    merged.truncate(k);
    merged
}

fn terms_overlap(left: &str, right: &str) -> bool {
    left.contains(right) || right.contains(left)
}

/// Adds [`RERANK_BIGRAM_BONUS`] for every adjacent query-term pair that also
/// appears, by substring containment, as an adjacent pair in the candidate.
/// Candidates without such a pair keep their score.
pub fn rerank_by_bigrams(query_text: &str, mut results: Vec<RetrievedResult>) -> Vec<RetrievedResult> {
    let query_terms = tokenize(query_text);
    if query_terms.len() < 2 {
        return results;
    }

    for result in &mut results {
        let candidate_terms = tokenize(&result.text);
        let matches = query_terms
            .windows(2)
            .filter(|query_pair| {
                candidate_terms.windows(2).any(|candidate_pair| {
                    terms_overlap(&query_pair[0], &candidate_pair[0])
                        && terms_overlap(&query_pair[1], &candidate_pair[1])
                })
            })
            .count();
        if matches > 0 {
            result.score += RERANK_BIGRAM_BONUS * matches as f64;
        }
    }

    results.sort_by(|left, right| right.score.total_cmp(&left.score));
    results
}
