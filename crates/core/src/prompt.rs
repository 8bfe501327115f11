use crate::models::RetrievedResult;

const NO_CONTEXT: &str = "(no context)";

/// Builds the grounded prompt handed to a chat model. Contexts are numbered
/// from 1 so answers can cite them as `[n]`.
pub fn build_augmented_prompt(query: &str, contexts: &[RetrievedResult]) -> String {
    let context_block = contexts
        .iter()
        .enumerate()
        .map(|(position, context)| {
            let mut entry = format!("[{}] {}", position + 1, context.text);
            if let Some(source) = context.source_url.as_deref() {
                entry.push_str(&format!("\n(Source: {source})"));
            }
            entry
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    let context_block = if context_block.is_empty() {
        NO_CONTEXT.to_string()
    } else {
        context_block
    };

    let question = format!("User question: {query}");
    [
        "You are a helpful, precise assistant. Use ONLY the context when possible.",
        "If the answer is not in the context, say you are not sure.",
        "",
        "=== Context ===",
        context_block.as_str(),
        "=== End Context ===",
        "",
        question.as_str(),
        "",
        "Answer in clear Thai and cite sources as [1], [2], ... where relevant.",
    ]
    .join("\n")
}

/// Citation numbers paired with the source URL of each result that has one.
pub fn citations(results: &[RetrievedResult]) -> Vec<(usize, String)> {
    results
        .iter()
        .enumerate()
        .filter_map(|(position, result)| {
            result
                .source_url
                .as_ref()
                .map(|source| (position + 1, source.clone()))
        })
        .collect()
}
