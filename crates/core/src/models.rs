use crate::tokenizer::tokenize;
use serde::{Deserialize, Deserializer, Serialize};

/// Unvalidated passage handed to the store by ingestion callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPassage {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    pub embedding: Vec<f32>,
}

impl NewPassage {
    pub fn new(text: impl Into<String>, source_url: Option<&str>, embedding: Vec<f32>) -> Self {
        Self {
            text: text.into(),
            source_url: source_url.map(str::to_string),
            embedding,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassageRejection {
    EmptyText,
    EmbeddingLength { expected: usize, actual: usize },
}

impl std::fmt::Display for PassageRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyText => write!(f, "passage text is empty"),
            Self::EmbeddingLength { expected, actual } => {
                write!(f, "embedding length {actual} != {expected}")
            }
        }
    }
}

/// A stored, retrievable unit of text. Only built through [`Passage::validate`],
/// so the text is non-empty and the embedding has the store's vector length.
#[derive(Debug, Clone, PartialEq)]
pub struct Passage {
    text: String,
    source_url: Option<String>,
    embedding: Vec<f32>,
    tokens: Vec<String>,
}

impl Passage {
    pub fn validate(new: NewPassage, vector_length: usize) -> Result<Self, PassageRejection> {
        Self::from_parts(new.text, new.source_url, new.embedding, None, vector_length)
    }

    pub(crate) fn from_parts(
        text: String,
        source_url: Option<String>,
        embedding: Vec<f32>,
        tokens: Option<Vec<String>>,
        vector_length: usize,
    ) -> Result<Self, PassageRejection> {
        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(PassageRejection::EmptyText);
        }
        if embedding.len() != vector_length {
            return Err(PassageRejection::EmbeddingLength {
                expected: vector_length,
                actual: embedding.len(),
            });
        }

        let embedding = embedding
            .into_iter()
            .map(|value| if value.is_finite() { value } else { 0.0 })
            .collect();
        let source_url = source_url
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty());
        let tokens = tokens.unwrap_or_else(|| tokenize(&text));

        Ok(Self {
            text,
            source_url,
            embedding,
            tokens,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn source_url(&self) -> Option<&str> {
        self.source_url.as_deref()
    }

    pub fn embedding(&self) -> &[f32] {
        &self.embedding
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn term_frequency(&self, term: &str) -> f64 {
        let occurrences = self.tokens.iter().filter(|token| *token == term).count();
        occurrences as f64 / self.tokens.len().max(1) as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievedResult {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    pub dataset: String,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_score: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetStats {
    pub chunk_count: usize,
    pub token_count: usize,
    pub index_term_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchOptions {
    pub use_hybrid: bool,
    pub rerank: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            use_hybrid: true,
            rerank: false,
        }
    }
}

/// One chunk as it appears in a dataset file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PersistedPassage {
    #[serde(default)]
    pub dataset: String,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default, deserialize_with = "lenient_vector")]
    pub embedding: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<Vec<String>>,
}

impl PersistedPassage {
    pub fn from_passage(dataset: &str, passage: &Passage) -> Self {
        Self {
            dataset: dataset.to_string(),
            text: passage.text.clone(),
            source_url: passage.source_url.clone(),
            embedding: passage.embedding.clone(),
            tokens: Some(passage.tokens.clone()),
        }
    }

    pub fn into_passage(self, vector_length: usize) -> Result<Passage, PassageRejection> {
        Passage::from_parts(
            self.text,
            self.source_url,
            self.embedding,
            self.tokens,
            vector_length,
        )
    }
}

/// Non-numeric entries (e.g. `null` written by older tooling) read as 0.
fn lenient_vector<'de, D>(deserializer: D) -> Result<Vec<f32>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|value| value.as_f64().map_or(0.0, |number| number as f32))
        .collect())
}
