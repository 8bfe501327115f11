pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod prompt;
pub mod retriever;
pub mod search;
pub mod store;
pub mod tokenizer;

pub use chunking::{chunk_text, normalize_line_breaks, ChunkingConfig};
pub use config::RagConfig;
pub use embeddings::{Embedder, HashedTrigramEmbedder, HttpEmbedder};
pub use error::{EmbedError, IngestError, SearchError, StoreError};
pub use ingest::{
    dataset_name_from_path, discover_source_files, fetch_source_text, html_to_text,
    read_source_segments, IngestionReport, SkippedSource,
};
pub use models::{
    DatasetStats, NewPassage, Passage, PassageRejection, RetrievedResult, SearchOptions,
};
pub use orchestrator::RagCoordinator;
pub use prompt::{build_augmented_prompt, citations};
pub use retriever::{cosine_similarity, search_top_k};
pub use search::{rerank_by_bigrams, search_datasets};
pub use store::{dataset_file_name, Dataset, DatasetStore};
pub use tokenizer::{tokenize, InvertedIndex};
