use crate::chunking::chunk_text;
use crate::config::RagConfig;
use crate::embeddings::Embedder;
use crate::ingest::{
    dataset_name_from_path, discover_source_files, fetch_source_text, read_source_segments,
    IngestionReport,
};
use crate::models::{DatasetStats, NewPassage, Passage, RetrievedResult, SearchOptions};
use crate::prompt::build_augmented_prompt;
use crate::search::search_datasets;
use crate::store::DatasetStore;
use crate::{EmbedError, IngestError, SearchError, StoreError};
use reqwest::Client;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Entry point tying the chunker, the embedding provider and the dataset
/// store together.
pub struct RagCoordinator {
    store: Arc<DatasetStore>,
    embedder: Arc<dyn Embedder>,
    config: RagConfig,
    client: Client,
}

impl RagCoordinator {
    pub fn new(store: Arc<DatasetStore>, embedder: Arc<dyn Embedder>, config: RagConfig) -> Self {
        if embedder.dimensions() != store.vector_length() {
            warn!(
                embedder = embedder.dimensions(),
                store = store.vector_length(),
                "embedder dimensions differ from store vector length, passages will be rejected"
            );
        }

        Self {
            store,
            embedder,
            config,
            client: Client::new(),
        }
    }

    pub fn store(&self) -> &DatasetStore {
        &self.store
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Chunks `raw_text`, embeds the chunks and appends them to `dataset`.
    pub async fn ingest(
        &self,
        dataset: &str,
        source_url: Option<&str>,
        raw_text: &str,
    ) -> Result<Vec<Passage>, IngestError> {
        let segments = chunk_text(raw_text, self.config.chunking);
        debug!(dataset, chunks = segments.len(), "text chunked");
        self.ingest_segments(dataset, source_url, segments).await
    }

    /// Embeds already split segments in batches and upserts them.
    pub async fn ingest_segments(
        &self,
        dataset: &str,
        source_url: Option<&str>,
        segments: Vec<String>,
    ) -> Result<Vec<Passage>, IngestError> {
        if dataset.trim().is_empty() {
            return Err(StoreError::InvalidDataset(dataset.to_string()).into());
        }
        if segments.is_empty() {
            warn!(dataset, "no chunks produced");
            return Ok(Vec::new());
        }

        let batch_size = self.config.effective_batch_size();
        let total_batches = segments.len().div_ceil(batch_size);
        let mut batch = Vec::with_capacity(segments.len());
        for (number, texts) in segments.chunks(batch_size).enumerate() {
            debug!(dataset, batch = number + 1, of = total_batches, items = texts.len(), "embedding batch");
            let vectors = self.embedder.embed_many(texts).await?;
            if vectors.len() != texts.len() {
                return Err(EmbedError::CountMismatch {
                    expected: texts.len(),
                    actual: vectors.len(),
                }
                .into());
            }
            batch.extend(
                texts
                    .iter()
                    .zip(vectors)
                    .map(|(text, embedding)| NewPassage::new(text.as_str(), source_url, embedding)),
            );
        }

        Ok(self.store.upsert(dataset, batch)?)
    }

    /// Fetches `url` under the configured byte limit and timeout, then
    /// ingests the extracted text with `url` as its source.
    pub async fn ingest_url(&self, dataset: &str, url: &str) -> Result<Vec<Passage>, IngestError> {
        let text = fetch_source_text(
            &self.client,
            url,
            self.config.fetch_max_bytes,
            self.config.fetch_timeout,
        )
        .await?;
        info!(dataset, url, chars = text.chars().count(), "source fetched");
        self.ingest(dataset, Some(url), &text).await
    }

    /// Ingests one `.txt`, `.md` or `.json` file. The dataset defaults to a
    /// name derived from the file name.
    pub async fn ingest_file(
        &self,
        path: &Path,
        dataset: Option<&str>,
        source_url: Option<&str>,
    ) -> Result<Vec<Passage>, IngestError> {
        if !path.is_file() {
            return Err(IngestError::InvalidArgument(format!(
                "path is not a file: {}",
                path.display()
            )));
        }

        let dataset = match dataset.map(str::trim).filter(|name| !name.is_empty()) {
            Some(name) => name.to_string(),
            None => dataset_name_from_path(path),
        };
        let segments = read_source_segments(path, &self.config.chunking)?;
        info!(path = %path.display(), dataset = %dataset, chunks = segments.len(), "ingesting file");

        self.ingest_segments(&dataset, source_url, segments).await
    }

    /// Ingests every source file directly inside `dir`. A failing file is
    /// recorded in the report and does not stop the rest.
    pub async fn ingest_dir(
        &self,
        dir: &Path,
        dataset: Option<&str>,
        source_url: Option<&str>,
    ) -> Result<IngestionReport, IngestError> {
        if !dir.is_dir() {
            return Err(IngestError::InvalidArgument(format!(
                "path is not a directory: {}",
                dir.display()
            )));
        }

        let files = discover_source_files(dir);
        info!(dir = %dir.display(), files = files.len(), "ingesting directory");

        let mut report = IngestionReport::default();
        for path in files {
            match self.ingest_file(&path, dataset, source_url).await {
                Ok(passages) => report.passages.extend(passages),
                Err(error) => report.skip(path, error),
            }
        }
        Ok(report)
    }

    /// Embeds the query and searches the selected datasets.
    pub async fn search(
        &self,
        datasets: &[String],
        query_text: &str,
        k: usize,
        options: SearchOptions,
    ) -> Result<Vec<RetrievedResult>, SearchError> {
        let query_text = query_text.trim();
        if query_text.is_empty() {
            return Err(SearchError::Request("query is empty".to_string()));
        }

        let query_embedding = self.embedder.embed(query_text).await?;
        let results = search_datasets(&self.store, datasets, &query_embedding, query_text, k, options);
        debug!(hits = results.len(), rerank = options.rerank, "search finished");
        Ok(results)
    }

    /// Searches and wraps the hits in a grounded prompt.
    pub async fn augmented_prompt(
        &self,
        datasets: &[String],
        query_text: &str,
        k: usize,
        options: SearchOptions,
    ) -> Result<String, SearchError> {
        let results = self.search(datasets, query_text, k, options).await?;
        Ok(build_augmented_prompt(query_text.trim(), &results))
    }

    pub fn list_datasets(&self) -> BTreeSet<String> {
        self.store.list()
    }

    pub fn dataset_stats(&self, name: &str) -> Option<DatasetStats> {
        self.store.stats(name)
    }

    pub fn delete_dataset(&self, name: &str) -> Result<bool, StoreError> {
        self.store.delete(name)
    }
}
