use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use rag_index_core::chunking::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use rag_index_core::config::{
    DEFAULT_DATA_DIR, DEFAULT_EMBED_BATCH_SIZE, DEFAULT_FETCH_MAX_BYTES, DEFAULT_VECTOR_LENGTH,
};
use rag_index_core::{
    build_augmented_prompt, citations, ChunkingConfig, DatasetStore, Embedder,
    HashedTrigramEmbedder, HttpEmbedder, RagConfig, RagCoordinator, RetrievedResult,
    SearchOptions,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "rag-index", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    settings: Settings,
}

#[derive(Args)]
struct Settings {
    /// Directory holding one JSON file per dataset.
    #[arg(long, env = "RAG_DATA_DIR", default_value = DEFAULT_DATA_DIR, global = true)]
    data_dir: PathBuf,

    /// Length every embedding must have.
    #[arg(long, env = "RAG_VECTOR_LENGTH", default_value_t = DEFAULT_VECTOR_LENGTH, global = true)]
    vector_length: usize,

    /// Byte limit for URL ingestion (0 keeps the default).
    #[arg(long, env = "RAG_FETCH_MAX_BYTES", default_value_t = DEFAULT_FETCH_MAX_BYTES, global = true)]
    fetch_max_bytes: usize,

    /// Timeout for URL ingestion in milliseconds (0 disables it).
    #[arg(long, env = "RAG_FETCH_TIMEOUT_MS", default_value_t = 20_000, global = true)]
    fetch_timeout_ms: u64,

    /// OpenAI-compatible embeddings endpoint. Hashed trigram embeddings are
    /// used when unset.
    #[arg(long, env = "RAG_EMBEDDING_URL", global = true)]
    embedding_url: Option<String>,

    #[arg(long, env = "RAG_EMBEDDING_MODEL", default_value = "text-embedding-3-small", global = true)]
    embedding_model: String,

    #[arg(long, env = "RAG_EMBEDDING_API_KEY", hide_env_values = true, global = true)]
    embedding_api_key: Option<String>,
}

#[derive(Args)]
struct SourceOptions {
    /// Target dataset. Defaults to the file name.
    #[arg(long)]
    dataset: Option<String>,

    #[arg(long)]
    source_url: Option<String>,

    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    #[arg(long, default_value_t = DEFAULT_CHUNK_OVERLAP)]
    chunk_overlap: usize,

    /// Number of chunks per embedding request.
    #[arg(long, default_value_t = DEFAULT_EMBED_BATCH_SIZE)]
    batch_size: usize,
}

impl SourceOptions {
    fn apply(&self, config: &mut RagConfig) {
        config.chunking = ChunkingConfig::new(self.chunk_size, self.chunk_overlap);
        config.embed_batch_size = self.batch_size;
    }
}

#[derive(Subcommand)]
enum Command {
    /// Ingest one .txt, .md or .json file.
    IngestFile {
        path: PathBuf,
        #[command(flatten)]
        options: SourceOptions,
    },
    /// Ingest every .txt, .md and .json file of a directory.
    IngestDir {
        dir: PathBuf,
        #[command(flatten)]
        options: SourceOptions,
    },
    /// Fetch a URL and ingest its text.
    IngestUrl {
        url: String,
        #[arg(long)]
        dataset: String,
    },
    /// Hybrid search over one or more datasets.
    Search {
        #[arg(long = "dataset", required = true)]
        datasets: Vec<String>,
        #[arg(long)]
        query: String,
        #[arg(long, default_value_t = 5)]
        top_k: usize,
        /// Rank by vector similarity only.
        #[arg(long, default_value_t = false)]
        no_hybrid: bool,
        /// Boost results that contain adjacent query terms.
        #[arg(long, default_value_t = false)]
        rerank: bool,
        /// Print the augmented prompt and its sources instead of the raw hits.
        #[arg(long, default_value_t = false)]
        prompt: bool,
    },
    /// Show chunk, token and index counts per dataset.
    Status,
    /// Delete one dataset.
    Reset { dataset: String },
    /// Delete every dataset.
    ResetAll,
}

fn base_config(settings: &Settings) -> RagConfig {
    RagConfig {
        data_dir: settings.data_dir.clone(),
        vector_length: settings.vector_length,
        ..RagConfig::default()
    }
    .with_fetch_max_bytes(settings.fetch_max_bytes)
    .with_fetch_timeout_ms(settings.fetch_timeout_ms)
}

fn build_coordinator(settings: &Settings, config: RagConfig) -> anyhow::Result<RagCoordinator> {
    let embedder: Arc<dyn Embedder> = match &settings.embedding_url {
        Some(url) => Arc::new(HttpEmbedder::new(
            url.clone(),
            settings.embedding_model.clone(),
            settings.embedding_api_key.clone(),
            config.vector_length,
        )),
        None => Arc::new(HashedTrigramEmbedder::new(config.vector_length)),
    };

    let store = DatasetStore::open(&config)
        .with_context(|| format!("cannot open data directory {}", config.data_dir.display()))?;
    Ok(RagCoordinator::new(Arc::new(store), embedder, config))
}

fn print_results(results: &[RetrievedResult]) {
    if results.is_empty() {
        println!("no results");
        return;
    }

    for (position, result) in results.iter().enumerate() {
        let vector = result
            .vector_score
            .map(|score| format!("{score:.4}"))
            .unwrap_or_else(|| "-".to_string());
        let text = result
            .text_score
            .map(|score| format!("{score:.4}"))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "[{}] dataset={} score={:.4} vector={vector} text={text}",
            position + 1,
            result.dataset,
            result.score
        );
        if let Some(source) = &result.source_url {
            println!("  source={source}");
        }
        println!("{}\n", result.text);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let Cli { command, settings } = Cli::parse();
    let mut config = base_config(&settings);

    info!(
        version = app_version,
        data_dir = %config.data_dir.display(),
        started_at = %Utc::now().to_rfc3339(),
        "rag-index boot"
    );

    match command {
        Command::IngestFile { path, options } => {
            options.apply(&mut config);
            let rag = build_coordinator(&settings, config)?;
            let passages = rag
                .ingest_file(&path, options.dataset.as_deref(), options.source_url.as_deref())
                .await
                .with_context(|| format!("failed to ingest {}", path.display()))?;
            println!("{} chunks ingested from {}", passages.len(), path.display());
        }
        Command::IngestDir { dir, options } => {
            options.apply(&mut config);
            let rag = build_coordinator(&settings, config)?;
            let report = rag
                .ingest_dir(&dir, options.dataset.as_deref(), options.source_url.as_deref())
                .await?;

            if !report.skipped_files.is_empty() {
                warn!(
                    skipped = report.skipped_files.len(),
                    dir = %dir.display(),
                    "some files were not ingested"
                );
                for skipped in &report.skipped_files {
                    println!("skipped {}: {}", skipped.path.display(), skipped.reason);
                }
            }
            println!(
                "{} chunks ingested from {} at {}",
                report.passages.len(),
                dir.display(),
                Utc::now().to_rfc3339()
            );
        }
        Command::IngestUrl { url, dataset } => {
            let rag = build_coordinator(&settings, config)?;
            let passages = rag
                .ingest_url(&dataset, &url)
                .await
                .with_context(|| format!("failed to ingest {url}"))?;
            println!("{} chunks ingested into {dataset}", passages.len());
        }
        Command::Search {
            datasets,
            query,
            top_k,
            no_hybrid,
            rerank,
            prompt,
        } => {
            let rag = build_coordinator(&settings, config)?;
            let options = SearchOptions {
                use_hybrid: !no_hybrid,
                rerank,
            };
            let results = rag.search(&datasets, &query, top_k, options).await?;

            if prompt {
                println!("{}", build_augmented_prompt(query.trim(), &results));
                let sources = citations(&results);
                if !sources.is_empty() {
                    println!("\nSources:");
                    for (number, url) in sources {
                        println!("[{number}] {url}");
                    }
                }
            } else {
                print_results(&results);
            }
        }
        Command::Status => {
            let rag = build_coordinator(&settings, config)?;
            let names = rag.list_datasets();
            if names.is_empty() {
                println!("no datasets found in {}", rag.config().data_dir.display());
                return Ok(());
            }

            println!("{:<27} | {:>6} | {:>6} | {:>10}", "dataset", "chunks", "tokens", "index size");
            println!("{}", "-".repeat(60));
            for name in names {
                if let Some(stats) = rag.dataset_stats(&name) {
                    println!(
                        "{:<27} | {:>6} | {:>6} | {:>10}",
                        name, stats.chunk_count, stats.token_count, stats.index_term_count
                    );
                }
            }
        }
        Command::Reset { dataset } => {
            let rag = build_coordinator(&settings, config)?;
            if rag.delete_dataset(&dataset)? {
                println!("deleted {dataset}");
            } else {
                println!("dataset {dataset} not found");
            }
        }
        Command::ResetAll => {
            let rag = build_coordinator(&settings, config)?;
            let names = rag.list_datasets();
            println!("deleting {} datasets", names.len());
            for name in names {
                rag.delete_dataset(&name)
                    .with_context(|| format!("failed to delete {name}"))?;
                println!("  deleted {name}");
            }
        }
    }

    Ok(())
}
