use crate::chunking::ChunkingConfig;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_DATA_DIR: &str = "rag-data";
pub const DEFAULT_VECTOR_LENGTH: usize = 8;
pub const DEFAULT_FETCH_MAX_BYTES: usize = 5 * 1024 * 1024;
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_millis(20_000);
pub const DEFAULT_EMBED_BATCH_SIZE: usize = 50;

#[derive(Debug, Clone)]
pub struct RagConfig {
    pub data_dir: PathBuf,
    /// Length every stored embedding must have.
    pub vector_length: usize,
    pub fetch_max_bytes: usize,
    pub fetch_timeout: Option<Duration>,
    pub chunking: ChunkingConfig,
    pub embed_batch_size: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            vector_length: DEFAULT_VECTOR_LENGTH,
            fetch_max_bytes: DEFAULT_FETCH_MAX_BYTES,
            fetch_timeout: Some(DEFAULT_FETCH_TIMEOUT),
            chunking: ChunkingConfig::default(),
            embed_batch_size: DEFAULT_EMBED_BATCH_SIZE,
        }
    }
}

impl RagConfig {
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// `0` keeps the default limit.
    pub fn with_fetch_max_bytes(mut self, max_bytes: usize) -> Self {
        self.fetch_max_bytes = if max_bytes == 0 {
            DEFAULT_FETCH_MAX_BYTES
        } else {
            max_bytes
        };
        self
    }

    /// `0` disables the fetch timeout.
    pub fn with_fetch_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.fetch_timeout = (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms));
        self
    }

    pub fn effective_batch_size(&self) -> usize {
        self.embed_batch_size.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_values_fall_back_or_disable() {
        let config = RagConfig::with_data_dir("/tmp/rag")
            .with_fetch_max_bytes(0)
            .with_fetch_timeout_ms(0);

        assert_eq!(config.data_dir, PathBuf::from("/tmp/rag"));
        assert_eq!(config.fetch_max_bytes, DEFAULT_FETCH_MAX_BYTES);
        assert_eq!(config.fetch_timeout, None);
        assert_eq!(config.vector_length, DEFAULT_VECTOR_LENGTH);
    }

    #[test]
    fn batch_size_is_never_zero() {
        let config = RagConfig {
            embed_batch_size: 0,
            ..RagConfig::default()
        };
        assert_eq!(config.effective_batch_size(), 1);
    }
}
