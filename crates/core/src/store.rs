//! File-backed dataset store.
//!
//! Every dataset lives in one JSON file under the data directory and is
//! cached in memory. Reads reload a dataset when its file's modification time
//! moves past the last value this store saw; writes rewrite the whole file
//! through a temporary file and a rename. Each dataset has its own mutex, held
//! across the whole refresh-append-persist sequence of an upsert.

use crate::config::RagConfig;
use crate::error::{Result, StoreError};
use crate::models::{DatasetStats, NewPassage, Passage, PersistedPassage};
use crate::tokenizer::InvertedIndex;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::SystemTime;
use tracing::{debug, error, info, warn};
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

const DATASET_FILE_EXTENSION: &str = "json";

/// `<slug>-<first 8 hex chars of sha1(name)>.json`
pub fn dataset_file_name(name: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(name.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("{}-{}.{DATASET_FILE_EXTENSION}", slugify(name), &digest[..8])
}

/// NFKD-folds `name`, drops combining accents, replaces every run of
/// characters outside `[a-zA-Z0-9_-]` with one `-` and lowercases.
fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut in_separator = false;
    for c in name.nfkd().filter(|c| !('\u{0300}'..='\u{036f}').contains(c)) {
        if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
            slug.push(c.to_ascii_lowercase());
            in_separator = false;
        } else if !in_separator {
            slug.push('-');
            in_separator = true;
        }
    }

    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "dataset".to_string()
    } else {
        slug.to_string()
    }
}

fn normalize_name(name: &str) -> Option<&str> {
    let trimmed = name.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

#[derive(Debug, Clone)]
pub struct Dataset {
    name: String,
    passages: Vec<Passage>,
    index: InvertedIndex,
}

impl Dataset {
    fn empty(name: &str) -> Self {
        Self {
            name: name.to_string(),
            passages: Vec::new(),
            index: InvertedIndex::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn passages(&self) -> &[Passage] {
        &self.passages
    }

    pub fn index(&self) -> &InvertedIndex {
        &self.index
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    pub fn stats(&self) -> DatasetStats {
        DatasetStats {
            chunk_count: self.passages.len(),
            token_count: self.passages.iter().map(|p| p.tokens().len()).sum(),
            index_term_count: self.index.term_count(),
        }
    }

    /// Appends and indexes exactly the new positions. Returns the first new
    /// position.
    fn append(&mut self, passages: Vec<Passage>) -> usize {
        let start = self.passages.len();
        self.index
            .extend(start, passages.iter().map(Passage::tokens));
        self.passages.extend(passages);
        start
    }

    fn truncate(&mut self, len: usize) {
        self.passages.truncate(len);
        self.index.truncate(len);
    }
}

#[derive(Debug, Default)]
struct DatasetSlot {
    dataset: Option<Dataset>,
    backing_file: Option<PathBuf>,
    modified: Option<SystemTime>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedDataset {
    dataset: String,
    #[serde(default)]
    chunks: Vec<PersistedPassage>,
    #[serde(default)]
    inverted_index: Option<InvertedIndex>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PersistedDatasetRef<'a> {
    dataset: &'a str,
    updated_at: String,
    chunks: Vec<PersistedPassage>,
    inverted_index: &'a InvertedIndex,
}

fn read_dataset_file(path: &Path) -> Result<PersistedDataset> {
    let raw = fs::read_to_string(path).map_err(|error| StoreError::io(path, error))?;
    let parsed: PersistedDataset =
        serde_json::from_str(&raw).map_err(|error| StoreError::Malformed {
            path: path.to_path_buf(),
            details: error.to_string(),
        })?;
    if parsed.dataset.trim().is_empty() {
        return Err(StoreError::Malformed {
            path: path.to_path_buf(),
            details: "dataset name missing".to_string(),
        });
    }
    Ok(parsed)
}

fn is_dataset_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext == DATASET_FILE_EXTENSION)
}

fn lock(slot: &Mutex<DatasetSlot>) -> MutexGuard<'_, DatasetSlot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct DatasetStore {
    data_dir: PathBuf,
    vector_length: usize,
    slots: RwLock<HashMap<String, Arc<Mutex<DatasetSlot>>>>,
}

impl DatasetStore {
    pub fn new(data_dir: impl Into<PathBuf>, vector_length: usize) -> Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir).map_err(|error| StoreError::io(&data_dir, error))?;
        Ok(Self {
            data_dir,
            vector_length,
            slots: RwLock::new(HashMap::new()),
        })
    }

    /// Creates the store and loads every dataset file already in the data
    /// directory. Unreadable files are skipped.
    pub fn open(config: &RagConfig) -> Result<Self> {
        let store = Self::new(&config.data_dir, config.vector_length)?;
        let loaded = store.load_all();
        info!(data_dir = %store.data_dir.display(), datasets = loaded, "dataset store opened");
        Ok(store)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn vector_length(&self) -> usize {
        self.vector_length
    }

    pub fn dataset_path(&self, name: &str) -> PathBuf {
        self.data_dir.join(dataset_file_name(name.trim()))
    }

    fn slot(&self, name: &str) -> Arc<Mutex<DatasetSlot>> {
        if let Some(slot) = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return Arc::clone(slot);
        }

        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(name.to_string()).or_default())
    }

    fn existing_slot(&self, name: &str) -> Option<Arc<Mutex<DatasetSlot>>> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(Arc::clone)
    }

    /// Slot for a read. Unknown names get a slot only once a backing file is
    /// found for them.
    fn read_slot(&self, name: &str) -> Option<Arc<Mutex<DatasetSlot>>> {
        if let Some(slot) = self.existing_slot(name) {
            return Some(slot);
        }

        let (path, file) = match self.locate(name) {
            Ok(found) => found?,
            Err(error) => {
                warn!(dataset = name, error = %error, "failed to load dataset, serving it as empty");
                return None;
            }
        };
        let slot = self.slot(name);
        {
            let mut guard = lock(&slot);
            if guard.backing_file.is_none() {
                let modified = file_modified(&path);
                self.hydrate(&mut guard, name, file, path, modified);
            }
        }
        Some(slot)
    }

    /// Drops the map entry for `name` if it still points at `slot`, nobody
    /// else holds it and it has no resident dataset.
    fn forget(&self, name: &str, slot: &Arc<Mutex<DatasetSlot>>) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let idle = slots
            .get(name)
            .is_some_and(|current| Arc::ptr_eq(current, slot) && Arc::strong_count(slot) == 2);
        if idle && lock(slot).dataset.is_none() {
            slots.remove(name);
        }
    }

    fn dataset_files(&self) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.data_dir) {
            Ok(entries) => entries,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(StoreError::io(&self.data_dir, error)),
        };

        let mut files = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && is_dataset_file(path))
            .collect::<Vec<_>>();
        files.sort_unstable();
        Ok(files)
    }

    fn load_all(&self) -> usize {
        let files = match self.dataset_files() {
            Ok(files) => files,
            Err(error) => {
                warn!(error = %error, "unable to read data directory");
                return 0;
            }
        };

        let mut loaded = 0;
        for path in files {
            match read_dataset_file(&path) {
                Ok(file) => {
                    let name = file.dataset.trim().to_string();
                    let modified = file_modified(&path);
                    let slot = self.slot(&name);
                    let mut guard = lock(&slot);
                    self.hydrate(&mut guard, &name, file, path, modified);
                    loaded += 1;
                }
                Err(error) => warn!(path = %path.display(), error = %error, "skipping dataset file"),
            }
        }
        loaded
    }

    /// Finds the file holding `name`: the derived path first, then any file in
    /// the directory whose embedded dataset name matches.
    fn locate(&self, name: &str) -> Result<Option<(PathBuf, PersistedDataset)>> {
        let derived = self.dataset_path(name);
        if derived.is_file() {
            let file = read_dataset_file(&derived)?;
            if file.dataset.trim() == name {
                return Ok(Some((derived, file)));
            }
        }

        for path in self.dataset_files()? {
            if path == derived {
                continue;
            }
            match read_dataset_file(&path) {
                Ok(file) if file.dataset.trim() == name => return Ok(Some((path, file))),
                Ok(_) => {}
                Err(error) => {
                    warn!(path = %path.display(), error = %error, "skipping dataset file during scan");
                }
            }
        }
        Ok(None)
    }

    fn hydrate(
        &self,
        slot: &mut DatasetSlot,
        name: &str,
        file: PersistedDataset,
        path: PathBuf,
        modified: Option<SystemTime>,
    ) {
        let persisted_count = file.chunks.len();
        let mut passages = Vec::with_capacity(persisted_count);
        for (position, chunk) in file.chunks.into_iter().enumerate() {
            match chunk.into_passage(self.vector_length) {
                Ok(passage) => passages.push(passage),
                Err(reason) => {
                    warn!(dataset = name, position, reason = %reason, "dropping persisted passage");
                }
            }
        }

        let intact = passages.len() == persisted_count;
        let index = match file.inverted_index {
            Some(index) if intact && index.is_consistent_with(passages.len()) => index,
            persisted => {
                if persisted.is_some() {
                    warn!(dataset = name, "persisted inverted index is stale, rebuilding");
                }
                InvertedIndex::rebuild(passages.iter().map(Passage::tokens))
            }
        };

        debug!(dataset = name, passages = passages.len(), path = %path.display(), "dataset loaded");
        slot.dataset = Some(Dataset {
            name: name.to_string(),
            passages,
            index,
        });
        slot.backing_file = Some(path);
        slot.modified = modified;
    }

    /// Brings `slot` up to date with its backing file.
    fn refresh(&self, name: &str, slot: &mut DatasetSlot) -> Result<()> {
        let Some(path) = slot.backing_file.clone() else {
            if let Some((path, file)) = self.locate(name)? {
                let modified = file_modified(&path);
                self.hydrate(slot, name, file, path, modified);
            }
            return Ok(());
        };

        let current = match fs::metadata(&path) {
            Ok(metadata) => metadata.modified().ok(),
            Err(error) if error.kind() == ErrorKind::NotFound => {
                if slot.dataset.take().is_some() {
                    warn!(dataset = name, path = %path.display(), "backing file disappeared");
                }
                slot.modified = None;
                return Ok(());
            }
            Err(error) => return Err(StoreError::io(&path, error)),
        };

        let up_to_date = matches!(
            (slot.modified, current),
            (Some(known), Some(current)) if current <= known
        );
        if slot.dataset.is_some() && up_to_date {
            return Ok(());
        }

        let file = read_dataset_file(&path)?;
        if file.dataset.trim() != name {
            return Err(StoreError::Malformed {
                path,
                details: format!("file holds dataset {:?}", file.dataset),
            });
        }
        self.hydrate(slot, name, file, path, current);
        Ok(())
    }

    /// Read-path refresh: failures are logged and the dataset reads as empty.
    fn refresh_for_read(&self, name: &str, slot: &mut DatasetSlot) {
        if let Err(error) = self.refresh(name, slot) {
            warn!(dataset = name, error = %error, "failed to load dataset, serving it as empty");
            slot.dataset = None;
            slot.modified = None;
        }
    }

    pub fn ensure_loaded(&self, name: &str) {
        let Some(name) = normalize_name(name) else {
            return;
        };
        let Some(slot) = self.read_slot(name) else {
            return;
        };
        let mut guard = lock(&slot);
        self.refresh_for_read(name, &mut guard);
    }

    /// Runs `f` against the freshly loaded dataset. `None` when the dataset is
    /// unknown or failed to load.
    pub fn with_dataset<R>(&self, name: &str, f: impl FnOnce(&Dataset) -> R) -> Option<R> {
        let name = normalize_name(name)?;
        let slot = self.read_slot(name)?;
        let mut guard = lock(&slot);
        self.refresh_for_read(name, &mut guard);
        guard.dataset.as_ref().map(f)
    }

    pub fn upsert(&self, name: &str, batch: Vec<NewPassage>) -> Result<Vec<Passage>> {
        let name = normalize_name(name).ok_or_else(|| StoreError::InvalidDataset(name.to_string()))?;
        if batch.is_empty() {
            return Err(StoreError::EmptyBatch(name.to_string()));
        }
        if let Some(position) = batch.iter().position(|new| new.text.trim().is_empty()) {
            return Err(StoreError::InvalidPassage {
                position,
                reason: "passage text is empty".to_string(),
            });
        }

        let submitted = batch.len();
        let accepted = batch
            .into_iter()
            .enumerate()
            .filter_map(|(position, new)| match Passage::validate(new, self.vector_length) {
                Ok(passage) => Some(passage),
                Err(reason) => {
                    warn!(dataset = name, position, reason = %reason, "rejecting passage");
                    None
                }
            })
            .collect::<Vec<_>>();
        if accepted.is_empty() {
            warn!(dataset = name, submitted, "no passage in batch passed validation");
            return Ok(accepted);
        }

        let slot = self.slot(name);
        let mut guard = lock(&slot);
        self.refresh(name, &mut guard)?;

        let path = guard
            .backing_file
            .clone()
            .unwrap_or_else(|| self.dataset_path(name));
        let was_resident = guard.dataset.is_some();

        let persisted = {
            let dataset = guard.dataset.get_or_insert_with(|| Dataset::empty(name));
            let start = dataset.append(accepted.clone());
            let persisted = persist(&path, dataset);
            if persisted.is_err() {
                dataset.truncate(start);
            }
            persisted
        };

        match persisted {
            Ok(modified) => {
                guard.backing_file = Some(path);
                guard.modified = modified;
                info!(
                    dataset = name,
                    accepted = accepted.len(),
                    rejected = submitted - accepted.len(),
                    "passages upserted"
                );
                Ok(accepted)
            }
            Err(error) => {
                if !was_resident {
                    guard.dataset = None;
                }
                error!(dataset = name, error = %error, "failed to persist dataset");
                Err(error)
            }
        }
    }

    /// Drops the dataset from memory and removes its file. `Ok(false)` when
    /// there was nothing to delete.
    pub fn delete(&self, name: &str) -> Result<bool> {
        let Some(name) = normalize_name(name) else {
            return Ok(false);
        };
        let slot = self.slot(name);
        let deleted = {
            let mut guard = lock(&slot);
            self.delete_locked(name, &mut guard)?
        };
        self.forget(name, &slot);
        Ok(deleted)
    }

    fn delete_locked(&self, name: &str, guard: &mut DatasetSlot) -> Result<bool> {
        let was_resident = guard.dataset.take().is_some();
        guard.modified = None;

        let path = match guard.backing_file.take() {
            Some(path) => Some(path),
            None => match self.locate(name) {
                Ok(found) => found.map(|(path, _)| path),
                Err(StoreError::Malformed { path, .. }) => Some(path),
                Err(error) => return Err(error),
            },
        };

        let removed = match path {
            Some(path) => match fs::remove_file(&path) {
                Ok(()) => true,
                Err(error) if error.kind() == ErrorKind::NotFound => false,
                Err(error) => {
                    error!(dataset = name, path = %path.display(), error = %error, "failed to delete dataset file");
                    guard.backing_file = Some(path.clone());
                    return Err(StoreError::io(path, error));
                }
            },
            None => false,
        };

        if removed || was_resident {
            info!(dataset = name, "dataset deleted");
        }
        Ok(removed || was_resident)
    }

    /// Names of the datasets currently resident in memory.
    pub fn list(&self) -> BTreeSet<String> {
        let slots = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, slot)| (name.clone(), Arc::clone(slot)))
            .collect::<Vec<_>>();

        slots
            .into_iter()
            .filter(|(_, slot)| lock(slot).dataset.is_some())
            .map(|(name, _)| name)
            .collect()
    }

    pub fn stats(&self, name: &str) -> Option<DatasetStats> {
        self.with_dataset(name, Dataset::stats)
    }
}

fn file_modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|metadata| metadata.modified()).ok()
}

/// Writes the whole dataset next to `path` and renames it into place.
fn persist(path: &Path, dataset: &Dataset) -> Result<Option<SystemTime>> {
    let payload = PersistedDatasetRef {
        dataset: &dataset.name,
        updated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        chunks: dataset
            .passages
            .iter()
            .map(|passage| PersistedPassage::from_passage(&dataset.name, passage))
            .collect(),
        inverted_index: &dataset.index,
    };
    let json = serde_json::to_string_pretty(&payload)?;

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("dataset");
    let temp = path.with_file_name(format!(".{file_name}.{}.tmp", Uuid::new_v4()));

    fs::write(&temp, json).map_err(|error| StoreError::io(&temp, error))?;
    if let Err(error) = fs::rename(&temp, path) {
        let _ = fs::remove_file(&temp);
        return Err(StoreError::io(path, error));
    }

    Ok(file_modified(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::Duration;
    use tempfile::tempdir;

    const DIM: usize = 4;

    fn new_passage(text: &str, seed: f32) -> NewPassage {
        NewPassage::new(text, Some("https://example.com/doc"), vec![seed, 1.0, 0.0, 0.5])
    }

    fn bump_mtime(path: &Path) -> std::io::Result<()> {
        let file = File::options().write(true).open(path)?;
        file.set_modified(SystemTime::now() + Duration::from_secs(5))
    }

    fn texts(store: &DatasetStore, name: &str) -> Vec<String> {
        store
            .with_dataset(name, |dataset| {
                dataset
                    .passages()
                    .iter()
                    .map(|passage| passage.text().to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    #[test]
    fn file_name_is_slug_plus_short_sha1() {
        assert_eq!(dataset_file_name("faq"), "faq-e75bc045.json");
        assert_eq!(dataset_file_name("FAQ Cars"), "faq-cars-ac08fede.json");
        assert_eq!(dataset_file_name("Café Menu"), "cafe-menu-b9262e01.json");
        assert_eq!(dataset_file_name("ราคารถ"), "dataset-f4064312.json");
    }

    #[test]
    fn names_with_equal_slugs_get_distinct_files() {
        assert_eq!(dataset_file_name("a b"), "a-b-7dbde935.json");
        assert_eq!(dataset_file_name("a-b"), "a-b-34fafddd.json");
    }

    #[test]
    fn upsert_rejects_invalid_batches_without_side_effects() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = DatasetStore::new(dir.path(), DIM)?;

        assert!(matches!(
            store.upsert("  ", vec![new_passage("pump pressure", 1.0)]),
            Err(StoreError::InvalidDataset(_))
        ));
        assert!(matches!(store.upsert("faq", Vec::new()), Err(StoreError::EmptyBatch(_))));
        assert!(matches!(
            store.upsert("faq", vec![new_passage("pump", 1.0), new_passage(" ", 1.0)]),
            Err(StoreError::InvalidPassage { position: 1, .. })
        ));

        assert!(store.list().is_empty());
        assert!(!store.dataset_path("faq").exists());
        Ok(())
    }

    #[test]
    fn wrong_length_embeddings_never_enter_the_store() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = DatasetStore::new(dir.path(), DIM)?;

        let accepted = store.upsert(
            "faq",
            vec![
                new_passage("accepted passage", 1.0),
                NewPassage::new("too short", None, vec![1.0, 2.0]),
                NewPassage::new("too long", None, vec![1.0; DIM + 1]),
            ],
        )?;

        assert_eq!(accepted.len(), 1);
        assert_eq!(texts(&store, "faq"), vec!["accepted passage"]);

        let reopened = DatasetStore::new(dir.path(), DIM)?;
        assert_eq!(texts(&reopened, "faq"), vec!["accepted passage"]);
        Ok(())
    }

    #[test]
    fn batch_with_no_valid_embedding_writes_nothing() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = DatasetStore::new(dir.path(), DIM)?;

        let accepted = store.upsert("faq", vec![NewPassage::new("pump", None, vec![1.0])])?;
        assert!(accepted.is_empty());
        assert!(!store.dataset_path("faq").exists());
        Ok(())
    }

    #[test]
    fn persistence_round_trips_passages_in_order() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = DatasetStore::new(dir.path(), DIM)?;
        store.upsert("manuals", vec![new_passage("first pump", 0.25), new_passage("second valve", -0.5)])?;
        store.upsert("manuals", vec![new_passage("third seal", 0.1)])?;

        let snapshot = |store: &DatasetStore| {
            store.with_dataset("manuals", |dataset| dataset.passages().to_vec())
        };
        let before = snapshot(&store);
        let reopened = DatasetStore::new(dir.path(), DIM)?;
        let after = snapshot(&reopened);

        assert!(before.is_some());
        assert_eq!(before, after);
        assert_eq!(texts(&reopened, "manuals"), vec!["first pump", "second valve", "third seal"]);
        Ok(())
    }

    #[test]
    fn persisted_file_uses_the_shared_format() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = DatasetStore::new(dir.path(), DIM)?;
        store.upsert("faq", vec![new_passage("pump pressure", 1.0)])?;

        let raw = fs::read_to_string(store.dataset_path("faq"))?;
        let json: serde_json::Value = serde_json::from_str(&raw)?;
        assert_eq!(json["dataset"], "faq");
        assert!(json["updatedAt"].as_str().is_some_and(|stamp| stamp.ends_with('Z')));
        assert_eq!(json["chunks"][0]["sourceUrl"], "https://example.com/doc");
        assert_eq!(json["chunks"][0]["dataset"], "faq");
        assert_eq!(json["invertedIndex"]["pump"], serde_json::json!([0]));
        Ok(())
    }

    #[test]
    fn index_is_extended_incrementally() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = DatasetStore::new(dir.path(), DIM)?;
        store.upsert("faq", vec![new_passage("pump pressure", 1.0)])?;
        store.upsert("faq", vec![new_passage("valve", 1.0), new_passage("pump seal", 1.0)])?;

        let postings = store
            .with_dataset("faq", |dataset| {
                let rebuilt = InvertedIndex::rebuild(dataset.passages().iter().map(Passage::tokens));
                assert_eq!(&rebuilt, dataset.index());
                dataset.index().postings("pump").cloned()
            })
            .flatten()
            .unwrap_or_default();
        assert_eq!(postings.into_iter().collect::<Vec<_>>(), vec![0, 2]);
        Ok(())
    }

    #[test]
    fn open_loads_existing_datasets_and_skips_broken_files() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        {
            let store = DatasetStore::new(dir.path(), DIM)?;
            store.upsert("faq", vec![new_passage("pump", 1.0)])?;
            store.upsert("cars", vec![new_passage("yaris", 1.0)])?;
        }
        fs::write(dir.path().join("broken.json"), "{ not json")?;
        fs::write(dir.path().join("notes.txt"), "ignored")?;

        let config = RagConfig {
            vector_length: DIM,
            ..RagConfig::with_data_dir(dir.path())
        };
        let store = DatasetStore::open(&config)?;
        let names = store.list().into_iter().collect::<Vec<_>>();
        assert_eq!(names, vec!["cars", "faq"]);
        Ok(())
    }

    #[test]
    fn unknown_dataset_is_found_by_scanning() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let raw = serde_json::json!({
            "dataset": "legacy",
            "chunks": [{ "dataset": "legacy", "text": "legacy pump manual", "embedding": [1, 0, 0, 0] }]
        });
        fs::write(dir.path().join("legacy.json"), raw.to_string())?;

        let store = DatasetStore::new(dir.path(), DIM)?;
        assert!(store.list().is_empty());

        let stats = store.stats("legacy");
        assert_eq!(
            stats,
            Some(DatasetStats {
                chunk_count: 1,
                token_count: 3,
                index_term_count: 3
            })
        );

        store.upsert("legacy", vec![new_passage("appended", 1.0)])?;
        assert_eq!(texts(&store, "legacy"), vec!["legacy pump manual", "appended"]);
        assert!(!store.dataset_path("legacy").exists());
        Ok(())
    }

    #[test]
    fn inconsistent_persisted_index_is_rebuilt() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = DatasetStore::new(dir.path(), DIM)?;
        let raw = serde_json::json!({
            "dataset": "faq",
            "chunks": [
                { "dataset": "faq", "text": "pump seal", "embedding": [1, 0, 0, 0] },
                { "dataset": "faq", "text": "dropped", "embedding": [1, 0] }
            ],
            "invertedIndex": { "pump": [0], "dropped": [1], "ghost": [7] }
        });
        fs::write(store.dataset_path("faq"), raw.to_string())?;

        let index = store.with_dataset("faq", |dataset| dataset.index().clone());
        let expected = InvertedIndex::rebuild([["pump".to_string(), "seal".to_string()].as_slice()]);
        assert_eq!(index, Some(expected));
        Ok(())
    }

    #[test]
    fn external_write_is_picked_up_on_next_read() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let reader = DatasetStore::new(dir.path(), DIM)?;
        let writer = DatasetStore::new(dir.path(), DIM)?;

        writer.upsert("faq", vec![new_passage("first", 1.0)])?;
        assert_eq!(texts(&reader, "faq"), vec!["first"]);

        writer.upsert("faq", vec![new_passage("second", 1.0)])?;
        bump_mtime(&writer.dataset_path("faq"))?;

        reader.ensure_loaded("faq");
        assert_eq!(texts(&reader, "faq"), vec!["first", "second"]);
        Ok(())
    }

    #[test]
    fn unchanged_file_is_not_reread() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = DatasetStore::new(dir.path(), DIM)?;
        store.upsert("faq", vec![new_passage("first", 1.0)])?;

        let path = store.dataset_path("faq");
        let modified = fs::metadata(&path)?.modified()?;
        fs::write(&path, "{ overwritten but mtime rewound")?;
        File::options().write(true).open(&path)?.set_modified(modified)?;

        assert_eq!(texts(&store, "faq"), vec!["first"]);
        Ok(())
    }

    #[test]
    fn corrupt_backing_file_reads_empty_and_blocks_writes() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = DatasetStore::new(dir.path(), DIM)?;
        store.upsert("faq", vec![new_passage("first", 1.0)])?;

        let path = store.dataset_path("faq");
        fs::write(&path, "{ corrupt")?;
        bump_mtime(&path)?;

        assert!(store.with_dataset("faq", |dataset| dataset.len()).is_none());
        assert!(store.list().is_empty());
        assert!(matches!(
            store.upsert("faq", vec![new_passage("second", 1.0)]),
            Err(StoreError::Malformed { .. })
        ));
        assert_eq!(fs::read_to_string(&path)?, "{ corrupt");
        Ok(())
    }

    #[test]
    fn failed_persist_rolls_back_memory() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let data_dir = dir.path().join("data");
        let store = DatasetStore::new(&data_dir, DIM)?;
        fs::remove_dir_all(&data_dir)?;
        let known_modified = lock(&store.slot("faq")).modified;

        assert!(matches!(
            store.upsert("faq", vec![new_passage("first", 1.0)]),
            Err(StoreError::Io { .. })
        ));
        assert!(store.list().is_empty());
        assert_eq!(lock(&store.slot("faq")).modified, known_modified);

        fs::create_dir_all(&data_dir)?;
        store.upsert("faq", vec![new_passage("second", 1.0)])?;
        assert_eq!(texts(&store, "faq"), vec!["second"]);
        Ok(())
    }

    #[test]
    fn delete_removes_memory_and_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = DatasetStore::new(dir.path(), DIM)?;
        store.upsert("faq", vec![new_passage("first", 1.0)])?;

        assert!(store.delete("faq")?);
        assert!(!store.dataset_path("faq").exists());
        assert!(store.list().is_empty());
        assert!(store.stats("faq").is_none());
        assert!(!store.delete("faq")?);
        assert!(!store.delete("never-existed")?);
        Ok(())
    }

    #[test]
    fn misses_and_deletes_leave_no_slots_behind() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = DatasetStore::new(dir.path(), DIM)?;
        let slot_count = |store: &DatasetStore| {
            store
                .slots
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .len()
        };

        for attempt in 0..200 {
            let name = format!("missing-{attempt}");
            store.ensure_loaded(&name);
            assert!(store.with_dataset(&name, |dataset| dataset.len()).is_none());
        }
        assert_eq!(slot_count(&store), 0);

        store.upsert("faq", vec![new_passage("first", 1.0)])?;
        assert_eq!(slot_count(&store), 1);
        assert!(store.delete("faq")?);
        assert_eq!(slot_count(&store), 0);
        assert!(store.list().is_empty());

        assert!(!store.delete("faq")?);
        assert_eq!(slot_count(&store), 0);
        Ok(())
    }

    #[test]
    fn concurrent_upserts_to_one_dataset_keep_every_passage() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = Arc::new(DatasetStore::new(dir.path(), DIM)?);

        let handles = (0..8)
            .map(|worker| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for round in 0..5 {
                        let text = format!("worker {worker} round {round}");
                        store.upsert("shared", vec![new_passage(&text, 1.0)])?;
                    }
                    Ok::<_, StoreError>(())
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().map_err(|_| "worker panicked")??;
        }

        assert_eq!(store.stats("shared").map(|stats| stats.chunk_count), Some(40));
        let reopened = DatasetStore::new(dir.path(), DIM)?;
        assert_eq!(reopened.stats("shared").map(|stats| stats.chunk_count), Some(40));
        Ok(())
    }
}
