//! Reading position persistence
//!
//! The core never decides where progress lives. Hosts plug in a
//! [`ProgressStore`]; two stores ship with the crate.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

/// Last position reached in a book
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "persist", derive(serde::Serialize, serde::Deserialize))]
pub struct ProgressRecord {
    /// Spine index of the chapter being read
    pub chapter_index: usize,
    /// Zero-based page within that chapter
    pub page_number: usize,
    /// Milliseconds since the Unix epoch when the position was saved
    pub timestamp_ms: u64,
}

impl ProgressRecord {
    /// Record with an explicit timestamp.
    pub fn new(chapter_index: usize, page_number: usize, timestamp_ms: u64) -> Self {
        Self {
            chapter_index,
            page_number,
            timestamp_ms,
        }
    }

    /// Record stamped with the current wall-clock time.
    pub fn now(chapter_index: usize, page_number: usize) -> Self {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0);
        Self::new(chapter_index, page_number, timestamp_ms)
    }
}

/// Key/value store for reading progress, keyed by a host-chosen book id.
///
/// Implementations must not panic on storage failures; a failed write is
/// logged and the in-memory state stays authoritative.
pub trait ProgressStore: Send + Sync {
    /// Saved position for `book_id`, if any.
    fn get(&self, book_id: &str) -> Option<ProgressRecord>;
    /// Save the position for `book_id`, replacing any previous one.
    fn set(&self, book_id: &str, record: ProgressRecord);
    /// Forget the position for `book_id`.
    fn delete(&self, book_id: &str);
}

/// Process-local store
#[derive(Debug, Default)]
pub struct MemoryProgressStore {
    records: RwLock<HashMap<String, ProgressRecord>>,
}

impl MemoryProgressStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of books with a saved position.
    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether no positions are saved.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ProgressStore for MemoryProgressStore {
    fn get(&self, book_id: &str) -> Option<ProgressRecord> {
        self.records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(book_id)
            .copied()
    }

    fn set(&self, book_id: &str, record: ProgressRecord) {
        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(book_id.to_string(), record);
    }

    fn delete(&self, book_id: &str) {
        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(book_id);
    }
}

#[cfg(feature = "persist")]
pub use file_store::JsonFileProgressStore;

#[cfg(feature = "persist")]
mod file_store {
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::RwLock;

    use super::{ProgressRecord, ProgressStore};

    /// Store backed by a single JSON object on disk, keyed by book id.
    ///
    /// The whole file is rewritten on every change. A missing or corrupt file
    /// starts the store empty.
    #[derive(Debug)]
    pub struct JsonFileProgressStore {
        path: PathBuf,
        records: RwLock<HashMap<String, ProgressRecord>>,
    }

    impl JsonFileProgressStore {
        /// Open the store at `path`, loading any records already saved there.
        pub fn open(path: impl Into<PathBuf>) -> Self {
            let path = path.into();
            let records = load_records(&path);
            Self {
                path,
                records: RwLock::new(records),
            }
        }

        /// File this store writes to.
        pub fn path(&self) -> &Path {
            &self.path
        }

        fn persist(&self, records: &HashMap<String, ProgressRecord>) {
            let json = match serde_json::to_vec(records) {
                Ok(json) => json,
                Err(err) => {
                    log::warn!("[PROGRESS] Failed to encode progress: {}", err);
                    return;
                }
            };
            if let Err(err) = std::fs::write(&self.path, json) {
                log::warn!(
                    "[PROGRESS] Failed to write {}: {}",
                    self.path.display(),
                    err
                );
            }
        }
    }

    impl ProgressStore for JsonFileProgressStore {
        fn get(&self, book_id: &str) -> Option<ProgressRecord> {
            self.records
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .get(book_id)
                .copied()
        }

        fn set(&self, book_id: &str, record: ProgressRecord) {
            let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
            records.insert(book_id.to_string(), record);
            self.persist(&records);
        }

        fn delete(&self, book_id: &str) {
            let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
            if records.remove(book_id).is_some() {
                self.persist(&records);
            }
        }
    }

    fn load_records(path: &Path) -> HashMap<String, ProgressRecord> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
            Err(err) => {
                log::warn!("[PROGRESS] Failed to read {}: {}", path.display(), err);
                return HashMap::new();
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(records) => records,
            Err(err) => {
                log::warn!(
                    "[PROGRESS] Ignoring unreadable progress file {}: {}",
                    path.display(),
                    err
                );
                HashMap::new()
            }
        }
    }
}
