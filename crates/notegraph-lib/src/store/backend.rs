//! Durable storage behind the `NoteStore`.
//!
//! A backend only moves whole documents: the store hands it the complete next
//! state on every mutation and publishes that state only after `save`
//! succeeds. The JSON file backend writes to a temporary sibling file and
//! renames it into place so a crash mid-write leaves the previous file intact.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{NoteError, NoteResult};
use crate::model::note::NoteId;
use crate::vector::StoredEmbedding;

/// Current on-disk format identifier, recorded in the document metadata.
pub const FORMAT_VERSION: &str = "notegraph-1";

/// One persisted row: `{id, content, created_at, updated_at, embedding}`.
///
/// `embedding` is either a native number array or the bracketed text
/// encoding; both are accepted on read.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredNote {
    pub id: NoteId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub embedding: Option<StoredEmbedding>,
}

/// Top-level persisted document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoreDocument {
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Embedding dimension the notes were written with.
    pub dimension: usize,
    /// Next identifier to hand out; kept so deleted ids are never reused.
    #[serde(default)]
    pub next_id: NoteId,
    pub notes: Vec<StoredNote>,
}

impl StoreDocument {
    pub fn new(dimension: usize, next_id: NoteId, notes: Vec<StoredNote>) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert("format_version".to_string(), FORMAT_VERSION.to_string());
        Self {
            metadata,
            dimension,
            next_id,
            notes,
        }
    }
}

/// Persistence layer consumed by the store.
pub trait NoteBackend: Send + Sync {
    /// Load the persisted document, or `None` when nothing was stored yet.
    fn load(&self) -> NoteResult<Option<StoreDocument>>;

    /// Durably replace the persisted document.
    fn save(&self, doc: &StoreDocument) -> NoteResult<()>;

    /// Short description used in log lines.
    fn describe(&self) -> String;
}

/// Whole-file JSON persistence.
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "notegraph".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl NoteBackend for JsonFileBackend {
    fn load(&self) -> NoteResult<Option<StoreDocument>> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "store file does not exist yet");
            return Ok(None);
        }
        let file = File::open(&self.path).map_err(|e| {
            NoteError::Storage(format!("opening {}: {e}", self.path.display()))
        })?;
        let doc: StoreDocument = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            NoteError::Storage(format!("parsing {}: {e}", self.path.display()))
        })?;
        Ok(Some(doc))
    }

    fn save(&self, doc: &StoreDocument) -> NoteResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp = self.temp_path();
        {
            let file = File::create(&tmp)
                .map_err(|e| NoteError::Storage(format!("creating {}: {e}", tmp.display())))?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer(&mut writer, doc)?;
            writer.flush()?;
            writer
                .into_inner()
                .map_err(|e| NoteError::Storage(e.to_string()))?
                .sync_all()?;
        }
        fs::rename(&tmp, &self.path).map_err(|e| {
            NoteError::Storage(format!(
                "replacing {} with {}: {e}",
                self.path.display(),
                tmp.display()
            ))
        })?;
        debug!(path = %self.path.display(), notes = doc.notes.len(), "store saved");
        Ok(())
    }

    fn describe(&self) -> String {
        format!("json:{}", self.path.display())
    }
}

/// Non-durable backend: keeps the last saved document in memory.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    doc: Mutex<Option<StoreDocument>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing document, e.g. one produced by another store.
    pub fn with_document(doc: StoreDocument) -> Self {
        Self {
            doc: Mutex::new(Some(doc)),
        }
    }

    /// Copy of the last saved document.
    pub fn document(&self) -> Option<StoreDocument> {
        self.doc.lock().clone()
    }
}

impl NoteBackend for MemoryBackend {
    fn load(&self) -> NoteResult<Option<StoreDocument>> {
        Ok(self.doc.lock().clone())
    }

    fn save(&self, doc: &StoreDocument) -> NoteResult<()> {
        *self.doc.lock() = Some(doc.clone());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_doc() -> StoreDocument {
        StoreDocument::new(
            2,
            3,
            vec![
                StoredNote {
                    id: 1,
                    content: "a".to_string(),
                    created_at: Utc::now(),
                    updated_at: None,
                    embedding: Some(StoredEmbedding::Array(vec![1.0, 0.0])),
                },
                StoredNote {
                    id: 2,
                    content: "b".to_string(),
                    created_at: Utc::now(),
                    updated_at: None,
                    embedding: Some(StoredEmbedding::Text("[0,1]".to_string())),
                },
            ],
        )
    }

    #[test]
    fn json_backend_round_trips_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("notes.json");
        let backend = JsonFileBackend::new(&path);

        assert!(backend.load().unwrap().is_none());
        let doc = sample_doc();
        backend.save(&doc).unwrap();

        assert!(path.exists());
        assert!(!backend.temp_path().exists());
        assert_eq!(backend.load().unwrap(), Some(doc));
    }

    #[test]
    fn corrupt_file_is_a_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.json");
        fs::write(&path, "{ not json").unwrap();
        let err = JsonFileBackend::new(&path).load().unwrap_err();
        assert_eq!(err.kind(), "storage");
    }

    #[test]
    fn document_records_format_version() {
        let doc = sample_doc();
        assert_eq!(
            doc.metadata.get("format_version").map(String::as_str),
            Some(FORMAT_VERSION)
        );
    }

    #[test]
    fn memory_backend_keeps_last_document() {
        let backend = MemoryBackend::new();
        assert!(backend.load().unwrap().is_none());
        backend.save(&sample_doc()).unwrap();
        assert_eq!(backend.document().map(|d| d.notes.len()), Some(2));
    }
}
