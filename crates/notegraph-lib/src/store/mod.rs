//! Authoritative, snapshot-based note collection.
//!
//! The store publishes an immutable [`NoteSnapshot`] behind an `Arc`. Readers
//! clone the `Arc` and work on that point-in-time view for as long as they
//! like; writers are serialised by a mutex, build the next snapshot from the
//! current one (notes are `Arc`-shared, so only pointers are copied), persist
//! it through the backend and only then swap it in. A failed write leaves the
//! published state untouched.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{NoteError, NoteResult};
use crate::model::note::{Note, NoteId};
use crate::vector::{self, EmbeddingEncoding, StoredEmbedding};

pub mod backend;

pub use backend::{JsonFileBackend, MemoryBackend, NoteBackend, StoreDocument, StoredNote};

/// Immutable view of the collection at one point in time.
#[derive(Debug, Clone)]
pub struct NoteSnapshot {
    notes: BTreeMap<NoteId, Arc<Note>>,
    next_id: NoteId,
    dimension: usize,
}

impl NoteSnapshot {
    fn empty(dimension: usize) -> Self {
        Self {
            notes: BTreeMap::new(),
            next_id: 1,
            dimension,
        }
    }

    /// Embedding dimension shared by every valid note.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn get(&self, id: NoteId) -> Option<&Note> {
        self.notes.get(&id).map(Arc::as_ref)
    }

    /// Notes in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &Note> {
        self.notes.values().map(Arc::as_ref)
    }

    /// Notes that carry a valid embedding, in ascending id order, paired with it.
    pub fn embedded(&self) -> impl Iterator<Item = (&Note, &[f32])> {
        let dim = self.dimension;
        self.iter()
            .filter_map(move |n| n.valid_embedding(dim).map(|e| (n, e)))
    }

    /// Notes ordered newest-created first (ties: higher id first).
    pub fn list(&self) -> Vec<Note> {
        let mut notes: Vec<Note> = self.iter().cloned().collect();
        notes.sort_by(|a, b| b.recency_key().cmp(&a.recency_key()));
        notes
    }

    fn to_document(&self, encoding: EmbeddingEncoding) -> StoreDocument {
        let notes = self
            .iter()
            .map(|n| StoredNote {
                id: n.id,
                content: n.content.clone(),
                created_at: n.created_at,
                updated_at: n.updated_at,
                embedding: n
                    .embedding
                    .as_deref()
                    .map(|e| StoredEmbedding::encode(e, encoding)),
            })
            .collect();
        StoreDocument::new(self.dimension, self.next_id, notes)
    }

    fn from_document(doc: StoreDocument, dimension: usize) -> NoteResult<Self> {
        if doc.dimension != dimension && !doc.notes.is_empty() {
            warn!(
                stored = doc.dimension,
                expected = dimension,
                "store was written with a different embedding dimension; notes need re-embedding"
            );
        }

        let mut snapshot = Self::empty(dimension);
        for stored in doc.notes {
            let embedding = match stored.embedding.as_ref().map(vector::parse_embedding) {
                Some(Ok(values)) if values.len() == dimension => Some(values),
                Some(Ok(values)) => {
                    warn!(
                        note_id = stored.id,
                        len = values.len(),
                        expected = dimension,
                        "stored embedding has the wrong dimension; excluding note from similarity"
                    );
                    None
                }
                Some(Err(err)) => {
                    warn!(note_id = stored.id, error = %err, "unparsable stored embedding");
                    None
                }
                None => None,
            };

            let note = Note {
                id: stored.id,
                content: stored.content,
                created_at: stored.created_at,
                updated_at: stored.updated_at,
                embedding,
            };
            if snapshot.notes.insert(note.id, Arc::new(note)).is_some() {
                warn!(note_id = stored.id, "duplicate note id in store; keeping the last record");
            }
        }

        let max_id = snapshot.notes.keys().next_back().copied().unwrap_or(0);
        let after_max = max_id.checked_add(1).ok_or_else(id_space_exhausted)?;
        snapshot.next_id = doc.next_id.max(after_max).max(1);
        Ok(snapshot)
    }

    /// Hand out the next id and advance the counter.
    fn allocate_id(&mut self) -> NoteResult<NoteId> {
        let id = self.next_id;
        self.next_id = id.checked_add(1).ok_or_else(id_space_exhausted)?;
        Ok(id)
    }
}

/// Thread-safe note collection with write-through persistence.
pub struct NoteStore {
    state: RwLock<Arc<NoteSnapshot>>,
    writer: Mutex<()>,
    backend: Box<dyn NoteBackend>,
    dimension: usize,
    encoding: EmbeddingEncoding,
}

impl std::fmt::Debug for NoteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoteStore")
            .field("backend", &self.backend.describe())
            .field("dimension", &self.dimension)
            .field("notes", &self.len())
            .finish()
    }
}

impl NoteStore {
    /// Open a store over `backend`, loading whatever it already holds.
    ///
    /// # Errors
    ///
    /// `Validation` for a zero dimension, `Storage` when the backend cannot
    /// be read.
    pub fn with_backend(
        backend: Box<dyn NoteBackend>,
        dimension: usize,
        encoding: EmbeddingEncoding,
    ) -> NoteResult<Self> {
        if dimension == 0 {
            return Err(NoteError::Validation(
                "embedding dimension must be positive".to_string(),
            ));
        }
        let snapshot = match backend.load()? {
            Some(doc) => NoteSnapshot::from_document(doc, dimension)?,
            None => NoteSnapshot::empty(dimension),
        };
        info!(
            backend = %backend.describe(),
            notes = snapshot.len(),
            dimension,
            "note store opened"
        );
        Ok(Self {
            state: RwLock::new(Arc::new(snapshot)),
            writer: Mutex::new(()),
            backend,
            dimension,
            encoding,
        })
    }

    /// Non-durable store.
    pub fn in_memory(dimension: usize) -> NoteResult<Self> {
        Self::with_backend(
            Box::new(MemoryBackend::new()),
            dimension,
            EmbeddingEncoding::Array,
        )
    }

    /// Store persisted as a JSON file at `path` (created on first write).
    pub fn open_json(
        path: &Path,
        dimension: usize,
        encoding: EmbeddingEncoding,
    ) -> NoteResult<Self> {
        Self::with_backend(Box::new(JsonFileBackend::new(path)), dimension, encoding)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Point-in-time view of the whole collection.
    pub fn snapshot(&self) -> Arc<NoteSnapshot> {
        Arc::clone(&self.state.read())
    }

    pub fn len(&self) -> usize {
        self.state.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Notes ordered newest-created first.
    pub fn list(&self) -> Vec<Note> {
        self.snapshot().list()
    }

    pub fn get(&self, id: NoteId) -> NoteResult<Note> {
        self.snapshot()
            .get(id)
            .cloned()
            .ok_or(NoteError::NotFound(id))
    }

    /// Insert a new note; it becomes visible to readers once persisted.
    pub fn insert(&self, content: &str, embedding: Vec<f32>) -> NoteResult<Note> {
        validate_content(content)?;
        self.validate_embedding(&embedding)?;

        let _guard = self.writer.lock();
        let mut next = (*self.snapshot()).clone();
        let note = Note {
            id: next.allocate_id()?,
            content: content.to_string(),
            created_at: Utc::now(),
            updated_at: None,
            embedding: Some(embedding),
        };
        next.notes.insert(note.id, Arc::new(note.clone()));
        self.commit(next)?;

        info!(note_id = note.id, "note created");
        Ok(note)
    }

    /// Insert several notes in one commit. Either all become visible or none.
    pub fn insert_many(&self, items: Vec<(String, Vec<f32>)>) -> NoteResult<Vec<Note>> {
        for (content, embedding) in &items {
            validate_content(content)?;
            self.validate_embedding(embedding)?;
        }
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let _guard = self.writer.lock();
        let mut next = (*self.snapshot()).clone();
        let now = Utc::now();
        let mut created = Vec::with_capacity(items.len());
        for (content, embedding) in items {
            let note = Note {
                id: next.allocate_id()?,
                content,
                created_at: now,
                updated_at: None,
                embedding: Some(embedding),
            };
            next.notes.insert(note.id, Arc::new(note.clone()));
            created.push(note);
        }
        self.commit(next)?;

        info!(count = created.len(), "notes created");
        Ok(created)
    }

    /// Replace content and embedding of an existing note in one step.
    pub fn update(&self, id: NoteId, content: &str, embedding: Vec<f32>) -> NoteResult<Note> {
        validate_content(content)?;
        self.validate_embedding(&embedding)?;

        let _guard = self.writer.lock();
        let mut next = (*self.snapshot()).clone();
        let existing = next.notes.get(&id).ok_or(NoteError::NotFound(id))?;
        let note = Note {
            id,
            content: content.to_string(),
            created_at: existing.created_at,
            updated_at: Some(Utc::now()),
            embedding: Some(embedding),
        };
        next.notes.insert(id, Arc::new(note.clone()));
        self.commit(next)?;

        info!(note_id = id, "note updated");
        Ok(note)
    }

    /// Set only the embedding of an existing note, leaving its content alone.
    /// Used to repair records whose stored embedding was lost or malformed.
    ///
    /// The embedding is applied only while the note still holds
    /// `expected_content`, the text it was computed from. If the note was
    /// edited in the meantime, nothing is written and `Ok(None)` is returned.
    pub fn replace_embedding(
        &self,
        id: NoteId,
        expected_content: &str,
        embedding: Vec<f32>,
    ) -> NoteResult<Option<Note>> {
        self.validate_embedding(&embedding)?;

        let _guard = self.writer.lock();
        let mut next = (*self.snapshot()).clone();
        let existing = next.notes.get(&id).ok_or(NoteError::NotFound(id))?;
        if existing.content != expected_content {
            debug!(note_id = id, "content changed since embedding; not replacing");
            return Ok(None);
        }
        let mut note = Note::clone(existing);
        note.embedding = Some(embedding);
        next.notes.insert(id, Arc::new(note.clone()));
        self.commit(next)?;

        debug!(note_id = id, "embedding replaced");
        Ok(Some(note))
    }

    pub fn delete(&self, id: NoteId) -> NoteResult<()> {
        let _guard = self.writer.lock();
        let mut next = (*self.snapshot()).clone();
        if next.notes.remove(&id).is_none() {
            return Err(NoteError::NotFound(id));
        }
        self.commit(next)?;

        info!(note_id = id, "note deleted");
        Ok(())
    }

    fn commit(&self, next: NoteSnapshot) -> NoteResult<()> {
        self.backend.save(&next.to_document(self.encoding))?;
        *self.state.write() = Arc::new(next);
        Ok(())
    }

    fn validate_embedding(&self, embedding: &[f32]) -> NoteResult<()> {
        if embedding.len() != self.dimension {
            return Err(NoteError::Validation(format!(
                "embedding has {} dimensions, store expects {}",
                embedding.len(),
                self.dimension
            )));
        }
        if embedding.iter().any(|x| !x.is_finite()) {
            return Err(NoteError::Validation(
                "embedding contains non-finite values".to_string(),
            ));
        }
        Ok(())
    }
}

fn id_space_exhausted() -> NoteError {
    NoteError::Storage("note id space exhausted".to_string())
}

fn validate_content(content: &str) -> NoteResult<()> {
    if content.trim().is_empty() {
        return Err(NoteError::Validation(
            "note content must not be empty".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingBackend;

    impl NoteBackend for FailingBackend {
        fn load(&self) -> NoteResult<Option<StoreDocument>> {
            Ok(None)
        }
        fn save(&self, _doc: &StoreDocument) -> NoteResult<()> {
            Err(NoteError::Storage("disk full".to_string()))
        }
        fn describe(&self) -> String {
            "failing".to_string()
        }
    }

    #[test]
    fn insert_assigns_increasing_ids() {
        let store = NoteStore::in_memory(2).unwrap();
        let a = store.insert("first", vec![1.0, 0.0]).unwrap();
        let b = store.insert("second", vec![0.0, 1.0]).unwrap();
        assert!(b.id > a.id);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn list_is_newest_first() {
        let store = NoteStore::in_memory(2).unwrap();
        let a = store.insert("first", vec![1.0, 0.0]).unwrap();
        let b = store.insert("second", vec![0.0, 1.0]).unwrap();
        let c = store.insert("third", vec![1.0, 1.0]).unwrap();
        let ids: Vec<NoteId> = store.list().iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![c.id, b.id, a.id]);
    }

    #[test]
    fn rejects_empty_content_and_wrong_dimension() {
        let store = NoteStore::in_memory(2).unwrap();
        assert!(matches!(
            store.insert("   ", vec![1.0, 0.0]),
            Err(NoteError::Validation(_))
        ));
        assert!(matches!(
            store.insert("ok", vec![1.0, 0.0, 0.0]),
            Err(NoteError::Validation(_))
        ));
        assert!(matches!(
            store.insert("ok", vec![f32::NAN, 0.0]),
            Err(NoteError::Validation(_))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn update_replaces_content_and_embedding_but_keeps_created_at() {
        let store = NoteStore::in_memory(2).unwrap();
        let original = store.insert("before", vec![1.0, 0.0]).unwrap();
        let updated = store.update(original.id, "after", vec![0.0, 1.0]).unwrap();
        assert_eq!(updated.created_at, original.created_at);
        assert!(updated.updated_at.is_some());
        let fetched = store.get(original.id).unwrap();
        assert_eq!(fetched.content, "after");
        assert_eq!(fetched.embedding, Some(vec![0.0, 1.0]));
    }

    #[test]
    fn update_and_delete_missing_ids_are_not_found() {
        let store = NoteStore::in_memory(2).unwrap();
        assert!(matches!(
            store.update(7, "x", vec![1.0, 0.0]),
            Err(NoteError::NotFound(7))
        ));
        assert!(matches!(store.delete(7), Err(NoteError::NotFound(7))));
    }

    #[test]
    fn snapshots_are_unaffected_by_later_writes() {
        let store = NoteStore::in_memory(2).unwrap();
        let a = store.insert("first", vec![1.0, 0.0]).unwrap();
        let before = store.snapshot();
        store.delete(a.id).unwrap();
        store.insert("second", vec![0.0, 1.0]).unwrap();
        assert_eq!(before.len(), 1);
        assert!(before.get(a.id).is_some());
        assert!(store.get(a.id).is_err());
    }

    #[test]
    fn deleted_ids_are_not_reused() {
        let store = NoteStore::in_memory(2).unwrap();
        let a = store.insert("first", vec![1.0, 0.0]).unwrap();
        store.delete(a.id).unwrap();
        let b = store.insert("second", vec![1.0, 0.0]).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn failed_save_commits_nothing() {
        let store =
            NoteStore::with_backend(Box::new(FailingBackend), 2, EmbeddingEncoding::Array)
                .unwrap();
        let err = store.insert("first", vec![1.0, 0.0]).unwrap_err();
        assert_eq!(err.kind(), "storage");
        assert!(store.is_empty());
    }

    #[test]
    fn malformed_stored_embeddings_load_as_missing() {
        let doc = StoreDocument::new(
            2,
            0,
            vec![
                StoredNote {
                    id: 4,
                    content: "good".to_string(),
                    created_at: Utc::now(),
                    updated_at: None,
                    embedding: Some(StoredEmbedding::Text("[0.5,0.5]".to_string())),
                },
                StoredNote {
                    id: 9,
                    content: "garbled".to_string(),
                    created_at: Utc::now(),
                    updated_at: None,
                    embedding: Some(StoredEmbedding::Text("[0.5,oops]".to_string())),
                },
                StoredNote {
                    id: 11,
                    content: "short".to_string(),
                    created_at: Utc::now(),
                    updated_at: None,
                    embedding: Some(StoredEmbedding::Array(vec![1.0])),
                },
            ],
        );
        let store = NoteStore::with_backend(
            Box::new(MemoryBackend::with_document(doc)),
            2,
            EmbeddingEncoding::Array,
        )
        .unwrap();

        let snap = store.snapshot();
        assert_eq!(snap.len(), 3);
        let embedded: Vec<NoteId> = snap.embedded().map(|(n, _)| n.id).collect();
        assert_eq!(embedded, vec![4]);
        // next_id is bumped past the highest stored id.
        let fresh = store.insert("new", vec![1.0, 0.0]).unwrap();
        assert_eq!(fresh.id, 12);
    }

    #[test]
    fn replace_embedding_keeps_content() {
        let store = NoteStore::in_memory(2).unwrap();
        let a = store.insert("keep me", vec![1.0, 0.0]).unwrap();
        let fixed = store
            .replace_embedding(a.id, "keep me", vec![0.0, 1.0])
            .unwrap()
            .unwrap();
        assert_eq!(fixed.content, "keep me");
        assert_eq!(fixed.updated_at, None);
        assert_eq!(fixed.embedding, Some(vec![0.0, 1.0]));
    }

    #[test]
    fn replace_embedding_skips_edited_content() {
        let store = NoteStore::in_memory(2).unwrap();
        let a = store.insert("old content", vec![1.0, 0.0]).unwrap();
        let seen = store.snapshot();
        store.update(a.id, "brand new content", vec![0.0, 1.0]).unwrap();

        let stale = seen.get(a.id).unwrap();
        let outcome = store
            .replace_embedding(a.id, &stale.content, vec![0.6, 0.8])
            .unwrap();
        assert!(outcome.is_none());
        let current = store.get(a.id).unwrap();
        assert_eq!(current.content, "brand new content");
        assert_eq!(current.embedding, Some(vec![0.0, 1.0]));

        assert!(matches!(
            store.replace_embedding(99, "anything", vec![1.0, 0.0]),
            Err(NoteError::NotFound(99))
        ));
    }

    #[test]
    fn exhausted_id_space_is_a_storage_error() {
        let doc = StoreDocument::new(
            2,
            0,
            vec![StoredNote {
                id: NoteId::MAX,
                content: "last".to_string(),
                created_at: Utc::now(),
                updated_at: None,
                embedding: None,
            }],
        );
        let err = NoteStore::with_backend(
            Box::new(MemoryBackend::with_document(doc)),
            2,
            EmbeddingEncoding::Array,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "storage");

        // A counter already at the top fails the insert and commits nothing.
        let doc = StoreDocument::new(2, NoteId::MAX, Vec::new());
        let store = NoteStore::with_backend(
            Box::new(MemoryBackend::with_document(doc)),
            2,
            EmbeddingEncoding::Array,
        )
        .unwrap();
        let err = store.insert("overflow", vec![1.0, 0.0]).unwrap_err();
        assert_eq!(err.kind(), "storage");
        assert!(store.is_empty());
    }

    #[test]
    fn insert_many_is_all_or_nothing() {
        let store = NoteStore::in_memory(2).unwrap();
        let bad = vec![
            ("ok".to_string(), vec![1.0, 0.0]),
            ("  ".to_string(), vec![0.0, 1.0]),
        ];
        assert!(matches!(store.insert_many(bad), Err(NoteError::Validation(_))));
        assert!(store.is_empty());

        let notes = store
            .insert_many(vec![
                ("a".to_string(), vec![1.0, 0.0]),
                ("b".to_string(), vec![0.0, 1.0]),
            ])
            .unwrap();
        let ids: Vec<NoteId> = notes.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(store.len(), 2);
    }

    /// Content `"{tag}{writer}-{i}"` always travels with this embedding.
    fn paired(tag: char, writer: usize, i: usize) -> (String, Vec<f32>) {
        let sign = if tag == 'u' { -1.0 } else { 1.0 };
        (
            format!("{tag}{writer}-{i}"),
            vec![sign * (writer as f32 + 1.0), i as f32 + 1.0],
        )
    }

    fn embedding_for(content: &str) -> Vec<f32> {
        let tag = content.chars().next().unwrap();
        let (writer, i) = content[1..].split_once('-').unwrap();
        paired(tag, writer.parse().unwrap(), i.parse().unwrap()).1
    }

    #[test]
    fn readers_never_see_torn_writes() {
        use std::collections::HashSet;
        use std::sync::atomic::{AtomicBool, Ordering};

        const WRITERS: usize = 4;
        const PER_WRITER: usize = 25;

        let store = NoteStore::in_memory(2).unwrap();
        let done = AtomicBool::new(false);

        std::thread::scope(|s| {
            let writers: Vec<_> = (0..WRITERS)
                .map(|w| {
                    let store = &store;
                    s.spawn(move || {
                        for i in 0..PER_WRITER {
                            let (content, embedding) = paired('w', w, i);
                            let note = store.insert(&content, embedding).unwrap();
                            if i % 3 == 0 {
                                let (content, embedding) = paired('u', w, i);
                                store.update(note.id, &content, embedding).unwrap();
                            }
                            if i % 5 == 0 {
                                store.delete(note.id).unwrap();
                            }
                        }
                    })
                })
                .collect();

            for _ in 0..2 {
                s.spawn(|| {
                    while !done.load(Ordering::Acquire) {
                        let snap = store.snapshot();
                        let mut ids = HashSet::new();
                        for note in snap.iter() {
                            assert!(ids.insert(note.id), "duplicate id {}", note.id);
                            assert_eq!(
                                note.embedding.as_deref(),
                                Some(embedding_for(&note.content).as_slice()),
                                "note {} has a mismatched embedding",
                                note.id
                            );
                        }
                        let listed = store.list();
                        let unique: HashSet<NoteId> = listed.iter().map(|n| n.id).collect();
                        assert_eq!(unique.len(), listed.len());
                    }
                });
            }

            let results: Vec<_> = writers.into_iter().map(|h| h.join()).collect();
            done.store(true, Ordering::Release);
            assert!(results.iter().all(Result::is_ok), "a writer panicked");
        });

        let survivors: Vec<usize> = (0..PER_WRITER).filter(|i| i % 5 != 0).collect();
        assert_eq!(store.len(), WRITERS * survivors.len());

        let snap = store.snapshot();
        let ids: HashSet<NoteId> = snap.iter().map(|n| n.id).collect();
        assert_eq!(ids.len(), snap.len());
        assert!(ids.iter().all(|&id| (1..=(WRITERS * PER_WRITER) as NoteId).contains(&id)));

        let contents: HashSet<String> = snap.iter().map(|n| n.content.clone()).collect();
        let expected: HashSet<String> = (0..WRITERS)
            .flat_map(|w| {
                survivors.iter().map(move |&i| {
                    let tag = if i % 3 == 0 { 'u' } else { 'w' };
                    paired(tag, w, i).0
                })
            })
            .collect();
        assert_eq!(contents, expected);
        // Every insert consumed one id, deleted ones included.
        let fresh = store.insert("after", vec![1.0, 1.0]).unwrap();
        assert_eq!(fresh.id, (WRITERS * PER_WRITER) as NoteId + 1);
    }

    #[test]
    fn zero_dimension_is_rejected() {
        assert!(matches!(
            NoteStore::in_memory(0),
            Err(NoteError::Validation(_))
        ));
    }
}
