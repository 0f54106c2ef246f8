//! Note operations as seen by the outer surfaces (CLI, MCP).
//!
//! Every mutating operation embeds its text first and only then touches the
//! store, so an embedding failure (or a caller that gives up mid-request)
//! never leaves a partially written note behind.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{NotegraphConfig, SearchConfig};
use crate::embed::{self, EmbeddingProvider, ProgressCallback};
use crate::error::{NoteError, NoteResult};
use crate::graph::{GraphBuilder, GraphConfig, GraphSnapshot};
use crate::model::note::{Note, NoteId};
use crate::search::{SimilarityIndex, SimilarityResult};
use crate::store::{NoteSnapshot, NoteStore};

/// The subset of [`NotegraphConfig`] the service consults per request.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ServiceConfig {
    pub graph: GraphConfig,
    pub search: SearchConfig,
}

impl From<&NotegraphConfig> for ServiceConfig {
    fn from(cfg: &NotegraphConfig) -> Self {
        Self {
            graph: cfg.graph.clone(),
            search: cfg.search.clone(),
        }
    }
}

/// A note returned from a similarity query.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoredNote {
    #[serde(flatten)]
    pub note: Note,
    pub similarity: f32,
    pub rank: usize,
}

/// Uniform `{success, data?, error?, kind?}` envelope for surfaces that
/// report outcomes as data rather than as Rust errors.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl<T> ActionResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            kind: None,
        }
    }

    pub fn err(error: &NoteError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
            kind: Some(error.kind().to_string()),
        }
    }
}

impl<T> From<NoteResult<T>> for ActionResponse<T> {
    fn from(result: NoteResult<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::err(&e),
        }
    }
}

pub struct NoteService {
    store: NoteStore,
    embedder: Arc<dyn EmbeddingProvider>,
    graph: GraphBuilder,
    config: ServiceConfig,
}

impl std::fmt::Debug for NoteService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoteService")
            .field("store", &self.store)
            .field("embedder", &self.embedder.describe())
            .field("config", &self.config)
            .finish()
    }
}

impl NoteService {
    /// Wire a store to an embedding provider.
    ///
    /// # Errors
    ///
    /// `Validation` if the provider and the store disagree on the dimension.
    pub fn new(
        store: NoteStore,
        embedder: Arc<dyn EmbeddingProvider>,
        config: ServiceConfig,
    ) -> NoteResult<Self> {
        if embedder.dimension() != store.dimension() {
            return Err(NoteError::Validation(format!(
                "embedder produces {} dimensions but the store expects {}",
                embedder.dimension(),
                store.dimension()
            )));
        }
        Ok(Self {
            store,
            embedder,
            graph: GraphBuilder::new(config.graph.clone()),
            config,
        })
    }

    /// Open the configured store and provider.
    pub fn from_config(cfg: &NotegraphConfig) -> NoteResult<Self> {
        cfg.validate()
            .map_err(|e| NoteError::Validation(format!("{e:#}")))?;
        let dimension = cfg.embedder.dimension;
        let store = match cfg.store.path {
            Some(ref path) => NoteStore::open_json(path, dimension, cfg.store.encoding)?,
            None => NoteStore::in_memory(dimension)?,
        };
        let embedder = embed::from_config(&cfg.embedder)?;
        Self::new(store, embedder, ServiceConfig::from(cfg))
    }

    pub fn store(&self) -> &NoteStore {
        &self.store
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn embedder(&self) -> &dyn EmbeddingProvider {
        self.embedder.as_ref()
    }

    /// Capture a new note. Content is trimmed before storing.
    pub fn create_note(&self, content: &str) -> NoteResult<Note> {
        let content = non_empty(content)?;
        let embedding = self.embedder.embed(content)?;
        self.store.insert(content, embedding)
    }

    /// Capture many notes with batched embedding calls. Nothing is stored
    /// unless every text is non-empty and every embedding succeeds.
    pub fn create_notes(
        &self,
        contents: &[String],
        progress: Option<ProgressCallback>,
    ) -> NoteResult<Vec<Note>> {
        let texts = contents
            .iter()
            .map(|c| non_empty(c).map(str::to_string))
            .collect::<NoteResult<Vec<String>>>()?;
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let embeddings = embed::embed_in_chunks(self.embedder.as_ref(), &texts, progress)?;
        self.store
            .insert_many(texts.into_iter().zip(embeddings).collect())
    }

    /// All notes, newest first.
    pub fn get_notes(&self) -> Vec<Note> {
        self.store.list()
    }

    pub fn get_note(&self, id: NoteId) -> NoteResult<Note> {
        self.store.get(id)
    }

    /// Free-text semantic search. `limit` falls back to the configured default.
    pub fn search_notes(&self, query: &str, limit: Option<usize>) -> NoteResult<Vec<ScoredNote>> {
        let query = non_empty(query)?;
        let limit = limit.unwrap_or(self.config.search.default_limit);
        let embedding = self.embedder.embed(query)?;

        let snapshot = self.store.snapshot();
        let hits = SimilarityIndex::new(&snapshot).query(
            &embedding,
            limit,
            self.config.search.min_threshold,
        );
        debug!(hits = hits.len(), limit, "search finished");
        Ok(resolve(&snapshot, hits))
    }

    /// Replace a note's content and embedding.
    ///
    /// A missing id is reported before the provider is called.
    pub fn update_note(&self, id: NoteId, content: &str) -> NoteResult<Note> {
        let content = non_empty(content)?;
        self.store.get(id)?;
        let embedding = self.embedder.embed(content)?;
        self.store.update(id, content, embedding)
    }

    pub fn delete_note(&self, id: NoteId) -> NoteResult<()> {
        self.store.delete(id)
    }

    /// Relationship graph over the current collection.
    pub fn get_graph_data(&self) -> GraphSnapshot {
        self.graph.build(&self.store.snapshot())
    }

    /// Notes most similar to `id`, never including `id` itself.
    ///
    /// A note without a usable embedding has no related notes.
    pub fn get_related_notes(&self, id: NoteId, limit: Option<usize>) -> NoteResult<Vec<ScoredNote>> {
        let limit = limit.unwrap_or(self.config.search.default_limit);
        let snapshot = self.store.snapshot();
        let note = snapshot.get(id).ok_or(NoteError::NotFound(id))?;
        let Some(embedding) = note.valid_embedding(snapshot.dimension()) else {
            debug!(note_id = id, "note has no embedding; no related notes");
            return Ok(Vec::new());
        };

        let hits = SimilarityIndex::new(&snapshot).query_excluding(
            embedding,
            limit,
            self.config.search.related_min_threshold,
            Some(id),
        );
        Ok(resolve(&snapshot, hits))
    }

    /// Embed every note that currently lacks a valid embedding.
    ///
    /// # Returns
    ///
    /// The number of notes repaired. Notes deleted or edited while the batch
    /// was being embedded are skipped; an edit already carries a fresh
    /// embedding of its new content.
    pub fn reembed_all(&self, progress: Option<ProgressCallback>) -> NoteResult<usize> {
        let snapshot = self.store.snapshot();
        let missing: Vec<&Note> = snapshot
            .iter()
            .filter(|n| n.valid_embedding(snapshot.dimension()).is_none())
            .collect();
        if missing.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = missing.iter().map(|n| n.content.clone()).collect();
        let embeddings = embed::embed_in_chunks(self.embedder.as_ref(), &texts, progress)?;

        let mut repaired = 0;
        for (note, embedding) in missing.iter().zip(embeddings) {
            match self.store.replace_embedding(note.id, &note.content, embedding) {
                Ok(Some(_)) => repaired += 1,
                Ok(None) => warn!(note_id = note.id, "note edited during re-embedding; skipped"),
                Err(NoteError::NotFound(id)) => warn!(note_id = id, "note vanished during re-embedding"),
                Err(e) => return Err(e),
            }
        }
        info!(repaired, "re-embedded notes");
        Ok(repaired)
    }
}

fn non_empty(text: &str) -> NoteResult<&str> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(NoteError::Validation(
            "note content must not be empty".to_string(),
        ));
    }
    Ok(trimmed)
}

fn resolve(snapshot: &NoteSnapshot, hits: Vec<SimilarityResult>) -> Vec<ScoredNote> {
    hits.into_iter()
        .filter_map(|hit| {
            snapshot.get(hit.note_id).map(|note| ScoredNote {
                note: note.clone(),
                similarity: hit.similarity,
                rank: hit.rank,
            })
        })
        .collect()
}
