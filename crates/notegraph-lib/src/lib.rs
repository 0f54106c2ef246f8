//! Library entry point for the note graph engine.
//!
//! Notes are short texts stored together with an embedding vector. The
//! library keeps them in a snapshot-based store persisted as JSON, ranks them
//! against free-text queries by cosine similarity and builds a sparse
//! relationship graph (symmetric top-K nearest neighbours) for visualisation.
//!
//! Most callers only need [`NoteService`], which wires a [`NoteStore`] to an
//! [`EmbeddingProvider`] and exposes the note operations.
//
// Public modules
pub mod config;
pub mod embed;
pub mod error;
pub mod graph;
pub mod model;
pub mod search;
pub mod service;
pub mod store;
pub mod utils;
pub mod vector;

// Re-export primary types for ergonomic use.
pub use config::NotegraphConfig;
pub use embed::{EmbeddingProvider, FakeEmbedder, OllamaEmbedder, ProgressCallback};
pub use error::{NoteError, NoteResult};
pub use graph::{GraphBuilder, GraphConfig, GraphEdge, GraphNode, GraphSnapshot};
pub use model::note::{Note, NoteId};
pub use search::{SimilarityIndex, SimilarityResult};
pub use service::{ActionResponse, NoteService, ScoredNote, ServiceConfig};
pub use store::{NoteSnapshot, NoteStore};
