/*
Embedding providers.

- `OllamaEmbedder` talks to an Ollama-compatible `/api/embed` endpoint and is
  the default for real use (model `nomic-embed-text`, 768 dimensions).
- `FakeEmbedder` is a deterministic, dependency-free bag-of-words hashing
  embedder for tests, CI and offline development. Texts that share words get
  positively correlated vectors, which is enough to exercise search and graph
  building end to end.

The core never calls a provider on its own: `NoteService` embeds text before it
touches the store, so a failed or abandoned embedding never leaves a partially
visible note behind.
*/

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::{EmbedderConfig, EmbedderKind};
use crate::error::{NoteError, NoteResult};

pub mod fake;
pub mod ollama;

pub use fake::FakeEmbedder;
pub use ollama::OllamaEmbedder;

/// Progress callback type for long-running batch operations.
/// The callback receives a message describing the current step and a progress fraction (0.0..1.0).
pub type ProgressCallback = Arc<dyn Fn(String, f32) + Send + Sync>;

/// Texts sent to the provider per request when embedding in chunks.
pub const BATCH_CHUNK: usize = 32;

/// Turns text into fixed-length vectors.
pub trait EmbeddingProvider: Send + Sync {
    /// Dimension D of every vector this provider returns.
    fn dimension(&self) -> usize;

    /// Embed a batch of texts, returning one vector per input in order.
    ///
    /// # Errors
    ///
    /// `NoteError::Embedding` when the provider is unavailable or its response
    /// is malformed (wrong count, wrong dimension, non-finite values).
    fn embed_batch(&self, texts: &[String]) -> NoteResult<Vec<Vec<f32>>>;

    /// Embed a single piece of text.
    fn embed(&self, text: &str) -> NoteResult<Vec<f32>> {
        self.embed_batch(&[text.to_string()])?
            .pop()
            .ok_or_else(|| NoteError::Embedding("provider returned no vectors".to_string()))
    }

    /// Human-readable provider description for logs.
    fn describe(&self) -> String;
}

/// Check that a provider response has `expected` vectors of `dimension` finite values.
pub fn check_response(
    expected: usize,
    dimension: usize,
    vectors: Vec<Vec<f32>>,
) -> NoteResult<Vec<Vec<f32>>> {
    if vectors.len() != expected {
        return Err(NoteError::Embedding(format!(
            "provider returned {} vectors for {} inputs",
            vectors.len(),
            expected
        )));
    }
    for (i, v) in vectors.iter().enumerate() {
        if v.len() != dimension {
            return Err(NoteError::Embedding(format!(
                "vector {i} has {} dimensions, expected {dimension}",
                v.len()
            )));
        }
        if v.iter().any(|x| !x.is_finite()) {
            return Err(NoteError::Embedding(format!(
                "vector {i} contains non-finite values"
            )));
        }
    }
    Ok(vectors)
}

/// Embed `texts` in chunks of [`BATCH_CHUNK`], reporting progress after each chunk.
pub fn embed_in_chunks(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    progress: Option<ProgressCallback>,
) -> NoteResult<Vec<Vec<f32>>> {
    let total = texts.len();
    let mut out = Vec::with_capacity(total);
    for chunk in texts.chunks(BATCH_CHUNK) {
        out.extend(provider.embed_batch(chunk)?);
        if let Some(ref cb) = progress {
            let fraction = (out.len().min(total) as f32) / (total as f32);
            cb(format!("Embedded {}/{}", out.len(), total), fraction);
        }
    }
    Ok(out)
}

/// Construct the provider selected by `cfg`.
pub fn from_config(cfg: &EmbedderConfig) -> NoteResult<Arc<dyn EmbeddingProvider>> {
    let provider: Arc<dyn EmbeddingProvider> = match cfg.kind {
        EmbedderKind::Ollama => Arc::new(OllamaEmbedder::new(
            &cfg.url,
            &cfg.model,
            cfg.dimension,
            Duration::from_secs(cfg.timeout_secs),
        )?),
        EmbedderKind::Fake => Arc::new(FakeEmbedder::new(cfg.dimension)),
    };
    info!(provider = %provider.describe(), dimension = provider.dimension(), "embedding provider ready");
    Ok(provider)
}
