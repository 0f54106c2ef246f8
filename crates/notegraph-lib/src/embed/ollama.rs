use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{NoteError, NoteResult};

use super::{check_response, EmbeddingProvider};

/// Default model served by a local Ollama instance.
pub const DEFAULT_MODEL: &str = "nomic-embed-text";
/// Output dimension of `nomic-embed-text`.
pub const DEFAULT_DIMENSION: usize = 768;
pub const DEFAULT_URL: &str = "http://localhost:11434";

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Client for an Ollama-compatible `POST /api/embed` endpoint.
///
/// Requests carry a timeout, so an unreachable or stalled server surfaces as
/// `NoteError::Embedding` instead of hanging the caller.
#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    dimension: usize,
}

impl OllamaEmbedder {
    pub fn new(url: &str, model: &str, dimension: usize, timeout: Duration) -> NoteResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NoteError::Embedding(format!("building HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/embed", url.trim_end_matches('/')),
            model: model.to_string(),
            dimension,
        })
    }
}

impl EmbeddingProvider for OllamaEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_batch(&self, texts: &[String]) -> NoteResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let start = Instant::now();
        let response = self
            .client
            .post(&self.endpoint)
            .json(&EmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .map_err(|e| NoteError::Embedding(format!("{}: {e}", self.endpoint)))?
            .error_for_status()
            .map_err(|e| NoteError::Embedding(format!("{}: {e}", self.endpoint)))?;

        let body: EmbedResponse = response
            .json()
            .map_err(|e| NoteError::Embedding(format!("malformed response: {e}")))?;
        debug!(
            count = texts.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "embedded batch"
        );

        check_response(texts.len(), self.dimension, body.embeddings)
    }

    fn describe(&self) -> String {
        format!("ollama({} @ {})", self.model, self.endpoint)
    }
}
