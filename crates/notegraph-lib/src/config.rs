//! Runtime configuration.
//!
//! Layering, lowest precedence first: built-in defaults, an optional JSON
//! file, `NOTEGRAPH_*` environment variables, then whatever the binary sets
//! from its command line flags.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::embed::ollama;
use crate::graph::GraphConfig;
use crate::vector::EmbeddingEncoding;

/// Environment variable names
pub mod env_vars {
    pub const CONFIG: &str = "NOTEGRAPH_CONFIG";
    pub const STORE: &str = "NOTEGRAPH_STORE";
    pub const EMBEDDER: &str = "NOTEGRAPH_EMBEDDER";
    pub const OLLAMA_URL: &str = "NOTEGRAPH_OLLAMA_URL";
    pub const MODEL: &str = "NOTEGRAPH_MODEL";
    pub const GRAPH_K: &str = "NOTEGRAPH_GRAPH_K";
}

/// Default values
pub mod defaults {
    pub const STORE_PATH: &str = "notegraph-notes.json";
    pub const TIMEOUT_SECS: u64 = 30;
    pub const SEARCH_LIMIT: usize = 5;
    pub const MIN_THRESHOLD: f32 = 0.3;
    pub const RELATED_MIN_THRESHOLD: f32 = 0.0;
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotegraphConfig {
    pub store: StoreConfig,
    pub embedder: EmbedderConfig,
    pub graph: GraphConfig,
    pub search: SearchConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON store file. `None` keeps notes in memory only.
    pub path: Option<PathBuf>,
    /// How embeddings are written to the store file.
    pub encoding: EmbeddingEncoding,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: Some(PathBuf::from(defaults::STORE_PATH)),
            encoding: EmbeddingEncoding::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderKind {
    Ollama,
    Fake,
}

impl Default for EmbedderKind {
    fn default() -> Self {
        if cfg!(feature = "fake-embed") {
            EmbedderKind::Fake
        } else {
            EmbedderKind::Ollama
        }
    }
}

impl std::str::FromStr for EmbedderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(EmbedderKind::Ollama),
            "fake" => Ok(EmbedderKind::Fake),
            other => bail!("unknown embedder '{other}' (expected 'ollama' or 'fake')"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedderConfig {
    pub kind: EmbedderKind,
    pub url: String,
    pub model: String,
    pub dimension: usize,
    /// Per-request timeout for remote providers.
    pub timeout_secs: u64,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            kind: EmbedderKind::default(),
            url: ollama::DEFAULT_URL.to_string(),
            model: ollama::DEFAULT_MODEL.to_string(),
            dimension: ollama::DEFAULT_DIMENSION,
            timeout_secs: defaults::TIMEOUT_SECS,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Result count when the caller does not give one.
    pub default_limit: usize,
    /// Minimum similarity for free-text search hits.
    pub min_threshold: f32,
    /// Minimum similarity for related-note suggestions.
    pub related_min_threshold: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: defaults::SEARCH_LIMIT,
            min_threshold: defaults::MIN_THRESHOLD,
            related_min_threshold: defaults::RELATED_MIN_THRESHOLD,
        }
    }
}

impl NotegraphConfig {
    /// Read a JSON config file. Missing sections and fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let cfg: NotegraphConfig = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(cfg)
    }

    /// Defaults, then the file named by `NOTEGRAPH_CONFIG` if set, then the
    /// other `NOTEGRAPH_*` variables.
    pub fn from_env() -> Result<Self> {
        let mut cfg = match std::env::var_os(env_vars::CONFIG) {
            Some(path) => Self::load(Path::new(&path))?,
            None => Self::default(),
        };
        cfg.apply_overrides_from(|key| std::env::var(key).ok())?;
        Ok(cfg)
    }

    /// Apply environment-style overrides using `lookup` to resolve variables.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(env_vars::STORE) {
            self.store.path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup(env_vars::EMBEDDER) {
            self.embedder.kind = v
                .parse()
                .with_context(|| format!("invalid {}", env_vars::EMBEDDER))?;
        }
        if let Some(v) = lookup(env_vars::OLLAMA_URL) {
            self.embedder.url = v;
        }
        if let Some(v) = lookup(env_vars::MODEL) {
            self.embedder.model = v;
        }
        if let Some(v) = lookup(env_vars::GRAPH_K) {
            self.graph.k = v
                .trim()
                .parse()
                .with_context(|| format!("invalid {}: '{v}'", env_vars::GRAPH_K))?;
        }
        Ok(())
    }

    /// Reject settings no component can work with.
    pub fn validate(&self) -> Result<()> {
        if self.graph.k == 0 {
            bail!("graph.k must be at least 1");
        }
        if self.graph.preview_chars == 0 {
            bail!("graph.preview_chars must be at least 1");
        }
        if self.embedder.dimension == 0 {
            bail!("embedder.dimension must be positive");
        }
        if self.embedder.timeout_secs == 0 {
            bail!("embedder.timeout_secs must be positive");
        }
        for (name, value) in [
            ("search.min_threshold", self.search.min_threshold),
            ("search.related_min_threshold", self.search.related_min_threshold),
        ] {
            if !(-1.0..=1.0).contains(&value) {
                bail!("{name} must be within [-1, 1], got {value}");
            }
        }
        Ok(())
    }
}
