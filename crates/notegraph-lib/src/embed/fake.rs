use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::error::NoteResult;

use super::EmbeddingProvider;

/// Deterministic bag-of-words embedder.
///
/// Each lower-cased word (with a trailing plural `s` dropped) is hashed into
/// one of `dimension` buckets with a hash-derived sign; the sum is
/// L2-normalised. Texts without any word fall back to a per-index hash of the
/// whole text so the result is never the zero vector.
#[derive(Debug, Clone)]
pub struct FakeEmbedder {
    dimension: usize,
}

impl FakeEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut out = vec![0.0f32; self.dimension];
        let mut any = false;

        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let word = normalize_word(word);
            let h = hash_of(&word);
            let bucket = (h % self.dimension as u64) as usize;
            let sign = if (h >> 63) & 1 == 1 { -1.0 } else { 1.0 };
            out[bucket] += sign;
            any = true;
        }

        if !any {
            for (i, slot) in out.iter_mut().enumerate() {
                let mut hasher = DefaultHasher::new();
                text.hash(&mut hasher);
                i.hash(&mut hasher);
                // Map u64 -> [0,1] -> [-1,1]
                let v = (hasher.finish() as f64) / (u64::MAX as f64);
                *slot = ((v * 2.0) - 1.0) as f32;
            }
        }

        let norm = out.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in out.iter_mut() {
                *x /= norm;
            }
        }
        out
    }
}

fn normalize_word(word: &str) -> String {
    let lower = word.to_lowercase();
    match lower.strip_suffix('s') {
        Some(stem) if stem.chars().count() >= 3 && !stem.ends_with('s') => stem.to_string(),
        _ => lower,
    }
}

fn hash_of(word: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    word.hash(&mut hasher);
    hasher.finish()
}

impl EmbeddingProvider for FakeEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_batch(&self, texts: &[String]) -> NoteResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn describe(&self) -> String {
        format!("fake(dim={})", self.dimension)
    }
}
