// Notes carry their embedding inline as a plain Vec<f32>.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable identifier assigned by the store. Never reused within one store file.
pub type NoteId = u64;

const ELLIPSIS: &str = "...";

/// A captured note together with its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: NoteId,
    pub content: String,
    /// Set once at creation and never mutated.
    pub created_at: DateTime<Utc>,
    /// Time of the last content + embedding replacement, if any.
    pub updated_at: Option<DateTime<Utc>>,
    /// `None` only for records whose stored embedding could not be parsed.
    /// Such notes stay listable but take no part in similarity computations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Note {
    /// The embedding if it has exactly `dimension` finite components.
    pub fn valid_embedding(&self, dimension: usize) -> Option<&[f32]> {
        self.embedding
            .as_deref()
            .filter(|e| crate::vector::is_valid_embedding(e, dimension))
    }

    /// Returns a whitespace-collapsed version of `content`.
    pub fn clean_content(&self) -> String {
        self.content.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Whitespace-collapsed preview of at most `max_chars` characters, ending
    /// in `...` when truncated.
    pub fn preview(&self, max_chars: usize) -> String {
        let clean = self.clean_content();
        if clean.chars().count() <= max_chars {
            return clean;
        }
        if max_chars <= ELLIPSIS.len() {
            return clean.chars().take(max_chars).collect();
        }
        let keep = max_chars - ELLIPSIS.len();
        let mut out: String = clean.chars().take(keep).collect();
        out.truncate(out.trim_end().len());
        out.push_str(ELLIPSIS);
        out
    }

    /// Recency ordering key: newer creation first, then higher id.
    pub(crate) fn recency_key(&self) -> (DateTime<Utc>, NoteId) {
        (self.created_at, self.id)
    }
}
