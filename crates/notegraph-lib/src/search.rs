//! Exact nearest-neighbour ranking over a note snapshot.
//!
//! Brute force by design of the target scale (hundreds to low thousands of
//! notes): every embedded note is scored against the query vector in parallel
//! with rayon, filtered by the threshold, sorted and truncated.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::note::NoteId;
use crate::store::NoteSnapshot;
use crate::vector::cosine_similarity;

/// One ranked hit. `rank` is 1-based.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimilarityResult {
    pub note_id: NoteId,
    pub similarity: f32,
    pub rank: usize,
}

/// Read-side ranking over one snapshot.
pub struct SimilarityIndex<'a> {
    snapshot: &'a NoteSnapshot,
}

impl<'a> SimilarityIndex<'a> {
    pub fn new(snapshot: &'a NoteSnapshot) -> Self {
        Self { snapshot }
    }

    /// Rank notes by cosine similarity to `query`.
    ///
    /// # Arguments
    ///
    /// * `query` - query vector; must have the snapshot's dimension
    /// * `k` - maximum number of results
    /// * `min_threshold` - results scoring below this are dropped
    ///
    /// # Returns
    ///
    /// Results sorted by descending similarity, ties broken by recency (newer
    /// note first). Empty when nothing clears the threshold, `k` is zero or
    /// the query has the wrong dimension.
    pub fn query(&self, query: &[f32], k: usize, min_threshold: f32) -> Vec<SimilarityResult> {
        self.query_excluding(query, k, min_threshold, None)
    }

    /// Like [`query`](Self::query) but never returns `exclude`.
    pub fn query_excluding(
        &self,
        query: &[f32],
        k: usize,
        min_threshold: f32,
        exclude: Option<NoteId>,
    ) -> Vec<SimilarityResult> {
        if k == 0 {
            return Vec::new();
        }
        if query.len() != self.snapshot.dimension() {
            warn!(
                len = query.len(),
                expected = self.snapshot.dimension(),
                "query embedding has the wrong dimension"
            );
            return Vec::new();
        }

        let candidates: Vec<(NoteId, DateTime<Utc>, &[f32])> = self
            .snapshot
            .embedded()
            .filter(|(note, _)| Some(note.id) != exclude)
            .map(|(note, emb)| (note.id, note.created_at, emb))
            .collect();

        let mut scored: Vec<(NoteId, DateTime<Utc>, f32)> = candidates
            .par_iter()
            .map(|(id, created_at, emb)| (*id, *created_at, cosine_similarity(query, emb)))
            .filter(|(_, _, sim)| *sim >= min_threshold)
            .collect();

        scored.sort_by(|a, b| rank_order((a.2, a.1, a.0), (b.2, b.1, b.0)));
        scored.truncate(k);

        scored
            .into_iter()
            .enumerate()
            .map(|(i, (note_id, _, similarity))| SimilarityResult {
                note_id,
                similarity,
                rank: i + 1,
            })
            .collect()
    }
}

/// Higher similarity first, then newer creation, then higher id.
fn rank_order(
    a: (f32, DateTime<Utc>, NoteId),
    b: (f32, DateTime<Utc>, NoteId),
) -> Ordering {
    b.0.total_cmp(&a.0)
        .then_with(|| b.1.cmp(&a.1))
        .then_with(|| b.2.cmp(&a.2))
}
