//! Relationship graph over the note collection.
//!
//! The graph is a symmetric KNN union: every note proposes edges to its `k`
//! most similar peers and the union of those proposals, deduplicated by
//! unordered pair, is the edge set. Unlike a global similarity threshold this
//! keeps every node connected to at least one peer while bounding the edge
//! count to `k · |V|`. It is rebuilt from scratch on each request, so there
//! are never stale edges after an update or delete.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::note::{Note, NoteId};
use crate::store::NoteSnapshot;

/// Submodules
pub mod knn;

/// Neighbours proposed per node.
pub const DEFAULT_GRAPH_K: usize = 2;
/// Maximum characters of a node label.
pub const DEFAULT_PREVIEW_CHARS: usize = 50;

/// Tunables for graph construction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Neighbours proposed per node. Values below 1 are treated as 1.
    pub k: usize,
    /// Maximum characters of a node label, ellipsis included.
    pub preview_chars: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            k: DEFAULT_GRAPH_K,
            preview_chars: DEFAULT_PREVIEW_CHARS,
        }
    }
}

/// A note as drawn in the graph.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: NoteId,
    /// Short, ellipsis-truncated preview.
    pub label: String,
    /// Full content, shown when the node is selected.
    pub content: String,
    /// Number of incident edges; used as the visual node size.
    pub degree: usize,
}

/// Undirected edge. `source < target` always holds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: NoteId,
    pub target: NoteId,
    /// Cosine similarity of the two notes.
    #[serde(rename = "value")]
    pub weight: f32,
}

/// Nodes and deduplicated edges for one request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl GraphSnapshot {
    /// Whether the unordered pair `(a, b)` is connected.
    pub fn has_edge(&self, a: NoteId, b: NoteId) -> bool {
        let key = knn::pair_key(a, b);
        self.edges.iter().any(|e| (e.source, e.target) == key)
    }

    /// Ids adjacent to `id`, strongest edge first.
    pub fn neighbors(&self, id: NoteId) -> Vec<(NoteId, f32)> {
        let mut out: Vec<(NoteId, f32)> = self
            .edges
            .iter()
            .filter_map(|e| {
                if e.source == id {
                    Some((e.target, e.weight))
                } else if e.target == id {
                    Some((e.source, e.weight))
                } else {
                    None
                }
            })
            .collect();
        out.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        out
    }

    pub fn node(&self, id: NoteId) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// Builds [`GraphSnapshot`]s from note snapshots.
#[derive(Clone, Debug, Default)]
pub struct GraphBuilder {
    config: GraphConfig,
}

impl GraphBuilder {
    pub fn new(config: GraphConfig) -> Self {
        Self { config }
    }

    /// Build the sparsified similarity graph for `snapshot`.
    ///
    /// Pipeline:
    /// 1. collect notes with a valid embedding (others are skipped silently)
    /// 2. dense pairwise cosine similarity matrix
    /// 3. per-node top-K neighbour lists (ties by ascending id)
    /// 4. union of all lists, deduplicated by unordered pair
    /// 5. nodes with preview labels and degrees
    pub fn build(&self, snapshot: &NoteSnapshot) -> GraphSnapshot {
        let k = self.config.k.max(1);

        // 1) Eligible notes in ascending id order.
        let members: Vec<(&Note, &[f32])> = snapshot.embedded().collect();
        let skipped = snapshot.len() - members.len();
        if skipped > 0 {
            debug!(skipped, "notes without a valid embedding left out of the graph");
        }

        if members.len() < 2 {
            return GraphSnapshot {
                nodes: members
                    .iter()
                    .map(|(note, _)| self.node_for(note, 0))
                    .collect(),
                edges: Vec::new(),
            };
        }

        let ids: Vec<NoteId> = members.iter().map(|(note, _)| note.id).collect();
        let rows: Vec<&[f32]> = members.iter().map(|(_, emb)| *emb).collect();

        // 2) Pairwise similarity.
        let sim = knn::cosine_similarity_matrix(&rows);

        // 3) + 4) KNN lists and their deduplicated union.
        let raw_edges = knn::knn_union_edges(&sim, &ids, k);

        let mut degree: HashMap<NoteId, usize> = HashMap::with_capacity(ids.len());
        let edges: Vec<GraphEdge> = raw_edges
            .into_iter()
            .map(|(i, j, weight)| {
                let (source, target) = knn::pair_key(ids[i], ids[j]);
                *degree.entry(source).or_insert(0) += 1;
                *degree.entry(target).or_insert(0) += 1;
                GraphEdge {
                    source,
                    target,
                    weight,
                }
            })
            .collect();

        // 5) Nodes.
        let nodes = members
            .iter()
            .map(|(note, _)| self.node_for(note, degree.get(&note.id).copied().unwrap_or(0)))
            .collect();

        debug!(nodes = ids.len(), edges = edges.len(), k, "graph built");
        GraphSnapshot { nodes, edges }
    }

    fn node_for(&self, note: &Note, degree: usize) -> GraphNode {
        GraphNode {
            id: note.id,
            label: note.preview(self.config.preview_chars),
            content: note.content.clone(),
            degree,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::NoteStore;

    fn build(vectors: &[[f32; 2]], k: usize) -> GraphSnapshot {
        let store = NoteStore::in_memory(2).unwrap();
        for (i, v) in vectors.iter().enumerate() {
            store.insert(&format!("note {i}"), v.to_vec()).unwrap();
        }
        GraphBuilder::new(GraphConfig {
            k,
            ..GraphConfig::default()
        })
        .build(&store.snapshot())
    }

    #[test]
    fn fewer_than_two_notes_have_no_edges() {
        assert_eq!(build(&[], 2), GraphSnapshot::default());
        let single = build(&[[1.0, 0.0]], 2);
        assert_eq!(single.nodes.len(), 1);
        assert!(single.edges.is_empty());
    }

    #[test]
    fn two_notes_are_always_connected() {
        let g = build(&[[1.0, 0.0], [0.0, 1.0]], 2);
        assert_eq!(g.edges.len(), 1);
        assert!(g.has_edge(1, 2));
        assert!(g.edges[0].weight.abs() < 1e-6);
    }

    #[test]
    fn edges_are_canonical_and_unique() {
        let g = build(&[[1.0, 0.0], [0.9, 0.1], [0.0, 1.0], [0.1, 0.9], [0.7, 0.7]], 2);
        let mut keys: Vec<(NoteId, NoteId)> = g.edges.iter().map(|e| (e.source, e.target)).collect();
        assert!(keys.iter().all(|(a, b)| a < b));
        let before = keys.len();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), before);
        assert!(g.edges.len() <= 2 * 5);
    }

    #[test]
    fn degrees_match_edges() {
        let g = build(&[[1.0, 0.0], [0.9, 0.1], [0.0, 1.0]], 1);
        let total: usize = g.nodes.iter().map(|n| n.degree).sum();
        assert_eq!(total, 2 * g.edges.len());
        assert!(g.nodes.iter().all(|n| n.degree >= 1));
    }

    #[test]
    fn zero_k_behaves_like_one() {
        let g = build(&[[1.0, 0.0], [0.9, 0.1], [0.0, 1.0]], 0);
        assert!(!g.edges.is_empty());
        assert!(g.nodes.iter().all(|n| n.degree >= 1));
    }

    #[test]
    fn neighbors_are_sorted_by_weight() {
        let g = build(&[[1.0, 0.0], [0.9, 0.1], [0.0, 1.0]], 2);
        let n = g.neighbors(1);
        assert_eq!(n.len(), 2);
        assert!(n[0].1 >= n[1].1);
        assert_eq!(n[0].0, 2);
    }
}
