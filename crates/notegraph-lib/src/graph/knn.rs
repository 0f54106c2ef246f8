/*!
Numerical building blocks for the note relationship graph.

- Dense pairwise cosine similarity matrix
- Per-node top-K neighbour selection
- Symmetric KNN union with canonical unordered-pair deduplication

All functions operate on row indices into an embedding list whose order is
fixed by the caller (ascending note id), which makes every result
deterministic.
*/

use std::cmp::Ordering;
use std::collections::HashSet;

use ndarray::Array2;
use rayon::prelude::*;

use crate::model::note::NoteId;
use crate::vector::cosine_similarity;

/// Compute the pairwise cosine similarity matrix for `rows`.
///
/// # Arguments
///
/// * `rows` - embeddings, one per node
///
/// # Returns
///
/// A symmetric `(n, n)` matrix. Pairs with mismatched dimensions score 0.
pub fn cosine_similarity_matrix(rows: &[&[f32]]) -> Array2<f32> {
    let n = rows.len();

    // Compute upper triangle in parallel
    let upper_tri: Vec<Vec<(usize, f32)>> = (0..n)
        .into_par_iter()
        .map(|i| {
            (i..n)
                .map(|j| (j, cosine_similarity(rows[i], rows[j])))
                .collect()
        })
        .collect();

    // Build symmetric matrix
    let mut sim = Array2::<f32>::zeros((n, n));
    for (i, row) in upper_tri.iter().enumerate() {
        for &(j, val) in row.iter() {
            sim[(i, j)] = val;
            sim[(j, i)] = val;
        }
    }
    sim
}

/// Select the `k` most similar other nodes for row `i`.
///
/// Ranking is by similarity descending, ties broken by ascending node id. No
/// absolute threshold is applied, so every node with at least one peer gets a
/// candidate even in a weakly similar collection.
pub fn top_k_neighbors(sim: &Array2<f32>, ids: &[NoteId], i: usize, k: usize) -> Vec<usize> {
    let mut others: Vec<usize> = (0..ids.len()).filter(|&j| j != i).collect();
    others.sort_by(|&a, &b| neighbor_order(sim[(i, a)], ids[a], sim[(i, b)], ids[b]));
    others.truncate(k);
    others
}

fn neighbor_order(sim_a: f32, id_a: NoteId, sim_b: f32, id_b: NoteId) -> Ordering {
    sim_b.total_cmp(&sim_a).then_with(|| id_a.cmp(&id_b))
}

/// Canonical key of an unordered pair: the smaller id first.
pub fn pair_key(a: NoteId, b: NoteId) -> (NoteId, NoteId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Union of every node's top-K list, deduplicated by unordered pair.
///
/// # Returns
///
/// `(i, j, weight)` row-index triples in first-seen order, where the first
/// occurrence of a pair fixes its orientation and weight. Self pairs never
/// appear.
pub fn knn_union_edges(sim: &Array2<f32>, ids: &[NoteId], k: usize) -> Vec<(usize, usize, f32)> {
    let neighbor_lists: Vec<Vec<usize>> = (0..ids.len())
        .into_par_iter()
        .map(|i| top_k_neighbors(sim, ids, i, k))
        .collect();

    let mut seen: HashSet<(NoteId, NoteId)> = HashSet::with_capacity(ids.len() * k);
    let mut edges = Vec::with_capacity(ids.len() * k);
    for (i, neighbors) in neighbor_lists.iter().enumerate() {
        for &j in neighbors {
            if i == j {
                continue;
            }
            if seen.insert(pair_key(ids[i], ids[j])) {
                edges.push((i, j, sim[(i, j)]));
            }
        }
    }
    edges
}
