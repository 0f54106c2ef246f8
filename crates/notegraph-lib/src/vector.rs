/*!
Fixed-dimension vector helpers used by search and graph building.

Everything here fails safe: a length mismatch, an empty vector or a (near)
zero norm scores 0 instead of erroring or producing NaN, so one malformed
record cannot poison a computation over the whole collection.

The module also owns the single parsing boundary for stored embeddings. The
persistence layer may hand back either a native number array or the bracketed
text encoding (`"[0.1,-0.25,3]"`); both become a validated `Vec<f32>` here and
nowhere else.
*/

use serde::{Deserialize, Serialize};

use crate::error::{NoteError, NoteResult};

/// Norms below this are treated as zero.
pub const MIN_NORM: f32 = 1e-6;

/// Dot product of two equal-length vectors. Mismatched lengths score 0.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// L2 norm.
pub fn norm(a: &[f32]) -> f32 {
    a.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity `dot(a,b) / (|a|·|b|)` computed in a single pass.
///
/// # Returns
///
/// A value in `[-1, 1]`, or `0.0` when the lengths differ, either vector is
/// empty or has a near-zero norm, or the arithmetic overflows.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let norm_a = norm_a.sqrt();
    let norm_b = norm_b.sqrt();
    // Written as negated comparisons so NaN norms also take the early return.
    if !(norm_a >= MIN_NORM) || !(norm_b >= MIN_NORM) {
        return 0.0;
    }

    let sim = dot / (norm_a * norm_b);
    if sim.is_finite() {
        sim.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// True when `v` has exactly `dimension` finite components.
pub fn is_valid_embedding(v: &[f32], dimension: usize) -> bool {
    v.len() == dimension && v.iter().all(|x| x.is_finite())
}

/// Embedding as it comes out of (or goes into) durable storage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredEmbedding {
    /// Native numeric array.
    Array(Vec<f32>),
    /// Bracketed, comma-separated text such as `"[0.5,-1,2e-3]"`.
    Text(String),
}

/// Which encoding new records are written with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingEncoding {
    #[default]
    Array,
    Text,
}

impl StoredEmbedding {
    /// Encode `v` for storage using `encoding`.
    pub fn encode(v: &[f32], encoding: EmbeddingEncoding) -> Self {
        match encoding {
            EmbeddingEncoding::Array => Self::Array(v.to_vec()),
            EmbeddingEncoding::Text => Self::Text(format_embedding(v)),
        }
    }
}

/// Parse a stored embedding into a validated vector.
///
/// # Errors
///
/// Returns `NoteError::Validation` for an empty vector, a malformed text
/// encoding or any non-finite component.
pub fn parse_embedding(stored: &StoredEmbedding) -> NoteResult<Vec<f32>> {
    let values = match stored {
        StoredEmbedding::Array(values) => values.clone(),
        StoredEmbedding::Text(text) => parse_embedding_text(text)?,
    };

    if values.is_empty() {
        return Err(NoteError::Validation("embedding is empty".to_string()));
    }
    if let Some(pos) = values.iter().position(|x| !x.is_finite()) {
        return Err(NoteError::Validation(format!(
            "embedding component {pos} is not finite"
        )));
    }
    Ok(values)
}

fn parse_embedding_text(text: &str) -> NoteResult<Vec<f32>> {
    let trimmed = text.trim();
    let inner = match (trimmed.strip_prefix('['), trimmed.ends_with(']')) {
        (Some(rest), true) => &rest[..rest.len() - 1],
        _ => {
            return Err(NoteError::Validation(format!(
                "embedding text must be bracketed: {}",
                preview(trimmed)
            )))
        }
    };

    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }

    inner
        .split(',')
        .enumerate()
        .map(|(i, token)| {
            token.trim().parse::<f32>().map_err(|e| {
                NoteError::Validation(format!(
                    "embedding component {i} ({:?}) is not a number: {e}",
                    token.trim()
                ))
            })
        })
        .collect()
}

/// Text encoding of an embedding. Uses the shortest round-trip float
/// representation, so `parse_embedding` recovers the exact values.
pub fn format_embedding(v: &[f32]) -> String {
    let parts: Vec<String> = v.iter().map(|x| x.to_string()).collect();
    format!("[{}]", parts.join(","))
}

fn preview(text: &str) -> String {
    if text.chars().count() <= 24 {
        text.to_string()
    } else {
        let head: String = text.chars().take(24).collect();
        format!("{head}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn identical_vectors_score_one() {
        let a = [0.3_f32, -1.2, 4.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn orthogonal_and_opposite() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 2.0], &[-1.0, -2.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn zero_vector_scores_zero() {
        assert_eq!(cosine_similarity(&[1.0, 2.0, 3.0], &[0.0, 0.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[0.0, 0.0]), 0.0);
    }

    #[test]
    fn near_zero_norm_scores_zero() {
        assert_eq!(cosine_similarity(&[1e-9, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn length_mismatch_scores_zero() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(dot(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn non_finite_input_never_yields_nan() {
        let s = cosine_similarity(&[f32::NAN, 1.0], &[1.0, 1.0]);
        assert_eq!(s, 0.0);
        let s = cosine_similarity(&[f32::INFINITY, 1.0], &[1.0, 1.0]);
        assert!(s.is_finite());
    }

    #[test]
    fn parses_both_encodings() {
        let arr = StoredEmbedding::Array(vec![0.5, -1.0, 2.0]);
        let txt = StoredEmbedding::Text(" [0.5, -1 ,2e0] ".to_string());
        assert_eq!(parse_embedding(&arr).unwrap(), vec![0.5, -1.0, 2.0]);
        assert_eq!(parse_embedding(&txt).unwrap(), vec![0.5, -1.0, 2.0]);
    }

    #[test]
    fn rejects_malformed_text() {
        for bad in ["0.1,0.2", "[0.1,abc]", "[]", "[0.1,,0.2]", "[NaN,1]", "[inf]"] {
            let err = parse_embedding(&StoredEmbedding::Text(bad.to_string()));
            assert!(
                matches!(err, Err(NoteError::Validation(_))),
                "expected validation error for {bad:?}"
            );
        }
    }

    #[test]
    fn untagged_serde_accepts_array_or_string() {
        let a: StoredEmbedding = serde_json::from_str("[1, 2.5]").unwrap();
        assert_eq!(a, StoredEmbedding::Array(vec![1.0, 2.5]));
        let t: StoredEmbedding = serde_json::from_str("\"[1,2.5]\"").unwrap();
        assert_eq!(t, StoredEmbedding::Text("[1,2.5]".to_string()));
    }

    #[test]
    fn validity_checks_dimension_and_finiteness() {
        assert!(is_valid_embedding(&[1.0, 2.0], 2));
        assert!(!is_valid_embedding(&[1.0, 2.0], 3));
        assert!(!is_valid_embedding(&[1.0, f32::NAN], 2));
    }

    proptest! {
        #[test]
        fn cosine_is_symmetric(
            pair in (1usize..32).prop_flat_map(|n| (
                prop::collection::vec(-100.0f32..100.0, n),
                prop::collection::vec(-100.0f32..100.0, n),
            ))
        ) {
            let (a, b) = pair;
            prop_assert_eq!(cosine_similarity(&a, &b), cosine_similarity(&b, &a));
        }

        #[test]
        fn cosine_stays_in_range(
            pair in (1usize..32).prop_flat_map(|n| (
                prop::collection::vec(-1e3f32..1e3, n),
                prop::collection::vec(-1e3f32..1e3, n),
            ))
        ) {
            let (a, b) = pair;
            let s = cosine_similarity(&a, &b);
            prop_assert!(s.is_finite());
            prop_assert!((-1.0..=1.0).contains(&s));
        }

        #[test]
        fn self_similarity_is_one(a in prop::collection::vec(0.5f32..10.0, 1..32)) {
            prop_assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-4);
        }

        #[test]
        fn text_encoding_round_trips(a in prop::collection::vec(-1e6f32..1e6, 1..64)) {
            let parsed = parse_embedding(&StoredEmbedding::Text(format_embedding(&a))).unwrap();
            prop_assert_eq!(parsed, a);
        }
    }
}
