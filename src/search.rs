//! Exact k-NN search using cosine similarity
//!
//! Stored vectors are unit-norm, so the inner product is the cosine
//! similarity. Scoring is parallelized across the flat vector block.

use rayon::prelude::*;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::error::{IndexError, Result};
use crate::storage::VectorStorage;

/// Compute dot product of two f32 vectors
#[inline]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Compute L2 norm (magnitude) of a vector
#[inline]
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Scale `v` to unit length.
///
/// Fails with `DegenerateVector` (position 0) if the vector is all zeros or
/// contains a non-finite component; callers re-tag the position.
pub fn normalize(v: &[f32]) -> Result<Vec<f32>> {
    let norm = l2_norm(v);
    if norm == 0.0 || !norm.is_finite() {
        return Err(IndexError::DegenerateVector {
            position: 0,
            frame_id: None,
        });
    }
    Ok(v.iter().map(|x| x / norm).collect())
}

/// Compute cosine similarity between two vectors
/// Returns value in [-1, 1] where 1 is identical, 0 is orthogonal, -1 is opposite
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot = dot_product(a, b);
    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Search candidate ordered by rank: `Less` means ranked earlier
/// (higher score, then lower id).
#[derive(Debug, Clone, Copy)]
struct SearchCandidate {
    id: u64,
    score: f32,
}

impl Eq for SearchCandidate {}

impl PartialEq for SearchCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl PartialOrd for SearchCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SearchCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        // The heap's max is the worst-ranked candidate, so popping evicts it
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Exhaustive top-k search over every stored vector.
///
/// `query` must already be unit-norm and of the storage's dimension.
/// Returns up to `k` `(id, score)` pairs, best first; equal scores are
/// ordered by ascending id. `k` larger than the store returns everything.
pub fn search_flat(storage: &VectorStorage, query: &[f32], k: usize) -> Result<Vec<(u64, f32)>> {
    search_flat_excluding(storage, query, k, None)
}

/// Same as [`search_flat`] but never returns `exclude`.
pub fn search_flat_excluding(
    storage: &VectorStorage,
    query: &[f32],
    k: usize,
    exclude: Option<u64>,
) -> Result<Vec<(u64, f32)>> {
    if storage.count() == 0 {
        return Err(IndexError::EmptyIndex);
    }
    if query.len() != storage.dimension() {
        return Err(IndexError::DimensionMismatch {
            expected: storage.dimension(),
            got: query.len(),
        });
    }
    if k == 0 {
        return Ok(Vec::new());
    }

    let actual_k = k.min(storage.count());

    // Parallel similarity computation using rayon
    let similarities: Vec<SearchCandidate> = storage
        .as_slice()
        .par_chunks_exact(storage.dimension())
        .enumerate()
        .filter(|(id, _)| Some(*id as u64) != exclude)
        .map(|(id, vector)| SearchCandidate {
            id: id as u64,
            score: dot_product(query, vector).clamp(-1.0, 1.0),
        })
        .collect();

    // Bounded heap keeps the best `actual_k`
    let mut heap = BinaryHeap::with_capacity(actual_k + 1);
    for candidate in similarities {
        heap.push(candidate);
        if heap.len() > actual_k {
            heap.pop();
        }
    }

    Ok(heap
        .into_sorted_vec()
        .into_iter()
        .map(|candidate| (candidate.id, candidate.score))
        .collect())
}
