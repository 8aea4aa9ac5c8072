//! Flat vector storage module
//!
//! Holds unit-norm embeddings row-major in one contiguous block, in
//! insertion order. Position `i` is the vector's id.

use crate::error::{IndexError, Result};
use crate::search;

#[derive(Debug)]
pub struct VectorStorage {
    dimension: usize,
    data: Vec<f32>,
}

impl VectorStorage {
    /// Create empty storage for vectors of `dimension` floats
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(IndexError::InvalidConfig(
                "vector dimension must be > 0".to_string(),
            ));
        }
        Ok(Self {
            dimension,
            data: Vec::new(),
        })
    }

    /// Wrap an already-normalized flat block (used by load).
    ///
    /// The caller is responsible for the unit-norm check.
    pub(crate) fn from_normalized(dimension: usize, data: Vec<f32>) -> Result<Self> {
        let mut storage = Self::new(dimension)?;
        if data.len() % dimension != 0 {
            return Err(IndexError::CorruptIndex(format!(
                "vector block of {} floats is not a multiple of dimension {}",
                data.len(),
                dimension
            )));
        }
        storage.data = data;
        Ok(storage)
    }

    /// Normalize a batch without touching the store.
    ///
    /// Returns the flat normalized block ready for [`commit`](Self::commit).
    pub fn prepare(&self, vectors: &[Vec<f32>]) -> Result<Vec<f32>> {
        let mut flat = Vec::with_capacity(vectors.len() * self.dimension);
        for (position, vector) in vectors.iter().enumerate() {
            if vector.len() != self.dimension {
                return Err(IndexError::DimensionMismatch {
                    expected: self.dimension,
                    got: vector.len(),
                });
            }
            let normalized = search::normalize(vector).map_err(|_| IndexError::DegenerateVector {
                position,
                frame_id: None,
            })?;
            flat.extend_from_slice(&normalized);
        }
        Ok(flat)
    }

    /// Append a block produced by [`prepare`](Self::prepare). Returns the
    /// id assigned to its first vector.
    pub fn commit(&mut self, flat: Vec<f32>) -> u64 {
        debug_assert_eq!(flat.len() % self.dimension, 0);
        let start = self.count() as u64;
        self.data.extend(flat);
        start
    }

    /// Normalize and append a batch of vectors.
    ///
    /// All-or-nothing: if any vector is rejected the store is unchanged.
    /// Returns the id of the first appended vector (the previous count).
    pub fn add(&mut self, vectors: &[Vec<f32>]) -> Result<u64> {
        let flat = self.prepare(vectors)?;
        Ok(self.commit(flat))
    }

    /// Get the number of vectors stored
    pub fn count(&self) -> usize {
        self.data.len() / self.dimension
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get a reference to a specific vector by index
    pub fn get(&self, index: u64) -> Option<&[f32]> {
        let start = usize::try_from(index).ok()?.checked_mul(self.dimension)?;
        let end = start.checked_add(self.dimension)?;
        self.data.get(start..end)
    }

    /// The whole row-major block
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Iterate over all vectors
    pub fn iter(&self) -> VectorIterator<'_> {
        VectorIterator {
            storage: self,
            index: 0,
        }
    }

    /// Nearest vectors to `query` (normalized here first)
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(u64, f32)>> {
        if self.is_empty() {
            return Err(IndexError::EmptyIndex);
        }
        let query = search::normalize(query)?;
        search::search_flat(self, &query, k)
    }

    pub(crate) fn clear(&mut self) {
        self.data.clear();
    }
}

/// Iterator over vectors in storage
pub struct VectorIterator<'a> {
    storage: &'a VectorStorage,
    index: u64,
}

impl<'a> Iterator for VectorIterator<'a> {
    type Item = (u64, &'a [f32]);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.index;
        let vector = self.storage.get(id)?;
        self.index += 1;
        Some((id, vector))
    }
}
