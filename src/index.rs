//! Frame index: vector storage and frame metadata kept in lockstep.

use tracing::warn;

use crate::error::{IndexError, Result};
use crate::metadata::MetadataStore;
use crate::search;
use crate::storage::VectorStorage;
use crate::types::{Frame, SearchResult};

/// What to do with a zero-norm embedding inside a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DegeneratePolicy {
    /// Reject the whole batch
    #[default]
    Reject,
    /// Drop the offending frame, keep the rest of the batch
    Skip,
}

/// Result of a successful append
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppendOutcome {
    /// Position assigned to the first appended frame
    pub start: u64,
    /// Number of frames appended
    pub appended: usize,
    /// Frame ids dropped under `DegeneratePolicy::Skip`
    pub skipped: Vec<u64>,
}

/// Owns one `VectorStorage` and one `MetadataStore`; `vectors.count() ==
/// metadata.count()` holds between every public call.
#[derive(Debug)]
pub struct FrameIndex {
    pub(crate) vectors: VectorStorage,
    pub(crate) metadata: MetadataStore,
}

impl FrameIndex {
    pub fn new(dimension: usize) -> Result<Self> {
        Ok(Self {
            vectors: VectorStorage::new(dimension)?,
            metadata: MetadataStore::new(),
        })
    }

    pub(crate) fn from_parts(vectors: VectorStorage, metadata: MetadataStore) -> Result<Self> {
        if vectors.count() != metadata.count() {
            return Err(IndexError::CorruptIndex(format!(
                "{} vectors but {} metadata records",
                vectors.count(),
                metadata.count()
            )));
        }
        Ok(Self { vectors, metadata })
    }

    pub fn dimension(&self) -> usize {
        self.vectors.dimension()
    }

    pub fn count(&self) -> usize {
        self.vectors.count()
    }

    /// Ready once at least one frame has been committed
    pub fn is_ready(&self) -> bool {
        self.count() > 0
    }

    /// Frame stored at `position`
    pub fn frame(&self, position: u64) -> Result<&Frame> {
        self.metadata.get(position)
    }

    /// Normalized vector stored at `position`
    pub fn vector(&self, position: u64) -> Option<&[f32]> {
        self.vectors.get(position)
    }

    pub fn frames(&self) -> impl Iterator<Item = &Frame> {
        self.metadata.iter()
    }

    pub fn position_of(&self, frame_id: u64) -> Option<u64> {
        self.metadata.position_of(frame_id)
    }

    /// Append a batch of frames with their raw embeddings.
    ///
    /// The batch is validated and normalized before anything is written, so
    /// either every (surviving) frame is appended to both stores or neither
    /// store changes. Frame ids must be strictly increasing and greater
    /// than the last stored id.
    pub fn append(
        &mut self,
        frames: Vec<Frame>,
        vectors: &[Vec<f32>],
        policy: DegeneratePolicy,
    ) -> Result<AppendOutcome> {
        if frames.len() != vectors.len() {
            return Err(IndexError::InvalidBatch(format!(
                "{} frames but {} vectors",
                frames.len(),
                vectors.len()
            )));
        }
        self.check_order(&frames)?;

        let (frames, flat, skipped) = match self.vectors.prepare(vectors) {
            Ok(flat) => (frames, flat, Vec::new()),
            Err(IndexError::DegenerateVector { position, .. })
                if policy == DegeneratePolicy::Reject =>
            {
                return Err(IndexError::DegenerateVector {
                    position,
                    frame_id: Some(frames[position].id),
                });
            }
            Err(IndexError::DegenerateVector { .. }) => self.prepare_skipping(frames, vectors)?,
            Err(e) => return Err(e),
        };

        let appended = frames.len();
        let start = self.vectors.commit(flat);
        let meta_start = self.metadata.add(frames);
        debug_assert_eq!(start, meta_start);

        Ok(AppendOutcome {
            start,
            appended,
            skipped,
        })
    }

    fn prepare_skipping(
        &self,
        frames: Vec<Frame>,
        vectors: &[Vec<f32>],
    ) -> Result<(Vec<Frame>, Vec<f32>, Vec<u64>)> {
        let mut kept_frames = Vec::with_capacity(frames.len());
        let mut kept_vectors = Vec::with_capacity(vectors.len());
        let mut skipped = Vec::new();

        for (frame, vector) in frames.into_iter().zip(vectors) {
            if search::normalize(vector).is_err() {
                warn!(frame_id = frame.id, "skipping frame with degenerate embedding");
                skipped.push(frame.id);
                continue;
            }
            kept_frames.push(frame);
            kept_vectors.push(vector.clone());
        }

        let flat = self.vectors.prepare(&kept_vectors)?;
        Ok((kept_frames, flat, skipped))
    }

    fn check_order(&self, frames: &[Frame]) -> Result<()> {
        let mut last = self.metadata.last().map(|f| f.id);
        for frame in frames {
            if let Some(prev) = last {
                if frame.id <= prev {
                    return Err(IndexError::InvalidBatch(format!(
                        "frame id {} is not greater than preceding id {}",
                        frame.id, prev
                    )));
                }
            }
            last = Some(frame.id);
        }
        Ok(())
    }

    /// Rank stored frames against a raw query embedding.
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchResult>> {
        if top_k == 0 {
            return Err(IndexError::InvalidQuery("top_k must be >= 1".to_string()));
        }
        let hits = self.vectors.search(query, top_k)?;
        self.join(hits)
    }

    /// Rank other frames by similarity to the frame stored at `position`.
    pub fn similar_to(&self, position: u64, top_k: usize) -> Result<Vec<SearchResult>> {
        if top_k == 0 {
            return Err(IndexError::InvalidQuery("top_k must be >= 1".to_string()));
        }
        let query = self.vectors.get(position).ok_or(IndexError::NotFound(position))?;
        let hits = search::search_flat_excluding(&self.vectors, query, top_k, Some(position))?;
        self.join(hits)
    }

    fn join(&self, hits: Vec<(u64, f32)>) -> Result<Vec<SearchResult>> {
        hits.into_iter()
            .enumerate()
            .map(|(i, (position, score))| {
                Ok(SearchResult {
                    rank: i + 1,
                    score,
                    frame: self.metadata.get(position)?.clone(),
                })
            })
            .collect()
    }

    /// Drop every frame, keeping the dimension
    pub fn clear(&mut self) {
        self.vectors.clear();
        self.metadata.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::l2_norm;

    fn frames(ids: std::ops::Range<u64>) -> Vec<Frame> {
        ids.map(|i| Frame::new(i, i as f64, format!("frames/frame_{:05}.jpg", i)))
            .collect()
    }

    fn axis(dim: usize, i: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[i % dim] = 2.0;
        v
    }

    #[test]
    fn test_append_keeps_alignment() {
        let mut index = FrameIndex::new(4).unwrap();
        let outcome = index
            .append(frames(0..3), &[axis(4, 0), axis(4, 1), axis(4, 2)], DegeneratePolicy::Reject)
            .unwrap();
        assert_eq!(outcome.start, 0);
        assert_eq!(outcome.appended, 3);
        assert_eq!(index.count(), 3);
        assert_eq!(index.metadata.count(), index.vectors.count());
        assert!(index.is_ready());

        for position in 0..3 {
            assert!((l2_norm(index.vector(position).unwrap()) - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_degenerate_batch_rejected() {
        let mut index = FrameIndex::new(2).unwrap();
        index.append(frames(0..1), &[vec![1.0, 0.0]], DegeneratePolicy::Reject).unwrap();

        let err = index
            .append(frames(1..3), &[vec![0.0, 1.0], vec![0.0, 0.0]], DegeneratePolicy::Reject)
            .unwrap_err();
        assert!(matches!(
            err,
            IndexError::DegenerateVector { position: 1, frame_id: Some(2) }
        ));
        assert_eq!(index.count(), 1);
        assert_eq!(index.metadata.count(), 1);
    }

    #[test]
    fn test_degenerate_skip_policy() {
        let mut index = FrameIndex::new(2).unwrap();
        let outcome = index
            .append(
                frames(0..3),
                &[vec![1.0, 0.0], vec![0.0, 0.0], vec![0.0, 1.0]],
                DegeneratePolicy::Skip,
            )
            .unwrap();
        assert_eq!(outcome.appended, 2);
        assert_eq!(outcome.skipped, vec![1]);
        assert_eq!(index.frame(1).unwrap().id, 2);
        assert_eq!(index.metadata.count(), index.vectors.count());
    }

    #[test]
    fn test_mismatched_batch_rejected() {
        let mut index = FrameIndex::new(2).unwrap();
        let err = index
            .append(frames(0..2), &[vec![1.0, 0.0]], DegeneratePolicy::Reject)
            .unwrap_err();
        assert!(matches!(err, IndexError::InvalidBatch(_)));

        index.append(frames(0..1), &[vec![1.0, 0.0]], DegeneratePolicy::Reject).unwrap();
        let err = index
            .append(frames(0..1), &[vec![1.0, 0.0]], DegeneratePolicy::Reject)
            .unwrap_err();
        assert!(matches!(err, IndexError::InvalidBatch(_)));
        assert_eq!(index.count(), 1);
    }

    #[test]
    fn test_search_ranks_from_one() {
        let mut index = FrameIndex::new(3).unwrap();
        index
            .append(
                frames(0..4),
                &[axis(3, 0), axis(3, 1), axis(3, 0), axis(3, 2)],
                DegeneratePolicy::Reject,
            )
            .unwrap();

        let results = index.search(&[5.0, 0.0, 0.0], 10).unwrap();
        assert_eq!(results.len(), 4);
        assert_eq!(results[0].rank, 1);
        assert_eq!(results[0].frame.id, 0);
        assert_eq!(results[1].frame.id, 2);
        assert!((results[0].score - 1.0).abs() < 1e-5);
        assert_eq!(results.last().map(|r| r.rank), Some(4));
    }

    #[test]
    fn test_search_requires_frames_and_positive_k() {
        let mut index = FrameIndex::new(3).unwrap();
        assert!(matches!(index.search(&[1.0, 0.0, 0.0], 1), Err(IndexError::EmptyIndex)));

        index.append(frames(0..1), &[axis(3, 0)], DegeneratePolicy::Reject).unwrap();
        assert!(matches!(index.search(&[1.0, 0.0, 0.0], 0), Err(IndexError::InvalidQuery(_))));
    }

    #[test]
    fn test_similar_to_excludes_self() {
        let mut index = FrameIndex::new(3).unwrap();
        index
            .append(frames(0..3), &[axis(3, 0), axis(3, 1), axis(3, 0)], DegeneratePolicy::Reject)
            .unwrap();

        let results = index.similar_to(0, 5).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].frame.id, 2);
        assert!(matches!(index.similar_to(9, 1), Err(IndexError::NotFound(9))));
        let far = (usize::MAX / 3) as u64;
        assert!(index.vector(far).is_none());
        assert!(matches!(index.similar_to(far, 1), Err(IndexError::NotFound(_))));
        assert!(matches!(index.similar_to(u64::MAX, 1), Err(IndexError::NotFound(_))));
    }
}
