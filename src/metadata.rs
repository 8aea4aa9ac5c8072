//! Per-frame metadata, aligned by position with `VectorStorage`.

use crate::error::{IndexError, Result};
use crate::types::Frame;

#[derive(Debug, Default, Clone)]
pub struct MetadataStore {
    frames: Vec<Frame>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_frames(frames: Vec<Frame>) -> Self {
        Self { frames }
    }

    /// Append frames; returns the position of the first one.
    ///
    /// Only called by `FrameIndex` together with the matching vector append.
    pub fn add(&mut self, frames: Vec<Frame>) -> u64 {
        let start = self.frames.len() as u64;
        self.frames.extend(frames);
        start
    }

    pub fn get(&self, id: u64) -> Result<&Frame> {
        self.frames.get(id as usize).ok_or(IndexError::NotFound(id))
    }

    pub fn count(&self) -> usize {
        self.frames.len()
    }

    pub fn last(&self) -> Option<&Frame> {
        self.frames.last()
    }

    /// Position of the frame with sampler id `frame_id`
    pub fn position_of(&self, frame_id: u64) -> Option<u64> {
        // ids are strictly increasing with position
        self.frames
            .binary_search_by_key(&frame_id, |f| f.id)
            .ok()
            .map(|p| p as u64)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter()
    }

    pub(crate) fn clear(&mut self) {
        self.frames.clear();
    }
}
