//! Core type definitions for vidsearch

use serde::{Deserialize, Serialize};

/// A sampled video frame. Immutable once the sampler emits it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Emission order from the sampler (0-based)
    pub id: u64,
    /// Position in the source video, in seconds
    pub timestamp_sec: f64,
    /// `timestamp_sec` rounded to milliseconds
    pub timestamp_ms: u64,
    /// Where the frame image was persisted by the frame store
    pub source_path: String,
}

impl Frame {
    /// Create a frame, deriving `timestamp_ms` from `timestamp_sec`
    pub fn new(id: u64, timestamp_sec: f64, source_path: impl Into<String>) -> Self {
        Self {
            id,
            timestamp_sec,
            timestamp_ms: (timestamp_sec * 1000.0).round() as u64,
            source_path: source_path.into(),
        }
    }
}

/// A ranked hit returned by a search
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    /// 1-based position in the result list
    pub rank: usize,
    /// Cosine similarity in [-1, 1], higher is more similar
    pub score: f32,
    pub frame: Frame,
}

/// Outcome of a completed build
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    /// Frames committed to the index
    pub frame_count: usize,
    /// Batches committed
    pub batches: usize,
    /// Frame ids dropped by the skip-degenerate policy
    pub skipped: Vec<u64>,
}

/// Snapshot of an engine's readiness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexStatus {
    pub ready: bool,
    pub frame_count: usize,
    pub dimension: usize,
    pub building: bool,
}

/// Fixed-size header at the start of a persisted index file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexHeader {
    /// Magic bytes for validation
    pub magic: [u8; 4],
    /// Format version
    pub version: u16,
    /// Reserved for future use
    pub reserved: u16,
    /// Length of every stored vector
    pub dimension: u32,
    /// Number of stored vectors (and metadata records)
    pub count: u32,
}

impl IndexHeader {
    pub const MAGIC: [u8; 4] = *b"SVID";
    pub const VERSION: u16 = 1;
    pub const SIZE: usize = 16;

    pub fn new(dimension: u32, count: u32) -> Self {
        Self {
            magic: Self::MAGIC,
            version: Self::VERSION,
            reserved: 0,
            dimension,
            count,
        }
    }

    /// Little-endian encoding
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..4].copy_from_slice(&self.magic);
        out[4..6].copy_from_slice(&self.version.to_le_bytes());
        out[6..8].copy_from_slice(&self.reserved.to_le_bytes());
        out[8..12].copy_from_slice(&self.dimension.to_le_bytes());
        out[12..16].copy_from_slice(&self.count.to_le_bytes());
        out
    }

    /// Decode without validating magic or version. Returns `None` if
    /// `bytes` is shorter than the header.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        Some(Self {
            magic,
            version: u16::from_le_bytes([bytes[4], bytes[5]]),
            reserved: u16::from_le_bytes([bytes[6], bytes[7]]),
            dimension: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            count: u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]),
        })
    }
}
