//! Error taxonomy for indexing and retrieval.

use std::time::Duration;
use thiserror::Error;

/// Every failure the engine can surface, classified so callers can decide
/// whether to retry, rebuild, or report.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Video could not be decoded or produced no frames.
    #[error("invalid video {path}: {reason}")]
    InvalidVideo { path: String, reason: String },

    /// Sampling rate is not a positive finite number.
    #[error("invalid sampling rate {0}: fps must be > 0")]
    InvalidSamplingRate(f64),

    /// The embedding adapter rejected an input.
    #[error("embedding failed{}: {reason} (after {attempts} attempt(s))", frame_context(.frame_id))]
    Embedding {
        frame_id: Option<u64>,
        attempts: usize,
        reason: String,
    },

    #[error("embedding of batch {batch} timed out after {timeout:?}")]
    EmbeddingTimeout { batch: usize, timeout: Duration },

    #[error("no frame decoded within {0:?}")]
    DecodeTimeout(Duration),

    /// Zero-norm or non-finite vector. `position` is the offset inside the batch.
    #[error("degenerate vector at batch position {position}{}", frame_context(.frame_id))]
    DegenerateVector {
        position: usize,
        frame_id: Option<u64>,
    },

    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("index is empty")]
    EmptyIndex,

    #[error("index not ready: build or load an index first")]
    IndexNotReady,

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Vectors and frames handed to an append do not line up.
    #[error("invalid batch: {0}")]
    InvalidBatch(String),

    #[error("frame {0} not found")]
    NotFound(u64),

    #[error("corrupt index: {0}")]
    CorruptIndex(String),

    #[error("a build is already in progress")]
    BuildInProgress,

    #[error("build cancelled after committing {committed} frame(s)")]
    Cancelled { committed: usize },

    #[error("frame store error: {0}")]
    FrameStore(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn frame_context(frame_id: &Option<u64>) -> String {
    match frame_id {
        Some(id) => format!(" for frame {}", id),
        None => String::new(),
    }
}

impl IndexError {
    /// Whether repeating the same call may succeed without any change on
    /// the caller's side.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IndexError::Embedding { .. }
                | IndexError::EmbeddingTimeout { .. }
                | IndexError::DecodeTimeout(_)
                | IndexError::BuildInProgress
        )
    }
}

pub type Result<T> = std::result::Result<T, IndexError>;
