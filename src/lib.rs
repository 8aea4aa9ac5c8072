//! # vidsearch - Natural-Language Video Search Core
//!
//! Find moments in a video by describing them:
//! - Sample frames at a fixed rate and persist their images
//! - Embed frames and queries into one shared vector space
//! - Exact top-k cosine search over unit-norm vectors
//! - Save and load the index as a single validated file
//!
//! ## Architecture
//! - `FrameSampler` -> `Embedder` -> `FrameIndex::append` at build time
//! - query text -> `Embedder` -> `FrameIndex::search` -> ranked frames
//! - `VideoSearchEngine` owns the index and enforces one build at a time
//!   while searches read batch-consistent snapshots
//!
//! The embedding model, video decoder and frame image storage are supplied
//! by the host through the [`Embedder`], [`VideoDecoder`] and
//! [`FrameStore`] traits.

pub mod config;
pub mod embed;
pub mod engine;
pub mod error;
pub mod index;
mod metadata;
mod persist;
pub mod query;
pub mod sampler;
pub mod search;
mod storage;
pub mod types;

#[cfg(feature = "pyo3")]
pub mod python_bindings;

pub use config::EngineConfig;
pub use embed::Embedder;
pub use engine::{CancelToken, VideoSearchEngine};
pub use error::{IndexError, Result};
pub use index::{AppendOutcome, DegeneratePolicy, FrameIndex};
pub use metadata::MetadataStore;
pub use query::{QueryPipeline, SearchHit, SearchResponse};
pub use sampler::{
    DecodedVideo, DirFrameStore, FrameSampler, FrameStore, MemoryFrameStore, SampledFrame,
    SampledFrames, SamplingPlan, VideoDecoder,
};
pub use storage::VectorStorage;
pub use types::{BuildReport, Frame, IndexHeader, IndexStatus, SearchResult};
