//! Query pipeline: text in, ranked timestamps out.
//!
//! Validates the request before any embedding call, optionally reuses
//! cached query embeddings, and shapes results for the transport layer.

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::engine::VideoSearchEngine;
use crate::error::{IndexError, Result};
use crate::types::SearchResult;

/// One ranked frame in a response
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub rank: usize,
    pub score: f32,
    pub timestamp_sec: f64,
    pub timestamp_ms: u64,
    pub frame_id: u64,
    pub source_path: String,
}

impl From<SearchResult> for SearchHit {
    fn from(result: SearchResult) -> Self {
        Self {
            rank: result.rank,
            score: result.score,
            timestamp_sec: result.frame.timestamp_sec,
            timestamp_ms: result.frame.timestamp_ms,
            frame_id: result.frame.id,
            source_path: result.frame.source_path,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchHit>,
}

pub struct QueryPipeline {
    engine: Arc<VideoSearchEngine>,
    /// Query text -> raw embedding
    cache: Option<Mutex<LruCache<String, Arc<Vec<f32>>>>>,
    /// Loaded once on the first query against an empty engine
    fallback_index: Option<PathBuf>,
    fallback_tried: AtomicBool,
}

impl QueryPipeline {
    /// `cache_capacity == 0` disables the embedding cache.
    pub fn new(engine: Arc<VideoSearchEngine>, cache_capacity: usize) -> Self {
        let cache = NonZeroUsize::new(cache_capacity).map(|cap| Mutex::new(LruCache::new(cap)));
        Self {
            engine,
            cache,
            fallback_index: None,
            fallback_tried: AtomicBool::new(false),
        }
    }

    /// Pipeline configured from the engine's own config
    pub fn from_engine(engine: Arc<VideoSearchEngine>) -> Self {
        let capacity = engine.config().query_cache_capacity;
        let index_path = engine.config().index_path.clone();
        Self::new(engine, capacity).with_fallback_index(index_path)
    }

    /// Try loading `path` the first time a query finds the engine empty.
    pub fn with_fallback_index(mut self, path: impl Into<PathBuf>) -> Self {
        self.fallback_index = Some(path.into());
        self
    }

    pub fn engine(&self) -> &Arc<VideoSearchEngine> {
        &self.engine
    }

    /// Search with the engine's default `top_k`
    pub fn search_default(&self, query: &str) -> Result<SearchResponse> {
        self.search(query, self.engine.config().default_top_k)
    }

    pub fn search(&self, query: &str, top_k: usize) -> Result<SearchResponse> {
        if query.trim().is_empty() {
            return Err(IndexError::InvalidQuery("query text is empty".to_string()));
        }
        if top_k == 0 {
            return Err(IndexError::InvalidQuery("top_k must be >= 1".to_string()));
        }
        self.ensure_ready()?;

        let embedding = self.query_embedding(query)?;
        let results = self.engine.search_embedding(&embedding, top_k)?;

        Ok(SearchResponse {
            query: query.to_string(),
            results: results.into_iter().map(SearchHit::from).collect(),
        })
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.engine.is_ready() {
            return Ok(());
        }
        let Some(path) = &self.fallback_index else {
            return Err(IndexError::IndexNotReady);
        };
        if self.fallback_tried.swap(true, Ordering::AcqRel) {
            return Err(IndexError::IndexNotReady);
        }
        match self.engine.load(path) {
            Ok(count) if count > 0 => {
                info!(path = %path.display(), frames = count, "loaded saved index for query");
                Ok(())
            }
            Ok(_) => Err(IndexError::IndexNotReady),
            Err(IndexError::BuildInProgress) => {
                // Try again once the running build is over
                self.fallback_tried.store(false, Ordering::Release);
                Err(IndexError::IndexNotReady)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "no usable saved index");
                Err(IndexError::IndexNotReady)
            }
        }
    }

    fn query_embedding(&self, query: &str) -> Result<Arc<Vec<f32>>> {
        let Some(cache) = &self.cache else {
            return Ok(Arc::new(self.engine.embed_query(query)?));
        };

        if let Some(hit) = cache.lock().get(query) {
            debug!(query, "query embedding cache hit");
            return Ok(Arc::clone(hit));
        }
        // Embed outside the lock; a concurrent miss on the same text just
        // computes the same vector twice
        let embedding = Arc::new(self.engine.embed_query(query)?);
        cache.lock().put(query.to_string(), Arc::clone(&embedding));
        Ok(embedding)
    }

    pub fn cached_queries(&self) -> usize {
        self.cache.as_ref().map(|c| c.lock().len()).unwrap_or(0)
    }
}
