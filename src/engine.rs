//! Index handle with build/search orchestration
//!
//! One [`VideoSearchEngine`] owns one [`FrameIndex`]. Builds are exclusive:
//! a second concurrent build is rejected immediately. A build embeds each
//! batch without holding the index lock and takes the write lock only to
//! commit the batch, so searches always see a batch-boundary snapshot.

use image::RgbImage;
use parking_lot::RwLock;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::embed::{self, Embedder};
use crate::error::{IndexError, Result};
use crate::index::FrameIndex;
use crate::sampler::{FrameSampler, FrameStore, SampledFrame, VideoDecoder};
use crate::types::{BuildReport, Frame, IndexStatus, SearchResult};

/// Frames buffered between the decoding thread and the build loop, in batches
const PRODUCER_BACKLOG_BATCHES: usize = 2;

/// Cooperative cancellation flag for a running build. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Clears the building flag when the build ends, however it ends
struct BuildGuard<'a>(&'a AtomicBool);

impl<'a> BuildGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| IndexError::BuildInProgress)?;
        Ok(Self(flag))
    }
}

impl Drop for BuildGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct VideoSearchEngine {
    index: RwLock<FrameIndex>,
    building: AtomicBool,
    embedder: Arc<dyn Embedder>,
    decoder: Arc<dyn VideoDecoder>,
    frame_store: Arc<dyn FrameStore>,
    pool: Arc<rayon::ThreadPool>,
    config: EngineConfig,
}

impl VideoSearchEngine {
    /// Create an engine with an empty index sized to the embedder.
    pub fn new(
        embedder: Arc<dyn Embedder>,
        decoder: Arc<dyn VideoDecoder>,
        frame_store: Arc<dyn FrameStore>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        let index = FrameIndex::new(embedder.dimension())?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.embed_workers)
            .thread_name(|i| format!("vidsearch-embed-{}", i))
            .build()
            .map_err(|e| IndexError::InvalidConfig(format!("embedding pool: {}", e)))?;

        Ok(Self {
            index: RwLock::new(index),
            building: AtomicBool::new(false),
            embedder,
            decoder,
            frame_store,
            pool: Arc::new(pool),
            config,
        })
    }

    /// Create an engine and load a saved index into it.
    pub fn open(
        embedder: Arc<dyn Embedder>,
        decoder: Arc<dyn VideoDecoder>,
        frame_store: Arc<dyn FrameStore>,
        config: EngineConfig,
        index_path: impl AsRef<Path>,
    ) -> Result<Self> {
        let engine = Self::new(embedder, decoder, frame_store, config)?;
        engine.load(index_path)?;
        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn dimension(&self) -> usize {
        self.embedder.dimension()
    }

    pub fn frame_count(&self) -> usize {
        self.index.read().count()
    }

    pub fn is_ready(&self) -> bool {
        self.index.read().is_ready()
    }

    pub fn is_building(&self) -> bool {
        self.building.load(Ordering::Acquire)
    }

    pub fn status(&self) -> IndexStatus {
        let index = self.index.read();
        IndexStatus {
            ready: index.is_ready(),
            frame_count: index.count(),
            dimension: index.dimension(),
            building: self.is_building(),
        }
    }

    /// Sample, embed and index `video_path`, replacing the current contents.
    pub fn build_index(&self, video_path: impl AsRef<Path>, fps: f64) -> Result<BuildReport> {
        self.build_index_with_cancel(video_path, fps, &CancelToken::new())
    }

    /// Like [`build_index`](Self::build_index), checking `cancel` before
    /// each batch.
    ///
    /// The previous contents are dropped together with the first committed
    /// batch, so a video that yields no frames leaves the old index in
    /// place. When a later batch fails, batches already committed remain
    /// searchable and the error is returned.
    pub fn build_index_with_cancel(
        &self,
        video_path: impl AsRef<Path>,
        fps: f64,
        cancel: &CancelToken,
    ) -> Result<BuildReport> {
        let _guard = BuildGuard::acquire(&self.building)?;
        let video_path = video_path.as_ref();
        let sampler =
            FrameSampler::new(Arc::clone(&self.decoder), Arc::clone(&self.frame_store), fps)?;

        let started = Instant::now();
        info!(video = %video_path.display(), fps, "building index");

        let rx = self.spawn_sampler(sampler, video_path);
        let mut report = BuildReport::default();
        let mut pending: Vec<SampledFrame> = Vec::with_capacity(self.config.batch_size);

        loop {
            let exhausted = match rx.recv_timeout(self.config.decode_timeout) {
                Ok(Ok(sampled)) => {
                    pending.push(sampled);
                    false
                }
                Ok(Err(e)) => return Err(e),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(IndexError::DecodeTimeout(self.config.decode_timeout))
                }
                Err(RecvTimeoutError::Disconnected) => true,
            };

            if pending.len() == self.config.batch_size || (exhausted && !pending.is_empty()) {
                if cancel.is_cancelled() {
                    info!(committed = report.frame_count, "build cancelled");
                    return Err(IndexError::Cancelled {
                        committed: report.frame_count,
                    });
                }
                let batch = std::mem::take(&mut pending);
                self.commit_batch(batch, &mut report)?;
            }

            if exhausted {
                break;
            }
        }

        info!(
            frames = report.frame_count,
            batches = report.batches,
            skipped = report.skipped.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "index built"
        );
        Ok(report)
    }

    /// Decode and sample on a separate thread so the build loop can bound
    /// each wait.
    fn spawn_sampler(
        &self,
        sampler: FrameSampler,
        video_path: &Path,
    ) -> mpsc::Receiver<Result<SampledFrame>> {
        let (tx, rx) = mpsc::sync_channel(self.config.batch_size * PRODUCER_BACKLOG_BATCHES);
        let path = video_path.to_path_buf();
        std::thread::spawn(move || {
            let frames = match sampler.sample(&path) {
                Ok(frames) => frames,
                Err(e) => {
                    let _ = tx.send(Err(e));
                    return;
                }
            };
            for item in frames {
                // Receiver gone: the build ended early
                if tx.send(item).is_err() {
                    break;
                }
            }
        });
        rx
    }

    fn commit_batch(&self, batch: Vec<SampledFrame>, report: &mut BuildReport) -> Result<()> {
        let batch_no = report.batches;
        let (frames, images): (Vec<Frame>, Vec<RgbImage>) =
            batch.into_iter().map(|s| (s.frame, s.image)).unzip();
        let frame_ids: Vec<u64> = frames.iter().map(|f| f.id).collect();
        let images = Arc::new(images);

        let vectors = self.embed_batch_with_retry(&images, &frame_ids, batch_no)?;
        drop(images);

        let outcome = {
            let mut index = self.index.write();
            // First batch of this build replaces whatever was indexed before
            if batch_no == 0 {
                let mut fresh = FrameIndex::new(index.dimension())?;
                let outcome = fresh.append(frames, &vectors, self.config.degenerate_policy())?;
                *index = fresh;
                outcome
            } else {
                index.append(frames, &vectors, self.config.degenerate_policy())?
            }
        };

        report.batches += 1;
        report.frame_count += outcome.appended;
        report.skipped.extend(outcome.skipped);
        debug!(
            batch = batch_no,
            start = outcome.start,
            appended = outcome.appended,
            "committed batch"
        );
        Ok(())
    }

    fn embed_batch_with_retry(
        &self,
        images: &Arc<Vec<RgbImage>>,
        frame_ids: &[u64],
        batch_no: usize,
    ) -> Result<Vec<Vec<f32>>> {
        let attempts = self.config.embed_retries + 1;
        let mut attempt = 1;
        loop {
            let result = embed::embed_images(
                &self.embedder,
                &self.pool,
                images,
                frame_ids,
                batch_no,
                self.config.embed_timeout,
            );
            match result {
                Ok(vectors) => return Ok(vectors),
                // Only adapter failures are retried; a timed-out attempt may
                // still occupy pool workers
                Err(e @ IndexError::Embedding { .. }) if attempt < attempts => {
                    warn!(
                        batch = batch_no,
                        attempt,
                        error = %e,
                        "embedding failed, retrying batch"
                    );
                    attempt += 1;
                }
                Err(IndexError::Embedding { frame_id, reason, .. }) => {
                    return Err(IndexError::Embedding {
                        frame_id,
                        attempts: attempt,
                        reason,
                    })
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Embed query text with the engine's embedder and timeout.
    pub fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        validate_query(text, 1)?;
        embed::embed_text(&self.embedder, text, self.config.embed_timeout)
    }

    /// Rank indexed frames against an already-embedded query.
    pub fn search_embedding(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchResult>> {
        if top_k == 0 {
            return Err(IndexError::InvalidQuery("top_k must be >= 1".to_string()));
        }
        let index = self.index.read();
        if !index.is_ready() {
            return Err(IndexError::IndexNotReady);
        }
        index.search(query, top_k)
    }

    /// Embed `query` and return the `top_k` best-matching frames.
    pub fn search_text(&self, query: &str, top_k: usize) -> Result<Vec<SearchResult>> {
        validate_query(query, top_k)?;
        if !self.is_ready() {
            return Err(IndexError::IndexNotReady);
        }
        let vector = self.embed_query(query)?;
        self.search_embedding(&vector, top_k)
    }

    /// Frames most similar to an indexed frame, excluding itself.
    pub fn similar_frames(&self, frame_id: u64, top_k: usize) -> Result<Vec<SearchResult>> {
        let index = self.index.read();
        if !index.is_ready() {
            return Err(IndexError::IndexNotReady);
        }
        let position = index.position_of(frame_id).ok_or(IndexError::NotFound(frame_id))?;
        index.similar_to(position, top_k)
    }

    pub fn frame(&self, frame_id: u64) -> Result<Frame> {
        let index = self.index.read();
        let position = index.position_of(frame_id).ok_or(IndexError::NotFound(frame_id))?;
        Ok(index.frame(position)?.clone())
    }

    /// Read a frame's image back from the frame store.
    pub fn frame_image(&self, frame_id: u64) -> Result<RgbImage> {
        let frame = self.frame(frame_id)?;
        self.frame_store
            .get(&frame.source_path)
            .map_err(|e| IndexError::FrameStore(format!("{:#}", e)))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.index.read().save(path)
    }

    /// Replace the current index with one read from `path`.
    ///
    /// Refused while a build runs. The file must match the embedder's
    /// dimension.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<usize> {
        let _guard = BuildGuard::acquire(&self.building)?;
        let loaded = FrameIndex::load_with_dimension(path, self.dimension())?;
        let count = loaded.count();
        *self.index.write() = loaded;
        Ok(count)
    }
}

fn validate_query(text: &str, top_k: usize) -> Result<()> {
    if text.trim().is_empty() {
        return Err(IndexError::InvalidQuery("query text is empty".to_string()));
    }
    if top_k == 0 {
        return Err(IndexError::InvalidQuery("top_k must be >= 1".to_string()));
    }
    Ok(())
}
