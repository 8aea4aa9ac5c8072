//! Frame sampling
//!
//! Turns a decoded video into a time-ordered stream of [`Frame`]s at a
//! target rate, persisting each emitted image through a [`FrameStore`]
//! before handing it downstream.

use anyhow::Context;
use image::RgbImage;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{IndexError, Result};
use crate::types::Frame;

/// Raw decoded frames plus the container's frame rate
pub struct DecodedVideo {
    pub source_fps: f64,
    pub frames: Box<dyn Iterator<Item = anyhow::Result<RgbImage>> + Send>,
}

/// Video container decoding, provided by the host application
pub trait VideoDecoder: Send + Sync {
    fn decode(&self, path: &Path) -> anyhow::Result<DecodedVideo>;
}

/// Durable storage for sampled frame images, keyed by frame id
pub trait FrameStore: Send + Sync {
    /// Persist `image` for frame `id`, returning where it was written
    fn put(&self, id: u64, image: &RgbImage) -> anyhow::Result<String>;
    fn get(&self, path: &str) -> anyhow::Result<RgbImage>;
}

/// Writes frames as `frame_{id:05}.{ext}` under a root directory
pub struct DirFrameStore {
    root: PathBuf,
    extension: String,
}

impl DirFrameStore {
    /// Create the root directory if needed. Images are written as JPEG.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        Self::with_extension(root, "jpg")
    }

    /// The extension picks the image format (`jpg`, `png`).
    pub fn with_extension(root: impl Into<PathBuf>, extension: &str) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            extension: extension.trim_start_matches('.').to_string(),
        })
    }

    pub fn path_for(&self, id: u64) -> PathBuf {
        self.root.join(format!("frame_{:05}.{}", id, self.extension))
    }
}

impl FrameStore for DirFrameStore {
    fn put(&self, id: u64, image: &RgbImage) -> anyhow::Result<String> {
        let path = self.path_for(id);
        image
            .save(&path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path.to_string_lossy().into_owned())
    }

    fn get(&self, path: &str) -> anyhow::Result<RgbImage> {
        let img = image::open(path).with_context(|| format!("failed to read {}", path))?;
        Ok(img.to_rgb8())
    }
}

/// In-process frame store, for tests and embedding hosts that keep
/// frames elsewhere
#[derive(Default)]
pub struct MemoryFrameStore {
    images: Mutex<HashMap<String, RgbImage>>,
}

impl MemoryFrameStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.images.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FrameStore for MemoryFrameStore {
    fn put(&self, id: u64, image: &RgbImage) -> anyhow::Result<String> {
        let key = format!("mem://frame_{:05}", id);
        self.images.lock().insert(key.clone(), image.clone());
        Ok(key)
    }

    fn get(&self, path: &str) -> anyhow::Result<RgbImage> {
        self.images
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no frame stored at {}", path))
    }
}

/// Which decoded frames to keep for a given source and target rate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingPlan {
    pub source_fps: f64,
    /// Keep every `step`-th decoded frame
    pub step: u64,
}

impl SamplingPlan {
    /// `step = round(source_fps / fps)`, never below 1
    pub fn new(source_fps: f64, fps: f64) -> Result<Self> {
        validate_fps(fps)?;
        let step = (source_fps / fps).round();
        let step = if step.is_finite() && step >= 1.0 {
            step as u64
        } else {
            1
        };
        Ok(Self { source_fps, step })
    }

    pub fn keeps(&self, decoded_index: u64) -> bool {
        decoded_index % self.step == 0
    }

    pub fn timestamp(&self, decoded_index: u64) -> f64 {
        decoded_index as f64 / self.source_fps
    }
}

fn validate_fps(fps: f64) -> Result<()> {
    if fps.is_finite() && fps > 0.0 {
        Ok(())
    } else {
        Err(IndexError::InvalidSamplingRate(fps))
    }
}

/// Samples videos at a fixed rate. Cheap to clone.
#[derive(Clone)]
pub struct FrameSampler {
    decoder: Arc<dyn VideoDecoder>,
    store: Arc<dyn FrameStore>,
    fps: f64,
}

impl FrameSampler {
    pub fn new(
        decoder: Arc<dyn VideoDecoder>,
        store: Arc<dyn FrameStore>,
        fps: f64,
    ) -> Result<Self> {
        validate_fps(fps)?;
        Ok(Self { decoder, store, fps })
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// Open `path` and return a lazy stream of sampled frames.
    ///
    /// Each call decodes from the start, so the sequence can be restarted
    /// by sampling again.
    pub fn sample(&self, path: &Path) -> Result<SampledFrames> {
        let invalid = |reason: String| IndexError::InvalidVideo {
            path: path.display().to_string(),
            reason,
        };

        let video = self.decoder.decode(path).map_err(|e| invalid(format!("{:#}", e)))?;
        if !(video.source_fps.is_finite() && video.source_fps > 0.0) {
            return Err(invalid(format!("source frame rate {} is not positive", video.source_fps)));
        }
        let plan = SamplingPlan::new(video.source_fps, self.fps)?;

        Ok(SampledFrames {
            path: path.to_path_buf(),
            plan,
            frames: video.frames,
            store: Arc::clone(&self.store),
            decoded: 0,
            next_id: 0,
            done: false,
        })
    }
}

/// A sampled frame together with its decoded image
pub struct SampledFrame {
    pub frame: Frame,
    pub image: RgbImage,
}

/// Lazy iterator produced by [`FrameSampler::sample`].
///
/// Yields at most one error, after which it is exhausted. A video that
/// decodes to zero frames yields a single `InvalidVideo` error.
pub struct SampledFrames {
    path: PathBuf,
    plan: SamplingPlan,
    frames: Box<dyn Iterator<Item = anyhow::Result<RgbImage>> + Send>,
    store: Arc<dyn FrameStore>,
    decoded: u64,
    next_id: u64,
    done: bool,
}

impl SampledFrames {
    pub fn plan(&self) -> SamplingPlan {
        self.plan
    }

    fn fail(&mut self, err: IndexError) -> Option<Result<SampledFrame>> {
        self.done = true;
        Some(Err(err))
    }
}

impl Iterator for SampledFrames {
    type Item = Result<SampledFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            let image = match self.frames.next() {
                Some(Ok(image)) => image,
                Some(Err(e)) => {
                    let err = IndexError::InvalidVideo {
                        path: self.path.display().to_string(),
                        reason: format!("decode failed at frame {}: {:#}", self.decoded, e),
                    };
                    return self.fail(err);
                }
                None if self.decoded == 0 => {
                    let err = IndexError::InvalidVideo {
                        path: self.path.display().to_string(),
                        reason: "video contains no frames".to_string(),
                    };
                    return self.fail(err);
                }
                None => {
                    self.done = true;
                    return None;
                }
            };

            let decoded_index = self.decoded;
            self.decoded += 1;
            if !self.plan.keeps(decoded_index) {
                continue;
            }

            let id = self.next_id;
            let source_path = match self.store.put(id, &image) {
                Ok(p) => p,
                Err(e) => return self.fail(IndexError::FrameStore(format!("{:#}", e))),
            };
            self.next_id += 1;

            let frame = Frame::new(id, self.plan.timestamp(decoded_index), source_path);
            return Some(Ok(SampledFrame { frame, image }));
        }
    }
}
