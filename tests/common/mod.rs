#![allow(dead_code)]

use image::{Rgb, RgbImage};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, SyncSender};
use std::sync::Arc;
use std::time::Duration;

use vidsearch::{
    CancelToken, DecodedVideo, Embedder, EngineConfig, MemoryFrameStore, VideoDecoder,
    VideoSearchEngine,
};

pub const RED: [u8; 3] = [255, 0, 0];
pub const GREEN: [u8; 3] = [0, 255, 0];
pub const BLUE: [u8; 3] = [0, 0, 255];
pub const BLACK: [u8; 3] = [0, 0, 0];

pub fn solid(rgb: [u8; 3]) -> RgbImage {
    RgbImage::from_pixel(4, 4, Rgb(rgb))
}

/// Decodes any path to a fixed list of solid-colour frames
pub struct SolidDecoder {
    pub fps: f64,
    pub colours: Vec<[u8; 3]>,
}

impl SolidDecoder {
    /// `(colour, frame count)` segments played back to back
    pub fn segments(fps: f64, segments: &[([u8; 3], usize)]) -> Self {
        let colours = segments
            .iter()
            .flat_map(|(colour, n)| std::iter::repeat(*colour).take(*n))
            .collect();
        Self { fps, colours }
    }

    /// 3 s of red then 2 s of blue at 30 fps
    pub fn red_then_blue() -> Self {
        Self::segments(30.0, &[(RED, 90), (BLUE, 60)])
    }
}

impl VideoDecoder for SolidDecoder {
    fn decode(&self, _path: &Path) -> anyhow::Result<DecodedVideo> {
        let frames: Vec<anyhow::Result<RgbImage>> =
            self.colours.iter().map(|c| Ok(solid(*c))).collect();
        Ok(DecodedVideo {
            source_fps: self.fps,
            frames: Box::new(frames.into_iter()),
        })
    }
}

/// Blocks inside `decode` until released, so a build can be held open
pub struct GatedDecoder {
    inner: SolidDecoder,
    entered: Mutex<SyncSender<()>>,
    release: Mutex<Receiver<()>>,
}

impl GatedDecoder {
    pub fn new(inner: SolidDecoder, entered: SyncSender<()>, release: Receiver<()>) -> Self {
        Self {
            inner,
            entered: Mutex::new(entered),
            release: Mutex::new(release),
        }
    }
}

impl VideoDecoder for GatedDecoder {
    fn decode(&self, path: &Path) -> anyhow::Result<DecodedVideo> {
        let _ = self.entered.lock().send(());
        let _ = self.release.lock().recv();
        self.inner.decode(path)
    }
}

/// Mean RGB of the image; text names a primary colour
pub struct ColourEmbedder;

impl Embedder for ColourEmbedder {
    fn dimension(&self) -> usize {
        3
    }

    fn embed_image(&self, image: &RgbImage) -> anyhow::Result<Vec<f32>> {
        let mut sum = [0f32; 3];
        for pixel in image.pixels() {
            for (acc, channel) in sum.iter_mut().zip(pixel.0) {
                *acc += channel as f32;
            }
        }
        let n = (image.width() * image.height()).max(1) as f32;
        Ok(sum.iter().map(|s| s / n / 255.0).collect())
    }

    fn embed_text(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        match text.trim().to_lowercase().as_str() {
            "red" => Ok(vec![1.0, 0.0, 0.0]),
            "green" => Ok(vec![0.0, 1.0, 0.0]),
            "blue" => Ok(vec![0.0, 0.0, 1.0]),
            other => anyhow::bail!("unknown colour {:?}", other),
        }
    }
}

/// Counts calls before delegating to [`ColourEmbedder`]
#[derive(Default)]
pub struct CountingEmbedder {
    pub image_calls: AtomicUsize,
    pub text_calls: AtomicUsize,
}

impl CountingEmbedder {
    pub fn text_calls(&self) -> usize {
        self.text_calls.load(Ordering::SeqCst)
    }

    pub fn image_calls(&self) -> usize {
        self.image_calls.load(Ordering::SeqCst)
    }
}

impl Embedder for CountingEmbedder {
    fn dimension(&self) -> usize {
        3
    }

    fn embed_image(&self, image: &RgbImage) -> anyhow::Result<Vec<f32>> {
        self.image_calls.fetch_add(1, Ordering::SeqCst);
        ColourEmbedder.embed_image(image)
    }

    fn embed_text(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        self.text_calls.fetch_add(1, Ordering::SeqCst);
        ColourEmbedder.embed_text(text)
    }
}

/// Fails on any green frame
pub struct FailOnGreen;

impl Embedder for FailOnGreen {
    fn dimension(&self) -> usize {
        3
    }

    fn embed_image(&self, image: &RgbImage) -> anyhow::Result<Vec<f32>> {
        if image.get_pixel(0, 0).0 == GREEN {
            anyhow::bail!("model rejected frame");
        }
        ColourEmbedder.embed_image(image)
    }

    fn embed_text(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        ColourEmbedder.embed_text(text)
    }
}

/// Sleeps before every image embedding and counts finished calls
pub struct SlowEmbedder {
    delay: Duration,
    completed: AtomicUsize,
}

impl SlowEmbedder {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            completed: AtomicUsize::new(0),
        }
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

impl Embedder for SlowEmbedder {
    fn dimension(&self) -> usize {
        3
    }

    fn embed_image(&self, image: &RgbImage) -> anyhow::Result<Vec<f32>> {
        std::thread::sleep(self.delay);
        self.completed.fetch_add(1, Ordering::SeqCst);
        ColourEmbedder.embed_image(image)
    }

    fn embed_text(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        ColourEmbedder.embed_text(text)
    }
}

/// Cancels `token` once `after` images have been embedded
pub struct CancellingEmbedder {
    pub token: CancelToken,
    pub after: usize,
    calls: AtomicUsize,
}

impl CancellingEmbedder {
    pub fn new(token: CancelToken, after: usize) -> Self {
        Self {
            token,
            after,
            calls: AtomicUsize::new(0),
        }
    }
}

impl Embedder for CancellingEmbedder {
    fn dimension(&self) -> usize {
        3
    }

    fn embed_image(&self, image: &RgbImage) -> anyhow::Result<Vec<f32>> {
        if self.calls.fetch_add(1, Ordering::SeqCst) + 1 >= self.after {
            self.token.cancel();
        }
        ColourEmbedder.embed_image(image)
    }

    fn embed_text(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        ColourEmbedder.embed_text(text)
    }
}

pub fn test_config(batch_size: usize) -> EngineConfig {
    EngineConfig {
        batch_size,
        embed_workers: 2,
        embed_retries: 0,
        ..EngineConfig::default()
    }
}

pub fn engine_with(
    embedder: Arc<dyn Embedder>,
    decoder: Arc<dyn VideoDecoder>,
    config: EngineConfig,
) -> VideoSearchEngine {
    VideoSearchEngine::new(embedder, decoder, Arc::new(MemoryFrameStore::new()), config).unwrap()
}
