//! Embedding adapter boundary
//!
//! The model itself lives outside this crate. [`Embedder`] is the contract;
//! the helpers here bound every call by a timeout and fan image batches out
//! over a worker pool while keeping results in input order.

use image::RgbImage;
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{IndexError, Result};

/// Maps images and text into one shared vector space.
///
/// Implementations must be deterministic for a fixed model and return
/// vectors of exactly [`dimension`](Self::dimension) floats.
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;
    fn embed_image(&self, image: &RgbImage) -> anyhow::Result<Vec<f32>>;
    fn embed_text(&self, text: &str) -> anyhow::Result<Vec<f32>>;
}

/// Run `f` on a helper thread and wait at most `timeout` for it.
///
/// On timeout the helper is left to finish on its own and its result is
/// dropped.
fn with_timeout<T, F>(timeout: Duration, f: F) -> Option<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(1);
    std::thread::spawn(move || {
        let _ = tx.send(f());
    });
    rx.recv_timeout(timeout).ok()
}

fn check_dimension(expected: usize, vector: &[f32]) -> Result<()> {
    if vector.len() != expected {
        return Err(IndexError::DimensionMismatch {
            expected,
            got: vector.len(),
        });
    }
    Ok(())
}

/// Embed one batch of frame images on `pool`.
///
/// `frame_ids` label errors and must be parallel to `images`. The output
/// is in input order regardless of completion order. When `timeout`
/// expires, images not yet started are skipped; only calls already running
/// on the pool finish.
pub fn embed_images(
    embedder: &Arc<dyn Embedder>,
    pool: &Arc<rayon::ThreadPool>,
    images: &Arc<Vec<RgbImage>>,
    frame_ids: &[u64],
    batch: usize,
    timeout: Duration,
) -> Result<Vec<Vec<f32>>> {
    let expected = embedder.dimension();
    let embedder = Arc::clone(embedder);
    let pool = Arc::clone(pool);
    let images = Arc::clone(images);
    let abandoned = Arc::new(AtomicBool::new(false));
    let stop = Arc::clone(&abandoned);

    let outcome = with_timeout(timeout, move || {
        pool.install(|| {
            images
                .as_slice()
                .par_iter()
                .enumerate()
                .map(|(i, image)| {
                    if stop.load(Ordering::Acquire) {
                        return Err((i, "batch abandoned".to_string()));
                    }
                    embedder.embed_image(image).map_err(|e| (i, format!("{:#}", e)))
                })
                .collect::<std::result::Result<Vec<_>, _>>()
        })
    });
    let Some(outcome) = outcome else {
        abandoned.store(true, Ordering::Release);
        return Err(IndexError::EmbeddingTimeout { batch, timeout });
    };

    let vectors = outcome.map_err(|(i, reason)| IndexError::Embedding {
        frame_id: frame_ids.get(i).copied(),
        attempts: 1,
        reason,
    })?;

    for vector in &vectors {
        check_dimension(expected, vector)?;
    }
    Ok(vectors)
}

/// Embed a query string, bounded by `timeout`.
pub fn embed_text(embedder: &Arc<dyn Embedder>, text: &str, timeout: Duration) -> Result<Vec<f32>> {
    let expected = embedder.dimension();
    let worker = Arc::clone(embedder);
    let owned = text.to_string();

    let vector = with_timeout(timeout, move || {
        worker.embed_text(&owned).map_err(|e| format!("{:#}", e))
    })
    .ok_or(IndexError::EmbeddingTimeout { batch: 0, timeout })?
        .map_err(|reason| IndexError::Embedding {
            frame_id: None,
            attempts: 1,
            reason,
        })?;

    check_dimension(expected, &vector)?;
    Ok(vector)
}
