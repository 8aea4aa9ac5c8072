//! Python bindings for vidsearch using PyO3
//!
//! The embedding model and video decoder stay in Python: pass any object
//! with `dimension`, `embed_image(width, height, rgb_bytes)` and
//! `embed_text(text)` as the embedder, and any object whose
//! `decode(path)` returns `(fps, [(width, height, rgb_bytes), ...])` as
//! the decoder.

use image::RgbImage;
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyBytes;
use std::path::Path;
use std::sync::Arc;

use crate::{
    DecodedVideo, DirFrameStore, Embedder, EngineConfig, IndexError, QueryPipeline, VideoDecoder,
    VideoSearchEngine,
};

struct PyEmbedder {
    obj: Py<PyAny>,
    dimension: usize,
}

impl Embedder for PyEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_image(&self, image: &RgbImage) -> anyhow::Result<Vec<f32>> {
        Python::with_gil(|py| {
            let pixels = PyBytes::new_bound(py, image.as_raw());
            let out = self
                .obj
                .call_method1(py, "embed_image", (image.width(), image.height(), pixels))?;
            Ok(out.extract::<Vec<f32>>(py)?)
        })
    }

    fn embed_text(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        Python::with_gil(|py| {
            let out = self.obj.call_method1(py, "embed_text", (text,))?;
            Ok(out.extract::<Vec<f32>>(py)?)
        })
    }
}

struct PyDecoder {
    obj: Py<PyAny>,
}

impl VideoDecoder for PyDecoder {
    fn decode(&self, path: &Path) -> anyhow::Result<DecodedVideo> {
        let (source_fps, raw): (f64, Vec<(u32, u32, Vec<u8>)>) = Python::with_gil(|py| {
            self.obj
                .call_method1(py, "decode", (path.to_string_lossy().into_owned(),))?
                .extract(py)
        })?;

        let frames: Vec<anyhow::Result<RgbImage>> = raw
            .into_iter()
            .map(|(width, height, pixels)| {
                RgbImage::from_raw(width, height, pixels).ok_or_else(|| {
                    anyhow::anyhow!("frame buffer does not match {}x{} RGB", width, height)
                })
            })
            .collect();

        Ok(DecodedVideo {
            source_fps,
            frames: Box::new(frames.into_iter()),
        })
    }
}

fn to_py_err(err: IndexError) -> PyErr {
    match err {
        IndexError::InvalidQuery(_)
        | IndexError::InvalidSamplingRate(_)
        | IndexError::InvalidVideo { .. }
        | IndexError::InvalidConfig(_) => PyValueError::new_err(err.to_string()),
        _ => PyRuntimeError::new_err(err.to_string()),
    }
}

/// Python handle over one video index
#[pyclass]
pub struct VideoIndex {
    engine: Arc<VideoSearchEngine>,
    pipeline: QueryPipeline,
}

#[pymethods]
impl VideoIndex {
    /// Create an empty index
    ///
    /// Args:
    ///     embedder: object with `dimension`, `embed_image`, `embed_text`
    ///     decoder: object with `decode(path)`
    ///     frame_dir: directory for sampled frame images
    #[new]
    #[pyo3(signature = (embedder, decoder, frame_dir = None))]
    fn new(
        py: Python<'_>,
        embedder: Py<PyAny>,
        decoder: Py<PyAny>,
        frame_dir: Option<String>,
    ) -> PyResult<Self> {
        let dimension: usize = embedder.getattr(py, "dimension")?.extract(py)?;
        let mut config = EngineConfig::from_env();
        if let Some(dir) = frame_dir {
            config.frame_dir = dir.into();
        }
        let frame_store = DirFrameStore::new(&config.frame_dir).map_err(to_py_err)?;

        let engine = VideoSearchEngine::new(
            Arc::new(PyEmbedder { obj: embedder, dimension }),
            Arc::new(PyDecoder { obj: decoder }),
            Arc::new(frame_store),
            config,
        )
        .map_err(to_py_err)?;
        let engine = Arc::new(engine);
        let capacity = engine.config().query_cache_capacity;
        let pipeline = QueryPipeline::new(Arc::clone(&engine), capacity);

        Ok(Self { engine, pipeline })
    }

    /// Sample and index a video; returns the number of indexed frames
    #[pyo3(signature = (video_path, fps = 1.0))]
    fn build_index(&self, py: Python<'_>, video_path: String, fps: f64) -> PyResult<usize> {
        let engine = Arc::clone(&self.engine);
        let report = py
            .allow_threads(move || engine.build_index(&video_path, fps))
            .map_err(to_py_err)?;
        Ok(report.frame_count)
    }

    /// Search indexed frames with natural language
    ///
    /// Returns:
    ///     list of (rank, score, timestamp_sec, timestamp_ms, frame_id)
    #[pyo3(signature = (query, top_k = 5))]
    fn search(
        &self,
        py: Python<'_>,
        query: String,
        top_k: usize,
    ) -> PyResult<Vec<(usize, f32, f64, u64, u64)>> {
        let response = py
            .allow_threads(|| self.pipeline.search(&query, top_k))
            .map_err(to_py_err)?;
        Ok(response
            .results
            .into_iter()
            .map(|hit| (hit.rank, hit.score, hit.timestamp_sec, hit.timestamp_ms, hit.frame_id))
            .collect())
    }

    fn save(&self, path: String) -> PyResult<()> {
        self.engine.save(path).map_err(to_py_err)
    }

    /// Replace the index with a saved one; returns its frame count
    fn load(&self, path: String) -> PyResult<usize> {
        self.engine.load(path).map_err(to_py_err)
    }

    /// (ready, frame_count, dimension, building)
    fn status(&self) -> (bool, usize, usize, bool) {
        let s = self.engine.status();
        (s.ready, s.frame_count, s.dimension, s.building)
    }

    fn __repr__(&self) -> String {
        format!("VideoIndex(frames={})", self.engine.frame_count())
    }
}

/// Python module initialization
#[pymodule]
fn vidsearch(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<VideoIndex>()?;
    m.add("__version__", env!("CARGO_PKG_VERSION"))?;
    m.add("__doc__", "vidsearch - natural-language video search core")?;
    Ok(())
}
