mod common;

use image::RgbImage;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

use common::*;
use vidsearch::{
    DirFrameStore, Embedder, FrameIndex, IndexError, MemoryFrameStore, QueryPipeline,
    VideoSearchEngine,
};

struct WideEmbedder;

impl Embedder for WideEmbedder {
    fn dimension(&self) -> usize {
        4
    }

    fn embed_image(&self, _image: &RgbImage) -> anyhow::Result<Vec<f32>> {
        Ok(vec![1.0, 0.0, 0.0, 0.0])
    }

    fn embed_text(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
        Ok(vec![1.0, 0.0, 0.0, 0.0])
    }
}

fn built_engine() -> VideoSearchEngine {
    let engine = engine_with(
        Arc::new(ColourEmbedder),
        Arc::new(SolidDecoder::red_then_blue()),
        test_config(2),
    );
    engine.build_index("red_blue.mp4", 1.0).unwrap();
    engine
}

#[test]
fn test_save_load_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("video_index.svid");

    let original = built_engine();
    original.save(&path).unwrap();

    let reopened = VideoSearchEngine::open(
        Arc::new(ColourEmbedder),
        Arc::new(SolidDecoder::red_then_blue()),
        Arc::new(MemoryFrameStore::new()),
        test_config(2),
        &path,
    )
    .unwrap();
    assert_eq!(reopened.frame_count(), 5);

    for query in ["red", "green", "blue"] {
        let before = original.search_text(query, 5).unwrap();
        let after = reopened.search_text(query, 5).unwrap();
        assert_eq!(before.len(), after.len());
        for (a, b) in before.iter().zip(&after) {
            assert_eq!(a.frame, b.frame);
            assert!((a.score - b.score).abs() < 1e-6);
        }
    }
}

#[test]
fn test_load_replaces_built_index() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("small.svid");

    let small = engine_with(
        Arc::new(ColourEmbedder),
        Arc::new(SolidDecoder::segments(1.0, &[(GREEN, 2)])),
        test_config(2),
    );
    small.build_index("green.mp4", 1.0).unwrap();
    small.save(&path).unwrap();

    let engine = built_engine();
    assert_eq!(engine.load(&path).unwrap(), 2);
    assert_eq!(engine.frame_count(), 2);
    assert!((engine.search_text("green", 1).unwrap()[0].score - 1.0).abs() < 1e-6);
}

#[test]
fn test_dimension_mismatch_on_open() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("video_index.svid");
    built_engine().save(&path).unwrap();

    let result = VideoSearchEngine::open(
        Arc::new(WideEmbedder),
        Arc::new(SolidDecoder::red_then_blue()),
        Arc::new(MemoryFrameStore::new()),
        test_config(2),
        &path,
    );
    assert!(matches!(
        result,
        Err(IndexError::DimensionMismatch { expected: 4, got: 3 })
    ));
}

#[test]
fn test_corrupt_file_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("video_index.svid");
    built_engine().save(&path).unwrap();

    let mut bytes = std::fs::read(&path).unwrap();
    bytes.truncate(bytes.len() - 3);
    std::fs::write(&path, &bytes).unwrap();

    let engine = built_engine();
    assert!(matches!(engine.load(&path), Err(IndexError::CorruptIndex(_))));
    // A failed load leaves the current index alone
    assert_eq!(engine.frame_count(), 5);
}

#[test]
fn test_pipeline_loads_saved_index_on_first_query() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("video_index.svid");
    built_engine().save(&path).unwrap();

    let counter = Arc::new(CountingEmbedder::default());
    let engine = Arc::new(engine_with(
        counter.clone(),
        Arc::new(SolidDecoder::red_then_blue()),
        test_config(2),
    ));
    let pipeline = QueryPipeline::new(Arc::clone(&engine), 4).with_fallback_index(&path);

    let response = pipeline.search("blue", 2).unwrap();
    assert_eq!(response.results.len(), 2);
    assert!([3.0, 4.0].contains(&response.results[0].timestamp_sec));
    assert!(engine.is_ready());
    assert_eq!(counter.image_calls(), 0);
}

#[test]
fn test_pipeline_without_saved_index_is_not_ready() {
    let dir = TempDir::new().unwrap();
    let counter = Arc::new(CountingEmbedder::default());
    let engine = Arc::new(engine_with(
        counter.clone(),
        Arc::new(SolidDecoder::red_then_blue()),
        test_config(2),
    ));
    let pipeline = QueryPipeline::new(Arc::clone(&engine), 4)
        .with_fallback_index(dir.path().join("missing.svid"));

    assert!(matches!(pipeline.search("red", 1), Err(IndexError::IndexNotReady)));
    assert!(matches!(pipeline.search("red", 1), Err(IndexError::IndexNotReady)));
    assert_eq!(counter.text_calls(), 0);
}

#[test]
fn test_pipeline_retries_saved_index_after_build() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("video_index.svid");
    built_engine().save(&path).unwrap();

    // The build holds the engine, then fails on an empty video
    let (entered_tx, entered_rx) = mpsc::sync_channel(1);
    let (release_tx, release_rx) = mpsc::channel();
    let decoder = GatedDecoder::new(SolidDecoder::segments(30.0, &[]), entered_tx, release_rx);
    let engine = Arc::new(engine_with(
        Arc::new(ColourEmbedder),
        Arc::new(decoder),
        test_config(2),
    ));
    let pipeline = QueryPipeline::new(Arc::clone(&engine), 4).with_fallback_index(&path);

    let builder = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || engine.build_index("empty.mp4", 1.0))
    };
    entered_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert!(matches!(pipeline.search("red", 1), Err(IndexError::IndexNotReady)));

    release_tx.send(()).unwrap();
    assert!(matches!(builder.join().unwrap(), Err(IndexError::InvalidVideo { .. })));
    assert!(!engine.is_ready());

    let response = pipeline.search("red", 1).unwrap();
    assert_eq!(response.results[0].frame_id, 0);
    assert_eq!(engine.frame_count(), 5);
}

#[test]
fn test_frames_written_to_directory_store() {
    let dir = TempDir::new().unwrap();
    let store = DirFrameStore::with_extension(dir.path().join("frames"), "png").unwrap();
    let engine = VideoSearchEngine::new(
        Arc::new(ColourEmbedder),
        Arc::new(SolidDecoder::red_then_blue()),
        Arc::new(store),
        test_config(2),
    )
    .unwrap();
    engine.build_index("red_blue.mp4", 1.0).unwrap();

    let frame = engine.frame(3).unwrap();
    assert!(frame.source_path.ends_with("frame_00003.png"));
    assert!(dir.path().join("frames").join("frame_00003.png").exists());
    assert_eq!(engine.frame_image(3).unwrap().get_pixel(0, 0).0, BLUE);

    let path = dir.path().join("video_index.svid");
    engine.save(&path).unwrap();
    let loaded = FrameIndex::load(&path).unwrap();
    assert_eq!(loaded.frame(3).unwrap().source_path, frame.source_path);
}
