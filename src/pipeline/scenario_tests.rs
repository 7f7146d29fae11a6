//! End-to-end pipeline runs against the synthetic source.

use crate::cube::BoundingBox;
use crate::source::SyntheticSource;
use crate::task::{
    AnalysisTask, AnimationMode, InMemoryTaskStore, ProcessingMode, TaskStatus, TaskStore,
};
use crate::{run_task, Config, PipelineContext};
use chrono::{TimeZone, Utc};
use std::sync::Arc;
use tempfile::TempDir;

fn test_config(tmp: &TempDir) -> Config {
    let mut config = Config::default();
    config.storage.temp_root = tmp.path().join("temp");
    config.storage.results_root = tmp.path().join("results");
    config.processing.enable_metrics = false;
    config.processing.geo_concurrency = 4;
    config.processing.time_concurrency = 2;
    config
}

fn context(tmp: &TempDir, source: SyntheticSource) -> (PipelineContext, Arc<InMemoryTaskStore>) {
    let store = Arc::new(InMemoryTaskStore::new());
    (
        PipelineContext {
            config: Arc::new(test_config(tmp)),
            store: store.clone(),
            source: Arc::new(source),
        },
        store,
    )
}

fn batch_task() -> AnalysisTask {
    let mut task = AnalysisTask::new(
        BoundingBox::new(0.0, 0.0, 1.0, 0.5),
        Utc.with_ymd_and_hms(2014, 6, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2015, 12, 31, 0, 0, 0).unwrap(),
        "LANDSAT_8",
        "ls8_test",
        "coastal_change",
        ProcessingMode::Batch,
    );
    task.geographic_chunk_size = Some(0.5);
    task
}

fn iterative_task(extent: BoundingBox) -> AnalysisTask {
    let mut task = AnalysisTask::new(
        extent,
        Utc.with_ymd_and_hms(2015, 1, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2015, 3, 31, 0, 0, 0).unwrap(),
        "LANDSAT_8",
        "ls8_test",
        "water_detection",
        ProcessingMode::Iterative,
    );
    task.temporal_chunk_size = 1;
    task
}

/// Batch mode, two geographic chunks, one comparison period: both chunks
/// produce a diff artifact, recombination covers both, and the progress
/// counters land exactly on the chunk count.
#[tokio::test]
async fn scenario_batch_two_geo_chunks() {
    let tmp = TempDir::new().unwrap();
    let (ctx, store) = context(&tmp, SyntheticSource::new(0.05));

    let task = batch_task();
    let id = task.id;
    store.insert(task).await.unwrap();

    let ok = run_task(id, &ctx).await.unwrap();
    assert!(ok);

    let finished = store.get(id).await.unwrap();
    assert_eq!(finished.status, TaskStatus::Ok);
    // 2 geo chunks x 1 comparison pair x 1 scene each
    assert_eq!(finished.total_scenes, 2);
    assert_eq!(finished.scenes_processed, 2);
    // The merged product covers both cells.
    assert_eq!(
        finished.result_bounds.unwrap(),
        BoundingBox::new(0.0, 0.0, 1.0, 0.5)
    );
    assert!(finished.outputs.geotiff_path.is_some());
    assert!(finished.outputs.native_path.is_some());
    // RGB mosaic preview plus the coastal_change preview.
    assert_eq!(finished.outputs.preview_paths.len(), 2);
    assert!(!finished.metadata.is_empty());
}

/// Iterative mode, three single-scene windows, running-state animation:
/// the assembled animation has exactly three frames in chronological
/// order.
#[tokio::test]
async fn scenario_running_state_animation_has_one_frame_per_window() {
    let tmp = TempDir::new().unwrap();
    let (ctx, store) = context(&tmp, SyntheticSource::new(0.05));

    let mut task = iterative_task(BoundingBox::new(0.0, 0.0, 0.5, 0.5));
    task.animation_mode = AnimationMode::RunningState;
    let id = task.id;
    store.insert(task).await.unwrap();

    let ok = run_task(id, &ctx).await.unwrap();
    assert!(ok);

    let finished = store.get(id).await.unwrap();
    assert_eq!(finished.status, TaskStatus::Ok);
    // 3 monthly acquisitions, window size 1 -> 3 windows, all processed.
    assert_eq!(finished.total_scenes, 3);
    assert_eq!(finished.scenes_processed, 3);

    let animation = finished.outputs.animation_path.expect("animation produced");
    let file = std::fs::File::open(&animation).unwrap();
    let decoder = image::codecs::gif::GifDecoder::new(file).unwrap();
    use image::AnimationDecoder;
    let frames = decoder.into_frames().collect_frames().unwrap();
    assert_eq!(frames.len(), 3);
}

/// One geographic chunk yields no data: the recombined output equals the
/// real chunk alone and the empty chunk contributes nothing.
#[tokio::test]
async fn scenario_one_empty_geo_chunk() {
    let tmp = TempDir::new().unwrap();
    // The western cell has no retrievable data.
    let source = SyntheticSource::new(0.05)
        .with_dead_zone(BoundingBox::new(0.0, 0.0, 0.5, 0.5));
    let (ctx, store) = context(&tmp, source);

    let mut task = iterative_task(BoundingBox::new(0.0, 0.0, 1.0, 0.5));
    task.geographic_chunk_size = Some(0.5);
    let id = task.id;
    store.insert(task).await.unwrap();

    let ok = run_task(id, &ctx).await.unwrap();
    assert!(ok);

    let finished = store.get(id).await.unwrap();
    assert_eq!(finished.status, TaskStatus::Ok);
    // Output equals the eastern cell alone.
    assert_eq!(
        finished.result_bounds.unwrap(),
        BoundingBox::new(0.5, 0.0, 1.0, 0.5)
    );
    // Only the real chunk's scenes were counted.
    assert_eq!(finished.total_scenes, 6);
    assert_eq!(finished.scenes_processed, 3);
}

/// Every chunk yields no data: the task ends in ERROR with a clear
/// message instead of crashing on an empty fan-in group.
#[tokio::test]
async fn scenario_all_chunks_empty() {
    let tmp = TempDir::new().unwrap();
    let source = SyntheticSource::new(0.05)
        .with_dead_zone(BoundingBox::new(-10.0, -10.0, 10.0, 10.0));
    let (ctx, store) = context(&tmp, source);

    let mut task = iterative_task(BoundingBox::new(0.0, 0.0, 1.0, 0.5));
    task.geographic_chunk_size = Some(0.5);
    let id = task.id;
    store.insert(task).await.unwrap();

    let ok = run_task(id, &ctx).await.unwrap();
    assert!(!ok);

    let finished = store.get(id).await.unwrap();
    assert_eq!(finished.status, TaskStatus::Error);
    assert!(finished.status_message.contains("no data"));
}

/// Validation failure: a batch task over a range with data in only one
/// calendar year is rejected before any chunk runs.
#[tokio::test]
async fn scenario_batch_requires_two_years() {
    let tmp = TempDir::new().unwrap();
    let (ctx, store) = context(&tmp, SyntheticSource::new(0.05));

    let mut task = batch_task();
    task.time_start = Utc.with_ymd_and_hms(2015, 1, 1, 0, 0, 0).unwrap();
    task.time_end = Utc.with_ymd_and_hms(2015, 12, 31, 0, 0, 0).unwrap();
    let id = task.id;
    store.insert(task).await.unwrap();

    let ok = run_task(id, &ctx).await.unwrap();
    assert!(!ok);

    let finished = store.get(id).await.unwrap();
    assert_eq!(finished.status, TaskStatus::Error);
    assert_eq!(finished.total_scenes, 0);
}

/// Unsupported measurements fall back to the default band list instead of
/// failing the task.
#[tokio::test]
async fn scenario_measurement_fallback() {
    let tmp = TempDir::new().unwrap();
    let (ctx, store) = context(&tmp, SyntheticSource::new(0.05));

    let mut task = iterative_task(BoundingBox::new(0.0, 0.0, 0.5, 0.5));
    task.measurements = vec!["thermal".to_string()];
    let id = task.id;
    store.insert(task).await.unwrap();

    let ok = run_task(id, &ctx).await.unwrap();
    assert!(ok);
    assert_eq!(store.get(id).await.unwrap().status, TaskStatus::Ok);
}

/// Re-processing the same unit with the same inputs produces
/// byte-identical artifacts.
#[tokio::test]
async fn scenario_reprocessing_is_idempotent() {
    use crate::analysis;
    use crate::chunk::{GeographicChunk, TemporalChunk};
    use crate::io::ArtifactStore;
    use crate::pipeline::{ChunkProcessor, Metrics};

    let tmp = TempDir::new().unwrap();
    let config = Arc::new(test_config(&tmp));
    let store = Arc::new(InMemoryTaskStore::new());

    let task = iterative_task(BoundingBox::new(0.0, 0.0, 0.5, 0.5));
    store.insert(task.clone()).await.unwrap();
    store.set_total_scenes(task.id, 100).await.unwrap();

    let artifacts = ArtifactStore::create(
        &config.storage.temp_root,
        &config.storage.results_root,
        task.id,
    )
    .unwrap();
    let processor = ChunkProcessor::new(
        Arc::new(SyntheticSource::new(0.05)),
        analysis::lookup("water_detection").unwrap(),
        store.clone(),
        artifacts.clone(),
        Metrics::new(),
        config,
    );

    let geo = GeographicChunk {
        index: 0,
        bounds: BoundingBox::new(0.0, 0.0, 0.5, 0.5),
    };
    let time = TemporalChunk::Window {
        index: 0,
        dates: vec![Utc.with_ymd_and_hms(2015, 1, 15, 10, 30, 0).unwrap()],
    };

    let first = processor
        .process(&task, &geo, &time)
        .await
        .unwrap()
        .expect("chunk has data");
    let first_bytes = std::fs::read(&first.artifact).unwrap();

    let second = processor
        .process(&task, &geo, &time)
        .await
        .unwrap()
        .expect("chunk has data");
    let second_bytes = std::fs::read(&second.artifact).unwrap();

    assert_eq!(first.artifact, second.artifact);
    assert_eq!(first_bytes, second_bytes);
}
