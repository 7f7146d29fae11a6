//! Datacube Analysis Pipeline
//!
//! Chunked map-reduce pipeline for large-area, multi-date satellite
//! imagery analyses (coastal-change detection, surface-water time
//! series). A spatiotemporal query is decomposed into a grid of
//! independent geographic x temporal chunks, each chunk is processed
//! against a pluggable analysis, and the partial results are recombined
//! along two axes — geography first, then time — into the final
//! deliverable rasters.
//!
//! # Architecture
//!
//! - **Chunk**: pure planning of geographic cells and temporal groups
//! - **Pipeline**: per-chunk processing, the two fan-in recombiners, and
//!   final product assembly, with metrics
//! - **Cube**: raster data model, spatial stitching, running accumulation
//! - **I/O**: task-scoped artifact storage and raster writers
//!
//! Control flow is a tree-shaped barrier structure: for each temporal
//! chunk, a parallel group of geographic-chunk tasks completes before
//! that chunk's geographic recombination; all geographic recombinations
//! complete before the temporal recombiner runs.
//!
//! # Usage
//!
//! ```no_run
//! use datacube_pipeline::{run_task, Config, PipelineContext};
//! use datacube_pipeline::source::SyntheticSource;
//! use datacube_pipeline::task::InMemoryTaskStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let ctx = PipelineContext {
//!         config: Arc::new(Config::default()),
//!         store: Arc::new(InMemoryTaskStore::new()),
//!         source: Arc::new(SyntheticSource::new(0.05)),
//!     };
//!     // let ok = run_task(task_id, &ctx).await?;
//!     Ok(())
//! }
//! ```

pub mod analysis;
pub mod chunk;
pub mod config;
pub mod cube;
pub mod error;
pub mod io;
pub mod pipeline;
pub mod source;
pub mod task;

pub use config::Config;
pub use error::{PipelineError, Result};

use crate::analysis::AnalysisOps;
use crate::chunk::{plan_chunks, ChunkPlan};
use crate::io::ArtifactStore;
use crate::pipeline::{
    ChunkProcessor, CombinedResult, GeographicRecombiner, Metrics, MetricsReporter,
    ProductFinalizer, TemporalRecombiner,
};
use crate::source::{AcquisitionQuery, DataSource, DEFAULT_MEASUREMENTS};
use crate::task::{AnalysisTask, ProcessingMode, TaskStatus, TaskStore};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Everything a pipeline invocation needs besides the task id.
pub struct PipelineContext {
    pub config: Arc<Config>,
    pub store: Arc<dyn TaskStore>,
    pub source: Arc<dyn DataSource>,
}

/// Run the full pipeline for one task: validate, chunk, dispatch the
/// fan-out/fan-in tree, finalize.
///
/// Returns `Ok(true)` when the task completed and `Ok(false)` when it was
/// marked `ERROR`; `Err` is reserved for infrastructure faults (e.g. an
/// unreachable task store).
pub async fn run_task(task_id: Uuid, ctx: &PipelineContext) -> anyhow::Result<bool> {
    let store = ctx.store.clone();
    let mut task = store.get(task_id).await?;
    store.record_start(task_id).await?;
    store
        .update_status(task_id, TaskStatus::Wait, "Parsed out parameters.")
        .await?;

    tracing::info!(task = %task_id, analysis = %task.analysis, "starting task");

    let analysis = match analysis::lookup(&task.analysis) {
        Ok(a) => a,
        Err(e) => {
            store
                .update_status(task_id, TaskStatus::Error, &e.to_string())
                .await?;
            return Ok(false);
        }
    };

    // Validate and chunk. Failures here are terminal and user-visible.
    let plan = match validate_and_chunk(&mut task, ctx).await {
        Ok(plan) => plan,
        Err(e) => {
            tracing::warn!(task = %task_id, "validation failed: {}", e);
            store
                .update_status(task_id, TaskStatus::Error, &e.to_string())
                .await?;
            return Ok(false);
        }
    };

    let total_scenes = plan.total_scenes(task.scenes_per_time_chunk());
    store.set_total_scenes(task_id, total_scenes).await?;
    store
        .update_status(task_id, TaskStatus::Wait, "Starting processing.")
        .await?;

    let metrics = Metrics::new();
    let total_units = (plan.geographic.len() * plan.temporal.len()) as u64;

    // Periodic progress reporting.
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
    let reporter_handle = if ctx.config.processing.enable_metrics {
        let reporter = MetricsReporter::new(
            metrics.clone(),
            ctx.config.processing.metrics_interval_secs,
            total_units,
        );
        Some(tokio::spawn(reporter.run(shutdown_rx)))
    } else {
        drop(shutdown_rx);
        None
    };

    let outcome = execute_pipeline(&task, analysis, ctx, &plan, metrics.clone()).await;

    let _ = shutdown_tx.send(()).await;
    if let Some(handle) = reporter_handle {
        let _ = handle.await;
    }

    if let Some(ref path) = ctx.config.processing.metrics_output_path {
        if let Err(e) = metrics.snapshot().save_to_file(path) {
            tracing::warn!("Failed to save metrics to {}: {}", path, e);
        }
    }

    match outcome {
        Ok(()) => {
            tracing::info!(task = %task_id, "task complete: {}", metrics.snapshot());
            Ok(true)
        }
        Err(e) => {
            tracing::error!(task = %task_id, "task failed: {}", e);
            store
                .update_status(task_id, TaskStatus::Error, &e.to_string())
                .await?;
            Ok(false)
        }
    }
}

/// Validate acquisitions and measurements, then build the chunk plan.
async fn validate_and_chunk(
    task: &mut AnalysisTask,
    ctx: &PipelineContext,
) -> Result<ChunkPlan> {
    let query = AcquisitionQuery {
        platform: task.platform.clone(),
        product: task.product.clone(),
        extent: task.extent,
        time_start: task.time_start,
        time_end: task.time_end,
        measurements: task.measurements.clone(),
    };

    let dates = ctx.source.list_acquisition_dates(&query).await?;
    validate_acquisitions(task, &dates)?;

    // Unsupported measurement sets fall back to the default band list.
    if !ctx
        .source
        .validate_measurements(&task.product, &task.measurements)
        .await?
    {
        tracing::info!(task = %task.id, "unsupported measurements, falling back to defaults");
        task.measurements = DEFAULT_MEASUREMENTS.iter().map(|s| s.to_string()).collect();
        if !ctx
            .source
            .validate_measurements(&task.product, &task.measurements)
            .await?
        {
            return Err(PipelineError::Validation(
                "default measurement set is not supported by this product".to_string(),
            ));
        }
    }

    ctx.store
        .update_status(task.id, TaskStatus::Wait, "Validated parameters.")
        .await?;

    let plan = plan_chunks(task, &dates)?;
    ctx.store
        .update_status(task.id, TaskStatus::Wait, "Chunked parameter set.")
        .await?;
    Ok(plan)
}

/// Check acquisition existence per period required by the processing mode.
fn validate_acquisitions(task: &AnalysisTask, dates: &[DateTime<Utc>]) -> Result<()> {
    if dates.is_empty() {
        return Err(PipelineError::Validation(
            "there are no acquisitions for this parameter set".to_string(),
        ));
    }
    if task.processing_mode == ProcessingMode::Batch {
        let by_year = chunk::group_dates_by_year(dates);
        if by_year.len() < 2 {
            return Err(PipelineError::Validation(
                "there must be at least one acquisition in both the anchor and a comparison year"
                    .to_string(),
            ));
        }
    }
    Ok(())
}

/// Dispatch the two-level fan-out/fan-in tree and finalize.
///
/// Inner level: all geographic chunks of one time chunk run concurrently;
/// collecting the group is the geographic barrier. Outer level: time-chunk
/// groups run concurrently; collecting them is the temporal barrier.
async fn execute_pipeline(
    task: &AnalysisTask,
    analysis: Arc<dyn AnalysisOps>,
    ctx: &PipelineContext,
    plan: &ChunkPlan,
    metrics: Arc<Metrics>,
) -> Result<()> {
    let artifacts = ArtifactStore::create(
        &ctx.config.storage.temp_root,
        &ctx.config.storage.results_root,
        task.id,
    )?;
    let preview_range = ctx.config.output.preview_range();

    let processor = Arc::new(ChunkProcessor::new(
        ctx.source.clone(),
        analysis.clone(),
        ctx.store.clone(),
        artifacts.clone(),
        metrics.clone(),
        ctx.config.clone(),
    ));
    let geo_recombiner = Arc::new(GeographicRecombiner::new(
        analysis.clone(),
        artifacts.clone(),
        metrics.clone(),
        preview_range,
    ));

    let task = Arc::new(task.clone());
    let geo_chunks = Arc::new(plan.geographic.clone());
    let geo_concurrency = ctx.config.processing.geo_concurrency;

    let group_results: Vec<Result<CombinedResult>> = stream::iter(plan.temporal.clone())
        .map(|time_chunk| {
            let processor = processor.clone();
            let geo_recombiner = geo_recombiner.clone();
            let task = task.clone();
            let geo_chunks = geo_chunks.clone();

            async move {
                let chunk_results: Vec<Result<Option<pipeline::ChunkResult>>> =
                    stream::iter(geo_chunks.iter().cloned())
                        .map(|geo_chunk| {
                            let processor = processor.clone();
                            let task = task.clone();
                            let time_chunk = time_chunk.clone();
                            async move {
                                processor
                                    .process_with_retry(&task, &geo_chunk, &time_chunk)
                                    .await
                            }
                        })
                        .buffer_unordered(geo_concurrency)
                        .collect()
                        .await;

                // A failed sibling never aborts the others (they all ran to
                // completion above), but it does fail the task.
                let mut results = Vec::with_capacity(chunk_results.len());
                for result in chunk_results {
                    results.push(result?);
                }

                geo_recombiner.recombine(&task, &time_chunk, results)
            }
        })
        .buffer_unordered(ctx.config.processing.time_concurrency)
        .collect()
        .await;

    // All-empty time chunks are recoverable: they drop out of the temporal
    // merge. Anything else is terminal.
    let mut combined = Vec::new();
    for result in group_results {
        match result {
            Ok(c) => combined.push(c),
            Err(e @ PipelineError::AllEmptyGroup { .. }) => {
                tracing::warn!("{}", e);
                metrics.add_failure();
            }
            Err(e) => return Err(e),
        }
    }
    if combined.is_empty() {
        return Err(PipelineError::Validation(
            "no data intersected any chunk of this task".to_string(),
        ));
    }

    let temporal_recombiner = TemporalRecombiner::new(
        analysis.clone(),
        artifacts.clone(),
        metrics.clone(),
        preview_range,
    );
    let final_result = temporal_recombiner.recombine(&task, combined)?;

    let finalizer = ProductFinalizer::new(
        analysis,
        ctx.store.clone(),
        artifacts,
        metrics,
        preview_range,
    );
    finalizer.finalize(&task, final_result).await
}

/// Build a Tokio runtime with the specified configuration.
pub fn build_runtime(worker_threads: Option<usize>) -> anyhow::Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();

    if let Some(threads) = worker_threads {
        builder.worker_threads(threads);
    }

    builder.enable_all();

    Ok(builder.build()?)
}

/// Initialize the Rayon thread pool.
pub fn init_rayon(threads: Option<usize>) -> anyhow::Result<()> {
    if let Some(threads) = threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()?;
    }
    Ok(())
}
