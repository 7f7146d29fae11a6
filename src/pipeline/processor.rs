//! Per-chunk processing.
//!
//! One processor instance serves every (geographic, temporal) unit of a
//! task. Batch units compare two period composites; iterative units fold
//! each scene of their window into a running accumulator. A unit that
//! finds no data returns `None` — an empty chunk, not an error — and
//! leaves no artifact behind.

use crate::analysis::{AnalysisOps, ChunkMetadata, CLASSIFIED_BAND};
use crate::chunk::{GeographicChunk, TemporalChunk};
use crate::config::Config;
use crate::cube::{CleanMask, RasterCube, RunningAccumulator};
use crate::error::Result;
use crate::io::ArtifactStore;
use crate::pipeline::Metrics;
use crate::source::{AcquisitionQuery, DataSource};
use crate::task::{AnalysisTask, AnimationMode, ProcessingMode, TaskStore};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Output of one processed unit. `None` at the call site signals an empty
/// chunk instead.
#[derive(Debug, Clone)]
pub struct ChunkResult {
    pub artifact: PathBuf,
    pub metadata: ChunkMetadata,
    pub geo_chunk: usize,
    pub time_chunk: usize,
}

/// Processor for individual (geographic, temporal) units.
pub struct ChunkProcessor {
    source: Arc<dyn DataSource>,
    analysis: Arc<dyn AnalysisOps>,
    store: Arc<dyn TaskStore>,
    artifacts: ArtifactStore,
    metrics: Arc<Metrics>,
    config: Arc<Config>,
}

impl ChunkProcessor {
    pub fn new(
        source: Arc<dyn DataSource>,
        analysis: Arc<dyn AnalysisOps>,
        store: Arc<dyn TaskStore>,
        artifacts: ArtifactStore,
        metrics: Arc<Metrics>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            source,
            analysis,
            store,
            artifacts,
            metrics,
            config,
        }
    }

    /// Process a single unit. Re-execution with the same inputs overwrites
    /// the same deterministically named artifact with the same bytes, so
    /// redelivery under at-least-once semantics is harmless.
    pub async fn process(
        &self,
        task: &AnalysisTask,
        geo_chunk: &GeographicChunk,
        time_chunk: &TemporalChunk,
    ) -> Result<Option<ChunkResult>> {
        tracing::info!(
            geo = geo_chunk.index,
            time = time_chunk.index(),
            "starting chunk"
        );

        let result = match (task.processing_mode, time_chunk) {
            (ProcessingMode::Batch, TemporalChunk::Pair { anchor, comparison, index }) => {
                self.process_batch(task, geo_chunk, *index, anchor, comparison)
                    .await?
            }
            (ProcessingMode::Iterative, TemporalChunk::Window { dates, index }) => {
                self.process_iterative(task, geo_chunk, *index, dates).await?
            }
            _ => {
                return Err(crate::error::PipelineError::Validation(format!(
                    "temporal chunk {} does not match processing mode",
                    time_chunk.index()
                )))
            }
        };

        match &result {
            Some(_) => self.metrics.add_chunk_processed(),
            None => self.metrics.add_chunk_skipped(),
        }
        tracing::info!(
            geo = geo_chunk.index,
            time = time_chunk.index(),
            empty = result.is_none(),
            "done with chunk"
        );
        Ok(result)
    }

    /// Process a unit, retrying transient failures with exponential
    /// backoff. Stands in for queue redelivery in single-process runs.
    pub async fn process_with_retry(
        &self,
        task: &AnalysisTask,
        geo_chunk: &GeographicChunk,
        time_chunk: &TemporalChunk,
    ) -> Result<Option<ChunkResult>> {
        let retry = &self.config.processing.retry;
        let mut attempt = 0;
        let mut backoff = retry.initial_backoff_ms;

        loop {
            match self.process(task, geo_chunk, time_chunk).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    attempt += 1;
                    if attempt >= retry.max_retries {
                        tracing::error!(
                            geo = geo_chunk.index,
                            time = time_chunk.index(),
                            "chunk failed after {} attempts: {}",
                            attempt,
                            e
                        );
                        self.metrics.add_failure();
                        return Err(e);
                    }

                    tracing::warn!(
                        geo = geo_chunk.index,
                        time = time_chunk.index(),
                        "chunk attempt {} failed: {}, retrying in {}ms",
                        attempt,
                        e,
                        backoff
                    );
                    tokio::time::sleep(std::time::Duration::from_millis(backoff)).await;
                    backoff = (backoff * 2).min(retry.max_backoff_ms);
                }
            }
        }
    }

    async fn process_batch(
        &self,
        task: &AnalysisTask,
        geo_chunk: &GeographicChunk,
        time_index: usize,
        anchor: &[DateTime<Utc>],
        comparison: &[DateTime<Utc>],
    ) -> Result<Option<ChunkResult>> {
        let Some((anchor_cube, anchor_clean)) =
            self.fetch_period(task, geo_chunk, anchor).await?
        else {
            return Ok(None);
        };
        let Some((cmp_cube, cmp_clean)) =
            self.fetch_period(task, geo_chunk, comparison).await?
        else {
            return Ok(None);
        };

        let mut metadata = self.analysis.chunk_metadata(&anchor_cube, &anchor_clean);
        metadata.merge_additive(&self.analysis.chunk_metadata(&cmp_cube, &cmp_clean));

        let analysis_start = Instant::now();
        let older = self.analysis.composite(&anchor_cube, &anchor_clean)?;
        let newer = self.analysis.composite(&cmp_cube, &cmp_clean)?;
        let product = self.analysis.diff(&older, &newer)?;
        self.metrics.add_analysis_time(analysis_start.elapsed());
        self.metrics
            .add_scenes_analyzed((anchor_cube.num_scenes() + cmp_cube.num_scenes()) as u64);

        let artifact = self.artifacts.chunk_path(geo_chunk.index, time_index);
        let write_start = Instant::now();
        self.artifacts.write_slab(&artifact, &product)?;
        self.metrics.add_write_time(write_start.elapsed());

        self.store
            .increment_scenes_processed(task.id, 1)
            .await?;

        Ok(Some(ChunkResult {
            artifact,
            metadata,
            geo_chunk: geo_chunk.index,
            time_chunk: time_index,
        }))
    }

    async fn process_iterative(
        &self,
        task: &AnalysisTask,
        geo_chunk: &GeographicChunk,
        time_index: usize,
        dates: &[DateTime<Utc>],
    ) -> Result<Option<ChunkResult>> {
        let base_step = time_index * task.temporal_chunk_size.max(1);
        let mut accumulator: Option<RunningAccumulator> = None;
        let mut metadata = ChunkMetadata::default();

        for (step, date) in dates.iter().enumerate() {
            let Some((cube, clean)) =
                self.fetch_period(task, geo_chunk, std::slice::from_ref(date)).await?
            else {
                tracing::debug!(
                    geo = geo_chunk.index,
                    time = time_index,
                    step,
                    "no data for step, skipping"
                );
                continue;
            };

            let analysis_start = Instant::now();
            let classified = self.analysis.classify(&cube, &clean)?;
            let folded = RunningAccumulator::ingest_scene(
                accumulator.take(),
                &classified,
                &clean,
                CLASSIFIED_BAND,
            )?;
            self.metrics.add_analysis_time(analysis_start.elapsed());
            self.metrics.add_scenes_analyzed(cube.num_scenes() as u64);

            metadata.merge_additive(&self.analysis.chunk_metadata(&cube, &clean));

            if task.animation_mode.is_enabled() {
                let snapshot = match task.animation_mode {
                    AnimationMode::PerScene => classified.slice_scene(0)?,
                    // Accumulator state after folding this step.
                    _ => folded.to_slab(),
                };
                let path = self
                    .artifacts
                    .animation_step_geo_path(geo_chunk.index, base_step + step);
                self.artifacts.write_slab(&path, &snapshot)?;
            }
            accumulator = Some(folded);

            self.store
                .increment_scenes_processed(task.id, 1)
                .await?;
        }

        let Some(accumulator) = accumulator else {
            return Ok(None);
        };

        let artifact = self.artifacts.chunk_path(geo_chunk.index, time_index);
        let write_start = Instant::now();
        self.artifacts.write_slab(&artifact, &accumulator.to_slab())?;
        self.metrics.add_write_time(write_start.elapsed());

        Ok(Some(ChunkResult {
            artifact,
            metadata,
            geo_chunk: geo_chunk.index,
            time_chunk: time_index,
        }))
    }

    /// Fetch the cube covering a set of dates, with its clean mask.
    /// Returns `None` when the source has nothing for this extent/range.
    async fn fetch_period(
        &self,
        task: &AnalysisTask,
        geo_chunk: &GeographicChunk,
        dates: &[DateTime<Utc>],
    ) -> Result<Option<(RasterCube, CleanMask)>> {
        let Some((start, end)) = range_containing(dates) else {
            return Ok(None);
        };

        let query = AcquisitionQuery {
            platform: task.platform.clone(),
            product: task.product.clone(),
            extent: geo_chunk.bounds,
            time_start: start,
            time_end: end,
            measurements: task.measurements.clone(),
        };

        let fetch_start = Instant::now();
        let cube = self.source.fetch_dataset(&query).await?;
        self.metrics.add_fetch_time(fetch_start.elapsed());

        let Some(cube) = cube else {
            return Ok(None);
        };
        if cube.num_scenes() == 0 {
            return Ok(None);
        }

        let clean = CleanMask::for_cube(&cube)?;
        Ok(Some((cube, clean)))
    }
}

/// Smallest closed range containing every date, padded by a microsecond on
/// each side so boundary acquisitions are included.
fn range_containing(dates: &[DateTime<Utc>]) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let min = dates.iter().min()?;
    let max = dates.iter().max()?;
    Some((
        *min - ChronoDuration::microseconds(1),
        *max + ChronoDuration::microseconds(1),
    ))
}
