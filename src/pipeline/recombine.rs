//! The two fan-in stages: geographic recombination per time chunk, then
//! temporal recombination across time chunks.
//!
//! Geographic recombination merges metadata with the additive, commutative
//! combiner because sibling completion order is not guaranteed; temporal
//! recombination merges key-wise with later chunks overwriting earlier
//! ones. The asymmetry is intentional and matches the metadata keying
//! (time chunks report disjoint period keys).

use crate::analysis::{AnalysisOps, ChunkMetadata};
use crate::chunk::TemporalChunk;
use crate::cube::{combine_geographic_slabs, RasterSlab, RunningAccumulator};
use crate::error::{PipelineError, Result};
use crate::io::{self, ArtifactStore};
use crate::pipeline::{ChunkResult, Metrics};
use crate::task::{AnalysisTask, AnimationMode, ProcessingMode};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// A merge of several chunk results: one time chunk's mosaic after
/// geographic recombination, or the whole task after temporal
/// recombination.
#[derive(Debug, Clone)]
pub struct CombinedResult {
    pub artifact: PathBuf,
    pub metadata: ChunkMetadata,
    pub time_chunk: usize,
    /// First global animation step covered by this result.
    pub base_step: usize,
    /// Number of animation steps covered.
    pub num_steps: usize,
}

/// Fan-in barrier over the geographic siblings of one time chunk.
pub struct GeographicRecombiner {
    analysis: Arc<dyn AnalysisOps>,
    artifacts: ArtifactStore,
    metrics: Arc<Metrics>,
    /// Value range for RGB frame rendering.
    preview_range: (f64, f64),
}

impl GeographicRecombiner {
    pub fn new(
        analysis: Arc<dyn AnalysisOps>,
        artifacts: ArtifactStore,
        metrics: Arc<Metrics>,
        preview_range: (f64, f64),
    ) -> Self {
        Self {
            analysis,
            artifacts,
            metrics,
            preview_range,
        }
    }

    /// Merge all sibling results of one time chunk into a single mosaic.
    ///
    /// Empty siblings (`None`) are filtered out; a group with no
    /// surviving sibling is the explicit [`PipelineError::AllEmptyGroup`]
    /// condition, which aborts this time chunk but not the task's other
    /// time chunks.
    pub fn recombine(
        &self,
        task: &AnalysisTask,
        time_chunk: &TemporalChunk,
        results: Vec<Option<ChunkResult>>,
    ) -> Result<CombinedResult> {
        let time_index = time_chunk.index();
        let survivors: Vec<ChunkResult> = results.into_iter().flatten().collect();
        if survivors.is_empty() {
            return Err(PipelineError::AllEmptyGroup {
                time_chunk: time_index,
            });
        }

        tracing::info!(
            time = time_index,
            chunks = survivors.len(),
            "recombining geographic chunks"
        );

        let combine_start = Instant::now();
        let mut metadata = ChunkMetadata::default();
        let mut slabs = Vec::with_capacity(survivors.len());
        for result in &survivors {
            metadata.merge_additive(&result.metadata);
            slabs.push(self.artifacts.read_slab(&result.artifact)?);
        }
        let combined = combine_geographic_slabs(&slabs)?;
        self.metrics.add_combine_time(combine_start.elapsed());

        let base_step = time_index * task.scenes_per_time_chunk();
        if task.animation_mode.is_enabled() {
            self.combine_animation_steps(task, time_chunk, &survivors, &combined)?;
        }

        let artifact = self.artifacts.recombined_geo_path(time_index);
        self.artifacts.write_slab(&artifact, &combined)?;
        tracing::info!(time = time_index, "done combining geographic chunks");

        Ok(CombinedResult {
            artifact,
            metadata,
            time_chunk: time_index,
            base_step,
            num_steps: time_chunk.num_steps(),
        })
    }

    /// Stitch each animated step's per-geo-chunk artifacts and render the
    /// frames that do not depend on cross-time-chunk state. A geo chunk
    /// that yielded nothing for a step simply does not contribute.
    fn combine_animation_steps(
        &self,
        task: &AnalysisTask,
        time_chunk: &TemporalChunk,
        survivors: &[ChunkResult],
        combined: &RasterSlab,
    ) -> Result<()> {
        let time_index = time_chunk.index();

        match task.processing_mode {
            ProcessingMode::Batch => {
                // One frame per comparison period, rendered from the
                // combined product directly.
                let frame = self.artifacts.animation_frame_path(time_index);
                self.render_frame(&frame, combined)?;
            }
            ProcessingMode::Iterative => {
                let base_step = time_index * task.scenes_per_time_chunk();
                for step in 0..time_chunk.num_steps() {
                    let global_step = base_step + step;
                    let mut step_slabs = Vec::new();
                    for result in survivors {
                        let path = self
                            .artifacts
                            .animation_step_geo_path(result.geo_chunk, global_step);
                        if path.exists() {
                            step_slabs.push(self.artifacts.read_slab(&path)?);
                        }
                    }
                    if step_slabs.is_empty() {
                        continue;
                    }
                    let step_combined = combine_geographic_slabs(&step_slabs)?;
                    self.artifacts.write_slab(
                        &self.artifacts.animation_step_path(global_step),
                        &step_combined,
                    )?;

                    // RunningState frames need totals from earlier time
                    // chunks and are rendered during the temporal fold.
                    if task.animation_mode == AnimationMode::PerScene {
                        let frame = self.artifacts.animation_frame_path(global_step);
                        self.render_frame(&frame, &step_combined)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn render_frame(&self, path: &std::path::Path, slab: &RasterSlab) -> Result<()> {
        render_slab_frame(
            path,
            slab,
            self.analysis.as_ref(),
            self.preview_range,
        )
    }
}

/// Render one frame from a slab: the analysis's RGB triple when the slab
/// carries it, otherwise its first derived band through a color scale.
fn render_slab_frame(
    path: &std::path::Path,
    slab: &RasterSlab,
    analysis: &dyn AnalysisOps,
    preview_range: (f64, f64),
) -> Result<()> {
    if let Some(bands) = analysis.preview_bands() {
        if bands.iter().all(|b| slab.bands.contains_key(*b)) {
            return io::write_png(path, slab, bands, preview_range);
        }
    }

    let band = analysis
        .derived_bands()
        .iter()
        .find(|b| slab.bands.contains_key(**b))
        .copied()
        .or_else(|| slab.bands.keys().next().map(|s| s.as_str()))
        .ok_or_else(|| PipelineError::RasterWrite("slab has no bands".to_string()))?;

    let scale = io::default_scale_for(band, 1.0);
    io::write_single_band_png(path, slab, band, &scale, [0, 0, 0, 0])
}

/// Fan-in barrier over all time chunks of a task.
pub struct TemporalRecombiner {
    analysis: Arc<dyn AnalysisOps>,
    artifacts: ArtifactStore,
    metrics: Arc<Metrics>,
    preview_range: (f64, f64),
}

impl TemporalRecombiner {
    pub fn new(
        analysis: Arc<dyn AnalysisOps>,
        artifacts: ArtifactStore,
        metrics: Arc<Metrics>,
        preview_range: (f64, f64),
    ) -> Self {
        Self {
            analysis,
            artifacts,
            metrics,
            preview_range,
        }
    }

    /// Merge geographically recombined results across time chunks.
    ///
    /// Inputs are sorted by time-chunk index before merging, regardless of
    /// arrival order. Batch mode keeps the last chunk's artifact (each
    /// comparison is independently a full answer); iterative mode folds
    /// the accumulators in ascending order.
    pub fn recombine(
        &self,
        task: &AnalysisTask,
        mut results: Vec<CombinedResult>,
    ) -> Result<CombinedResult> {
        if results.is_empty() {
            return Err(PipelineError::Validation(
                "no time chunks survived recombination".to_string(),
            ));
        }
        results.sort_by_key(|r| r.time_chunk);

        tracing::info!(chunks = results.len(), "recombining time chunks");
        let combine_start = Instant::now();

        let combined = match task.processing_mode {
            ProcessingMode::Batch => self.recombine_batch(&results)?,
            ProcessingMode::Iterative => self.recombine_iterative(task, &results)?,
        };

        self.metrics.add_combine_time(combine_start.elapsed());
        tracing::info!("done combining time chunks");
        Ok(combined)
    }

    fn recombine_batch(&self, results: &[CombinedResult]) -> Result<CombinedResult> {
        let mut metadata = ChunkMetadata::default();
        for result in results {
            metadata.merge_overwrite(&result.metadata);
        }

        // Every comparison against the anchor is a standalone answer; the
        // caller wants the final one. Earlier chunks already contributed
        // their animation frames.
        let last = &results[results.len() - 1];
        let slab = self.artifacts.read_slab(&last.artifact)?;
        let artifact = self.artifacts.recombined_time_path();
        self.artifacts.write_slab(&artifact, &slab)?;

        Ok(CombinedResult {
            artifact,
            metadata,
            time_chunk: last.time_chunk,
            base_step: 0,
            // Frame indices follow time-chunk indices, which may have gaps
            // when a group came up all-empty.
            num_steps: last.time_chunk + 1,
        })
    }

    fn recombine_iterative(
        &self,
        task: &AnalysisTask,
        results: &[CombinedResult],
    ) -> Result<CombinedResult> {
        let mut metadata = ChunkMetadata::default();
        let mut running: Option<RunningAccumulator> = None;
        let mut total_steps = 0;

        for result in results {
            metadata.merge_overwrite(&result.metadata);

            if task.animation_mode == AnimationMode::RunningState {
                self.render_running_frames(result, running.as_ref())?;
            }

            let slab = self.artifacts.read_slab(&result.artifact)?;
            let chunk_acc = RunningAccumulator::from_slab(&slab)?;
            match running.as_mut() {
                Some(acc) => acc.merge(&chunk_acc)?,
                None => running = Some(chunk_acc),
            }
            total_steps = total_steps.max(result.base_step + result.num_steps);
        }

        let running = running.ok_or_else(|| {
            PipelineError::Validation("no accumulator contributions across time chunks".to_string())
        })?;

        let artifact = self.artifacts.recombined_time_path();
        self.artifacts.write_slab(&artifact, &running.to_slab())?;

        Ok(CombinedResult {
            artifact,
            metadata,
            time_chunk: results[results.len() - 1].time_chunk,
            base_step: 0,
            num_steps: total_steps,
        })
    }

    /// Render this time chunk's step frames, folding in the totals of all
    /// earlier time chunks so each frame reflects the accumulator after
    /// its step. Steps with no stitched artifact are skipped.
    fn render_running_frames(
        &self,
        result: &CombinedResult,
        prior: Option<&RunningAccumulator>,
    ) -> Result<()> {
        for step in result.base_step..result.base_step + result.num_steps {
            let step_path = self.artifacts.animation_step_path(step);
            if !step_path.exists() {
                continue;
            }
            let snapshot = self.artifacts.read_slab(&step_path)?;
            let frame_slab = match prior {
                Some(prior) => {
                    let mut acc = RunningAccumulator::from_slab(&snapshot)?;
                    acc.merge(prior)?;
                    acc.to_slab()
                }
                None => snapshot,
            };
            render_slab_frame(
                &self.artifacts.animation_frame_path(step),
                &frame_slab,
                self.analysis.as_ref(),
                self.preview_range,
            )?;
        }
        Ok(())
    }
}
