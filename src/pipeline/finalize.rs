//! Final product assembly and the terminal task transition.

use crate::analysis::AnalysisOps;
use crate::error::Result;
use crate::io::{self, ArtifactStore};
use crate::pipeline::{CombinedResult, Metrics};
use crate::task::{AnalysisTask, TaskOutputs, TaskStatus, TaskStore};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Seconds each animation frame is displayed.
const FRAME_DURATION: Duration = Duration::from_secs(1);

/// Converts the final combined artifact into every deliverable format,
/// assembles the animation, marks the task complete and releases the
/// task's temporary storage.
pub struct ProductFinalizer {
    analysis: Arc<dyn AnalysisOps>,
    store: Arc<dyn TaskStore>,
    artifacts: ArtifactStore,
    metrics: Arc<Metrics>,
    preview_range: (f64, f64),
}

impl ProductFinalizer {
    pub fn new(
        analysis: Arc<dyn AnalysisOps>,
        store: Arc<dyn TaskStore>,
        artifacts: ArtifactStore,
        metrics: Arc<Metrics>,
        preview_range: (f64, f64),
    ) -> Self {
        Self {
            analysis,
            store,
            artifacts,
            metrics,
            preview_range,
        }
    }

    /// Write all products and perform the single terminal transition on
    /// the success path.
    pub async fn finalize(&self, task: &AnalysisTask, combined: CombinedResult) -> Result<()> {
        tracing::info!(task = %task.id, "creating output products");
        let write_start = Instant::now();

        let slab = self.artifacts.read_slab(&combined.artifact)?;
        let stats = slab.band_statistics();
        let bounds = slab.bounds;

        let results = self.artifacts.results_dir().to_path_buf();
        let mut outputs = TaskOutputs::default();

        // Native serialization of the full product.
        let native = results.join("data_native.bin");
        self.artifacts.write_slab(&native, &slab)?;
        outputs.native_path = Some(native.display().to_string());

        // Georeferenced raster with every band.
        let geotiff = results.join("data.tif");
        io::write_geotiff(&geotiff, &slab, &slab.band_names())?;
        outputs.geotiff_path = Some(geotiff.display().to_string());

        // True-color preview when the product carries the RGB triple.
        if let Some(bands) = self.analysis.preview_bands() {
            if bands.iter().all(|b| slab.bands.contains_key(*b)) {
                let path = results.join("mosaic.png");
                io::write_png(&path, &slab, bands, self.preview_range)?;
                outputs.preview_paths.push(path.display().to_string());
            }
        }

        // Colorized previews for the derived bands.
        for band in self.analysis.derived_bands().iter().copied() {
            if !slab.bands.contains_key(band) {
                continue;
            }
            let max_hint = stats.get(band).map(|s| s.max).unwrap_or(1.0);
            let scale = io::default_scale_for(band, max_hint);
            let path = results.join(format!("{}.png", band));
            io::write_single_band_png(&path, &slab, band, &scale, [0, 0, 0, 0])?;
            outputs.preview_paths.push(path.display().to_string());
        }

        // Animation: every rendered frame in ascending step order; steps
        // that never produced a frame are skipped.
        if task.animation_mode.is_enabled() {
            let frames: Vec<_> = (0..combined.num_steps)
                .map(|step| self.artifacts.animation_frame_path(step))
                .filter(|p| p.exists())
                .collect();
            if !frames.is_empty() {
                let path = results.join("animation.gif");
                io::assemble_animation(&path, &frames, FRAME_DURATION)?;
                outputs.animation_path = Some(path.display().to_string());
            } else {
                tracing::warn!(task = %task.id, "animation requested but no frames were rendered");
            }
        }

        self.metrics.add_write_time(write_start.elapsed());

        for (band, stat) in &stats {
            tracing::debug!(
                band,
                min = stat.min,
                max = stat.max,
                mean = stat.mean,
                "final band statistics"
            );
        }

        self.store.set_outputs(task.id, outputs).await?;
        self.store.record_metadata(task.id, combined.metadata).await?;
        self.store.record_completion(task.id, bounds).await?;
        self.store
            .update_status(
                task.id,
                TaskStatus::Ok,
                "All products have been generated. Your result will be loaded on the map.",
            )
            .await?;

        self.artifacts.remove_temp()?;
        tracing::info!(task = %task.id, "all products created");
        Ok(())
    }
}
