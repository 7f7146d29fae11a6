//! Running accumulation of per-scene classification results.

use crate::cube::{BoundingBox, CleanMask, RasterCube, RasterSlab};
use crate::error::{PipelineError, Result};
use ndarray::Array2;
use std::collections::BTreeMap;

/// Band carrying the per-pixel sum of positive observations.
pub const TOTAL_DATA: &str = "total_data";
/// Band carrying the per-pixel sum of usable observations.
pub const TOTAL_CLEAN: &str = "total_clean";
/// Derived ratio band, recomputed after every fold.
pub const NORMALIZED_DATA: &str = "normalized_data";

/// Cumulative per-pixel observation counters with a derived ratio.
///
/// Created on the first contribution, folded for every subsequent scene or
/// sibling accumulator, consumed by the finalizer. Both fold operations
/// are plain per-pixel sums, so merging is commutative; only presentation
/// (animation frame numbering) cares about order.
#[derive(Debug, Clone)]
pub struct RunningAccumulator {
    total_data: Array2<f64>,
    total_clean: Array2<f64>,
    bounds: BoundingBox,
    resolution: f64,
}

impl RunningAccumulator {
    /// Fold one classified scene cube into the accumulator, creating it on
    /// the first contribution. `value_band` holds the per-observation
    /// classification (e.g. water = 1.0, dry = 0.0) and is only counted
    /// where the clean mask marks the observation usable.
    pub fn ingest_scene(
        previous: Option<RunningAccumulator>,
        classified: &RasterCube,
        clean: &CleanMask,
        value_band: &str,
    ) -> Result<RunningAccumulator> {
        let values = classified.band(value_band)?;
        let (scenes, height, width) = values.dim();
        if clean.values.dim() != (scenes, height, width) {
            return Err(PipelineError::ShapeMismatch(format!(
                "clean mask {:?} does not match cube {:?}",
                clean.values.dim(),
                values.dim()
            )));
        }

        let mut acc = match previous {
            Some(acc) => {
                if acc.total_data.dim() != (height, width) {
                    return Err(PipelineError::ShapeMismatch(format!(
                        "accumulator {:?} does not match cube ({}, {})",
                        acc.total_data.dim(),
                        height,
                        width
                    )));
                }
                acc
            }
            None => RunningAccumulator {
                total_data: Array2::zeros((height, width)),
                total_clean: Array2::zeros((height, width)),
                bounds: classified.bounds,
                resolution: classified.resolution,
            },
        };

        for t in 0..scenes {
            for row in 0..height {
                for col in 0..width {
                    if !clean.values[[t, row, col]] {
                        continue;
                    }
                    let v = values[[t, row, col]];
                    if v.is_finite() {
                        acc.total_data[[row, col]] += v;
                        acc.total_clean[[row, col]] += 1.0;
                    }
                }
            }
        }

        Ok(acc)
    }

    /// Add another accumulator's counters into this one.
    pub fn merge(&mut self, other: &RunningAccumulator) -> Result<()> {
        if self.total_data.dim() != other.total_data.dim() {
            return Err(PipelineError::ShapeMismatch(format!(
                "accumulator shapes differ: {:?} vs {:?}",
                self.total_data.dim(),
                other.total_data.dim()
            )));
        }
        self.total_data += &other.total_data;
        self.total_clean += &other.total_clean;
        self.bounds = self.bounds.union(&other.bounds);
        Ok(())
    }

    /// Materialize the accumulator as a slab with the derived ratio band.
    pub fn to_slab(&self) -> RasterSlab {
        let normalized = ndarray::Zip::from(&self.total_data)
            .and(&self.total_clean)
            .map_collect(|&d, &c| if c > 0.0 { d / c } else { f64::NAN });

        let mut bands = BTreeMap::new();
        bands.insert(TOTAL_DATA.to_string(), self.total_data.clone());
        bands.insert(TOTAL_CLEAN.to_string(), self.total_clean.clone());
        bands.insert(NORMALIZED_DATA.to_string(), normalized);
        RasterSlab {
            bands,
            bounds: self.bounds,
            resolution: self.resolution,
        }
    }

    /// Rebuild an accumulator from a previously materialized slab.
    pub fn from_slab(slab: &RasterSlab) -> Result<RunningAccumulator> {
        Ok(RunningAccumulator {
            total_data: slab.band(TOTAL_DATA)?.clone(),
            total_clean: slab.band(TOTAL_CLEAN)?.clone(),
            bounds: slab.bounds,
            resolution: slab.resolution,
        })
    }

    pub fn has_data(&self) -> bool {
        self.total_clean.iter().any(|&c| c > 0.0)
    }
}
