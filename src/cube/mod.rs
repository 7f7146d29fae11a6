//! Raster data model: bounding boxes, acquisition cubes and 2-D slabs.
//!
//! Two array types flow through the pipeline:
//!
//! - [`RasterCube`]: time-stacked acquisition data as fetched from the
//!   data source, one `(time, height, width)` array per measurement band.
//! - [`RasterSlab`]: a 2-D product (chunk artifact, recombined mosaic,
//!   running accumulator, final product), one `(height, width)` array per
//!   band. Slabs are serializable and are the on-disk artifact type.
//!
//! ## Coordinate convention
//!
//! Bounds are WGS84 `[min_lon, min_lat, max_lon, max_lat]`; row 0 of every
//! array is at `max_y` (top-down), matching the output convention of the
//! rendered products.

mod combine;
mod accumulate;

pub use accumulate::RunningAccumulator;
pub use combine::combine_geographic_slabs;

use crate::error::{PipelineError, Result};
use chrono::{DateTime, Utc};
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A geographic bounding box in WGS84 degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Width in coordinate units.
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    /// Height in coordinate units.
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Check if this bbox intersects another.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_x < other.max_x
            && self.max_x > other.min_x
            && self.min_y < other.max_y
            && self.max_y > other.min_y
    }

    /// Compute the intersection of two bounding boxes.
    pub fn intersection(&self, other: &BoundingBox) -> Option<BoundingBox> {
        if !self.intersects(other) {
            return None;
        }
        Some(BoundingBox {
            min_x: self.min_x.max(other.min_x),
            min_y: self.min_y.max(other.min_y),
            max_x: self.max_x.min(other.max_x),
            max_y: self.max_y.min(other.max_y),
        })
    }

    /// Smallest box covering both inputs.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }
}

/// Time-stacked acquisition data for one extent.
#[derive(Debug, Clone)]
pub struct RasterCube {
    /// Acquisition timestamps, one per time slice, ascending.
    pub times: Vec<DateTime<Utc>>,

    /// Band name -> (time, height, width) values.
    pub bands: BTreeMap<String, Array3<f64>>,

    /// Extent covered by the arrays.
    pub bounds: BoundingBox,

    /// Pixel size in degrees.
    pub resolution: f64,
}

impl RasterCube {
    /// Pixel dimensions (height, width). Empty cubes report (0, 0).
    pub fn shape(&self) -> (usize, usize) {
        self.bands
            .values()
            .next()
            .map(|a| {
                let d = a.dim();
                (d.1, d.2)
            })
            .unwrap_or((0, 0))
    }

    pub fn num_scenes(&self) -> usize {
        self.times.len()
    }

    pub fn band(&self, name: &str) -> Result<&Array3<f64>> {
        self.bands
            .get(name)
            .ok_or_else(|| PipelineError::ShapeMismatch(format!("missing band '{}'", name)))
    }

    /// Extract one time slice of every band as a slab.
    pub fn slice_scene(&self, time_idx: usize) -> Result<RasterSlab> {
        if time_idx >= self.times.len() {
            return Err(PipelineError::ShapeMismatch(format!(
                "scene index {} out of range ({} scenes)",
                time_idx,
                self.times.len()
            )));
        }
        let mut bands = BTreeMap::new();
        for (name, values) in &self.bands {
            bands.insert(
                name.clone(),
                values.index_axis(ndarray::Axis(0), time_idx).to_owned(),
            );
        }
        Ok(RasterSlab {
            bands,
            bounds: self.bounds,
            resolution: self.resolution,
        })
    }
}

/// A 2-D raster product over one extent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RasterSlab {
    /// Band name -> (height, width) values. NaN marks nodata.
    pub bands: BTreeMap<String, Array2<f64>>,

    pub bounds: BoundingBox,

    /// Pixel size in degrees.
    pub resolution: f64,
}

impl RasterSlab {
    /// Pixel dimensions (height, width).
    pub fn shape(&self) -> (usize, usize) {
        self.bands
            .values()
            .next()
            .map(|a| a.dim())
            .unwrap_or((0, 0))
    }

    pub fn band(&self, name: &str) -> Result<&Array2<f64>> {
        self.bands
            .get(name)
            .ok_or_else(|| PipelineError::ShapeMismatch(format!("missing band '{}'", name)))
    }

    pub fn band_names(&self) -> Vec<String> {
        self.bands.keys().cloned().collect()
    }

    /// Per-band (min, max, mean) over finite pixels.
    pub fn band_statistics(&self) -> BTreeMap<String, BandStatistics> {
        let mut stats = BTreeMap::new();
        for (name, values) in &self.bands {
            let mut min = f64::INFINITY;
            let mut max = f64::NEG_INFINITY;
            let mut sum = 0.0;
            let mut count = 0u64;
            for &v in values.iter() {
                if v.is_finite() {
                    min = min.min(v);
                    max = max.max(v);
                    sum += v;
                    count += 1;
                }
            }
            stats.insert(
                name.clone(),
                BandStatistics {
                    min: if count > 0 { min } else { f64::NAN },
                    max: if count > 0 { max } else { f64::NAN },
                    mean: if count > 0 { sum / count as f64 } else { f64::NAN },
                    valid_pixels: count,
                },
            );
        }
        stats
    }
}

/// Summary statistics for a single band.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BandStatistics {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub valid_pixels: u64,
}

/// Per-pixel usable-observation mask aligned with a cube.
#[derive(Debug, Clone)]
pub struct CleanMask {
    pub values: Array3<bool>,
}

impl CleanMask {
    /// Build a mask from a quality band, treating a pixel as clean when
    /// any of the given bit positions is set. Landsat-style `pixel_qa`
    /// encodes clear land as bit 1 and water as bit 2.
    pub fn from_quality_band(quality: &Array3<f64>, bits: &[u32]) -> Self {
        let values = quality.mapv(|v| {
            if !v.is_finite() || v < 0.0 {
                return false;
            }
            let q = v as u64;
            bits.iter().any(|&b| q & (1 << b) != 0)
        });
        Self { values }
    }

    /// Mask from a cube's `pixel_qa` band with the default clear bits.
    pub fn for_cube(cube: &RasterCube) -> Result<Self> {
        Ok(Self::from_quality_band(cube.band("pixel_qa")?, &[1, 2]))
    }

    /// Count of clean observations across all scenes.
    pub fn clean_count(&self) -> u64 {
        self.values.iter().filter(|&&c| c).count() as u64
    }

    pub fn total_count(&self) -> u64 {
        self.values.len() as u64
    }
}
