//! Analysis plug points, chunk metadata, and the built-in analyses.
//!
//! The pipeline treats analyses as opaque operations over raster cubes:
//! `composite` and `diff` drive batch mode, `classify` drives iterative
//! mode. The two built-ins carry deliberately small numerics — the
//! pipeline around them is the subject of this crate, not the science.

use crate::cube::{CleanMask, RasterCube, RasterSlab};
use crate::error::{PipelineError, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Band written by iterative classification.
pub const CLASSIFIED_BAND: &str = "water";

/// Per-period partial metadata reported by chunk workers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeriodMetadata {
    pub clean_pixels: u64,
    pub total_pixels: u64,
    pub acquisitions: BTreeSet<String>,
}

impl PeriodMetadata {
    fn add(&mut self, other: &PeriodMetadata) {
        self.clean_pixels += other.clean_pixels;
        self.total_pixels += other.total_pixels;
        self.acquisitions
            .extend(other.acquisitions.iter().cloned());
    }
}

/// Metadata accumulated along the pipeline, keyed by acquisition date
/// label. Two merge policies exist on purpose: geographic recombination
/// sums (commutative, safe under unordered sibling completion), temporal
/// recombination overwrites key-wise (time chunks report disjoint keys).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub periods: BTreeMap<String, PeriodMetadata>,
}

impl ChunkMetadata {
    /// Commutative merge: counters sum, acquisition sets union.
    pub fn merge_additive(&mut self, other: &ChunkMetadata) {
        for (key, period) in &other.periods {
            self.periods.entry(key.clone()).or_default().add(period);
        }
    }

    /// Later keys replace earlier ones on collision.
    pub fn merge_overwrite(&mut self, other: &ChunkMetadata) {
        for (key, period) in &other.periods {
            self.periods.insert(key.clone(), period.clone());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
    }
}

/// Operations an analysis supplies to the pipeline.
pub trait AnalysisOps: Send + Sync {
    fn name(&self) -> &str;

    /// Collapse a cube into one cloud-free mosaic (batch mode).
    fn composite(&self, cube: &RasterCube, clean: &CleanMask) -> Result<RasterSlab>;

    /// Compare two composites (batch mode).
    fn diff(&self, older: &RasterSlab, newer: &RasterSlab) -> Result<RasterSlab>;

    /// Classify every observation in a cube (iterative mode). The result
    /// carries [`CLASSIFIED_BAND`].
    fn classify(&self, cube: &RasterCube, clean: &CleanMask) -> Result<RasterCube>;

    /// Partial metadata for one fetched cube. The pipeline forwards and
    /// merges this without interpreting it.
    fn chunk_metadata(&self, cube: &RasterCube, clean: &CleanMask) -> ChunkMetadata {
        let mut periods = BTreeMap::new();
        let (_, height, width) = clean.values.dim();
        for (t, time) in cube.times.iter().enumerate() {
            let mut clean_pixels = 0u64;
            for row in 0..height {
                for col in 0..width {
                    if clean.values[[t, row, col]] {
                        clean_pixels += 1;
                    }
                }
            }
            let mut acquisitions = BTreeSet::new();
            acquisitions.insert(time.to_rfc3339());
            periods.insert(
                time.format("%Y-%m-%d").to_string(),
                PeriodMetadata {
                    clean_pixels,
                    total_pixels: (height * width) as u64,
                    acquisitions,
                },
            );
        }
        ChunkMetadata { periods }
    }

    /// Derived bands rendered as single-band colorized previews.
    fn derived_bands(&self) -> &[&str];

    /// RGB triple for true-color previews, when the product carries one.
    fn preview_bands(&self) -> Option<[&'static str; 3]>;
}

/// Look up a registered analysis by the name stored on the task.
pub fn lookup(name: &str) -> Result<Arc<dyn AnalysisOps>> {
    match name {
        "coastal_change" => Ok(Arc::new(CoastalChange)),
        "water_detection" => Ok(Arc::new(WaterDetection)),
        other => Err(PipelineError::UnknownAnalysis(other.to_string())),
    }
}

/// NDWI water test on a pair of green/nir values.
fn ndwi_is_water(green: f64, nir: f64) -> bool {
    let denom = green + nir;
    denom > 0.0 && (green - nir) / denom > 0.0
}

/// Most-recent-clean-observation composite: iterate scenes in
/// chronological order and let the latest usable observation win.
fn most_recent_composite(cube: &RasterCube, clean: &CleanMask) -> Result<RasterSlab> {
    let (height, width) = cube.shape();
    let scenes = cube.num_scenes();

    let mut bands: BTreeMap<String, Array2<f64>> = BTreeMap::new();
    for (name, values) in &cube.bands {
        let mut out = Array2::from_elem((height, width), f64::NAN);
        for t in 0..scenes {
            for row in 0..height {
                for col in 0..width {
                    if clean.values[[t, row, col]] {
                        out[[row, col]] = values[[t, row, col]];
                    }
                }
            }
        }
        bands.insert(name.clone(), out);
    }

    Ok(RasterSlab {
        bands,
        bounds: cube.bounds,
        resolution: cube.resolution,
    })
}

/// Water mask for a composite slab.
fn water_mask(slab: &RasterSlab) -> Result<Array2<f64>> {
    let green = slab.band("green")?;
    let nir = slab.band("nir")?;
    Ok(ndarray::Zip::from(green)
        .and(nir)
        .map_collect(|&g, &n| {
            if !g.is_finite() || !n.is_finite() {
                f64::NAN
            } else if ndwi_is_water(g, n) {
                1.0
            } else {
                0.0
            }
        }))
}

/// Water pixels with at least one non-water 4-neighbour.
fn coastline(water: &Array2<f64>) -> Array2<f64> {
    let (height, width) = water.dim();
    let mut line = Array2::zeros((height, width));
    for row in 0..height {
        for col in 0..width {
            if water[[row, col]] != 1.0 {
                continue;
            }
            let mut edge = false;
            if row > 0 && water[[row - 1, col]] == 0.0 {
                edge = true;
            }
            if !edge && row + 1 < height && water[[row + 1, col]] == 0.0 {
                edge = true;
            }
            if !edge && col > 0 && water[[row, col - 1]] == 0.0 {
                edge = true;
            }
            if !edge && col + 1 < width && water[[row, col + 1]] == 0.0 {
                edge = true;
            }
            if edge {
                line[[row, col]] = 1.0;
            }
        }
    }
    line
}

/// Batch analysis: shoreline migration between an anchor-year mosaic and
/// a comparison-year mosaic.
pub struct CoastalChange;

impl AnalysisOps for CoastalChange {
    fn name(&self) -> &str {
        "coastal_change"
    }

    fn composite(&self, cube: &RasterCube, clean: &CleanMask) -> Result<RasterSlab> {
        most_recent_composite(cube, clean)
    }

    fn diff(&self, older: &RasterSlab, newer: &RasterSlab) -> Result<RasterSlab> {
        let water_old = water_mask(older)?;
        let water_new = water_mask(newer)?;
        if water_old.dim() != water_new.dim() {
            return Err(PipelineError::ShapeMismatch(format!(
                "composite shapes differ: {:?} vs {:?}",
                water_old.dim(),
                water_new.dim()
            )));
        }

        // Carry the newer mosaic's measurement bands into the product.
        let mut bands = newer.bands.clone();
        let change = ndarray::Zip::from(&water_old)
            .and(&water_new)
            .map_collect(|&o, &n| {
                if o.is_nan() || n.is_nan() {
                    f64::NAN
                } else {
                    n - o
                }
            });
        bands.insert("coastline_old".to_string(), coastline(&water_old));
        bands.insert("coastline_new".to_string(), coastline(&water_new));
        bands.insert("coastal_change".to_string(), change);

        Ok(RasterSlab {
            bands,
            bounds: newer.bounds,
            resolution: newer.resolution,
        })
    }

    fn classify(&self, _cube: &RasterCube, _clean: &CleanMask) -> Result<RasterCube> {
        Err(PipelineError::UnsupportedOperation {
            analysis: self.name().to_string(),
            operation: "classify",
        })
    }

    fn derived_bands(&self) -> &[&str] {
        &["coastal_change"]
    }

    fn preview_bands(&self) -> Option<[&'static str; 3]> {
        Some(["red", "green", "blue"])
    }
}

/// Iterative analysis: per-scene water flag folded into the running
/// observation counters.
pub struct WaterDetection;

impl AnalysisOps for WaterDetection {
    fn name(&self) -> &str {
        "water_detection"
    }

    fn composite(&self, _cube: &RasterCube, _clean: &CleanMask) -> Result<RasterSlab> {
        Err(PipelineError::UnsupportedOperation {
            analysis: self.name().to_string(),
            operation: "composite",
        })
    }

    fn diff(&self, _older: &RasterSlab, _newer: &RasterSlab) -> Result<RasterSlab> {
        Err(PipelineError::UnsupportedOperation {
            analysis: self.name().to_string(),
            operation: "diff",
        })
    }

    fn classify(&self, cube: &RasterCube, _clean: &CleanMask) -> Result<RasterCube> {
        let green = cube.band("green")?;
        let nir = cube.band("nir")?;

        let water = ndarray::Zip::from(green)
            .and(nir)
            .map_collect(|&g, &n| {
                if !g.is_finite() || !n.is_finite() {
                    f64::NAN
                } else if ndwi_is_water(g, n) {
                    1.0
                } else {
                    0.0
                }
            });

        let mut bands = BTreeMap::new();
        bands.insert(CLASSIFIED_BAND.to_string(), water);
        Ok(RasterCube {
            times: cube.times.clone(),
            bands,
            bounds: cube.bounds,
            resolution: cube.resolution,
        })
    }

    fn derived_bands(&self) -> &[&str] {
        &["normalized_data", "total_data", "total_clean"]
    }

    fn preview_bands(&self) -> Option<[&'static str; 3]> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cube::BoundingBox;
    use chrono::{TimeZone, Utc};
    use ndarray::Array3;

    fn cube_with(green: Vec<f64>, nir: Vec<f64>, scenes: usize) -> (RasterCube, CleanMask) {
        let width = green.len() / scenes;
        let mut bands = BTreeMap::new();
        bands.insert(
            "green".to_string(),
            Array3::from_shape_vec((scenes, 1, width), green).unwrap(),
        );
        bands.insert(
            "nir".to_string(),
            Array3::from_shape_vec((scenes, 1, width), nir).unwrap(),
        );
        let clean = CleanMask {
            values: Array3::from_elem((scenes, 1, width), true),
        };
        let times = (0..scenes)
            .map(|i| Utc.with_ymd_and_hms(2015, 1 + i as u32, 1, 0, 0, 0).unwrap())
            .collect();
        (
            RasterCube {
                times,
                bands,
                bounds: BoundingBox::new(0.0, 0.0, 1.0, 1.0),
                resolution: 1.0 / width as f64,
            },
            clean,
        )
    }

    #[test]
    fn test_metadata_additive_merge_is_commutative() {
        let mut a = ChunkMetadata::default();
        a.periods.insert(
            "2015-01-01".to_string(),
            PeriodMetadata {
                clean_pixels: 10,
                total_pixels: 20,
                acquisitions: ["a".to_string()].into_iter().collect(),
            },
        );
        let mut b = ChunkMetadata::default();
        b.periods.insert(
            "2015-01-01".to_string(),
            PeriodMetadata {
                clean_pixels: 5,
                total_pixels: 20,
                acquisitions: ["b".to_string()].into_iter().collect(),
            },
        );

        let mut ab = a.clone();
        ab.merge_additive(&b);
        let mut ba = b.clone();
        ba.merge_additive(&a);

        assert_eq!(ab, ba);
        assert_eq!(ab.periods["2015-01-01"].clean_pixels, 15);
        assert_eq!(ab.periods["2015-01-01"].acquisitions.len(), 2);
    }

    #[test]
    fn test_metadata_overwrite_keeps_later_value() {
        let mut earlier = ChunkMetadata::default();
        earlier.periods.insert(
            "2015".to_string(),
            PeriodMetadata {
                clean_pixels: 1,
                ..Default::default()
            },
        );
        let mut later = ChunkMetadata::default();
        later.periods.insert(
            "2015".to_string(),
            PeriodMetadata {
                clean_pixels: 99,
                ..Default::default()
            },
        );

        earlier.merge_overwrite(&later);
        assert_eq!(earlier.periods["2015"].clean_pixels, 99);
    }

    #[test]
    fn test_most_recent_composite_takes_latest_clean() {
        let (cube, mut clean) = cube_with(
            vec![100.0, 100.0, 200.0, 200.0],
            vec![50.0, 50.0, 60.0, 60.0],
            2,
        );
        // Second scene's pixel 1 is cloudy, so pixel 1 keeps scene 0's value.
        clean.values[[1, 0, 1]] = false;

        let slab = CoastalChange.composite(&cube, &clean).unwrap();
        assert_eq!(slab.band("green").unwrap()[[0, 0]], 200.0);
        assert_eq!(slab.band("green").unwrap()[[0, 1]], 100.0);
    }

    #[test]
    fn test_coastal_diff_flags_change() {
        // Pixel 0: land -> water (+1); pixel 1: water -> water (0).
        let (old_cube, old_clean) = cube_with(vec![1000.0, 3000.0], vec![2000.0, 500.0], 1);
        let (new_cube, new_clean) = cube_with(vec![3000.0, 3000.0], vec![400.0, 500.0], 1);

        let older = CoastalChange.composite(&old_cube, &old_clean).unwrap();
        let newer = CoastalChange.composite(&new_cube, &new_clean).unwrap();
        let product = CoastalChange.diff(&older, &newer).unwrap();

        let change = product.band("coastal_change").unwrap();
        assert_eq!(change[[0, 0]], 1.0);
        assert_eq!(change[[0, 1]], 0.0);
        assert!(product.band("coastline_new").is_ok());
    }

    #[test]
    fn test_water_classification() {
        let (cube, clean) = cube_with(vec![3000.0, 1000.0], vec![400.0, 2600.0], 1);
        let classified = WaterDetection.classify(&cube, &clean).unwrap();

        let water = classified.band(CLASSIFIED_BAND).unwrap();
        assert_eq!(water[[0, 0, 0]], 1.0);
        assert_eq!(water[[0, 0, 1]], 0.0);
    }

    #[test]
    fn test_chunk_metadata_counts_clean() {
        let (cube, mut clean) = cube_with(vec![1.0, 1.0], vec![1.0, 1.0], 1);
        clean.values[[0, 0, 0]] = false;

        let meta = WaterDetection.chunk_metadata(&cube, &clean);
        let period = meta.periods.values().next().unwrap();
        assert_eq!(period.clean_pixels, 1);
        assert_eq!(period.total_pixels, 2);
        assert_eq!(period.acquisitions.len(), 1);
    }

    #[test]
    fn test_lookup() {
        assert!(lookup("coastal_change").is_ok());
        assert!(lookup("water_detection").is_ok());
        assert!(lookup("magma_detection").is_err());
    }

    #[test]
    fn test_unsupported_operations() {
        let (cube, clean) = cube_with(vec![1.0], vec![1.0], 1);
        assert!(CoastalChange.classify(&cube, &clean).is_err());
        let slab = CoastalChange.composite(&cube, &clean).unwrap();
        assert!(WaterDetection.diff(&slab, &slab).is_err());
        assert!(WaterDetection.composite(&cube, &clean).is_err());
    }
}
