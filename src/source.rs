//! Data source interface and a deterministic synthetic implementation.
//!
//! The pipeline only ever sees this trait: an acquisition listing plus a
//! raster fetch that returns `None` when nothing intersects the query.
//! Production deployments back it with a data cube service; the
//! [`SyntheticSource`] here generates deterministic scenes and is used by
//! the CLI demo mode and the test suite.

use crate::cube::{BoundingBox, RasterCube};
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, TimeZone, Utc};
use ndarray::Array3;
use std::collections::BTreeMap;

/// Fallback measurement set used when a task's requested measurements are
/// not supported by the product.
pub const DEFAULT_MEASUREMENTS: &[&str] = &[
    "blue", "green", "red", "nir", "swir1", "swir2", "pixel_qa",
];

/// Parameters of one listing or fetch call.
#[derive(Debug, Clone)]
pub struct AcquisitionQuery {
    pub platform: String,
    pub product: String,
    pub extent: BoundingBox,
    pub time_start: DateTime<Utc>,
    pub time_end: DateTime<Utc>,
    pub measurements: Vec<String>,
}

/// Acquisition-listing and raster-fetch service.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// All acquisition timestamps intersecting the query, ascending.
    async fn list_acquisition_dates(&self, query: &AcquisitionQuery)
        -> Result<Vec<DateTime<Utc>>>;

    /// Load the raster cube for the query, or `None` when no data
    /// intersects it. `None` is not an error.
    async fn fetch_dataset(&self, query: &AcquisitionQuery) -> Result<Option<RasterCube>>;

    /// Whether the product supports every requested measurement.
    async fn validate_measurements(&self, product: &str, measurements: &[String])
        -> Result<bool>;
}

/// Deterministic scene generator.
///
/// Scenes are produced monthly; pixel values depend only on location and
/// acquisition date, so repeated fetches are byte-identical. A shoreline
/// runs through the scene and migrates slowly by year, which gives the
/// coastal-change analysis something to find. An optional dead zone
/// yields `None` from fetches fully inside it while still listing
/// acquisitions, modelling a catalog entry with no retrievable rasters.
pub struct SyntheticSource {
    /// Pixel size in degrees.
    pub resolution: f64,

    /// Extent with no data at all; queries inside it fetch `None`.
    pub dead_zone: Option<BoundingBox>,
}

impl SyntheticSource {
    pub fn new(resolution: f64) -> Self {
        Self {
            resolution,
            dead_zone: None,
        }
    }

    pub fn with_dead_zone(mut self, zone: BoundingBox) -> Self {
        self.dead_zone = Some(zone);
        self
    }

    fn covered(&self, extent: &BoundingBox) -> bool {
        match &self.dead_zone {
            Some(zone) => !(extent.min_x >= zone.min_x
                && extent.max_x <= zone.max_x
                && extent.min_y >= zone.min_y
                && extent.max_y <= zone.max_y),
            None => true,
        }
    }

    fn monthly_dates(start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        let mut dates = Vec::new();
        let mut year = start.year();
        let mut month = start.month();
        while let Some(date) = Utc.with_ymd_and_hms(year, month, 15, 10, 30, 0).single() {
            if date > end {
                break;
            }
            if date >= start {
                dates.push(date);
            }
            month += 1;
            if month > 12 {
                month = 1;
                year += 1;
            }
        }
        dates
    }

    /// Shoreline position for a given year; the coast advances slowly so
    /// change shows up between anchor and comparison years.
    fn is_water(lon: f64, lat: f64, year: i32) -> bool {
        let shoreline = (lon * 3.0).sin() + (lat * 3.0).cos();
        let drift = (year - 2010) as f64 * 0.02;
        shoreline < -0.2 + drift
    }

    /// Deterministic per-(pixel, date) cloud flag, roughly one pixel in
    /// eight.
    fn is_cloudy(row: usize, col: usize, date: &DateTime<Utc>) -> bool {
        let mut h = row as u64 ^ (col as u64) << 17 ^ date.timestamp() as u64;
        h ^= h >> 33;
        h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
        h ^= h >> 33;
        h % 8 == 0
    }
}

#[async_trait]
impl DataSource for SyntheticSource {
    async fn list_acquisition_dates(
        &self,
        query: &AcquisitionQuery,
    ) -> Result<Vec<DateTime<Utc>>> {
        Ok(Self::monthly_dates(query.time_start, query.time_end))
    }

    async fn fetch_dataset(&self, query: &AcquisitionQuery) -> Result<Option<RasterCube>> {
        if !self.covered(&query.extent) {
            return Ok(None);
        }

        let times = Self::monthly_dates(query.time_start, query.time_end);
        if times.is_empty() {
            return Ok(None);
        }

        let extent = query.extent;
        let width = ((extent.width() / self.resolution).round() as usize).max(1);
        let height = ((extent.height() / self.resolution).round() as usize).max(1);
        let scenes = times.len();

        let mut bands: BTreeMap<String, Array3<f64>> = BTreeMap::new();
        for name in &query.measurements {
            bands.insert(name.clone(), Array3::zeros((scenes, height, width)));
        }

        for (t, date) in times.iter().enumerate() {
            for row in 0..height {
                for col in 0..width {
                    // Row 0 at max_y.
                    let lon = extent.min_x + (col as f64 + 0.5) * self.resolution;
                    let lat = extent.max_y - (row as f64 + 0.5) * self.resolution;
                    let water = Self::is_water(lon, lat, date.year());
                    let cloudy = Self::is_cloudy(row, col, date);

                    for (name, values) in bands.iter_mut() {
                        let v = match name.as_str() {
                            "pixel_qa" => {
                                if cloudy {
                                    0.0
                                } else if water {
                                    4.0 // bit 2
                                } else {
                                    2.0 // bit 1
                                }
                            }
                            "green" => {
                                if water {
                                    2800.0
                                } else {
                                    1200.0
                                }
                            }
                            "nir" => {
                                if water {
                                    400.0
                                } else {
                                    2600.0
                                }
                            }
                            "blue" => 900.0 + if water { 600.0 } else { 0.0 },
                            "red" => 1100.0 + if water { -300.0 } else { 400.0 },
                            _ => 1500.0,
                        };
                        values[[t, row, col]] = v;
                    }
                }
            }
        }

        Ok(Some(RasterCube {
            times,
            bands,
            bounds: extent,
            resolution: self.resolution,
        }))
    }

    async fn validate_measurements(
        &self,
        _product: &str,
        measurements: &[String],
    ) -> Result<bool> {
        if measurements.is_empty() {
            return Err(PipelineError::Validation(
                "measurement list is empty".to_string(),
            ));
        }
        Ok(measurements
            .iter()
            .all(|m| DEFAULT_MEASUREMENTS.contains(&m.as_str())))
    }
}
