//! PNG previews: RGB composites and colorized single bands.

use crate::cube::RasterSlab;
use crate::error::{PipelineError, Result};
use image::{Rgba, RgbaImage};
use std::path::Path;

/// Piecewise-linear value-to-color ramp for single-band previews.
#[derive(Debug, Clone)]
pub struct ColorScale {
    /// (value, rgb) stops, ascending by value.
    stops: Vec<(f64, [u8; 3])>,
}

impl ColorScale {
    pub fn new(mut stops: Vec<(f64, [u8; 3])>) -> Self {
        stops.sort_by(|a, b| a.0.total_cmp(&b.0));
        Self { stops }
    }

    /// Blue-to-cyan ramp for observation ratios in [0, 1].
    pub fn water_fraction() -> Self {
        Self::new(vec![
            (0.0, [120, 90, 60]),
            (0.5, [40, 130, 180]),
            (1.0, [10, 40, 160]),
        ])
    }

    /// Ramp for raw observation counts.
    pub fn observation_count(max: f64) -> Self {
        Self::new(vec![
            (0.0, [30, 30, 30]),
            (max.max(1.0), [240, 240, 90]),
        ])
    }

    /// Diverging ramp for signed change in [-1, 1].
    pub fn signed_change() -> Self {
        Self::new(vec![
            (-1.0, [200, 40, 40]),
            (0.0, [230, 230, 230]),
            (1.0, [40, 90, 200]),
        ])
    }

    fn color_for(&self, value: f64) -> [u8; 3] {
        match self.stops.as_slice() {
            [] => [0, 0, 0],
            [only] => only.1,
            stops => {
                if value <= stops[0].0 {
                    return stops[0].1;
                }
                let last = stops[stops.len() - 1];
                if value >= last.0 {
                    return last.1;
                }
                for pair in stops.windows(2) {
                    let (v0, c0) = pair[0];
                    let (v1, c1) = pair[1];
                    if value <= v1 {
                        let t = if v1 > v0 { (value - v0) / (v1 - v0) } else { 0.0 };
                        let mut rgb = [0u8; 3];
                        for i in 0..3 {
                            rgb[i] = (c0[i] as f64 + t * (c1[i] as f64 - c0[i] as f64))
                                .round() as u8;
                        }
                        return rgb;
                    }
                }
                last.1
            }
        }
    }
}

/// Default color scale for a derived band name. `max_hint` bounds the
/// count ramps; ratio and change bands have fixed ranges.
pub fn default_scale_for(band: &str, max_hint: f64) -> ColorScale {
    match band {
        "normalized_data" | "water" => ColorScale::water_fraction(),
        "coastal_change" => ColorScale::signed_change(),
        _ => ColorScale::observation_count(max_hint),
    }
}

fn scale_to_u8(value: f64, range: (f64, f64)) -> u8 {
    let (lo, hi) = range;
    if hi <= lo {
        return 0;
    }
    (((value - lo) / (hi - lo)).clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Render three bands as an RGB preview, scaling values from `range` to
/// 0-255. Pixels with any non-finite component are transparent.
pub fn write_png(
    path: &Path,
    slab: &RasterSlab,
    rgb_bands: [&str; 3],
    range: (f64, f64),
) -> Result<()> {
    let (height, width) = slab.shape();
    if height == 0 || width == 0 {
        return Err(PipelineError::RasterWrite(
            "cannot render an empty raster".to_string(),
        ));
    }

    let red = slab.band(rgb_bands[0])?;
    let green = slab.band(rgb_bands[1])?;
    let blue = slab.band(rgb_bands[2])?;

    let mut img = RgbaImage::new(width as u32, height as u32);
    for row in 0..height {
        for col in 0..width {
            let (r, g, b) = (red[[row, col]], green[[row, col]], blue[[row, col]]);
            let pixel = if r.is_finite() && g.is_finite() && b.is_finite() {
                Rgba([
                    scale_to_u8(r, range),
                    scale_to_u8(g, range),
                    scale_to_u8(b, range),
                    255,
                ])
            } else {
                Rgba([0, 0, 0, 0])
            };
            img.put_pixel(col as u32, row as u32, pixel);
        }
    }

    img.save(path)?;
    tracing::debug!(path = %path.display(), "wrote RGB preview");
    Ok(())
}

/// Render one band through a color scale; non-finite pixels get the fill
/// color.
pub fn write_single_band_png(
    path: &Path,
    slab: &RasterSlab,
    band: &str,
    scale: &ColorScale,
    fill_color: [u8; 4],
) -> Result<()> {
    let (height, width) = slab.shape();
    if height == 0 || width == 0 {
        return Err(PipelineError::RasterWrite(
            "cannot render an empty raster".to_string(),
        ));
    }

    let values = slab.band(band)?;
    let mut img = RgbaImage::new(width as u32, height as u32);
    for row in 0..height {
        for col in 0..width {
            let v = values[[row, col]];
            let pixel = if v.is_finite() {
                let [r, g, b] = scale.color_for(v);
                Rgba([r, g, b, 255])
            } else {
                Rgba(fill_color)
            };
            img.put_pixel(col as u32, row as u32, pixel);
        }
    }

    img.save(path)?;
    tracing::debug!(path = %path.display(), band, "wrote single-band preview");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cube::BoundingBox;
    use ndarray::Array2;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn slab() -> RasterSlab {
        let mut bands = BTreeMap::new();
        for name in ["red", "green", "blue"] {
            bands.insert(name.to_string(), Array2::from_elem((2, 2), 2048.0));
        }
        bands.insert(
            "ratio".to_string(),
            Array2::from_shape_vec((2, 2), vec![0.0, 0.5, 1.0, f64::NAN]).unwrap(),
        );
        RasterSlab {
            bands,
            bounds: BoundingBox::new(0.0, 0.0, 1.0, 1.0),
            resolution: 0.5,
        }
    }

    #[test]
    fn test_color_scale_interpolates() {
        let scale = ColorScale::new(vec![(0.0, [0, 0, 0]), (1.0, [200, 100, 50])]);
        assert_eq!(scale.color_for(0.0), [0, 0, 0]);
        assert_eq!(scale.color_for(1.0), [200, 100, 50]);
        assert_eq!(scale.color_for(0.5), [100, 50, 25]);
        // Out-of-range values clamp to the end stops.
        assert_eq!(scale.color_for(-5.0), [0, 0, 0]);
        assert_eq!(scale.color_for(5.0), [200, 100, 50]);
    }

    #[test]
    fn test_rgb_preview() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("preview.png");
        write_png(&path, &slab(), ["red", "green", "blue"], (0.0, 4096.0)).unwrap();

        let img = image::open(&path).unwrap().to_rgba8();
        assert_eq!(img.dimensions(), (2, 2));
        // 2048 out of 4096 scales to mid-gray.
        assert_eq!(img.get_pixel(0, 0)[0], 128);
    }

    #[test]
    fn test_single_band_fill_color() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ratio.png");
        write_single_band_png(
            &path,
            &slab(),
            "ratio",
            &ColorScale::water_fraction(),
            [0, 0, 0, 0],
        )
        .unwrap();

        let img = image::open(&path).unwrap().to_rgba8();
        // The NaN pixel (row 1, col 1) is transparent.
        assert_eq!(img.get_pixel(1, 1)[3], 0);
        assert_eq!(img.get_pixel(0, 0)[3], 255);
    }

    #[test]
    fn test_missing_band_is_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("x.png");
        assert!(write_png(&path, &slab(), ["red", "green", "missing"], (0.0, 1.0)).is_err());
    }
}
