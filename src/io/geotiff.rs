//! GeoTIFF output without GDAL, using the `tiff` crate.
//!
//! Each requested band is written as one 32-bit float page. Georeferencing
//! is carried by the ModelPixelScale and ModelTiepoint tags plus a minimal
//! GeoKeyDirectory declaring geographic WGS84, which is what downstream
//! GIS tools need to place the raster.

use crate::cube::RasterSlab;
use crate::error::{PipelineError, Result};
use std::fs::File;
use std::path::Path;
use tiff::encoder::colortype::Gray32Float;
use tiff::encoder::TiffEncoder;
use tiff::tags::Tag;

const MODEL_PIXEL_SCALE: Tag = Tag::Unknown(33550);
const MODEL_TIEPOINT: Tag = Tag::Unknown(33922);
const GEO_KEY_DIRECTORY: Tag = Tag::Unknown(34735);

/// Write the named bands of a slab as a multi-page GeoTIFF.
pub fn write_geotiff(path: &Path, slab: &RasterSlab, bands: &[String]) -> Result<()> {
    let (height, width) = slab.shape();
    if height == 0 || width == 0 {
        return Err(PipelineError::RasterWrite(
            "cannot write an empty raster".to_string(),
        ));
    }

    let file = File::create(path)?;
    let mut encoder = TiffEncoder::new(file)?;

    // GeoTIFF placement tags, identical for every page.
    let scale = [slab.resolution, slab.resolution, 0.0];
    let tiepoint = [0.0, 0.0, 0.0, slab.bounds.min_x, slab.bounds.max_y, 0.0];
    // GTModelTypeGeoKey = 2 (geographic), GTRasterTypeGeoKey = 1,
    // GeographicTypeGeoKey = 4326 (WGS84).
    let geokeys: [u16; 16] = [
        1, 1, 0, 3, //
        1024, 0, 1, 2, //
        1025, 0, 1, 1, //
        2048, 0, 1, 4326,
    ];

    for band in bands {
        let values = slab.band(band)?;
        let data: Vec<f32> = values.iter().map(|&v| v as f32).collect();

        let mut image = encoder.new_image::<Gray32Float>(width as u32, height as u32)?;
        image.encoder().write_tag(MODEL_PIXEL_SCALE, &scale[..])?;
        image.encoder().write_tag(MODEL_TIEPOINT, &tiepoint[..])?;
        image.encoder().write_tag(GEO_KEY_DIRECTORY, &geokeys[..])?;
        image.write_data(&data)?;
    }

    tracing::debug!(path = %path.display(), bands = bands.len(), "wrote GeoTIFF");
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
        bands.insert(
            "a".to_string(),
            Array2::from_shape_vec((2, 3), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap(),
        );
        bands.insert("b".to_string(), Array2::from_elem((2, 3), 9.0));
        RasterSlab {
            bands,
            bounds: BoundingBox::new(10.0, 20.0, 13.0, 22.0),
            resolution: 1.0,
        }
    }

    #[test]
    fn test_write_multi_band() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.tif");

        write_geotiff(&path, &slab(), &["a".to_string(), "b".to_string()]).unwrap();
        assert!(path.exists());
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
    }

    #[test]
    fn test_write_unknown_band_is_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.tif");
        assert!(write_geotiff(&path, &slab(), &["missing".to_string()]).is_err());
    }

    #[test]
    fn test_round_trip_pixel_values() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.tif");
        write_geotiff(&path, &slab(), &["a".to_string()]).unwrap();

        let file = std::fs::File::open(&path).unwrap();
        let mut decoder = tiff::decoder::Decoder::new(file).unwrap();
        assert_eq!(decoder.dimensions().unwrap(), (3, 2));
        match decoder.read_image().unwrap() {
            tiff::decoder::DecodingResult::F32(buf) => {
                assert_eq!(buf[0], 1.0);
                assert_eq!(buf[5], 6.0);
            }
            other => panic!("unexpected decoding result: {:?}", other),
        }
    }
}
