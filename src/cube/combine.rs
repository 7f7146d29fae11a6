//! Spatial stitching of slabs drawn from a disjoint geographic grid.

use crate::cube::{BoundingBox, RasterSlab};
use crate::error::{PipelineError, Result};
use ndarray::Array2;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

/// Merge slabs from disjoint grid cells into one mosaic covering their
/// union. Pixel placement is computed from each slab's bounds against the
/// union origin; overlapping pixels (shared cell boundaries only) are
/// last-writer-wins. The merge is commutative up to those boundary pixels,
/// which carry identical values on a disjoint grid.
pub fn combine_geographic_slabs(slabs: &[RasterSlab]) -> Result<RasterSlab> {
    let first = slabs
        .first()
        .ok_or_else(|| PipelineError::ShapeMismatch("no slabs to combine".to_string()))?;

    let resolution = first.resolution;
    for slab in slabs {
        if (slab.resolution - resolution).abs() > f64::EPSILON {
            return Err(PipelineError::ShapeMismatch(format!(
                "resolution mismatch: {} vs {}",
                slab.resolution, resolution
            )));
        }
    }

    let bounds = slabs
        .iter()
        .skip(1)
        .fold(first.bounds, |acc, s| acc.union(&s.bounds));

    let width = (bounds.width() / resolution).round().max(1.0) as usize;
    let height = (bounds.height() / resolution).round().max(1.0) as usize;

    let band_names: BTreeSet<String> = slabs
        .iter()
        .flat_map(|s| s.bands.keys().cloned())
        .collect();

    // Bands are independent; stitch them in parallel.
    let stitched: Vec<(String, Array2<f64>)> = band_names
        .into_par_iter()
        .map(|name| {
            let mut out = Array2::from_elem((height, width), f64::NAN);
            for slab in slabs {
                let Some(values) = slab.bands.get(&name) else {
                    continue;
                };
                let (slab_h, slab_w) = values.dim();

                // Row 0 is at max_y, so the row offset comes from the top edge.
                let col0 = ((slab.bounds.min_x - bounds.min_x) / resolution).round() as usize;
                let row0 = ((bounds.max_y - slab.bounds.max_y) / resolution).round() as usize;

                for row in 0..slab_h {
                    for col in 0..slab_w {
                        let out_row = row0 + row;
                        let out_col = col0 + col;
                        if out_row < height && out_col < width {
                            out[[out_row, out_col]] = values[[row, col]];
                        }
                    }
                }
            }
            (name, out)
        })
        .collect();

    let bands: BTreeMap<String, Array2<f64>> = stitched.into_iter().collect();

    Ok(RasterSlab {
        bands,
        bounds,
        resolution,
    })
}
