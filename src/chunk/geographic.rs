//! Tiling of a task extent into a grid of sub-extents.

use crate::cube::BoundingBox;
use crate::chunk::GeographicChunk;

/// Split an extent into grid cells of at most `chunk_size` degrees on a
/// side, clipped to the extent. `None` (or an oversized value) yields a
/// single chunk covering the whole extent. Indices are assigned row-major
/// from the south-west corner and are stable for a given extent and size.
pub fn create_geographic_chunks(
    extent: BoundingBox,
    chunk_size: Option<f64>,
) -> Vec<GeographicChunk> {
    let size = match chunk_size {
        Some(s) if s > 0.0 => s,
        _ => {
            return vec![GeographicChunk {
                index: 0,
                bounds: extent,
            }]
        }
    };

    let cols = (extent.width() / size).ceil().max(1.0) as usize;
    let rows = (extent.height() / size).ceil().max(1.0) as usize;

    let mut chunks = Vec::with_capacity(rows * cols);
    for row in 0..rows {
        for col in 0..cols {
            let min_x = extent.min_x + col as f64 * size;
            let min_y = extent.min_y + row as f64 * size;
            let bounds = BoundingBox::new(
                min_x,
                min_y,
                (min_x + size).min(extent.max_x),
                (min_y + size).min(extent.max_y),
            );
            chunks.push(GeographicChunk {
                index: chunks.len(),
                bounds,
            });
        }
    }

    chunks
}
