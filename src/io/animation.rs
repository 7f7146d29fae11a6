//! Assembly of rendered frames into an animated GIF.

use crate::error::{PipelineError, Result};
use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, Frame};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Assemble frame images, already in presentation order, into one looping
/// GIF with a fixed per-frame duration. The caller is responsible for
/// skipping steps that never produced a frame; paths passed here must
/// exist.
pub fn assemble_animation(
    path: &Path,
    frame_paths: &[PathBuf],
    frame_duration: Duration,
) -> Result<()> {
    if frame_paths.is_empty() {
        return Err(PipelineError::RasterWrite(
            "no frames to assemble".to_string(),
        ));
    }

    let file = File::create(path)?;
    let mut encoder = GifEncoder::new(file);
    encoder
        .set_repeat(Repeat::Infinite)
        .map_err(|e| PipelineError::RasterWrite(e.to_string()))?;

    let delay = Delay::from_saturating_duration(frame_duration);
    for frame_path in frame_paths {
        let img = image::open(frame_path)?.to_rgba8();
        encoder
            .encode_frame(Frame::from_parts(img, 0, 0, delay))
            .map_err(|e| PipelineError::RasterWrite(e.to_string()))?;
    }

    tracing::info!(
        path = %path.display(),
        frames = frame_paths.len(),
        "assembled animation"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;
    use tempfile::TempDir;

    fn write_frame(dir: &Path, name: &str, shade: u8) -> PathBuf {
        let path = dir.join(name);
        let mut img = RgbaImage::new(4, 4);
        for p in img.pixels_mut() {
            *p = image::Rgba([shade, shade, shade, 255]);
        }
        img.save(&path).unwrap();
        path
    }

    #[test]
    fn test_assemble_three_frames() {
        let tmp = TempDir::new().unwrap();
        let frames = vec![
            write_frame(tmp.path(), "f0.png", 10),
            write_frame(tmp.path(), "f1.png", 120),
            write_frame(tmp.path(), "f2.png", 250),
        ];
        let out = tmp.path().join("animation.gif");

        assemble_animation(&out, &frames, Duration::from_secs(1)).unwrap();
        assert!(out.exists());
        assert!(std::fs::metadata(&out).unwrap().len() > 0);
    }

    #[test]
    fn test_empty_frame_list_is_error() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("animation.gif");
        assert!(assemble_animation(&out, &[], Duration::from_secs(1)).is_err());
    }
}
