//! Image file probes.

use std::path::Path;

use anyhow::{Context, Result};

/// Length of the image's shorter side in pixels, read from the file header.
pub fn short_side_px(path: &Path) -> Result<u32> {
    let (width, height) = image::image_dimensions(path)
        .with_context(|| format!("read image dimensions of {}", path.display()))?;
    Ok(width.min(height))
}

/// Whether the resolution policy adds super-resolution to the agenda.
pub fn needs_super_resolution(path: &Path, min_short_side_px: u32) -> Result<bool> {
    Ok(short_side_px(path)? < min_short_side_px)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_png(path: &Path, width: u32, height: u32) {
        image::RgbImage::new(width, height).save(path).expect("write png");
    }

    #[test]
    fn short_side_is_the_smaller_dimension() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("wide.png");
        write_png(&path, 640, 120);
        assert_eq!(short_side_px(&path).expect("probe"), 120);
    }

    #[test]
    fn small_image_triggers_super_resolution() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("small.png");
        write_png(&path, 200, 400);
        assert!(needs_super_resolution(&path, 300).expect("probe"));
        assert!(!needs_super_resolution(&path, 200).expect("probe"));
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = short_side_px(Path::new("/nonexistent/image.png")).unwrap_err();
        assert!(format!("{err:#}").contains("read image dimensions"));
    }
}
