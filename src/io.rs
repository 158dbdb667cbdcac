//! Image loading and saving.
//!
//! Watermarked and recovered images must be written losslessly; JPEG output is
//! accepted but encoded at maximum quality, and will still damage the carrier.

use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat, RgbImage};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Load an image from disk as 8-bit RGB.
///
/// # Errors
///
/// Returns [`Error::Image`] if the file cannot be read or decoded.
pub fn load_rgb(path: &Path) -> Result<RgbImage> {
    let img = image::open(path)?.to_rgb8();
    debug!(path = %path.display(), width = img.width(), height = img.height(), "loaded image");
    Ok(img)
}

/// Check if a file has a supported image extension.
#[must_use]
pub fn is_supported_image(path: &Path) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => matches!(
            ext.to_lowercase().as_str(),
            "jpg" | "jpeg" | "png" | "webp" | "bmp"
        ),
        None => false,
    }
}

/// Save an RGB image, picking the encoder from the file extension.
///
/// Parent directories are created as needed.
///
/// # Errors
///
/// Returns an error if the format is unsupported or writing fails.
pub fn save_image(img: &RgbImage, path: &Path) -> Result<()> {
    let format =
        ImageFormat::from_path(path).map_err(|e| Error::UnsupportedFormat(e.to_string()))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    match format {
        ImageFormat::Jpeg => {
            warn!(path = %path.display(), "JPEG output is lossy and weakens the watermark");
            let file = std::fs::File::create(path)?;
            let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(file, 100);
            encoder.encode_image(img)?;
        }
        ImageFormat::Png | ImageFormat::WebP | ImageFormat::Bmp => {
            DynamicImage::ImageRgb8(img.clone()).save_with_format(path, format)?;
        }
        _ => {
            return Err(Error::UnsupportedFormat(format!("{format:?}")));
        }
    }

    debug!(path = %path.display(), ?format, "saved image");
    Ok(())
}

/// Derive an output path by appending `_{suffix}` to the file stem.
///
/// Example: `"photo.png"` with suffix `"wm"` becomes `"photo_wm.png"`.
#[must_use]
pub fn default_output_path(input: &Path, suffix: &str) -> PathBuf {
    let stem = input.file_stem().unwrap_or_default().to_string_lossy();
    let ext = input.extension().unwrap_or_default().to_string_lossy();
    let parent = input.parent().unwrap_or(Path::new("."));
    parent.join(format!("{stem}_{suffix}.{ext}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_output_path_appends_suffix() {
        let p = default_output_path(Path::new("/tmp/photo.png"), "wm");
        assert_eq!(p, PathBuf::from("/tmp/photo_wm.png"));

        let p = default_output_path(Path::new("image.jpeg"), "screenshot");
        assert_eq!(p, PathBuf::from("image_screenshot.jpeg"));
    }

    #[test]
    fn is_supported_image_accepts_common_formats() {
        assert!(is_supported_image(Path::new("test.jpg")));
        assert!(is_supported_image(Path::new("test.JPEG")));
        assert!(is_supported_image(Path::new("test.png")));
        assert!(is_supported_image(Path::new("test.webp")));
        assert!(is_supported_image(Path::new("test.bmp")));
    }

    #[test]
    fn is_supported_image_rejects_unsupported_formats() {
        assert!(!is_supported_image(Path::new("test.gif")));
        assert!(!is_supported_image(Path::new("test.txt")));
        assert!(!is_supported_image(Path::new("noext")));
    }

    #[test]
    fn png_round_trip_is_lossless() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.png");
        let img = RgbImage::from_fn(13, 7, |x, y| image::Rgb([x as u8 * 9, y as u8 * 30, 77]));
        save_image(&img, &path).unwrap();
        assert_eq!(load_rgb(&path).unwrap(), img);
    }

    #[test]
    fn unknown_extension_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let err = save_image(&RgbImage::new(2, 2), &dir.path().join("out.xyz")).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)), "got {err:?}");
    }
}
