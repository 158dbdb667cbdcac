//! Synthetic screenshots: an image framed by solid UI-chrome bands.
//!
//! The embedded image is copied byte for byte, so any recovery failure on the
//! result is down to the recovery path, not the synthesizer.

use image::{imageops, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::geometry::Region;

/// Fill for the canvas and the side bands.
pub const BACKGROUND: Rgb<u8> = Rgb([240, 240, 240]);
/// Fill for the top band (title bar).
pub const TOP_BAND: Rgb<u8> = Rgb([50, 50, 50]);
/// Fill for the bottom band (task bar).
pub const BOTTOM_BAND: Rgb<u8> = Rgb([60, 60, 60]);

/// Border widths in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BorderSizes {
    /// Rows above the image.
    pub top: u32,
    /// Rows below the image.
    pub bottom: u32,
    /// Columns left of the image.
    pub left: u32,
    /// Columns right of the image.
    pub right: u32,
}

impl BorderSizes {
    /// Create border sizes.
    #[must_use]
    pub const fn new(top: u32, bottom: u32, left: u32, right: u32) -> Self {
        Self {
            top,
            bottom,
            left,
            right,
        }
    }

    /// Borders of `n` on three sides and `2n` at the bottom.
    #[must_use]
    pub const fn uniform(n: u32) -> Self {
        Self::new(n, n.saturating_mul(2), n, n)
    }
}

/// Frame `image` with chrome bands.
///
/// Returns the canvas and the exact rectangle the input occupies in it.
///
/// # Errors
///
/// Returns [`Error::CanvasTooLarge`] when the framed size overflows `u32` or
/// the pixel buffer would not be addressable.
pub fn synthesize(image: &RgbImage, borders: BorderSizes) -> Result<(RgbImage, Region)> {
    let (w, h) = image.dimensions();
    let (canvas_w, canvas_h) = canvas_size(w, h, borders)?;

    let mut canvas = RgbImage::from_pixel(canvas_w, canvas_h, BACKGROUND);
    for y in 0..borders.top {
        for x in 0..canvas_w {
            canvas.put_pixel(x, y, TOP_BAND);
        }
    }
    for y in borders.top + h..canvas_h {
        for x in 0..canvas_w {
            canvas.put_pixel(x, y, BOTTOM_BAND);
        }
    }
    imageops::replace(
        &mut canvas,
        image,
        i64::from(borders.left),
        i64::from(borders.top),
    );

    let region = Region::from_origin(borders.left, borders.top, w, h);
    debug!(%region, width = canvas_w, height = canvas_h, "synthesized screenshot");
    Ok((canvas, region))
}

/// Same as [`synthesize`].
///
/// # Errors
///
/// See [`synthesize`].
pub fn make_screenshot(image: &RgbImage, borders: BorderSizes) -> Result<(RgbImage, Region)> {
    synthesize(image, borders)
}

fn canvas_size(w: u32, h: u32, borders: BorderSizes) -> Result<(u32, u32)> {
    let too_large = || Error::CanvasTooLarge {
        width: u64::from(borders.left) + u64::from(w) + u64::from(borders.right),
        height: u64::from(borders.top) + u64::from(h) + u64::from(borders.bottom),
    };
    let canvas_w = borders
        .left
        .checked_add(w)
        .and_then(|v| v.checked_add(borders.right))
        .ok_or_else(too_large)?;
    let canvas_h = borders
        .top
        .checked_add(h)
        .and_then(|v| v.checked_add(borders.bottom))
        .ok_or_else(too_large)?;
    let bytes = usize::try_from(canvas_w)
        .ok()
        .zip(usize::try_from(canvas_h).ok())
        .and_then(|(cw, ch)| cw.checked_mul(ch))
        .and_then(|px| px.checked_mul(3))
        .filter(|&b| isize::try_from(b).is_ok());
    bytes.map(|_| (canvas_w, canvas_h)).ok_or_else(too_large)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]))
    }

    #[test]
    fn canvas_size_and_region_are_exact() {
        let img = gradient(30, 20);
        let (canvas, region) = synthesize(&img, BorderSizes::new(4, 8, 3, 5)).unwrap();
        assert_eq!(canvas.dimensions(), (38, 32));
        assert_eq!(region, Region::new(3, 4, 33, 24));
        assert_eq!(region.width(), 30);
        assert_eq!(region.height(), 20);
    }

    #[test]
    fn embedded_pixels_are_untouched() {
        let img = gradient(30, 20);
        let (canvas, region) = synthesize(&img, BorderSizes::uniform(6)).unwrap();
        let inner = imageops::crop_imm(&canvas, region.x1, region.y1, 30, 20).to_image();
        assert_eq!(inner, img);
    }

    #[test]
    fn bands_use_chrome_colors() {
        let img = gradient(10, 10);
        let (canvas, _) = synthesize(&img, BorderSizes::uniform(2)).unwrap();
        assert_eq!(canvas.get_pixel(0, 0), &TOP_BAND);
        assert_eq!(canvas.get_pixel(13, 1), &TOP_BAND);
        assert_eq!(canvas.get_pixel(0, 5), &BACKGROUND);
        assert_eq!(canvas.get_pixel(13, 5), &BACKGROUND);
        assert_eq!(canvas.get_pixel(5, 12), &BOTTOM_BAND);
        assert_eq!(canvas.get_pixel(5, 15), &BOTTOM_BAND);
        assert_eq!(canvas.dimensions(), (14, 16));
    }

    #[test]
    fn zero_borders_return_the_image() {
        let img = gradient(9, 7);
        let (canvas, region) = make_screenshot(&img, BorderSizes::default()).unwrap();
        assert_eq!(canvas, img);
        assert_eq!(region, Region::new(0, 0, 9, 7));
    }

    #[test]
    fn oversized_borders_are_rejected() {
        let img = gradient(9, 7);
        let err = synthesize(&img, BorderSizes::new(0, 0, u32::MAX - 4, 10)).unwrap_err();
        assert!(
            matches!(err, Error::CanvasTooLarge { width, height: 7 } if width == u64::from(u32::MAX) + 15),
            "got {err:?}"
        );
        let err = synthesize(&img, BorderSizes::uniform(u32::MAX)).unwrap_err();
        assert!(matches!(err, Error::CanvasTooLarge { .. }), "got {err:?}");
    }

    #[test]
    fn uniform_borders_saturate() {
        assert_eq!(BorderSizes::uniform(u32::MAX).bottom, u32::MAX);
        assert_eq!(BorderSizes::uniform(50), BorderSizes::new(50, 100, 50, 50));
    }
}
