//! Geometric attacks for exercising the recovery path: crop, then optionally rescale.

use image::{imageops, RgbImage};
use tracing::debug;

use crate::error::{Error, Result};
use crate::geometry::{Region, Shape};

/// Centered region keeping `fraction` of each side of an image.
///
/// `fraction` is clamped to `(0, 1]`; the region is at least one pixel wide.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn central_crop(shape: Shape, fraction: f32) -> Region {
    let fraction = if fraction.is_finite() {
        fraction.clamp(f32::EPSILON, 1.0)
    } else {
        1.0
    };
    let w = ((shape.width as f32 * fraction).round() as u32).clamp(1, shape.width.max(1));
    let h = ((shape.height as f32 * fraction).round() as u32).clamp(1, shape.height.max(1));
    let x = (shape.width.saturating_sub(w)) / 2;
    let y = (shape.height.saturating_sub(h)) / 2;
    Region::from_origin(x, y, w, h)
}

/// Resize an image by `factor` with a Lanczos3 filter.
///
/// # Errors
///
/// Returns [`Error::InvalidScaleRange`] for non-positive or non-finite factors,
/// and [`Error::ReconstructionFailed`] if the result would be empty.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn rescale(image: &RgbImage, factor: f32) -> Result<RgbImage> {
    if !factor.is_finite() || factor <= 0.0 {
        return Err(Error::InvalidScaleRange {
            min: factor,
            max: factor,
        });
    }
    if (factor - 1.0).abs() < f32::EPSILON {
        return Ok(image.clone());
    }
    let w = (image.width() as f32 * factor).round() as u32;
    let h = (image.height() as f32 * factor).round() as u32;
    if w == 0 || h == 0 {
        return Err(Error::ReconstructionFailed {
            region: Region::new(0, 0, image.width(), image.height()),
            reason: format!("rescaling by {factor} leaves no pixels"),
        });
    }
    Ok(imageops::resize(
        image,
        w,
        h,
        imageops::FilterType::Lanczos3,
    ))
}

/// Crop `image` to `region`, then rescale by `scale` if given.
///
/// # Errors
///
/// Returns [`Error::ReconstructionFailed`] if the region is empty or exceeds the
/// image, and any error from [`rescale`].
pub fn crop_attack(image: &RgbImage, region: Region, scale: Option<f32>) -> Result<RgbImage> {
    if region.is_empty() {
        return Err(Error::ReconstructionFailed {
            region,
            reason: "crop region is empty".to_string(),
        });
    }
    if !region.fits_within(Shape::of(image)) {
        return Err(Error::ReconstructionFailed {
            region,
            reason: format!("crop region exceeds image {}", Shape::of(image)),
        });
    }

    let cropped =
        imageops::crop_imm(image, region.x1, region.y1, region.width(), region.height()).to_image();
    let out = match scale {
        Some(factor) => rescale(&cropped, factor)?,
        None => cropped,
    };
    debug!(%region, ?scale, width = out.width(), height = out.height(), "applied crop attack");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| {
            if (x / 4 + y / 4) % 2 == 0 {
                image::Rgb([200, 200, 200])
            } else {
                image::Rgb([30, 30, 30])
            }
        })
    }

    #[test]
    fn central_crop_keeps_fraction_centered() {
        let region = central_crop(Shape::new(100, 200), 0.7);
        assert_eq!(region, Region::new(30, 15, 170, 85));
        assert_eq!(central_crop(Shape::new(10, 10), 1.0), Region::new(0, 0, 10, 10));
        assert_eq!(central_crop(Shape::new(10, 10), 5.0), Region::new(0, 0, 10, 10));
        assert!(!central_crop(Shape::new(10, 10), 0.0).is_empty());
    }

    #[test]
    fn crop_attack_without_scale_is_exact() {
        let img = checker(40, 30);
        let region = Region::new(5, 6, 25, 20);
        let out = crop_attack(&img, region, None).unwrap();
        assert_eq!(out.dimensions(), (20, 14));
        assert_eq!(out.get_pixel(0, 0), img.get_pixel(5, 6));
        assert_eq!(out.get_pixel(19, 13), img.get_pixel(24, 19));
    }

    #[test]
    fn crop_attack_with_scale_resizes() {
        let img = checker(40, 30);
        let out = crop_attack(&img, Region::new(0, 0, 20, 10), Some(1.5)).unwrap();
        assert_eq!(out.dimensions(), (30, 15));
    }

    #[test]
    fn invalid_regions_and_factors_are_rejected() {
        let img = checker(40, 30);
        assert!(matches!(
            crop_attack(&img, Region::new(10, 10, 10, 20), None),
            Err(Error::ReconstructionFailed { .. })
        ));
        assert!(matches!(
            crop_attack(&img, Region::new(30, 0, 50, 10), None),
            Err(Error::ReconstructionFailed { .. })
        ));
        assert!(matches!(
            rescale(&img, -1.0),
            Err(Error::InvalidScaleRange { .. })
        ));
        assert!(matches!(
            rescale(&img, 0.001),
            Err(Error::ReconstructionFailed { .. })
        ));
    }
}
