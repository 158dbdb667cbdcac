//! Attack recovery: map an attacked image back onto the reference frame, then
//! extract and decode the payload.
//!
//! One run per call: **estimate** the geometry with the engine, **classify** the
//! attack from pixel dimensions, **reconstruct** an image of the reference's
//! size, **extract** the bits and **decode** them. Any failure aborts the run;
//! retry policy (for example widening the scale range) is left to the caller.

use std::path::PathBuf;

use image::{imageops, RgbImage};
use tracing::{debug, info, warn};

use crate::codec::{self, BitSequence, PayloadLayout};
use crate::engine::{Keys, ScaleRange, SearchBudget, WatermarkEngine};
use crate::error::{Error, Result};
use crate::geometry::{classify, AttackKind, GeometryEstimate, Shape};
use crate::{io, qr};

/// Pixels per module in the debug grid rendering.
const DEBUG_GRID_SCALE: u32 = 10;

/// Settings for a recovery run.
#[derive(Debug, Clone, Default)]
pub struct RecoveryConfig {
    /// Keys used at embed time.
    pub keys: Keys,
    /// Scale factors the geometry search considers.
    pub scale_range: ScaleRange,
    /// Ceiling on geometry search attempts.
    pub search_budget: SearchBudget,
    /// When set, `recovered.png` and `grid_recovered.png` are written here.
    pub debug_dir: Option<PathBuf>,
}

/// Outcome of a recovery run.
#[derive(Debug, Clone)]
pub struct RecoveryResult {
    /// The attacked image mapped back to the reference's dimensions.
    pub recovered_image: RgbImage,
    /// Decoded text, or `None` if the extracted grid held no readable symbol.
    pub payload: Option<String>,
    /// Geometry reported by the engine. Threshold `geometry.score` before
    /// trusting the payload.
    pub geometry: GeometryEstimate,
    /// Which reconstruction path ran.
    pub kind: AttackKind,
    /// Raw extracted bits.
    pub bits: BitSequence,
}

impl RecoveryResult {
    /// Take the payload, turning an undecodable grid into an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotDecodable`] carrying the raw bits when no payload was decoded.
    pub fn into_payload(self) -> Result<String> {
        let Self { payload, bits, .. } = self;
        match payload {
            Some(text) => Ok(text),
            None => Err(Error::NotDecodable {
                side: qr::square_side(bits.len()).unwrap_or_default(),
                bits,
            }),
        }
    }
}

/// Recovery orchestrator bound to an engine.
pub struct Recovery<'e, E: WatermarkEngine + ?Sized> {
    engine: &'e E,
    config: RecoveryConfig,
}

impl<'e, E: WatermarkEngine + ?Sized> Recovery<'e, E> {
    /// Create an orchestrator.
    #[must_use]
    pub fn new(engine: &'e E, config: RecoveryConfig) -> Self {
        Self { engine, config }
    }

    /// Settings in use.
    #[must_use]
    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    /// Recover the payload from `attacked`, using `reference` to undo the geometry.
    ///
    /// `bit_count` must equal `layout.bit_count()`; it is checked before the
    /// engine runs.
    ///
    /// # Errors
    ///
    /// - [`Error::ShapeMismatch`] for an inconsistent `bit_count`.
    /// - [`Error::GeometryNotFound`] (from the engine) if no match was found.
    /// - [`Error::ReconstructionFailed`] if the estimated region is unusable or
    ///   the reconstructed image has the wrong size.
    /// - Any error from bit extraction or decoding except
    ///   [`Error::NotDecodable`], which yields `payload: None`.
    pub fn recover_and_decode(
        &self,
        reference: &RgbImage,
        attacked: &RgbImage,
        bit_count: usize,
        layout: &PayloadLayout,
    ) -> Result<RecoveryResult> {
        check_bit_count(bit_count, layout)?;

        let geometry = self.engine.estimate_geometry(
            reference,
            attacked,
            self.config.scale_range,
            self.config.search_budget,
        )?;
        let kind = classify(Shape::of(reference), Shape::of(attacked));
        info!(
            %kind,
            region = %geometry.region,
            scale = geometry.scale,
            score = geometry.score,
            quality = %geometry.quality(),
            "attack classified"
        );

        let recovered_image = match kind {
            AttackKind::Extension => reconstruct_extension(attacked, &geometry)?,
            AttackKind::Contraction => self.engine.recover_contracted(
                attacked,
                geometry.region,
                geometry.target_shape,
            )?,
        };
        if Shape::of(&recovered_image) != geometry.target_shape {
            return Err(Error::ReconstructionFailed {
                region: geometry.region,
                reason: format!(
                    "recovered image is {}, expected {}",
                    Shape::of(&recovered_image),
                    geometry.target_shape
                ),
            });
        }

        let (bits, payload) = self.extract_and_decode(&recovered_image, bit_count, layout)?;
        Ok(RecoveryResult {
            recovered_image,
            payload,
            geometry,
            kind,
            bits,
        })
    }

    /// Extract and decode without any geometric recovery.
    ///
    /// Suitable for images that were not cropped or rescaled.
    ///
    /// # Errors
    ///
    /// Same as [`Recovery::recover_and_decode`], minus the geometry failures.
    pub fn extract_direct(
        &self,
        image: &RgbImage,
        bit_count: usize,
        layout: &PayloadLayout,
    ) -> Result<Option<String>> {
        check_bit_count(bit_count, layout)?;
        let (_, payload) = self.extract_and_decode(image, bit_count, layout)?;
        Ok(payload)
    }

    fn extract_and_decode(
        &self,
        image: &RgbImage,
        bit_count: usize,
        layout: &PayloadLayout,
    ) -> Result<(BitSequence, Option<String>)> {
        let bits = self.engine.extract_bits(image, bit_count, self.config.keys)?;
        if let Some(dir) = &self.config.debug_dir {
            write_debug_artifacts(dir, image, &bits, layout)?;
        }

        match codec::decode(&bits, layout) {
            Ok(text) => {
                info!(len = text.len(), "payload decoded");
                Ok((bits, Some(text)))
            }
            Err(Error::NotDecodable { side, .. }) => {
                warn!(side, "extracted grid holds no readable QR symbol");
                Ok((bits, None))
            }
            Err(e) => Err(e),
        }
    }
}

fn check_bit_count(bit_count: usize, layout: &PayloadLayout) -> Result<()> {
    if bit_count != layout.bit_count() {
        return Err(Error::ShapeMismatch {
            context: "bit count vs payload layout",
            expected: layout.bit_count(),
            actual: bit_count,
        });
    }
    Ok(())
}

/// Crop the estimated region out of a screenshot-like image and bring it to
/// the reference size. Crops that already have that size are returned as is.
fn reconstruct_extension(attacked: &RgbImage, geometry: &GeometryEstimate) -> Result<RgbImage> {
    let region = geometry.region;
    if region.is_empty() {
        return Err(Error::ReconstructionFailed {
            region,
            reason: "estimated region is empty".to_string(),
        });
    }
    if !region.fits_within(Shape::of(attacked)) {
        return Err(Error::ReconstructionFailed {
            region,
            reason: format!("region exceeds attacked image {}", Shape::of(attacked)),
        });
    }

    let crop = imageops::crop_imm(attacked, region.x1, region.y1, region.width(), region.height())
        .to_image();
    let target = geometry.target_shape;
    if region.shape() == target {
        return Ok(crop);
    }
    debug!(from = %region.shape(), to = %target, "resizing extension crop");
    Ok(imageops::resize(
        &crop,
        target.width,
        target.height,
        imageops::FilterType::Lanczos3,
    ))
}

fn write_debug_artifacts(
    dir: &std::path::Path,
    image: &RgbImage,
    bits: &BitSequence,
    layout: &PayloadLayout,
) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    io::save_image(image, &dir.join("recovered.png"))?;
    if let PayloadLayout::QrGrid { side, .. } = *layout {
        qr::save_grid(bits, side, DEBUG_GRID_SCALE, &dir.join("grid_recovered.png"))?;
    }
    debug!(dir = %dir.display(), "wrote debug artifacts");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::codec::{encode, Redundancy};
    use crate::geometry::Region;

    /// Engine returning canned answers and counting calls.
    struct Scripted {
        estimate: GeometryEstimate,
        bits: BitSequence,
        calls: Cell<usize>,
        contracted: Cell<bool>,
    }

    impl Scripted {
        fn new(estimate: GeometryEstimate, bits: BitSequence) -> Self {
            Self {
                estimate,
                bits,
                calls: Cell::new(0),
                contracted: Cell::new(false),
            }
        }
    }

    impl WatermarkEngine for Scripted {
        fn embed_bits(&self, image: &RgbImage, _: &BitSequence, _: Keys) -> Result<RgbImage> {
            Ok(image.clone())
        }

        fn extract_bits(&self, _: &RgbImage, _: usize, _: Keys) -> Result<BitSequence> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.bits.clone())
        }

        fn estimate_geometry(
            &self,
            _: &RgbImage,
            _: &RgbImage,
            _: ScaleRange,
            _: SearchBudget,
        ) -> Result<GeometryEstimate> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.estimate)
        }

        fn recover_contracted(&self, _: &RgbImage, _: Region, target: Shape) -> Result<RgbImage> {
            self.contracted.set(true);
            Ok(RgbImage::new(target.width, target.height))
        }
    }

    fn estimate(region: Region, target: Shape) -> GeometryEstimate {
        GeometryEstimate {
            region,
            target_shape: target,
            scale: 1.0,
            score: 0.97,
        }
    }

    #[test]
    fn bit_count_mismatch_is_rejected_before_engine_runs() {
        let (bits, layout) = encode("hello", Redundancy::default()).unwrap();
        let engine = Scripted::new(estimate(Region::new(0, 0, 8, 8), Shape::new(8, 8)), bits);
        let recovery = Recovery::new(&engine, RecoveryConfig::default());
        let img = RgbImage::new(8, 8);
        let err = recovery
            .recover_and_decode(&img, &img, layout.bit_count() + 1, &layout)
            .unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }), "got {err:?}");
        assert_eq!(engine.calls.get(), 0);
    }

    #[test]
    fn extension_crops_region_and_decodes() {
        let (bits, layout) = encode("hello", Redundancy::default()).unwrap();
        let reference = RgbImage::new(20, 10);
        let attacked = RgbImage::from_fn(30, 16, |x, y| image::Rgb([x as u8, y as u8, 0]));
        let engine = Scripted::new(
            estimate(Region::new(4, 3, 24, 13), Shape::new(10, 20)),
            bits.clone(),
        );
        let result = Recovery::new(&engine, RecoveryConfig::default())
            .recover_and_decode(&reference, &attacked, bits.len(), &layout)
            .unwrap();
        assert_eq!(result.kind, AttackKind::Extension);
        assert_eq!(result.payload.as_deref(), Some("hello"));
        assert_eq!(result.recovered_image.dimensions(), (20, 10));
        assert_eq!(result.recovered_image.get_pixel(0, 0), attacked.get_pixel(4, 3));
        assert!(!engine.contracted.get());
    }

    #[test]
    fn extension_region_outside_attacked_image_fails() {
        let (bits, layout) = encode("hello", Redundancy::default()).unwrap();
        let reference = RgbImage::new(20, 10);
        let attacked = RgbImage::new(22, 12);
        let engine = Scripted::new(
            estimate(Region::new(5, 5, 25, 15), Shape::new(10, 20)),
            bits.clone(),
        );
        let err = Recovery::new(&engine, RecoveryConfig::default())
            .recover_and_decode(&reference, &attacked, bits.len(), &layout)
            .unwrap_err();
        assert!(matches!(err, Error::ReconstructionFailed { .. }), "got {err:?}");
    }

    #[test]
    fn contraction_delegates_to_engine() {
        let (bits, layout) = encode("hello", Redundancy::default()).unwrap();
        let reference = RgbImage::new(20, 10);
        let attacked = RgbImage::new(12, 6);
        let engine = Scripted::new(
            estimate(Region::new(4, 2, 16, 8), Shape::new(10, 20)),
            bits.clone(),
        );
        let result = Recovery::new(&engine, RecoveryConfig::default())
            .recover_and_decode(&reference, &attacked, bits.len(), &layout)
            .unwrap();
        assert_eq!(result.kind, AttackKind::Contraction);
        assert!(engine.contracted.get());
        assert_eq!(result.payload.as_deref(), Some("hello"));
    }

    #[test]
    fn undecodable_grid_keeps_raw_bits() {
        let (bits, layout) = encode("hello", Redundancy::default()).unwrap();
        let blank = BitSequence::from_bits(vec![0; bits.len()]).unwrap();
        let engine = Scripted::new(
            estimate(Region::new(0, 0, 20, 10), Shape::new(10, 20)),
            blank.clone(),
        );
        let img = RgbImage::new(20, 10);
        let result = Recovery::new(&engine, RecoveryConfig::default())
            .recover_and_decode(&img, &img, bits.len(), &layout)
            .unwrap();
        assert!(result.payload.is_none());
        assert_eq!(result.bits, blank);
        assert!(matches!(
            result.into_payload(),
            Err(Error::NotDecodable { bits: raw, .. }) if raw == blank
        ));
    }

    #[test]
    fn extract_direct_skips_geometry() {
        let (bits, layout) = encode("abc", Redundancy::None).unwrap();
        let engine = Scripted::new(
            estimate(Region::new(0, 0, 1, 1), Shape::new(1, 1)),
            bits.clone(),
        );
        let recovery = Recovery::new(&engine, RecoveryConfig::default());
        let text = recovery
            .extract_direct(&RgbImage::new(4, 4), bits.len(), &layout)
            .unwrap();
        assert_eq!(text.as_deref(), Some("abc"));
        assert_eq!(engine.calls.get(), 1, "only extract_bits should run");
    }

    #[test]
    fn debug_artifacts_are_written() {
        let dir = tempfile::tempdir().unwrap();
        let (bits, layout) = encode("hello", Redundancy::default()).unwrap();
        let engine = Scripted::new(
            estimate(Region::new(0, 0, 20, 10), Shape::new(10, 20)),
            bits.clone(),
        );
        let config = RecoveryConfig {
            debug_dir: Some(dir.path().join("debug")),
            ..RecoveryConfig::default()
        };
        let img = RgbImage::new(20, 10);
        Recovery::new(&engine, config)
            .recover_and_decode(&img, &img, bits.len(), &layout)
            .unwrap();

        let grid = image::open(dir.path().join("debug/grid_recovered.png")).unwrap();
        let PayloadLayout::QrGrid { side, .. } = layout else {
            panic!("expected a QR layout");
        };
        let expected = u32::try_from(side).unwrap() * DEBUG_GRID_SCALE;
        assert_eq!((grid.width(), grid.height()), (expected, expected));
        assert!(dir.path().join("debug/recovered.png").exists());
    }
}
