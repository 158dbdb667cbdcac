//! Block-DCT watermark engine with NCC geometry search.

use std::borrow::Cow;

use image::{imageops, RgbImage};
use tracing::{debug, info};

use crate::codec::BitSequence;
use crate::dct::{self, BasisTable, CarrierPlan};
use crate::engine::{Keys, ScaleRange, SearchBudget, WatermarkEngine};
use crate::error::{Error, Result};
use crate::geometry::{classify, AttackKind, GeometryEstimate, Region, Shape};
use crate::matching::{self, Placement};

/// Default quantization step.
pub const DEFAULT_STRENGTH: f32 = 28.0;
/// Minimum accepted match score for a geometry estimate.
pub const MIN_MATCH_SCORE: f32 = 0.3;
/// Upper bound on candidate scales for [`SearchBudget::Exhaustive`].
const MAX_EXHAUSTIVE_SCALES: usize = 1024;
/// Smallest usable quantization step.
const MIN_STRENGTH: f32 = 1.0;

/// Watermark engine hiding one bit per 8x8 luma block.
///
/// Each block quantizes a keyed mid-band DCT coefficient. Bits are repeated
/// across the image and recovered by soft majority vote, so a partial image
/// (a crop padded back to full size) still yields most bits.
///
/// # Example
///
/// ```no_run
/// use qrmark::{DctEngine, Keys, WatermarkEngine};
/// use qrmark::codec::{encode, Redundancy};
///
/// let engine = DctEngine::new();
/// let img = image::open("photo.png").unwrap().to_rgb8();
/// let (bits, _) = encode("v-5.37.2", Redundancy::default()).unwrap();
/// let marked = engine.embed_bits(&img, &bits, Keys::default()).unwrap();
/// ```
pub struct DctEngine {
    strength: f32,
    basis: BasisTable,
}

impl DctEngine {
    /// Create an engine with the default strength.
    #[must_use]
    pub fn new() -> Self {
        Self::with_strength(DEFAULT_STRENGTH)
    }

    /// Create an engine with a custom quantization step.
    ///
    /// Larger steps survive more distortion at the cost of visibility.
    /// Non-finite values fall back to the default; values below 1 are raised to 1.
    #[must_use]
    pub fn with_strength(strength: f32) -> Self {
        let strength = if strength.is_finite() {
            strength.max(MIN_STRENGTH)
        } else {
            DEFAULT_STRENGTH
        };
        Self {
            strength,
            basis: BasisTable::new(),
        }
    }

    /// Quantization step in use.
    #[must_use]
    pub fn strength(&self) -> f32 {
        self.strength
    }

    /// Number of carrier blocks in an image of this size.
    #[must_use]
    pub fn capacity(image: &RgbImage) -> usize {
        let (bw, bh) = dct::block_grid(image);
        bw as usize * bh as usize
    }

    fn check_capacity(image: &RgbImage, bits: usize) -> Result<usize> {
        let blocks = Self::capacity(image);
        if blocks < bits {
            return Err(Error::CapacityExceeded { bits, blocks });
        }
        Ok(blocks)
    }
}

impl Default for DctEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl WatermarkEngine for DctEngine {
    fn embed_bits(&self, image: &RgbImage, bits: &BitSequence, keys: Keys) -> Result<RgbImage> {
        if bits.is_empty() {
            return Err(Error::EmptyPayload);
        }
        let blocks = Self::check_capacity(image, bits.len())?;
        let plan = CarrierPlan::new(blocks, bits.len(), keys);
        let payload = bits.as_slice();

        let mut out = image.clone();
        for (b, bx, by) in dct::block_positions(image) {
            let (bit_index, which) = (plan.bit_for_block[b], plan.coeff_for_block[b]);
            let luma = dct::block_luma(&out, bx, by);
            let c = self.basis.coefficient(which, &luma);
            let target = dct::quantize(c, payload[bit_index] == 1, self.strength);
            self.basis.apply(&mut out, bx, by, which, target - c);
        }

        debug!(
            bits = bits.len(),
            blocks,
            strength = self.strength,
            "embedded payload bits"
        );
        Ok(out)
    }

    fn extract_bits(&self, image: &RgbImage, bit_count: usize, keys: Keys) -> Result<BitSequence> {
        if bit_count == 0 {
            return Err(Error::ShapeMismatch {
                context: "extraction bit count",
                expected: 1,
                actual: 0,
            });
        }
        let blocks = Self::check_capacity(image, bit_count)?;
        let plan = CarrierPlan::new(blocks, bit_count, keys);

        let mut votes = vec![0.0_f32; bit_count];
        for (b, bx, by) in dct::block_positions(image) {
            let luma = dct::block_luma(image, bx, by);
            let c = self.basis.coefficient(plan.coeff_for_block[b], &luma);
            votes[plan.bit_for_block[b]] += dct::vote(c, self.strength);
        }

        debug!(bits = bit_count, blocks, "extracted payload bits");
        Ok(BitSequence::from_bools(votes.into_iter().map(|v| v > 0.0)))
    }

    fn estimate_geometry(
        &self,
        reference: &RgbImage,
        attacked: &RgbImage,
        scale_range: ScaleRange,
        budget: SearchBudget,
    ) -> Result<GeometryEstimate> {
        let target_shape = Shape::of(reference);
        let kind = classify(target_shape, Shape::of(attacked));

        let (hay, needle) = match kind {
            AttackKind::Extension => (attacked, reference),
            AttackKind::Contraction => (reference, attacked),
        };
        let hay = matching::luma_plane(hay);
        let needle = matching::luma_plane(needle);

        let scales = candidate_scales(scale_range, budget, reference, &hay);
        let factors: Vec<f32> = match kind {
            AttackKind::Extension => scales.clone(),
            AttackKind::Contraction => scales.iter().map(|k| 1.0 / k).collect(),
        };
        debug!(
            %kind,
            candidates = scales.len(),
            min = scale_range.min(),
            max = scale_range.max(),
            "searching geometry"
        );

        let Some(Placement {
            index,
            x,
            y,
            width,
            height,
            score,
        }) = matching::locate(&hay, &needle, &factors)
        else {
            return Err(Error::GeometryNotFound {
                score: 0.0,
                floor: MIN_MATCH_SCORE,
            });
        };

        if score < MIN_MATCH_SCORE {
            return Err(Error::GeometryNotFound {
                score,
                floor: MIN_MATCH_SCORE,
            });
        }

        let estimate = GeometryEstimate {
            region: Region::from_origin(x, y, width, height),
            target_shape,
            scale: scales[index],
            score,
        };
        info!(
            region = %estimate.region,
            scale = estimate.scale,
            score = estimate.score,
            "geometry estimated"
        );
        Ok(estimate)
    }

    fn recover_contracted(
        &self,
        attacked: &RgbImage,
        region: Region,
        target_shape: Shape,
    ) -> Result<RgbImage> {
        if region.is_empty() {
            return Err(Error::ReconstructionFailed {
                region,
                reason: "region is empty".to_string(),
            });
        }
        if !region.fits_within(target_shape) {
            return Err(Error::ReconstructionFailed {
                region,
                reason: format!("region exceeds target {target_shape}"),
            });
        }

        let content = if attacked.dimensions() == (region.width(), region.height()) {
            Cow::Borrowed(attacked)
        } else {
            Cow::Owned(imageops::resize(
                attacked,
                region.width(),
                region.height(),
                imageops::FilterType::Lanczos3,
            ))
        };

        let mut canvas = RgbImage::new(target_shape.width, target_shape.height);
        imageops::replace(
            &mut canvas,
            &*content,
            i64::from(region.x1),
            i64::from(region.y1),
        );
        debug!(%region, target = %target_shape, "re-expanded contracted image");
        Ok(canvas)
    }
}

/// Scale factors (attacked size / reference size) to try, ascending.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn candidate_scales(
    range: ScaleRange,
    budget: SearchBudget,
    reference: &RgbImage,
    hay: &matching::Plane,
) -> Vec<f32> {
    let (min, max) = (range.min(), range.max());
    let count = match budget {
        SearchBudget::Limited(n) => n,
        SearchBudget::Exhaustive => {
            let coarse = matching::coarse_factor(hay.width(), hay.height());
            let side = reference.width().max(reference.height()).max(1) as f32;
            let step = coarse / side;
            (((max - min) / step).ceil() as usize + 1).min(MAX_EXHAUSTIVE_SCALES)
        }
    };

    let mut scales: Vec<f32> = match count {
        0 => Vec::new(),
        1 => vec![min],
        n => (0..n)
            .map(|i| min + (max - min) * i as f32 / (n - 1) as f32)
            .collect(),
    };
    if range.contains(1.0) {
        scales.push(1.0);
    }
    scales.sort_by(f32::total_cmp);
    scales.dedup_by(|a, b| (*a - *b).abs() < 1e-6);
    scales
}
