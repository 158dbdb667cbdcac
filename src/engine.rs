//! The watermark engine interface.
//!
//! The recovery pipeline never touches pixels in the transform domain itself.
//! It drives an engine through four operations: embed bits, extract bits,
//! estimate the geometric mapping between a reference and an attacked image,
//! and re-expand a contracted image. [`crate::DctEngine`] is the engine shipped
//! with this crate.

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::codec::BitSequence;
use crate::error::{Error, Result};
use crate::geometry::{GeometryEstimate, Region, Shape};

/// Secret keys shared by embedder and extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Keys {
    /// Seeds the carrier layout inside the image.
    pub image: u64,
    /// Seeds the ordering of payload bits.
    pub payload: u64,
}

impl Keys {
    /// Create a key pair.
    #[must_use]
    pub const fn new(image: u64, payload: u64) -> Self {
        Self { image, payload }
    }
}

impl Default for Keys {
    fn default() -> Self {
        Self::new(1, 1)
    }
}

/// Inclusive range of scale factors (attacked size / reference size) to search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleRange {
    min: f32,
    max: f32,
}

impl ScaleRange {
    /// Create a range.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidScaleRange`] unless `0 < min <= max` and both are finite.
    pub fn new(min: f32, max: f32) -> Result<Self> {
        if !(min.is_finite() && max.is_finite()) || min <= 0.0 || min > max {
            return Err(Error::InvalidScaleRange { min, max });
        }
        Ok(Self { min, max })
    }

    /// Range containing only the identity scale.
    #[must_use]
    pub const fn identity() -> Self {
        Self { min: 1.0, max: 1.0 }
    }

    /// Lower bound.
    #[must_use]
    pub const fn min(self) -> f32 {
        self.min
    }

    /// Upper bound.
    #[must_use]
    pub const fn max(self) -> f32 {
        self.max
    }

    /// True when `scale` lies inside the range.
    #[must_use]
    pub fn contains(self, scale: f32) -> bool {
        (self.min..=self.max).contains(&scale)
    }
}

impl Default for ScaleRange {
    fn default() -> Self {
        Self { min: 0.5, max: 2.0 }
    }
}

/// Ceiling on the geometry search effort.
///
/// This bounds the number of attempts, not wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchBudget {
    /// At most this many candidate scales (plus the identity scale when in range).
    Limited(usize),
    /// Let the engine cover its whole search space.
    Exhaustive,
}

impl Default for SearchBudget {
    fn default() -> Self {
        Self::Limited(200)
    }
}

/// Operations a bit-level watermark engine must provide.
pub trait WatermarkEngine {
    /// Hide `bits` in `image`, returning the watermarked copy.
    ///
    /// # Errors
    ///
    /// Engine-specific; typically a capacity error if the image is too small.
    fn embed_bits(&self, image: &RgbImage, bits: &BitSequence, keys: Keys) -> Result<RgbImage>;

    /// Read `bit_count` bits back from `image`.
    ///
    /// `bit_count` must equal the length used at embed time; any other value
    /// yields garbage.
    ///
    /// # Errors
    ///
    /// Engine-specific.
    fn extract_bits(&self, image: &RgbImage, bit_count: usize, keys: Keys) -> Result<BitSequence>;

    /// Infer where the reference's content lies relative to the attacked image.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GeometryNotFound`] if no match clears the engine's floor.
    fn estimate_geometry(
        &self,
        reference: &RgbImage,
        attacked: &RgbImage,
        scale_range: ScaleRange,
        budget: SearchBudget,
    ) -> Result<GeometryEstimate>;

    /// Re-expand a contracted image to `target_shape`, placing its content at
    /// `region` (reference coordinates) and filling the rest.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReconstructionFailed`] for empty or unusable regions.
    fn recover_contracted(
        &self,
        attacked: &RgbImage,
        region: Region,
        target_shape: Shape,
    ) -> Result<RgbImage>;
}
