//! Geometric primitives and attack classification.
//!
//! An attacked image is compared to the reference it was derived from. If it is
//! at least as large as the reference along either axis it is treated as an
//! *extension* (a screenshot with surrounding chrome); otherwise it is a
//! *contraction* (a crop, possibly rescaled).

use std::fmt;

use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Score above which a geometric match is considered reliable.
pub const GOOD_MATCH_SCORE: f32 = 0.85;
/// Score below which a geometric match should not be trusted.
pub const UNRELIABLE_MATCH_SCORE: f32 = 0.70;

/// Pixel dimensions of an image, height first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape {
    /// Number of rows.
    pub height: u32,
    /// Number of columns.
    pub width: u32,
}

impl Shape {
    /// Create a shape from `(height, width)`.
    #[must_use]
    pub const fn new(height: u32, width: u32) -> Self {
        Self { height, width }
    }

    /// Shape of an RGB image.
    #[must_use]
    pub fn of(image: &RgbImage) -> Self {
        Self::new(image.height(), image.width())
    }

    /// Number of pixels.
    #[must_use]
    pub fn area(self) -> u64 {
        u64::from(self.height) * u64::from(self.width)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Axis-aligned rectangle `[x1, x2) x [y1, y2)` in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    /// Left edge (inclusive).
    pub x1: u32,
    /// Top edge (inclusive).
    pub y1: u32,
    /// Right edge (exclusive).
    pub x2: u32,
    /// Bottom edge (exclusive).
    pub y2: u32,
}

impl Region {
    /// Create a region from its corners.
    #[must_use]
    pub const fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Region of the given size anchored at `(x, y)`.
    ///
    /// The far edges saturate at `u32::MAX`.
    #[must_use]
    pub const fn from_origin(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self::new(x, y, x.saturating_add(width), y.saturating_add(height))
    }

    /// Width in pixels; zero for inverted regions.
    #[must_use]
    pub const fn width(self) -> u32 {
        self.x2.saturating_sub(self.x1)
    }

    /// Height in pixels; zero for inverted regions.
    #[must_use]
    pub const fn height(self) -> u32 {
        self.y2.saturating_sub(self.y1)
    }

    /// Size of the region as a [`Shape`].
    #[must_use]
    pub const fn shape(self) -> Shape {
        Shape::new(self.height(), self.width())
    }

    /// True when the region covers no pixel.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// True when the region lies entirely inside an image of the given shape.
    #[must_use]
    pub const fn fits_within(self, shape: Shape) -> bool {
        self.x2 <= shape.width && self.y2 <= shape.height
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})-({}, {})", self.x1, self.y1, self.x2, self.y2)
    }
}

/// Kind of geometric attack, decided from image dimensions alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttackKind {
    /// The attacked image is at least as large as the reference along one axis.
    Extension,
    /// The attacked image is smaller than the reference along both axes.
    Contraction,
}

impl fmt::Display for AttackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Extension => f.write_str("extension"),
            Self::Contraction => f.write_str("contraction"),
        }
    }
}

/// Classify an attack by comparing attacked and reference dimensions.
///
/// Returns [`AttackKind::Extension`] when the attacked image is at least as wide
/// **or** at least as tall as the reference. An image stretched along one axis
/// and shrunk along the other is therefore reported as an extension; the
/// recovery strategies do not distinguish that case.
#[must_use]
pub fn classify(reference: Shape, attacked: Shape) -> AttackKind {
    if attacked.width >= reference.width || attacked.height >= reference.height {
        AttackKind::Extension
    } else {
        AttackKind::Contraction
    }
}

/// Inferred mapping from an attacked image back to the reference frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeometryEstimate {
    /// Matched rectangle. In attacked-image coordinates for extensions, in
    /// reference coordinates for contractions.
    pub region: Region,
    /// Dimensions the recovered image must have (the reference's).
    pub target_shape: Shape,
    /// Size ratio of attacked content to reference content.
    pub scale: f32,
    /// Similarity of the match in `[0, 1]`. Not a probability.
    pub score: f32,
}

impl GeometryEstimate {
    /// Bucket the match score into a coarse confidence level.
    #[must_use]
    pub fn quality(&self) -> MatchQuality {
        MatchQuality::from_score(self.score)
    }
}

/// Coarse confidence level of a geometric match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchQuality {
    /// Score above [`GOOD_MATCH_SCORE`].
    Good,
    /// Score between the two thresholds.
    Fair,
    /// Score below [`UNRELIABLE_MATCH_SCORE`].
    Unreliable,
}

impl MatchQuality {
    /// Bucket a raw score.
    #[must_use]
    pub fn from_score(score: f32) -> Self {
        if score > GOOD_MATCH_SCORE {
            Self::Good
        } else if score < UNRELIABLE_MATCH_SCORE {
            Self::Unreliable
        } else {
            Self::Fair
        }
    }
}

impl fmt::Display for MatchQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Good => f.write_str("good"),
            Self::Fair => f.write_str("fair"),
            Self::Unreliable => f.write_str("unreliable"),
        }
    }
}
