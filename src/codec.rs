//! Payload codec: text to fixed-length bit sequences and back.
//!
//! Two layouts are supported:
//!
//! - **QR grid** ([`Redundancy::ErrorCorrecting`]): the text becomes a QR
//!   symbol whose module grid is flattened row-major (dark = 1). The symbol's
//!   Reed-Solomon blocks absorb bit errors from a lossy extraction channel.
//! - **Plain** ([`Redundancy::None`]): 8 bits per UTF-8 byte, MSB first. Any bit
//!   error corrupts the corresponding character.
//!
//! The chosen layout is returned as a [`PayloadLayout`] and must travel
//! out-of-band with the watermarked image: extraction needs the exact bit
//! count up front.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::qr;

/// Maximum payload length in bytes.
pub const MAX_PAYLOAD_BYTES: usize = 128;

/// An ordered sequence of 0/1 values.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BitSequence(Vec<u8>);

impl BitSequence {
    /// Build a sequence from values that must all be 0 or 1.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBit`] on the first value greater than 1.
    pub fn from_bits(bits: Vec<u8>) -> Result<Self> {
        if let Some((index, &value)) = bits.iter().enumerate().find(|(_, &b)| b > 1) {
            return Err(Error::InvalidBit { index, value });
        }
        Ok(Self(bits))
    }

    /// Build a sequence from booleans (`true` = 1).
    #[must_use]
    pub fn from_bools<I: IntoIterator<Item = bool>>(bits: I) -> Self {
        Self(bits.into_iter().map(u8::from).collect())
    }

    /// Number of bits.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when the sequence holds no bits.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Bits as a slice of 0/1 bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Bit at `index` as a boolean, if in range.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<bool> {
        self.0.get(index).map(|&b| b == 1)
    }

    /// Invert the bit at `index`. Out-of-range indices are ignored.
    pub fn flip(&mut self, index: usize) {
        if let Some(b) = self.0.get_mut(index) {
            *b ^= 1;
        }
    }

    /// Consume the sequence, returning the underlying 0/1 bytes.
    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

/// QR error-correction class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EcClass {
    /// About 7% of codewords recoverable.
    Low,
    /// About 15% of codewords recoverable.
    Medium,
    /// About 25% of codewords recoverable.
    Quartile,
    /// About 30% of codewords recoverable.
    #[default]
    High,
}

impl EcClass {
    /// Nominal fraction of codewords the class can restore.
    #[must_use]
    pub fn recovery_fraction(self) -> f32 {
        match self {
            Self::Low => 0.07,
            Self::Medium => 0.15,
            Self::Quartile => 0.25,
            Self::High => 0.30,
        }
    }

    pub(crate) fn level(self) -> qrcode::EcLevel {
        match self {
            Self::Low => qrcode::EcLevel::L,
            Self::Medium => qrcode::EcLevel::M,
            Self::Quartile => qrcode::EcLevel::Q,
            Self::High => qrcode::EcLevel::H,
        }
    }
}

impl fmt::Display for EcClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (letter, pct) = match self {
            Self::Low => ('L', 7),
            Self::Medium => ('M', 15),
            Self::Quartile => ('Q', 25),
            Self::High => ('H', 30),
        };
        write!(f, "{letter} ({pct}% recovery)")
    }
}

/// Redundancy scheme applied when encoding a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Redundancy {
    /// Plain 8-bit-per-byte encoding.
    None,
    /// QR symbol with the given error-correction class.
    ErrorCorrecting(EcClass),
}

impl Default for Redundancy {
    fn default() -> Self {
        Self::ErrorCorrecting(EcClass::High)
    }
}

/// Layout of an encoded payload, needed to decode it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PayloadLayout {
    /// Plain bytes, `bit_len` bits in total.
    Plain {
        /// Total number of bits.
        bit_len: usize,
    },
    /// Square QR module grid.
    QrGrid {
        /// Modules per side.
        side: usize,
        /// Error-correction class used at encode time.
        ec: EcClass,
    },
}

impl PayloadLayout {
    /// Number of bits `L` an extractor must request.
    #[must_use]
    pub fn bit_count(&self) -> usize {
        match *self {
            Self::Plain { bit_len } => bit_len,
            Self::QrGrid { side, .. } => side * side,
        }
    }

    /// QR version implied by the grid side, for QR layouts.
    #[must_use]
    pub fn qr_version(&self) -> Option<i16> {
        match *self {
            Self::Plain { .. } => None,
            Self::QrGrid { side, .. } => i16::try_from(side.checked_sub(17)? / 4).ok(),
        }
    }
}

/// Encode `text` into a bit sequence under the given redundancy scheme.
///
/// # Errors
///
/// Returns [`Error::EmptyPayload`] or [`Error::PayloadTooLong`] for out-of-range
/// input, and [`Error::QrEncode`] if the QR encoder rejects the data.
pub fn encode(text: &str, redundancy: Redundancy) -> Result<(BitSequence, PayloadLayout)> {
    if text.is_empty() {
        return Err(Error::EmptyPayload);
    }
    if text.len() > MAX_PAYLOAD_BYTES {
        return Err(Error::PayloadTooLong {
            len: text.len(),
            max: MAX_PAYLOAD_BYTES,
        });
    }

    match redundancy {
        Redundancy::None => {
            let bits = BitSequence::from_bools(
                text.bytes()
                    .flat_map(|byte| (0..8).rev().map(move |i| (byte >> i) & 1 == 1)),
            );
            let layout = PayloadLayout::Plain {
                bit_len: bits.len(),
            };
            Ok((bits, layout))
        }
        Redundancy::ErrorCorrecting(ec) => {
            let (bits, side) = qr::build_grid(text, ec)?;
            Ok((bits, PayloadLayout::QrGrid { side, ec }))
        }
    }
}

/// Decode a bit sequence produced by [`encode`] (possibly corrupted in transit).
///
/// # Errors
///
/// - [`Error::ShapeMismatch`] if the length disagrees with `layout`. For QR
///   layouts a length that is not a perfect square is rejected before any
///   reshape is attempted.
/// - [`Error::NotDecodable`] if no QR symbol could be read.
pub fn decode(bits: &BitSequence, layout: &PayloadLayout) -> Result<String> {
    match *layout {
        PayloadLayout::Plain { bit_len } => {
            if bits.len() % 8 != 0 || bits.len() != bit_len {
                return Err(Error::ShapeMismatch {
                    context: "plain payload",
                    expected: bit_len,
                    actual: bits.len(),
                });
            }
            let bytes: Vec<u8> = bits
                .as_slice()
                .chunks_exact(8)
                .map(|chunk| chunk.iter().fold(0u8, |acc, &b| (acc << 1) | b))
                .collect();
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
        PayloadLayout::QrGrid { side, .. } => {
            let actual_side = qr::square_side(bits.len()).ok_or(Error::ShapeMismatch {
                context: "qr grid (not a perfect square)",
                expected: side * side,
                actual: bits.len(),
            })?;
            if actual_side != side {
                return Err(Error::ShapeMismatch {
                    context: "qr grid",
                    expected: side * side,
                    actual: bits.len(),
                });
            }
            qr::read_grid(bits, side)
        }
    }
}

/// Fraction of positions at which two sequences differ.
///
/// Positions beyond the shorter sequence count as errors. Returns 0 for two
/// empty sequences.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn bit_error_rate(expected: &BitSequence, actual: &BitSequence) -> f64 {
    let total = expected.len().max(actual.len());
    if total == 0 {
        return 0.0;
    }
    let common = expected.len().min(actual.len());
    let differing = expected
        .as_slice()
        .iter()
        .zip(actual.as_slice())
        .filter(|(a, b)| a != b)
        .count()
        + (total - common);
    differing as f64 / total as f64
}
