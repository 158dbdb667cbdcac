//! Error types for the qrmark crate.

use crate::codec::BitSequence;
use crate::geometry::Region;

/// Errors that can occur while encoding, embedding, recovering or decoding a watermark.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The engine could not match the attacked image against the reference.
    #[error("no geometric match found (best score {score:.4}, floor {floor:.2})")]
    GeometryNotFound {
        /// Best similarity score reached during the search (0 when no candidate fit).
        score: f32,
        /// Minimum score the engine accepts.
        floor: f32,
    },

    /// A bit count or image dimension disagrees with the declared layout.
    #[error("shape mismatch in {context}: expected {expected}, got {actual}")]
    ShapeMismatch {
        /// What was being checked.
        context: &'static str,
        /// Expected length or dimension.
        expected: usize,
        /// Actual length or dimension.
        actual: usize,
    },

    /// Cropping, padding or resizing produced an empty or out-of-bounds image.
    #[error("reconstruction failed for region {region}: {reason}")]
    ReconstructionFailed {
        /// Region the reconstruction was attempted on.
        region: Region,
        /// Why the region was rejected.
        reason: String,
    },

    /// Bits were extracted but no QR symbol could be read from them.
    #[error("no decodable QR symbol in {side}x{side} grid")]
    NotDecodable {
        /// Grid side in modules.
        side: usize,
        /// The raw extracted grid, row-major, kept for inspection.
        bits: BitSequence,
    },

    /// A synthesized canvas would not fit in memory.
    #[error("canvas of {width}x{height} pixels is too large")]
    CanvasTooLarge {
        /// Requested canvas width.
        width: u64,
        /// Requested canvas height.
        height: u64,
    },

    /// The payload text is empty.
    #[error("payload is empty")]
    EmptyPayload,

    /// The payload text exceeds the supported length.
    #[error("payload is {len} bytes, maximum is {max}")]
    PayloadTooLong {
        /// Payload length in bytes.
        len: usize,
        /// Maximum payload length in bytes.
        max: usize,
    },

    /// The QR encoder rejected the payload.
    #[error("QR encoding failed: {0}")]
    QrEncode(#[from] qrcode::types::QrError),

    /// The image has fewer carrier blocks than bits to embed.
    #[error("image holds {blocks} carrier blocks, payload needs {bits}")]
    CapacityExceeded {
        /// Number of bits requested.
        bits: usize,
        /// Number of carrier blocks available.
        blocks: usize,
    },

    /// A bit sequence contained a value other than 0 or 1.
    #[error("invalid bit value {value} at index {index}")]
    InvalidBit {
        /// Position of the offending value.
        index: usize,
        /// The offending value.
        value: u8,
    },

    /// A scale search range is empty, inverted or non-positive.
    #[error("invalid scale range [{min}, {max}]")]
    InvalidScaleRange {
        /// Lower bound.
        min: f32,
        /// Upper bound.
        max: f32,
    },

    /// The manifest could not be serialized or parsed.
    #[error("manifest error: {0}")]
    Manifest(#[from] serde_json::Error),

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The image format is not supported.
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    /// An error occurred during image processing (load, save, encode).
    #[error("image processing error: {0}")]
    Image(#[from] image::ImageError),
}

/// A specialized `Result` type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let io_err = Error::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(io_err.to_string().contains("gone"));

        let unsupported = Error::UnsupportedFormat("tiff".to_string());
        assert!(unsupported.to_string().contains("tiff"));

        let mismatch = Error::ShapeMismatch {
            context: "qr grid",
            expected: 441,
            actual: 440,
        };
        let msg = mismatch.to_string();
        assert!(msg.contains("qr grid"));
        assert!(msg.contains("441"));
        assert!(msg.contains("440"));

        let not_found = Error::GeometryNotFound {
            score: 0.125,
            floor: 0.3,
        };
        assert!(not_found.to_string().contains("0.1250"));
    }

    #[test]
    fn reconstruction_error_shows_region() {
        let err = Error::ReconstructionFailed {
            region: Region::new(10, 20, 10, 40),
            reason: "empty region".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("(10, 20)-(10, 40)"), "got {msg}");
        assert!(msg.contains("empty region"));
    }
}
