//! Embedding front end: text in, watermarked image and manifest out.

use image::RgbImage;
use tracing::info;

use crate::codec::{self, Redundancy};
use crate::engine::{Keys, WatermarkEngine};
use crate::error::Result;
use crate::manifest::WatermarkManifest;

/// Encodes payloads and hides them with an engine.
pub struct Watermarker<'e, E: WatermarkEngine + ?Sized> {
    engine: &'e E,
    keys: Keys,
}

impl<'e, E: WatermarkEngine + ?Sized> Watermarker<'e, E> {
    /// Create a watermarker using `keys` for every embed.
    #[must_use]
    pub fn new(engine: &'e E, keys: Keys) -> Self {
        Self { engine, keys }
    }

    /// Encode `text` and embed it in a copy of `image`.
    ///
    /// The returned manifest must be kept with the image: extraction needs its
    /// bit count, layout and keys.
    ///
    /// # Errors
    ///
    /// Returns encoding errors from [`codec::encode`] and embedding errors from
    /// the engine (typically [`crate::Error::CapacityExceeded`]).
    pub fn embed(
        &self,
        image: &RgbImage,
        text: &str,
        redundancy: Redundancy,
    ) -> Result<(RgbImage, WatermarkManifest)> {
        let (bits, layout) = codec::encode(text, redundancy)?;
        let marked = self.engine.embed_bits(image, &bits, self.keys)?;
        let manifest = WatermarkManifest::new(Some(text.to_string()), layout, self.keys);
        info!(
            bits = manifest.bit_count,
            version = ?manifest.qr_version,
            "watermark embedded"
        );
        Ok((marked, manifest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{EcClass, PayloadLayout};
    use crate::error::Error;
    use crate::DctEngine;

    #[test]
    fn embed_returns_matching_manifest() {
        let engine = DctEngine::new();
        let keys = Keys::new(2, 3);
        let img = RgbImage::from_pixel(256, 256, image::Rgb([120, 120, 120]));
        let (marked, manifest) = Watermarker::new(&engine, keys)
            .embed(&img, "v-5.37.2", Redundancy::default())
            .unwrap();
        assert_eq!(marked.dimensions(), img.dimensions());
        assert_eq!(manifest.keys, keys);
        assert_eq!(manifest.text.as_deref(), Some("v-5.37.2"));
        assert!(matches!(
            manifest.layout,
            PayloadLayout::QrGrid { ec: EcClass::High, .. }
        ));
        assert_eq!(manifest.bit_count, manifest.layout.bit_count());
    }

    #[test]
    fn small_image_reports_capacity() {
        let engine = DctEngine::new();
        let img = RgbImage::new(64, 64);
        let err = Watermarker::new(&engine, Keys::default())
            .embed(&img, "v-5.37.2", Redundancy::default())
            .unwrap_err();
        assert!(matches!(err, Error::CapacityExceeded { blocks: 64, .. }), "got {err:?}");
    }
}
