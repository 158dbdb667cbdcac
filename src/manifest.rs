//! Out-of-band record of how a payload was embedded.
//!
//! Extraction needs the exact bit count and layout used at embed time. The
//! manifest carries them (plus the keys) as a small JSON file next to the image.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::codec::PayloadLayout;
use crate::engine::Keys;
use crate::error::Result;

/// Everything an extractor needs to read a watermark back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatermarkManifest {
    /// The embedded text, kept for verification. Omit it to keep the payload secret.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Payload layout (plain or QR grid).
    pub layout: PayloadLayout,
    /// Number of embedded bits.
    pub bit_count: usize,
    /// QR version of the symbol, for QR layouts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr_version: Option<i16>,
    /// Embedding keys.
    pub keys: Keys,
}

impl WatermarkManifest {
    /// Build a manifest for a layout and keys.
    #[must_use]
    pub fn new(text: Option<String>, layout: PayloadLayout, keys: Keys) -> Self {
        Self {
            text,
            layout,
            bit_count: layout.bit_count(),
            qr_version: layout.qr_version(),
            keys,
        }
    }

    /// Write the manifest as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        debug!(path = %path.display(), bits = self.bit_count, "wrote manifest");
        Ok(())
    }

    /// Read a manifest written by [`WatermarkManifest::save`].
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::EcClass;
    use crate::error::Error;

    #[test]
    fn new_derives_bit_count_and_version() {
        let layout = PayloadLayout::QrGrid {
            side: 25,
            ec: EcClass::High,
        };
        let m = WatermarkManifest::new(Some("v-5.37.2".into()), layout, Keys::new(5, 6));
        assert_eq!(m.bit_count, 625);
        assert_eq!(m.qr_version, Some(2));
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wm.json");
        let m = WatermarkManifest::new(None, PayloadLayout::Plain { bit_len: 64 }, Keys::default());
        m.save(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("text"), "absent text should be omitted: {raw}");
        assert!(!raw.contains("qr_version"));

        assert_eq!(WatermarkManifest::load(&path).unwrap(), m);
    }

    #[test]
    fn malformed_manifest_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            WatermarkManifest::load(&path),
            Err(Error::Manifest(_))
        ));
        assert!(matches!(
            WatermarkManifest::load(&dir.path().join("missing.json")),
            Err(Error::Io(_))
        ));
    }
}
