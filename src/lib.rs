//! Invisible QR-coded watermarks that survive cropping, rescaling and screenshots.
//!
//! A short text payload is encoded as a QR module grid (Reed-Solomon error
//! correction absorbs bit errors) and hidden in the image by a
//! [`WatermarkEngine`]. When the marked image is later cropped, rescaled or
//! captured inside a larger screenshot, [`Recovery`] uses the original marked
//! image as a reference to undo the geometry before extracting the bits.
//!
//! # Quick Start
//!
//! ```no_run
//! use qrmark::codec::Redundancy;
//! use qrmark::{DctEngine, Keys, Watermarker};
//!
//! let engine = DctEngine::new();
//! let img = image::open("photo.png").unwrap().to_rgb8();
//! let (marked, manifest) = Watermarker::new(&engine, Keys::default())
//!     .embed(&img, "v-5.37.2", Redundancy::default())
//!     .unwrap();
//! marked.save("photo_wm.png").unwrap();
//! manifest.save("photo_wm.json".as_ref()).unwrap();
//! ```
//!
//! # Recovery
//!
//! Geometry is estimated first; the attack is then classified as an
//! *extension* (screenshot with chrome) or a *contraction* (crop), the image is
//! mapped back to the reference size and the payload is decoded. Check
//! `geometry.score` before trusting the result.
//!
//! ```no_run
//! use qrmark::{DctEngine, Recovery, RecoveryConfig, WatermarkManifest};
//!
//! let engine = DctEngine::new();
//! let manifest = WatermarkManifest::load("photo_wm.json".as_ref()).unwrap();
//! let reference = image::open("photo_wm.png").unwrap().to_rgb8();
//! let attacked = image::open("screenshot.png").unwrap().to_rgb8();
//! let config = RecoveryConfig { keys: manifest.keys, ..RecoveryConfig::default() };
//! let result = Recovery::new(&engine, config)
//!     .recover_and_decode(&reference, &attacked, manifest.bit_count, &manifest.layout)
//!     .unwrap();
//! println!("{:?} (score {:.3})", result.payload, result.geometry.score);
//! ```

#![deny(missing_docs)]

pub mod attack;
pub mod codec;
mod dct;
mod dct_engine;
mod embed;
mod engine;
pub mod error;
pub mod geometry;
pub mod io;
mod manifest;
mod matching;
pub mod qr;
mod recovery;
pub mod screenshot;

pub use dct_engine::{DctEngine, DEFAULT_STRENGTH, MIN_MATCH_SCORE};
pub use embed::Watermarker;
pub use engine::{Keys, ScaleRange, SearchBudget, WatermarkEngine};
pub use error::{Error, Result};
pub use geometry::{AttackKind, GeometryEstimate, MatchQuality, Region, Shape};
pub use manifest::WatermarkManifest;
pub use recovery::{Recovery, RecoveryConfig, RecoveryResult};
pub use screenshot::{make_screenshot, BorderSizes};
