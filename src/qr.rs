//! QR module grids: building, rendering and reading.
//!
//! A grid is a row-major [`BitSequence`] of `side * side` modules where 1 is a
//! dark module. Reading first decodes the modules in place, since the side is
//! already known and finder patterns need not be located. When that fails the
//! grid is rendered to a grayscale image and handed to the `rqrr` symbol
//! reader at increasing pixel pitches.

use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use image::{imageops, GrayImage, Luma};
use tracing::{debug, trace, warn};

use crate::codec::{BitSequence, EcClass};
use crate::error::{Error, Result};

/// Pixel pitches (pixels per module) tried in order when reading a rendered grid.
///
/// The reader needs several pixels per module to sample the timing pattern.
pub const UPSCALE_FACTORS: [u32; 4] = [10, 20, 30, 50];

/// Light modules added around the symbol before reading.
const QUIET_ZONE_MODULES: u32 = 4;

const DARK: Luma<u8> = Luma([0]);
const LIGHT: Luma<u8> = Luma([255]);

/// Build the QR module grid for `text` at the given error-correction class.
///
/// Returns the flattened grid and its side length in modules.
pub(crate) fn build_grid(text: &str, ec: EcClass) -> Result<(BitSequence, usize)> {
    let code = qrcode::QrCode::with_error_correction_level(text.as_bytes(), ec.level())?;
    let side = code.width();
    let bits = BitSequence::from_bools(
        code.into_colors()
            .into_iter()
            .map(|c| c == qrcode::Color::Dark),
    );
    debug!(side, bits = bits.len(), ec = %ec, "built QR grid");
    Ok((bits, side))
}

/// Side length of a square grid holding `len` modules, if `len` is a perfect square.
#[must_use]
pub fn square_side(len: usize) -> Option<usize> {
    if len == 0 {
        return None;
    }
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let root = (len as f64).sqrt().round() as usize;
    (root.checked_mul(root) == Some(len)).then_some(root)
}

/// Render a grid as a black-on-white image, `scale` pixels per module.
///
/// The result is `side * scale` pixels square with no quiet zone.
///
/// # Errors
///
/// Returns [`Error::ShapeMismatch`] if `bits` does not hold `side * side` modules.
pub fn render_grid(bits: &BitSequence, side: usize, scale: u32) -> Result<GrayImage> {
    render_with_margin(bits, side, scale.max(1), 0)
}

/// Write a debug rendering of a grid as a lossless PNG.
///
/// # Errors
///
/// Returns an error if the grid shape is wrong or the file cannot be written.
pub fn save_grid(bits: &BitSequence, side: usize, scale: u32, path: &Path) -> Result<()> {
    let img = render_grid(bits, side, scale)?;
    img.save_with_format(path, image::ImageFormat::Png)?;
    debug!(path = %path.display(), "saved grid rendering");
    Ok(())
}

/// Read the text stored in a grid.
///
/// # Errors
///
/// Returns [`Error::ShapeMismatch`] for a wrongly sized grid and
/// [`Error::NotDecodable`] if neither the in-place decode nor any pixel pitch
/// yields a readable symbol.
pub fn read_grid(bits: &BitSequence, side: usize) -> Result<String> {
    let base = render_with_margin(bits, side, 1, QUIET_ZONE_MODULES)?;

    if let Some(text) = guarded(|| decode_modules(bits, side)) {
        debug!(side, "QR grid decoded in place");
        return Ok(text);
    }
    trace!(side, "in-place decode failed, falling back to the symbol reader");

    for factor in UPSCALE_FACTORS {
        let candidate = imageops::resize(
            &base,
            base.width() * factor,
            base.height() * factor,
            imageops::FilterType::Nearest,
        );
        if let Some(text) = guarded(|| detect_and_decode(&candidate)) {
            debug!(factor, "QR symbol decoded");
            return Ok(text);
        }
        trace!(factor, "no QR symbol at this pitch");
    }

    Err(Error::NotDecodable {
        side,
        bits: bits.clone(),
    })
}

/// Modules of a known-size grid, as seen by the `rqrr` decoder.
struct ModuleGrid<'a> {
    bits: &'a [u8],
    side: usize,
}

impl rqrr::BitGrid for ModuleGrid<'_> {
    fn size(&self) -> usize {
        self.side
    }

    fn bit(&self, y: usize, x: usize) -> bool {
        self.bits[y * self.side + x] == 1
    }
}

fn decode_modules(bits: &BitSequence, side: usize) -> Option<String> {
    let grid = rqrr::Grid::new(ModuleGrid {
        bits: bits.as_slice(),
        side,
    });
    grid.decode().ok().map(|(_, content)| content)
}

#[allow(clippy::cast_possible_truncation)]
fn detect_and_decode(img: &GrayImage) -> Option<String> {
    let (w, h) = (img.width() as usize, img.height() as usize);
    let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(w, h, |x, y| {
        img.get_pixel(x as u32, y as u32)[0]
    });
    prepared
        .detect_grids()
        .iter()
        .find_map(|grid| grid.decode().ok())
        .map(|(_, content)| content)
}

/// Run a reader step, treating a fault inside the reader as "no symbol".
fn guarded<F: FnOnce() -> Option<String>>(read: F) -> Option<String> {
    panic::catch_unwind(AssertUnwindSafe(read)).unwrap_or_else(|_| {
        warn!("QR reader faulted on this input");
        None
    })
}

fn render_with_margin(
    bits: &BitSequence,
    side: usize,
    scale: u32,
    margin_modules: u32,
) -> Result<GrayImage> {
    if side == 0 || bits.len() != side * side {
        return Err(Error::ShapeMismatch {
            context: "qr grid",
            expected: side * side,
            actual: bits.len(),
        });
    }
    let side_u32 = u32::try_from(side).map_err(|_| Error::ShapeMismatch {
        context: "qr grid side",
        expected: u32::MAX as usize,
        actual: side,
    })?;
    let px = (side_u32 + 2 * margin_modules) * scale;
    let mut img = GrayImage::from_pixel(px, px, LIGHT);

    for (i, &bit) in bits.as_slice().iter().enumerate() {
        if bit == 0 {
            continue;
        }
        #[allow(clippy::cast_possible_truncation)]
        let (row, col) = ((i / side) as u32, (i % side) as u32);
        let x0 = (col + margin_modules) * scale;
        let y0 = (row + margin_modules) * scale;
        for dy in 0..scale {
            for dx in 0..scale {
                img.put_pixel(x0 + dx, y0 + dy, DARK);
            }
        }
    }
    Ok(img)
}
