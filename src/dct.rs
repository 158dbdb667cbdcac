//! Block DCT carrier with quantization index modulation.
//!
//! The image luma is split into non-overlapping 8x8 blocks. Each block holds one
//! payload bit in a single mid-band DCT coefficient `c`, quantized with step `d`:
//!
//! `c' = (floor(c / d) + 0.25 + 0.5 * bit) * d`
//!
//! Only that coefficient changes, so the spatial update is the coefficient delta
//! times one orthonormal basis function; no full forward/inverse transform is
//! needed. The luma delta is applied equally to R, G and B (the luma weights sum
//! to one).

use std::f32::consts::PI;

use image::RgbImage;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::engine::Keys;

/// Block side in pixels.
pub(crate) const BLOCK: u32 = 8;

const BLOCK_LEN: usize = (BLOCK * BLOCK) as usize;

/// Candidate `(row_freq, col_freq)` coefficients; one is picked per block by key.
const MIDBAND: [(usize, usize); 5] = [(1, 2), (2, 1), (2, 2), (1, 3), (3, 1)];

/// Orthonormal 2D DCT-II basis functions for the mid-band coefficients.
pub(crate) struct BasisTable {
    basis: Vec<[f32; BLOCK_LEN]>,
}

impl BasisTable {
    pub(crate) fn new() -> Self {
        let n = BLOCK as usize;
        let cos = |u: usize, x: usize| -> f32 {
            #[allow(clippy::cast_precision_loss)]
            let alpha = if u == 0 {
                (1.0 / n as f32).sqrt()
            } else {
                (2.0 / n as f32).sqrt()
            };
            #[allow(clippy::cast_precision_loss)]
            let angle = (2 * x + 1) as f32 * u as f32 * PI / (2 * n) as f32;
            alpha * angle.cos()
        };

        let basis = MIDBAND
            .iter()
            .map(|&(u, v)| {
                let mut table = [0.0_f32; BLOCK_LEN];
                for y in 0..n {
                    for x in 0..n {
                        table[y * n + x] = cos(u, y) * cos(v, x);
                    }
                }
                table
            })
            .collect();
        Self { basis }
    }

    /// Project a luma block onto basis function `which`.
    pub(crate) fn coefficient(&self, which: usize, luma: &[f32; BLOCK_LEN]) -> f32 {
        self.basis[which]
            .iter()
            .zip(luma.iter())
            .map(|(b, l)| b * l)
            .sum()
    }

    /// Add `delta` times basis function `which` to the block at `(bx, by)`.
    pub(crate) fn apply(&self, image: &mut RgbImage, bx: u32, by: u32, which: usize, delta: f32) {
        let basis = &self.basis[which];
        for dy in 0..BLOCK {
            for dx in 0..BLOCK {
                let offset = basis[(dy * BLOCK + dx) as usize] * delta;
                let px = image.get_pixel_mut(bx * BLOCK + dx, by * BLOCK + dy);
                for ch in 0..3 {
                    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                    {
                        px[ch] = (f32::from(px[ch]) + offset).round().clamp(0.0, 255.0) as u8;
                    }
                }
            }
        }
    }
}

/// Luma values (`0.299 R + 0.587 G + 0.114 B`) of the block at `(bx, by)`.
pub(crate) fn block_luma(image: &RgbImage, bx: u32, by: u32) -> [f32; BLOCK_LEN] {
    let mut out = [0.0_f32; BLOCK_LEN];
    for dy in 0..BLOCK {
        for dx in 0..BLOCK {
            let px = image.get_pixel(bx * BLOCK + dx, by * BLOCK + dy);
            out[(dy * BLOCK + dx) as usize] =
                0.299 * f32::from(px[0]) + 0.587 * f32::from(px[1]) + 0.114 * f32::from(px[2]);
        }
    }
    out
}

/// Quantize `c` onto the lattice for `bit`.
pub(crate) fn quantize(c: f32, bit: bool, step: f32) -> f32 {
    let offset = if bit { 0.75 } else { 0.25 };
    ((c / step).floor() + offset) * step
}

/// Soft vote in `[-1, 1]`: positive for a 1 bit, negative for a 0 bit, zero on
/// lattice points (flat blocks).
pub(crate) fn vote(c: f32, step: f32) -> f32 {
    let phase = (c / step).rem_euclid(1.0);
    -(2.0 * PI * phase).sin()
}

/// Number of whole blocks along each axis.
pub(crate) fn block_grid(image: &RgbImage) -> (u32, u32) {
    (image.width() / BLOCK, image.height() / BLOCK)
}

/// Raster-order `(index, bx, by)` of every whole block.
pub(crate) fn block_positions(image: &RgbImage) -> impl Iterator<Item = (usize, u32, u32)> {
    let (bw, bh) = block_grid(image);
    (0..bh)
        .flat_map(move |by| (0..bw).map(move |bx| (bx, by)))
        .enumerate()
        .map(|(b, (bx, by))| (b, bx, by))
}

/// Per-block assignment of payload bit and carrier coefficient.
pub(crate) struct CarrierPlan {
    /// Payload bit index carried by each block, raster order.
    pub(crate) bit_for_block: Vec<usize>,
    /// Index into the mid-band table for each block.
    pub(crate) coeff_for_block: Vec<usize>,
}

impl CarrierPlan {
    /// Build the plan for `blocks` carriers and `bit_count` payload bits.
    ///
    /// Blocks cycle through a key-dependent permutation of the payload bits, so
    /// every bit is repeated roughly `blocks / bit_count` times across the image.
    pub(crate) fn new(blocks: usize, bit_count: usize, keys: Keys) -> Self {
        let mut order: Vec<usize> = (0..bit_count).collect();
        let mut rng = ChaCha20Rng::seed_from_u64(keys.payload);
        // u32 ranges keep the shuffle identical on 32- and 64-bit targets
        for i in (1..order.len()).rev() {
            #[allow(clippy::cast_possible_truncation)]
            let j = rng.gen_range(0..=(i as u32)) as usize;
            order.swap(i, j);
        }

        let mut rng = ChaCha20Rng::seed_from_u64(keys.image);
        #[allow(clippy::cast_possible_truncation)]
        let choices = MIDBAND.len() as u32;
        let coeff_for_block = (0..blocks)
            .map(|_| rng.gen_range(0..choices) as usize)
            .collect();
        let bit_for_block = (0..blocks).map(|b| order[b % bit_count]).collect();

        Self {
            bit_for_block,
            coeff_for_block,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basis_functions_are_orthonormal() {
        let table = BasisTable::new();
        for (i, a) in table.basis.iter().enumerate() {
            for (j, b) in table.basis.iter().enumerate() {
                let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((dot - expected).abs() < 1e-4, "<{i},{j}> = {dot}");
            }
        }
    }

    #[test]
    fn quantized_coefficients_vote_for_their_bit() {
        let step = 28.0;
        for c in [-100.0_f32, -3.5, 0.0, 12.25, 57.0, 311.9] {
            assert!(vote(quantize(c, true, step), step) > 0.99, "c={c}");
            assert!(vote(quantize(c, false, step), step) < -0.99, "c={c}");
        }
    }

    #[test]
    fn lattice_points_vote_neutral() {
        assert!(vote(0.0, 28.0).abs() < 1e-6);
        assert!(vote(56.0, 28.0).abs() < 1e-4);
    }

    #[test]
    fn apply_shifts_only_the_chosen_coefficient() {
        let table = BasisTable::new();
        let mut img = RgbImage::from_pixel(8, 8, image::Rgb([120, 130, 140]));
        let before = block_luma(&img, 0, 0);
        let c0 = table.coefficient(2, &before);
        table.apply(&mut img, 0, 0, 2, 20.0);
        let after = block_luma(&img, 0, 0);
        let c1 = table.coefficient(2, &after);
        // rounding to u8 adds at most a fraction of a unit
        assert!((c1 - c0 - 20.0).abs() < 1.5, "delta {}", c1 - c0);
        let other = table.coefficient(0, &after);
        assert!(other.abs() < 1.5, "leak {other}");
    }

    #[test]
    fn carrier_plan_is_deterministic_and_covers_every_bit() {
        let keys = Keys::new(7, 11);
        let a = CarrierPlan::new(100, 21, keys);
        let b = CarrierPlan::new(100, 21, keys);
        assert_eq!(a.bit_for_block, b.bit_for_block);
        assert_eq!(a.coeff_for_block, b.coeff_for_block);

        let mut seen = [false; 21];
        for &bit in &a.bit_for_block[..21] {
            seen[bit] = true;
        }
        assert!(seen.iter().all(|&s| s));
        assert!(a.coeff_for_block.iter().all(|&c| c < MIDBAND.len()));
    }

    #[test]
    fn block_positions_follow_raster_order() {
        let img = RgbImage::new(20, 17);
        let blocks: Vec<_> = block_positions(&img).collect();
        assert_eq!(blocks, vec![(0, 0, 0), (1, 1, 0), (2, 0, 1), (3, 1, 1)]);
    }

    #[test]
    fn different_payload_keys_permute_differently() {
        let a = CarrierPlan::new(64, 64, Keys::new(1, 1));
        let b = CarrierPlan::new(64, 64, Keys::new(1, 2));
        assert_ne!(a.bit_for_block, b.bit_for_block);
    }
}
