//! Coarse-to-fine template matching with zero-mean normalized cross-correlation.
//!
//! A needle image is searched for inside a haystack at a list of candidate scale
//! factors:
//! 1. **Coarse**: both images are downsampled so the haystack's longest side is
//!    at most 128 px, and every placement is scored for every scale.
//! 2. **Fine**: the best coarse hits (plus the identity scale, which needs no
//!    resampling) are re-searched at full resolution in a small window, using
//!    the most textured 128x128 patch of the scaled needle.
//! 3. **Score**: the winning placement is scored over the whole needle.

use std::borrow::Cow;
use std::ops::RangeInclusive;

use image::{imageops, ImageBuffer, Luma, RgbImage};
use tracing::trace;

/// Single-channel float image with samples in `[0, 1]`.
///
/// `imageops::resize` clamps `f32` samples to that range, so planes must
/// never carry 0..255 values.
pub(crate) type Plane = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Longest haystack side at the coarse level.
const COARSE_MAX_SIDE: u32 = 128;
/// Side of the patch used for full-resolution refinement.
const PATCH_SIDE: u32 = 128;
/// Needles smaller than this at the coarse level are skipped.
const MIN_COARSE_SIDE: u32 = 4;
/// Number of coarse hits refined at full resolution.
const COARSE_SHORTLIST: usize = 3;
/// Minimum variance treated as texture.
const MIN_VARIANCE: f64 = 1e-6;

/// Luma plane of an RGB image, normalized to `[0, 1]`.
pub(crate) fn luma_plane(img: &RgbImage) -> Plane {
    Plane::from_fn(img.width(), img.height(), |x, y| {
        let p = img.get_pixel(x, y);
        let luma = 0.299 * f32::from(p[0]) + 0.587 * f32::from(p[1]) + 0.114 * f32::from(p[2]);
        Luma([luma / 255.0])
    })
}

/// Downsampling factor applied to a haystack of the given size at the coarse level.
#[allow(clippy::cast_precision_loss)]
pub(crate) fn coarse_factor(width: u32, height: u32) -> f32 {
    (width.max(height) as f32 / COARSE_MAX_SIDE as f32).ceil().max(1.0)
}

/// Where a needle was found.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Placement {
    /// Index of the winning factor in the caller's list.
    pub(crate) index: usize,
    /// Left edge in haystack pixels.
    pub(crate) x: u32,
    /// Top edge in haystack pixels.
    pub(crate) y: u32,
    /// Width of the scaled needle.
    pub(crate) width: u32,
    /// Height of the scaled needle.
    pub(crate) height: u32,
    /// NCC over the whole scaled needle, clamped to `[0, 1]`.
    pub(crate) score: f32,
}

#[derive(Debug, Clone, Copy)]
struct CoarseHit {
    index: usize,
    x: usize,
    y: usize,
    score: f32,
}

/// Search `needle`, scaled by each of `factors`, inside `haystack`.
///
/// Returns `None` when no factor produces a needle that fits.
pub(crate) fn locate(haystack: &Plane, needle: &Plane, factors: &[f32]) -> Option<Placement> {
    let f = coarse_factor(haystack.width(), haystack.height());
    let coarse_hay = shrink(haystack, f);
    let coarse_hay_integral = Integral::new(&coarse_hay);
    let coarse_needle = shrink(needle, f);
    #[allow(clippy::cast_precision_loss)]
    let ratio = (
        haystack.width() as f32 / coarse_hay.width() as f32,
        haystack.height() as f32 / coarse_hay.height() as f32,
    );

    let score_factor = |(index, &factor): (usize, &f32)| -> Option<CoarseHit> {
        let (sw, sh) = scaled_dims(needle, factor)?;
        if sw > haystack.width() || sh > haystack.height() {
            return None;
        }
        let (cw, ch) = (
            round_dim(sw as f32 / ratio.0).min(coarse_hay.width()),
            round_dim(sh as f32 / ratio.1).min(coarse_hay.height()),
        );
        if cw < MIN_COARSE_SIDE || ch < MIN_COARSE_SIDE {
            return None;
        }
        let scaled = if (cw, ch) == coarse_needle.dimensions() {
            Cow::Borrowed(&coarse_needle)
        } else {
            Cow::Owned(imageops::resize(
                &coarse_needle,
                cw,
                ch,
                imageops::FilterType::Triangle,
            ))
        };
        let template = Template::new(&scaled);
        let xs = 0..=(coarse_hay.width() - cw) as usize;
        let ys = 0..=(coarse_hay.height() - ch) as usize;
        let hit = scan(&coarse_hay, &coarse_hay_integral, &template, xs, ys)?;
        Some(CoarseHit {
            index,
            x: hit.0,
            y: hit.1,
            score: hit.2,
        })
    };

    #[cfg(feature = "parallel")]
    let mut hits: Vec<CoarseHit> = {
        use rayon::prelude::*;
        factors
            .par_iter()
            .enumerate()
            .filter_map(score_factor)
            .collect()
    };
    #[cfg(not(feature = "parallel"))]
    let mut hits: Vec<CoarseHit> = factors.iter().enumerate().filter_map(score_factor).collect();

    if hits.is_empty() {
        return None;
    }

    let identity = hits.iter().copied().find(|h| is_identity(factors[h.index]));
    hits.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.index.cmp(&b.index)));
    hits.truncate(COARSE_SHORTLIST);
    if let Some(id) = identity {
        if hits.iter().all(|h| h.index != id.index) {
            hits.push(id);
        }
    }

    let hay_integral = Integral::new(haystack);
    let mut best: Option<Placement> = None;
    for hit in hits {
        trace!(
            factor = factors[hit.index],
            x = hit.x,
            y = hit.y,
            score = hit.score,
            "refining coarse hit"
        );
        let Some(candidate) = refine(haystack, &hay_integral, needle, factors[hit.index], hit, ratio)
        else {
            continue;
        };
        best = match best {
            None => Some(candidate),
            Some(current) if prefer(&candidate, &current, factors) => Some(candidate),
            keep => keep,
        };
    }
    best
}

fn prefer(candidate: &Placement, current: &Placement, factors: &[f32]) -> bool {
    const TIE: f32 = 1e-6;
    if candidate.score > current.score + TIE {
        return true;
    }
    (candidate.score - current.score).abs() <= TIE
        && is_identity(factors[candidate.index])
        && !is_identity(factors[current.index])
}

fn refine(
    haystack: &Plane,
    integral: &Integral,
    needle: &Plane,
    factor: f32,
    hit: CoarseHit,
    ratio: (f32, f32),
) -> Option<Placement> {
    let (sw, sh) = scaled_dims(needle, factor)?;
    let scaled = if is_identity(factor) {
        Cow::Borrowed(needle)
    } else {
        Cow::Owned(imageops::resize(
            needle,
            sw,
            sh,
            imageops::FilterType::Triangle,
        ))
    };

    let (px, py, patch) = textured_patch(&scaled);
    let template = Template::new(&patch);

    #[allow(clippy::cast_precision_loss)]
    let center = (
        round_dim(hit.x as f32 * ratio.0) as usize,
        round_dim(hit.y as f32 * ratio.1) as usize,
    );
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let radius = ratio.0.max(ratio.1).ceil() as usize + 2;
    let max_x = (haystack.width() - sw) as usize;
    let max_y = (haystack.height() - sh) as usize;
    let xs = window(center.0, radius, max_x);
    let ys = window(center.1, radius, max_y);

    let patch_xs = (xs.start() + px as usize)..=(xs.end() + px as usize);
    let patch_ys = (ys.start() + py as usize)..=(ys.end() + py as usize);
    let (hx, hy, _) = scan(haystack, integral, &template, patch_xs, patch_ys)?;
    #[allow(clippy::cast_possible_truncation)]
    let (x, y) = ((hx - px as usize) as u32, (hy - py as usize) as u32);

    let region = imageops::crop_imm(haystack, x, y, sw, sh).to_image();
    let score = ncc(region.as_raw(), scaled.as_raw()).clamp(0.0, 1.0);

    Some(Placement {
        index: hit.index,
        x,
        y,
        width: sw,
        height: sh,
        score,
    })
}

fn window(center: usize, radius: usize, max: usize) -> RangeInclusive<usize> {
    let lo = center.saturating_sub(radius).min(max);
    let hi = (center + radius).min(max);
    lo..=hi
}

fn is_identity(factor: f32) -> bool {
    (factor - 1.0).abs() < f32::EPSILON
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn round_dim(v: f32) -> u32 {
    v.round().max(0.0) as u32
}

#[allow(clippy::cast_precision_loss)]
fn scaled_dims(plane: &Plane, factor: f32) -> Option<(u32, u32)> {
    if !factor.is_finite() || factor <= 0.0 {
        return None;
    }
    if is_identity(factor) {
        return Some(plane.dimensions());
    }
    let w = round_dim(plane.width() as f32 * factor);
    let h = round_dim(plane.height() as f32 * factor);
    (w > 0 && h > 0).then_some((w, h))
}

fn shrink(plane: &Plane, factor: f32) -> Plane {
    if factor <= 1.0 {
        return plane.clone();
    }
    #[allow(clippy::cast_precision_loss)]
    let (w, h) = (
        round_dim(plane.width() as f32 / factor).max(1),
        round_dim(plane.height() as f32 / factor).max(1),
    );
    imageops::resize(plane, w, h, imageops::FilterType::Triangle)
}

/// Pick the patch with the highest variance among the center and four
/// quarter positions. Returns its offset and pixels.
fn textured_patch(plane: &Plane) -> (u32, u32, Plane) {
    let pw = PATCH_SIDE.min(plane.width());
    let ph = PATCH_SIDE.min(plane.height());
    let (sx, sy) = (plane.width() - pw, plane.height() - ph);
    let offsets = [
        (sx / 4, sy / 4),
        (3 * sx / 4, sy / 4),
        (sx / 4, 3 * sy / 4),
        (3 * sx / 4, 3 * sy / 4),
    ];

    let center = (sx / 2, sy / 2);
    let mut best = (
        center.0,
        center.1,
        imageops::crop_imm(plane, center.0, center.1, pw, ph).to_image(),
    );
    let mut best_sd = stddev(best.2.as_raw());
    for (x, y) in offsets {
        let patch = imageops::crop_imm(plane, x, y, pw, ph).to_image();
        let sd = stddev(patch.as_raw());
        if sd > best_sd {
            best_sd = sd;
            best = (x, y, patch);
        }
    }
    best
}

/// Zero-mean template with precomputed norm.
struct Template {
    width: usize,
    height: usize,
    values: Vec<f64>,
    norm: f64,
}

impl Template {
    fn new(plane: &Plane) -> Self {
        let raw = plane.as_raw();
        #[allow(clippy::cast_precision_loss)]
        let mean = raw.iter().map(|&v| f64::from(v)).sum::<f64>() / raw.len().max(1) as f64;
        let values: Vec<f64> = raw.iter().map(|&v| f64::from(v) - mean).collect();
        let norm = values.iter().map(|v| v * v).sum::<f64>().sqrt();
        Self {
            width: plane.width() as usize,
            height: plane.height() as usize,
            values,
            norm,
        }
    }
}

/// Summed-area tables of values and squared values.
struct Integral {
    stride: usize,
    sum: Vec<f64>,
    sq: Vec<f64>,
}

impl Integral {
    fn new(plane: &Plane) -> Self {
        let (w, h) = (plane.width() as usize, plane.height() as usize);
        let stride = w + 1;
        let mut sum = vec![0.0; stride * (h + 1)];
        let mut sq = vec![0.0; stride * (h + 1)];
        let raw = plane.as_raw();
        for y in 0..h {
            let (mut row_sum, mut row_sq) = (0.0, 0.0);
            for x in 0..w {
                let v = f64::from(raw[y * w + x]);
                row_sum += v;
                row_sq += v * v;
                sum[(y + 1) * stride + x + 1] = sum[y * stride + x + 1] + row_sum;
                sq[(y + 1) * stride + x + 1] = sq[y * stride + x + 1] + row_sq;
            }
        }
        Self { stride, sum, sq }
    }

    fn window(&self, x: usize, y: usize, w: usize, h: usize) -> (f64, f64) {
        let s = self.stride;
        let area = |t: &[f64]| t[(y + h) * s + x + w] - t[y * s + x + w] - t[(y + h) * s + x] + t[y * s + x];
        (area(&self.sum), area(&self.sq))
    }
}

/// Best NCC placement of `template` over the given top-left ranges.
fn scan(
    hay: &Plane,
    integral: &Integral,
    template: &Template,
    xs: RangeInclusive<usize>,
    ys: RangeInclusive<usize>,
) -> Option<(usize, usize, f32)> {
    let hw = hay.width() as usize;
    let raw = hay.as_raw();
    #[allow(clippy::cast_precision_loss)]
    let n = (template.width * template.height) as f64;
    let mut best: Option<(usize, usize, f32)> = None;

    for y in ys {
        for x in xs.clone() {
            if x + template.width > hw || y + template.height > hay.height() as usize {
                continue;
            }
            let (s, q) = integral.window(x, y, template.width, template.height);
            let var = q - s * s / n;
            #[allow(clippy::cast_possible_truncation)]
            let score = if var <= MIN_VARIANCE || template.norm <= MIN_VARIANCE {
                0.0
            } else {
                let mut cross = 0.0;
                for ty in 0..template.height {
                    let row = &raw[(y + ty) * hw + x..(y + ty) * hw + x + template.width];
                    let tpl = &template.values[ty * template.width..(ty + 1) * template.width];
                    cross += tpl
                        .iter()
                        .zip(row)
                        .map(|(t, &h)| t * f64::from(h))
                        .sum::<f64>();
                }
                (cross / (template.norm * var.sqrt())) as f32
            };
            if best.is_none_or(|(_, _, b)| score > b) {
                best = Some((x, y, score));
            }
        }
    }
    best
}

/// Normalized Cross-Correlation between two equal-length float slices.
///
/// `NCC = sum((a-mean_a)*(b-mean_b)) / sqrt(sum((a-mean_a)^2) * sum((b-mean_b)^2))`
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn ncc(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    if a.is_empty() {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = a.len() as f64;

    let mean_a = a.iter().map(|&v| f64::from(v)).sum::<f64>() / n;
    let mean_b = b.iter().map(|&v| f64::from(v)).sum::<f64>() / n;

    let mut numerator = 0.0_f64;
    let mut denom_a = 0.0_f64;
    let mut denom_b = 0.0_f64;

    for (va, vb) in a.iter().zip(b.iter()) {
        let da = f64::from(*va) - mean_a;
        let db = f64::from(*vb) - mean_b;
        numerator += da * db;
        denom_a += da * da;
        denom_b += db * db;
    }

    if denom_a < 1e-9 || denom_b < 1e-9 {
        return 0.0;
    }
    (numerator / (denom_a * denom_b).sqrt()) as f32
}

/// Standard deviation of a float slice.
fn stddev(data: &[f32]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = data.len() as f64;
    let mean = data.iter().map(|&v| f64::from(v)).sum::<f64>() / n;
    let variance = data
        .iter()
        .map(|&v| (f64::from(v) - mean).powi(2))
        .sum::<f64>()
        / n;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(clippy::cast_precision_loss)]
    fn textured(width: u32, height: u32) -> Plane {
        Plane::from_fn(width, height, |x, y| {
            let (fx, fy) = (x as f32, y as f32);
            let v = 128.0 + 40.0 * (fx / 7.0).sin() * (fy / 11.0).cos() + 30.0 * ((fx + 2.0 * fy) / 23.0).sin();
            Luma([v / 255.0])
        })
    }

    #[test]
    fn ncc_returns_one_for_perfect_match() {
        let a = vec![0.1, 0.5, 0.9, 0.3, 0.7];
        let score = ncc(&a, &a);
        assert!(
            (score - 1.0).abs() < 1e-5,
            "Perfect match should give NCC ~1.0, got {score}"
        );
    }

    #[test]
    fn ncc_returns_negative_one_for_inverse() {
        let a = vec![0.1, 0.5, 0.9, 0.3, 0.7];
        let b: Vec<f32> = a.iter().map(|v| 1.0 - v).collect();
        let score = ncc(&a, &b);
        assert!(
            (score + 1.0).abs() < 1e-5,
            "Inverse should give NCC ~-1.0, got {score}"
        );
    }

    #[test]
    fn ncc_of_empty_or_flat_slices_is_zero() {
        assert!(ncc(&[], &[]).abs() < 1e-6);
        assert!(ncc(&[0.4; 8], &[0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8]).abs() < 1e-6);
    }

    #[test]
    fn stddev_of_known_values() {
        // stddev of [1, 2, 3, 4, 5] = sqrt(2.0)
        let data: Vec<f32> = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let sd = stddev(&data);
        assert!((sd - 2.0_f64.sqrt()).abs() < 1e-9, "got {sd}");
        assert!(stddev(&[]).abs() < 1e-12);
    }

    #[test]
    fn integral_window_matches_direct_sum() {
        let plane = textured(20, 15);
        let integral = Integral::new(&plane);
        let (s, q) = integral.window(3, 4, 6, 5);
        let mut es = 0.0;
        let mut eq = 0.0;
        for y in 4..9 {
            for x in 3..9 {
                let v = f64::from(plane.get_pixel(x, y)[0]);
                es += v;
                eq += v * v;
            }
        }
        assert!((s - es).abs() < 1e-6);
        assert!((q - eq).abs() < 1e-3);
    }

    #[test]
    fn locate_finds_exact_offset_at_identity_scale() {
        let hay = textured(400, 300);
        let needle = imageops::crop_imm(&hay, 57, 41, 280, 210).to_image();
        let placement = locate(&hay, &needle, &[0.9, 1.0, 1.1]).unwrap();
        assert_eq!((placement.x, placement.y), (57, 41));
        assert_eq!((placement.width, placement.height), (280, 210));
        assert_eq!(placement.index, 1);
        assert!(placement.score > 0.999, "score {}", placement.score);
    }

    #[test]
    fn locate_skips_factors_that_do_not_fit() {
        let hay = textured(100, 80);
        let needle = textured(90, 70);
        assert!(locate(&hay, &needle, &[1.5, 2.0]).is_none());
    }

    #[test]
    fn luma_plane_is_normalized() {
        let mut img = RgbImage::from_pixel(4, 2, image::Rgb([255, 255, 255]));
        img.put_pixel(0, 0, image::Rgb([0, 0, 0]));
        let plane = luma_plane(&img);
        assert!(plane.get_pixel(0, 0)[0].abs() < 1e-6);
        assert!((plane.get_pixel(3, 1)[0] - 1.0).abs() < 1e-4);
    }

    #[test]
    fn shrink_keeps_texture() {
        let plane = textured(400, 300);
        let small = shrink(&plane, 4.0);
        assert_eq!(small.dimensions(), (100, 75));
        let sd = stddev(small.as_raw());
        assert!(sd > 0.05, "shrunk plane lost its texture, stddev {sd}");
        assert!(small.as_raw().iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn coarse_factor_caps_longest_side() {
        assert!((coarse_factor(100, 50) - 1.0).abs() < f32::EPSILON);
        assert!((coarse_factor(2000, 1200) - 16.0).abs() < f32::EPSILON);
    }
}
