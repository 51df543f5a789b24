//! Local keypoint detection and matching used for geometric verification.
//!
//! FAST-9 corners with 256-bit BRIEF descriptors over the full-resolution
//! grayscale, matched by Hamming distance with the standard nearest /
//! second-nearest ratio test. The match count is the signal; any failure
//! along the way reads as zero matches.

use image::GrayImage;
use imageproc::corners::corners_fast9;
use imageproc::filter::gaussian_blur_f32;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::ExtractorTuning;

/// 256 intensity comparisons = 32 bytes.
pub type Descriptor = [u8; 32];

const PATCH_RADIUS: i32 = 15;
const DESCRIPTOR_BITS: usize = 256;
/// Fixed seed so the sampling pattern is identical across processes.
const PATTERN_SEED: u64 = 0x5EED_B21E;
/// Lowe's ratio: keep a match only when the best distance is below this
/// fraction of the second best.
const RATIO: f32 = 0.7;

/// The BRIEF test pattern: pairs of offsets within the patch.
fn test_pattern() -> Vec<((i32, i32), (i32, i32))> {
    let mut rng = StdRng::seed_from_u64(PATTERN_SEED);
    (0..DESCRIPTOR_BITS)
        .map(|_| {
            (
                (
                    rng.random_range(-PATCH_RADIUS..=PATCH_RADIUS),
                    rng.random_range(-PATCH_RADIUS..=PATCH_RADIUS),
                ),
                (
                    rng.random_range(-PATCH_RADIUS..=PATCH_RADIUS),
                    rng.random_range(-PATCH_RADIUS..=PATCH_RADIUS),
                ),
            )
        })
        .collect()
}

/// Detect corners and describe them. Corners too close to the border for a
/// full patch are discarded; the strongest `max_keypoints` survive.
pub fn detect_and_describe(gray: &GrayImage, tuning: &ExtractorTuning) -> Vec<Descriptor> {
    let (w, h) = gray.dimensions();
    if w <= 2 * PATCH_RADIUS as u32 || h <= 2 * PATCH_RADIUS as u32 {
        return Vec::new();
    }

    let mut corners = corners_fast9(gray, tuning.fast_threshold);
    corners.retain(|c| {
        c.x as i32 >= PATCH_RADIUS
            && c.y as i32 >= PATCH_RADIUS
            && (c.x as i32) < w as i32 - PATCH_RADIUS
            && (c.y as i32) < h as i32 - PATCH_RADIUS
    });
    corners.sort_by(|a, b| b.score.total_cmp(&a.score));
    corners.truncate(tuning.max_keypoints);
    if corners.is_empty() {
        return Vec::new();
    }

    // BRIEF compares single pixels, so smooth first to suppress noise.
    let smoothed = gaussian_blur_f32(gray, 2.0);
    let pattern = test_pattern();

    corners
        .iter()
        .map(|c| {
            let mut desc: Descriptor = [0u8; 32];
            for (bit, &((ax, ay), (bx, by))) in pattern.iter().enumerate() {
                let pa =
                    smoothed.get_pixel((c.x as i32 + ax) as u32, (c.y as i32 + ay) as u32)[0];
                let pb =
                    smoothed.get_pixel((c.x as i32 + bx) as u32, (c.y as i32 + by) as u32)[0];
                if pa < pb {
                    desc[bit / 8] |= 1 << (bit % 8);
                }
            }
            desc
        })
        .collect()
}

fn hamming(a: &Descriptor, b: &Descriptor) -> u32 {
    a.iter().zip(b).map(|(&x, &y)| (x ^ y).count_ones()).sum()
}

/// Count descriptor matches surviving the ratio test. Needs at least two
/// descriptors on each side to form a nearest / second-nearest pair.
/// The query side is picked canonically so the count does not depend on
/// argument order.
pub fn count_matches(a: &[Descriptor], b: &[Descriptor]) -> u32 {
    if a.len() < 2 || b.len() < 2 {
        return 0;
    }
    let (query, train) = if (a.len(), a) <= (b.len(), b) {
        (a, b)
    } else {
        (b, a)
    };
    let mut matches = 0u32;
    for da in query {
        let mut best = u32::MAX;
        let mut second = u32::MAX;
        for db in train {
            let d = hamming(da, db);
            if d < best {
                second = best;
                best = d;
            } else if d < second {
                second = d;
            }
        }
        if second < u32::MAX && (best as f32) < RATIO * (second as f32) {
            matches += 1;
        }
    }
    matches
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A textured image with enough corners for FAST to find.
    fn checkerboard(w: u32, h: u32, cell: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| {
            let on = ((x / cell) + (y / cell)) % 2 == 0;
            // Jitter keeps cells from being perfectly uniform.
            let v = if on { 220 } else { 30 };
            image::Luma([(v + ((x * 31 + y * 17) % 13)) as u8])
        })
    }

    #[test]
    fn pattern_is_deterministic() {
        assert_eq!(test_pattern(), test_pattern());
    }

    #[test]
    fn identical_images_match_strongly() {
        let tuning = ExtractorTuning::default();
        let img = checkerboard(128, 128, 16);
        let a = detect_and_describe(&img, &tuning);
        assert!(a.len() > 10, "expected corners, got {}", a.len());
        let matches = count_matches(&a, &a);
        assert!(
            matches as usize > a.len() / 2,
            "self-match count {matches} of {}",
            a.len()
        );
    }

    #[test]
    fn tiny_image_yields_no_descriptors() {
        let tuning = ExtractorTuning::default();
        let img = GrayImage::from_pixel(20, 20, image::Luma([128]));
        assert!(detect_and_describe(&img, &tuning).is_empty());
    }

    #[test]
    fn too_few_descriptors_count_zero() {
        let d = [0u8; 32];
        assert_eq!(count_matches(&[d], &[d, d]), 0);
        assert_eq!(count_matches(&[], &[]), 0);
    }

    #[test]
    fn match_count_is_order_independent() {
        // Unequal-sized sets where one-directional matching disagrees:
        // querying from the larger side used to count three matches where
        // the other direction counted one.
        let zeros = [0u8; 32];
        let ones = [0xFFu8; 32];
        let mut one_byte = [0u8; 32];
        one_byte[0] = 0xFF;
        let mut two_bytes = [0u8; 32];
        two_bytes[0] = 0xFF;
        two_bytes[1] = 0xFF;

        let a = [zeros, ones];
        let b = [zeros, one_byte, two_bytes];
        assert_eq!(count_matches(&a, &b), count_matches(&b, &a));
    }
}
