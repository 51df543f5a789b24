//! The pairwise metric engine: normalized similarity measurements between
//! two images' feature sets. All measurements are symmetric componentwise.

use image::GrayImage;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::features::bitmap::BitMatrix;
use crate::features::embedding::cosine;
use crate::features::keypoints;
use crate::features::phash::{hamming_distance, HASH_DISTANCE_SENTINEL};
use crate::features::FeatureSet;

/// The full measurement set for one unordered pair.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PairSimilarity {
    /// Median-threshold bitmap overlap, 0-100.
    pub structural: f64,
    /// Edge map overlap, 0-100.
    pub edge: f64,
    /// Structural similarity index, 0-100.
    pub ssim: f64,
    /// Semantic cosine similarity, 0-100.
    pub semantic: f64,
    /// 256-bit hash Hamming distance; sentinel when non-comparable.
    pub pdq_distance: u32,
    /// 64-bit pHash Hamming distance; sentinel when non-comparable.
    pub phash_distance: u32,
    /// Keypoint matches surviving the ratio test.
    pub keypoint_matches: u32,
}

impl PairSimilarity {
    /// A pair with no usable primary hash cannot be compared at all.
    pub fn is_comparable(&self) -> bool {
        self.pdq_distance != HASH_DISTANCE_SENTINEL
    }

    /// The "totally dissimilar" value used when feature shapes mismatch.
    pub fn dissimilar() -> Self {
        Self {
            structural: 0.0,
            edge: 0.0,
            ssim: 0.0,
            semantic: 0.0,
            pdq_distance: HASH_DISTANCE_SENTINEL,
            phash_distance: HASH_DISTANCE_SENTINEL,
            keypoint_matches: 0,
        }
    }

    /// Compute every signal for a pair of cached feature sets.
    pub fn compute(a: &FeatureSet, b: &FeatureSet) -> Self {
        if a.structural.bitmap.shape() != b.structural.bitmap.shape()
            || a.structural.edges.shape() != b.structural.edges.shape()
        {
            // Fixed-target resizing should make this impossible; degrade
            // rather than compare mismatched shapes.
            warn!(
                "feature shape mismatch: {:?} vs {:?}",
                a.structural.bitmap.shape(),
                b.structural.bitmap.shape()
            );
            return Self::dissimilar();
        }

        Self {
            structural: overlap_percent(&a.structural.bitmap, &b.structural.bitmap),
            edge: overlap_percent(&a.structural.edges, &b.structural.edges),
            ssim: ssim_percent(&a.structural.ssim_gray, &b.structural.ssim_gray),
            semantic: 100.0 * cosine(a.embedding.as_deref(), b.embedding.as_deref()),
            pdq_distance: hamming_distance(a.pdq.as_deref(), b.pdq.as_deref()),
            phash_distance: hamming_distance(a.phash.as_deref(), b.phash.as_deref()),
            keypoint_matches: keypoints::count_matches(&a.descriptors, &b.descriptors),
        }
    }
}

/// Overlap as a percentage of the smaller set population:
/// `100 * |A ∧ B| / min(|A|, |B|)`. Zero when either map is empty.
pub fn overlap_percent(a: &BitMatrix, b: &BitMatrix) -> f64 {
    let ca = a.count();
    let cb = b.count();
    if ca == 0 || cb == 0 {
        return 0.0;
    }
    100.0 * a.and_count(b) as f64 / ca.min(cb) as f64
}

/// Mean windowed SSIM over the two grayscales zero-padded to the
/// elementwise max of their dimensions, scaled to 0-100.
pub fn ssim_percent(a: &GrayImage, b: &GrayImage) -> f64 {
    let width = a.width().max(b.width());
    let height = a.height().max(b.height());
    if width == 0 || height == 0 {
        return 0.0;
    }
    100.0 * windowed_ssim(a, b, width, height)
}

const SSIM_WINDOW: u32 = 8;
const SSIM_L: f64 = 255.0;
const SSIM_K1: f64 = 0.01;
const SSIM_K2: f64 = 0.03;

fn pixel_or_zero(img: &GrayImage, x: u32, y: u32) -> f64 {
    if x < img.width() && y < img.height() {
        img.get_pixel(x, y)[0] as f64
    } else {
        0.0
    }
}

fn windowed_ssim(a: &GrayImage, b: &GrayImage, width: u32, height: u32) -> f64 {
    let c1 = (SSIM_K1 * SSIM_L).powi(2);
    let c2 = (SSIM_K2 * SSIM_L).powi(2);

    let mut total = 0.0;
    let mut windows = 0u32;

    let mut wy = 0;
    while wy < height {
        let mut wx = 0;
        while wx < width {
            let x1 = (wx + SSIM_WINDOW).min(width);
            let y1 = (wy + SSIM_WINDOW).min(height);
            let n = ((x1 - wx) * (y1 - wy)) as f64;

            let mut sum_a = 0.0;
            let mut sum_b = 0.0;
            let mut sum_aa = 0.0;
            let mut sum_bb = 0.0;
            let mut sum_ab = 0.0;
            for y in wy..y1 {
                for x in wx..x1 {
                    let pa = pixel_or_zero(a, x, y);
                    let pb = pixel_or_zero(b, x, y);
                    sum_a += pa;
                    sum_b += pb;
                    sum_aa += pa * pa;
                    sum_bb += pb * pb;
                    sum_ab += pa * pb;
                }
            }

            let mu_a = sum_a / n;
            let mu_b = sum_b / n;
            let var_a = (sum_aa / n - mu_a * mu_a).max(0.0);
            let var_b = (sum_bb / n - mu_b * mu_b).max(0.0);
            let cov = sum_ab / n - mu_a * mu_b;

            let ssim = ((2.0 * mu_a * mu_b + c1) * (2.0 * cov + c2))
                / ((mu_a * mu_a + mu_b * mu_b + c1) * (var_a + var_b + c2));
            total += ssim;
            windows += 1;

            wx += SSIM_WINDOW;
        }
        wy += SSIM_WINDOW;
    }

    if windows == 0 {
        0.0
    } else {
        total / windows as f64
    }
}
