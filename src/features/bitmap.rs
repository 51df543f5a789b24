//! Structural bitmap and edge-map extraction.
//!
//! Both maps are boolean matrices over a fixed square target so any two
//! images compare shape-for-shape. The square is reached by scaling the
//! longer side down and center-cropping, never padding.

use image::imageops::{self, FilterType};
use image::GrayImage;
use imageproc::contrast::equalize_histogram;
use imageproc::edges::canny;
use imageproc::filter::median_filter;
use serde::{Deserialize, Serialize};

use crate::config::ExtractorTuning;

/// Boolean matrix with a known shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitMatrix {
    width: u32,
    height: u32,
    bits: Vec<bool>,
}

impl BitMatrix {
    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> bool) -> Self {
        let mut bits = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                bits.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            bits,
        }
    }

    pub fn shape(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Number of set bits.
    pub fn count(&self) -> u64 {
        self.bits.iter().filter(|&&b| b).count() as u64
    }

    /// Number of positions set in both matrices. Shapes must match.
    pub fn and_count(&self, other: &Self) -> u64 {
        debug_assert_eq!(self.shape(), other.shape());
        self.bits
            .iter()
            .zip(&other.bits)
            .filter(|(&a, &b)| a && b)
            .count() as u64
    }
}

/// Median intensity of a grayscale image, by histogram.
pub fn median_intensity(gray: &GrayImage) -> u8 {
    let mut hist = [0u32; 256];
    for p in gray.pixels() {
        hist[p[0] as usize] += 1;
    }
    let total = gray.width() as u64 * gray.height() as u64;
    let half = total / 2;
    let mut seen = 0u64;
    for (value, &count) in hist.iter().enumerate() {
        seen += count as u64;
        if seen > half {
            return value as u8;
        }
    }
    255
}

/// Scale the longer side down to `target`, preserving aspect ratio.
/// Images already within the target are returned unchanged.
pub fn resize_keep_aspect(gray: &GrayImage, target: u32) -> GrayImage {
    let (w, h) = gray.dimensions();
    let longest = w.max(h);
    if longest <= target {
        return gray.clone();
    }
    let scale = target as f64 / longest as f64;
    let new_w = ((w as f64 * scale) as u32).max(1);
    let new_h = ((h as f64 * scale) as u32).max(1);
    imageops::resize(gray, new_w, new_h, FilterType::Triangle)
}

/// Scale-then-center-crop to an exact square. Never pads.
pub fn resize_to_square(gray: &GrayImage, target: u32) -> GrayImage {
    let (w, h) = gray.dimensions();
    if w == target && h == target {
        return gray.clone();
    }
    let scale = target as f64 / w.max(h) as f64;
    let new_w = ((w as f64 * scale) as u32).max(1);
    let new_h = ((h as f64 * scale) as u32).max(1);
    let mut resized = imageops::resize(gray, new_w, new_h, FilterType::Triangle);

    if new_w != new_h {
        let side = new_w.min(new_h);
        let x0 = (new_w - side) / 2;
        let y0 = (new_h - side) / 2;
        resized = imageops::crop_imm(&resized, x0, y0, side, side).to_image();
    }
    if resized.dimensions() != (target, target) {
        resized = imageops::resize(&resized, target, target, FilterType::Triangle);
    }
    resized
}

/// Histogram equalization used to flatten lighting differences before
/// thresholding.
pub fn equalize(gray: &GrayImage) -> GrayImage {
    equalize_histogram(gray)
}

/// Median-threshold bitmap: each bit marks intensity above the image's
/// own median.
pub fn median_threshold_bitmap(gray: &GrayImage, tuning: &ExtractorTuning) -> BitMatrix {
    let square = resize_to_square(gray, tuning.bitmap_size);
    let median = median_intensity(&square);
    BitMatrix::from_fn(square.width(), square.height(), |x, y| {
        square.get_pixel(x, y)[0] > median
    })
}

/// Canny edge map over the same square target. Thresholds are either the
/// fixed constants or derived from the median intensity.
pub fn edge_map(gray: &GrayImage, tuning: &ExtractorTuning) -> BitMatrix {
    let mut square = resize_to_square(gray, tuning.edge_size);
    if tuning.blur_radius > 0 {
        square = median_filter(&square, tuning.blur_radius, tuning.blur_radius);
    }
    let (low, high) = if tuning.auto_canny {
        let v = median_intensity(&square) as f64;
        let low = ((1.0 - tuning.sigma) * v).max(0.0) as f32;
        let high = ((1.0 + tuning.sigma) * v).min(255.0) as f32;
        // Canny requires low < high; a flat image can collapse both to 0.
        (low, high.max(low + 1.0))
    } else {
        (tuning.canny_low, tuning.canny_high)
    };
    let edges = canny(&square, low, high);
    BitMatrix::from_fn(edges.width(), edges.height(), |x, y| {
        edges.get_pixel(x, y)[0] > 0
    })
}
