//! Per-image feature extraction.
//!
//! Each sub-extractor is a pure function of the image bytes plus the tuning
//! constants, and fails independently by returning an absent value. The one
//! hard failure is the base image load: an unreadable file excludes that
//! image from every comparison.

pub mod bitmap;
pub mod embedding;
pub mod keypoints;
pub mod phash;

use std::path::Path;

use image::{DynamicImage, GrayImage};

use crate::config::ExtractorTuning;
use crate::error::DedupError;
use bitmap::BitMatrix;
use embedding::SemanticEncoder;
use keypoints::Descriptor;
use phash::Hashers;

/// Shape-matched boolean maps plus the SSIM grayscale.
#[derive(Debug, Clone)]
pub struct StructuralFeatures {
    pub bitmap: BitMatrix,
    pub edges: BitMatrix,
    pub ssim_gray: GrayImage,
}

/// Everything derived from one image, cached per path.
pub struct FeatureSet {
    pub structural: StructuralFeatures,
    pub pdq: Option<Vec<u8>>,
    pub phash: Option<Vec<u8>>,
    pub embedding: Option<Vec<f32>>,
    pub descriptors: Vec<Descriptor>,
}

/// Decode the image; the only fatal step of extraction.
pub fn load_image(path: &Path) -> Result<DynamicImage, DedupError> {
    image::open(path).map_err(|e| DedupError::unreadable(path, e))
}

/// Structural bitmap, edge map, and SSIM grayscale from one decoded image.
/// Equalization is applied once, up front, the same way for every map.
pub fn extract_structural(gray: &GrayImage, tuning: &ExtractorTuning) -> StructuralFeatures {
    let gray = if tuning.equalize {
        bitmap::equalize(gray)
    } else {
        gray.clone()
    };
    StructuralFeatures {
        bitmap: bitmap::median_threshold_bitmap(&gray, tuning),
        edges: bitmap::edge_map(&gray, tuning),
        ssim_gray: bitmap::resize_keep_aspect(&gray, tuning.ssim_size),
    }
}

/// Full extraction for one image.
pub fn extract(
    path: &Path,
    tuning: &ExtractorTuning,
    hashers: &Hashers,
    encoder: &SemanticEncoder,
    use_semantic: bool,
) -> Result<FeatureSet, DedupError> {
    let img = load_image(path)?;
    let gray = img.to_luma8();

    let embedding = if use_semantic {
        encoder.encode(&img)
    } else {
        None
    };

    Ok(FeatureSet {
        structural: extract_structural(&gray, tuning),
        pdq: hashers.pdq_class(&gray),
        phash: hashers.phash(&gray),
        embedding,
        // Descriptors come from the raw grayscale; equalization would
        // perturb the intensity comparisons BRIEF relies on.
        descriptors: keypoints::detect_and_describe(&gray, tuning),
    })
}
