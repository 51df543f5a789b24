//! Engine configuration: signal weights, safety guardrails, and extractor
//! tuning. Everything is an explicit immutable value handed to the engine;
//! there is no process-wide mutable configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which perceptual-hash signals participate in the composite score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSet {
    /// Structural bitmap + SSIM + semantic + 256-bit DCT hash + keypoints.
    Base,
    /// Base signals plus the 64-bit DCT pHash as a complementary hash.
    WithPhash,
}

/// Whether a pair was scored with the regular or the aerial profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileKind {
    Regular,
    Aerial,
}

/// A named weight/threshold configuration. Weights are authored to sum to
/// 1.0 but the scorer does not enforce that.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightProfile {
    pub w_structural: f64,
    pub w_ssim: f64,
    pub w_semantic: f64,
    pub w_pdq: f64,
    pub w_phash: f64,
    pub w_keypoints: f64,

    /// Composite score at or above this is duplicate territory (0-1 scale).
    pub score_threshold: f64,
    /// Never drop a pair whose structural overlap % is below this,
    /// unless the keypoint override fires.
    pub structural_floor: f64,
    /// PDQ Hamming distance at or above this means "totally different".
    pub pdq_ceiling: u32,
    /// pHash Hamming distance ceiling (64-bit hash, so max 64).
    pub phash_ceiling: u32,
    /// Minimum keypoint matches for the override rule.
    pub min_matches: u32,
    /// Semantic similarity % that, combined with `min_matches`, bypasses
    /// the structural floor and hash ceiling.
    pub semantic_high: f64,
    /// Keypoint matches at or above `strong_multiplier * min_matches`
    /// bypass the guards on their own. `None` disables the count-only
    /// route; the combined count-plus-semantic rule always applies.
    pub strong_multiplier: Option<f64>,
}

impl WeightProfile {
    pub fn regular(set: SignalSet) -> Self {
        match set {
            SignalSet::Base => Self {
                w_structural: 0.30,
                w_ssim: 0.0,
                w_semantic: 0.30,
                w_pdq: 0.30,
                w_phash: 0.0,
                w_keypoints: 0.10,
                score_threshold: 0.40,
                structural_floor: 67.0,
                pdq_ceiling: 115,
                phash_ceiling: 20,
                min_matches: 50,
                semantic_high: 85.0,
                strong_multiplier: None,
            },
            SignalSet::WithPhash => Self {
                w_structural: 0.38,
                w_ssim: 0.10,
                w_semantic: 0.20,
                w_pdq: 0.14,
                w_phash: 0.05,
                w_keypoints: 0.13,
                score_threshold: 0.55,
                structural_floor: 58.0,
                pdq_ceiling: 140,
                phash_ceiling: 20,
                min_matches: 150,
                semantic_high: 92.0,
                strong_multiplier: Some(3.0),
            },
        }
    }

    pub fn aerial(set: SignalSet) -> Self {
        match set {
            SignalSet::Base => Self {
                w_structural: 0.30,
                w_ssim: 0.0,
                w_semantic: 0.30,
                w_pdq: 0.30,
                w_phash: 0.0,
                w_keypoints: 0.10,
                score_threshold: 0.32,
                structural_floor: 62.0,
                pdq_ceiling: 130,
                phash_ceiling: 18,
                min_matches: 50,
                semantic_high: 85.0,
                strong_multiplier: None,
            },
            SignalSet::WithPhash => Self {
                w_structural: 0.38,
                w_ssim: 0.10,
                w_semantic: 0.25,
                w_pdq: 0.13,
                w_phash: 0.04,
                w_keypoints: 0.10,
                score_threshold: 0.38,
                structural_floor: 55.0,
                pdq_ceiling: 130,
                phash_ceiling: 18,
                min_matches: 100,
                semantic_high: 92.0,
                strong_multiplier: Some(3.0),
            },
        }
    }

    /// Profile tuned for the staged evaluator: SSIM carries weight so the
    /// final composite stage has a structural tie-breaker, and the
    /// count-only override backs the keypoint gate at 1.5x.
    pub fn cascade_regular() -> Self {
        Self {
            w_structural: 0.30,
            w_ssim: 0.10,
            w_semantic: 0.25,
            w_pdq: 0.25,
            w_phash: 0.0,
            w_keypoints: 0.10,
            score_threshold: 0.35,
            strong_multiplier: Some(1.5),
            ..Self::regular(SignalSet::Base)
        }
    }

    pub fn cascade_aerial() -> Self {
        Self {
            w_structural: 0.30,
            w_ssim: 0.10,
            w_semantic: 0.25,
            w_pdq: 0.25,
            w_phash: 0.0,
            w_keypoints: 0.10,
            score_threshold: 0.32,
            strong_multiplier: Some(1.5),
            ..Self::aerial(SignalSet::Base)
        }
    }
}

/// Thresholds for the early-exit semantic gate of the staged evaluator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CascadeThresholds {
    /// Semantic similarity % at or above this accepts immediately.
    pub semantic_high: f64,
    /// Semantic similarity % below this rejects immediately.
    pub semantic_low: f64,
}

impl Default for CascadeThresholds {
    fn default() -> Self {
        Self {
            semantic_high: 85.0,
            semantic_low: 70.0,
        }
    }
}

/// Global tuning constants for feature extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorTuning {
    /// Square side of the structural bitmap.
    pub bitmap_size: u32,
    /// Square side of the edge map.
    pub edge_size: u32,
    /// Longest side of the SSIM grayscale (aspect preserved).
    pub ssim_size: u32,
    /// Median blur radius applied before edge detection; 0 disables.
    pub blur_radius: u32,
    /// Fixed Canny thresholds, used when `auto_canny` is off.
    pub canny_low: f32,
    pub canny_high: f32,
    /// Derive Canny thresholds from the median intensity instead.
    pub auto_canny: bool,
    /// Deviation factor for auto Canny: [(1-sigma)*median, (1+sigma)*median].
    pub sigma: f64,
    /// Histogram equalization before thresholding.
    pub equalize: bool,
    /// FAST corner threshold for keypoint detection.
    pub fast_threshold: u8,
    /// Cap on keypoints per image, strongest corners first.
    pub max_keypoints: usize,
}

impl Default for ExtractorTuning {
    fn default() -> Self {
        Self {
            bitmap_size: 640,
            edge_size: 640,
            ssim_size: 320,
            blur_radius: 2,
            canny_low: 50.0,
            canny_high: 150.0,
            auto_canny: true,
            sigma: 0.33,
            equalize: true,
            fast_threshold: 20,
            max_keypoints: 512,
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    pub signal_set: SignalSet,
    /// Enables the semantic-embedding signal. Without a usable encoder the
    /// signal reads as absent regardless of this flag.
    pub use_semantic: bool,
    /// ONNX vision encoder; `None` leaves the semantic signal disabled.
    pub encoder_model: Option<PathBuf>,
    /// Sequential strategy: compare all pairs instead of adjacent only.
    pub full_scan: bool,
    /// Worker-pool size for feature extraction.
    pub max_workers: usize,
    pub tuning: ExtractorTuning,
    pub regular: WeightProfile,
    pub aerial: WeightProfile,
    pub cascade: CascadeThresholds,
}

impl DedupConfig {
    pub fn new(set: SignalSet) -> Self {
        Self {
            signal_set: set,
            use_semantic: true,
            encoder_model: None,
            full_scan: false,
            max_workers: 16,
            tuning: ExtractorTuning::default(),
            regular: WeightProfile::regular(set),
            aerial: WeightProfile::aerial(set),
            cascade: CascadeThresholds::default(),
        }
    }

    /// Configuration preset for the staged evaluator.
    pub fn cascading() -> Self {
        Self {
            regular: WeightProfile::cascade_regular(),
            aerial: WeightProfile::cascade_aerial(),
            ..Self::new(SignalSet::Base)
        }
    }

    /// Profile applicable to a pair: aerial wins if either side is aerial.
    pub fn profile_for(&self, kind: ProfileKind) -> &WeightProfile {
        match kind {
            ProfileKind::Regular => &self.regular,
            ProfileKind::Aerial => &self.aerial,
        }
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self::new(SignalSet::Base)
    }
}
