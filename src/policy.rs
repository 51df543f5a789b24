//! Composite scoring and the duplicate decision policy.
//!
//! A pair is a duplicate iff the weighted composite score clears the
//! profile threshold AND the structural floor holds (or the keypoint
//! override fires) AND the hash distance is under the ceiling (or the
//! override fires). Pairs with no usable primary hash are non-comparable
//! and never decided either way.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::{ProfileKind, SignalSet, WeightProfile};
use crate::metrics::PairSimilarity;

/// Camera metadata supplied by the caller; EXIF extraction is out of scope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CameraMetadata {
    pub make: Option<String>,
    pub model: Option<String>,
}

pub type MetadataMap = HashMap<PathBuf, CameraMetadata>;

/// Drone/aircraft classification from filename and camera metadata.
/// Absent metadata defaults to "not aerial".
pub fn is_aerial(path: &Path, metadata: &MetadataMap) -> bool {
    let filename = path
        .file_name()
        .map(|f| f.to_string_lossy().to_uppercase())
        .unwrap_or_default();
    if filename.contains("DJI") {
        return true;
    }

    let Some(meta) = metadata.get(path) else {
        return false;
    };
    let make = meta.make.as_deref().unwrap_or("").to_uppercase();
    if make.is_empty() {
        return false;
    }
    if make.contains("DJI") || make.contains("AUTEL ROBOTICS") {
        return true;
    }
    // Hasselblad builds DJI gimbal cameras; the X1D line is handheld.
    if make.contains("HASSELBLAD") {
        let model = meta.model.as_deref().unwrap_or("").to_uppercase();
        return !model.is_empty() && !model.contains("X1D");
    }
    false
}

/// Profile applicable to a pair: aerial wins if either side is aerial.
pub fn profile_kind_for_pair(a: &Path, b: &Path, metadata: &MetadataMap) -> ProfileKind {
    if is_aerial(a, metadata) || is_aerial(b, metadata) {
        ProfileKind::Aerial
    } else {
        ProfileKind::Regular
    }
}

/// Per-signal values normalized to [0, 1] as they enter the weighted sum.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NormalizedSignals {
    pub structural: f64,
    pub ssim: f64,
    pub semantic: f64,
    pub pdq: f64,
    pub phash: f64,
    pub keypoints: f64,
}

/// Which rule settled the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// Composite score cleared the threshold with all guards passing.
    ScoreThreshold,
    /// Structural overlap under the floor with no override.
    StructuralFloorFail,
    /// Hash distance at or over the ceiling with no override.
    HashCeilingFail,
    /// Keypoint override bypassed a failing guard.
    KeypointOverride,
    /// Staged evaluation: semantic similarity cleared the high bar.
    SemanticAccept,
    /// Staged evaluation: semantic similarity fell under the low bar.
    SemanticReject,
    /// Composite score under the threshold.
    ScoreBelowThreshold,
    /// No usable hash; the pair was never decided.
    NonComparable,
}

/// The decision policy's output for one pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateDecision {
    pub duplicate: bool,
    pub trigger: Trigger,
    pub score: f64,
    pub normalized: NormalizedSignals,
    /// Override state, recorded even when it was not needed.
    pub override_active: bool,
}

fn hash_closeness(distance: u32, ceiling: u32) -> f64 {
    if distance >= ceiling {
        0.0
    } else {
        1.0 - distance as f64 / ceiling as f64
    }
}

/// Normalize each raw signal to [0, 1] under the given profile.
pub fn normalize(sim: &PairSimilarity, profile: &WeightProfile) -> NormalizedSignals {
    NormalizedSignals {
        structural: sim.structural / 100.0,
        ssim: sim.ssim / 100.0,
        semantic: sim.semantic / 100.0,
        pdq: hash_closeness(sim.pdq_distance, profile.pdq_ceiling),
        phash: hash_closeness(sim.phash_distance, profile.phash_ceiling),
        keypoints: (sim.keypoint_matches as f64 / 100.0).min(1.0),
    }
}

/// Weighted composite score on the 0-1 scale.
pub fn composite_score(normalized: &NormalizedSignals, profile: &WeightProfile) -> f64 {
    profile.w_structural * normalized.structural
        + profile.w_ssim * normalized.ssim
        + profile.w_semantic * normalized.semantic
        + profile.w_pdq * normalized.pdq
        + profile.w_phash * normalized.phash
        + profile.w_keypoints * normalized.keypoints
}

/// Strong geometric/semantic evidence that bypasses the structural floor
/// and the hash ceiling. The count-only route needs a configured
/// multiplier; the count-plus-semantic rule always applies.
pub fn keypoint_override(sim: &PairSimilarity, profile: &WeightProfile) -> bool {
    let count_alone = profile
        .strong_multiplier
        .map_or(false, |m| sim.keypoint_matches as f64 >= m * profile.min_matches as f64);
    count_alone
        || (sim.keypoint_matches >= profile.min_matches && sim.semantic >= profile.semantic_high)
}

/// Apply the full decision policy to a fully-computed pair similarity.
pub fn decide(sim: &PairSimilarity, profile: &WeightProfile, set: SignalSet) -> DuplicateDecision {
    let mut normalized = normalize(sim, profile);
    if set == SignalSet::Base {
        // The base signal set carries no pHash weight; keep the audited
        // normalization honest rather than reporting a phantom signal.
        normalized.phash = 0.0;
    }
    let score = composite_score(&normalized, profile);
    let override_active = keypoint_override(sim, profile);

    if !sim.is_comparable() {
        return DuplicateDecision {
            duplicate: false,
            trigger: Trigger::NonComparable,
            score,
            normalized,
            override_active,
        };
    }

    let floor_ok = sim.structural >= profile.structural_floor;
    let ceiling_ok = sim.pdq_distance < profile.pdq_ceiling;

    if !floor_ok && !override_active {
        return DuplicateDecision {
            duplicate: false,
            trigger: Trigger::StructuralFloorFail,
            score,
            normalized,
            override_active,
        };
    }
    if !ceiling_ok && !override_active {
        return DuplicateDecision {
            duplicate: false,
            trigger: Trigger::HashCeilingFail,
            score,
            normalized,
            override_active,
        };
    }

    let duplicate = score >= profile.score_threshold
        && (floor_ok || override_active)
        && (ceiling_ok || override_active);

    let trigger = if !duplicate {
        Trigger::ScoreBelowThreshold
    } else if override_active && !(floor_ok && ceiling_ok) {
        Trigger::KeypointOverride
    } else {
        Trigger::ScoreThreshold
    };

    DuplicateDecision {
        duplicate,
        trigger,
        score,
        normalized,
        override_active,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WeightProfile;

    fn profile() -> WeightProfile {
        WeightProfile::regular(SignalSet::Base)
    }

    fn close_pair() -> PairSimilarity {
        PairSimilarity {
            structural: 92.0,
            edge: 88.0,
            ssim: 90.0,
            semantic: 95.0,
            pdq_distance: 4,
            phash_distance: 1,
            keypoint_matches: 120,
        }
    }

    #[test]
    fn clear_duplicate_triggers_score_threshold() {
        let d = decide(&close_pair(), &profile(), SignalSet::Base);
        assert!(d.duplicate);
        assert_eq!(d.trigger, Trigger::ScoreThreshold);
        assert!(d.score > 0.8, "score {}", d.score);
    }

    #[test]
    fn floor_blocks_high_score_without_override() {
        let sim = PairSimilarity {
            structural: 40.0,
            semantic: 80.0,
            keypoint_matches: 10,
            ..close_pair()
        };
        let d = decide(&sim, &profile(), SignalSet::Base);
        assert!(!d.duplicate);
        assert_eq!(d.trigger, Trigger::StructuralFloorFail);
        // The score itself was above the acceptance threshold.
        assert!(d.score >= profile().score_threshold);
    }

    #[test]
    fn ceiling_blocks_without_override() {
        let sim = PairSimilarity {
            pdq_distance: 120,
            semantic: 80.0,
            keypoint_matches: 10,
            ..close_pair()
        };
        let d = decide(&sim, &profile(), SignalSet::Base);
        assert!(!d.duplicate);
        assert_eq!(d.trigger, Trigger::HashCeilingFail);
    }

    #[test]
    fn override_bypasses_floor() {
        let sim = PairSimilarity {
            structural: 40.0,
            semantic: 90.0,
            keypoint_matches: 60,
            ..close_pair()
        };
        let d = decide(&sim, &profile(), SignalSet::Base);
        assert!(d.override_active);
        assert!(d.duplicate);
        assert_eq!(d.trigger, Trigger::KeypointOverride);
    }

    #[test]
    fn strong_match_count_overrides_alone_when_configured() {
        // 1.5x the minimum, semantic similarity well below the high bar.
        let sim = PairSimilarity {
            structural: 40.0,
            semantic: 50.0,
            keypoint_matches: 75,
            ..close_pair()
        };
        assert!(keypoint_override(&sim, &WeightProfile::cascade_regular()));
        assert!(keypoint_override(
            &PairSimilarity {
                keypoint_matches: 450,
                ..sim
            },
            &WeightProfile::regular(SignalSet::WithPhash)
        ));
    }

    #[test]
    fn base_profile_has_no_count_only_override() {
        // The base profile only overrides on count plus high semantic
        // similarity; a large count with weak semantics is not enough.
        let sim = PairSimilarity {
            structural: 40.0,
            semantic: 50.0,
            keypoint_matches: 400,
            ..close_pair()
        };
        assert!(!keypoint_override(&sim, &profile()));
        let d = decide(&sim, &profile(), SignalSet::Base);
        assert!(!d.duplicate);
        assert_eq!(d.trigger, Trigger::StructuralFloorFail);
    }

    #[test]
    fn sentinel_pair_is_never_decided() {
        let sim = PairSimilarity::dissimilar();
        let d = decide(&sim, &profile(), SignalSet::Base);
        assert!(!d.duplicate);
        assert_eq!(d.trigger, Trigger::NonComparable);
    }

    #[test]
    fn hash_closeness_normalization() {
        assert_eq!(hash_closeness(0, 115), 1.0);
        assert_eq!(hash_closeness(115, 115), 0.0);
        assert_eq!(hash_closeness(200, 115), 0.0);
        let mid = hash_closeness(23, 115);
        assert!((mid - 0.8).abs() < 1e-9);
    }

    #[test]
    fn keypoint_normalization_caps_at_one() {
        let sim = PairSimilarity {
            keypoint_matches: 500,
            ..close_pair()
        };
        let n = normalize(&sim, &profile());
        assert_eq!(n.keypoints, 1.0);
    }

    #[test]
    fn aerial_by_filename_marker() {
        let metadata = MetadataMap::new();
        assert!(is_aerial(Path::new("/photos/DJI_0042.jpg"), &metadata));
        assert!(!is_aerial(Path::new("/photos/IMG_0042.jpg"), &metadata));
    }

    #[test]
    fn aerial_by_camera_make() {
        let mut metadata = MetadataMap::new();
        let path = PathBuf::from("/photos/shot.jpg");
        metadata.insert(
            path.clone(),
            CameraMetadata {
                make: Some("Autel Robotics".into()),
                model: None,
            },
        );
        assert!(is_aerial(&path, &metadata));
    }

    #[test]
    fn hasselblad_x1d_is_not_aerial() {
        let mut metadata = MetadataMap::new();
        let handheld = PathBuf::from("/photos/a.jpg");
        let gimbal = PathBuf::from("/photos/b.jpg");
        metadata.insert(
            handheld.clone(),
            CameraMetadata {
                make: Some("Hasselblad".into()),
                model: Some("X1D II 50C".into()),
            },
        );
        metadata.insert(
            gimbal.clone(),
            CameraMetadata {
                make: Some("Hasselblad".into()),
                model: Some("L1D-20c".into()),
            },
        );
        assert!(!is_aerial(&handheld, &metadata));
        assert!(is_aerial(&gimbal, &metadata));
    }

    #[test]
    fn pair_profile_is_aerial_when_either_side_is() {
        let metadata = MetadataMap::new();
        let kind = profile_kind_for_pair(
            Path::new("/p/DJI_0001.jpg"),
            Path::new("/p/IMG_0001.jpg"),
            &metadata,
        );
        assert_eq!(kind, ProfileKind::Aerial);
    }
}
