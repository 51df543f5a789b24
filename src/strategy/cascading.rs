//! Staged evaluator: signals are computed in increasing cost order and the
//! pair exits as soon as the outcome is certain.
//!
//! Stage 1 gates on hash distance, stage 2 on semantic similarity, stage 3
//! on the keypoint override; only pairs still uncertain after that pay for
//! the structural maps, and those fall back to the exact composite policy,
//! so a pair reaching stage 4 gets the same verdict the direct policy
//! would produce.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use image::{DynamicImage, GrayImage};
use parking_lot::Mutex;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::engine::DedupEngine;
use crate::features::keypoints::{self, Descriptor};
use crate::features::phash::{hamming_distance, HASH_DISTANCE_SENTINEL};
use crate::features::{self, StructuralFeatures};
use crate::metrics::{ssim_percent, overlap_percent, PairSimilarity};
use crate::policy::{self, DuplicateDecision, MetadataMap, Trigger};
use crate::strategy::{schedule, BatchOutcome, DecisionRecord, DecisionStage, StageCounts};

/// Marks a percentage signal an early exit never computed.
const NOT_COMPUTED: f64 = -1.0;

#[derive(Clone)]
struct HashSignals {
    pdq: Option<Vec<u8>>,
    phash: Option<Vec<u8>>,
}

/// Lazily-filled per-batch stores for the expensive signals. `None` values
/// mark images whose load failed; they are computed at most once.
#[derive(Default)]
struct LazyStore {
    images: HashMap<PathBuf, Option<DynamicImage>>,
    grays: HashMap<PathBuf, Option<GrayImage>>,
    embeddings: HashMap<PathBuf, Option<Vec<f32>>>,
    descriptors: HashMap<PathBuf, Option<Vec<Descriptor>>>,
    structural: HashMap<PathBuf, Option<StructuralFeatures>>,
    unreadable: Vec<PathBuf>,
}

impl LazyStore {
    fn image(&mut self, path: &Path) -> Option<&DynamicImage> {
        if !self.images.contains_key(path) {
            let loaded = match features::load_image(path) {
                Ok(img) => Some(img),
                Err(e) => {
                    warn!("excluding image: {e}");
                    self.unreadable.push(path.to_path_buf());
                    None
                }
            };
            self.images.insert(path.to_path_buf(), loaded);
        }
        self.images.get(path).and_then(|img| img.as_ref())
    }

    fn gray(&mut self, path: &Path) -> Option<GrayImage> {
        if !self.grays.contains_key(path) {
            let gray = self.image(path).map(|img| img.to_luma8());
            self.grays.insert(path.to_path_buf(), gray);
        }
        self.grays.get(path).cloned().flatten()
    }

    fn embedding(&mut self, path: &Path, engine: &DedupEngine) -> Option<Vec<f32>> {
        if !self.embeddings.contains_key(path) {
            let embedding = if engine.config().use_semantic {
                self.image(path)
                    .cloned()
                    .and_then(|img| engine.encoder().encode(&img))
            } else {
                None
            };
            self.embeddings.insert(path.to_path_buf(), embedding);
        }
        self.embeddings.get(path).cloned().flatten()
    }

    fn descriptors(&mut self, path: &Path, engine: &DedupEngine) -> Option<Vec<Descriptor>> {
        if !self.descriptors.contains_key(path) {
            let descriptors = self
                .gray(path)
                .map(|gray| keypoints::detect_and_describe(&gray, &engine.config().tuning));
            self.descriptors.insert(path.to_path_buf(), descriptors);
        }
        self.descriptors.get(path).cloned().flatten()
    }

    fn structural(&mut self, path: &Path, engine: &DedupEngine) -> Option<StructuralFeatures> {
        if !self.structural.contains_key(path) {
            let structural = self
                .gray(path)
                .map(|gray| features::extract_structural(&gray, &engine.config().tuning));
            self.structural.insert(path.to_path_buf(), structural);
        }
        self.structural.get(path).cloned().flatten()
    }
}

/// Hash-only prep: the one signal every pair needs, computed up front in
/// the worker pool.
fn prepare_hashes(
    engine: &DedupEngine,
    mids: &[PathBuf],
) -> (HashMap<PathBuf, HashSignals>, Vec<PathBuf>) {
    let unreadable = Mutex::new(Vec::new());
    let hashes = Mutex::new(HashMap::new());
    engine.pool().install(|| {
        let mut seen: Vec<&PathBuf> = mids.iter().collect();
        seen.sort_unstable();
        seen.dedup();
        seen.par_iter().for_each(|path| {
            match features::load_image(path) {
                Ok(img) => {
                    let gray = img.to_luma8();
                    hashes.lock().insert(
                        (*path).clone(),
                        HashSignals {
                            pdq: engine.hashers().pdq_class(&gray),
                            phash: engine.hashers().phash(&gray),
                        },
                    );
                }
                Err(e) => {
                    warn!("excluding image: {e}");
                    unreadable.lock().push((*path).clone());
                }
            };
        });
    });
    (hashes.into_inner(), unreadable.into_inner())
}

/// Replace not-computed markers with zeros for normalization purposes.
fn zeroed(sim: &PairSimilarity) -> PairSimilarity {
    PairSimilarity {
        structural: sim.structural.max(0.0),
        edge: sim.edge.max(0.0),
        ssim: sim.ssim.max(0.0),
        semantic: sim.semantic.max(0.0),
        ..*sim
    }
}

pub(crate) fn run(
    engine: &DedupEngine,
    groups: &[Vec<PathBuf>],
    mids: &[PathBuf],
    metadata: &MetadataMap,
) -> BatchOutcome {
    let config = engine.config();
    let (hashes, mut unreadable) = prepare_hashes(engine, mids);
    info!(images = hashes.len(), "hash prep complete");

    let mut store = LazyStore::default();
    let mut keep = vec![true; groups.len()];
    let mut decisions = Vec::new();
    let mut stage_exits = StageCounts::default();

    for (i, j) in schedule(groups.len(), config.full_scan) {
        if !keep[i] || !keep[j] {
            continue;
        }
        let (a, b) = (&mids[i], &mids[j]);
        let (Some(ha), Some(hb)) = (hashes.get(a), hashes.get(b)) else {
            continue; // unreadable side, already reported
        };

        let kind = policy::profile_kind_for_pair(a, b, metadata);
        let profile = config.profile_for(kind);

        let mut sim = PairSimilarity {
            structural: NOT_COMPUTED,
            edge: NOT_COMPUTED,
            ssim: NOT_COMPUTED,
            semantic: NOT_COMPUTED,
            pdq_distance: hamming_distance(ha.pdq.as_deref(), hb.pdq.as_deref()),
            phash_distance: hamming_distance(ha.phash.as_deref(), hb.phash.as_deref()),
            keypoint_matches: 0,
        };

        // Stage 1: hash gate. A sentinel means the pair is non-comparable
        // and is skipped outright, not rejected.
        if sim.pdq_distance == HASH_DISTANCE_SENTINEL {
            decisions.push(record(a, b, kind, sim, early(false, Trigger::NonComparable, &sim, profile), DecisionStage::HashGate));
            continue;
        }
        if sim.pdq_distance >= profile.pdq_ceiling {
            stage_exits.record(DecisionStage::HashGate);
            decisions.push(record(a, b, kind, sim, early(false, Trigger::HashCeilingFail, &sim, profile), DecisionStage::HashGate));
            continue;
        }

        // Stage 2: semantic gate, skipped when either embedding is absent
        // so a disabled encoder degrades to the later stages instead of
        // mass-rejecting everything.
        let ea = store.embedding(a, engine);
        let eb = store.embedding(b, engine);
        if let (Some(ea), Some(eb)) = (&ea, &eb) {
            sim.semantic = 100.0
                * crate::features::embedding::cosine(Some(ea.as_slice()), Some(eb.as_slice()));
            if sim.semantic >= config.cascade.semantic_high {
                stage_exits.record(DecisionStage::SemanticGate);
                let verdict = early(true, Trigger::SemanticAccept, &sim, profile);
                decisions.push(record(a, b, kind, sim, verdict, DecisionStage::SemanticGate));
                keep[i] = false;
                debug!(dropped = %a.display(), "semantic gate accept");
                continue;
            }
            if sim.semantic < config.cascade.semantic_low {
                stage_exits.record(DecisionStage::SemanticGate);
                decisions.push(record(a, b, kind, sim, early(false, Trigger::SemanticReject, &sim, profile), DecisionStage::SemanticGate));
                continue;
            }
        }

        // Stage 3: geometric verification.
        let (da, db) = (store.descriptors(a, engine), store.descriptors(b, engine));
        let (Some(da), Some(db)) = (da, db) else {
            continue;
        };
        sim.keypoint_matches = keypoints::count_matches(&da, &db);
        if policy::keypoint_override(&zeroed(&sim), profile) {
            stage_exits.record(DecisionStage::KeypointGate);
            let verdict = early(true, Trigger::KeypointOverride, &sim, profile);
            decisions.push(record(a, b, kind, sim, verdict, DecisionStage::KeypointGate));
            keep[i] = false;
            debug!(dropped = %a.display(), "keypoint gate accept");
            continue;
        }

        // Stage 4: the remaining expensive signals plus the full policy.
        let (sa, sb) = (store.structural(a, engine), store.structural(b, engine));
        let (Some(sa), Some(sb)) = (sa, sb) else {
            continue;
        };
        if sa.bitmap.shape() != sb.bitmap.shape() || sa.edges.shape() != sb.edges.shape() {
            warn!("feature shape mismatch, skipping pair");
            continue;
        }
        sim.structural = overlap_percent(&sa.bitmap, &sb.bitmap);
        sim.edge = overlap_percent(&sa.edges, &sb.edges);
        sim.ssim = ssim_percent(&sa.ssim_gray, &sb.ssim_gray);
        sim.semantic = sim.semantic.max(0.0); // absent embeddings score zero

        let decision = policy::decide(&sim, profile, config.signal_set);
        stage_exits.record(DecisionStage::Composite);
        let duplicate = decision.duplicate;
        decisions.push(record(a, b, kind, sim, decision, DecisionStage::Composite));
        if duplicate {
            debug!(dropped = %a.display(), "composite stage accept");
            keep[i] = false;
        }
    }

    unreadable.extend(store.unreadable);
    info!(
        hash_gate = stage_exits.hash_gate,
        semantic_gate = stage_exits.semantic_gate,
        keypoint_gate = stage_exits.keypoint_gate,
        composite = stage_exits.composite,
        "stage exit counts"
    );

    BatchOutcome {
        groups: groups
            .iter()
            .zip(&keep)
            .filter(|(_, &k)| k)
            .map(|(g, _)| g.clone())
            .collect(),
        decisions,
        unreadable,
        stage_exits,
    }
}

fn record(
    a: &Path,
    b: &Path,
    kind: crate::config::ProfileKind,
    signals: PairSimilarity,
    decision: DuplicateDecision,
    stage: DecisionStage,
) -> DecisionRecord {
    DecisionRecord {
        path_a: a.to_path_buf(),
        path_b: b.to_path_buf(),
        profile: kind,
        signals,
        decision,
        stage: Some(stage),
    }
}

/// A decision settled by an early exit; the composite score is never
/// computed for these.
fn early(
    duplicate: bool,
    trigger: Trigger,
    sim: &PairSimilarity,
    profile: &crate::config::WeightProfile,
) -> DuplicateDecision {
    DuplicateDecision {
        duplicate,
        trigger,
        score: 0.0,
        normalized: policy::normalize(&zeroed(sim), profile),
        override_active: trigger == Trigger::KeypointOverride,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WeightProfile;
    use crate::config::SignalSet;

    fn partial_sim() -> PairSimilarity {
        PairSimilarity {
            structural: NOT_COMPUTED,
            edge: NOT_COMPUTED,
            ssim: NOT_COMPUTED,
            semantic: NOT_COMPUTED,
            pdq_distance: 3,
            phash_distance: 1,
            keypoint_matches: 0,
        }
    }

    #[test]
    fn zeroed_clamps_uncomputed_signals() {
        let z = zeroed(&partial_sim());
        assert_eq!(z.structural, 0.0);
        assert_eq!(z.semantic, 0.0);
        assert_eq!(z.pdq_distance, 3);
    }

    #[test]
    fn early_exit_reports_trigger_and_override_state() {
        let profile = WeightProfile::regular(SignalSet::Base);
        let accept = early(true, Trigger::SemanticAccept, &partial_sim(), &profile);
        assert!(accept.duplicate);
        assert!(!accept.override_active);
        assert_eq!(accept.score, 0.0);

        let bypass = early(true, Trigger::KeypointOverride, &partial_sim(), &profile);
        assert!(bypass.override_active);
    }
}
