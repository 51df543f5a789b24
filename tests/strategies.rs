//! End-to-end strategy scenarios over synthetic images.
//!
//! The fixtures are built so the verdicts are unambiguous: identical scenes
//! hash to distance zero and overlap completely, while a scene and its
//! inverse disagree on every thresholded bit and sit far over the hash
//! ceiling.

use std::path::PathBuf;

use image::{GrayImage, Luma};
use tempfile::TempDir;

use neardup::config::ExtractorTuning;
use neardup::{DedupConfig, DedupEngine, MetadataMap, SignalSet, Strategy, Trigger};

fn gradient(side: u32) -> GrayImage {
    GrayImage::from_fn(side, side, |x, _| Luma([(x * 255 / (side - 1)) as u8]))
}

fn inverse_gradient(side: u32) -> GrayImage {
    GrayImage::from_fn(side, side, |x, _| {
        Luma([255 - (x * 255 / (side - 1)) as u8])
    })
}

fn save(dir: &TempDir, name: &str, img: &GrayImage) -> PathBuf {
    let path = dir.path().join(name);
    img.save(&path).unwrap();
    path
}

fn test_config() -> DedupConfig {
    let mut config = DedupConfig::new(SignalSet::Base);
    config.use_semantic = false;
    config.max_workers = 4;
    config.tuning = ExtractorTuning {
        bitmap_size: 64,
        edge_size: 64,
        ssim_size: 32,
        ..ExtractorTuning::default()
    };
    config
}

/// Two duplicate pairs in [a1, a2, b1, b2] order. Pairs (a1, a2) and
/// (b1, b2) are identical scenes; the a and b scenes are inverses.
fn two_pair_fixture(dir: &TempDir) -> Vec<Vec<PathBuf>> {
    let scene_a = gradient(160);
    let scene_b = inverse_gradient(160);
    vec![
        vec![save(dir, "a1.png", &scene_a)],
        vec![save(dir, "a2.png", &scene_a)],
        vec![save(dir, "b1.png", &scene_b)],
        vec![save(dir, "b2.png", &scene_b)],
    ]
}

#[test]
fn sequential_drops_the_earlier_image_of_each_pair() {
    let dir = TempDir::new().unwrap();
    let groups = two_pair_fixture(&dir);
    let engine = DedupEngine::new(test_config()).unwrap();

    let outcome = engine
        .run(&groups, &MetadataMap::new(), Strategy::Sequential)
        .unwrap();

    // (a1, a2) duplicate drops a1; (a2, b1) differ; (b1, b2) drops b1.
    assert_eq!(outcome.groups, vec![groups[1].clone(), groups[3].clone()]);
    assert!(outcome.unreadable.is_empty());

    let dup_records: Vec<_> = outcome
        .decisions
        .iter()
        .filter(|r| r.decision.duplicate)
        .collect();
    assert_eq!(dup_records.len(), 2);
    for record in dup_records {
        assert_eq!(record.decision.trigger, Trigger::ScoreThreshold);
        assert_eq!(record.signals.pdq_distance, 0);
        assert!(record.signals.structural > 95.0);
    }
}

#[test]
fn sequential_is_deterministic() {
    let dir = TempDir::new().unwrap();
    let groups = two_pair_fixture(&dir);
    let engine = DedupEngine::new(test_config()).unwrap();

    let first = engine
        .run(&groups, &MetadataMap::new(), Strategy::Sequential)
        .unwrap();
    let second = engine
        .run(&groups, &MetadataMap::new(), Strategy::Sequential)
        .unwrap();

    assert_eq!(first.groups, second.groups);
    assert_eq!(first.decisions.len(), second.decisions.len());
    for (a, b) in first.decisions.iter().zip(&second.decisions) {
        assert_eq!(a.path_a, b.path_a);
        assert_eq!(a.decision.duplicate, b.decision.duplicate);
    }
}

#[test]
fn clustering_keeps_one_representative_per_scene() {
    let dir = TempDir::new().unwrap();
    let groups = two_pair_fixture(&dir);
    let engine = DedupEngine::new(test_config()).unwrap();

    let outcome = engine
        .run(&groups, &MetadataMap::new(), Strategy::Clustering)
        .unwrap();

    assert_eq!(outcome.groups.len(), 2);
    let survivors: Vec<&str> = outcome
        .groups
        .iter()
        .map(|g| g[0].file_name().unwrap().to_str().unwrap())
        .collect();
    assert!(survivors.iter().any(|n| n.starts_with('a')));
    assert!(survivors.iter().any(|n| n.starts_with('b')));
}

#[test]
fn clustering_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let groups = two_pair_fixture(&dir);
    let engine = DedupEngine::new(test_config()).unwrap();

    let first = engine
        .run(&groups, &MetadataMap::new(), Strategy::Clustering)
        .unwrap();
    let second = engine
        .run(&first.groups, &MetadataMap::new(), Strategy::Clustering)
        .unwrap();

    assert_eq!(second.groups, first.groups);
    assert!(second.decisions.iter().all(|r| !r.decision.duplicate));
}

#[test]
fn clustering_prefers_the_higher_resolution_member() {
    let dir = TempDir::new().unwrap();
    // Same scene at two resolutions; the larger one wins on quality.
    let small = save(&dir, "small.png", &gradient(160));
    let large = save(&dir, "large.png", &gradient(320));
    let groups = vec![vec![small], vec![large.clone()]];

    let engine = DedupEngine::new(test_config()).unwrap();
    let outcome = engine
        .run(&groups, &MetadataMap::new(), Strategy::Clustering)
        .unwrap();

    assert_eq!(outcome.groups, vec![vec![large]]);
}

#[test]
fn cascading_agrees_with_the_direct_policy() {
    let dir = TempDir::new().unwrap();
    let groups = two_pair_fixture(&dir);

    let mut config = DedupConfig::cascading();
    config.use_semantic = false;
    config.max_workers = 4;
    config.tuning = ExtractorTuning {
        bitmap_size: 64,
        edge_size: 64,
        ssim_size: 32,
        ..ExtractorTuning::default()
    };
    let engine = DedupEngine::new(config).unwrap();

    let staged = engine
        .run(&groups, &MetadataMap::new(), Strategy::Cascading)
        .unwrap();
    let direct = engine
        .run(&groups, &MetadataMap::new(), Strategy::Sequential)
        .unwrap();

    // No embeddings and no corner response on gradients, so every pair
    // either exits at the hash gate or reaches the composite stage.
    assert_eq!(staged.groups, direct.groups);
    assert!(staged.stage_exits.composite >= 2);
    assert_eq!(staged.stage_exits.semantic_gate, 0);
    assert_eq!(staged.stage_exits.keypoint_gate, 0);
}

#[test]
fn cascading_rejects_dissimilar_scenes_at_the_hash_gate() {
    let dir = TempDir::new().unwrap();
    let groups = vec![
        vec![save(&dir, "a.png", &gradient(160))],
        vec![save(&dir, "b.png", &inverse_gradient(160))],
    ];

    let mut config = DedupConfig::cascading();
    config.use_semantic = false;
    // A zero ceiling makes every real hash distance an immediate reject,
    // so the pair never reaches the later stages.
    config.regular.pdq_ceiling = 0;
    config.aerial.pdq_ceiling = 0;
    config.tuning = ExtractorTuning {
        bitmap_size: 64,
        edge_size: 64,
        ssim_size: 32,
        ..ExtractorTuning::default()
    };
    let engine = DedupEngine::new(config).unwrap();

    let outcome = engine
        .run(&groups, &MetadataMap::new(), Strategy::Cascading)
        .unwrap();

    assert_eq!(outcome.groups.len(), 2);
    assert_eq!(outcome.stage_exits.hash_gate, 1);
    let record = &outcome.decisions[0];
    assert!(!record.decision.duplicate);
    assert_eq!(record.decision.trigger, Trigger::HashCeilingFail);
    // Early exits leave the expensive signals uncomputed.
    assert!(record.signals.structural < 0.0);
}

#[test]
fn unreadable_files_are_excluded_but_kept() {
    let dir = TempDir::new().unwrap();
    let scene = gradient(160);
    let broken = dir.path().join("broken.png");
    std::fs::write(&broken, b"definitely not a png").unwrap();

    let groups = vec![
        vec![save(&dir, "a1.png", &scene)],
        vec![broken.clone()],
        vec![save(&dir, "a2.png", &scene)],
    ];

    let engine = DedupEngine::new(test_config()).unwrap();
    let outcome = engine
        .run(&groups, &MetadataMap::new(), Strategy::Clustering)
        .unwrap();

    assert_eq!(outcome.unreadable, vec![broken.clone()]);
    // The duplicate pair still collapses; the unreadable group survives.
    assert_eq!(outcome.groups.len(), 2);
    assert!(outcome.groups.iter().any(|g| g[0] == broken));
}

#[test]
fn aerial_filename_applies_the_aerial_profile() {
    let dir = TempDir::new().unwrap();
    let scene = gradient(160);
    let groups = vec![
        vec![save(&dir, "DJI_0001.png", &scene)],
        vec![save(&dir, "DJI_0002.png", &scene)],
    ];

    let engine = DedupEngine::new(test_config()).unwrap();
    let outcome = engine
        .run(&groups, &MetadataMap::new(), Strategy::Sequential)
        .unwrap();

    assert_eq!(outcome.groups.len(), 1);
    assert_eq!(
        outcome.decisions[0].profile,
        neardup::ProfileKind::Aerial
    );
}
