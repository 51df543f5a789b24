//! Sequential elimination.
//!
//! Pairs are evaluated in a fixed ascending order (adjacent only, or every
//! pair under full scan). A duplicate verdict drops the first index of the
//! pair unconditionally; the asymmetric tie-break is intentional and keeps
//! the later image in the supplied order.

use std::path::PathBuf;

use tracing::{debug, info};

use crate::engine::DedupEngine;
use crate::policy::{self, MetadataMap, Trigger};
use crate::strategy::{schedule, BatchOutcome, DecisionRecord};

pub(crate) fn run(
    engine: &DedupEngine,
    groups: &[Vec<PathBuf>],
    mids: &[PathBuf],
    metadata: &MetadataMap,
) -> BatchOutcome {
    let unreadable = engine.extract_all(mids);
    let config = engine.config();

    let mut keep = vec![true; groups.len()];
    let mut decisions = Vec::new();

    for (i, j) in schedule(groups.len(), config.full_scan) {
        if !keep[i] || !keep[j] {
            continue;
        }
        let Some(sim) = engine.pair_similarity(&mids[i], &mids[j]) else {
            continue;
        };

        let kind = policy::profile_kind_for_pair(&mids[i], &mids[j], metadata);
        let decision = policy::decide(&sim, config.profile_for(kind), config.signal_set);

        debug!(
            a = %mids[i].display(),
            b = %mids[j].display(),
            structural = sim.structural,
            edge = sim.edge,
            ssim = sim.ssim,
            semantic = sim.semantic,
            pdq = sim.pdq_distance,
            matches = sim.keypoint_matches,
            score = decision.score,
            ?kind,
            "pair evaluated"
        );

        let duplicate = decision.duplicate && decision.trigger != Trigger::NonComparable;
        decisions.push(DecisionRecord {
            path_a: mids[i].clone(),
            path_b: mids[j].clone(),
            profile: kind,
            signals: sim,
            decision,
            stage: None,
        });

        if duplicate {
            info!(
                dropped = %mids[i].display(),
                kept = %mids[j].display(),
                "duplicate pair, dropping earlier image"
            );
            keep[i] = false;
        }
    }

    let surviving = groups
        .iter()
        .zip(&keep)
        .filter(|(_, &k)| k)
        .map(|(g, _)| g.clone())
        .collect();

    BatchOutcome {
        groups: surviving,
        decisions,
        unreadable,
        stage_exits: Default::default(),
    }
}
