//! Cluster-resolution strategies: how per-pair verdicts turn into a
//! surviving representative set for a whole batch.

pub mod cascading;
pub mod clustering;
pub mod sequential;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::ProfileKind;
use crate::metrics::PairSimilarity;
use crate::policy::DuplicateDecision;

/// Which resolution algorithm to run over the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Pairwise elimination in a fixed order; drops the first index of a
    /// duplicate pair unconditionally.
    Sequential,
    /// Exhaustive pairwise + connected components; keeps the highest
    /// quality member of each cluster.
    Clustering,
    /// Staged evaluator with cheap-signal early exits.
    Cascading,
}

/// Which stage of the staged evaluator settled a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStage {
    HashGate,
    SemanticGate,
    KeypointGate,
    Composite,
}

/// Auditable record of one evaluated pair.
///
/// For staged decisions, signals the early exit never reached are reported
/// as -1 (percentages) so uncomputed and genuinely-zero values stay
/// distinguishable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub path_a: PathBuf,
    pub path_b: PathBuf,
    pub profile: ProfileKind,
    pub signals: PairSimilarity,
    pub decision: DuplicateDecision,
    /// Set by the cascading strategy only.
    pub stage: Option<DecisionStage>,
}

/// How many pairs each cascade stage settled.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StageCounts {
    pub hash_gate: usize,
    pub semantic_gate: usize,
    pub keypoint_gate: usize,
    pub composite: usize,
}

impl StageCounts {
    pub fn record(&mut self, stage: DecisionStage) {
        match stage {
            DecisionStage::HashGate => self.hash_gate += 1,
            DecisionStage::SemanticGate => self.semantic_gate += 1,
            DecisionStage::KeypointGate => self.keypoint_gate += 1,
            DecisionStage::Composite => self.composite += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.hash_gate + self.semantic_gate + self.keypoint_gate + self.composite
    }
}

/// The engine's output for one batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutcome {
    /// Surviving groups, in input order.
    pub groups: Vec<Vec<PathBuf>>,
    /// One record per evaluated pair, in evaluation order.
    pub decisions: Vec<DecisionRecord>,
    /// Images whose base load failed; excluded from every comparison.
    pub unreadable: Vec<PathBuf>,
    /// Populated by the cascading strategy.
    pub stage_exits: StageCounts,
}

/// Deterministic comparison schedule: adjacent pairs, or every pair
/// ascending by (i, j) under full scan.
pub(crate) fn schedule(n: usize, full_scan: bool) -> Vec<(usize, usize)> {
    if n < 2 {
        return Vec::new();
    }
    if full_scan {
        (0..n - 1)
            .flat_map(|i| (i + 1..n).map(move |j| (i, j)))
            .collect()
    } else {
        (0..n - 1).map(|i| (i, i + 1)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjacent_schedule() {
        assert_eq!(schedule(4, false), vec![(0, 1), (1, 2), (2, 3)]);
        assert!(schedule(1, false).is_empty());
    }

    #[test]
    fn full_scan_schedule_is_ascending() {
        let pairs = schedule(4, true);
        assert_eq!(
            pairs,
            vec![(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)]
        );
    }

    #[test]
    fn stage_counts_accumulate() {
        let mut counts = StageCounts::default();
        counts.record(DecisionStage::HashGate);
        counts.record(DecisionStage::Composite);
        counts.record(DecisionStage::Composite);
        assert_eq!(counts.hash_gate, 1);
        assert_eq!(counts.composite, 2);
        assert_eq!(counts.total(), 3);
    }
}
