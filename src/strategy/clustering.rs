//! Exhaustive pairwise clustering.
//!
//! Every pair is evaluated, duplicate edges feed a union-find structure,
//! and each connected component keeps its highest-quality member. Unlike
//! sequential elimination the result is order-independent: no intermediate
//! state is mutated while pairs are being compared.

use std::collections::HashMap;
use std::path::PathBuf;

use tracing::{debug, info};

use crate::engine::DedupEngine;
use crate::policy::{self, MetadataMap};
use crate::quality::quality_score;
use crate::strategy::{schedule, BatchOutcome, DecisionRecord};

/// Union-find with path compression and union by rank.
pub struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    pub fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            let root = self.find(self.parent[x]);
            self.parent[x] = root;
        }
        self.parent[x]
    }

    pub fn union(&mut self, x: usize, y: usize) {
        let rx = self.find(x);
        let ry = self.find(y);
        if rx == ry {
            return;
        }
        match self.rank[rx].cmp(&self.rank[ry]) {
            std::cmp::Ordering::Less => self.parent[rx] = ry,
            std::cmp::Ordering::Greater => self.parent[ry] = rx,
            std::cmp::Ordering::Equal => {
                self.parent[ry] = rx;
                self.rank[rx] += 1;
            }
        }
    }

    /// All components as root -> ascending member indices.
    pub fn components(&mut self) -> HashMap<usize, Vec<usize>> {
        let mut components: HashMap<usize, Vec<usize>> = HashMap::new();
        for i in 0..self.parent.len() {
            let root = self.find(i);
            components.entry(root).or_default().push(i);
        }
        components
    }
}

pub(crate) fn run(
    engine: &DedupEngine,
    groups: &[Vec<PathBuf>],
    mids: &[PathBuf],
    metadata: &MetadataMap,
) -> BatchOutcome {
    let unreadable = engine.extract_all(mids);
    let config = engine.config();
    let n = groups.len();

    let mut decisions = Vec::new();
    let mut edges = Vec::new();

    // Clustering always evaluates the full pair set.
    for (i, j) in schedule(n, true) {
        let Some(sim) = engine.pair_similarity(&mids[i], &mids[j]) else {
            continue;
        };
        if !sim.is_comparable() {
            continue;
        }

        let kind = policy::profile_kind_for_pair(&mids[i], &mids[j], metadata);
        let decision = policy::decide(&sim, config.profile_for(kind), config.signal_set);
        if decision.duplicate {
            edges.push((i, j));
        }
        decisions.push(DecisionRecord {
            path_a: mids[i].clone(),
            path_b: mids[j].clone(),
            profile: kind,
            signals: sim,
            decision,
            stage: None,
        });
    }
    info!(pairs = decisions.len(), duplicate_edges = edges.len(), "pairwise pass done");

    let mut uf = UnionFind::new(n);
    for &(i, j) in &edges {
        uf.union(i, j);
    }

    let mut representatives = Vec::new();
    let mut quality_cache: HashMap<usize, f64> = HashMap::new();
    for (_, members) in uf.components() {
        let rep = if members.len() == 1 {
            members[0]
        } else {
            select_representative(&members, mids, &mut quality_cache)
        };
        if members.len() > 1 {
            debug!(
                cluster_size = members.len(),
                representative = %mids[rep].display(),
                "cluster resolved"
            );
        }
        representatives.push(rep);
    }
    representatives.sort_unstable();

    BatchOutcome {
        groups: representatives.iter().map(|&i| groups[i].clone()).collect(),
        decisions,
        unreadable,
        stage_exits: Default::default(),
    }
}

/// Highest quality member wins; the first maximum found on an exact tie.
fn select_representative(
    members: &[usize],
    mids: &[PathBuf],
    cache: &mut HashMap<usize, f64>,
) -> usize {
    let mut best = members[0];
    let mut best_quality = f64::NEG_INFINITY;
    for &idx in members {
        let quality = *cache
            .entry(idx)
            .or_insert_with(|| quality_score(&mids[idx]));
        debug!(member = %mids[idx].display(), quality, "cluster member quality");
        if quality > best_quality {
            best = idx;
            best_quality = quality;
        }
    }
    best
}
