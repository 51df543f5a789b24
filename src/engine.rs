//! Batch orchestration: parallel feature extraction, memoized pairwise
//! similarity, and strategy dispatch.
//!
//! Feature extraction is the only parallel stage; pair evaluation and the
//! decision policy run single-threaded afterwards, so no comparison ever
//! observes a partially-extracted image.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rayon::prelude::*;
use tracing::{info, warn};

use crate::cache::{FeatureCache, PairCache};
use crate::config::DedupConfig;
use crate::error::DedupError;
use crate::features::embedding::SemanticEncoder;
use crate::features::phash::Hashers;
use crate::features;
use crate::metrics::PairSimilarity;
use crate::policy::MetadataMap;
use crate::strategy::{cascading, clustering, sequential, BatchOutcome, Strategy};

pub struct DedupEngine {
    config: DedupConfig,
    hashers: Hashers,
    encoder: SemanticEncoder,
    features: FeatureCache,
    pairs: PairCache,
    pool: rayon::ThreadPool,
}

impl DedupEngine {
    pub fn new(config: DedupConfig) -> Result<Self, DedupError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.max_workers.max(1))
            .build()?;
        let encoder = SemanticEncoder::new(if config.use_semantic {
            config.encoder_model.clone()
        } else {
            None
        });
        Ok(Self {
            config,
            hashers: Hashers::new(),
            encoder,
            features: FeatureCache::default(),
            pairs: PairCache::default(),
            pool,
        })
    }

    pub fn config(&self) -> &DedupConfig {
        &self.config
    }

    pub(crate) fn hashers(&self) -> &Hashers {
        &self.hashers
    }

    pub(crate) fn encoder(&self) -> &SemanticEncoder {
        &self.encoder
    }

    pub(crate) fn pool(&self) -> &rayon::ThreadPool {
        &self.pool
    }

    /// Run one batch. Groups must be non-empty; each group is represented
    /// by its middle element. Caches are cleared up front so nothing leaks
    /// across batch runs.
    pub fn run(
        &self,
        groups: &[Vec<PathBuf>],
        metadata: &MetadataMap,
        strategy: Strategy,
    ) -> Result<BatchOutcome, DedupError> {
        for (idx, group) in groups.iter().enumerate() {
            if group.is_empty() {
                return Err(DedupError::EmptyGroup(idx));
            }
        }

        self.features.clear();
        self.pairs.clear();

        if groups.len() < 2 {
            return Ok(BatchOutcome {
                groups: groups.to_vec(),
                decisions: Vec::new(),
                unreadable: Vec::new(),
                stage_exits: Default::default(),
            });
        }

        let mids: Vec<PathBuf> = groups.iter().map(|g| g[g.len() / 2].clone()).collect();
        info!(
            groups = groups.len(),
            ?strategy,
            "starting deduplication batch"
        );

        let outcome = match strategy {
            Strategy::Sequential => sequential::run(self, groups, &mids, metadata),
            Strategy::Clustering => clustering::run(self, groups, &mids, metadata),
            Strategy::Cascading => cascading::run(self, groups, &mids, metadata),
        };

        info!(
            input = groups.len(),
            output = outcome.groups.len(),
            removed = groups.len() - outcome.groups.len(),
            "batch complete"
        );
        Ok(outcome)
    }

    /// Extract full feature sets for every unique path, in the worker pool.
    /// Returns the paths whose base load failed; those images are excluded
    /// from all comparisons but never abort the batch.
    pub(crate) fn extract_all(&self, paths: &[PathBuf]) -> Vec<PathBuf> {
        let unique: Vec<&PathBuf> = {
            let mut seen = HashSet::new();
            paths.iter().filter(|p| seen.insert(*p)).collect()
        };
        let pending: Vec<&PathBuf> = unique
            .into_iter()
            .filter(|p| self.features.get(p).is_none())
            .collect();
        if pending.is_empty() {
            return Vec::new();
        }
        info!(images = pending.len(), "extracting features");

        let unreadable = Mutex::new(Vec::new());
        self.pool.install(|| {
            pending.par_iter().for_each(|path| {
                match features::extract(
                    path,
                    &self.config.tuning,
                    &self.hashers,
                    &self.encoder,
                    self.config.use_semantic,
                ) {
                    Ok(set) => {
                        self.features.insert((*path).clone(), set);
                    }
                    Err(e) => {
                        warn!("excluding image: {e}");
                        unreadable.lock().push((*path).clone());
                    }
                }
            });
        });
        unreadable.into_inner()
    }

    /// Memoized pairwise similarity. `None` when either image has no
    /// cached features (its base load failed).
    pub(crate) fn pair_similarity(&self, a: &Path, b: &Path) -> Option<PairSimilarity> {
        if let Some(sim) = self.pairs.get(a, b) {
            return Some(sim);
        }
        let fa = self.features.get(a)?;
        let fb = self.features.get(b)?;
        let sim = PairSimilarity::compute(&fa, &fb);
        self.pairs.insert(a, b, sim);
        Some(sim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SignalSet;

    #[test]
    fn empty_group_is_rejected() {
        let engine = DedupEngine::new(DedupConfig::new(SignalSet::Base)).unwrap();
        let groups = vec![vec![PathBuf::from("/a.jpg")], vec![]];
        let err = engine
            .run(&groups, &MetadataMap::new(), Strategy::Sequential)
            .unwrap_err();
        assert!(matches!(err, DedupError::EmptyGroup(1)));
    }

    #[test]
    fn single_group_passes_through() {
        let engine = DedupEngine::new(DedupConfig::new(SignalSet::Base)).unwrap();
        let groups = vec![vec![PathBuf::from("/only.jpg")]];
        let outcome = engine
            .run(&groups, &MetadataMap::new(), Strategy::Clustering)
            .unwrap();
        assert_eq!(outcome.groups, groups);
        assert!(outcome.decisions.is_empty());
    }

    #[test]
    fn unreadable_images_survive_but_are_reported() {
        let engine = DedupEngine::new(DedupConfig::new(SignalSet::Base)).unwrap();
        let groups = vec![
            vec![PathBuf::from("/missing/a.jpg")],
            vec![PathBuf::from("/missing/b.jpg")],
        ];
        let outcome = engine
            .run(&groups, &MetadataMap::new(), Strategy::Sequential)
            .unwrap();
        assert_eq!(outcome.groups.len(), 2);
        assert_eq!(outcome.unreadable.len(), 2);
    }
}
