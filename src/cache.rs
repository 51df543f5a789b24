//! Process-local caches for per-image features and per-pair similarity.
//!
//! Both tables are unbounded and safe for concurrent writes (extraction is
//! deterministic, so last-writer-wins is fine). `clear()` runs at every
//! batch boundary so no comparison ever leaks across runs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::features::FeatureSet;
use crate::metrics::PairSimilarity;

/// Key for an unordered pair: the two paths in sorted order.
fn pair_key(a: &Path, b: &Path) -> (PathBuf, PathBuf) {
    if a <= b {
        (a.to_path_buf(), b.to_path_buf())
    } else {
        (b.to_path_buf(), a.to_path_buf())
    }
}

#[derive(Default)]
pub struct FeatureCache {
    entries: RwLock<HashMap<PathBuf, Arc<FeatureSet>>>,
}

impl FeatureCache {
    pub fn get(&self, path: &Path) -> Option<Arc<FeatureSet>> {
        self.entries.read().get(path).cloned()
    }

    pub fn insert(&self, path: PathBuf, features: FeatureSet) -> Arc<FeatureSet> {
        let features = Arc::new(features);
        self.entries.write().insert(path, features.clone());
        features
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

#[derive(Default)]
pub struct PairCache {
    entries: RwLock<HashMap<(PathBuf, PathBuf), PairSimilarity>>,
}

impl PairCache {
    pub fn get(&self, a: &Path, b: &Path) -> Option<PairSimilarity> {
        self.entries.read().get(&pair_key(a, b)).copied()
    }

    pub fn insert(&self, a: &Path, b: &Path, sim: PairSimilarity) {
        self.entries.write().insert(pair_key(a, b), sim);
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}
