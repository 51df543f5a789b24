use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DedupError {
    #[error("failed to decode image {path}: {source}")]
    UnreadableImage {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("group {0} is empty")]
    EmptyGroup(usize),

    #[error("failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

impl DedupError {
    pub fn unreadable(path: &std::path::Path, source: image::ImageError) -> Self {
        Self::UnreadableImage {
            path: path.to_path_buf(),
            source,
        }
    }
}
