//! Multi-signal near-duplicate photo detection.
//!
//! Images are compared through several independent signals: a median
//! threshold bitmap, a Canny edge map, windowed SSIM, two perceptual
//! hashes, an optional semantic embedding, and keypoint matching. A
//! weighted composite score with structural and hash guard rails turns
//! the signals into per-pair duplicate verdicts, and a cluster-resolution
//! strategy turns the verdicts into a surviving set of images.
//!
//! The entry point is [`engine::DedupEngine`]: build one from a
//! [`config::DedupConfig`], then call [`engine::DedupEngine::run`] with
//! groups of image paths and a [`strategy::Strategy`].

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod features;
pub mod metrics;
pub mod policy;
pub mod quality;
pub mod strategy;

pub use config::{DedupConfig, ProfileKind, SignalSet, WeightProfile};
pub use engine::DedupEngine;
pub use error::DedupError;
pub use metrics::PairSimilarity;
pub use policy::{CameraMetadata, DuplicateDecision, MetadataMap, Trigger};
pub use strategy::{BatchOutcome, DecisionRecord, DecisionStage, StageCounts, Strategy};
