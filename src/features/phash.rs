//! Perceptual hashes compared by Hamming distance.
//!
//! Two hashes per image: a 256-bit DCT hash in the PDQ size class, used as
//! the primary rejection signal, and the classic 64-bit DCT pHash used only
//! by the pHash-augmented signal set.

use image::GrayImage;
use image_hasher::{HashAlg, Hasher, HasherConfig};

/// Distance reported when either hash is missing or the lengths differ.
/// A pair carrying this value is non-comparable and must be skipped.
pub const HASH_DISTANCE_SENTINEL: u32 = 999;

/// Pre-built hashers, shared across the extraction worker pool.
pub struct Hashers {
    pdq_class: Hasher,
    phash: Hasher,
}

impl Hashers {
    pub fn new() -> Self {
        Self {
            pdq_class: HasherConfig::new()
                .hash_alg(HashAlg::Mean)
                .preproc_dct()
                .hash_size(16, 16)
                .to_hasher(),
            phash: HasherConfig::new()
                .hash_alg(HashAlg::Mean)
                .preproc_dct()
                .hash_size(8, 8)
                .to_hasher(),
        }
    }

    /// 256-bit hash bytes. `None` on degenerate input (hash failure is a
    /// partial-signal failure, never an error).
    pub fn pdq_class(&self, gray: &GrayImage) -> Option<Vec<u8>> {
        if gray.width() == 0 || gray.height() == 0 {
            return None;
        }
        Some(self.pdq_class.hash_image(gray).as_bytes().to_vec())
    }

    /// 64-bit DCT pHash bytes.
    pub fn phash(&self, gray: &GrayImage) -> Option<Vec<u8>> {
        if gray.width() == 0 || gray.height() == 0 {
            return None;
        }
        Some(self.phash.hash_image(gray).as_bytes().to_vec())
    }
}

impl Default for Hashers {
    fn default() -> Self {
        Self::new()
    }
}

/// Hamming distance between two hash byte strings, or the sentinel when
/// either is absent or the lengths mismatch.
pub fn hamming_distance(a: Option<&[u8]>, b: Option<&[u8]>) -> u32 {
    match (a, b) {
        (Some(a), Some(b)) if a.len() == b.len() => a
            .iter()
            .zip(b)
            .map(|(&x, &y)| (x ^ y).count_ones())
            .sum(),
        _ => HASH_DISTANCE_SENTINEL,
    }
}
