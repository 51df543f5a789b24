//! Image quality score used to pick a cluster representative.
//!
//! quality = resolution in megapixels + file size in MB + sharpness / 100,
//! where sharpness is the variance of the Laplacian filter response.
//! Higher is better. Any failure scores 0.0 so the image stays eligible,
//! just at the lowest priority.

use std::fs;
use std::path::Path;

use image::GrayImage;
use imageproc::filter::laplacian_filter;
use tracing::warn;

/// Variance of the Laplacian response; the standard blur measure.
pub fn laplacian_variance(gray: &GrayImage) -> f64 {
    let response = laplacian_filter(gray);
    let n = (response.width() * response.height()) as f64;
    if n == 0.0 {
        return 0.0;
    }
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    for p in response.pixels() {
        let v = p[0] as f64;
        sum += v;
        sum_sq += v * v;
    }
    let mean = sum / n;
    (sum_sq / n - mean * mean).max(0.0)
}

pub fn quality_score(path: &Path) -> f64 {
    let Ok(metadata) = fs::metadata(path) else {
        warn!("quality: cannot stat {}", path.display());
        return 0.0;
    };
    let Ok(img) = image::open(path) else {
        warn!("quality: cannot decode {}", path.display());
        return 0.0;
    };
    let gray = img.to_luma8();
    let megapixels = (img.width() as f64 * img.height() as f64) / 1_000_000.0;
    let megabytes = metadata.len() as f64 / 1_000_000.0;
    megapixels + megabytes + laplacian_variance(&gray) / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn sharp_texture_beats_flat_gray() {
        let sharp = GrayImage::from_fn(64, 64, |x, y| {
            image::Luma([if (x + y) % 2 == 0 { 255 } else { 0 }])
        });
        let flat = GrayImage::from_pixel(64, 64, image::Luma([128]));
        assert!(laplacian_variance(&sharp) > laplacian_variance(&flat));
        assert_eq!(laplacian_variance(&flat), 0.0);
    }

    #[test]
    fn missing_file_scores_zero() {
        assert_eq!(quality_score(Path::new("/nope/missing.jpg")), 0.0);
    }

    #[test]
    fn higher_resolution_scores_higher() {
        let dir = TempDir::new().unwrap();
        let small = dir.path().join("small.png");
        let large = dir.path().join("large.png");
        let pattern = |w: u32, h: u32| {
            GrayImage::from_fn(w, h, |x, y| image::Luma([((x * 5 + y * 3) % 256) as u8]))
        };
        pattern(64, 64).save(&small).unwrap();
        pattern(256, 256).save(&large).unwrap();
        assert!(quality_score(&large) > quality_score(&small));
    }
}
