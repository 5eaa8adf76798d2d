//! Threshold calibration against the training images themselves.

use image::RgbImage;
use tracing::debug;

use crate::error::{PatchguardError, Result};
use crate::features::FeatureExtractor;
use crate::index::NearestNeighborIndex;

use super::scorer::score_image;

/// Percentile of training scores used as the decision threshold.
pub const CALIBRATION_PERCENTILE: f64 = 99.5;

/// Percentile `q` (0..=100) with linear interpolation between closest ranks,
/// placing the target at position `(n - 1) * q / 100` of the sorted values.
pub fn percentile(values: &[f32], q: f64) -> Result<f32> {
    if values.is_empty() {
        return Err(PatchguardError::InsufficientData {
            reason: "percentile of an empty score set".into(),
        });
    }
    if !(0.0..=100.0).contains(&q) {
        return Err(PatchguardError::Validation(format!(
            "percentile must be in [0, 100], got {q}"
        )));
    }
    if values.len() == 1 {
        return Ok(values[0]);
    }

    let mut sorted: Vec<f64> = values.iter().map(|&v| f64::from(v)).collect();
    sorted.sort_unstable_by(|a, b| a.total_cmp(b));

    let rank = (sorted.len() - 1) as f64 * q / 100.0;
    let lo = rank.floor() as usize;
    let hi = (lo + 1).min(sorted.len() - 1);
    let frac = rank - lo as f64;
    Ok((sorted[lo] + (sorted[hi] - sorted[lo]) * frac) as f32)
}

/// Decision threshold for a set of training scores.
pub fn calibrate_threshold(scores: &[f32]) -> Result<f32> {
    percentile(scores, CALIBRATION_PERCENTILE)
}

/// Score every reference image with `top_k` and derive the threshold.
/// Returns the threshold together with the per-image scores.
pub fn calibrate(
    extractor: &dyn FeatureExtractor,
    index: &dyn NearestNeighborIndex,
    images: &[&RgbImage],
    top_k: usize,
) -> Result<(f32, Vec<f32>)> {
    let scores = images
        .iter()
        .map(|image| score_image(extractor, index, image, top_k).map(|s| s.score))
        .collect::<Result<Vec<f32>>>()?;
    let threshold = calibrate_threshold(&scores)?;
    debug!(images = scores.len(), threshold, "calibrated threshold");
    Ok((threshold, scores))
}
