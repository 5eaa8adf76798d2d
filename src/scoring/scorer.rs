use image::RgbImage;
use ndarray::Array2;
use tracing::trace;

use crate::error::{PatchguardError, Result};
use crate::features::FeatureExtractor;
use crate::index::NearestNeighborIndex;
use crate::types::{ImageScore, PatchDescriptors};

/// Extract `image` and score it against `index`.
pub fn score_image(
    extractor: &dyn FeatureExtractor,
    index: &dyn NearestNeighborIndex,
    image: &RgbImage,
    top_k: usize,
) -> Result<ImageScore> {
    let patches = extractor.extract(image)?;
    score_descriptors(index, &patches, top_k)
}

/// Score already-extracted descriptors: nearest squared distance per cell,
/// reshaped row-major into the score map, aggregated by top-k mean.
pub fn score_descriptors(
    index: &dyn NearestNeighborIndex,
    patches: &PatchDescriptors,
    top_k: usize,
) -> Result<ImageScore> {
    if top_k == 0 {
        return Err(PatchguardError::InvalidConfiguration(
            "top_k must be > 0".into(),
        ));
    }
    let distances = index.nearest_distances(patches.descriptors.view())?;
    let score = top_k_mean(&distances, top_k);
    let score_map = Array2::from_shape_vec((patches.grid.height, patches.grid.width), distances)
        .map_err(|e| PatchguardError::Internal(format!("score map shape: {e}")))?;

    trace!(score, grid = %patches.grid, "scored image");
    Ok(ImageScore { score, score_map })
}

/// Mean of the `min(top_k, len)` largest values; 0 for an empty slice.
pub fn top_k_mean(values: &[f32], top_k: usize) -> f32 {
    let k = top_k.min(values.len());
    if k == 0 {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable_by(|a, b| b.total_cmp(a));
    let sum: f64 = sorted[..k].iter().map(|&v| f64::from(v)).sum();
    (sum / k as f64) as f32
}
