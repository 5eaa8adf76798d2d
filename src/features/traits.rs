//! Core trait for patch feature extractors.
//!
//! The engine only ever talks to `dyn FeatureExtractor`, so backbones can be
//! swapped (heavier pretrained weights, lighter test doubles) without touching
//! the memory bank, scorer or profile store.

use image::RgbImage;

use crate::error::Result;
use crate::types::PatchDescriptors;

/// A frozen feature source turning an image into a grid of patch descriptors.
///
/// Implementations hold read-only state only: `extract` takes `&self` and
/// must be safe to call from many worker threads at once.
pub trait FeatureExtractor: Send + Sync {
    /// Extract one descriptor per grid cell, row-major over the grid.
    ///
    /// # Errors
    /// Returns `PatchguardError::DecodeFailure` for images that cannot be
    /// resized, and `PatchguardError::ExtractionFailure` if the forward pass
    /// produces malformed activations.
    fn extract(&self, image: &RgbImage) -> Result<PatchDescriptors>;

    /// Dimensionality of every descriptor this extractor returns.
    fn descriptor_dim(&self) -> usize;

    /// Square resolution images are resized to before extraction.
    fn input_size(&self) -> u32;

    /// Stable identifier of the weights, recorded with each profile.
    fn fingerprint(&self) -> u64 {
        0
    }
}
