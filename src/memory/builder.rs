use image::RgbImage;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{PatchguardError, Result};
use crate::features::FeatureExtractor;
use crate::index::FlatL2Index;
use crate::types::{GridShape, ProfileConfig};

use super::bank::MemoryBank;
use super::coreset::{select_coreset, CoresetSampler};
use super::pool::ReferencePool;

/// Signal flipped to `true` by the caller to abandon a training run.
pub type CancelSignal = watch::Receiver<bool>;

/// Output of a memory bank build.
#[derive(Debug, Clone)]
pub struct BuiltBank {
    pub memory_bank: MemoryBank,
    pub index: FlatL2Index,
    /// Size of the reference pool the bank was sampled from.
    pub pool_size: usize,
    /// Grid shape of each contributing image.
    pub grids: Vec<GridShape>,
    /// Positions (into the input slice) of the images that contributed.
    pub used_images: Vec<usize>,
}

impl BuiltBank {
    pub fn skipped_images(&self, total: usize) -> usize {
        total - self.used_images.len()
    }
}

/// Extract every reference image into the pool, sample the coreset and index it.
///
/// Images whose extraction fails are skipped with a warning. Cancellation is
/// observed between images only.
pub fn build_memory_bank(
    object_id: &str,
    extractor: &dyn FeatureExtractor,
    images: &[RgbImage],
    config: &ProfileConfig,
    cancel: Option<&CancelSignal>,
) -> Result<BuiltBank> {
    config.validate()?;

    let mut pool = ReferencePool::new(extractor.descriptor_dim());
    let mut used_images = Vec::with_capacity(images.len());

    for (position, image) in images.iter().enumerate() {
        if cancel.is_some_and(|c| *c.borrow()) {
            info!(object_id, processed = position, "training cancelled");
            return Err(PatchguardError::TrainingCancelled {
                object_id: object_id.to_string(),
            });
        }

        match extractor.extract(image) {
            Ok(patches) => {
                pool.push(&patches)?;
                used_images.push(position);
            }
            Err(e) => {
                warn!(object_id, image = position, error = %e, "skipping reference image");
            }
        }
    }

    if pool.is_empty() {
        return Err(PatchguardError::InsufficientData {
            reason: format!(
                "no descriptors extracted from {} reference image(s)",
                images.len()
            ),
        });
    }

    let view = pool.view()?;
    let selected = select_coreset(
        view,
        config.coreset_ratio,
        config.coreset_strategy,
        CoresetSampler::from_seed(config.seed),
    )?;
    let memory_bank = MemoryBank::from_pool(view, &selected)?;
    let index = memory_bank.build_index()?;

    debug!(
        object_id,
        pool = pool.len(),
        bank = memory_bank.len(),
        images = used_images.len(),
        "memory bank built"
    );

    Ok(BuiltBank {
        memory_bank,
        index,
        pool_size: pool.len(),
        grids: pool.grids().to_vec(),
        used_images,
    })
}
