use std::sync::Arc;

use patchguard::config::{BackboneConfig, HeatmapConfig};
use patchguard::engine::Engine;
use patchguard::features::{BackboneExtractor, FeatureExtractor};
use patchguard::heatmap::HeatmapRenderer;
use patchguard::profile::ProfileStore;
use patchguard::storage::ObjectStorage;
use patchguard::types::{CoresetStrategy, ProfileConfig};

/// An engine over the tiny backbone and an isolated in-memory store.
pub struct TestHarness {
    pub storage: ObjectStorage,
    pub engine: Arc<Engine>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_storage(ObjectStorage::in_memory())
    }

    pub fn with_storage(storage: ObjectStorage) -> Self {
        Self::build_with(storage, Arc::new(tiny_extractor()))
    }

    pub fn with_extractor(extractor: Arc<dyn FeatureExtractor>) -> Self {
        Self::build_with(ObjectStorage::in_memory(), extractor)
    }

    pub fn build_with(storage: ObjectStorage, extractor: Arc<dyn FeatureExtractor>) -> Self {
        let heatmap = HeatmapRenderer::from_config(&HeatmapConfig::default(), extractor.input_size());
        let engine = Engine::new(extractor, ProfileStore::new(storage.clone(), 2), heatmap);
        Self {
            storage,
            engine: Arc::new(engine),
        }
    }
}

/// 64px input, 8x8 grid, 48-dim descriptors.
pub fn tiny_extractor() -> BackboneExtractor {
    BackboneExtractor::from_config(&BackboneConfig::tiny()).expect("tiny backbone")
}

/// Reproducible training parameters.
pub fn seeded_config(top_k: usize, coreset_ratio: f32) -> ProfileConfig {
    ProfileConfig {
        top_k,
        coreset_ratio,
        coreset_strategy: CoresetStrategy::Random,
        seed: Some(42),
    }
}
