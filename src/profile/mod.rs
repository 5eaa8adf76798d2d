//! Trained per-object profiles and their durable storage.

pub mod artifact;
pub mod manifest;
pub mod store;

use chrono::{DateTime, Utc};
use serde::Serialize;
use ulid::Ulid;

use crate::index::FlatL2Index;
use crate::memory::MemoryBank;
use crate::types::{CoresetStrategy, GridShape, InspectionResult, ObjectId, ProfileConfig};

pub use artifact::ThresholdArtifact;
pub use manifest::{ArtifactRef, ProfileManifest, ProfileMetadata};
pub use store::{validate_object_id, ProfileStore};

/// Everything needed to inspect images of one object class.
#[derive(Debug, Clone)]
pub struct Profile {
    pub object_id: ObjectId,
    /// Published version; nil until the profile has been saved.
    pub version: Ulid,
    pub memory_bank: MemoryBank,
    pub index: FlatL2Index,
    pub threshold: f32,
    pub config: ProfileConfig,
    pub metadata: ProfileMetadata,
}

impl Profile {
    pub fn classify(&self, score: f32) -> InspectionResult {
        InspectionResult::classify(score, self.threshold)
    }

    pub fn summary(&self) -> ProfileSummary {
        ProfileSummary {
            object_id: self.object_id.clone(),
            version: self.version,
            threshold: self.threshold,
            top_k: self.config.top_k,
            coreset_ratio: self.config.coreset_ratio,
            coreset_strategy: self.config.coreset_strategy,
            memory_bank_size: self.memory_bank.len(),
            pool_size: self.metadata.pool_size,
            images_used: self.metadata.images_used,
            descriptor_dim: self.metadata.descriptor_dim,
            grid: self.metadata.grid,
            trained_at: self.metadata.trained_at,
        }
    }
}

/// Public view of a profile, as returned by the HTTP API.
#[derive(Debug, Clone, Serialize)]
pub struct ProfileSummary {
    pub object_id: ObjectId,
    pub version: Ulid,
    pub threshold: f32,
    pub top_k: usize,
    pub coreset_ratio: f32,
    pub coreset_strategy: CoresetStrategy,
    pub memory_bank_size: usize,
    pub pool_size: usize,
    pub images_used: usize,
    pub descriptor_dim: usize,
    pub grid: GridShape,
    pub trained_at: DateTime<Utc>,
}
