use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::{PatchguardError, Result};
use crate::storage::ObjectStorage;
use crate::types::GridShape;

/// Artifact file names inside a profile version.
pub const MEMORY_ARTIFACT: &str = "memory.bin";
pub const INDEX_ARTIFACT: &str = "index.bin";
pub const THRESHOLD_ARTIFACT: &str = "threshold.json";
pub const CONFIG_ARTIFACT: &str = "config.json";

/// A reference to one stored artifact of a profile version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactRef {
    pub name: String,
    pub size: usize,
    /// xxh3 of the stored bytes.
    pub checksum: u64,
}

/// The four artifacts every loadable profile needs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProfileArtifacts {
    pub memory: ArtifactRef,
    pub index: ArtifactRef,
    pub threshold: ArtifactRef,
    pub config: ArtifactRef,
}

/// Facts about how a profile was trained, kept next to the artifacts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProfileMetadata {
    pub descriptor_dim: usize,
    pub grid: GridShape,
    pub pool_size: usize,
    pub memory_bank_size: usize,
    pub images_used: usize,
    pub backbone_fingerprint: u64,
    pub trained_at: DateTime<Utc>,
}

/// The manifest is the single source of truth for which profile version of an
/// object is live. Replacing it is the publish step of a retrain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileManifest {
    pub object_id: String,
    /// Version directory holding the artifacts.
    pub version: Ulid,
    pub artifacts: ProfileArtifacts,
    pub metadata: ProfileMetadata,
    /// Last time the manifest was published.
    pub published_at: DateTime<Utc>,
}

impl ProfileManifest {
    /// Get the storage key for the manifest of an object.
    pub fn key(object_id: &str) -> String {
        format!("{object_id}/profile.json")
    }

    /// Prefix under which all versions of an object live.
    pub fn versions_prefix(object_id: &str) -> String {
        format!("{object_id}/versions")
    }

    /// Storage key of an artifact within a version.
    pub fn artifact_key(object_id: &str, version: &Ulid, name: &str) -> String {
        format!("{object_id}/versions/{version}/{name}")
    }

    /// Serialize to JSON bytes.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let json = serde_json::to_vec_pretty(self)?;
        Ok(Bytes::from(json))
    }

    /// Deserialize from JSON bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Read the manifest for an object. Returns None if it was never published.
    pub async fn read(store: &ObjectStorage, object_id: &str) -> Result<Option<Self>> {
        let key = Self::key(object_id);
        match store.get(&key).await {
            Ok(data) => Ok(Some(Self::from_bytes(&data)?)),
            Err(PatchguardError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Publish the manifest, atomically replacing the previous one.
    pub async fn write(&self, store: &ObjectStorage) -> Result<()> {
        let key = Self::key(&self.object_id);
        let data = self.to_bytes()?;
        store.put(&key, data).await
    }
}
