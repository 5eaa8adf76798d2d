use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use ulid::{Generator, Ulid};

use crate::error::{PatchguardError, Result};
use crate::index::{FlatL2Index, NearestNeighborIndex};
use crate::memory::MemoryBank;
use crate::storage::ObjectStorage;
use crate::types::{ObjectId, ProfileConfig};

use super::artifact::{verify, EncodedArtifact, ThresholdArtifact};
use super::manifest::{
    ArtifactRef, ProfileArtifacts, ProfileManifest, CONFIG_ARTIFACT, INDEX_ARTIFACT,
    MEMORY_ARTIFACT, THRESHOLD_ARTIFACT,
};
use super::Profile;

/// Reject identifiers that cannot be used as a single storage path segment.
pub fn validate_object_id(object_id: &str) -> Result<()> {
    let valid = !object_id.is_empty()
        && object_id.len() <= 128
        && object_id != "."
        && object_id != ".."
        && object_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(PatchguardError::Validation(format!(
            "invalid object id: {object_id:?}"
        )))
    }
}

fn corrupt(object_id: &str, reason: impl Into<String>) -> PatchguardError {
    PatchguardError::ProfileCorrupt {
        object_id: object_id.to_string(),
        reason: reason.into(),
    }
}

/// Durable per-object profile bundles.
///
/// A save stages all four artifacts under a fresh version prefix and only
/// then replaces the manifest, so a concurrent `load` resolves either the
/// complete old version or the complete new one. Saves and deletes for the
/// same object are serialized by a per-object mutex.
pub struct ProfileStore {
    store: ObjectStorage,
    /// Versions kept per object after a publish, the live one included.
    retain_versions: usize,
    locks: DashMap<String, Arc<Mutex<()>>>,
    /// Monotonic, so a later publish always carries a larger version.
    versions: std::sync::Mutex<Generator>,
}

impl ProfileStore {
    pub fn new(store: ObjectStorage, retain_versions: usize) -> Self {
        Self {
            store,
            retain_versions: retain_versions.max(1),
            locks: DashMap::new(),
            versions: std::sync::Mutex::new(Generator::new()),
        }
    }

    fn next_version(&self) -> Result<Ulid> {
        let mut generator = self
            .versions
            .lock()
            .map_err(|_| PatchguardError::Internal("version generator poisoned".into()))?;
        generator
            .generate()
            .map_err(|e| PatchguardError::Internal(format!("version overflow: {e}")))
    }

    pub fn storage(&self) -> &ObjectStorage {
        &self.store
    }

    /// Get or create the per-object lock.
    fn object_lock(&self, object_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(object_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    /// Forget the per-object lock once nobody else holds or waits on it.
    fn release_lock(&self, object_id: &str) {
        self.locks
            .remove_if(object_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Number of per-object locks currently tracked.
    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }

    /// Persist a profile and publish it as the object's live version.
    #[instrument(skip(self, profile), fields(object_id = %profile.object_id))]
    pub async fn save(&self, profile: &Profile) -> Result<ProfileManifest> {
        let object_id = profile.object_id.as_str();
        validate_object_id(object_id)?;

        let lock = self.object_lock(object_id);
        let guard = lock.lock().await;
        let result = self.publish(profile).await;
        drop(guard);
        drop(lock);
        self.release_lock(object_id);
        result
    }

    async fn publish(&self, profile: &Profile) -> Result<ProfileManifest> {
        let object_id = profile.object_id.as_str();
        let memory = EncodedArtifact::new(MEMORY_ARTIFACT, profile.memory_bank.to_bytes()?);
        let index = EncodedArtifact::new(INDEX_ARTIFACT, profile.index.to_bytes()?);
        let threshold = EncodedArtifact::new(
            THRESHOLD_ARTIFACT,
            serde_json::to_vec(&ThresholdArtifact {
                threshold: profile.threshold,
            })?,
        );
        let config = EncodedArtifact::new(CONFIG_ARTIFACT, serde_json::to_vec(&profile.config)?);

        let version = self.next_version()?;
        if let Err(e) = self
            .stage(object_id, &version, [&memory, &index, &threshold, &config])
            .await
        {
            warn!(object_id, %version, error = %e, "staging failed, discarding version");
            let prefix = format!("{}/{version}", ProfileManifest::versions_prefix(object_id));
            if let Err(cleanup) = self.store.delete_prefix(&prefix).await {
                warn!(object_id, %version, error = %cleanup, "failed to discard staged version");
            }
            return Err(e);
        }

        let manifest = ProfileManifest {
            object_id: object_id.to_string(),
            version,
            artifacts: ProfileArtifacts {
                memory: memory.reference,
                index: index.reference,
                threshold: threshold.reference,
                config: config.reference,
            },
            metadata: profile.metadata.clone(),
            published_at: Utc::now(),
        };
        manifest.write(&self.store).await?;

        info!(
            object_id,
            %version,
            memory_bank = profile.memory_bank.len(),
            threshold = profile.threshold,
            "published profile"
        );

        match self.collect_garbage(object_id, &version).await {
            Ok(removed) if removed > 0 => debug!(object_id, removed, "pruned old versions"),
            Ok(_) => {}
            Err(e) => warn!(object_id, error = %e, "failed to prune old profile versions"),
        }

        Ok(manifest)
    }

    async fn stage(
        &self,
        object_id: &str,
        version: &Ulid,
        artifacts: [&EncodedArtifact; 4],
    ) -> Result<()> {
        for artifact in artifacts {
            let key = ProfileManifest::artifact_key(object_id, version, &artifact.reference.name);
            self.store.put(&key, artifact.data.clone()).await?;
        }
        Ok(())
    }

    /// Remove versions beyond `retain_versions`, never the live one.
    async fn collect_garbage(&self, object_id: &str, live: &Ulid) -> Result<usize> {
        let prefix = ProfileManifest::versions_prefix(object_id);
        let mut versions: Vec<Ulid> = self
            .store
            .list_children(&prefix)
            .await?
            .iter()
            .filter_map(|name| Ulid::from_string(name).ok())
            .filter(|v| v != live)
            .collect();
        versions.sort_unstable_by(|a, b| b.cmp(a));

        let mut removed = 0;
        for stale in versions.iter().skip(self.retain_versions - 1) {
            removed += self
                .store
                .delete_prefix(&format!("{prefix}/{stale}"))
                .await?;
        }
        Ok(removed)
    }

    /// Read the live manifest of an object, if one was published.
    pub async fn manifest(&self, object_id: &str) -> Result<Option<ProfileManifest>> {
        validate_object_id(object_id)?;
        match ProfileManifest::read(&self.store, object_id).await {
            Err(PatchguardError::Json(e)) => {
                Err(corrupt(object_id, format!("unreadable manifest: {e}")))
            }
            other => other,
        }
    }

    /// Load the live profile of an object with its index ready to query.
    #[instrument(skip(self))]
    pub async fn load(&self, object_id: &str) -> Result<Profile> {
        let manifest =
            self.manifest(object_id)
                .await?
                .ok_or_else(|| PatchguardError::ProfileNotFound {
                    object_id: object_id.to_string(),
                })?;
        let artifacts = &manifest.artifacts;

        let (memory, index, threshold, config) = futures::try_join!(
            self.fetch(&manifest, &artifacts.memory),
            self.fetch(&manifest, &artifacts.index),
            self.fetch(&manifest, &artifacts.threshold),
            self.fetch(&manifest, &artifacts.config),
        )?;

        let memory_bank = MemoryBank::from_bytes(&memory)
            .map_err(|e| corrupt(object_id, format!("memory bank: {e}")))?;
        let index = FlatL2Index::from_bytes(&index)
            .map_err(|e| corrupt(object_id, format!("index: {e}")))?;
        let threshold: ThresholdArtifact = serde_json::from_slice(&threshold)
            .map_err(|e| corrupt(object_id, format!("threshold: {e}")))?;
        let config: ProfileConfig = serde_json::from_slice(&config)
            .map_err(|e| corrupt(object_id, format!("config: {e}")))?;
        config
            .validate()
            .map_err(|e| corrupt(object_id, format!("config: {e}")))?;

        if !threshold.threshold.is_finite() {
            return Err(corrupt(object_id, "threshold is not finite"));
        }
        if index.len() != memory_bank.len() || index.dimension() != memory_bank.dim() {
            return Err(corrupt(
                object_id,
                format!(
                    "index ({} x {}) does not match memory bank ({} x {})",
                    index.len(),
                    index.dimension(),
                    memory_bank.len(),
                    memory_bank.dim()
                ),
            ));
        }
        if memory_bank.dim() != manifest.metadata.descriptor_dim {
            return Err(corrupt(
                object_id,
                format!(
                    "memory bank dimension {} differs from recorded {}",
                    memory_bank.dim(),
                    manifest.metadata.descriptor_dim
                ),
            ));
        }

        debug!(
            object_id,
            version = %manifest.version,
            memory_bank = memory_bank.len(),
            "loaded profile"
        );

        Ok(Profile {
            object_id: object_id.to_string(),
            version: manifest.version,
            memory_bank,
            index,
            threshold: threshold.threshold,
            config,
            metadata: manifest.metadata,
        })
    }

    async fn fetch(&self, manifest: &ProfileManifest, artifact: &ArtifactRef) -> Result<Bytes> {
        let object_id = manifest.object_id.as_str();
        let key = ProfileManifest::artifact_key(object_id, &manifest.version, &artifact.name);
        let data = match self.store.get(&key).await {
            Ok(data) => data,
            Err(PatchguardError::NotFound { .. }) => {
                return Err(corrupt(object_id, format!("missing artifact {}", artifact.name)))
            }
            Err(e) => return Err(e),
        };
        verify(artifact, &data).map_err(|e| corrupt(object_id, e.to_string()))?;
        Ok(data)
    }

    /// Whether a live profile exists for the object.
    pub async fn exists(&self, object_id: &str) -> Result<bool> {
        validate_object_id(object_id)?;
        self.store.exists(&ProfileManifest::key(object_id)).await
    }

    /// Delete the manifest first (unpublish), then every version.
    /// Returns false when there was nothing to delete.
    #[instrument(skip(self))]
    pub async fn delete(&self, object_id: &str) -> Result<bool> {
        validate_object_id(object_id)?;
        let lock = self.object_lock(object_id);
        let guard = lock.lock().await;
        let result = self.remove_all(object_id).await;
        drop(guard);
        drop(lock);
        self.release_lock(object_id);
        result
    }

    async fn remove_all(&self, object_id: &str) -> Result<bool> {
        let existed = self.store.exists(&ProfileManifest::key(object_id)).await?;
        self.store.delete(&ProfileManifest::key(object_id)).await?;
        let removed = self.store.delete_prefix(object_id).await?;
        info!(object_id, removed, "deleted profile");
        Ok(existed || removed > 0)
    }

    /// Objects that currently have a published profile.
    pub async fn list(&self) -> Result<Vec<ObjectId>> {
        let mut objects = Vec::new();
        for candidate in self.store.list_children("").await? {
            if validate_object_id(&candidate).is_ok()
                && self.store.exists(&ProfileManifest::key(&candidate)).await?
            {
                objects.push(candidate);
            }
        }
        Ok(objects)
    }
}
