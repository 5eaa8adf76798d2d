//! The inspection engine: training, scoring and profile lifecycle for every
//! object class served by one process.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use image::RgbImage;
use ndarray::Array2;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use ulid::Ulid;

use crate::config::Config;
use crate::error::{PatchguardError, Result};
use crate::features::{BackboneExtractor, FeatureExtractor};
use crate::heatmap::HeatmapRenderer;
use crate::memory::{build_memory_bank, CancelSignal};
use crate::metrics::{self, GaugeGuard};
use crate::profile::{validate_object_id, Profile, ProfileMetadata, ProfileStore};
use crate::scoring::{calibrate, score_image};
use crate::storage::ObjectStorage;
use crate::types::{ImageScore, InspectionResult, ObjectId, ProfileConfig};

/// A scored and classified image.
#[derive(Debug, Clone)]
pub struct Inspection {
    pub score: ImageScore,
    pub result: InspectionResult,
    pub threshold: f32,
}

pub struct Engine {
    extractor: Arc<dyn FeatureExtractor>,
    profiles: ProfileStore,
    heatmap: HeatmapRenderer,
    /// Loaded profiles; an entry is only ever replaced by a newer version.
    cache: DashMap<ObjectId, Arc<Profile>>,
    /// Bumped by every delete. A storage load that straddles a bump is not
    /// cached.
    deletions: DashMap<ObjectId, u64>,
    /// Held for the duration of a training run.
    training: DashMap<ObjectId, Arc<Mutex<()>>>,
}

impl Engine {
    pub fn new(
        extractor: Arc<dyn FeatureExtractor>,
        profiles: ProfileStore,
        heatmap: HeatmapRenderer,
    ) -> Self {
        Self {
            extractor,
            profiles,
            heatmap,
            cache: DashMap::new(),
            deletions: DashMap::new(),
            training: DashMap::new(),
        }
    }

    /// Wire up the backbone, storage and renderer described by `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let extractor = BackboneExtractor::from_config(&config.backbone)?;
        let storage = ObjectStorage::from_config(&config.storage)?;
        let heatmap = HeatmapRenderer::from_config(&config.heatmap, extractor.input_size());
        info!(
            descriptor_dim = extractor.descriptor_dim(),
            input_size = extractor.input_size(),
            fingerprint = extractor.fingerprint(),
            "feature extractor ready"
        );
        Ok(Self::new(
            Arc::new(extractor),
            ProfileStore::new(storage, config.training.retain_versions),
            heatmap,
        ))
    }

    pub fn extractor(&self) -> &Arc<dyn FeatureExtractor> {
        &self.extractor
    }

    pub fn profiles(&self) -> &ProfileStore {
        &self.profiles
    }

    fn training_lock(&self, object_id: &str) -> Arc<Mutex<()>> {
        self.training
            .entry(object_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    /// Number of per-object training locks currently tracked.
    pub fn training_lock_count(&self) -> usize {
        self.training.len()
    }

    fn deletion_count(&self, object_id: &str) -> u64 {
        self.deletions.get(object_id).map(|n| *n).unwrap_or(0)
    }

    /// Cache `profile` unless a newer version is already cached, or a delete
    /// happened since `observed` was read. Returns the profile callers should
    /// use.
    fn cache_profile(&self, profile: Arc<Profile>, observed: Option<u64>) -> Arc<Profile> {
        let entry = self.cache.entry(profile.object_id.clone());
        if observed.is_some_and(|n| n != self.deletion_count(&profile.object_id)) {
            debug!(object_id = %profile.object_id, "profile deleted during load, not caching");
            return profile;
        }
        match entry {
            Entry::Occupied(mut cached) => {
                if cached.get().version < profile.version {
                    cached.insert(profile.clone());
                    profile
                } else {
                    cached.get().clone()
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(profile.clone());
                profile
            }
        }
    }

    /// Train a profile from reference images and publish it.
    ///
    /// Rejects a second run for the same object while one is in flight.
    /// Nothing is written unless the memory bank and threshold were both
    /// produced.
    #[instrument(skip(self, images, config, cancel), fields(images = images.len()))]
    pub async fn build_profile(
        &self,
        object_id: &str,
        images: Vec<RgbImage>,
        config: ProfileConfig,
        cancel: Option<CancelSignal>,
    ) -> Result<Arc<Profile>> {
        validate_object_id(object_id)?;
        config.validate()?;

        let guard = self
            .training_lock(object_id)
            .try_lock_owned()
            .map_err(|_| PatchguardError::TrainingInProgress {
                object_id: object_id.to_string(),
            })?;
        metrics::ACTIVE_TRAININGS.inc();
        let gauge = GaugeGuard(&metrics::ACTIVE_TRAININGS);
        let start = Instant::now();

        let result = self.train(object_id, images, config, cancel).await;
        drop(gauge);
        drop(guard);
        self.release_training_lock(object_id);

        let status = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        metrics::TRAININGS_TOTAL
            .with_label_values(&[object_id, status])
            .inc();
        if result.is_ok() {
            metrics::TRAINING_DURATION
                .with_label_values(&[object_id])
                .observe(start.elapsed().as_secs_f64());
        }
        result
    }

    fn release_training_lock(&self, object_id: &str) {
        self.training
            .remove_if(object_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    async fn train(
        &self,
        object_id: &str,
        images: Vec<RgbImage>,
        config: ProfileConfig,
        cancel: Option<CancelSignal>,
    ) -> Result<Arc<Profile>> {
        if images.is_empty() {
            return Err(PatchguardError::InsufficientData {
                reason: "no reference images supplied".into(),
            });
        }

        let extractor = self.extractor.clone();
        let id = object_id.to_string();
        let total = images.len();
        let mut profile = tokio::task::spawn_blocking(move || -> Result<Profile> {
            let built =
                build_memory_bank(&id, extractor.as_ref(), &images, &config, cancel.as_ref())?;
            let used: Vec<&RgbImage> = built.used_images.iter().map(|&i| &images[i]).collect();
            let (threshold, scores) =
                calibrate(extractor.as_ref(), &built.index, &used, config.top_k)?;
            debug!(object_id = %id, ?scores, "training scores");

            let grid = built
                .grids
                .first()
                .copied()
                .ok_or_else(|| PatchguardError::Internal("built bank has no grids".into()))?;
            let metadata = ProfileMetadata {
                descriptor_dim: built.memory_bank.dim(),
                grid,
                pool_size: built.pool_size,
                memory_bank_size: built.memory_bank.len(),
                images_used: built.used_images.len(),
                backbone_fingerprint: extractor.fingerprint(),
                trained_at: Utc::now(),
            };
            Ok(Profile {
                object_id: id,
                version: Ulid::nil(),
                memory_bank: built.memory_bank,
                index: built.index,
                threshold,
                config,
                metadata,
            })
        })
        .await??;

        profile.version = self.profiles.save(&profile).await?.version;

        info!(
            object_id,
            images = total,
            images_used = profile.metadata.images_used,
            memory_bank = profile.memory_bank.len(),
            threshold = profile.threshold,
            "trained profile"
        );

        Ok(self.cache_profile(Arc::new(profile), None))
    }

    /// The live profile of an object, from cache or storage.
    pub async fn load_profile(&self, object_id: &str) -> Result<Arc<Profile>> {
        if let Some(profile) = self.cache.get(object_id) {
            metrics::PROFILE_CACHE_HITS.with_label_values(&["hit"]).inc();
            return Ok(profile.value().clone());
        }
        metrics::PROFILE_CACHE_HITS.with_label_values(&["miss"]).inc();

        let observed = self.deletion_count(object_id);
        let profile = self.profiles.load(object_id).await?;
        self.check_compatible(&profile)?;

        Ok(self.cache_profile(Arc::new(profile), Some(observed)))
    }

    fn check_compatible(&self, profile: &Profile) -> Result<()> {
        let expected = self.extractor.descriptor_dim();
        if profile.metadata.descriptor_dim != expected {
            return Err(PatchguardError::DimensionMismatch {
                expected,
                actual: profile.metadata.descriptor_dim,
            });
        }
        if profile.metadata.backbone_fingerprint != self.extractor.fingerprint() {
            warn!(
                object_id = %profile.object_id,
                profile_fingerprint = profile.metadata.backbone_fingerprint,
                extractor_fingerprint = self.extractor.fingerprint(),
                "profile was trained with different backbone weights"
            );
        }
        Ok(())
    }

    /// Score one image against a profile, using the profile's own `top_k`.
    pub async fn score_image(&self, profile: &Arc<Profile>, image: RgbImage) -> Result<ImageScore> {
        let extractor = self.extractor.clone();
        let profile = profile.clone();
        tokio::task::spawn_blocking(move || timed_score(extractor.as_ref(), &profile, &image))
            .await?
    }

    /// Score each image independently; one failure does not affect the rest.
    pub async fn score_batch(
        &self,
        profile: &Arc<Profile>,
        images: Vec<RgbImage>,
    ) -> Vec<Result<ImageScore>> {
        let tasks = images.into_iter().map(|image| self.score_image(profile, image));
        futures::future::join_all(tasks).await
    }

    /// Colored overlay of `score_map` on `image`, PNG encoded.
    pub fn render_heatmap(&self, image: &RgbImage, score_map: &Array2<f32>) -> Result<Bytes> {
        self.heatmap.render(image, score_map)
    }

    /// Score and classify one image against the object's live profile.
    pub async fn inspect(&self, object_id: &str, image: RgbImage) -> Result<Inspection> {
        let profile = self.load_profile(object_id).await?;
        let score = self.score_image(&profile, image).await?;
        Ok(classified(&profile, score))
    }

    /// `inspect` plus the heatmap overlay, computed on one blocking worker.
    pub async fn inspect_with_heatmap(
        &self,
        object_id: &str,
        image: RgbImage,
    ) -> Result<(Inspection, Bytes)> {
        let profile = self.load_profile(object_id).await?;
        let extractor = self.extractor.clone();
        let heatmap = self.heatmap.clone();
        tokio::task::spawn_blocking(move || {
            let score = timed_score(extractor.as_ref(), &profile, &image)?;
            let png = heatmap.render(&image, &score.score_map)?;
            Ok((classified(&profile, score), png))
        })
        .await?
    }

    /// Inspect a batch; the outer error covers only profile resolution.
    pub async fn inspect_batch(
        &self,
        object_id: &str,
        images: Vec<RgbImage>,
    ) -> Result<Vec<Result<Inspection>>> {
        let profile = self.load_profile(object_id).await?;
        let scores = self.score_batch(&profile, images).await;
        Ok(scores
            .into_iter()
            .map(|score| score.map(|s| classified(&profile, s)))
            .collect())
    }

    /// Remove an object's profile from storage and the cache.
    ///
    /// The deletion counter is bumped after storage is cleared, so a load
    /// that read the old bundle before then never re-caches it.
    pub async fn delete_profile(&self, object_id: &str) -> Result<bool> {
        let deleted = self.profiles.delete(object_id).await?;
        *self.deletions.entry(object_id.to_string()).or_insert(0) += 1;
        self.cache.remove(object_id);
        self.release_training_lock(object_id);
        Ok(deleted)
    }

    pub async fn list_profiles(&self) -> Result<Vec<ObjectId>> {
        self.profiles.list().await
    }

    /// Drop a cached profile so the next lookup rereads storage.
    pub fn evict(&self, object_id: &str) -> bool {
        self.cache.remove(object_id).is_some()
    }
}

fn timed_score(
    extractor: &dyn FeatureExtractor,
    profile: &Profile,
    image: &RgbImage,
) -> Result<ImageScore> {
    let start = Instant::now();
    let score = score_image(extractor, &profile.index, image, profile.config.top_k)?;
    metrics::SCORE_DURATION
        .with_label_values(&[profile.object_id.as_str()])
        .observe(start.elapsed().as_secs_f64());
    Ok(score)
}

fn classified(profile: &Profile, score: ImageScore) -> Inspection {
    let result = profile.classify(score.score);
    metrics::INSPECTIONS_TOTAL
        .with_label_values(&[profile.object_id.as_str(), result.to_string().as_str()])
        .inc();
    Inspection {
        score,
        result,
        threshold: profile.threshold,
    }
}
