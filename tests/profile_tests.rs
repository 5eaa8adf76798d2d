mod common;

use bytes::Bytes;
use chrono::Utc;
use ulid::Ulid;

use common::assertions::{
    assert_error_kind, assert_object_exists, assert_object_not_exists, assert_prefix_empty,
};
use common::harness::{seeded_config, tiny_extractor};
use common::images::{striped_texture, training_set, with_bright_rectangle};

use patchguard::features::FeatureExtractor;
use patchguard::index::NearestNeighborIndex;
use patchguard::memory::build_memory_bank;
use patchguard::profile::manifest::{INDEX_ARTIFACT, MEMORY_ARTIFACT, THRESHOLD_ARTIFACT};
use patchguard::profile::{validate_object_id, Profile, ProfileManifest, ProfileMetadata, ProfileStore};
use patchguard::scoring::score_image;
use patchguard::storage::ObjectStorage;

fn trained_profile(object_id: &str, threshold: f32) -> Profile {
    let extractor = tiny_extractor();
    let config = seeded_config(10, 0.1);
    let built = build_memory_bank(object_id, &extractor, &training_set(3), &config, None).unwrap();
    Profile {
        object_id: object_id.to_string(),
        version: Ulid::nil(),
        metadata: ProfileMetadata {
            descriptor_dim: built.memory_bank.dim(),
            grid: built.grids[0],
            pool_size: built.pool_size,
            memory_bank_size: built.memory_bank.len(),
            images_used: built.used_images.len(),
            backbone_fingerprint: extractor.fingerprint(),
            trained_at: Utc::now(),
        },
        memory_bank: built.memory_bank,
        index: built.index,
        threshold,
        config,
    }
}

async fn live_artifact_key(storage: &ObjectStorage, object_id: &str, name: &str) -> String {
    let manifest = ProfileManifest::read(storage, object_id)
        .await
        .unwrap()
        .expect("manifest");
    ProfileManifest::artifact_key(object_id, &manifest.version, name)
}

// ─── Round trip ───

#[tokio::test]
async fn test_save_load_round_trip_scores_identically() {
    let storage = ObjectStorage::in_memory();
    let store = ProfileStore::new(storage.clone(), 2);
    let profile = trained_profile("bolt", 1.25);

    let manifest = store.save(&profile).await.unwrap();
    assert_object_exists(&storage, &ProfileManifest::key("bolt")).await;
    assert_eq!(manifest.metadata.memory_bank_size, profile.memory_bank.len());

    let loaded = store.load("bolt").await.unwrap();
    assert_eq!(loaded.version, manifest.version);
    assert_eq!(loaded.threshold, 1.25);
    assert_eq!(loaded.config, profile.config);
    assert_eq!(loaded.memory_bank, profile.memory_bank);
    assert_eq!(loaded.index, profile.index);
    assert_eq!(loaded.metadata, profile.metadata);

    let extractor = tiny_extractor();
    for image in [
        striped_texture(7),
        with_bright_rectangle(&striped_texture(8), 20, 20, 10, 10),
    ] {
        let before = score_image(&extractor, &profile.index, &image, profile.config.top_k).unwrap();
        let after = score_image(&extractor, &loaded.index, &image, loaded.config.top_k).unwrap();
        assert_eq!(before, after);
    }
}

#[tokio::test]
async fn test_round_trip_on_local_filesystem() {
    let dir = tempfile::TempDir::new().unwrap();
    let storage = ObjectStorage::local(dir.path()).unwrap();
    let store = ProfileStore::new(storage, 2);

    store.save(&trained_profile("gear", 0.5)).await.unwrap();
    assert!(dir.path().join("gear").join("profile.json").exists());

    // A fresh store over the same directory sees the profile.
    let reopened = ProfileStore::new(ObjectStorage::local(dir.path()).unwrap(), 2);
    let loaded = reopened.load("gear").await.unwrap();
    assert_eq!(loaded.threshold, 0.5);
    assert_eq!(reopened.list().await.unwrap(), vec!["gear".to_string()]);
}

// ─── Failure modes ───

#[tokio::test]
async fn test_missing_profile_is_not_found() {
    let store = ProfileStore::new(ObjectStorage::in_memory(), 2);
    assert_error_kind(store.load("ghost").await, "profile_not_found");
}

#[tokio::test]
async fn test_tampered_artifact_is_corrupt() {
    let storage = ObjectStorage::in_memory();
    let store = ProfileStore::new(storage.clone(), 2);
    store.save(&trained_profile("bolt", 1.0)).await.unwrap();

    let key = live_artifact_key(&storage, "bolt", MEMORY_ARTIFACT).await;
    let mut data = storage.get(&key).await.unwrap().to_vec();
    let last = data.len() - 1;
    data[last] ^= 0xff;
    storage.put(&key, Bytes::from(data)).await.unwrap();

    assert_error_kind(store.load("bolt").await, "profile_corrupt");
}

#[tokio::test]
async fn test_missing_artifact_is_corrupt() {
    let storage = ObjectStorage::in_memory();
    let store = ProfileStore::new(storage.clone(), 2);
    store.save(&trained_profile("bolt", 1.0)).await.unwrap();

    for name in [INDEX_ARTIFACT, THRESHOLD_ARTIFACT] {
        let key = live_artifact_key(&storage, "bolt", name).await;
        let original = storage.get(&key).await.unwrap();
        storage.delete(&key).await.unwrap();
        let err = assert_error_kind(store.load("bolt").await, "profile_corrupt");
        assert!(err.to_string().contains(name), "unexpected message: {err}");
        storage.put(&key, original).await.unwrap();
    }
    store.load("bolt").await.unwrap();
}

#[tokio::test]
async fn test_unreadable_manifest_is_corrupt() {
    let storage = ObjectStorage::in_memory();
    let store = ProfileStore::new(storage.clone(), 2);
    storage
        .put(&ProfileManifest::key("bolt"), Bytes::from_static(b"{not json"))
        .await
        .unwrap();
    assert_error_kind(store.load("bolt").await, "profile_corrupt");
}

#[tokio::test]
async fn test_invalid_object_ids_are_rejected() {
    assert!(validate_object_id("pcb-rev_2.1").is_ok());
    for bad in ["", ".", "..", "a/b", "white space", "ünï"] {
        assert!(validate_object_id(bad).is_err(), "{bad:?} should be rejected");
    }
    let store = ProfileStore::new(ObjectStorage::in_memory(), 2);
    assert_error_kind(store.load("../etc").await, "validation");
}

// ─── Versions ───

#[tokio::test]
async fn test_retrain_replaces_live_version_and_prunes_old_ones() {
    let storage = ObjectStorage::in_memory();
    let store = ProfileStore::new(storage.clone(), 2);

    let mut versions = Vec::new();
    for threshold in [1.0, 2.0, 3.0] {
        versions.push(store.save(&trained_profile("bolt", threshold)).await.unwrap().version);
    }

    assert_eq!(store.load("bolt").await.unwrap().threshold, 3.0);

    let kept = storage
        .list_children(&ProfileManifest::versions_prefix("bolt"))
        .await
        .unwrap();
    assert_eq!(kept.len(), 2, "kept versions: {kept:?}");
    assert!(kept.contains(&versions[2].to_string()));

    let live = ProfileManifest::read(&storage, "bolt").await.unwrap().unwrap();
    assert_eq!(live.version, versions[2]);
}

#[tokio::test]
async fn test_delete_and_list() {
    let storage = ObjectStorage::in_memory();
    let store = ProfileStore::new(storage.clone(), 2);
    store.save(&trained_profile("bolt", 1.0)).await.unwrap();
    store.save(&trained_profile("gear", 1.0)).await.unwrap();

    assert_eq!(store.list().await.unwrap(), vec!["bolt", "gear"]);
    assert!(store.exists("bolt").await.unwrap());

    assert!(store.delete("bolt").await.unwrap());
    assert!(!store.delete("bolt").await.unwrap());
    assert_object_not_exists(&storage, &ProfileManifest::key("bolt")).await;
    assert_prefix_empty(&storage, "bolt").await;
    assert_eq!(store.list().await.unwrap(), vec!["gear"]);
    assert_error_kind(store.load("bolt").await, "profile_not_found");
}

#[tokio::test]
async fn test_loaded_index_matches_bank() {
    let store = ProfileStore::new(ObjectStorage::in_memory(), 2);
    store.save(&trained_profile("bolt", 1.0)).await.unwrap();
    let loaded = store.load("bolt").await.unwrap();
    assert_eq!(loaded.index.len(), loaded.memory_bank.len());
    assert_eq!(loaded.index.dimension(), loaded.memory_bank.dim());
}
