//! Thin byte-addressed wrapper over `object_store`.
//!
//! Keys are plain `/`-separated strings; every backend (local disk, memory,
//! S3, GCS, Azure) is reached through the same handful of calls.

use std::sync::Arc;

use bytes::Bytes;
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::azure::MicrosoftAzureBuilder;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{ObjectMeta, ObjectStore, PutPayload};
use tracing::{debug, info, instrument};

use crate::config::{StorageBackend, StorageConfig};
use crate::error::{PatchguardError, Result};

/// Cloneable handle to the configured object store.
#[derive(Clone)]
pub struct ObjectStorage {
    inner: Arc<dyn ObjectStore>,
}

impl std::fmt::Debug for ObjectStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ObjectStorage({})", self.inner)
    }
}

impl ObjectStorage {
    pub fn new(inner: Arc<dyn ObjectStore>) -> Self {
        Self { inner }
    }

    /// Fresh in-memory store, used by tests and the `memory` backend.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()))
    }

    /// Local filesystem store rooted at `root` (created if missing).
    pub fn local(root: &std::path::Path) -> Result<Self> {
        std::fs::create_dir_all(root)?;
        let fs = LocalFileSystem::new_with_prefix(root)?;
        Ok(Self::new(Arc::new(fs)))
    }

    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        let store = match config.backend {
            StorageBackend::Local => return Self::local(&config.root),
            StorageBackend::Memory => return Ok(Self::in_memory()),
            StorageBackend::S3 => {
                let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket(config)?);
                if let Some(region) = &config.region {
                    builder = builder.with_region(region);
                }
                if let Some(endpoint) = &config.endpoint {
                    builder = builder
                        .with_endpoint(endpoint)
                        .with_allow_http(endpoint.starts_with("http://"));
                }
                Arc::new(builder.build()?) as Arc<dyn ObjectStore>
            }
            StorageBackend::Gcs => Arc::new(
                GoogleCloudStorageBuilder::from_env()
                    .with_bucket_name(bucket(config)?)
                    .build()?,
            ) as Arc<dyn ObjectStore>,
            StorageBackend::Azure => Arc::new(
                MicrosoftAzureBuilder::from_env()
                    .with_container_name(bucket(config)?)
                    .build()?,
            ) as Arc<dyn ObjectStore>,
        };
        info!(backend = ?config.backend, "initialized object storage");
        Ok(Self::new(store))
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn get(&self, key: &str) -> Result<Bytes> {
        let path = Path::parse(key)?;
        match self.inner.get(&path).await {
            Ok(result) => Ok(result.bytes().await?),
            Err(object_store::Error::NotFound { .. }) => Err(PatchguardError::NotFound {
                key: key.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Write `data` at `key`. A single put is atomic on every backend: readers
    /// see either the previous object or the new one.
    #[instrument(skip(self, data), fields(bytes = data.len()), level = "debug")]
    pub async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        let path = Path::parse(key)?;
        self.inner.put(&path, PutPayload::from(data)).await?;
        Ok(())
    }

    pub async fn head(&self, key: &str) -> Result<ObjectMeta> {
        let path = Path::parse(key)?;
        match self.inner.head(&path).await {
            Ok(meta) => Ok(meta),
            Err(object_store::Error::NotFound { .. }) => Err(PatchguardError::NotFound {
                key: key.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        match self.head(key).await {
            Ok(_) => Ok(true),
            Err(PatchguardError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        let path = Path::parse(key)?;
        match self.inner.delete(&path).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// All object keys under `prefix`, recursively.
    pub async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let path = Path::parse(prefix)?;
        let metas: Vec<ObjectMeta> = self.inner.list(Some(&path)).try_collect().await?;
        let mut keys: Vec<String> = metas.into_iter().map(|m| m.location.to_string()).collect();
        keys.sort();
        Ok(keys)
    }

    /// Immediate child "directories" of `prefix` (or of the root when empty).
    pub async fn list_children(&self, prefix: &str) -> Result<Vec<String>> {
        let path = if prefix.is_empty() {
            None
        } else {
            Some(Path::parse(prefix)?)
        };
        let listing = self.inner.list_with_delimiter(path.as_ref()).await?;
        let mut children: Vec<String> = listing
            .common_prefixes
            .into_iter()
            .filter_map(|p| p.filename().map(str::to_string))
            .collect();
        children.sort();
        Ok(children)
    }

    /// Delete every object under `prefix`. Returns the number removed.
    pub async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let keys = self.list_prefix(prefix).await?;
        for key in &keys {
            self.delete(key).await?;
        }
        debug!(prefix, removed = keys.len(), "deleted prefix");
        Ok(keys.len())
    }
}

fn bucket(config: &StorageConfig) -> Result<&str> {
    config.bucket.as_deref().ok_or_else(|| {
        PatchguardError::Config(format!(
            "storage.bucket is required for the {:?} backend",
            config.backend
        ))
    })
}
