//! Layered service configuration: defaults, then a TOML file, then
//! `PATCHGUARD_*` environment overrides.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PatchguardError, Result};
use crate::types::{CoresetStrategy, ProfileConfig, DEFAULT_CORESET_RATIO, DEFAULT_TOP_K};

/// ImageNet channel means the backbone expects.
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet channel standard deviations the backbone expects.
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

const DEFAULT_CONFIG_FILE: &str = "patchguard.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    pub backbone: BackboneConfig,
    pub training: TrainingConfig,
    pub heatmap: HeatmapConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound on a single request body (multipart uploads included).
    pub max_upload_bytes: usize,
    pub request_timeout_secs: u64,
    /// Maximum number of images in one batch inspection.
    pub max_batch_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_upload_bytes: 64 * 1024 * 1024,
            request_timeout_secs: 300,
            max_batch_size: 256,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Local,
    Memory,
    S3,
    Gcs,
    Azure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Root directory for the local backend.
    pub root: PathBuf,
    /// Bucket (or container) for cloud backends.
    pub bucket: Option<String>,
    pub region: Option<String>,
    /// Custom endpoint, e.g. MinIO.
    pub endpoint: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            root: PathBuf::from("storage/objects"),
            bucket: None,
            region: None,
            endpoint: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `text` or `json`.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// Geometry and weights of the frozen convolutional backbone.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackboneConfig {
    /// Square input resolution images are resized to.
    pub image_size: u32,
    /// Output channels of each stride-2 stage, stem first.
    pub stage_channels: Vec<usize>,
    /// Stage whose activations form the fine half of each descriptor.
    pub fine_stage: usize,
    /// Stage whose activations are upsampled into the coarse half.
    pub coarse_stage: usize,
    /// Seed for deterministic weight initialization when no weights file is given.
    pub seed: u64,
    /// Optional bincode-encoded pretrained weights.
    pub weights_path: Option<PathBuf>,
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Default for BackboneConfig {
    fn default() -> Self {
        Self {
            image_size: 224,
            stage_channels: vec![64, 64, 128, 256],
            fine_stage: 2,
            coarse_stage: 3,
            seed: 0x5eed_cafe,
            weights_path: None,
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
        }
    }
}

impl BackboneConfig {
    /// Small backbone for tests and benches: 64px input, 8x8 grid, 48-dim descriptors.
    pub fn tiny() -> Self {
        Self {
            image_size: 64,
            stage_channels: vec![8, 16, 16, 32],
            fine_stage: 2,
            coarse_stage: 3,
            ..Self::default()
        }
    }

    /// Descriptor dimensionality produced by this geometry.
    pub fn descriptor_dim(&self) -> usize {
        self.stage_channels[self.fine_stage] + self.stage_channels[self.coarse_stage]
    }

    pub fn validate(&self) -> Result<()> {
        if self.image_size < 8 {
            return Err(PatchguardError::Config(format!(
                "backbone.image_size must be >= 8, got {}",
                self.image_size
            )));
        }
        if self.stage_channels.iter().any(|&c| c == 0) {
            return Err(PatchguardError::Config(
                "backbone.stage_channels must all be > 0".into(),
            ));
        }
        if self.fine_stage >= self.coarse_stage || self.coarse_stage >= self.stage_channels.len() {
            return Err(PatchguardError::Config(format!(
                "backbone stages must satisfy fine_stage < coarse_stage < {}, got {} and {}",
                self.stage_channels.len(),
                self.fine_stage,
                self.coarse_stage
            )));
        }
        if self.std.iter().any(|&s| s <= 0.0) {
            return Err(PatchguardError::Config(
                "backbone.std must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub top_k: usize,
    pub coreset_ratio: f32,
    pub coreset_strategy: CoresetStrategy,
    /// Fixed sampling seed; unset means system randomness.
    pub seed: Option<u64>,
    /// Published profile versions kept per object, current included.
    pub retain_versions: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            coreset_ratio: DEFAULT_CORESET_RATIO,
            coreset_strategy: CoresetStrategy::Random,
            seed: None,
            retain_versions: 2,
        }
    }
}

impl TrainingConfig {
    /// Profile parameters used when a training request does not override them.
    pub fn profile_config(&self) -> ProfileConfig {
        ProfileConfig {
            top_k: self.top_k,
            coreset_ratio: self.coreset_ratio,
            coreset_strategy: self.coreset_strategy,
            seed: self.seed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeatmapConfig {
    /// Weight of the original image in the overlay; the colormap gets the rest.
    pub image_weight: f32,
}

impl Default for HeatmapConfig {
    fn default() -> Self {
        Self { image_weight: 0.6 }
    }
}

impl Config {
    /// Load configuration from `path`, `$PATCHGUARD_CONFIG` or `./patchguard.toml`,
    /// falling back to defaults when no file exists, then apply env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("PATCHGUARD_CONFIG").map(PathBuf::from));

        let mut config = match explicit {
            Some(p) => Self::from_file(&p)?,
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::from_file(default_path)?
                } else {
                    Self::default()
                }
            }
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PatchguardError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| PatchguardError::Config(e.to_string()))
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(v) = env_var("PATCHGUARD_HOST") {
            self.server.host = v;
        }
        if let Some(v) = env_var("PATCHGUARD_PORT") {
            self.server.port = parse_env("PATCHGUARD_PORT", &v)?;
        }
        if let Some(v) = env_var("PATCHGUARD_STORAGE_BACKEND") {
            self.storage.backend = match v.to_ascii_lowercase().as_str() {
                "local" => StorageBackend::Local,
                "memory" => StorageBackend::Memory,
                "s3" => StorageBackend::S3,
                "gcs" => StorageBackend::Gcs,
                "azure" => StorageBackend::Azure,
                other => {
                    return Err(PatchguardError::Config(format!(
                        "unknown storage backend: {other}"
                    )))
                }
            };
        }
        if let Some(v) = env_var("PATCHGUARD_STORAGE_ROOT") {
            self.storage.root = PathBuf::from(v);
        }
        if let Some(v) = env_var("PATCHGUARD_BUCKET") {
            self.storage.bucket = Some(v);
        }
        if let Some(v) = env_var("PATCHGUARD_REGION") {
            self.storage.region = Some(v);
        }
        if let Some(v) = env_var("PATCHGUARD_ENDPOINT") {
            self.storage.endpoint = Some(v);
        }
        if let Some(v) = env_var("PATCHGUARD_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = env_var("PATCHGUARD_LOG_FORMAT") {
            self.logging.format = v;
        }
        if let Some(v) = env_var("PATCHGUARD_BACKBONE_WEIGHTS") {
            self.backbone.weights_path = Some(PathBuf::from(v));
        }
        if let Some(v) = env_var("PATCHGUARD_IMAGE_SIZE") {
            self.backbone.image_size = parse_env("PATCHGUARD_IMAGE_SIZE", &v)?;
        }
        if let Some(v) = env_var("PATCHGUARD_TOP_K") {
            self.training.top_k = parse_env("PATCHGUARD_TOP_K", &v)?;
        }
        if let Some(v) = env_var("PATCHGUARD_CORESET_RATIO") {
            self.training.coreset_ratio = parse_env("PATCHGUARD_CORESET_RATIO", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.backbone.validate()?;
        self.training
            .profile_config()
            .validate()
            .map_err(|e| PatchguardError::Config(format!("training defaults: {e}")))?;
        if self.training.retain_versions == 0 {
            return Err(PatchguardError::Config(
                "training.retain_versions must be >= 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.heatmap.image_weight) {
            return Err(PatchguardError::Config(format!(
                "heatmap.image_weight must be in [0, 1], got {}",
                self.heatmap.image_weight
            )));
        }
        if self.server.max_batch_size == 0 {
            return Err(PatchguardError::Config(
                "server.max_batch_size must be > 0".into(),
            ));
        }
        match self.storage.backend {
            StorageBackend::S3 | StorageBackend::Gcs | StorageBackend::Azure
                if self.storage.bucket.is_none() =>
            {
                Err(PatchguardError::Config(format!(
                    "storage.bucket is required for the {:?} backend",
                    self.storage.backend
                )))
            }
            _ => Ok(()),
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| PatchguardError::Config(format!("invalid value for {name}: {value}")))
}
