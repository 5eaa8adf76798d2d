use thiserror::Error;

#[derive(Error, Debug)]
pub enum PatchguardError {
    // Training errors
    #[error("insufficient data: {reason}")]
    InsufficientData { reason: String },

    #[error("training already in progress for object: {object_id}")]
    TrainingInProgress { object_id: String },

    #[error("training cancelled for object: {object_id}")]
    TrainingCancelled { object_id: String },

    // Profile errors
    #[error("profile not found for object: {object_id}")]
    ProfileNotFound { object_id: String },

    #[error("profile corrupt for object {object_id}: {reason}")]
    ProfileCorrupt { object_id: String, reason: String },

    // Image errors
    #[error("image decode failure: {0}")]
    DecodeFailure(String),

    #[error("feature extraction failure: {0}")]
    ExtractionFailure(String),

    // Index errors
    #[error("index error: {0}")]
    Index(String),

    // Validation errors
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("validation error: {0}")]
    Validation(String),

    // Storage errors
    #[error("object not found: {key}")]
    NotFound { key: String },

    #[error("storage error: {0}")]
    Storage(#[from] object_store::Error),

    #[error("storage path error: {0}")]
    StoragePath(#[from] object_store::path::Error),

    // Serialization errors
    #[error("json serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("bincode serialization error: {0}")]
    Bincode(String),

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: u64, actual: u64 },

    // Config errors
    #[error("config error: {0}")]
    Config(String),

    // IO errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    // Internal
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<Box<bincode::ErrorKind>> for PatchguardError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        PatchguardError::Bincode(e.to_string())
    }
}

impl From<image::ImageError> for PatchguardError {
    fn from(e: image::ImageError) -> Self {
        PatchguardError::DecodeFailure(e.to_string())
    }
}

impl From<tokio::task::JoinError> for PatchguardError {
    fn from(e: tokio::task::JoinError) -> Self {
        PatchguardError::Internal(format!("worker task failed: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, PatchguardError>;

impl PatchguardError {
    /// Stable machine-readable tag for the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            PatchguardError::InsufficientData { .. } => "insufficient_data",
            PatchguardError::TrainingInProgress { .. } => "training_in_progress",
            PatchguardError::TrainingCancelled { .. } => "training_cancelled",
            PatchguardError::ProfileNotFound { .. } => "profile_not_found",
            PatchguardError::ProfileCorrupt { .. } => "profile_corrupt",
            PatchguardError::DecodeFailure(_) => "decode_failure",
            PatchguardError::ExtractionFailure(_) => "extraction_failure",
            PatchguardError::InvalidConfiguration(_) => "invalid_configuration",
            PatchguardError::Index(_) => "index",
            PatchguardError::DimensionMismatch { .. } => "dimension_mismatch",
            PatchguardError::Validation(_) => "validation",
            PatchguardError::NotFound { .. } => "not_found",
            PatchguardError::Storage(_) | PatchguardError::StoragePath(_) => "storage",
            PatchguardError::Json(_) | PatchguardError::Bincode(_) => "serialization",
            PatchguardError::ChecksumMismatch { .. } => "checksum_mismatch",
            PatchguardError::Config(_) => "config",
            PatchguardError::Io(_) => "io",
            PatchguardError::Internal(_) => "internal",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            PatchguardError::NotFound { .. } | PatchguardError::ProfileNotFound { .. } => 404,

            PatchguardError::TrainingInProgress { .. } => 409,

            PatchguardError::InsufficientData { .. }
            | PatchguardError::InvalidConfiguration(_)
            | PatchguardError::DimensionMismatch { .. }
            | PatchguardError::Validation(_) => 400,

            PatchguardError::DecodeFailure(_) | PatchguardError::ExtractionFailure(_) => 422,

            PatchguardError::TrainingCancelled { .. } => 499,

            _ => 500,
        }
    }
}
