use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{PatchguardError, Result};

/// Identifier of the object class a profile models.
pub type ObjectId = String;

/// Default number of patches averaged into an image score.
pub const DEFAULT_TOP_K: usize = 10;

/// Default fraction of the reference pool kept in the memory bank.
pub const DEFAULT_CORESET_RATIO: f32 = 0.1;

/// Spatial shape of a descriptor grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridShape {
    pub height: usize,
    pub width: usize,
}

impl GridShape {
    pub fn new(height: usize, width: usize) -> Self {
        Self { height, width }
    }

    /// Number of cells in the grid.
    pub fn cells(&self) -> usize {
        self.height * self.width
    }
}

impl std::fmt::Display for GridShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.height, self.width)
    }
}

/// Patch descriptors for one image: one row per grid cell, row-major over the grid.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchDescriptors {
    pub descriptors: Array2<f32>,
    pub grid: GridShape,
}

impl PatchDescriptors {
    pub fn new(descriptors: Array2<f32>, grid: GridShape) -> Result<Self> {
        if descriptors.nrows() != grid.cells() {
            return Err(PatchguardError::ExtractionFailure(format!(
                "descriptor count {} does not match grid {grid}",
                descriptors.nrows()
            )));
        }
        Ok(Self { descriptors, grid })
    }

    pub fn dimension(&self) -> usize {
        self.descriptors.ncols()
    }

    pub fn len(&self) -> usize {
        self.descriptors.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.nrows() == 0
    }
}

/// How the reference pool is reduced to the memory bank.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoresetStrategy {
    /// Uniform sampling without replacement.
    #[default]
    Random,
    /// Greedy farthest-point (k-center) selection.
    Greedy,
}

/// Per-object parameters fixed at training time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileConfig {
    pub top_k: usize,
    pub coreset_ratio: f32,
    #[serde(default)]
    pub coreset_strategy: CoresetStrategy,
    /// Sampling seed; `None` draws from system randomness.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            coreset_ratio: DEFAULT_CORESET_RATIO,
            coreset_strategy: CoresetStrategy::Random,
            seed: None,
        }
    }
}

impl ProfileConfig {
    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(PatchguardError::InvalidConfiguration(
                "top_k must be > 0".into(),
            ));
        }
        if !(self.coreset_ratio > 0.0 && self.coreset_ratio <= 1.0) {
            return Err(PatchguardError::InvalidConfiguration(format!(
                "coreset_ratio must be in (0, 1], got {}",
                self.coreset_ratio
            )));
        }
        Ok(())
    }
}

/// Outcome of comparing an image score against a profile threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InspectionResult {
    Normal,
    Defect,
}

impl InspectionResult {
    /// Scores strictly above the threshold are defects; ties are normal.
    pub fn classify(score: f32, threshold: f32) -> Self {
        if score > threshold {
            InspectionResult::Defect
        } else {
            InspectionResult::Normal
        }
    }
}

impl std::fmt::Display for InspectionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InspectionResult::Normal => write!(f, "NORMAL"),
            InspectionResult::Defect => write!(f, "DEFECT"),
        }
    }
}

/// Scalar anomaly score plus the per-patch distance grid it was aggregated from.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageScore {
    pub score: f32,
    pub score_map: Array2<f32>,
}

impl ImageScore {
    pub fn grid(&self) -> GridShape {
        let (height, width) = self.score_map.dim();
        GridShape::new(height, width)
    }
}
