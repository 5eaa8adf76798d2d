use ndarray::ArrayView2;

use crate::error::{PatchguardError, Result};
use crate::types::{GridShape, PatchDescriptors};

/// Descriptors from every reference image of one object, appended image by
/// image. Only one image's activations are alive at a time while filling it.
#[derive(Debug, Clone, Default)]
pub struct ReferencePool {
    dim: usize,
    data: Vec<f32>,
    grids: Vec<GridShape>,
}

impl ReferencePool {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            data: Vec::new(),
            grids: Vec::new(),
        }
    }

    /// Append one image's descriptors. No deduplication.
    pub fn push(&mut self, patches: &PatchDescriptors) -> Result<()> {
        if patches.dimension() != self.dim {
            return Err(PatchguardError::DimensionMismatch {
                expected: self.dim,
                actual: patches.dimension(),
            });
        }
        self.data.reserve(patches.descriptors.len());
        for row in patches.descriptors.rows() {
            self.data.extend(row.iter().copied());
        }
        self.grids.push(patches.grid);
        Ok(())
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of descriptors in the pool.
    pub fn len(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.data.len() / self.dim
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Grid shape of every contributing image, in insertion order.
    pub fn grids(&self) -> &[GridShape] {
        &self.grids
    }

    pub fn view(&self) -> Result<ArrayView2<'_, f32>> {
        ArrayView2::from_shape((self.len(), self.dim), &self.data)
            .map_err(|e| PatchguardError::Internal(format!("reference pool shape: {e}")))
    }
}
