use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{PatchguardError, Result};
use crate::index::FlatL2Index;

/// The long-lived model of normal appearance for one object: a bounded
/// subset of reference descriptors, one per row. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryBank {
    vectors: Array2<f32>,
}

impl MemoryBank {
    /// Take the rows at `indices` out of the pool.
    pub fn from_pool(pool: ArrayView2<'_, f32>, indices: &[usize]) -> Result<Self> {
        if indices.is_empty() {
            return Err(PatchguardError::InsufficientData {
                reason: "memory bank would be empty".into(),
            });
        }
        if let Some(&bad) = indices.iter().find(|&&i| i >= pool.nrows()) {
            return Err(PatchguardError::Internal(format!(
                "coreset index {bad} out of range for pool of {}",
                pool.nrows()
            )));
        }
        Ok(Self {
            vectors: pool.select(Axis(0), indices),
        })
    }

    pub fn from_vectors(vectors: Array2<f32>) -> Result<Self> {
        if vectors.nrows() == 0 || vectors.ncols() == 0 {
            return Err(PatchguardError::InsufficientData {
                reason: "memory bank would be empty".into(),
            });
        }
        Ok(Self { vectors })
    }

    pub fn len(&self) -> usize {
        self.vectors.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.nrows() == 0
    }

    pub fn dim(&self) -> usize {
        self.vectors.ncols()
    }

    pub fn vectors(&self) -> ArrayView2<'_, f32> {
        self.vectors.view()
    }

    /// Build the nearest-neighbor index over exactly these vectors.
    pub fn build_index(&self) -> Result<FlatL2Index> {
        FlatL2Index::build(self.vectors.view())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let bank: Self = bincode::deserialize(data)?;
        Self::from_vectors(bank.vectors)
    }
}
