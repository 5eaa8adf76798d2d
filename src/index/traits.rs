//! Core trait definition for nearest-neighbor index implementations.
//!
//! The scorer only needs "distance to the closest memory-bank member" for a
//! batch of descriptors; any exact or approximate structure that answers that
//! can sit behind `NearestNeighborIndex`.

use ndarray::{Array2, ArrayView2};

use crate::error::{PatchguardError, Result};

/// Result of a batched k-nearest-neighbor search.
///
/// Both matrices have one row per query and `k` columns, nearest first.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbors {
    /// Squared Euclidean distances.
    pub distances: Array2<f32>,
    /// Row positions of the neighbors inside the index.
    pub labels: Array2<usize>,
}

/// Trait that all patchguard index implementations must satisfy.
pub trait NearestNeighborIndex: Send + Sync {
    /// Append vectors (one per row) to the index.
    ///
    /// # Errors
    /// Returns `PatchguardError::DimensionMismatch` if the column count does
    /// not match the index dimensionality.
    fn add(&mut self, vectors: ArrayView2<'_, f32>) -> Result<()>;

    /// Search the `k` nearest members for every query row.
    ///
    /// `k` is clamped to the number of indexed vectors.
    ///
    /// # Errors
    /// Returns `PatchguardError::DimensionMismatch` for queries of the wrong
    /// width and `PatchguardError::Index` when the index is empty or `k == 0`.
    fn search(&self, queries: ArrayView2<'_, f32>, k: usize) -> Result<Neighbors>;

    /// Squared distance from every query to its single nearest member.
    fn nearest_distances(&self, queries: ArrayView2<'_, f32>) -> Result<Vec<f32>> {
        let neighbors = self.search(queries, 1)?;
        Ok(neighbors.distances.column(0).to_vec())
    }

    /// Return the number of indexed vectors.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the dimensionality of indexed vectors.
    fn dimension(&self) -> usize;
}

/// Shared argument checks for `search` implementations.
pub(crate) fn check_search_args(
    index: &dyn NearestNeighborIndex,
    queries: &ArrayView2<'_, f32>,
    k: usize,
) -> Result<usize> {
    if queries.ncols() != index.dimension() {
        return Err(PatchguardError::DimensionMismatch {
            expected: index.dimension(),
            actual: queries.ncols(),
        });
    }
    if index.is_empty() {
        return Err(PatchguardError::Index("search on an empty index".into()));
    }
    if k == 0 {
        return Err(PatchguardError::Index("k must be > 0".into()));
    }
    Ok(k.min(index.len()))
}
