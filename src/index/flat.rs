//! Exact brute-force L2 index.
//!
//! Every query is compared against every member. Memory banks are already
//! bounded by coreset sampling, so an exhaustive scan keeps results exact and
//! reproducible bit for bit, which the save/load round trip relies on.

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PatchguardError, Result};

use super::distance::squared_euclidean;
use super::traits::{check_search_args, NearestNeighborIndex, Neighbors};

/// Flat index storing members contiguously, row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatL2Index {
    dim: usize,
    data: Vec<f32>,
}

impl FlatL2Index {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            data: Vec::new(),
        }
    }

    /// Build an index holding exactly `vectors`.
    pub fn build(vectors: ArrayView2<'_, f32>) -> Result<Self> {
        let mut index = Self::new(vectors.ncols());
        index.add(vectors)?;
        debug!(
            vectors = index.len(),
            dim = index.dim,
            "built flat L2 index"
        );
        Ok(index)
    }

    /// Member at `row`.
    pub fn vector(&self, row: usize) -> Option<&[f32]> {
        if row < self.len() {
            Some(&self.data[row * self.dim..(row + 1) * self.dim])
        } else {
            None
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let index: Self = bincode::deserialize(data)?;
        if index.dim == 0 || index.data.len() % index.dim != 0 {
            return Err(PatchguardError::Index(format!(
                "malformed flat index: {} values for dimension {}",
                index.data.len(),
                index.dim
            )));
        }
        Ok(index)
    }

    fn members(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.dim)
    }

    fn nearest_one(&self, query: &[f32]) -> (f32, usize) {
        let mut best = (f32::INFINITY, 0);
        for (id, member) in self.members().enumerate() {
            let d = squared_euclidean(query, member);
            if d < best.0 {
                best = (d, id);
            }
        }
        best
    }

    fn nearest_k(&self, query: &[f32], k: usize) -> Vec<(f32, usize)> {
        let mut scored: Vec<(f32, usize)> = self
            .members()
            .enumerate()
            .map(|(id, member)| (squared_euclidean(query, member), id))
            .collect();
        let by_distance = |a: &(f32, usize), b: &(f32, usize)| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
        };
        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, by_distance);
            scored.truncate(k);
        }
        scored.sort_by(by_distance);
        scored
    }
}

impl NearestNeighborIndex for FlatL2Index {
    fn add(&mut self, vectors: ArrayView2<'_, f32>) -> Result<()> {
        if vectors.ncols() != self.dim {
            return Err(PatchguardError::DimensionMismatch {
                expected: self.dim,
                actual: vectors.ncols(),
            });
        }
        if self.dim == 0 {
            return Err(PatchguardError::Index("dimension must be > 0".into()));
        }
        self.data.reserve(vectors.len());
        for row in vectors.rows() {
            self.data.extend(row.iter().copied());
        }
        Ok(())
    }

    fn search(&self, queries: ArrayView2<'_, f32>, k: usize) -> Result<Neighbors> {
        let k = check_search_args(self, &queries, k)?;
        let n_queries = queries.nrows();
        let mut distances = Array2::<f32>::zeros((n_queries, k));
        let mut labels = Array2::<usize>::zeros((n_queries, k));

        for (qi, query) in queries.rows().into_iter().enumerate() {
            let owned;
            let query = match query.as_slice() {
                Some(slice) => slice,
                None => {
                    owned = query.to_vec();
                    owned.as_slice()
                }
            };
            if k == 1 {
                let (d, id) = self.nearest_one(query);
                distances[[qi, 0]] = d;
                labels[[qi, 0]] = id;
            } else {
                for (rank, (d, id)) in self.nearest_k(query, k).into_iter().enumerate() {
                    distances[[qi, rank]] = d;
                    labels[[qi, rank]] = id;
                }
            }
        }

        Ok(Neighbors { distances, labels })
    }

    fn len(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.data.len() / self.dim
        }
    }

    fn dimension(&self) -> usize {
        self.dim
    }
}
