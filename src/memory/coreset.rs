//! Coreset selection: shrink the reference pool to a bounded memory bank.

use ndarray::ArrayView2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::error::{PatchguardError, Result};
use crate::index::distance::squared_euclidean;
use crate::types::CoresetStrategy;

/// Randomness source for coreset selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoresetSampler {
    /// Reproducible selection.
    Seeded(u64),
    /// Fresh OS entropy on every build.
    SystemRandom,
}

impl CoresetSampler {
    pub fn from_seed(seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => CoresetSampler::Seeded(seed),
            None => CoresetSampler::SystemRandom,
        }
    }

    fn rng(&self) -> StdRng {
        match self {
            CoresetSampler::Seeded(seed) => StdRng::seed_from_u64(*seed),
            CoresetSampler::SystemRandom => StdRng::from_entropy(),
        }
    }
}

/// Memory bank size for a pool of `pool_len` descriptors: `floor(ratio * len)`,
/// never below one and never above the pool.
pub fn coreset_size(pool_len: usize, ratio: f32) -> usize {
    let n = (f64::from(ratio) * pool_len as f64).floor() as usize;
    n.clamp(1, pool_len.max(1))
}

/// Pick the pool rows that make up the memory bank, sorted ascending.
pub fn select_coreset(
    pool: ArrayView2<'_, f32>,
    ratio: f32,
    strategy: CoresetStrategy,
    sampler: CoresetSampler,
) -> Result<Vec<usize>> {
    let total = pool.nrows();
    if total == 0 {
        return Err(PatchguardError::InsufficientData {
            reason: "reference pool is empty".into(),
        });
    }

    let n = coreset_size(total, ratio);
    let mut rng = sampler.rng();
    let mut selected = match strategy {
        CoresetStrategy::Random => rand::seq::index::sample(&mut rng, total, n).into_vec(),
        CoresetStrategy::Greedy => greedy_k_center(pool, n, &mut rng),
    };
    selected.sort_unstable();

    debug!(pool = total, selected = n, ?strategy, "selected coreset");
    Ok(selected)
}

/// Farthest-point selection: start from a random row, then repeatedly take
/// the row farthest from everything chosen so far.
fn greedy_k_center(pool: ArrayView2<'_, f32>, n: usize, rng: &mut StdRng) -> Vec<usize> {
    let total = pool.nrows();
    let rows: Vec<Vec<f32>> = pool.rows().into_iter().map(|r| r.to_vec()).collect();

    let first = rng.gen_range(0..total);
    let mut selected = Vec::with_capacity(n);
    selected.push(first);
    let mut min_dist: Vec<f32> = rows
        .iter()
        .map(|r| squared_euclidean(r, &rows[first]))
        .collect();
    min_dist[first] = f32::NEG_INFINITY;

    while selected.len() < n {
        let (next, _) = min_dist
            .iter()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |best, (i, &d)| {
                if d > best.1 {
                    (i, d)
                } else {
                    best
                }
            });
        selected.push(next);
        min_dist[next] = f32::NEG_INFINITY;
        for (i, row) in rows.iter().enumerate() {
            if min_dist[i] == f32::NEG_INFINITY {
                continue;
            }
            let d = squared_euclidean(row, &rows[next]);
            if d < min_dist[i] {
                min_dist[i] = d;
            }
        }
    }
    selected
}
