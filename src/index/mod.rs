//! Index module for patchguard.
//!
//! Provides the `NearestNeighborIndex` trait, the squared-L2 distance and the
//! exact flat index used over memory banks.

pub mod distance;
pub mod flat;
pub mod traits;

pub use flat::FlatL2Index;
pub use traits::{NearestNeighborIndex, Neighbors};
