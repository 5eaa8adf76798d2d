//! Memory bank construction: reference pool accumulation, coreset sampling
//! and index building.

pub mod bank;
pub mod builder;
pub mod coreset;
pub mod pool;

pub use bank::MemoryBank;
pub use builder::{build_memory_bank, BuiltBank, CancelSignal};
pub use coreset::{coreset_size, select_coreset, CoresetSampler};
pub use pool::ReferencePool;
