//! Patchguard: patch-level visual anomaly detection against per-object
//! memory banks of normal appearance.

pub mod config;
pub mod engine;
pub mod error;
pub mod features;
pub mod heatmap;
pub mod index;
pub mod memory;
pub mod metrics;
pub mod profile;
pub mod scoring;
pub mod server;
pub mod storage;
pub mod types;
