//! Anomaly scoring and threshold calibration.

pub mod calibrate;
pub mod scorer;

pub use calibrate::{calibrate, calibrate_threshold, percentile, CALIBRATION_PERCENTILE};
pub use scorer::{score_descriptors, score_image, top_k_mean};
