pub mod handlers;
pub mod routes;

use std::sync::Arc;

use crate::config::Config;
use crate::engine::Engine;

/// Response header carrying the image-level anomaly score.
pub const SCORE_HEADER: &str = "x-anomaly-score";
/// Response header carrying `NORMAL` or `DEFECT`.
pub const RESULT_HEADER: &str = "x-result";

/// Shared application state injected into all handlers via axum's State extractor.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub config: Arc<Config>,
}
