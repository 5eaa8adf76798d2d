use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, HistogramVec,
    IntCounterVec, IntGauge,
};

lazy_static::lazy_static! {
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "patchguard_http_requests_total", "Total HTTP requests", &["method", "path", "status"]
    ).unwrap();
    pub static ref TRAININGS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "patchguard_trainings_total", "Training runs by outcome", &["object", "status"]
    ).unwrap();
    pub static ref TRAINING_DURATION: HistogramVec = register_histogram_vec!(
        "patchguard_training_duration_seconds", "Training duration", &["object"],
        vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0]
    ).unwrap();
    pub static ref INSPECTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "patchguard_inspections_total", "Inspected images by result", &["object", "result"]
    ).unwrap();
    pub static ref SCORE_DURATION: HistogramVec = register_histogram_vec!(
        "patchguard_score_duration_seconds", "Per-image scoring duration", &["object"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).unwrap();
    pub static ref PROFILE_CACHE_HITS: IntCounterVec = register_int_counter_vec!(
        "patchguard_profile_cache_hits_total", "Profile cache lookups", &["result"]
    ).unwrap();
    pub static ref ACTIVE_TRAININGS: IntGauge = register_int_gauge!(
        "patchguard_active_trainings", "Training runs in progress"
    ).unwrap();
}

pub fn init() {
    lazy_static::initialize(&HTTP_REQUESTS_TOTAL);
    lazy_static::initialize(&TRAININGS_TOTAL);
    lazy_static::initialize(&TRAINING_DURATION);
    lazy_static::initialize(&INSPECTIONS_TOTAL);
    lazy_static::initialize(&SCORE_DURATION);
    lazy_static::initialize(&PROFILE_CACHE_HITS);
    lazy_static::initialize(&ACTIVE_TRAININGS);
}

/// Decrements the wrapped gauge when dropped.
pub struct GaugeGuard(pub &'static IntGauge);

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.0.dec();
    }
}
