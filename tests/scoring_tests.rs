mod common;

use assert_approx_eq::assert_approx_eq;
use common::assertions::assert_error_kind;
use common::harness::{seeded_config, tiny_extractor};
use common::images::{striped_texture, training_set, with_bright_rectangle};

use ndarray::{array, Array2};

use patchguard::features::FeatureExtractor;
use patchguard::index::FlatL2Index;
use patchguard::memory::build_memory_bank;
use patchguard::scoring::{
    calibrate, calibrate_threshold, percentile, score_descriptors, score_image, top_k_mean,
};
use patchguard::types::{GridShape, InspectionResult, PatchDescriptors};

// ─── Percentile calibration ───

#[test]
fn test_percentile_of_one_to_hundred() {
    let scores: Vec<f32> = (1..=100).map(|v| v as f32).collect();
    let threshold = calibrate_threshold(&scores).unwrap();
    // position (n - 1) * 0.995 = 98.505 -> 99 + 0.505
    assert_approx_eq!(threshold, 99.505, 1e-3);
    assert!((threshold - 99.5).abs() <= 0.01);
}

#[test]
fn test_percentile_ignores_input_order() {
    let mut scores: Vec<f32> = (1..=100).map(|v| v as f32).collect();
    scores.reverse();
    assert_approx_eq!(percentile(&scores, 50.0).unwrap(), 50.5, 1e-4);
}

#[test]
fn test_percentile_rejects_bad_input() {
    assert_error_kind(percentile(&[], 99.5), "insufficient_data");
    assert_error_kind(percentile(&[1.0], 101.0), "validation");
}

// ─── Decision rule ───

#[test]
fn test_decision_rule_boundaries() {
    assert_eq!(InspectionResult::classify(5.0, 5.0), InspectionResult::Normal);
    assert_eq!(InspectionResult::classify(5.0001, 5.0), InspectionResult::Defect);
    assert_eq!(InspectionResult::classify(4.9999, 5.0), InspectionResult::Normal);
    assert_eq!(InspectionResult::Defect.to_string(), "DEFECT");
    assert_eq!(InspectionResult::Normal.to_string(), "NORMAL");
}

// ─── Image scores ───

#[test]
fn test_score_map_holds_nearest_distances_row_major() {
    let index = FlatL2Index::build(array![[0.0f32, 0.0]].view()).unwrap();
    let patches = PatchDescriptors::new(
        array![[1.0f32, 0.0], [0.0, 2.0], [0.0, 0.0], [3.0, 0.0]],
        GridShape::new(2, 2),
    )
    .unwrap();

    let scored = score_descriptors(&index, &patches, 2).unwrap();
    assert_eq!(scored.score_map, array![[1.0f32, 4.0], [0.0, 9.0]]);
    assert_eq!(scored.score, 6.5);
    assert_eq!(scored.grid(), GridShape::new(2, 2));
}

#[test]
fn test_top_k_above_grid_size_averages_everything() {
    let index = FlatL2Index::build(array![[0.0f32]].view()).unwrap();
    let patches =
        PatchDescriptors::new(array![[1.0f32], [2.0], [3.0]], GridShape::new(1, 3)).unwrap();
    let scored = score_descriptors(&index, &patches, 50).unwrap();
    assert_approx_eq!(scored.score, (1.0 + 4.0 + 9.0) / 3.0, 1e-6);
}

#[test]
fn test_zero_top_k_is_invalid() {
    let index = FlatL2Index::build(array![[0.0f32]].view()).unwrap();
    let patches = PatchDescriptors::new(Array2::zeros((1, 1)), GridShape::new(1, 1)).unwrap();
    assert_error_kind(score_descriptors(&index, &patches, 0), "invalid_configuration");
}

#[test]
fn test_top_k_mean_picks_largest() {
    assert_eq!(top_k_mean(&[0.5, 4.0, 2.0, 8.0], 2), 6.0);
}

#[test]
fn test_scoring_is_repeatable() {
    let extractor = tiny_extractor();
    let built =
        build_memory_bank("widget", &extractor, &training_set(3), &seeded_config(10, 0.1), None)
            .unwrap();
    let image = with_bright_rectangle(&striped_texture(11), 10, 10, 12, 12);

    let a = score_image(&extractor, &built.index, &image, 10).unwrap();
    let b = score_image(&extractor, &built.index, &image, 10).unwrap();
    assert_eq!(a, b);
    assert_eq!(a.grid(), GridShape::new(8, 8));
}

#[test]
fn test_memory_bank_member_image_scores_zero_with_full_bank() {
    let extractor = tiny_extractor();
    let images = training_set(1);
    let built =
        build_memory_bank("widget", &extractor, &images, &seeded_config(10, 1.0), None).unwrap();

    let scored = score_image(&extractor, &built.index, &images[0], 10).unwrap();
    assert_eq!(scored.score, 0.0);
    assert!(scored.score_map.iter().all(|&d| d == 0.0));
}

// ─── Calibration over training images ───

#[test]
fn test_identical_training_images_calibrate_to_their_score() {
    let extractor = tiny_extractor();
    let images = training_set(5);
    let built =
        build_memory_bank("widget", &extractor, &images, &seeded_config(10, 0.1), None).unwrap();

    let refs: Vec<_> = images.iter().collect();
    let (threshold, scores) = calibrate(&extractor, &built.index, &refs, 10).unwrap();
    assert_eq!(scores.len(), 5);
    assert!(scores.iter().all(|&s| s == scores[0]));
    assert_eq!(threshold, scores[0]);
    // 32 bank rows cannot cover the 64 distinct cells of the texture.
    assert!(threshold > 0.0);
    assert_eq!(extractor.descriptor_dim(), built.memory_bank.dim());
}
