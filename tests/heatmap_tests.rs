mod common;

use common::assertions::assert_error_kind;
use common::images::{striped_texture, uniform};

use ndarray::Array2;

use patchguard::features::decode_image;
use patchguard::heatmap::{jet, normalize_score_map, HeatmapRenderer};

#[test]
fn test_constant_map_renders_without_nan() {
    let renderer = HeatmapRenderer::new(64, 0.6);
    let map = Array2::from_elem((8, 8), 0.37f32);

    let normalized = normalize_score_map(&map);
    assert!(normalized.iter().all(|&v| v == 0.0));

    let png = renderer.render(&striped_texture(1), &map).unwrap();
    let decoded = decode_image(&png).unwrap();
    assert_eq!(decoded.dimensions(), (64, 64));
}

#[test]
fn test_non_finite_scores_do_not_poison_the_map() {
    let mut map = Array2::from_elem((2, 2), 1.0f32);
    map[[0, 0]] = f32::NAN;
    let normalized = normalize_score_map(&map);
    assert!(normalized.iter().all(|v| v.is_finite()));
}

#[test]
fn test_overlay_peak_is_red_where_the_score_is_high() {
    let renderer = HeatmapRenderer::new(64, 0.0);
    let mut map = Array2::zeros((8, 8));
    map[[1, 6]] = 10.0;

    let overlay = renderer.overlay(&uniform(64, 64, 0), &map).unwrap();
    // Centre of grid cell (1, 6): x = 6 * 8 + 4, y = 1 * 8 + 4.
    let hot = overlay.get_pixel(52, 12);
    let cold = overlay.get_pixel(4, 60);
    assert!(hot[0] > hot[2], "peak should lean red, got {hot:?}");
    assert_eq!(cold.0, jet(0.0));
}

#[test]
fn test_overlay_output_matches_display_size() {
    let renderer = HeatmapRenderer::new(96, 0.5);
    let overlay = renderer
        .overlay(&uniform(30, 50, 200), &Array2::from_elem((4, 4), 1.0))
        .unwrap();
    assert_eq!(overlay.dimensions(), (96, 96));
}

#[test]
fn test_empty_inputs_are_rejected() {
    let renderer = HeatmapRenderer::new(64, 0.5);
    assert_error_kind(
        renderer.render(&striped_texture(1), &Array2::zeros((0, 0))),
        "validation",
    );
}

#[test]
fn test_jet_runs_blue_to_red() {
    let low = jet(0.0);
    let high = jet(1.0);
    assert!(low[2] > low[0]);
    assert!(high[0] > high[2]);
}
