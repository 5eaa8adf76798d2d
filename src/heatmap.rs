//! Score map → colored PNG overlay.

use std::io::Cursor;

use bytes::Bytes;
use image::imageops::FilterType;
use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
use ndarray::{Array2, Axis};
use tracing::debug;

use crate::config::HeatmapConfig;
use crate::error::{PatchguardError, Result};
use crate::features::resize_bilinear;

const NORMALIZE_EPSILON: f32 = 1e-8;

/// Renders score maps as JET-colored overlays on the inspected image.
#[derive(Debug, Clone)]
pub struct HeatmapRenderer {
    /// Display resolution (square), matching the extractor input.
    size: u32,
    /// Weight of the original image in the blend.
    image_weight: f32,
}

impl HeatmapRenderer {
    pub fn new(size: u32, image_weight: f32) -> Self {
        Self {
            size,
            image_weight: image_weight.clamp(0.0, 1.0),
        }
    }

    pub fn from_config(config: &HeatmapConfig, size: u32) -> Self {
        Self::new(size, config.image_weight)
    }

    /// Composite the overlay and encode it as PNG.
    pub fn render(&self, image: &RgbImage, score_map: &Array2<f32>) -> Result<Bytes> {
        let overlay = self.overlay(image, score_map)?;
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(overlay)
            .write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)
            .map_err(|e| PatchguardError::Internal(format!("png encode failed: {e}")))?;
        debug!(bytes = buf.len(), size = self.size, "rendered heatmap");
        Ok(Bytes::from(buf))
    }

    /// Blend the colored, resized score map over the resized image.
    pub fn overlay(&self, image: &RgbImage, score_map: &Array2<f32>) -> Result<RgbImage> {
        if score_map.is_empty() {
            return Err(PatchguardError::Validation("score map is empty".into()));
        }
        if image.width() == 0 || image.height() == 0 {
            return Err(PatchguardError::DecodeFailure(
                "cannot render over an empty image".into(),
            ));
        }

        let side = self.size as usize;
        let base = image::imageops::resize(image, self.size, self.size, FilterType::Triangle);
        let normalized = normalize_score_map(score_map);
        let heat = resize_bilinear(&normalized.insert_axis(Axis(0)), side, side)
            .index_axis_move(Axis(0), 0);

        let heat_weight = 1.0 - self.image_weight;
        let overlay = RgbImage::from_fn(self.size, self.size, |x, y| {
            let src = base.get_pixel(x, y);
            let color = jet(heat[[y as usize, x as usize]]);
            let mut out = [0u8; 3];
            for c in 0..3 {
                let v = self.image_weight * f32::from(src[c]) + heat_weight * f32::from(color[c]);
                out[c] = v.round().clamp(0.0, 255.0) as u8;
            }
            Rgb(out)
        });
        Ok(overlay)
    }
}

/// Min-max normalize to [0, 1]. Constant maps (and any non-finite result)
/// come out as zeros.
pub fn normalize_score_map(score_map: &Array2<f32>) -> Array2<f32> {
    let (min, max) = score_map
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let range = max - min;
    score_map.mapv(|v| {
        let n = (v - min) / (range + NORMALIZE_EPSILON);
        if n.is_finite() {
            n.clamp(0.0, 1.0)
        } else {
            0.0
        }
    })
}

/// JET colormap: 0 → dark blue, 0.5 → green, 1 → dark red.
pub fn jet(t: f32) -> [u8; 3] {
    let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
    let channel = |center: f32| {
        let v = (1.5 - (4.0 * t - center).abs()).clamp(0.0, 1.0);
        (v * 255.0).round() as u8
    };
    [channel(3.0), channel(2.0), channel(1.0)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jet_endpoints() {
        assert_eq!(jet(0.0), [0, 0, 128]);
        assert_eq!(jet(1.0), [128, 0, 0]);
        assert_eq!(jet(0.5), [128, 255, 128]);
    }

    #[test]
    fn constant_map_normalizes_to_zero() {
        let map = Array2::from_elem((4, 4), 7.25f32);
        let normalized = normalize_score_map(&map);
        assert!(normalized.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn normalized_range_is_unit() {
        let map = Array2::from_shape_vec((1, 3), vec![2.0, 4.0, 6.0]).unwrap();
        let normalized = normalize_score_map(&map);
        assert_eq!(normalized[[0, 0]], 0.0);
        assert!((normalized[[0, 1]] - 0.5).abs() < 1e-6);
        assert!((normalized[[0, 2]] - 1.0).abs() < 1e-6);
    }
}
