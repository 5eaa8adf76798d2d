use image::RgbImage;
use ndarray::{Array2, Array3};
use tracing::trace;

use crate::config::BackboneConfig;
use crate::error::{PatchguardError, Result};
use crate::types::{GridShape, PatchDescriptors};

use super::backbone::ConvBackbone;
use super::preprocess::Preprocessor;
use super::traits::FeatureExtractor;

/// Extractor built on the frozen `ConvBackbone`: the coarse tap is upsampled
/// onto the fine grid and both are concatenated per cell.
#[derive(Debug, Clone)]
pub struct BackboneExtractor {
    preprocessor: Preprocessor,
    backbone: ConvBackbone,
}

impl BackboneExtractor {
    pub fn new(preprocessor: Preprocessor, backbone: ConvBackbone) -> Self {
        Self {
            preprocessor,
            backbone,
        }
    }

    pub fn from_config(config: &BackboneConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(
            Preprocessor::from_config(config),
            ConvBackbone::from_config(config)?,
        ))
    }

    pub fn backbone(&self) -> &ConvBackbone {
        &self.backbone
    }
}

impl FeatureExtractor for BackboneExtractor {
    fn extract(&self, image: &RgbImage) -> Result<PatchDescriptors> {
        let input = self.preprocessor.to_tensor(image)?;
        let acts = self.backbone.forward(&input)?;

        let (_, height, width) = acts.fine.dim();
        let coarse = resize_bilinear(&acts.coarse, height, width);
        let descriptors = concat_channels(&acts.fine, &coarse)?;

        trace!(
            grid_height = height,
            grid_width = width,
            dim = descriptors.ncols(),
            "extracted patch descriptors"
        );
        PatchDescriptors::new(descriptors, GridShape::new(height, width))
    }

    fn descriptor_dim(&self) -> usize {
        self.backbone.descriptor_dim()
    }

    fn input_size(&self) -> u32 {
        self.preprocessor.size()
    }

    fn fingerprint(&self) -> u64 {
        self.backbone.fingerprint()
    }
}

/// Bilinear resize of a CHW map using half-pixel centres (no corner alignment).
pub fn resize_bilinear(input: &Array3<f32>, out_h: usize, out_w: usize) -> Array3<f32> {
    let (channels, in_h, in_w) = input.dim();
    if in_h == out_h && in_w == out_w {
        return input.clone();
    }

    let rows: Vec<(usize, usize, f32)> = (0..out_h).map(|o| source_span(o, in_h, out_h)).collect();
    let cols: Vec<(usize, usize, f32)> = (0..out_w).map(|o| source_span(o, in_w, out_w)).collect();

    let mut output = Array3::<f32>::zeros((channels, out_h, out_w));
    for c in 0..channels {
        for (oy, &(y0, y1, ly)) in rows.iter().enumerate() {
            for (ox, &(x0, x1, lx)) in cols.iter().enumerate() {
                let top = input[[c, y0, x0]] * (1.0 - lx) + input[[c, y0, x1]] * lx;
                let bottom = input[[c, y1, x0]] * (1.0 - lx) + input[[c, y1, x1]] * lx;
                output[[c, oy, ox]] = top * (1.0 - ly) + bottom * ly;
            }
        }
    }
    output
}

/// Neighbouring source indices and interpolation weight for one output index.
fn source_span(out_index: usize, in_len: usize, out_len: usize) -> (usize, usize, f32) {
    let scale = in_len as f32 / out_len as f32;
    let src = ((out_index as f32 + 0.5) * scale - 0.5).max(0.0);
    let lo = (src.floor() as usize).min(in_len - 1);
    let hi = (lo + 1).min(in_len - 1);
    (lo, hi, src - lo as f32)
}

/// Flatten two CHW maps of equal extent into `(H*W) x (C1 + C2)` rows, row-major.
fn concat_channels(fine: &Array3<f32>, coarse: &Array3<f32>) -> Result<Array2<f32>> {
    let (fine_c, height, width) = fine.dim();
    let (coarse_c, coarse_h, coarse_w) = coarse.dim();
    if (coarse_h, coarse_w) != (height, width) {
        return Err(PatchguardError::ExtractionFailure(format!(
            "coarse map {coarse_h}x{coarse_w} not aligned to fine map {height}x{width}"
        )));
    }

    let dim = fine_c + coarse_c;
    let mut rows = Vec::with_capacity(height * width * dim);
    for y in 0..height {
        for x in 0..width {
            rows.extend((0..fine_c).map(|c| fine[[c, y, x]]));
            rows.extend((0..coarse_c).map(|c| coarse[[c, y, x]]));
        }
    }
    Array2::from_shape_vec((height * width, dim), rows)
        .map_err(|e| PatchguardError::ExtractionFailure(e.to_string()))
}
