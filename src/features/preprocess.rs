//! Image decoding and backbone input normalization.

use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array3;
use tracing::debug;

use crate::config::BackboneConfig;
use crate::error::{PatchguardError, Result};

/// Decode an uploaded image payload into an RGB raster.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage> {
    if bytes.is_empty() {
        return Err(PatchguardError::DecodeFailure("empty image payload".into()));
    }
    let image = image::load_from_memory(bytes)?;
    debug!(
        width = image.width(),
        height = image.height(),
        "decoded image"
    );
    Ok(image.to_rgb8())
}

/// Resizes to the backbone's square input and applies per-channel normalization.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    size: u32,
    mean: [f32; 3],
    std: [f32; 3],
}

impl Preprocessor {
    pub fn new(size: u32, mean: [f32; 3], std: [f32; 3]) -> Self {
        Self { size, mean, std }
    }

    pub fn from_config(config: &BackboneConfig) -> Self {
        Self::new(config.image_size, config.mean, config.std)
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Bilinear resize to `size x size`, ignoring aspect ratio.
    pub fn resize(&self, image: &RgbImage) -> Result<RgbImage> {
        if image.width() == 0 || image.height() == 0 {
            return Err(PatchguardError::DecodeFailure(format!(
                "image has zero extent: {}x{}",
                image.width(),
                image.height()
            )));
        }
        if image.width() == self.size && image.height() == self.size {
            return Ok(image.clone());
        }
        Ok(image::imageops::resize(
            image,
            self.size,
            self.size,
            FilterType::Triangle,
        ))
    }

    /// Resize and convert to a normalized CHW tensor.
    pub fn to_tensor(&self, image: &RgbImage) -> Result<Array3<f32>> {
        let resized = self.resize(image)?;
        let side = self.size as usize;
        let mut tensor = Array3::<f32>::zeros((3, side, side));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                let value = f32::from(pixel[c]) / 255.0;
                tensor[[c, y as usize, x as usize]] = (value - self.mean[c]) / self.std[c];
            }
        }
        Ok(tensor)
    }
}
