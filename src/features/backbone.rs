//! Frozen convolutional backbone.
//!
//! A stack of 3x3 stride-2 convolutions with ReLU, tapped at two stages. With
//! the default geometry (`[64, 64, 128, 256]` at 224px) the fine tap is 28x28x128
//! and the coarse tap 14x14x256, the same shapes as ResNet-18 layer2/layer3.
//! Weights are either read from a bincode file or derived from a seed; they are
//! never updated after construction.

use std::path::Path;

use ndarray::Array3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use xxhash_rust::xxh3::xxh3_64;

use crate::config::BackboneConfig;
use crate::error::{PatchguardError, Result};

const KERNEL: usize = 3;
const KERNEL_AREA: usize = KERNEL * KERNEL;
const PADDING: usize = 1;
const STAGE_STRIDE: usize = 2;

/// Weights of one 3x3 convolution followed by ReLU.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvLayer {
    pub in_channels: usize,
    pub out_channels: usize,
    pub stride: usize,
    /// Layout `[out][in][ky][kx]`.
    pub kernel: Vec<f32>,
    pub bias: Vec<f32>,
}

impl ConvLayer {
    fn validate(&self, position: usize) -> Result<()> {
        let expected = self.out_channels * self.in_channels * KERNEL_AREA;
        if self.kernel.len() != expected || self.bias.len() != self.out_channels {
            return Err(PatchguardError::Config(format!(
                "backbone layer {position}: expected {expected} kernel weights and {} biases, \
                 got {} and {}",
                self.out_channels,
                self.kernel.len(),
                self.bias.len()
            )));
        }
        if self.stride == 0 {
            return Err(PatchguardError::Config(format!(
                "backbone layer {position}: stride must be > 0"
            )));
        }
        Ok(())
    }

    fn output_extent(&self, input: usize) -> usize {
        (input + 2 * PADDING - KERNEL) / self.stride + 1
    }
}

/// Serializable backbone weights plus the two tap positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackboneWeights {
    pub layers: Vec<ConvLayer>,
    pub fine_stage: usize,
    pub coarse_stage: usize,
}

impl BackboneWeights {
    /// Deterministic Kaiming-uniform initialization from `config.seed`.
    pub fn seeded(config: &BackboneConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut in_channels = 3;
        let layers = config
            .stage_channels
            .iter()
            .map(|&out_channels| {
                let fan_in = (in_channels * KERNEL_AREA) as f32;
                let bound = (6.0 / fan_in).sqrt();
                let kernel = (0..out_channels * in_channels * KERNEL_AREA)
                    .map(|_| rng.gen_range(-bound..bound))
                    .collect();
                let layer = ConvLayer {
                    in_channels,
                    out_channels,
                    stride: STAGE_STRIDE,
                    kernel,
                    bias: vec![0.0; out_channels],
                };
                in_channels = out_channels;
                layer
            })
            .collect();

        Self {
            layers,
            fine_stage: config.fine_stage,
            coarse_stage: config.coarse_stage,
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        let weights = Self::from_bytes(&data)?;
        info!(
            path = %path.display(),
            layers = weights.layers.len(),
            "loaded backbone weights"
        );
        Ok(weights)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let weights: Self = bincode::deserialize(data)?;
        weights.validate()?;
        Ok(weights)
    }

    pub fn validate(&self) -> Result<()> {
        if self.fine_stage >= self.coarse_stage || self.coarse_stage >= self.layers.len() {
            return Err(PatchguardError::Config(format!(
                "backbone taps must satisfy fine < coarse < {}, got {} and {}",
                self.layers.len(),
                self.fine_stage,
                self.coarse_stage
            )));
        }
        let mut in_channels = 3;
        for (i, layer) in self.layers.iter().enumerate() {
            layer.validate(i)?;
            if layer.in_channels != in_channels {
                return Err(PatchguardError::Config(format!(
                    "backbone layer {i}: expected {in_channels} input channels, got {}",
                    layer.in_channels
                )));
            }
            in_channels = layer.out_channels;
        }
        Ok(())
    }

    /// Descriptor dimensionality: fine channels plus coarse channels.
    pub fn descriptor_dim(&self) -> usize {
        self.layers[self.fine_stage].out_channels + self.layers[self.coarse_stage].out_channels
    }
}

/// Activations captured at the fine and coarse taps, CHW.
#[derive(Debug, Clone)]
pub struct StageActivations {
    pub fine: Array3<f32>,
    pub coarse: Array3<f32>,
}

/// Read-only backbone shared by all extraction calls.
#[derive(Debug, Clone)]
pub struct ConvBackbone {
    weights: BackboneWeights,
    fingerprint: u64,
}

impl ConvBackbone {
    pub fn new(weights: BackboneWeights) -> Result<Self> {
        weights.validate()?;
        let fingerprint = xxh3_64(&weights.to_bytes()?);
        debug!(
            layers = weights.layers.len(),
            descriptor_dim = weights.descriptor_dim(),
            fingerprint,
            "backbone ready"
        );
        Ok(Self {
            weights,
            fingerprint,
        })
    }

    /// Load weights from `config.weights_path`, or derive them from the seed.
    pub fn from_config(config: &BackboneConfig) -> Result<Self> {
        let weights = match &config.weights_path {
            Some(path) => BackboneWeights::from_file(path)?,
            None => BackboneWeights::seeded(config),
        };
        Self::new(weights)
    }

    pub fn weights(&self) -> &BackboneWeights {
        &self.weights
    }

    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    pub fn descriptor_dim(&self) -> usize {
        self.weights.descriptor_dim()
    }

    /// Run the network up to the coarse tap.
    pub fn forward(&self, input: &Array3<f32>) -> Result<StageActivations> {
        let (channels, height, width) = input.dim();
        let expected = self.weights.layers[0].in_channels;
        if channels != expected {
            return Err(PatchguardError::ExtractionFailure(format!(
                "input tensor has {channels} channels, backbone expects {expected}"
            )));
        }
        if height == 0 || width == 0 {
            return Err(PatchguardError::ExtractionFailure(
                "input tensor has zero spatial extent".into(),
            ));
        }

        let mut fine = None;
        let mut current = input.to_owned();
        for (stage, layer) in self.weights.layers.iter().enumerate() {
            current = conv3x3_relu(&current, layer)?;
            if stage == self.weights.fine_stage {
                fine = Some(current.clone());
            }
            if stage == self.weights.coarse_stage {
                break;
            }
        }

        let fine = fine.ok_or_else(|| {
            PatchguardError::ExtractionFailure("fine stage was never reached".into())
        })?;
        Ok(StageActivations {
            fine,
            coarse: current,
        })
    }
}

/// Zero-padded 3x3 convolution with ReLU.
fn conv3x3_relu(input: &Array3<f32>, layer: &ConvLayer) -> Result<Array3<f32>> {
    let (in_channels, height, width) = input.dim();
    if in_channels != layer.in_channels {
        return Err(PatchguardError::ExtractionFailure(format!(
            "activation has {in_channels} channels, layer expects {}",
            layer.in_channels
        )));
    }

    let out_h = layer.output_extent(height);
    let out_w = layer.output_extent(width);
    let plane = out_h * out_w;
    let source = input.as_standard_layout();
    let source = source
        .as_slice()
        .ok_or_else(|| PatchguardError::ExtractionFailure("non-contiguous activation".into()))?;

    let mut output = vec![0.0f32; layer.out_channels * plane];
    for (oc, out_plane) in output.chunks_exact_mut(plane).enumerate() {
        out_plane.fill(layer.bias[oc]);
        for ic in 0..in_channels {
            let kernel = &layer.kernel[(oc * in_channels + ic) * KERNEL_AREA..][..KERNEL_AREA];
            let src = &source[ic * height * width..][..height * width];
            for oy in 0..out_h {
                let out_row = &mut out_plane[oy * out_w..][..out_w];
                for ky in 0..KERNEL {
                    let iy = (oy * layer.stride + ky) as isize - PADDING as isize;
                    if iy < 0 || iy >= height as isize {
                        continue;
                    }
                    let src_row = &src[iy as usize * width..][..width];
                    let taps = &kernel[ky * KERNEL..][..KERNEL];
                    for (ox, out) in out_row.iter_mut().enumerate() {
                        let mut acc = 0.0f32;
                        for (kx, &w) in taps.iter().enumerate() {
                            let ix = (ox * layer.stride + kx) as isize - PADDING as isize;
                            if ix >= 0 && (ix as usize) < width {
                                acc += w * src_row[ix as usize];
                            }
                        }
                        *out += acc;
                    }
                }
            }
        }
        for v in out_plane.iter_mut() {
            *v = v.max(0.0);
        }
    }

    Array3::from_shape_vec((layer.out_channels, out_h, out_w), output)
        .map_err(|e| PatchguardError::ExtractionFailure(e.to_string()))
}
