//! Patch feature extraction: image decoding, normalization, the frozen
//! backbone and the multi-scale descriptor assembly on top of it.

pub mod backbone;
pub mod extractor;
pub mod preprocess;
pub mod traits;

pub use backbone::{BackboneWeights, ConvBackbone};
pub use extractor::{resize_bilinear, BackboneExtractor};
pub use preprocess::{decode_image, Preprocessor};
pub use traits::FeatureExtractor;
