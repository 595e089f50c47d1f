//! 帧特征提取

pub mod extractor;
pub mod sequence;

pub use extractor::FeatureExtractor;
pub use sequence::{FeatureVector, FingerprintSequence};
