//! Mining activity classification

mod classifier;
mod features;
mod inference;
mod onnx;
mod output;

pub use classifier::{Classification, Classifier, FeatureFrame, PROBABILITY_SUM_TOLERANCE};
pub use features::{
    ExtractedFeatures, FeatureExtractor, FeatureSource, SignatureBucket, BASELINE_SIGNATURE,
    EXCAVATION_SIGNATURE, VIBRATION_SIGNATURE,
};
pub use inference::{MiningPredictor, ModelInfo, UNKNOWN_SENSOR};
pub use onnx::OnnxClassifier;
pub use output::{OutputFormatter, ALERT_CLASS};
