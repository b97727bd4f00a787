//! Mining activity predictor
//!
//! Owns the classifier handle and its configuration. `predict` never fails:
//! any problem along the way becomes an error-shaped [`PredictionResult`].

use super::classifier::{Classifier, FeatureFrame};
use super::features::FeatureExtractor;
use super::onnx::OnnxClassifier;
use super::output::OutputFormatter;
use crate::config::ModelConfig;
use crate::error::{ClassifierError, PredictError};
use crate::models::{PredictionResult, Record, FEATURE_COLUMNS};
use crate::normalize::value_to_string;
use crate::observability::DetectorMetrics;
use anyhow::Context;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Sensor id reported when a reading carries none
pub const UNKNOWN_SENSOR: &str = "unknown";

/// Model description for the info endpoint
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub status: &'static str,
    pub model_path: Option<String>,
    pub config: ModelConfig,
    pub model_type: String,
    pub feature_names: Vec<String>,
}

pub struct MiningPredictor {
    classifier: Option<Arc<dyn Classifier>>,
    extractor: FeatureExtractor,
    formatter: OutputFormatter,
    model_path: Option<PathBuf>,
    metrics: DetectorMetrics,
}

impl MiningPredictor {
    /// Attach a classifier, checking its input schema against the features
    pub fn new(classifier: Arc<dyn Classifier>, config: ModelConfig) -> Result<Self, ClassifierError> {
        let expected: Vec<String> = FEATURE_COLUMNS.iter().map(|c| c.to_string()).collect();
        for found in [classifier.input_columns(), config.feature_names.as_slice()] {
            if found != expected.as_slice() {
                return Err(ClassifierError::SchemaMismatch {
                    expected,
                    found: found.to_vec(),
                });
            }
        }

        Ok(Self::build(Some(classifier), config))
    }

    /// A predictor whose every prediction reports the missing model
    pub fn without_model(config: ModelConfig) -> Self {
        Self::build(None, config)
    }

    fn build(classifier: Option<Arc<dyn Classifier>>, config: ModelConfig) -> Self {
        Self {
            classifier,
            extractor: FeatureExtractor::new(),
            formatter: OutputFormatter::new(config),
            model_path: None,
            metrics: DetectorMetrics::new(),
        }
    }

    /// Load the ONNX artifact and its config, failing on a bad artifact
    ///
    /// The config is read from `config_path`, or from beside the model.
    pub fn load(model_path: impl AsRef<Path>, config_path: Option<&Path>) -> anyhow::Result<Self> {
        let model_path = model_path.as_ref();
        let config = match config_path {
            Some(path) => ModelConfig::load_or_default(path),
            None => ModelConfig::load_or_default(ModelConfig::path_beside(model_path)),
        };

        let classifier = OnnxClassifier::from_file(model_path, config.feature_names.clone())?;
        let predictor = Self::new(Arc::new(classifier), config)
            .context("Classifier input schema does not match the feature columns")?;

        info!(
            path = %model_path.display(),
            version = %predictor.config().version,
            "Mining predictor ready"
        );
        Ok(predictor.with_model_path(model_path))
    }

    pub fn with_model_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.model_path = Some(path.into());
        self
    }

    pub fn config(&self) -> &ModelConfig {
        self.formatter.config()
    }

    pub fn is_loaded(&self) -> bool {
        self.classifier.is_some()
    }

    pub fn model_info(&self) -> ModelInfo {
        ModelInfo {
            status: if self.is_loaded() { "loaded" } else { "not_loaded" },
            model_path: self.model_path.as_ref().map(|p| p.display().to_string()),
            config: self.config().clone(),
            model_type: self
                .classifier
                .as_ref()
                .map(|c| c.model_type().to_string())
                .unwrap_or_else(|| "none".to_string()),
            feature_names: FEATURE_COLUMNS.iter().map(|c| c.to_string()).collect(),
        }
    }

    /// Classify one raw reading
    pub fn predict(&self, reading: &Record) -> PredictionResult {
        let start = Instant::now();
        let sensor_id = sensor_id_of(reading);

        let result = match self.try_predict(reading, &sensor_id) {
            Ok(result) => {
                self.metrics.inc_predictions_generated();
                if let Some(level) = result.alert_level {
                    self.metrics.inc_alerts_detected(level.as_str());
                }
                debug!(
                    sensor_id = %sensor_id,
                    class_label = %result.class_label,
                    confidence = ?result.confidence,
                    derived = result.features_were_derived,
                    "Prediction complete"
                );
                result
            }
            Err(e) => {
                self.metrics.inc_prediction_errors();
                warn!(sensor_id = %sensor_id, error = %e, "Prediction failed");
                PredictionResult::failed(Some(sensor_id), e.to_string())
            }
        };

        self.metrics
            .observe_prediction_latency(start.elapsed().as_secs_f64());
        result
    }

    fn try_predict(&self, reading: &Record, sensor_id: &str) -> Result<PredictionResult, PredictError> {
        let classifier = self.classifier.as_ref().ok_or(ClassifierError::NotLoaded)?;

        let extracted = self.extractor.extract(reading)?;
        let frame = FeatureFrame::from_features(&extracted.features);
        let classification = classifier.classify(&frame)?;
        classification.validate()?;

        Ok(self.formatter.format(&classification, &extracted, sensor_id))
    }
}

fn sensor_id_of(reading: &Record) -> String {
    reading
        .get("sensor_id")
        .map(value_to_string)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| UNKNOWN_SENSOR.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AlertLevel;
    use crate::predictor::classifier::Classification;
    use serde_json::json;
    use std::sync::Mutex;

    /// Classifier double that returns a scripted answer and records frames
    struct StubClassifier {
        columns: Vec<String>,
        answer: Result<Classification, String>,
        seen: Mutex<Vec<FeatureFrame>>,
    }

    impl StubClassifier {
        fn answering(class_index: i64, probabilities: Option<Vec<f64>>) -> Self {
            Self {
                columns: FEATURE_COLUMNS.iter().map(|c| c.to_string()).collect(),
                answer: Ok(Classification {
                    class_index,
                    probabilities,
                }),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                answer: Err(message.to_string()),
                ..Self::answering(0, None)
            }
        }
    }

    impl Classifier for StubClassifier {
        fn input_columns(&self) -> &[String] {
            &self.columns
        }

        fn model_type(&self) -> &str {
            "stub"
        }

        fn classify(&self, frame: &FeatureFrame) -> Result<Classification, ClassifierError> {
            frame.check_columns(&self.columns)?;
            self.seen.lock().unwrap().push(frame.clone());
            self.answer.clone().map_err(ClassifierError::Inference)
        }
    }

    fn reading(value: serde_json::Value) -> Record {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_predict_alert_from_derived_features() {
        let stub = Arc::new(StubClassifier::answering(1, Some(vec![0.1, 0.9])));
        let predictor = MiningPredictor::new(stub.clone(), ModelConfig::default()).unwrap();

        let result = predictor.predict(&reading(json!({
            "sensor_id": "SNR-007",
            "activity": "drilling",
            "isTriggered": true
        })));

        assert!(result.is_alert);
        assert_eq!(result.alert_level, Some(AlertLevel::High));
        assert_eq!(result.sensor_id.as_deref(), Some("SNR-007"));
        assert!(result.features_were_derived);

        let seen = stub.seen.lock().unwrap();
        assert_eq!(seen[0].values(), [0.000012, 0.55, 0.10]);
    }

    #[test]
    fn test_missing_model_gives_error_result() {
        let predictor = MiningPredictor::without_model(ModelConfig::default());
        let result = predictor.predict(&reading(json!({"sensor_id": "SNR-001"})));

        assert_eq!(result.class_label, "Error");
        assert_eq!(result.prediction, None);
        assert!(!result.is_alert);
        assert_eq!(result.error.as_deref(), Some("Model not loaded"));
        assert_eq!(predictor.model_info().status, "not_loaded");
    }

    #[test]
    fn test_classifier_failure_gives_error_result() {
        let stub = Arc::new(StubClassifier::failing("onnx exploded"));
        let predictor = MiningPredictor::new(stub, ModelConfig::default()).unwrap();

        let result = predictor.predict(&reading(json!({"activity": "idle"})));
        assert_eq!(result.class_label, "Error");
        assert_eq!(result.sensor_id.as_deref(), Some(UNKNOWN_SENSOR));
        assert!(result.error.unwrap().contains("onnx exploded"));
    }

    #[test]
    fn test_malformed_probabilities_give_error_result() {
        let stub = Arc::new(StubClassifier::answering(1, Some(vec![0.9, 0.9])));
        let predictor = MiningPredictor::new(stub, ModelConfig::default()).unwrap();

        let result = predictor.predict(&reading(json!({"activity": "idle"})));
        assert!(result.is_error());
        assert!(!result.is_alert);
    }

    #[test]
    fn test_non_numeric_features_give_error_result() {
        let stub = Arc::new(StubClassifier::answering(0, None));
        let predictor = MiningPredictor::new(stub, ModelConfig::default()).unwrap();

        let result = predictor.predict(&reading(json!({
            "Max_Amplitude": {"nested": true},
            "RMS_Ratio": 0.5,
            "Power_Ratio": 0.1
        })));
        assert_eq!(result.class_label, "Error");
    }

    #[test]
    fn test_schema_mismatch_is_fatal_at_construction() {
        let mut stub = StubClassifier::answering(0, None);
        stub.columns = vec!["RMS_Ratio".into(), "Max_Amplitude".into(), "Power_Ratio".into()];

        let err = MiningPredictor::new(Arc::new(stub), ModelConfig::default()).err().unwrap();
        assert!(matches!(err, ClassifierError::SchemaMismatch { .. }));

        let config = ModelConfig {
            feature_names: vec!["Max_Amplitude".into()],
            ..ModelConfig::default()
        };
        let stub = Arc::new(StubClassifier::answering(0, None));
        assert!(MiningPredictor::new(stub, config).is_err());
    }

    #[test]
    fn test_failed_reading_does_not_affect_the_next() {
        let stub = Arc::new(StubClassifier::answering(0, Some(vec![0.95, 0.05])));
        let predictor = MiningPredictor::new(stub, ModelConfig::default()).unwrap();

        let bad = predictor.predict(&reading(
            json!({"sensor_id": "SNR-002", "Max_Amplitude": "x", "RMS_Ratio": 1, "Power_Ratio": 1}),
        ));
        let good = predictor.predict(&reading(json!({"sensor_id": "SNR-001", "activity": "idle"})));

        assert!(bad.is_error());
        assert!(!good.is_error());
        assert_eq!(good.sensor_id.as_deref(), Some("SNR-001"));
    }

    #[test]
    fn test_load_rejects_bad_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("ecowatch.onnx");
        std::fs::write(&model, b"garbage").unwrap();

        assert!(MiningPredictor::load(&model, None).is_err());
    }
}
