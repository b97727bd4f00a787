//! Prediction output formatting
//!
//! Turns a raw [`Classification`] into the persisted [`PredictionResult`]
//! shape: label lookup, confidence, probability map and alert level.

use super::classifier::Classification;
use super::features::ExtractedFeatures;
use crate::config::ModelConfig;
use crate::models::{now_iso, AlertLevel, PredictionResult};
use std::collections::BTreeMap;

/// Class index that marks an alert-worthy reading
pub const ALERT_CLASS: i64 = 1;

pub struct OutputFormatter {
    config: ModelConfig,
}

impl OutputFormatter {
    pub fn new(config: ModelConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Build the result for a validated classification
    pub fn format(
        &self,
        classification: &Classification,
        extracted: &ExtractedFeatures,
        sensor_id: &str,
    ) -> PredictionResult {
        let class_index = classification.class_index;
        let confidence = classification.confidence();
        let is_alert = class_index == ALERT_CLASS;

        PredictionResult {
            prediction: Some(class_index),
            class_label: self.config.label_for(class_index),
            confidence: Some(confidence),
            all_probabilities: Some(self.probability_map(classification)),
            is_alert,
            alert_level: is_alert.then(|| AlertLevel::from_confidence(confidence)),
            timestamp: now_iso(),
            model_version: Some(self.config.version.clone()),
            sensor_id: Some(sensor_id.to_string()),
            features: Some(extracted.features),
            features_were_derived: extracted.was_derived(),
            error: None,
            persistence_error: None,
        }
    }

    /// Class index (as string) to probability
    ///
    /// Without exposed probabilities the predicted class gets 1.0 and every
    /// other configured class 0.0.
    fn probability_map(&self, classification: &Classification) -> BTreeMap<String, f64> {
        match &classification.probabilities {
            Some(probs) => probs
                .iter()
                .enumerate()
                .map(|(i, p)| (i.to_string(), *p))
                .collect(),
            None => {
                let mut map: BTreeMap<String, f64> = self
                    .config
                    .output_classes
                    .keys()
                    .map(|k| (k.clone(), 0.0))
                    .collect();
                map.insert(classification.class_index.to_string(), 1.0);
                map
            }
        }
    }
}
