//! Feature extraction for ML inference
//!
//! Readings that carry measured `Max_Amplitude`, `RMS_Ratio` and
//! `Power_Ratio` values are used verbatim. Older sensors only report an
//! activity label and a trigger flag; for those the features are derived
//! from the signature buckets the classifier was calibrated against, and the
//! result is flagged as derived.

use crate::error::FeatureError;
use crate::models::{FeatureVector, Record, FEATURE_COLUMNS};
use crate::normalize::{value_to_bool, value_to_float, value_to_string};
use serde::Serialize;

/// Low amplitude, low RMS ratio: confirmed excavation pattern
pub const EXCAVATION_SIGNATURE: FeatureVector = FeatureVector::new(0.000012, 0.55, 0.10);

/// Slightly stronger but still mining-like
pub const VIBRATION_SIGNATURE: FeatureVector = FeatureVector::new(0.000020, 0.70, 0.12);

/// Normal ground activity
pub const BASELINE_SIGNATURE: FeatureVector = FeatureVector::new(0.001, 1.00, 0.20);

const EXCAVATION_ACTIVITIES: [&str; 2] = ["excavation", "drilling"];
const VIBRATION_ACTIVITY: &str = "vibration";

/// Which derivation bucket a derived feature vector came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureBucket {
    Excavation,
    Vibration,
    Baseline,
}

impl SignatureBucket {
    pub fn features(&self) -> FeatureVector {
        match self {
            SignatureBucket::Excavation => EXCAVATION_SIGNATURE,
            SignatureBucket::Vibration => VIBRATION_SIGNATURE,
            SignatureBucket::Baseline => BASELINE_SIGNATURE,
        }
    }
}

/// Provenance of a feature vector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureSource {
    Measured,
    Derived(SignatureBucket),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractedFeatures {
    pub features: FeatureVector,
    pub source: FeatureSource,
}

impl ExtractedFeatures {
    pub fn was_derived(&self) -> bool {
        matches!(self.source, FeatureSource::Derived(_))
    }
}

/// Extracts the classifier input from a raw reading record
#[derive(Debug, Clone, Default)]
pub struct FeatureExtractor;

impl FeatureExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Measured features when all three are present, derived otherwise
    ///
    /// Fails only when every measured field is present but one of them
    /// cannot be read as a finite number.
    pub fn extract(&self, record: &Record) -> Result<ExtractedFeatures, FeatureError> {
        let measured: Vec<(&'static str, &serde_json::Value)> = FEATURE_COLUMNS
            .iter()
            .filter_map(|col| record.get(*col).filter(|v| !v.is_null()).map(|v| (*col, v)))
            .collect();

        if measured.len() < FEATURE_COLUMNS.len() {
            let bucket = self.classify_activity(record);
            return Ok(ExtractedFeatures {
                features: bucket.features(),
                source: FeatureSource::Derived(bucket),
            });
        }

        let mut values = [0.0_f64; 3];
        for (slot, (field, raw)) in values.iter_mut().zip(measured) {
            *slot = value_to_float(raw).ok_or_else(|| FeatureError::NonNumeric {
                field,
                value: value_to_string(raw),
            })?;
        }

        Ok(ExtractedFeatures {
            features: FeatureVector::new(values[0], values[1], values[2]),
            source: FeatureSource::Measured,
        })
    }

    /// Pick the signature bucket from activity and trigger flag
    pub fn classify_activity(&self, record: &Record) -> SignatureBucket {
        let activity = record
            .get("activity")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_lowercase())
            .unwrap_or_else(|| "idle".to_string());
        let triggered = record
            .get("isTriggered")
            .and_then(value_to_bool)
            .unwrap_or(false);

        if triggered && EXCAVATION_ACTIVITIES.contains(&activity.as_str()) {
            SignatureBucket::Excavation
        } else if triggered && activity == VIBRATION_ACTIVITY {
            SignatureBucket::Vibration
        } else {
            SignatureBucket::Baseline
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: serde_json::Value) -> Record {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_excavation_triggered_without_measurements() {
        let extracted = FeatureExtractor::new()
            .extract(&record(json!({"activity": "Excavation", "isTriggered": true})))
            .unwrap();

        assert!(extracted.was_derived());
        assert_eq!(extracted.source, FeatureSource::Derived(SignatureBucket::Excavation));
        assert!((extracted.features.max_amplitude - 1.2e-5).abs() < 1e-12);
        assert!((extracted.features.rms_ratio - 0.55).abs() < 1e-9);
        assert!((extracted.features.power_ratio - 0.10).abs() < 1e-9);
    }

    #[test]
    fn test_activity_buckets() {
        let extractor = FeatureExtractor::new();
        let cases = [
            (json!({"activity": "drilling", "isTriggered": true}), SignatureBucket::Excavation),
            (json!({"activity": "vibration", "isTriggered": "true"}), SignatureBucket::Vibration),
            (json!({"activity": "vibration", "isTriggered": false}), SignatureBucket::Baseline),
            (json!({"activity": "drilling"}), SignatureBucket::Baseline),
            (json!({"isTriggered": true}), SignatureBucket::Baseline),
            (json!({"activity": 12, "isTriggered": true}), SignatureBucket::Baseline),
        ];

        for (raw, expected) in cases {
            assert_eq!(extractor.classify_activity(&record(raw.clone())), expected, "{raw}");
        }
    }

    #[test]
    fn test_measured_features_used_verbatim() {
        let extracted = FeatureExtractor::new()
            .extract(&record(json!({
                "activity": "excavation",
                "isTriggered": true,
                "Max_Amplitude": 0.004,
                "RMS_Ratio": "0.9",
                "Power_Ratio": 0.3
            })))
            .unwrap();

        assert_eq!(extracted.source, FeatureSource::Measured);
        assert_eq!(extracted.features, FeatureVector::new(0.004, 0.9, 0.3));
    }

    #[test]
    fn test_partial_measurements_fall_back() {
        let extracted = FeatureExtractor::new()
            .extract(&record(json!({
                "activity": "idle",
                "Max_Amplitude": 0.004,
                "RMS_Ratio": null
            })))
            .unwrap();

        assert_eq!(extracted.features, BASELINE_SIGNATURE);
        assert!(extracted.was_derived());
    }

    #[test]
    fn test_non_numeric_measurement_is_an_error() {
        let err = FeatureExtractor::new()
            .extract(&record(json!({
                "Max_Amplitude": 0.004,
                "RMS_Ratio": "loud",
                "Power_Ratio": 0.3
            })))
            .unwrap_err();

        assert_eq!(
            err,
            FeatureError::NonNumeric {
                field: "RMS_Ratio",
                value: "loud".to_string()
            }
        );
    }
}
