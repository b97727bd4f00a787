//! Core data models for the detector
//!
//! Field names follow the records already persisted by deployed sensors
//! and clients, so several of them keep their camelCase or capitalised
//! spelling on the wire.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// A loosely-structured record as returned by the tree store
pub type Record = Map<String, Value>;

/// Column names of the classifier input, in training order
pub const FEATURE_COLUMNS: [&str; 3] = ["Max_Amplitude", "RMS_Ratio", "Power_Ratio"];

/// Sensor reading accepted at the record-creation boundary
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SensorReading {
    pub sensor_id: String,
    pub timestamp: DateTime<Utc>,
    /// e.g. vibration, excavation
    pub activity: String,
    /// Battery percentage
    pub battery: f64,
    /// e.g. strong, weak
    pub signal_strength: String,
    /// e.g. active, inactive
    pub status: String,
    #[serde(rename = "isActive")]
    pub is_active: bool,
    #[serde(rename = "isTriggered")]
    pub is_triggered: bool,
    #[serde(rename = "Max_Amplitude", default, skip_serializing_if = "Option::is_none")]
    pub max_amplitude: Option<f64>,
    #[serde(rename = "RMS_Ratio", default, skip_serializing_if = "Option::is_none")]
    pub rms_ratio: Option<f64>,
    #[serde(rename = "Power_Ratio", default, skip_serializing_if = "Option::is_none")]
    pub power_ratio: Option<f64>,
}

/// The three seismic features the classifier consumes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FeatureVector {
    #[serde(rename = "Max_Amplitude")]
    pub max_amplitude: f64,
    #[serde(rename = "RMS_Ratio")]
    pub rms_ratio: f64,
    #[serde(rename = "Power_Ratio")]
    pub power_ratio: f64,
}

impl FeatureVector {
    pub const fn new(max_amplitude: f64, rms_ratio: f64, power_ratio: f64) -> Self {
        Self {
            max_amplitude,
            rms_ratio,
            power_ratio,
        }
    }

    /// Values in [`FEATURE_COLUMNS`] order
    pub fn to_array(&self) -> [f64; 3] {
        [self.max_amplitude, self.rms_ratio, self.power_ratio]
    }
}

/// Urgency of an alert-worthy prediction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    High,
    Medium,
    Low,
}

impl AlertLevel {
    /// Bucket a confidence score: > 0.8 high, > 0.5 medium, otherwise low
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence > 0.8 {
            AlertLevel::High
        } else if confidence > 0.5 {
            AlertLevel::Medium
        } else {
            AlertLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::High => "high",
            AlertLevel::Medium => "medium",
            AlertLevel::Low => "low",
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of one classifier invocation
///
/// An error-shaped result has `prediction: None`, `class_label: "Error"`
/// and `error` set. Callers treat it as "no decision", never as normal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PredictionResult {
    pub prediction: Option<i64>,
    pub class_label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub all_probabilities: Option<BTreeMap<String, f64>>,
    pub is_alert: bool,
    #[serde(default)]
    pub alert_level: Option<AlertLevel>,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensor_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<FeatureVector>,
    /// True when the features came from the activity heuristic rather
    /// than measured telemetry
    #[serde(default)]
    pub features_were_derived: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set when the prediction could not be written to its history
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistence_error: Option<String>,
}

impl PredictionResult {
    /// Build the error-shaped result for a failed inference
    pub fn failed(sensor_id: Option<String>, error: impl Into<String>) -> Self {
        Self {
            prediction: None,
            class_label: "Error".to_string(),
            confidence: None,
            all_probabilities: None,
            is_alert: false,
            alert_level: None,
            timestamp: now_iso(),
            model_version: None,
            sensor_id,
            features: None,
            features_were_derived: false,
            error: Some(error.into()),
            persistence_error: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some() || self.prediction.is_none()
    }
}

/// Title, body and string data of a push notification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    pub data: BTreeMap<String, String>,
}

/// Change notification published when a reading is ingested
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SensorEvent {
    pub sensor_id: String,
    pub data: Value,
    pub path: String,
    pub timestamp: String,
}

/// Current UTC time in the ISO-8601 form used for persisted timestamps
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}
