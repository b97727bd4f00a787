//! Classifier seam
//!
//! The model is opaque: it takes one row of named numeric columns and
//! returns a class index, optionally with per-class probabilities.

use crate::error::ClassifierError;
use crate::models::{FeatureVector, FEATURE_COLUMNS};

/// Tolerance for a probability vector summing to one
pub const PROBABILITY_SUM_TOLERANCE: f64 = 1e-3;

/// A single-row frame of named feature columns
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureFrame {
    columns: Vec<String>,
    values: Vec<f64>,
}

impl FeatureFrame {
    pub fn new(columns: Vec<String>, values: Vec<f64>) -> Self {
        Self { columns, values }
    }

    /// Frame in the training column order
    pub fn from_features(features: &FeatureVector) -> Self {
        Self {
            columns: FEATURE_COLUMNS.iter().map(|c| c.to_string()).collect(),
            values: features.to_array().to_vec(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Names and order must match exactly
    pub fn check_columns(&self, expected: &[String]) -> Result<(), ClassifierError> {
        if self.columns == expected && self.values.len() == expected.len() {
            Ok(())
        } else {
            Err(ClassifierError::SchemaMismatch {
                expected: expected.to_vec(),
                found: self.columns.clone(),
            })
        }
    }
}

/// Raw classifier output
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub class_index: i64,
    /// Per-class probabilities, indexed by class
    pub probabilities: Option<Vec<f64>>,
}

impl Classification {
    /// Reject probability vectors that are not a distribution or do not
    /// cover the predicted class
    pub fn validate(&self) -> Result<(), ClassifierError> {
        if self.class_index < 0 {
            return Err(ClassifierError::MalformedOutput(format!(
                "negative class index {}",
                self.class_index
            )));
        }

        let Some(probs) = &self.probabilities else {
            return Ok(());
        };

        if probs.iter().any(|p| !p.is_finite() || *p < 0.0) {
            return Err(ClassifierError::MalformedOutput(format!(
                "probabilities must be finite and non-negative: {:?}",
                probs
            )));
        }
        let sum: f64 = probs.iter().sum();
        if (sum - 1.0).abs() > PROBABILITY_SUM_TOLERANCE {
            return Err(ClassifierError::MalformedOutput(format!(
                "probabilities sum to {:.4}",
                sum
            )));
        }
        if self.class_index as usize >= probs.len() {
            return Err(ClassifierError::MalformedOutput(format!(
                "class {} outside {} probabilities",
                self.class_index,
                probs.len()
            )));
        }
        Ok(())
    }

    /// Probability of the predicted class, 1.0 when none were exposed
    pub fn confidence(&self) -> f64 {
        self.probabilities
            .as_ref()
            .and_then(|p| p.get(self.class_index as usize).copied())
            .unwrap_or(1.0)
    }
}

/// A pre-trained classifier over a fixed column schema
pub trait Classifier: Send + Sync {
    /// Columns the artifact was trained on, in order
    fn input_columns(&self) -> &[String];

    /// Short description, e.g. `onnx`
    fn model_type(&self) -> &str;

    fn classify(&self, frame: &FeatureFrame) -> Result<Classification, ClassifierError>;
}
