//! Classifier configuration
//!
//! Read once from `model_config.json` beside the model artifact. A missing
//! or unreadable file falls back to the built-in two-class configuration.

use crate::models::FEATURE_COLUMNS;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// File name of the configuration stored next to the model
pub const MODEL_CONFIG_FILE: &str = "model_config.json";

pub const DEFAULT_MODEL_NAME: &str = "ecowatch_mining_detector";
pub const DEFAULT_MODEL_VERSION: &str = "1.0";
pub const DEFAULT_THRESHOLD: f64 = 0.5;

/// Label map, threshold and version of the classifier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    #[serde(default = "default_model_name")]
    pub model_name: String,

    #[serde(default = "default_version")]
    pub version: String,

    /// Class index (as string) to human-readable label
    #[serde(default = "default_output_classes")]
    pub output_classes: BTreeMap<String, String>,

    /// Informational only, decisions use the predicted class
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    /// Input columns in training order
    #[serde(default = "default_feature_names")]
    pub feature_names: Vec<String>,
}

fn default_model_name() -> String {
    DEFAULT_MODEL_NAME.to_string()
}

fn default_version() -> String {
    DEFAULT_MODEL_VERSION.to_string()
}

fn default_output_classes() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("0".to_string(), "Normal ground activity".to_string()),
        ("1".to_string(), "Possible illegal mining activity".to_string()),
    ])
}

fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}

fn default_feature_names() -> Vec<String> {
    FEATURE_COLUMNS.iter().map(|c| c.to_string()).collect()
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_name: default_model_name(),
            version: default_version(),
            output_classes: default_output_classes(),
            threshold: default_threshold(),
            feature_names: default_feature_names(),
        }
    }
}

impl ModelConfig {
    /// Load from a JSON file, falling back to the default on any failure
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Model config not readable, using default");
                return Self::default();
            }
        };

        match serde_json::from_str::<ModelConfig>(&raw) {
            Ok(config) => {
                info!(
                    path = %path.display(),
                    model_name = %config.model_name,
                    version = %config.version,
                    "Model config loaded"
                );
                config
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Model config malformed, using default");
                Self::default()
            }
        }
    }

    /// Config path that sits beside a model artifact
    pub fn path_beside(model_path: impl AsRef<Path>) -> PathBuf {
        model_path
            .as_ref()
            .parent()
            .map(|dir| dir.join(MODEL_CONFIG_FILE))
            .unwrap_or_else(|| PathBuf::from(MODEL_CONFIG_FILE))
    }

    /// Label for a class index, `Unknown (Class N)` when unmapped
    pub fn label_for(&self, class_index: i64) -> String {
        self.output_classes
            .get(&class_index.to_string())
            .cloned()
            .unwrap_or_else(|| format!("Unknown (Class {})", class_index))
    }

    /// Number of classes, at least large enough to cover every mapped index
    pub fn class_count(&self) -> usize {
        self.output_classes
            .keys()
            .filter_map(|k| k.parse::<usize>().ok())
            .map(|i| i + 1)
            .max()
            .unwrap_or(0)
    }
}
