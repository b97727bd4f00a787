//! Error types for the detector library
//!
//! Expected operational conditions (no recipients, malformed readings,
//! failed batches) are reported as data in result structs. These enums
//! cover the faults that cross collaborator boundaries.

use thiserror::Error;

/// Errors raised by the hierarchical tree store or the flat document store
#[derive(Error, Debug)]
pub enum StoreError {
    /// Backend could not be reached or rejected the operation
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// Path was empty or otherwise unusable
    #[error("Invalid storage path: {0}")]
    InvalidPath(String),

    /// Value could not be converted to or from JSON
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised while loading or running the classifier artifact
#[derive(Error, Debug)]
pub enum ClassifierError {
    /// Input columns do not match the schema the artifact was trained on
    #[error("Feature schema mismatch: expected {expected:?}, got {found:?}")]
    SchemaMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },

    /// No classifier is attached to the predictor
    #[error("Model not loaded")]
    NotLoaded,

    /// The artifact failed while running
    #[error("Inference failed: {0}")]
    Inference(String),

    /// The artifact ran but produced output we cannot interpret
    #[error("Malformed model output: {0}")]
    MalformedOutput(String),
}

/// Errors raised while reading the authoritative feature fields
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FeatureError {
    #[error("Feature {field} is not numeric: {value}")]
    NonNumeric { field: &'static str, value: String },
}

/// Errors raised by a push notification provider for a whole batch
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Errors raised at the reading-creation boundary
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Invalid sensor id {0:?}: expected SNR- followed by at least 3 digits")]
    InvalidSensorId(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by engine operations that look a sensor up first
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Sensor {0} not found or has no data")]
    SensorNotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why a single prediction produced an error-shaped result
#[derive(Error, Debug)]
pub enum PredictError {
    #[error(transparent)]
    Feature(#[from] FeatureError),

    #[error(transparent)]
    Classifier(#[from] ClassifierError),
}
