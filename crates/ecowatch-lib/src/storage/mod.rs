//! Storage seams
//!
//! Readings and predictions live in a hierarchical key-value tree addressed
//! by slash-separated paths. Device registrations and the alert audit log
//! live in a flat document store. Both backends are external; this module
//! defines the interfaces plus in-memory implementations.

mod memory;

pub use memory::{MemoryDocuments, MemoryTree};

use crate::error::StoreError;
use crate::models::Record;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Hierarchical key-value store with get/set/push
#[async_trait]
pub trait TreeStore: Send + Sync {
    /// Value at `path`, `None` when nothing is stored
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError>;

    /// Replace the value at `path`; `null` deletes it
    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError>;

    /// Append under `path` with a generated, time-ordered key
    async fn push(&self, path: &str, value: Value) -> Result<String, StoreError>;
}

/// A document in a flat collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub fields: Record,
}

/// Flat document store
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn list_all(&self, collection: &str) -> Result<Vec<Document>, StoreError>;

    /// Add a document, returning its generated id
    async fn add(&self, collection: &str, fields: Record) -> Result<String, StoreError>;
}

/// Store locations shared by every component
pub mod paths {
    pub const ROOT: &str = "EcoWatch";
    pub const SENSORS: &str = "EcoWatch/sensors";
    pub const PREDICTIONS: &str = "EcoWatch/predictions";

    /// Device registrations, one document per device
    pub const DEVICES_COLLECTION: &str = "devices";
    /// Audit log of dispatched alerts
    pub const ALERTS_COLLECTION: &str = "alerts";

    /// Field names under which devices have stored their push token
    pub const TOKEN_FIELDS: [&str; 3] = ["fcmToken", "fcm_token", "token"];

    pub fn sensor(sensor_id: &str) -> String {
        format!("{}/{}", SENSORS, sensor_id)
    }

    pub fn predictions(sensor_id: &str) -> String {
        format!("{}/{}", PREDICTIONS, sensor_id)
    }

    /// Children of a sensor node that hold recipient tokens, not readings
    pub const SENSOR_TOKEN_CHILDREN: [&str; 2] = ["tokens", "push_tokens"];

    /// Every location a sensor's recipient tokens have been written to
    pub fn token_paths(sensor_id: &str) -> Vec<String> {
        vec![
            format!("{}/tokens/{}", ROOT, sensor_id),
            format!("tokens/{}", sensor_id),
            format!("{}/{}/{}", SENSORS, sensor_id, SENSOR_TOKEN_CHILDREN[0]),
            format!("{}/{}/{}", SENSORS, sensor_id, SENSOR_TOKEN_CHILDREN[1]),
            format!("sensors/{}/tokens", sensor_id),
            format!("users/{}/tokens", sensor_id),
        ]
    }
}

/// Split a path into its non-empty segments
pub(crate) fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}
