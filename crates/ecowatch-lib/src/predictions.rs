//! Append-only prediction history and aggregate views over it

use crate::error::StoreError;
use crate::models::{now_iso, PredictionResult, Record};
use crate::normalize::{self, value_to_bool, SortOrder};
use crate::storage::{paths, TreeStore};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_HISTORY_LIMIT: usize = 10;
pub const MAX_HISTORY_LIMIT: usize = 100;

/// Recent predictions of one sensor, newest first
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PredictionHistory {
    pub sensor_id: String,
    pub predictions: Vec<Record>,
    pub total: usize,
    pub limit: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Alert counts across every sensor's prediction history
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AlertsSummary {
    pub total_predictions: usize,
    pub alert_count: usize,
    pub normal_count: usize,
    pub sensors_with_alerts: Vec<String>,
    pub alert_percentage: f64,
}

pub struct PredictionRepository {
    tree: Arc<dyn TreeStore>,
}

impl PredictionRepository {
    pub fn new(tree: Arc<dyn TreeStore>) -> Self {
        Self { tree }
    }

    /// Append a prediction tagged with its reading and a storage timestamp
    pub async fn append(
        &self,
        sensor_id: &str,
        prediction: &PredictionResult,
        reading: &Record,
    ) -> Result<String, StoreError> {
        let mut entry = match serde_json::to_value(prediction)? {
            Value::Object(map) => map,
            _ => Record::new(),
        };
        entry.insert("sensor_data".to_string(), Value::Object(reading.clone()));
        entry.insert("created_at".to_string(), Value::String(now_iso()));

        let key = self
            .tree
            .push(&paths::predictions(sensor_id), Value::Object(entry))
            .await?;
        debug!(sensor_id = %sensor_id, key = %key, "Prediction persisted");
        Ok(key)
    }

    /// Most recent persisted prediction of a sensor
    pub async fn latest(&self, sensor_id: &str) -> Result<Option<Record>, StoreError> {
        let node = self.tree.get(&paths::predictions(sensor_id)).await?;
        Ok(normalize::latest(node.as_ref()))
    }

    /// Newest-first predictions, limit clamped to 1..=100
    pub async fn history(
        &self,
        sensor_id: &str,
        limit: usize,
    ) -> Result<PredictionHistory, StoreError> {
        let limit = limit.clamp(1, MAX_HISTORY_LIMIT);
        let node = self.tree.get(&paths::predictions(sensor_id)).await?;
        let predictions = normalize::history(node.as_ref(), SortOrder::NewestFirst, Some(limit));

        let message = predictions
            .is_empty()
            .then(|| "No predictions found for this sensor".to_string());
        Ok(PredictionHistory {
            sensor_id: sensor_id.to_string(),
            total: predictions.len(),
            predictions,
            limit,
            message,
        })
    }

    pub async fn alerts_summary(&self) -> Result<AlertsSummary, StoreError> {
        let root = self.tree.get(paths::PREDICTIONS).await?;

        let mut total = 0;
        let mut alerts = 0;
        let mut sensors = BTreeSet::new();

        if let Some(Value::Object(by_sensor)) = root {
            for (sensor_id, node) in &by_sensor {
                for record in normalize::normalize(Some(node)) {
                    total += 1;
                    if record.get("is_alert").and_then(value_to_bool) == Some(true) {
                        alerts += 1;
                        sensors.insert(sensor_id.clone());
                    }
                }
            }
        }

        let alert_percentage = if total == 0 {
            0.0
        } else {
            (alerts as f64 / total as f64 * 100.0 * 100.0).round() / 100.0
        };

        Ok(AlertsSummary {
            total_predictions: total,
            alert_count: alerts,
            normal_count: total - alerts,
            sensors_with_alerts: sensors.into_iter().collect(),
            alert_percentage,
        })
    }
}
