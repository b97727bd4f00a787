//! Sensor readings: ingestion and history lookups
//!
//! Every lookup goes through the shared normalizer, so readings written in
//! any of the historical shapes are returned the same way.

use crate::error::{IngestError, StoreError};
use crate::models::{now_iso, Record, SensorEvent, SensorReading};
use crate::normalize::{self, latest_of, SortOrder};
use crate::storage::{paths, TreeStore};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Buffered change events per subscriber
const EVENT_CHANNEL_CAPACITY: usize = 256;

const SENSOR_ID_PREFIX: &str = "SNR-";
const SENSOR_ID_MIN_DIGITS: usize = 3;

/// `SNR-` followed by at least three decimal digits
pub fn is_valid_sensor_id(sensor_id: &str) -> bool {
    sensor_id
        .strip_prefix(SENSOR_ID_PREFIX)
        .is_some_and(|digits| {
            digits.len() >= SENSOR_ID_MIN_DIGITS && digits.chars().all(|c| c.is_ascii_digit())
        })
}

/// Where an ingested reading was stored
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IngestReceipt {
    pub id: String,
    pub path: String,
    pub message: String,
}

/// Latest reading and size of one sensor's history
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SensorOverview {
    pub sensor_id: String,
    pub latest: Option<Record>,
    pub record_count: usize,
}

pub struct SensorRepository {
    tree: Arc<dyn TreeStore>,
    events: broadcast::Sender<SensorEvent>,
}

impl SensorRepository {
    pub fn new(tree: Arc<dyn TreeStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tree, events }
    }

    /// Receive an event for every reading ingested after this call
    pub fn subscribe(&self) -> broadcast::Receiver<SensorEvent> {
        self.events.subscribe()
    }

    /// Validate and append a reading to its sensor's history
    pub async fn ingest(&self, reading: &SensorReading) -> Result<IngestReceipt, IngestError> {
        if !is_valid_sensor_id(&reading.sensor_id) {
            return Err(IngestError::InvalidSensorId(reading.sensor_id.clone()));
        }

        let data = serde_json::to_value(reading)?;
        let sensor_path = paths::sensor(&reading.sensor_id);
        let id = self.tree.push(&sensor_path, data.clone()).await?;
        let path = format!("{}/{}", sensor_path, id);

        info!(sensor_id = %reading.sensor_id, key = %id, "Sensor reading stored");

        // No subscribers is not an error
        let delivered = self
            .events
            .send(SensorEvent {
                sensor_id: reading.sensor_id.clone(),
                data,
                path: path.clone(),
                timestamp: now_iso(),
            })
            .unwrap_or(0);
        debug!(subscribers = delivered, "Sensor event published");

        Ok(IngestReceipt {
            id,
            path,
            message: "Sensor data stored successfully".to_string(),
        })
    }

    /// Most recent reading of a sensor
    ///
    /// Falls back to scanning every node under the sensors root for records
    /// tagged with this sensor id, which covers readings pushed directly
    /// under the root.
    pub async fn latest_reading(&self, sensor_id: &str) -> Result<Option<Record>, StoreError> {
        let node = self.tree.get(&paths::sensor(sensor_id)).await?;
        if let Some(latest) = normalize::latest(node.as_ref()) {
            return Ok(Some(latest));
        }

        let root = self.tree.get(paths::SENSORS).await?;
        let matches: Vec<Record> = children(root.as_ref())
            .into_iter()
            .flat_map(|(_, child)| normalize::normalize(Some(child)))
            .filter(|r| r.get("sensor_id").and_then(Value::as_str) == Some(sensor_id))
            .collect();

        if !matches.is_empty() {
            debug!(sensor_id = %sensor_id, matches = matches.len(), "Latest reading found by root scan");
        }
        Ok(latest_of(matches))
    }

    /// Ordered history of one sensor
    pub async fn history(
        &self,
        sensor_id: &str,
        order: SortOrder,
        limit: Option<usize>,
    ) -> Result<Vec<Record>, StoreError> {
        let node = self.tree.get(&paths::sensor(sensor_id)).await?;
        Ok(normalize::history(node.as_ref(), order, limit))
    }

    /// Latest reading and record count for every sensor node
    pub async fn overview(&self) -> Result<Vec<SensorOverview>, StoreError> {
        let root = self.tree.get(paths::SENSORS).await?;
        Ok(children(root.as_ref())
            .into_iter()
            .map(|(key, node)| {
                let records = normalize::normalize(Some(node));
                SensorOverview {
                    sensor_id: key,
                    record_count: records.len(),
                    latest: latest_of(records),
                }
            })
            .collect())
    }
}

fn children(root: Option<&Value>) -> Vec<(String, &Value)> {
    match root {
        Some(Value::Object(map)) => map.iter().map(|(k, v)| (k.clone(), v)).collect(),
        _ => Vec::new(),
    }
}
