//! Alert engine
//!
//! Runs a reading through the predictor, persists the decision, and when
//! the decision is an alert, resolves recipients and fans the notification
//! out. Every expected condition along the way (persistence failure, no
//! recipients, partially failed delivery) is reported in the returned
//! outcome rather than as an error.

use super::dedup::{event_key, AlertDeduplicator};
use super::dispatcher::{DispatchReport, NotificationDispatcher, PushProvider, MAX_BATCH_SIZE};
use super::tokens::TokenResolver;
use crate::error::EngineError;
use crate::health::{Component, HealthRegistry};
use crate::models::{now_iso, AlertLevel, NotificationPayload, PredictionResult, Record};
use crate::normalize::{resolve_timestamp, value_to_string};
use crate::observability::{DetectorMetrics, StructuredLogger};
use crate::predictions::PredictionRepository;
use crate::predictor::{MiningPredictor, UNKNOWN_SENSOR};
use crate::sensors::SensorRepository;
use crate::storage::{paths, DocumentStore, TreeStore};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Reported when an alert has nobody to go to
pub const NO_TOKENS_ERROR: &str = "no tokens found for sensor";

pub const AUTO_ALERT_TYPE: &str = "mining_detection";
pub const MANUAL_ALERT_TYPE: &str = "manual_alert";

pub const DEFAULT_ALERT_HISTORY_LIMIT: usize = 50;
pub const MAX_ALERT_HISTORY_LIMIT: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Dispatched,
    NoTokens,
    Suppressed,
}

/// What happened to the notification of one alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationOutcome {
    pub status: NotificationStatus,
    pub event_key: String,
    #[serde(flatten)]
    pub report: DispatchReport,
}

impl NotificationOutcome {
    fn no_tokens(event_key: String) -> Self {
        Self {
            status: NotificationStatus::NoTokens,
            event_key,
            report: DispatchReport {
                error: Some(NO_TOKENS_ERROR.to_string()),
                ..DispatchReport::default()
            },
        }
    }

    fn suppressed(event_key: String) -> Self {
        Self {
            status: NotificationStatus::Suppressed,
            event_key,
            report: DispatchReport::default(),
        }
    }

    pub fn error(&self) -> Option<&str> {
        self.report.error.as_deref()
    }

    /// At least one device accepted the notification
    pub fn delivered(&self) -> bool {
        self.status == NotificationStatus::Dispatched && self.report.success_count > 0
    }
}

/// Result of evaluating one reading
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationOutcome {
    pub prediction: PredictionResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification: Option<NotificationOutcome>,
    pub alert_sent: bool,
}

/// Per-sensor entry of a batch evaluation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorEvaluation {
    pub sensor_id: String,
    pub success: bool,
    #[serde(flatten)]
    pub outcome: Option<EvaluationOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchEvaluation {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<SensorEvaluation>,
}

/// Result of an operator-triggered alert
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManualAlertOutcome {
    pub success: bool,
    pub sensor_id: String,
    pub tokens_found: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_result: Option<DispatchReport>,
    pub message: String,
    pub alert_logged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One entry of the alert audit log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertRecord {
    pub id: String,
    #[serde(flatten)]
    pub fields: Record,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertHistory {
    pub alerts: Vec<AlertRecord>,
    pub count: usize,
    pub sensor_id: Option<String>,
    pub limit: usize,
}

pub struct AlertEngine {
    predictor: Arc<MiningPredictor>,
    sensors: Arc<SensorRepository>,
    predictions: PredictionRepository,
    tokens: TokenResolver,
    dispatcher: NotificationDispatcher,
    documents: Arc<dyn DocumentStore>,
    dedup: Option<AlertDeduplicator>,
    audit_alerts: bool,
    health: Option<HealthRegistry>,
    logger: StructuredLogger,
    metrics: DetectorMetrics,
}

impl AlertEngine {
    pub fn builder() -> AlertEngineBuilder {
        AlertEngineBuilder::new()
    }

    pub fn predictor(&self) -> &MiningPredictor {
        &self.predictor
    }

    pub fn sensors(&self) -> &SensorRepository {
        &self.sensors
    }

    pub fn predictions(&self) -> &PredictionRepository {
        &self.predictions
    }

    /// Classify a reading, persist the decision and notify on alerts
    pub async fn evaluate(&self, reading: &Record, auto_notify: bool) -> EvaluationOutcome {
        let mut prediction = self.predictor.predict(reading);

        if let Some(sensor_id) = reading_sensor_id(reading) {
            self.persist(&sensor_id, &mut prediction, reading).await;
        }

        self.logger.log_prediction(
            prediction.sensor_id.as_deref().unwrap_or(UNKNOWN_SENSOR),
            &prediction.class_label,
            prediction.confidence,
            prediction.alert_level.as_ref().map(AlertLevel::as_str),
            prediction.features_were_derived,
            &self.predictor.config().version,
        );

        let notification = if auto_notify && prediction.is_alert && !prediction.is_error() {
            Some(self.notify(&prediction, reading).await)
        } else {
            None
        };
        let alert_sent = notification
            .as_ref()
            .is_some_and(NotificationOutcome::delivered);

        EvaluationOutcome {
            prediction,
            notification,
            alert_sent,
        }
    }

    /// Evaluate the latest reading of each sensor independently
    pub async fn evaluate_sensors(&self, sensor_ids: &[String], auto_notify: bool) -> BatchEvaluation {
        let mut results = Vec::with_capacity(sensor_ids.len());

        for sensor_id in sensor_ids {
            let entry = match self.sensors.latest_reading(sensor_id).await {
                Ok(Some(reading)) => SensorEvaluation {
                    sensor_id: sensor_id.clone(),
                    success: true,
                    outcome: Some(self.evaluate(&reading, auto_notify).await),
                    error: None,
                },
                Ok(None) => SensorEvaluation {
                    sensor_id: sensor_id.clone(),
                    success: false,
                    outcome: None,
                    error: Some("Sensor not found".to_string()),
                },
                Err(e) => {
                    warn!(sensor_id = %sensor_id, error = %e, "Latest reading unavailable");
                    SensorEvaluation {
                        sensor_id: sensor_id.clone(),
                        success: false,
                        outcome: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            results.push(entry);
        }

        let successful = results.iter().filter(|r| r.success).count();
        BatchEvaluation {
            total: results.len(),
            successful,
            failed: results.len() - successful,
            results,
        }
    }

    /// Notify every registered device about a sensor, bypassing the model
    ///
    /// Without `force` the sensor must have at least one reading.
    pub async fn manual_alert(
        &self,
        sensor_id: &str,
        force: bool,
    ) -> Result<ManualAlertOutcome, EngineError> {
        let reading = self.sensors.latest_reading(sensor_id).await?;
        if reading.is_none() && !force {
            return Err(EngineError::SensorNotFound(sensor_id.to_string()));
        }

        let tokens = self.tokens.resolve_tokens(Some(sensor_id)).await;
        if tokens.is_empty() {
            self.logger.log_no_recipients(sensor_id);
            return Ok(ManualAlertOutcome {
                success: false,
                sensor_id: sensor_id.to_string(),
                tokens_found: 0,
                notification_result: None,
                message: "No registered devices to notify".to_string(),
                alert_logged: false,
                error: Some(NO_TOKENS_ERROR.to_string()),
            });
        }

        let payload = NotificationPayload {
            title: format!("🚨 Alert - Sensor {}", sensor_id),
            body: format!("Suspicious activity detected at sensor {}", sensor_id),
            data: [
                ("sensor_id".to_string(), sensor_id.to_string()),
                ("type".to_string(), MANUAL_ALERT_TYPE.to_string()),
                ("timestamp".to_string(), now_iso()),
            ]
            .into_iter()
            .collect(),
        };

        let report = self.send(sensor_id, "manual", "", &tokens, &payload).await;
        let alert_logged = self
            .audit(sensor_id, &payload, tokens.len(), &report, reading.as_ref())
            .await;

        Ok(ManualAlertOutcome {
            success: true,
            sensor_id: sensor_id.to_string(),
            tokens_found: tokens.len(),
            message: format!("Notification sent to {} device(s)", tokens.len()),
            notification_result: Some(report),
            alert_logged,
            error: None,
        })
    }

    /// Audit log entries, newest first, optionally for one sensor
    pub async fn alert_history(&self, sensor_id: Option<&str>, limit: usize) -> Result<AlertHistory, EngineError> {
        let limit = limit.clamp(1, MAX_ALERT_HISTORY_LIMIT);
        let mut alerts: Vec<AlertRecord> = self
            .documents
            .list_all(paths::ALERTS_COLLECTION)
            .await?
            .into_iter()
            .filter(|doc| {
                sensor_id.map_or(true, |id| {
                    doc.fields.get("sensor_id").and_then(Value::as_str) == Some(id)
                })
            })
            .map(|doc| AlertRecord {
                id: doc.id,
                fields: doc.fields,
            })
            .collect();

        alerts.sort_by_cached_key(|a| {
            std::cmp::Reverse(resolve_timestamp(a.fields.get("timestamp")))
        });
        alerts.truncate(limit);

        Ok(AlertHistory {
            count: alerts.len(),
            alerts,
            sensor_id: sensor_id.map(str::to_string),
            limit,
        })
    }

    async fn persist(&self, sensor_id: &str, prediction: &mut PredictionResult, reading: &Record) {
        match self.predictions.append(sensor_id, prediction, reading).await {
            Ok(_) => {
                if let Some(health) = &self.health {
                    health.set_healthy(Component::TreeStore).await;
                }
            }
            Err(e) => {
                warn!(sensor_id = %sensor_id, error = %e, "Failed to persist prediction");
                self.metrics.inc_persistence_errors();
                if let Some(health) = &self.health {
                    health
                        .set_degraded(Component::TreeStore, format!("Prediction write failed: {}", e))
                        .await;
                }
                prediction.persistence_error = Some(e.to_string());
            }
        }
    }

    async fn notify(&self, prediction: &PredictionResult, reading: &Record) -> NotificationOutcome {
        let sensor_id = prediction.sensor_id.as_deref().unwrap_or(UNKNOWN_SENSOR);
        let reading_ts = reading.get("timestamp").map(value_to_string).unwrap_or_default();
        let key = event_key(sensor_id, &reading_ts, prediction.prediction.unwrap_or_default());

        if let Some(dedup) = &self.dedup {
            if !dedup.try_claim(&key).await {
                self.logger.log_alert_suppressed(sensor_id, &key);
                self.metrics.inc_notifications_suppressed();
                return NotificationOutcome::suppressed(key);
            }
        }

        let tokens = self.tokens.resolve_tokens(Some(sensor_id)).await;
        if tokens.is_empty() {
            self.release_claim(&key).await;
            self.logger.log_no_recipients(sensor_id);
            return NotificationOutcome::no_tokens(key);
        }

        let payload = alert_payload(prediction, sensor_id, &key);
        let level = prediction.alert_level.map(|l| l.as_str()).unwrap_or("low");
        let report = self.send(sensor_id, level, &key, &tokens, &payload).await;

        if report.success_count == 0 {
            self.release_claim(&key).await;
        }
        if self.audit_alerts {
            self.audit(sensor_id, &payload, tokens.len(), &report, Some(reading))
                .await;
        }

        NotificationOutcome {
            status: NotificationStatus::Dispatched,
            event_key: key,
            report,
        }
    }

    async fn release_claim(&self, key: &str) {
        if let Some(dedup) = &self.dedup {
            dedup.release(key).await;
        }
    }

    async fn send(
        &self,
        sensor_id: &str,
        level: &str,
        key: &str,
        tokens: &[String],
        payload: &NotificationPayload,
    ) -> DispatchReport {
        let report = self.dispatcher.dispatch(tokens, payload).await;

        self.metrics
            .record_dispatch(report.success_count, report.failure_count);
        self.logger.log_alert_dispatched(
            sensor_id,
            level,
            key,
            report.success_count,
            report.failure_count,
        );

        if let Some(health) = &self.health {
            if report.success_count == 0 && report.failure_count > 0 {
                health
                    .set_degraded(Component::Notifier, "No device accepted the last notification")
                    .await;
            } else {
                health.set_healthy(Component::Notifier).await;
            }
        }
        report
    }

    /// Append to the audit log; a failed write only loses the entry
    async fn audit(
        &self,
        sensor_id: &str,
        payload: &NotificationPayload,
        tokens_sent: usize,
        report: &DispatchReport,
        reading: Option<&Record>,
    ) -> bool {
        let mut entry = Record::new();
        entry.insert("sensor_id".to_string(), json!(sensor_id));
        entry.insert("title".to_string(), json!(payload.title));
        entry.insert("body".to_string(), json!(payload.body));
        entry.insert(
            "type".to_string(),
            json!(payload.data.get("type").cloned().unwrap_or_default()),
        );
        if let Some(key) = payload.data.get("event_key") {
            entry.insert("event_key".to_string(), json!(key));
        }
        entry.insert("timestamp".to_string(), json!(now_iso()));
        entry.insert("tokens_sent".to_string(), json!(tokens_sent));
        entry.insert(
            "notification_result".to_string(),
            serde_json::to_value(report).unwrap_or(Value::Null),
        );
        entry.insert(
            "sensor_data".to_string(),
            reading.map_or(Value::Null, |r| Value::Object(r.clone())),
        );

        match self.documents.add(paths::ALERTS_COLLECTION, entry).await {
            Ok(id) => {
                debug!(sensor_id = %sensor_id, alert_id = %id, "Alert logged");
                true
            }
            Err(e) => {
                warn!(sensor_id = %sensor_id, error = %e, "Failed to log alert");
                false
            }
        }
    }
}

/// Title, body and data of an automatic alert
fn alert_payload(prediction: &PredictionResult, sensor_id: &str, key: &str) -> NotificationPayload {
    let confidence = prediction.confidence.unwrap_or_default();
    let icon = if prediction.alert_level == Some(AlertLevel::High) {
        "🚨"
    } else {
        "⚠️"
    };

    let data = [
        ("sensor_id", sensor_id.to_string()),
        (
            "prediction",
            prediction.prediction.map(|p| p.to_string()).unwrap_or_default(),
        ),
        ("class_label", prediction.class_label.clone()),
        ("confidence", confidence.to_string()),
        (
            "alert_level",
            prediction.alert_level.map(|l| l.to_string()).unwrap_or_default(),
        ),
        ("timestamp", prediction.timestamp.clone()),
        ("type", AUTO_ALERT_TYPE.to_string()),
        ("event_key", key.to_string()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();

    NotificationPayload {
        title: format!("{} Mining Alert - Sensor {}", icon, sensor_id),
        body: format!(
            "{} detected with {:.1}% confidence",
            prediction.class_label,
            confidence * 100.0
        ),
        data,
    }
}

/// Sensor id a reading should be persisted under
fn reading_sensor_id(reading: &Record) -> Option<String> {
    reading
        .get("sensor_id")
        .map(value_to_string)
        .filter(|s| !s.is_empty())
}

/// Builder for the alert engine
pub struct AlertEngineBuilder {
    predictor: Option<Arc<MiningPredictor>>,
    tree: Option<Arc<dyn TreeStore>>,
    documents: Option<Arc<dyn DocumentStore>>,
    provider: Option<Arc<dyn PushProvider>>,
    sensors: Option<Arc<SensorRepository>>,
    dedup_window: Option<Duration>,
    audit_alerts: bool,
    batch_size: usize,
    health: Option<HealthRegistry>,
    node_name: String,
}

impl AlertEngineBuilder {
    pub fn new() -> Self {
        Self {
            predictor: None,
            tree: None,
            documents: None,
            provider: None,
            sensors: None,
            dedup_window: None,
            audit_alerts: false,
            batch_size: MAX_BATCH_SIZE,
            health: None,
            node_name: "ecowatch".to_string(),
        }
    }

    pub fn predictor(mut self, predictor: Arc<MiningPredictor>) -> Self {
        self.predictor = Some(predictor);
        self
    }

    pub fn tree_store(mut self, tree: Arc<dyn TreeStore>) -> Self {
        self.tree = Some(tree);
        self
    }

    pub fn document_store(mut self, documents: Arc<dyn DocumentStore>) -> Self {
        self.documents = Some(documents);
        self
    }

    pub fn push_provider(mut self, provider: Arc<dyn PushProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Share a sensor repository, e.g. to keep its event subscribers
    pub fn sensors(mut self, sensors: Arc<SensorRepository>) -> Self {
        self.sensors = Some(sensors);
        self
    }

    /// Do not re-send an alert with the same event key within `window`
    pub fn dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window = Some(window).filter(|w| !w.is_zero());
        self
    }

    /// Also write automatic alerts to the audit log
    pub fn audit_alerts(mut self, enabled: bool) -> Self {
        self.audit_alerts = enabled;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn node_name(mut self, node_name: impl Into<String>) -> Self {
        self.node_name = node_name.into();
        self
    }

    pub fn build(self) -> Result<AlertEngine> {
        let predictor = self
            .predictor
            .ok_or_else(|| anyhow::anyhow!("Predictor is required"))?;
        let tree = self
            .tree
            .ok_or_else(|| anyhow::anyhow!("Tree store is required"))?;
        let documents = self
            .documents
            .ok_or_else(|| anyhow::anyhow!("Document store is required"))?;
        let provider = self
            .provider
            .ok_or_else(|| anyhow::anyhow!("Push provider is required"))?;

        let sensors = self
            .sensors
            .unwrap_or_else(|| Arc::new(SensorRepository::new(tree.clone())));

        if let Some(window) = self.dedup_window {
            info!(window_secs = window.as_secs(), "Alert dedup window enabled");
        }

        Ok(AlertEngine {
            predictor,
            sensors,
            predictions: PredictionRepository::new(tree.clone()),
            tokens: TokenResolver::new(tree, documents.clone()),
            dispatcher: NotificationDispatcher::new(provider).with_batch_size(self.batch_size),
            documents,
            dedup: self.dedup_window.map(AlertDeduplicator::new),
            audit_alerts: self.audit_alerts,
            health: self.health,
            logger: StructuredLogger::new(self.node_name),
            metrics: DetectorMetrics::new(),
        })
    }
}

impl Default for AlertEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::error::{ClassifierError, ProviderError, StoreError};
    use crate::health::ComponentStatus;
    use crate::predictor::{Classification, Classifier, FeatureFrame};
    use crate::alert::dispatcher::{BatchResponse, DeliveryResult};
    use crate::models::FEATURE_COLUMNS;
    use crate::storage::{Document, MemoryDocuments, MemoryTree};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Classifier double that always answers class 1 with 0.9
    struct AlwaysMining {
        columns: Vec<String>,
    }

    impl AlwaysMining {
        fn new() -> Self {
            Self {
                columns: FEATURE_COLUMNS.iter().map(|c| c.to_string()).collect(),
            }
        }
    }

    impl Classifier for AlwaysMining {
        fn input_columns(&self) -> &[String] {
            &self.columns
        }

        fn model_type(&self) -> &str {
            "AlwaysMining"
        }

        fn classify(&self, _frame: &FeatureFrame) -> Result<Classification, ClassifierError> {
            Ok(Classification {
                class_index: 1,
                probabilities: Some(vec![0.1, 0.9]),
            })
        }
    }

    #[derive(Default)]
    struct RecordingProvider {
        payloads: Mutex<Vec<NotificationPayload>>,
    }

    #[async_trait]
    impl PushProvider for RecordingProvider {
        async fn send_batch(
            &self,
            tokens: &[String],
            payload: &NotificationPayload,
        ) -> Result<BatchResponse, ProviderError> {
            self.payloads.lock().unwrap().push(payload.clone());
            Ok(BatchResponse {
                responses: tokens.iter().map(|_| DeliveryResult::delivered()).collect(),
            })
        }
    }

    /// Provider that rejects every token on its first batch
    #[derive(Default)]
    struct FlakyProvider {
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl PushProvider for FlakyProvider {
        async fn send_batch(
            &self,
            tokens: &[String],
            _payload: &NotificationPayload,
        ) -> Result<BatchResponse, ProviderError> {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            let responses = if *calls == 1 {
                tokens.iter().map(|_| DeliveryResult::failed("unavailable")).collect()
            } else {
                tokens.iter().map(|_| DeliveryResult::delivered()).collect()
            };
            Ok(BatchResponse { responses })
        }
    }

    /// Tree store whose writes always fail
    struct ReadOnlyTree(MemoryTree);

    #[async_trait]
    impl TreeStore for ReadOnlyTree {
        async fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
            self.0.get(path).await
        }
        async fn set(&self, _path: &str, _value: Value) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("read-only replica".into()))
        }
        async fn push(&self, _path: &str, _value: Value) -> Result<String, StoreError> {
            Err(StoreError::Unavailable("read-only replica".into()))
        }
    }

    fn predictor() -> Arc<MiningPredictor> {
        Arc::new(MiningPredictor::new(Arc::new(AlwaysMining::new()), ModelConfig::default()).unwrap())
    }

    fn drilling(sensor_id: &str) -> Record {
        json!({
            "sensor_id": sensor_id,
            "activity": "drilling",
            "isTriggered": true,
            "timestamp": "2024-05-01T10:00:00Z"
        })
        .as_object()
        .unwrap()
        .clone()
    }

    async fn devices_with(tokens: &[&str]) -> Arc<MemoryDocuments> {
        let docs = MemoryDocuments::new();
        for (i, token) in tokens.iter().enumerate() {
            let fields = json!({"fcmToken": token}).as_object().unwrap().clone();
            docs.insert(paths::DEVICES_COLLECTION, format!("phone-{}", i), fields)
                .await;
        }
        Arc::new(docs)
    }

    fn engine(
        tree: Arc<dyn TreeStore>,
        documents: Arc<dyn DocumentStore>,
        provider: Arc<dyn PushProvider>,
    ) -> AlertEngineBuilder {
        AlertEngine::builder()
            .predictor(predictor())
            .tree_store(tree)
            .document_store(documents)
            .push_provider(provider)
    }

    #[tokio::test]
    async fn test_alert_without_tokens_is_reported_not_raised() {
        let tree = Arc::new(MemoryTree::new());
        let engine = engine(
            tree.clone(),
            Arc::new(MemoryDocuments::new()),
            Arc::new(RecordingProvider::default()),
        )
        .build()
        .unwrap();

        let reading = drilling("SNR-007");
        let outcome = engine.evaluate(&reading, true).await;

        assert!(!outcome.alert_sent);
        let notification = outcome.notification.unwrap();
        assert_eq!(notification.status, NotificationStatus::NoTokens);
        assert!(notification.error().unwrap().contains("no tokens"));

        assert!(outcome.prediction.is_alert);
        let stored = engine.predictions().latest("SNR-007").await.unwrap().unwrap();
        assert_eq!(stored["is_alert"], json!(true));
        assert_eq!(stored["sensor_data"]["activity"], json!("drilling"));
    }

    #[tokio::test]
    async fn test_alert_is_dispatched_and_audited() {
        let provider = Arc::new(RecordingProvider::default());
        let docs = devices_with(&["token-aaaaaaaaaaaa", "token-bbbbbbbbbbbb"]).await;
        let engine = engine(Arc::new(MemoryTree::new()), docs.clone(), provider.clone())
            .audit_alerts(true)
            .build()
            .unwrap();

        let outcome = engine.evaluate(&drilling("SNR-001"), true).await;

        assert!(outcome.alert_sent);
        let notification = outcome.notification.unwrap();
        assert_eq!(notification.report.success_count, 2);

        let payloads = provider.payloads.lock().unwrap().clone();
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].title, "🚨 Mining Alert - Sensor SNR-001");
        assert_eq!(payloads[0].body, "Possible illegal mining activity detected with 90.0% confidence");
        assert_eq!(payloads[0].data["type"], AUTO_ALERT_TYPE);
        assert_eq!(payloads[0].data["alert_level"], "high");
        assert_eq!(payloads[0].data["event_key"], notification.event_key);

        let history = engine.alert_history(Some("SNR-001"), 10).await.unwrap();
        assert_eq!(history.count, 1);
        assert_eq!(history.alerts[0].fields["tokens_sent"], json!(2));
        assert_eq!(history.alerts[0].fields["type"], json!(AUTO_ALERT_TYPE));
    }

    #[tokio::test]
    async fn test_no_notification_without_auto_notify() {
        let provider = Arc::new(RecordingProvider::default());
        let docs = devices_with(&["token-aaaaaaaaaaaa"]).await;
        let engine = engine(Arc::new(MemoryTree::new()), docs, provider.clone())
            .build()
            .unwrap();

        let outcome = engine.evaluate(&drilling("SNR-001"), false).await;
        assert!(outcome.prediction.is_alert);
        assert!(outcome.notification.is_none());
        assert!(!outcome.alert_sent);
        assert!(provider.payloads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_persistence_failure_degrades_result() {
        let health = HealthRegistry::new();
        let engine = engine(
            Arc::new(ReadOnlyTree(MemoryTree::new())),
            Arc::new(MemoryDocuments::new()),
            Arc::new(RecordingProvider::default()),
        )
        .health(health.clone())
        .build()
        .unwrap();

        let outcome = engine.evaluate(&drilling("SNR-001"), false).await;

        assert_eq!(outcome.prediction.class_label, "Possible illegal mining activity");
        assert!(outcome
            .prediction
            .persistence_error
            .as_deref()
            .unwrap()
            .contains("read-only replica"));
        assert_eq!(
            health.status_of(Component::TreeStore).await,
            Some(ComponentStatus::Degraded)
        );
    }

    #[tokio::test]
    async fn test_dedup_window_suppresses_repeat() {
        let provider = Arc::new(RecordingProvider::default());
        let docs = devices_with(&["token-aaaaaaaaaaaa"]).await;
        let engine = engine(Arc::new(MemoryTree::new()), docs, provider.clone())
            .dedup_window(Duration::from_secs(600))
            .build()
            .unwrap();

        let first = engine.evaluate(&drilling("SNR-001"), true).await;
        let second = engine.evaluate(&drilling("SNR-001"), true).await;

        assert!(first.alert_sent);
        assert!(!second.alert_sent);
        let notification = second.notification.unwrap();
        assert_eq!(notification.status, NotificationStatus::Suppressed);
        assert_eq!(notification.event_key, first.notification.unwrap().event_key);
        assert_eq!(provider.payloads.lock().unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dedup_window_holds_under_concurrent_evaluations() {
        let provider = Arc::new(RecordingProvider::default());
        let docs = devices_with(&["token-aaaaaaaaaaaa"]).await;
        let engine = engine(Arc::new(MemoryTree::new()), docs, provider.clone())
            .dedup_window(Duration::from_secs(600))
            .build()
            .unwrap();

        let reading = drilling("SNR-001");
        let (a, b) = tokio::join!(engine.evaluate(&reading, true), engine.evaluate(&reading, true));

        assert_eq!(u8::from(a.alert_sent) + u8::from(b.alert_sent), 1);
        assert_eq!(provider.payloads.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_delivery_does_not_hold_the_window() {
        let provider = Arc::new(FlakyProvider::default());
        let docs = devices_with(&["token-aaaaaaaaaaaa"]).await;
        let engine = engine(Arc::new(MemoryTree::new()), docs, provider.clone())
            .dedup_window(Duration::from_secs(600))
            .build()
            .unwrap();

        let reading = drilling("SNR-001");
        let first = engine.evaluate(&reading, true).await;
        let second = engine.evaluate(&reading, true).await;

        assert!(!first.alert_sent);
        assert_ne!(first.notification.unwrap().status, NotificationStatus::Suppressed);
        assert!(second.alert_sent);
        assert_eq!(*provider.calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_without_window_every_evaluation_notifies() {
        let provider = Arc::new(RecordingProvider::default());
        let docs = devices_with(&["token-aaaaaaaaaaaa"]).await;
        let engine = engine(Arc::new(MemoryTree::new()), docs, provider.clone())
            .build()
            .unwrap();

        engine.evaluate(&drilling("SNR-001"), true).await;
        engine.evaluate(&drilling("SNR-001"), true).await;
        assert_eq!(provider.payloads.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_evaluate_sensors_reports_missing() {
        let tree = Arc::new(MemoryTree::with_data(json!({
            "EcoWatch": {"sensors": {"SNR-001": {"-N1": drilling("SNR-001")}}}
        })));
        let engine = engine(
            tree,
            Arc::new(MemoryDocuments::new()),
            Arc::new(RecordingProvider::default()),
        )
        .build()
        .unwrap();

        let batch = engine
            .evaluate_sensors(&["SNR-001".to_string(), "SNR-404".to_string()], false)
            .await;

        assert_eq!(batch.total, 2);
        assert_eq!(batch.successful, 1);
        assert_eq!(batch.failed, 1);
        assert!(batch.results[0].outcome.as_ref().unwrap().prediction.is_alert);
        assert_eq!(batch.results[1].error.as_deref(), Some("Sensor not found"));

        let value = serde_json::to_value(&batch).unwrap();
        assert_eq!(value["results"][0]["prediction"]["class_label"], json!("Possible illegal mining activity"));
        assert_eq!(value["results"][0]["alert_sent"], json!(false));
    }

    #[tokio::test]
    async fn test_manual_alert() {
        let tree = Arc::new(MemoryTree::with_data(json!({
            "EcoWatch": {"sensors": {"SNR-002": {"-N1": drilling("SNR-002")}}}
        })));
        let provider = Arc::new(RecordingProvider::default());
        let docs = devices_with(&["token-aaaaaaaaaaaa", "token-bbbbbbbbbbbb"]).await;
        let engine = engine(tree, docs, provider.clone()).build().unwrap();

        let outcome = engine.manual_alert("SNR-002", false).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.tokens_found, 2);
        assert_eq!(outcome.message, "Notification sent to 2 device(s)");
        assert!(outcome.alert_logged);

        let payload = provider.payloads.lock().unwrap()[0].clone();
        assert_eq!(payload.title, "🚨 Alert - Sensor SNR-002");
        assert_eq!(payload.data["type"], MANUAL_ALERT_TYPE);

        let history = engine.alert_history(None, DEFAULT_ALERT_HISTORY_LIMIT).await.unwrap();
        assert_eq!(history.count, 1);
        assert_eq!(history.alerts[0].fields["sensor_data"]["sensor_id"], json!("SNR-002"));
    }

    #[tokio::test]
    async fn test_manual_alert_unknown_sensor() {
        let engine = engine(
            Arc::new(MemoryTree::new()),
            devices_with(&["token-aaaaaaaaaaaa"]).await,
            Arc::new(RecordingProvider::default()),
        )
        .build()
        .unwrap();

        let err = engine.manual_alert("SNR-404", false).await.unwrap_err();
        assert!(matches!(err, EngineError::SensorNotFound(_)));

        let forced = engine.manual_alert("SNR-404", true).await.unwrap();
        assert!(forced.success);
        assert_eq!(forced.tokens_found, 1);
    }

    #[tokio::test]
    async fn test_manual_alert_without_tokens() {
        let tree = Arc::new(MemoryTree::with_data(json!({
            "EcoWatch": {"sensors": {"SNR-002": {"-N1": drilling("SNR-002")}}}
        })));
        let engine = engine(
            tree,
            Arc::new(MemoryDocuments::new()),
            Arc::new(RecordingProvider::default()),
        )
        .build()
        .unwrap();

        let outcome = engine.manual_alert("SNR-002", false).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.tokens_found, 0);
        assert_eq!(outcome.error.as_deref(), Some(NO_TOKENS_ERROR));
    }

    #[tokio::test]
    async fn test_audit_failure_is_ignored() {
        struct NoAudit(MemoryDocuments);

        #[async_trait]
        impl DocumentStore for NoAudit {
            async fn list_all(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
                self.0.list_all(collection).await
            }
            async fn add(&self, _collection: &str, _fields: Record) -> Result<String, StoreError> {
                Err(StoreError::Unavailable("quota exceeded".into()))
            }
        }

        let docs = MemoryDocuments::new();
        let fields = json!({"fcmToken": "token-aaaaaaaaaaaa"}).as_object().unwrap().clone();
        docs.insert(paths::DEVICES_COLLECTION, "phone-1", fields).await;

        let engine = engine(
            Arc::new(MemoryTree::new()),
            Arc::new(NoAudit(docs)),
            Arc::new(RecordingProvider::default()),
        )
        .build()
        .unwrap();

        let outcome = engine.manual_alert("SNR-003", true).await.unwrap();
        assert!(outcome.success);
        assert!(!outcome.alert_logged);
    }

    #[test]
    fn test_builder_requires_collaborators() {
        let result = AlertEngine::builder().predictor(predictor()).build();
        assert!(result.is_err());
    }
}
