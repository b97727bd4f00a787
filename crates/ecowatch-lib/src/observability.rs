//! Metrics and structured event logging
//!
//! Prometheus metrics are registered once in the default registry and shared
//! through a cheap [`DetectorMetrics`] handle. [`StructuredLogger`] emits the
//! detector's lifecycle and alert events with a stable `event` field.

use prometheus::{
    register_gauge_vec, register_histogram, register_int_counter, register_int_counter_vec,
    GaugeVec, Histogram, IntCounter, IntCounterVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Latency buckets in seconds
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
];

static GLOBAL_METRICS: OnceLock<Option<DetectorMetricsInner>> = OnceLock::new();

struct DetectorMetricsInner {
    prediction_latency_seconds: Histogram,
    predictions_generated: IntCounter,
    prediction_errors: IntCounter,
    alerts_detected: IntCounterVec,
    notifications_delivered: IntCounter,
    notification_failures: IntCounter,
    notifications_suppressed: IntCounter,
    persistence_errors: IntCounter,
    model_version_info: GaugeVec,
}

impl DetectorMetricsInner {
    fn try_new() -> prometheus::Result<Self> {
        Ok(Self {
            prediction_latency_seconds: register_histogram!(
                "ecowatch_prediction_latency_seconds",
                "Time spent extracting features and running the classifier",
                LATENCY_BUCKETS.to_vec()
            )?,
            predictions_generated: register_int_counter!(
                "ecowatch_predictions_generated_total",
                "Predictions that produced a class decision"
            )?,
            prediction_errors: register_int_counter!(
                "ecowatch_prediction_errors_total",
                "Predictions that returned an error-shaped result"
            )?,
            alerts_detected: register_int_counter_vec!(
                "ecowatch_alerts_detected_total",
                "Alert-worthy predictions by alert level",
                &["level"]
            )?,
            notifications_delivered: register_int_counter!(
                "ecowatch_notifications_delivered_total",
                "Push notifications accepted by the provider"
            )?,
            notification_failures: register_int_counter!(
                "ecowatch_notification_failures_total",
                "Push notifications that failed or were rejected"
            )?,
            notifications_suppressed: register_int_counter!(
                "ecowatch_notifications_suppressed_total",
                "Alerts not re-sent because of the dedup window"
            )?,
            persistence_errors: register_int_counter!(
                "ecowatch_persistence_errors_total",
                "Prediction writes that failed"
            )?,
            model_version_info: register_gauge_vec!(
                "ecowatch_model_version_info",
                "Currently loaded classifier",
                &["model_name", "version"]
            )?,
        })
    }
}

/// Handle to the process-wide detector metrics
///
/// Clones share the same underlying collectors. If registration failed the
/// handle is a no-op.
#[derive(Clone)]
pub struct DetectorMetrics {
    _private: (),
}

impl Default for DetectorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(|| match DetectorMetricsInner::try_new() {
            Ok(inner) => Some(inner),
            Err(e) => {
                warn!(error = %e, "Failed to register detector metrics");
                None
            }
        });
        Self { _private: () }
    }

    fn inner(&self) -> Option<&DetectorMetricsInner> {
        GLOBAL_METRICS.get().and_then(Option::as_ref)
    }

    pub fn observe_prediction_latency(&self, duration_secs: f64) {
        if let Some(m) = self.inner() {
            m.prediction_latency_seconds.observe(duration_secs);
        }
    }

    pub fn inc_predictions_generated(&self) {
        if let Some(m) = self.inner() {
            m.predictions_generated.inc();
        }
    }

    pub fn inc_prediction_errors(&self) {
        if let Some(m) = self.inner() {
            m.prediction_errors.inc();
        }
    }

    pub fn inc_alerts_detected(&self, level: &str) {
        if let Some(m) = self.inner() {
            m.alerts_detected.with_label_values(&[level]).inc();
        }
    }

    /// Add one dispatch's delivery counts
    pub fn record_dispatch(&self, delivered: usize, failed: usize) {
        if let Some(m) = self.inner() {
            m.notifications_delivered.inc_by(delivered as u64);
            m.notification_failures.inc_by(failed as u64);
        }
    }

    pub fn inc_notifications_suppressed(&self) {
        if let Some(m) = self.inner() {
            m.notifications_suppressed.inc();
        }
    }

    pub fn inc_persistence_errors(&self) {
        if let Some(m) = self.inner() {
            m.persistence_errors.inc();
        }
    }

    pub fn set_model_version(&self, model_name: &str, version: &str) {
        if let Some(m) = self.inner() {
            m.model_version_info.reset();
            m.model_version_info
                .with_label_values(&[model_name, version])
                .set(1.0);
        }
    }
}

/// Event logger with a fixed node name on every record
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn log_prediction(
        &self,
        sensor_id: &str,
        class_label: &str,
        confidence: Option<f64>,
        alert_level: Option<&str>,
        features_were_derived: bool,
        model_version: &str,
    ) {
        info!(
            event = "prediction_generated",
            node = %self.node_name,
            sensor_id = %sensor_id,
            class_label = %class_label,
            confidence = ?confidence,
            alert_level = ?alert_level,
            features_were_derived = features_were_derived,
            model_version = %model_version,
            "Prediction generated"
        );
    }

    pub fn log_alert_dispatched(
        &self,
        sensor_id: &str,
        alert_level: &str,
        event_key: &str,
        success_count: usize,
        failure_count: usize,
    ) {
        if success_count == 0 {
            warn!(
                event = "alert_dispatched",
                node = %self.node_name,
                sensor_id = %sensor_id,
                alert_level = %alert_level,
                event_key = %event_key,
                success_count = success_count,
                failure_count = failure_count,
                "Alert dispatched but no device accepted it"
            );
        } else {
            info!(
                event = "alert_dispatched",
                node = %self.node_name,
                sensor_id = %sensor_id,
                alert_level = %alert_level,
                event_key = %event_key,
                success_count = success_count,
                failure_count = failure_count,
                "Alert dispatched"
            );
        }
    }

    pub fn log_no_recipients(&self, sensor_id: &str) {
        warn!(
            event = "alert_no_recipients",
            node = %self.node_name,
            sensor_id = %sensor_id,
            "Alert raised but no device tokens are registered"
        );
    }

    pub fn log_alert_suppressed(&self, sensor_id: &str, event_key: &str) {
        info!(
            event = "alert_suppressed",
            node = %self.node_name,
            sensor_id = %sensor_id,
            event_key = %event_key,
            "Alert already sent within the dedup window"
        );
    }

    pub fn log_startup(&self, version: &str, model_version: &str, model_loaded: bool) {
        info!(
            event = "service_started",
            node = %self.node_name,
            service_version = %version,
            model_version = %model_version,
            model_loaded = model_loaded,
            "EcoWatch detector started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "service_shutdown",
            node = %self.node_name,
            reason = %reason,
            "EcoWatch detector shutting down"
        );
    }
}
