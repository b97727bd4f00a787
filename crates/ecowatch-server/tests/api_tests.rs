//! Integration tests for the detector API endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use ecowatch_lib::{
    alert::{AlertEngine, DryRunProvider},
    error::ClassifierError,
    health::{Component, HealthRegistry},
    predictor::{Classification, Classifier, FeatureFrame},
    storage::{paths, MemoryDocuments, MemoryTree},
    MiningPredictor, ModelConfig, FEATURE_COLUMNS,
};
use ecowatch_server::api::{create_router, AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

/// Answers "mining" whenever the amplitude is below the normal floor
struct ThresholdClassifier {
    columns: Vec<String>,
}

impl Classifier for ThresholdClassifier {
    fn input_columns(&self) -> &[String] {
        &self.columns
    }

    fn model_type(&self) -> &str {
        "ThresholdClassifier"
    }

    fn classify(&self, frame: &FeatureFrame) -> Result<Classification, ClassifierError> {
        let mining = frame.values()[0] < 1e-4;
        Ok(Classification {
            class_index: i64::from(mining),
            probabilities: Some(if mining { vec![0.05, 0.95] } else { vec![0.9, 0.1] }),
        })
    }
}

struct TestApp {
    router: Router,
    state: Arc<AppState>,
    devices: Arc<MemoryDocuments>,
}

async fn setup_test_app() -> TestApp {
    let health_registry = HealthRegistry::new();
    health_registry.register(Component::Classifier).await;
    health_registry.register(Component::TreeStore).await;

    let classifier = ThresholdClassifier {
        columns: FEATURE_COLUMNS.iter().map(|c| c.to_string()).collect(),
    };
    let predictor = MiningPredictor::new(Arc::new(classifier), ModelConfig::default()).unwrap();
    let devices = Arc::new(MemoryDocuments::new());

    let engine = AlertEngine::builder()
        .predictor(Arc::new(predictor))
        .tree_store(Arc::new(MemoryTree::new()))
        .document_store(devices.clone())
        .push_provider(Arc::new(DryRunProvider))
        .audit_alerts(true)
        .health(health_registry.clone())
        .build()
        .unwrap();

    let state = Arc::new(AppState::new(health_registry, Arc::new(engine)));
    TestApp {
        router: create_router(state.clone()),
        state,
        devices,
    }
}

impl TestApp {
    async fn request(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn register_device(&self, id: &str, token: &str) {
        let fields = json!({ "fcmToken": token }).as_object().unwrap().clone();
        self.devices
            .insert(paths::DEVICES_COLLECTION, id, fields)
            .await;
    }
}

fn reading(sensor_id: &str, timestamp: &str, activity: &str, amplitude: Option<f64>) -> Value {
    let mut reading = json!({
        "sensor_id": sensor_id,
        "timestamp": timestamp,
        "activity": activity,
        "battery": 76.0,
        "signal_strength": "strong",
        "status": "active",
        "isActive": true,
        "isTriggered": activity == "drilling",
    });
    if let Some(amplitude) = amplitude {
        reading["Max_Amplitude"] = json!(amplitude);
        reading["RMS_Ratio"] = json!(1.1);
        reading["Power_Ratio"] = json!(0.2);
    }
    reading
}

#[tokio::test]
async fn test_healthz_and_readyz() {
    let app = setup_test_app().await;

    let (status, health) = app.request("GET", "/healthz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");
    assert!(health["components"]["classifier"].is_object());

    let (status, readiness) = app.request("GET", "/readyz", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(readiness["ready"], false);

    app.state.health_registry.set_ready(true).await;
    let (status, _) = app.request("GET", "/readyz", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_healthz_degraded_and_unhealthy() {
    let app = setup_test_app().await;

    app.state
        .health_registry
        .set_degraded(Component::TreeStore, "slow writes")
        .await;
    let (status, health) = app.request("GET", "/healthz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "degraded");

    app.state
        .health_registry
        .set_unhealthy(Component::Classifier, "artifact missing")
        .await;
    let (status, health) = app.request("GET", "/healthz", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(health["status"], "unhealthy");
}

#[tokio::test]
async fn test_create_reading_validates_sensor_id() {
    let app = setup_test_app().await;

    let (status, receipt) = app
        .request(
            "POST",
            "/sensors",
            Some(reading("SNR-001", "2024-05-01T10:00:00Z", "idle", None)),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(receipt["message"], "Sensor data stored successfully");

    let (status, body) = app
        .request(
            "POST",
            "/sensors",
            Some(reading("SENSOR_1", "2024-05-01T10:00:00Z", "idle", None)),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["detail"].as_str().unwrap().contains("SENSOR_1"));
}

#[tokio::test]
async fn test_sensor_history_and_latest() {
    let app = setup_test_app().await;
    for (ts, activity) in [
        ("2024-05-01T10:00:00Z", "idle"),
        ("2024-05-01T12:00:00Z", "drilling"),
        ("2024-05-01T11:00:00Z", "vibration"),
    ] {
        app.request("POST", "/sensors", Some(reading("SNR-001", ts, activity, None)))
            .await;
    }

    let (status, latest) = app.request("GET", "/sensors/SNR-001", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(latest["activity"], "drilling");

    let (_, history) = app
        .request("GET", "/sensors/SNR-001/history?order=asc&limit=2", None)
        .await;
    assert_eq!(history["count"], 2);
    assert_eq!(history["history"][0]["activity"], "idle");
    assert_eq!(history["history"][1]["activity"], "vibration");

    let (status, _) = app
        .request("GET", "/sensors/SNR-001/history?order=sideways", None)
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (_, sensors) = app.request("GET", "/sensors", None).await;
    assert_eq!(sensors["count"], 1);
    assert_eq!(sensors["sensors"][0]["record_count"], 3);

    let (status, _) = app.request("GET", "/sensors/SNR-404", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_predict_without_recipients() {
    let app = setup_test_app().await;
    app.request(
        "POST",
        "/sensors",
        Some(reading("SNR-007", "2024-05-01T10:00:00Z", "drilling", None)),
    )
    .await;

    let (status, body) = app
        .request(
            "POST",
            "/ml/predict",
            Some(json!({ "sensor_id": "SNR-007", "auto_alert": true })),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["sensor_id"], "SNR-007");
    assert_eq!(body["alert_sent"], false);
    assert_eq!(body["prediction"]["is_alert"], true);
    assert_eq!(body["prediction"]["features_were_derived"], true);
    assert_eq!(body["notification"]["status"], "no_tokens");
    assert!(body["notification"]["error"]
        .as_str()
        .unwrap()
        .contains("no tokens"));

    let (_, history) = app.request("GET", "/ml/predictions/SNR-007", None).await;
    assert_eq!(history["total"], 1);
    assert_eq!(history["predictions"][0]["is_alert"], true);
}

#[tokio::test]
async fn test_predict_sends_alert_to_registered_devices() {
    let app = setup_test_app().await;
    app.register_device("phone-1", "token-aaaaaaaaaaaa").await;
    app.request(
        "POST",
        "/sensors",
        Some(reading("SNR-003", "2024-05-01T10:00:00Z", "drilling", Some(2e-5))),
    )
    .await;

    let (_, body) = app
        .request("POST", "/ml/predict", Some(json!({ "sensor_id": "SNR-003" })))
        .await;

    assert_eq!(body["alert_sent"], true);
    assert_eq!(body["prediction"]["features_were_derived"], false);
    assert_eq!(body["prediction"]["alert_level"], "high");
    assert_eq!(body["notification"]["success_count"], 1);

    let (_, alerts) = app
        .request("GET", "/notification/alerts?sensor_id=SNR-003", None)
        .await;
    assert_eq!(alerts["success"], true);
    assert_eq!(alerts["count"], 1);
    assert_eq!(alerts["alerts"][0]["type"], "mining_detection");
    assert_eq!(alerts["filter"]["limit"], 50);
}

#[tokio::test]
async fn test_predict_inline_reading() {
    let app = setup_test_app().await;

    let (status, body) = app
        .request(
            "POST",
            "/ml/predict",
            Some(json!({
                "sensor_data": reading("SNR-010", "2024-05-01T10:00:00Z", "idle", Some(3e-3)),
                "auto_alert": false
            })),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sensor_id"], "SNR-010");
    assert_eq!(body["prediction"]["is_alert"], false);
    assert_eq!(body["prediction"]["alert_level"], Value::Null);
    assert!(body.get("notification").is_none());
}

#[tokio::test]
async fn test_predict_inline_reading_takes_request_sensor_id() {
    let app = setup_test_app().await;

    let (status, body) = app
        .request(
            "POST",
            "/ml/predict",
            Some(json!({
                "sensor_id": "SNR-005",
                "sensor_data": {"activity": "drilling", "isTriggered": true},
                "auto_alert": false
            })),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sensor_id"], "SNR-005");
    assert_eq!(body["prediction"]["sensor_id"], "SNR-005");

    let (status, history) = app.request("GET", "/ml/predictions/SNR-005", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history["total"], 1);
}

#[tokio::test]
async fn test_predict_rejects_conflicting_sensor_ids() {
    let app = setup_test_app().await;

    let (status, body) = app
        .request(
            "POST",
            "/ml/predict",
            Some(json!({
                "sensor_id": "SNR-005",
                "sensor_data": reading("SNR-006", "2024-05-01T10:00:00Z", "idle", Some(3e-3)),
            })),
        )
        .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["detail"].as_str().unwrap().contains("SNR-006"));

    let (_, history) = app.request("GET", "/ml/predictions/SNR-006", None).await;
    assert_eq!(history["total"], 0);
}

#[tokio::test]
async fn test_predict_unknown_sensor() {
    let app = setup_test_app().await;

    let (status, body) = app
        .request("POST", "/ml/predict", Some(json!({ "sensor_id": "SNR-404" })))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["detail"], "Sensor SNR-404 not found or has no data");

    let (status, _) = app.request("POST", "/ml/predict", Some(json!({}))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_batch_predict_and_summary() {
    let app = setup_test_app().await;
    app.request(
        "POST",
        "/sensors",
        Some(reading("SNR-001", "2024-05-01T10:00:00Z", "drilling", None)),
    )
    .await;
    app.request(
        "POST",
        "/sensors",
        Some(reading("SNR-002", "2024-05-01T10:00:00Z", "idle", Some(4e-3))),
    )
    .await;

    let (_, batch) = app
        .request(
            "POST",
            "/ml/predict/batch",
            Some(json!({ "sensor_ids": ["SNR-001", "SNR-002", "SNR-404"], "auto_alert": false })),
        )
        .await;
    assert_eq!(batch["total"], 3);
    assert_eq!(batch["successful"], 2);
    assert_eq!(batch["failed"], 1);
    assert_eq!(batch["results"][2]["error"], "Sensor not found");

    let (_, summary) = app.request("GET", "/ml/alerts/summary", None).await;
    assert_eq!(summary["total_predictions"], 2);
    assert_eq!(summary["alert_count"], 1);
    assert_eq!(summary["sensors_with_alerts"], json!(["SNR-001"]));
    assert_eq!(summary["alert_percentage"], 50.0);
}

#[tokio::test]
async fn test_prediction_history_limit_validation() {
    let app = setup_test_app().await;

    let (status, _) = app
        .request("GET", "/ml/predictions/SNR-001?limit=0", None)
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = app
        .request("GET", "/ml/predictions/SNR-001?limit=101", None)
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, body) = app.request("GET", "/ml/predictions/SNR-001", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 0);
    assert_eq!(body["message"], "No predictions found for this sensor");
}

#[tokio::test]
async fn test_manual_alert() {
    let app = setup_test_app().await;

    let (status, body) = app
        .request(
            "POST",
            "/notification/alerts",
            Some(json!({ "sensor_id": "SNR-005" })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["detail"], "Sensor SNR-005 not found");

    let (_, body) = app
        .request(
            "POST",
            "/notification/alerts",
            Some(json!({ "sensor_id": "SNR-005", "force": true })),
        )
        .await;
    assert_eq!(body["success"], false);
    assert_eq!(body["tokens_found"], 0);

    app.register_device("phone-1", "token-aaaaaaaaaaaa").await;
    app.register_device("phone-2", "token-bbbbbbbbbbbb").await;
    let (status, body) = app
        .request(
            "POST",
            "/notification/alerts",
            Some(json!({ "sensor_id": "SNR-005", "force": true })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["tokens_found"], 2);
    assert_eq!(body["message"], "Notification sent to 2 device(s)");
    assert_eq!(body["alert_logged"], true);
    assert_eq!(body["notification_result"]["success_count"], 2);

    let (_, alerts) = app.request("GET", "/notification/alerts", None).await;
    assert_eq!(alerts["count"], 1);
    assert_eq!(alerts["alerts"][0]["type"], "manual_alert");

    let (status, _) = app
        .request("GET", "/notification/alerts?limit=501", None)
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_model_info() {
    let app = setup_test_app().await;

    let (_, info) = app.request("GET", "/ml/model/info", None).await;
    assert_eq!(info["status"], "loaded");
    assert_eq!(info["model_type"], "ThresholdClassifier");
    assert_eq!(info["config"]["output_classes"]["1"], "Possible illegal mining activity");

    let (_, features) = app.request("GET", "/ml/model/features", None).await;
    assert_eq!(features["total_features"], 3);
    assert_eq!(
        features["feature_names"],
        json!(["Max_Amplitude", "RMS_Ratio", "Power_Ratio"])
    );
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    let app = setup_test_app().await;
    app.request(
        "POST",
        "/ml/predict",
        Some(json!({
            "sensor_data": reading("SNR-001", "2024-05-01T10:00:00Z", "idle", None),
            "auto_alert": false
        })),
    )
    .await;

    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let metrics_text = String::from_utf8(body.to_vec()).unwrap();

    assert!(metrics_text.contains("ecowatch_prediction_latency_seconds_bucket"));
    assert!(metrics_text.contains("ecowatch_predictions_generated_total"));
}
