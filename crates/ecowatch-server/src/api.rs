//! HTTP API: health, metrics, sensor readings, predictions and alerts

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use ecowatch_lib::{
    alert::{AlertEngine, DEFAULT_ALERT_HISTORY_LIMIT, MAX_ALERT_HISTORY_LIMIT},
    error::{EngineError, IngestError},
    health::{ComponentStatus, HealthRegistry},
    models::{Record, SensorReading},
    normalize::SortOrder,
    predictions::{DEFAULT_HISTORY_LIMIT, MAX_HISTORY_LIMIT},
};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub engine: Arc<AlertEngine>,
}

impl AppState {
    pub fn new(health_registry: HealthRegistry, engine: Arc<AlertEngine>) -> Self {
        Self {
            health_registry,
            engine,
        }
    }
}

/// JSON error body in the `{"detail": ...}` shape clients already parse
fn error_response(status: StatusCode, detail: impl Into<String>) -> Response {
    (status, Json(json!({ "detail": detail.into() }))).into_response()
}

fn internal_error(context: &str, err: impl std::fmt::Display) -> Response {
    error!(error = %err, "{}", context);
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("{}: {}", context, err),
    )
}

/// Returns 200 when healthy or degraded, 503 when unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return internal_error("Failed to encode metrics", e);
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

async fn create_reading(
    State(state): State<Arc<AppState>>,
    Json(reading): Json<SensorReading>,
) -> Response {
    match state.engine.sensors().ingest(&reading).await {
        Ok(receipt) => (StatusCode::CREATED, Json(receipt)).into_response(),
        Err(e @ IngestError::InvalidSensorId(_)) => {
            error_response(StatusCode::UNPROCESSABLE_ENTITY, e.to_string())
        }
        Err(e) => internal_error("Error storing sensor data", e),
    }
}

async fn list_sensors(State(state): State<Arc<AppState>>) -> Response {
    match state.engine.sensors().overview().await {
        Ok(sensors) => Json(json!({ "count": sensors.len(), "sensors": sensors })).into_response(),
        Err(e) => internal_error("Error fetching sensors", e),
    }
}

async fn latest_reading(
    State(state): State<Arc<AppState>>,
    Path(sensor_id): Path<String>,
) -> Response {
    match state.engine.sensors().latest_reading(&sensor_id).await {
        Ok(Some(reading)) => Json(reading).into_response(),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            format!("Sensor {} not found", sensor_id),
        ),
        Err(e) => internal_error("Error fetching sensor data", e),
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub order: Option<String>,
    pub limit: Option<usize>,
}

async fn sensor_history(
    State(state): State<Arc<AppState>>,
    Path(sensor_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let order = match query.order.as_deref().map(str::parse::<SortOrder>) {
        None => SortOrder::default(),
        Some(Ok(order)) => order,
        Some(Err(e)) => return error_response(StatusCode::UNPROCESSABLE_ENTITY, e),
    };

    match state
        .engine
        .sensors()
        .history(&sensor_id, order, query.limit)
        .await
    {
        Ok(history) => Json(json!({
            "sensor_id": sensor_id,
            "count": history.len(),
            "history": history,
        }))
        .into_response(),
        Err(e) => internal_error("Error fetching sensor history", e),
    }
}

#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    pub sensor_id: Option<String>,
    /// Evaluate this reading instead of the sensor's latest one
    pub sensor_data: Option<Record>,
    #[serde(default = "default_true")]
    pub auto_alert: bool,
}

#[derive(Debug, Deserialize)]
pub struct BatchPredictRequest {
    pub sensor_ids: Vec<String>,
    #[serde(default = "default_true")]
    pub auto_alert: bool,
}

fn default_true() -> bool {
    true
}

async fn predict(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PredictRequest>,
) -> Response {
    let reading = match (req.sensor_data, req.sensor_id.as_deref()) {
        (Some(mut reading), Some(sensor_id)) => {
            match reading.get("sensor_id").and_then(|v| v.as_str()) {
                Some(inline) if inline != sensor_id => {
                    return error_response(
                        StatusCode::UNPROCESSABLE_ENTITY,
                        format!(
                            "sensor_id {} does not match sensor_data.sensor_id {}",
                            sensor_id, inline
                        ),
                    )
                }
                _ => {
                    reading.insert("sensor_id".to_string(), json!(sensor_id));
                }
            }
            reading
        }
        (Some(reading), None) => reading,
        (None, Some(sensor_id)) => match state.engine.sensors().latest_reading(sensor_id).await {
            Ok(Some(reading)) => reading,
            Ok(None) => {
                return error_response(
                    StatusCode::NOT_FOUND,
                    EngineError::SensorNotFound(sensor_id.to_string()).to_string(),
                )
            }
            Err(e) => return internal_error("Prediction error", e),
        },
        (None, None) => {
            return error_response(
                StatusCode::UNPROCESSABLE_ENTITY,
                "Either sensor_id or sensor_data is required",
            )
        }
    };

    let outcome = state.engine.evaluate(&reading, req.auto_alert).await;
    let sensor_id = req
        .sensor_id
        .or_else(|| outcome.prediction.sensor_id.clone());

    let mut body = match serde_json::to_value(&outcome) {
        Ok(serde_json::Value::Object(map)) => map,
        Ok(_) => Record::new(),
        Err(e) => return internal_error("Prediction error", e),
    };
    body.insert("sensor_id".to_string(), json!(sensor_id));
    body.insert("status".to_string(), json!("success"));
    Json(body).into_response()
}

async fn predict_batch(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BatchPredictRequest>,
) -> Response {
    let batch = state
        .engine
        .evaluate_sensors(&req.sensor_ids, req.auto_alert)
        .await;
    Json(batch).into_response()
}

async fn model_info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.predictor().model_info())
}

async fn model_features(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let info = state.engine.predictor().model_info();
    Json(json!({
        "total_features": info.feature_names.len(),
        "feature_names": info.feature_names,
        "model_type": info.model_type,
    }))
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

async fn prediction_history(
    State(state): State<Arc<AppState>>,
    Path(sensor_id): Path<String>,
    Query(query): Query<LimitQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    if !(1..=MAX_HISTORY_LIMIT).contains(&limit) {
        return error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("limit must be between 1 and {}", MAX_HISTORY_LIMIT),
        );
    }

    match state.engine.predictions().history(&sensor_id, limit).await {
        Ok(history) => Json(history).into_response(),
        Err(e) => internal_error("Error fetching predictions", e),
    }
}

async fn alerts_summary(State(state): State<Arc<AppState>>) -> Response {
    match state.engine.predictions().alerts_summary().await {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => internal_error("Error getting alerts summary", e),
    }
}

#[derive(Debug, Deserialize)]
pub struct ManualAlertRequest {
    pub sensor_id: String,
    #[serde(default)]
    pub force: bool,
}

async fn send_alert(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ManualAlertRequest>,
) -> Response {
    info!(sensor_id = %req.sensor_id, force = req.force, "Manual alert requested");

    match state.engine.manual_alert(&req.sensor_id, req.force).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(EngineError::SensorNotFound(id)) => {
            warn!(sensor_id = %id, "Manual alert for unknown sensor");
            error_response(StatusCode::NOT_FOUND, format!("Sensor {} not found", id))
        }
        Err(e) => internal_error("Error sending alert", e),
    }
}

#[derive(Debug, Deserialize)]
pub struct AlertsQuery {
    pub sensor_id: Option<String>,
    pub limit: Option<usize>,
}

async fn list_alerts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AlertsQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(DEFAULT_ALERT_HISTORY_LIMIT);
    if !(1..=MAX_ALERT_HISTORY_LIMIT).contains(&limit) {
        return error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("limit must be between 1 and {}", MAX_ALERT_HISTORY_LIMIT),
        );
    }

    match state
        .engine
        .alert_history(query.sensor_id.as_deref(), limit)
        .await
    {
        Ok(history) => Json(json!({
            "success": true,
            "count": history.count,
            "alerts": history.alerts,
            "filter": { "sensor_id": history.sensor_id, "limit": history.limit },
        }))
        .into_response(),
        Err(e) => internal_error("Error fetching alerts", e),
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/sensors", get(list_sensors).post(create_reading))
        .route("/sensors/:sensor_id", get(latest_reading))
        .route("/sensors/:sensor_id/history", get(sensor_history))
        .route("/ml/predict", post(predict))
        .route("/ml/predict/batch", post(predict_batch))
        .route("/ml/model/info", get(model_info))
        .route("/ml/model/features", get(model_features))
        .route("/ml/predictions/:sensor_id", get(prediction_history))
        .route("/ml/alerts/summary", get(alerts_summary))
        .route("/notification/alerts", get(list_alerts).post(send_alert))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
