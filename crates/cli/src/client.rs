//! API client for the EcoWatch detector service

use anyhow::{Context, Result};
use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;
use url::Url;

/// Non-success answer from the service
#[derive(Error, Debug)]
#[error("API error ({status}): {detail}")]
pub struct ApiError {
    pub status: u16,
    pub detail: String,
}

pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    fn endpoint(&self, path: &str, query: &[(&str, String)]) -> Result<Url> {
        let mut url = self.base_url.join(path).context("Invalid path")?;
        if !query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));
        }
        Ok(url)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let url = self.endpoint(path, query)?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        Self::parse(response).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let url = self.endpoint(path, &[])?;

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .context("Failed to send request")?;

        Self::parse(response).await
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v.get("detail").and_then(Value::as_str).map(str::to_string))
                .unwrap_or(body);
            return Err(ApiError {
                status: status.as_u16(),
                detail,
            }
            .into());
        }

        response.json().await.context("Failed to parse response")
    }
}

// API request and response types

#[derive(Debug, Clone, Serialize)]
pub struct PredictRequest {
    pub sensor_id: String,
    pub auto_alert: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchPredictRequest {
    pub sensor_ids: Vec<String>,
    pub auto_alert: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManualAlertRequest {
    pub sensor_id: String,
    pub force: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub prediction: Option<i64>,
    pub class_label: String,
    #[serde(default)]
    pub confidence: Option<f64>,
    pub is_alert: bool,
    #[serde(default)]
    pub alert_level: Option<String>,
    pub timestamp: String,
    #[serde(default)]
    pub model_version: Option<String>,
    #[serde(default)]
    pub features_were_derived: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub persistence_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub status: String,
    #[serde(default)]
    pub event_key: Option<String>,
    #[serde(default)]
    pub success_count: usize,
    #[serde(default)]
    pub failure_count: usize,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictResponse {
    pub sensor_id: Option<String>,
    pub prediction: Prediction,
    #[serde(default)]
    pub notification: Option<Notification>,
    pub alert_sent: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEntry {
    pub sensor_id: String,
    pub success: bool,
    #[serde(default)]
    pub prediction: Option<Prediction>,
    #[serde(default)]
    pub alert_sent: Option<bool>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResponse {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<BatchEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionHistory {
    pub sensor_id: String,
    pub predictions: Vec<Prediction>,
    pub total: usize,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model_name: String,
    pub version: String,
    pub output_classes: BTreeMap<String, String>,
    pub threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub status: String,
    pub model_path: Option<String>,
    pub config: ModelConfig,
    pub model_type: String,
    pub feature_names: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsSummary {
    pub total_predictions: usize,
    pub alert_count: usize,
    pub normal_count: usize,
    pub sensors_with_alerts: Vec<String>,
    pub alert_percentage: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchResult {
    pub success_count: usize,
    pub failure_count: usize,
    pub total_tokens: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualAlertResponse {
    pub success: bool,
    pub sensor_id: String,
    pub tokens_found: usize,
    #[serde(default)]
    pub notification_result: Option<DispatchResult>,
    pub message: String,
    pub alert_logged: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEntry {
    pub id: String,
    pub sensor_id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: String,
    #[serde(default)]
    pub tokens_sent: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertList {
    pub alerts: Vec<AlertEntry>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorOverview {
    pub sensor_id: String,
    pub latest: Option<BTreeMap<String, Value>>,
    pub record_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorList {
    pub sensors: Vec<SensorOverview>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorHistory {
    pub sensor_id: String,
    pub history: Vec<BTreeMap<String, Value>>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: BTreeMap<String, ComponentHealth>,
}
