//! Server configuration

use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration, read from `ECOWATCH_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Name attached to every structured log event
    #[serde(default = "default_node_name")]
    pub node_name: String,

    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// ONNX classifier artifact
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,

    /// Model config JSON; defaults to `model_config.json` beside the model
    #[serde(default)]
    pub model_config_path: Option<PathBuf>,

    /// Window in which an identical alert is not re-sent; 0 disables it
    #[serde(default)]
    pub alert_dedup_window_secs: u64,

    /// Write automatic alerts to the audit log
    #[serde(default = "default_audit_alerts")]
    pub audit_alerts: bool,
}

fn default_node_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "ecowatch".to_string())
}

fn default_api_port() -> u16 {
    8000
}

fn default_model_path() -> PathBuf {
    PathBuf::from("models/mining_classifier.onnx")
}

fn default_audit_alerts() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            node_name: default_node_name(),
            api_port: default_api_port(),
            model_path: default_model_path(),
            model_config_path: None,
            alert_dedup_window_secs: 0,
            audit_alerts: default_audit_alerts(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("ECOWATCH"))
            .build()?;

        Ok(config.try_deserialize().unwrap_or_default())
    }

    pub fn dedup_window(&self) -> Option<Duration> {
        (self.alert_dedup_window_secs > 0).then(|| Duration::from_secs(self.alert_dedup_window_secs))
    }
}
