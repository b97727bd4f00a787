//! EcoWatch detector service
//!
//! Serves reading ingestion, mining-activity predictions and alert
//! dispatch over HTTP.

use anyhow::{Context, Result};
use ecowatch_lib::{
    alert::{AlertEngine, DryRunProvider},
    health::{Component, HealthRegistry},
    observability::{DetectorMetrics, StructuredLogger},
    storage::{MemoryDocuments, MemoryTree},
    ModelConfig, MiningPredictor,
};
use ecowatch_server::{api, config::ServerConfig};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting ecowatch-server");

    let config = ServerConfig::load()?;
    info!(node_name = %config.node_name, port = config.api_port, "Server configured");

    let health_registry = HealthRegistry::new();
    health_registry.register(Component::TreeStore).await;
    health_registry.register(Component::DocumentStore).await;
    health_registry.register(Component::Notifier).await;

    let predictor = Arc::new(load_predictor(&config)?);
    if predictor.is_loaded() {
        health_registry.register(Component::Classifier).await;
    } else {
        health_registry
            .set_degraded(Component::Classifier, "No model artifact loaded")
            .await;
    }

    let model_config = predictor.config().clone();
    let metrics = DetectorMetrics::new();
    metrics.set_model_version(&model_config.model_name, &model_config.version);

    let logger = StructuredLogger::new(&config.node_name);
    logger.log_startup(SERVICE_VERSION, &model_config.version, predictor.is_loaded());

    warn!("No storage backend configured, using in-memory stores and dry-run notifications");

    let mut builder = AlertEngine::builder()
        .predictor(predictor)
        .tree_store(Arc::new(MemoryTree::new()))
        .document_store(Arc::new(MemoryDocuments::new()))
        .push_provider(Arc::new(DryRunProvider))
        .audit_alerts(config.audit_alerts)
        .health(health_registry.clone())
        .node_name(config.node_name.clone());
    if let Some(window) = config.dedup_window() {
        builder = builder.dedup_window(window);
    }
    let engine = Arc::new(builder.build().context("Failed to build alert engine")?);

    let app_state = Arc::new(api::AppState::new(health_registry.clone(), engine));
    health_registry.set_ready(true).await;

    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    tokio::select! {
        result = api_handle => {
            result.context("API server task panicked")??;
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            logger.log_shutdown("SIGINT received");
        }
    }

    info!("Shutting down");
    Ok(())
}

/// A missing artifact starts the service without a model; a malformed one
/// is fatal
fn load_predictor(config: &ServerConfig) -> Result<MiningPredictor> {
    if !config.model_path.exists() {
        warn!(
            path = %config.model_path.display(),
            "Model artifact not found, predictions will report an error"
        );
        let model_config = match &config.model_config_path {
            Some(path) => ModelConfig::load_or_default(path),
            None => ModelConfig::load_or_default(ModelConfig::path_beside(&config.model_path)),
        };
        return Ok(MiningPredictor::without_model(model_config).with_model_path(config.model_path.clone()));
    }

    MiningPredictor::load(&config.model_path, config.model_config_path.as_deref())
        .with_context(|| format!("Failed to load model {}", config.model_path.display()))
}
