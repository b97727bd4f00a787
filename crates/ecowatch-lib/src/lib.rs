//! EcoWatch detection library
//!
//! This crate provides the core functionality for:
//! - Normalizing sensor histories stored in several legacy shapes
//! - Mining activity classification from seismic features
//! - Alert evaluation, recipient resolution and notification fan-out
//! - Health checks and observability

pub mod alert;
pub mod config;
pub mod error;
pub mod health;
pub mod models;
pub mod normalize;
pub mod observability;
pub mod predictions;
pub mod predictor;
pub mod sensors;
pub mod storage;

pub use alert::{AlertEngine, AlertEngineBuilder, EvaluationOutcome, NotificationOutcome};
pub use config::ModelConfig;
pub use health::{
    Component, ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse,
    ReadinessResponse,
};
pub use models::*;
pub use observability::{DetectorMetrics, StructuredLogger};
pub use predictor::MiningPredictor;
