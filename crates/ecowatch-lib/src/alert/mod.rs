//! Alert evaluation and notification delivery

pub mod dedup;
pub mod dispatcher;
pub mod engine;
pub mod tokens;

pub use dedup::{event_key, AlertDeduplicator};
pub use dispatcher::{
    BatchResponse, DeliveryResult, DispatchReport, DryRunProvider, FailedDelivery,
    NotificationDispatcher, PushProvider, MAX_BATCH_SIZE,
};
pub use engine::{
    AlertEngine, AlertEngineBuilder, AlertHistory, AlertRecord, BatchEvaluation,
    EvaluationOutcome, ManualAlertOutcome, NotificationOutcome, NotificationStatus,
    SensorEvaluation, DEFAULT_ALERT_HISTORY_LIMIT, MAX_ALERT_HISTORY_LIMIT, NO_TOKENS_ERROR,
};
pub use tokens::{dedup_tokens, TokenResolver};
