//! Notification fan-out
//!
//! Tokens are filtered, split into provider-sized batches and sent one batch
//! at a time. A batch that fails as a whole counts all of its tokens as
//! failed and the remaining batches still go out.

use crate::error::ProviderError;
use crate::models::NotificationPayload;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Largest multicast the provider accepts
pub const MAX_BATCH_SIZE: usize = 500;

/// Tokens of this length or shorter are never sent
pub const MIN_TOKEN_LEN: usize = 10;

/// Failure samples kept in a report
pub const MAX_FAILURE_SAMPLES: usize = 5;

/// Characters of a token shown in a failure sample
const TOKEN_PREVIEW_CHARS: usize = 20;

/// Delivery result for one token of a batch
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryResult {
    pub success: bool,
    pub error: Option<String>,
}

impl DeliveryResult {
    pub fn delivered() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Provider answer for one batch, one entry per token in send order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchResponse {
    pub responses: Vec<DeliveryResult>,
}

/// Multicast push provider
#[async_trait]
pub trait PushProvider: Send + Sync {
    /// Send one batch of at most [`MAX_BATCH_SIZE`] tokens
    async fn send_batch(
        &self,
        tokens: &[String],
        payload: &NotificationPayload,
    ) -> Result<BatchResponse, ProviderError>;
}

/// Provider that only logs, used when no transport is configured
#[derive(Debug, Clone, Default)]
pub struct DryRunProvider;

#[async_trait]
impl PushProvider for DryRunProvider {
    async fn send_batch(
        &self,
        tokens: &[String],
        payload: &NotificationPayload,
    ) -> Result<BatchResponse, ProviderError> {
        info!(
            tokens = tokens.len(),
            title = %payload.title,
            body = %payload.body,
            "Dry-run push batch"
        );
        Ok(BatchResponse {
            responses: tokens.iter().map(|_| DeliveryResult::delivered()).collect(),
        })
    }
}

/// A sampled delivery failure; never carries a full token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedDelivery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_token: Option<String>,
    /// 1-based batch number for whole-batch failures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<usize>,
    pub error_reason: String,
}

/// Aggregated outcome of one dispatch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchReport {
    pub success_count: usize,
    pub failure_count: usize,
    pub total_tokens: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_tokens: Option<Vec<FailedDelivery>>,
    /// Set only when nothing could be attempted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DispatchReport {
    fn rejected(error: &str) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::default()
        }
    }

    fn sample_failure(&mut self, failure: FailedDelivery) {
        let samples = self.failed_tokens.get_or_insert_with(Vec::new);
        if samples.len() < MAX_FAILURE_SAMPLES {
            samples.push(failure);
        }
    }
}

pub struct NotificationDispatcher {
    provider: Arc<dyn PushProvider>,
    batch_size: usize,
}

impl NotificationDispatcher {
    pub fn new(provider: Arc<dyn PushProvider>) -> Self {
        Self {
            provider,
            batch_size: MAX_BATCH_SIZE,
        }
    }

    /// Smaller batches, capped at the provider maximum
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.clamp(1, MAX_BATCH_SIZE);
        self
    }

    /// Send `payload` to every valid token; never fails
    pub async fn dispatch(&self, tokens: &[String], payload: &NotificationPayload) -> DispatchReport {
        if tokens.is_empty() {
            return DispatchReport::rejected("no tokens provided");
        }

        let valid: Vec<String> = tokens
            .iter()
            .filter(|t| t.chars().count() > MIN_TOKEN_LEN)
            .cloned()
            .collect();
        if valid.is_empty() {
            return DispatchReport::rejected("no valid tokens provided");
        }

        let mut report = DispatchReport {
            total_tokens: valid.len(),
            ..DispatchReport::default()
        };

        for (index, batch) in valid.chunks(self.batch_size).enumerate() {
            let batch_number = index + 1;
            match self.provider.send_batch(batch, payload).await {
                Ok(response) => {
                    let (ok, failed) = self.tally_batch(batch, &response, &mut report);
                    debug!(batch = batch_number, success = ok, failed = failed, "Push batch sent");
                }
                Err(e) => {
                    warn!(batch = batch_number, tokens = batch.len(), error = %e, "Push batch failed");
                    report.failure_count += batch.len();
                    report.sample_failure(FailedDelivery {
                        partial_token: None,
                        batch: Some(batch_number),
                        error_reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            total = report.total_tokens,
            success = report.success_count,
            failed = report.failure_count,
            "Notification dispatch complete"
        );
        report
    }

    /// Count one batch; tokens without a response entry count as failed
    fn tally_batch(
        &self,
        batch: &[String],
        response: &BatchResponse,
        report: &mut DispatchReport,
    ) -> (usize, usize) {
        let mut ok = 0;
        for (i, token) in batch.iter().enumerate() {
            match response.responses.get(i) {
                Some(result) if result.success => ok += 1,
                other => {
                    let reason = other
                        .and_then(|r| r.error.clone())
                        .unwrap_or_else(|| "Unknown error".to_string());
                    report.sample_failure(FailedDelivery {
                        partial_token: Some(token_preview(token)),
                        batch: None,
                        error_reason: reason,
                    });
                }
            }
        }
        let failed = batch.len() - ok;
        report.success_count += ok;
        report.failure_count += failed;
        (ok, failed)
    }
}

/// Leading characters of a token, at most half of it
fn token_preview(token: &str) -> String {
    let len = token.chars().count();
    let shown: String = token.chars().take(TOKEN_PREVIEW_CHARS.min(len / 2)).collect();
    format!("{}...", shown)
}
