//! Recipient token resolution
//!
//! Tokens were registered in several places over the life of the system:
//! six legacy tree paths per sensor, plus a flat `devices` collection that
//! holds every registered phone. All of them are read and merged.

use crate::models::Record;
use crate::storage::{paths, DocumentStore, TreeStore};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Values left behind by clients that registered before obtaining a token
const PLACEHOLDER_TOKENS: [&str; 4] = ["null", "undefined", "none", "placeholder"];

pub struct TokenResolver {
    tree: Arc<dyn TreeStore>,
    documents: Arc<dyn DocumentStore>,
}

impl TokenResolver {
    pub fn new(tree: Arc<dyn TreeStore>, documents: Arc<dyn DocumentStore>) -> Self {
        Self { tree, documents }
    }

    /// Deduplicated tokens for a sensor, in first-seen order
    ///
    /// Without a sensor id only the device collection is read. Store
    /// failures on any single source are logged and skipped.
    pub async fn resolve_tokens(&self, sensor_id: Option<&str>) -> Vec<String> {
        let mut candidates = Vec::new();

        if let Some(sensor_id) = sensor_id {
            let from_tree = self.tree_tokens(sensor_id).await;
            debug!(sensor_id = %sensor_id, count = from_tree.len(), "Tokens from tree paths");
            candidates.extend(from_tree);
        }

        let from_devices = self.device_tokens().await;
        debug!(count = from_devices.len(), "Tokens from device collection");
        candidates.extend(from_devices);

        dedup_tokens(candidates)
    }

    async fn tree_tokens(&self, sensor_id: &str) -> Vec<String> {
        let mut found = Vec::new();
        for path in paths::token_paths(sensor_id) {
            match self.tree.get(&path).await {
                Ok(Some(node)) => collect_node_tokens(&node, &mut found),
                Ok(None) => {}
                Err(e) => warn!(path = %path, error = %e, "Token path unreadable, skipping"),
            }
        }
        found
    }

    async fn device_tokens(&self) -> Vec<String> {
        match self.documents.list_all(paths::DEVICES_COLLECTION).await {
            Ok(docs) => docs.iter().filter_map(|d| device_token(&d.fields)).collect(),
            Err(e) => {
                warn!(error = %e, "Device collection unreadable, skipping");
                Vec::new()
            }
        }
    }
}

/// First non-empty token field of a device document
fn device_token(fields: &Record) -> Option<String> {
    paths::TOKEN_FIELDS.iter().find_map(|field| {
        fields
            .get(*field)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
    })
}

/// Strings found in a token node: a bare string, a list, or a map whose
/// values are strings or token-bearing objects
fn collect_node_tokens(node: &Value, out: &mut Vec<String>) {
    match node {
        Value::String(s) => out.push(s.clone()),
        Value::Array(items) => out.extend(items.iter().filter_map(Value::as_str).map(str::to_string)),
        Value::Object(map) => {
            for value in map.values() {
                match value {
                    Value::String(s) => out.push(s.clone()),
                    Value::Object(entry) => match device_token(entry) {
                        Some(token) => out.push(token),
                        None => out.extend(
                            entry.values().filter_map(Value::as_str).map(str::to_string),
                        ),
                    },
                    _ => {}
                }
            }
        }
        _ => {}
    }
}

/// Trim, drop empty or placeholder values, keep first occurrence
pub fn dedup_tokens(candidates: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .filter(|t| !PLACEHOLDER_TOKENS.contains(&t.to_lowercase().as_str()))
        .filter(|t| seen.insert(t.clone()))
        .collect()
}
