//! Alert event keys and the optional re-send window

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Hex characters kept from the digest
const EVENT_KEY_LEN: usize = 32;

/// Stable identity of an alert: one sensor, one reading, one decision
pub fn event_key(sensor_id: &str, reading_timestamp: &str, prediction: i64) -> String {
    let digest = Sha256::digest(format!("{}|{}|{}", sensor_id, reading_timestamp, prediction));
    let mut key = hex::encode(digest);
    key.truncate(EVENT_KEY_LEN);
    key
}

/// Remembers recently dispatched event keys for a fixed window
pub struct AlertDeduplicator {
    window: Duration,
    recent: Mutex<HashMap<String, Instant>>,
}

impl AlertDeduplicator {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            recent: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Claim a key for dispatch; false when it was claimed within the window
    ///
    /// Check and insert happen under one lock, so concurrent evaluations of
    /// the same event cannot both claim it.
    pub async fn try_claim(&self, key: &str) -> bool {
        let mut recent = self.recent.lock().await;
        recent.retain(|_, claimed| claimed.elapsed() < self.window);
        if recent.contains_key(key) {
            return false;
        }
        recent.insert(key.to_string(), Instant::now());
        true
    }

    /// Give a claim back after nothing was delivered
    pub async fn release(&self, key: &str) {
        self.recent.lock().await.remove(key);
    }

    pub async fn len(&self) -> usize {
        self.recent.lock().await.len()
    }
}
