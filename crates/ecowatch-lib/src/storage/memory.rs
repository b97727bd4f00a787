//! In-memory store backends

use super::{segments, Document, DocumentStore, TreeStore};
use crate::error::StoreError;
use crate::models::Record;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// Tree store held in a single JSON document
#[derive(Debug, Default)]
pub struct MemoryTree {
    root: RwLock<Map<String, Value>>,
    push_counter: AtomicU64,
}

impl MemoryTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing JSON tree; non-object values give an empty tree
    pub fn with_data(data: Value) -> Self {
        Self {
            root: RwLock::new(into_map(data)),
            push_counter: AtomicU64::new(0),
        }
    }

    /// Copy of the whole tree
    pub async fn snapshot(&self) -> Value {
        Value::Object(self.root.read().await.clone())
    }

    /// Keys sort in push order: milliseconds then a per-store counter
    fn next_push_key(&self) -> String {
        let millis = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let seq = self.push_counter.fetch_add(1, Ordering::Relaxed) & 0x0fff_ffff;
        format!("-{:013x}{:07x}", millis, seq)
    }
}

#[async_trait]
impl TreeStore for MemoryTree {
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        let root = self.root.read().await;
        let parts = segments(path);

        let Some((first, rest)) = parts.split_first() else {
            return Ok(Some(Value::Object(root.clone())).filter(|v| !is_empty_object(v)));
        };

        let mut node = match root.get(*first) {
            Some(v) => v,
            None => return Ok(None),
        };
        for seg in rest {
            node = match child(node, seg) {
                Some(v) => v,
                None => return Ok(None),
            };
        }

        Ok(Some(node.clone()).filter(|v| !v.is_null()))
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError> {
        let parts = segments(path);
        if parts.is_empty() {
            return Err(StoreError::InvalidPath(path.to_string()));
        }
        let mut root = self.root.write().await;
        set_in(&mut root, &parts, value);
        Ok(())
    }

    async fn push(&self, path: &str, value: Value) -> Result<String, StoreError> {
        let mut parts = segments(path);
        if parts.is_empty() {
            return Err(StoreError::InvalidPath(path.to_string()));
        }
        let key = self.next_push_key();
        parts.push(&key);

        let mut root = self.root.write().await;
        set_in(&mut root, &parts, value);
        Ok(key)
    }
}

fn is_empty_object(value: &Value) -> bool {
    value.as_object().is_some_and(Map::is_empty)
}

fn child<'a>(node: &'a Value, seg: &str) -> Option<&'a Value> {
    match node {
        Value::Object(map) => map.get(seg),
        Value::Array(items) => seg.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

/// Arrays become index-keyed maps once a child is written, scalars are replaced
fn into_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v))
            .collect(),
        _ => Map::new(),
    }
}

fn set_in(map: &mut Map<String, Value>, parts: &[&str], value: Value) {
    let Some((first, rest)) = parts.split_first() else {
        return;
    };

    if rest.is_empty() {
        if value.is_null() {
            map.remove(*first);
        } else {
            map.insert(first.to_string(), value);
        }
        return;
    }

    if value.is_null() && !map.contains_key(*first) {
        return;
    }

    let entry = map
        .entry(first.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
        *entry = Value::Object(into_map(entry.take()));
    }
    if let Value::Object(child_map) = entry {
        set_in(child_map, rest, value);
    }
}

/// Flat collections of documents
#[derive(Debug, Default)]
pub struct MemoryDocuments {
    collections: RwLock<HashMap<String, Vec<Document>>>,
    id_counter: AtomicU64,
}

impl MemoryDocuments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a document under a caller-chosen id
    pub async fn insert(&self, collection: &str, id: impl Into<String>, fields: Record) {
        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .push(Document {
                id: id.into(),
                fields,
            });
    }
}

#[async_trait]
impl DocumentStore for MemoryDocuments {
    async fn list_all(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .cloned()
            .unwrap_or_default())
    }

    async fn add(&self, collection: &str, fields: Record) -> Result<String, StoreError> {
        let id = format!("doc-{:08}", self.id_counter.fetch_add(1, Ordering::Relaxed));
        self.insert(collection, id.clone(), fields).await;
        Ok(id)
    }
}
