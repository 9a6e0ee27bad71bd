//! In-process document broker.
//!
//! Several stores in one process can share an `Arc<MemoryBroker>` to behave
//! like separate devices on one remote store. Every write wakes every
//! subscriber, so subscribers see duplicate snapshots of unchanged prefixes;
//! this is the delivery behaviour consumers must tolerate anyway.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch};
use tracing::trace;

use super::{lock, path_matches, DocumentBroker, Snapshot, SUBSCRIPTION_BUFFER};
use crate::error::{Error, Result};

const NAME: &str = "memory";

/// A document store held in memory.
#[derive(Debug)]
pub struct MemoryBroker {
    docs: Arc<Mutex<BTreeMap<String, Value>>>,
    version: watch::Sender<u64>,
    offline: AtomicBool,
    writes: AtomicU64,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    /// Create an empty broker.
    #[must_use]
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            docs: Arc::new(Mutex::new(BTreeMap::new())),
            version,
            offline: AtomicBool::new(false),
            writes: AtomicU64::new(0),
        }
    }

    /// Make every write fail until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Read one document.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<Value> {
        lock(&self.docs).get(path).cloned()
    }

    /// Number of stored documents.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.docs).len()
    }

    /// Check if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock(&self.docs).is_empty()
    }

    /// Number of writes that succeeded.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn ensure_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::broker(NAME, "offline"));
        }
        Ok(())
    }

    fn commit(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.version.send_modify(|v| *v += 1);
    }
}

fn snapshot(docs: &Mutex<BTreeMap<String, Value>>, prefix: &str) -> Snapshot {
    lock(docs)
        .iter()
        .filter(|(path, _)| path_matches(path, prefix))
        .map(|(path, value)| (path.clone(), value.clone()))
        .collect()
}

#[async_trait::async_trait]
impl DocumentBroker for MemoryBroker {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn set(&self, path: &str, value: Value) -> Result<()> {
        self.ensure_online()?;
        lock(&self.docs).insert(path.to_string(), value);
        self.commit();
        Ok(())
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<()> {
        self.ensure_online()?;
        {
            let mut docs = lock(&self.docs);
            let entry = docs
                .entry(path.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(existing) = entry {
                existing.extend(fields);
            } else {
                *entry = Value::Object(fields);
            }
        }
        self.commit();
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<()> {
        self.ensure_online()?;
        lock(&self.docs).remove(path);
        self.commit();
        Ok(())
    }

    async fn remove_prefix(&self, prefix: &str) -> Result<usize> {
        self.ensure_online()?;
        let removed = {
            let mut docs = lock(&self.docs);
            let before = docs.len();
            docs.retain(|path, _| !path_matches(path, prefix));
            before - docs.len()
        };
        self.commit();
        Ok(removed)
    }

    fn subscribe(&self, prefix: &str) -> mpsc::Receiver<Snapshot> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let docs = Arc::clone(&self.docs);
        let mut changes = self.version.subscribe();
        let prefix = prefix.to_string();

        tokio::spawn(async move {
            loop {
                let current = snapshot(&docs, &prefix);
                trace!(prefix = %prefix, documents = current.len(), "memory snapshot");
                if tx.send(current).await.is_err() {
                    break;
                }
                if changes.changed().await.is_err() {
                    break;
                }
            }
        });

        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_get_remove() {
        let broker = MemoryBroker::new();
        broker.set("state/nextWaypoint", json!({"id": "kokura"})).await.unwrap();
        assert_eq!(broker.get("state/nextWaypoint").unwrap()["id"], "kokura");

        broker.remove("state/nextWaypoint").await.unwrap();
        assert!(broker.get("state/nextWaypoint").is_none());

        // Removing a missing document is fine.
        broker.remove("state/nextWaypoint").await.unwrap();
        assert_eq!(broker.write_count(), 3);
    }

    #[tokio::test]
    async fn test_update_merges_fields() {
        let broker = MemoryBroker::new();
        broker
            .set("expenses/a", json!({"title": "Gas", "amount": 1}))
            .await
            .unwrap();

        let mut fields = Map::new();
        fields.insert("amount".to_string(), json!(2));
        broker.update("expenses/a", fields).await.unwrap();

        assert_eq!(broker.get("expenses/a").unwrap(), json!({"title": "Gas", "amount": 2}));
    }

    #[tokio::test]
    async fn test_update_creates_missing_document() {
        let broker = MemoryBroker::new();
        let mut fields = Map::new();
        fields.insert("amount".to_string(), json!(2));
        broker.update("expenses/ghost", fields).await.unwrap();
        assert_eq!(broker.get("expenses/ghost").unwrap(), json!({"amount": 2}));
    }

    #[tokio::test]
    async fn test_remove_prefix() {
        let broker = MemoryBroker::new();
        broker.set("expenses/a", json!(1)).await.unwrap();
        broker.set("expenses/b", json!(2)).await.unwrap();
        broker.set("expensesX", json!(3)).await.unwrap();
        broker.set("state/nextWaypoint", json!(4)).await.unwrap();

        assert_eq!(broker.remove_prefix("expenses").await.unwrap(), 2);
        assert_eq!(broker.len(), 2);
    }

    #[tokio::test]
    async fn test_offline_writes_fail() {
        let broker = MemoryBroker::new();
        broker.set_offline(true);
        let err = broker.set("a", json!(1)).await.unwrap_err();
        assert!(err.is_broker_error());
        assert!(broker.is_empty());
        assert_eq!(broker.write_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribe_initial_and_changes() {
        let broker = MemoryBroker::new();
        broker.set("expenses/a", json!(1)).await.unwrap();

        let mut rx = broker.subscribe("expenses");
        let first = rx.recv().await.unwrap();
        assert_eq!(first.len(), 1);

        broker.set("expenses/b", json!(2)).await.unwrap();
        let mut latest = rx.recv().await.unwrap();
        while latest.len() < 2 {
            latest = rx.recv().await.unwrap();
        }
        assert!(latest.contains_key("expenses/b"));
    }

    #[tokio::test]
    async fn test_subscribe_filters_by_prefix() {
        let broker = MemoryBroker::new();
        broker.set("state/nextWaypoint", json!(1)).await.unwrap();
        broker.set("expenses/a", json!(2)).await.unwrap();

        let mut rx = broker.subscribe("state/nextWaypoint");
        let snap = rx.recv().await.unwrap();
        assert_eq!(snap.len(), 1);
        assert!(snap.contains_key("state/nextWaypoint"));
    }
}
