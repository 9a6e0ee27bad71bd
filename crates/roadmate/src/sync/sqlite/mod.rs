//! `SQLite`-file document broker.
//!
//! Every process that opens the same database file sees the same document
//! tree, which lets several consoles on one host act as separate devices.
//! Subscriptions poll the file and emit a snapshot whenever the BLAKE3 digest
//! of the watched prefix changes.
//!
//! `rusqlite` calls block, so the async methods run them on the blocking
//! pool. A writer waiting out another process's lock never stalls the
//! runtime.

pub mod migrations;
pub mod schema;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::{lock, DocumentBroker, Snapshot, SUBSCRIPTION_BUFFER};
use crate::error::{Error, Result};

const NAME: &str = "sqlite";

/// Document broker backed by a shared `SQLite` database.
#[derive(Debug)]
pub struct SqliteBroker {
    path: PathBuf,
    conn: Arc<Mutex<Connection>>,
    poll_interval: Duration,
}

impl SqliteBroker {
    /// Open or create the shared database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or database cannot be created or the
    /// schema cannot be initialised.
    pub fn open(path: impl AsRef<Path>, poll_interval: Duration) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening shared trip database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        // Several processes write this file.
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.busy_timeout(Duration::from_secs(5))?;

        migrations::initialize_schema(&conn)?;

        info!("Shared trip database ready at {}", path.display());
        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
            poll_interval,
        })
    }

    /// Create an in-memory broker, for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory(poll_interval: Duration) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn: Arc::new(Mutex::new(conn)),
            poll_interval,
        })
    }

    /// Path of the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read one document.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or the stored value is not JSON.
    pub fn get(&self, path: &str) -> Result<Option<Value>> {
        let conn = lock(&self.conn);
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM documents WHERE path = ?1",
                [path],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|text| serde_json::from_str(&text).map_err(Error::from))
            .transpose()
    }

    /// Number of stored documents.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn count(&self) -> Result<i64> {
        let conn = lock(&self.conn);
        let count = conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
        Ok(count)
    }
}

/// Run `op` against the shared connection on the blocking pool.
async fn run_blocking<T, F>(conn: Arc<Mutex<Connection>>, op: F) -> Result<T>
where
    F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || op(&mut lock(&conn)))
        .await
        .map_err(|e| Error::broker(NAME, format!("blocking task failed: {e}")))?
}

fn write_document(conn: &Connection, path: &str, value: &Value) -> Result<()> {
    conn.execute(
        r"
        INSERT INTO documents (path, value, updated_at) VALUES (?1, ?2, ?3)
        ON CONFLICT(path) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        ",
        params![path, value.to_string(), Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

/// Read every document at or below `prefix`, with a digest of the raw rows.
///
/// Rows whose value is not valid JSON are left out of the snapshot but still
/// count towards the digest.
fn read_snapshot(conn: &Connection, prefix: &str) -> Result<(Snapshot, blake3::Hash)> {
    let mut stmt = conn.prepare_cached(
        r"
        SELECT path, value FROM documents
        WHERE path = ?1 OR substr(path, 1, length(?2)) = ?2
        ORDER BY path
        ",
    )?;
    let rows = stmt
        .query_map(params![prefix, format!("{prefix}/")], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut hasher = blake3::Hasher::new();
    let mut snapshot = Snapshot::new();
    for (path, text) in rows {
        hasher.update(path.as_bytes());
        hasher.update(&[0]);
        hasher.update(text.as_bytes());
        hasher.update(&[0]);
        match serde_json::from_str(&text) {
            Ok(value) => {
                snapshot.insert(path, value);
            }
            Err(e) => warn!(path = %path, error = %e, "skipping undecodable document"),
        }
    }
    Ok((snapshot, hasher.finalize()))
}

#[async_trait::async_trait]
impl DocumentBroker for SqliteBroker {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn set(&self, path: &str, value: Value) -> Result<()> {
        let path = path.to_string();
        run_blocking(Arc::clone(&self.conn), move |conn| {
            write_document(conn, &path, &value)
        })
        .await
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<()> {
        let path = path.to_string();
        run_blocking(Arc::clone(&self.conn), move |conn| {
            let tx = conn.transaction()?;
            let existing: Option<String> = tx
                .query_row(
                    "SELECT value FROM documents WHERE path = ?1",
                    [&path],
                    |row| row.get(0),
                )
                .optional()?;

            let merged = match existing.and_then(|text| serde_json::from_str::<Value>(&text).ok())
            {
                Some(Value::Object(mut object)) => {
                    object.extend(fields);
                    Value::Object(object)
                }
                _ => Value::Object(fields),
            };
            write_document(&tx, &path, &merged)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn remove(&self, path: &str) -> Result<()> {
        let path = path.to_string();
        run_blocking(Arc::clone(&self.conn), move |conn| {
            conn.execute("DELETE FROM documents WHERE path = ?1", [&path])?;
            Ok(())
        })
        .await
    }

    async fn remove_prefix(&self, prefix: &str) -> Result<usize> {
        let prefix = prefix.to_string();
        run_blocking(Arc::clone(&self.conn), move |conn| {
            let removed = conn.execute(
                "DELETE FROM documents WHERE path = ?1 OR substr(path, 1, length(?2)) = ?2",
                params![prefix, format!("{prefix}/")],
            )?;
            Ok(removed)
        })
        .await
    }

    fn subscribe(&self, prefix: &str) -> mpsc::Receiver<Snapshot> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let conn = Arc::clone(&self.conn);
        let prefix = prefix.to_string();
        let poll_interval = self.poll_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut last_digest: Option<blake3::Hash> = None;

            loop {
                ticker.tick().await;
                if tx.is_closed() {
                    break;
                }

                let watched = prefix.clone();
                let read = run_blocking(Arc::clone(&conn), move |conn| {
                    read_snapshot(conn, &watched)
                })
                .await;
                match read {
                    Ok((snapshot, digest)) => {
                        if last_digest == Some(digest) {
                            continue;
                        }
                        last_digest = Some(digest);
                        if tx.send(snapshot).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(prefix = %prefix, error = %e, "document poll failed"),
                }
            }
            debug!(prefix = %prefix, "document subscription closed");
        });

        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn create_test_broker() -> SqliteBroker {
        SqliteBroker::open_in_memory(Duration::from_millis(10)).unwrap()
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let broker = create_test_broker();
        broker
            .set("state/nextWaypoint", json!({"id": "kokura"}))
            .await
            .unwrap();
        let value = broker.get("state/nextWaypoint").unwrap().unwrap();
        assert_eq!(value["id"], "kokura");
        assert!(broker.get("state/activeNotification").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let broker = create_test_broker();
        broker.set("a", json!(1)).await.unwrap();
        broker.set("a", json!(2)).await.unwrap();
        assert_eq!(broker.get("a").unwrap().unwrap(), json!(2));
        assert_eq!(broker.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_update_merges_and_creates() {
        let broker = create_test_broker();
        broker
            .set("expenses/a", json!({"title": "Gas", "amount": 1}))
            .await
            .unwrap();

        let mut fields = Map::new();
        fields.insert("amount".to_string(), json!(7));
        broker.update("expenses/a", fields.clone()).await.unwrap();
        broker.update("expenses/new", fields).await.unwrap();

        assert_eq!(
            broker.get("expenses/a").unwrap().unwrap(),
            json!({"title": "Gas", "amount": 7})
        );
        assert_eq!(broker.get("expenses/new").unwrap().unwrap(), json!({"amount": 7}));
    }

    #[tokio::test]
    async fn test_remove_and_remove_prefix() {
        let broker = create_test_broker();
        broker.set("expenses/a", json!(1)).await.unwrap();
        broker.set("expenses/b", json!(2)).await.unwrap();
        broker.set("expenses_archive", json!(3)).await.unwrap();
        broker.set("state/nextWaypoint", json!(4)).await.unwrap();

        broker.remove("expenses/a").await.unwrap();
        assert_eq!(broker.count().unwrap(), 3);

        assert_eq!(broker.remove_prefix("expenses").await.unwrap(), 1);
        assert_eq!(broker.count().unwrap(), 2);
        assert!(broker.get("expenses_archive").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_subscribe_emits_initial_then_changes_only() {
        let broker = create_test_broker();
        broker.set("expenses/a", json!(1)).await.unwrap();

        let mut rx = broker.subscribe("expenses");
        let first = rx.recv().await.unwrap();
        assert_eq!(first.len(), 1);

        // Unrelated writes do not produce a new snapshot for this prefix.
        broker.set("state/nextWaypoint", json!({"id": "x"})).await.unwrap();
        broker.set("expenses/b", json!(2)).await.unwrap();

        let next = rx.recv().await.unwrap();
        assert_eq!(next.len(), 2);
    }

    #[tokio::test]
    async fn test_read_snapshot_skips_invalid_json() {
        let broker = create_test_broker();
        {
            let conn = lock(&broker.conn);
            conn.execute(
                "INSERT INTO documents (path, value, updated_at) VALUES ('expenses/bad', '{nope', '')",
                [],
            )
            .unwrap();
            write_document(&conn, "expenses/good", &json!(1)).unwrap();
        }
        let conn = lock(&broker.conn);
        let (snapshot, _) = read_snapshot(&conn, "expenses").unwrap();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains_key("expenses/good"));
    }

    #[tokio::test]
    async fn test_locked_file_does_not_stall_runtime() {
        let db_path =
            std::env::temp_dir().join(format!("roadmate_lock_test_{}.db", std::process::id()));
        let cleanup = |path: &Path| {
            for suffix in ["", "-wal", "-shm"] {
                let _ = std::fs::remove_file(format!("{}{suffix}", path.display()));
            }
        };
        cleanup(&db_path);

        let broker = Arc::new(SqliteBroker::open(&db_path, Duration::from_millis(10)).unwrap());
        let holder = Connection::open(&db_path).unwrap();
        holder.execute_batch("BEGIN IMMEDIATE").unwrap();

        let writer = {
            let broker = Arc::clone(&broker);
            tokio::spawn(async move {
                broker
                    .set("state/nextWaypoint", json!({"id": "kokura"}))
                    .await
            })
        };
        tokio::task::yield_now().await;

        let started = std::time::Instant::now();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(started.elapsed() < Duration::from_millis(200));

        holder.execute_batch("COMMIT").unwrap();
        writer.await.unwrap().unwrap();
        assert_eq!(broker.get("state/nextWaypoint").unwrap().unwrap()["id"], "kokura");

        drop(holder);
        drop(broker);
        cleanup(&db_path);
    }

    #[test]
    fn test_open_file_based_shares_documents() {
        let db_path = std::env::temp_dir().join(format!(
            "roadmate_test_{}/nested/trip.db",
            std::process::id()
        ));
        if let Some(parent) = db_path.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }

        let rt = tokio::runtime::Runtime::new().unwrap();
        let first = SqliteBroker::open(&db_path, Duration::from_millis(10)).unwrap();
        let second = SqliteBroker::open(&db_path, Duration::from_millis(10)).unwrap();
        assert_eq!(first.path(), db_path);

        rt.block_on(first.set("state/nextWaypoint", json!({"id": "kokura"})))
            .unwrap();
        let seen = second.get("state/nextWaypoint").unwrap().unwrap();
        assert_eq!(seen["id"], "kokura");

        drop(first);
        drop(second);
        if let Some(root) = db_path.parent().and_then(Path::parent) {
            let _ = std::fs::remove_dir_all(root);
        }
    }
}
