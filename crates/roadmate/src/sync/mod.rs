//! Replication of the shared trip document.
//!
//! The remote store is a tree of JSON documents addressed by slash-separated
//! paths. Three logical keys are shared between devices:
//!
//! | key                   | path                        |
//! |-----------------------|-----------------------------|
//! | next waypoint         | `state/nextWaypoint`        |
//! | active notification   | `state/activeNotification`  |
//! | expense ledger        | `expenses/{id}`             |
//!
//! Writes are fire-and-forget and last-write-wins. There is no transaction,
//! retry, or rollback: a failed write is logged and the local state stays as
//! the user left it. Subscriptions deliver the current value first and then
//! every change, possibly more than once.

pub mod memory;
pub mod sqlite;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::expense::{sort_ledger, Expense, ExpenseDraft, ExpensePatch};
use crate::notification::AppNotification;
use crate::trip::Waypoint;

pub use memory::MemoryBroker;
pub use sqlite::SqliteBroker;

/// All documents under a subscribed prefix, keyed by full path.
pub type Snapshot = BTreeMap<String, Value>;

/// Capacity of per-subscription channels.
pub(crate) const SUBSCRIPTION_BUFFER: usize = 32;

/// A remote JSON document store.
///
/// Implementations give at-least-once, unordered-across-writers delivery.
/// Writes from one caller are applied in the order they are awaited.
#[async_trait::async_trait]
pub trait DocumentBroker: Send + Sync + std::fmt::Debug {
    /// Backend name for logging.
    fn name(&self) -> &'static str;

    /// Replace the document at `path`.
    async fn set(&self, path: &str, value: Value) -> Result<()>;

    /// Shallow-merge `fields` into the object at `path`, creating it if absent.
    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<()>;

    /// Delete the document at `path`. Deleting a missing path is not an error.
    async fn remove(&self, path: &str) -> Result<()>;

    /// Delete every document at or below `prefix`. Returns how many went.
    async fn remove_prefix(&self, prefix: &str) -> Result<usize>;

    /// Watch every document at or below `prefix`.
    ///
    /// The first item is the snapshot at subscription time. The stream ends
    /// when the receiver is dropped or the broker shuts down.
    fn subscribe(&self, prefix: &str) -> mpsc::Receiver<Snapshot>;
}

/// Check if `path` is `prefix` itself or a descendant of it.
#[must_use]
pub fn path_matches(path: &str, prefix: &str) -> bool {
    path == prefix
        || (path.len() > prefix.len()
            && path.starts_with(prefix)
            && path.as_bytes()[prefix.len()] == b'/')
}

/// The logical keys shared between devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteKey {
    /// The selected next waypoint.
    NextWaypoint,
    /// The single active notification.
    ActiveNotification,
    /// The expense collection.
    ExpenseLedger,
}

impl RemoteKey {
    /// All keys, in subscription order.
    pub const ALL: [RemoteKey; 3] = [
        RemoteKey::NextWaypoint,
        RemoteKey::ActiveNotification,
        RemoteKey::ExpenseLedger,
    ];

    /// Document path (or collection prefix) for this key.
    #[must_use]
    pub fn path(self) -> &'static str {
        match self {
            Self::NextWaypoint => "state/nextWaypoint",
            Self::ActiveNotification => "state/activeNotification",
            Self::ExpenseLedger => "expenses",
        }
    }
}

impl std::fmt::Display for RemoteKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NextWaypoint => write!(f, "next-waypoint"),
            Self::ActiveNotification => write!(f, "active-notification"),
            Self::ExpenseLedger => write!(f, "expense-ledger"),
        }
    }
}

/// Path of one expense document.
#[must_use]
pub fn expense_path(id: &str) -> String {
    format!("{}/{id}", RemoteKey::ExpenseLedger.path())
}

/// A decoded remote change, ready to merge into the store.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteChange {
    /// The shared next waypoint changed or was cleared.
    NextWaypoint(Option<Waypoint>),
    /// The shared notification changed or was cleared.
    ActiveNotification(Option<AppNotification>),
    /// The ledger, newest first.
    Ledger(Vec<Expense>),
}

impl RemoteChange {
    /// The key this change belongs to.
    #[must_use]
    pub fn key(&self) -> RemoteKey {
        match self {
            Self::NextWaypoint(_) => RemoteKey::NextWaypoint,
            Self::ActiveNotification(_) => RemoteKey::ActiveNotification,
            Self::Ledger(_) => RemoteKey::ExpenseLedger,
        }
    }
}

/// Decode a snapshot for `key`.
///
/// Returns `None` when a single-document key holds something malformed; the
/// caller skips that delivery and keeps its last good value. Malformed ledger
/// entries are dropped one by one.
#[must_use]
pub fn decode_snapshot(key: RemoteKey, snapshot: &Snapshot) -> Option<RemoteChange> {
    match key {
        RemoteKey::NextWaypoint => {
            decode_document(key, snapshot).map(RemoteChange::NextWaypoint)
        }
        RemoteKey::ActiveNotification => {
            decode_document(key, snapshot).map(RemoteChange::ActiveNotification)
        }
        RemoteKey::ExpenseLedger => Some(RemoteChange::Ledger(decode_ledger(snapshot))),
    }
}

fn decode_document<T: serde::de::DeserializeOwned>(
    key: RemoteKey,
    snapshot: &Snapshot,
) -> Option<Option<T>> {
    match snapshot.get(key.path()) {
        None | Some(Value::Null) => Some(None),
        Some(value) => match serde_json::from_value(value.clone()) {
            Ok(decoded) => Some(Some(decoded)),
            Err(e) => {
                warn!(key = %key, error = %e, "skipping malformed remote document");
                None
            }
        },
    }
}

fn decode_ledger(snapshot: &Snapshot) -> Vec<Expense> {
    let prefix = RemoteKey::ExpenseLedger.path();
    let mut entries: Vec<Expense> = snapshot
        .iter()
        .filter_map(|(path, value)| {
            let id = path.strip_prefix(prefix)?.strip_prefix('/')?;
            let expense = Expense::from_remote(id, value);
            if expense.is_none() {
                warn!(path = %path, "skipping malformed ledger entry");
            }
            expense
        })
        .collect();
    sort_ledger(&mut entries);
    entries
}

/// Push-key style id generator.
///
/// Ids hash the device identity, the wall clock, the process id, and a
/// counter, so independent devices do not collide.
#[derive(Debug)]
pub struct IdGenerator {
    seed: String,
    counter: AtomicU64,
}

impl IdGenerator {
    /// Create a generator seeded with a device identity.
    #[must_use]
    pub fn new(device: &str) -> Self {
        Self {
            seed: device.to_string(),
            counter: AtomicU64::new(0),
        }
    }

    /// A fresh 20-character hex id.
    #[must_use]
    pub fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.seed.as_bytes());
        hasher.update(&nanos.to_le_bytes());
        hasher.update(&std::process::id().to_le_bytes());
        hasher.update(&n.to_le_bytes());
        hasher.finalize().to_hex().as_str()[..20].to_string()
    }
}

/// A queued remote write.
#[derive(Debug, Clone, PartialEq)]
enum Write {
    Set { path: String, value: Value },
    Merge { path: String, fields: Map<String, Value> },
    Remove { path: String },
    RemovePrefix { prefix: String },
}

impl Write {
    fn path(&self) -> &str {
        match self {
            Self::Set { path, .. } | Self::Merge { path, .. } | Self::Remove { path } => path,
            Self::RemovePrefix { prefix } => prefix,
        }
    }

    async fn apply(self, broker: &dyn DocumentBroker) -> Result<()> {
        match self {
            Self::Set { path, value } => broker.set(&path, value).await,
            Self::Merge { path, fields } => broker.update(&path, fields).await,
            Self::Remove { path } => broker.remove(&path).await,
            Self::RemovePrefix { prefix } => broker.remove_prefix(&prefix).await.map(|n| {
                debug!(prefix = %prefix, removed = n, "cleared remote collection");
            }),
        }
    }
}

#[derive(Debug)]
enum Outbound {
    Write(Write),
    /// A next-waypoint write; `id` is forgotten by the dedupe cache if the
    /// write fails.
    Waypoint { id: String, write: Write },
    Flush(oneshot::Sender<()>),
}

/// Waypoint id the broker holds or is about to hold.
type WaypointCache = Arc<Mutex<Option<String>>>;

/// Bridge between a navigation store and a [`DocumentBroker`].
///
/// Writes go through a single background writer so that one device's writes
/// reach the broker in the order they were issued. Callers never wait for
/// them.
#[derive(Debug)]
pub struct RemoteSyncLayer {
    broker: Arc<dyn DocumentBroker>,
    ids: IdGenerator,
    outbound: mpsc::UnboundedSender<Outbound>,
    last_waypoint: WaypointCache,
}

impl RemoteSyncLayer {
    /// Create a layer over `broker` for the given device identity.
    ///
    /// Must be called from within a Tokio runtime: the background writer is
    /// spawned here.
    #[must_use]
    pub fn new(broker: Arc<dyn DocumentBroker>, device: &str) -> Self {
        let (outbound, rx) = mpsc::unbounded_channel();
        let last_waypoint = WaypointCache::default();
        tokio::spawn(run_writer(
            Arc::clone(&broker),
            Arc::clone(&last_waypoint),
            rx,
        ));
        Self {
            broker,
            ids: IdGenerator::new(device),
            outbound,
            last_waypoint,
        }
    }

    /// The underlying broker.
    #[must_use]
    pub fn broker(&self) -> &Arc<dyn DocumentBroker> {
        &self.broker
    }

    /// A fresh globally unique id.
    #[must_use]
    pub fn generate_id(&self) -> String {
        self.ids.next_id()
    }

    fn dispatch(&self, write: Write) {
        self.enqueue(Outbound::Write(write));
    }

    fn enqueue(&self, message: Outbound) {
        if let Outbound::Write(write) | Outbound::Waypoint { write, .. } = &message {
            trace!(path = write.path(), "queueing remote write");
        }
        if self.outbound.send(message).is_err() {
            warn!("remote writer has stopped; dropping write");
        }
    }

    /// Publish the next waypoint. Skipped when the broker already holds this
    /// waypoint or a write of it is queued. A failed write clears that
    /// record, so selecting the same waypoint again retries.
    pub fn push_next_waypoint(&self, waypoint: &Waypoint) {
        {
            let mut last = lock(&self.last_waypoint);
            if last.as_deref() == Some(waypoint.id.as_str()) {
                debug!(waypoint = %waypoint.id, "next waypoint unchanged; skipping push");
                return;
            }
            *last = Some(waypoint.id.clone());
        }
        match serde_json::to_value(waypoint) {
            Ok(value) => self.enqueue(Outbound::Waypoint {
                id: waypoint.id.clone(),
                write: Write::Set {
                    path: RemoteKey::NextWaypoint.path().to_string(),
                    value,
                },
            }),
            Err(e) => {
                forget_waypoint(&self.last_waypoint, &waypoint.id);
                warn!(error = %e, "failed to encode waypoint");
            }
        }
    }

    /// Record the waypoint id most recently seen from the broker, so a later
    /// local selection of a different id is not mistaken for a repeat.
    pub fn observe_remote_waypoint(&self, id: Option<&str>) {
        *lock(&self.last_waypoint) = id.map(str::to_string);
    }

    /// Publish or clear the active notification.
    pub fn push_notification(&self, notification: Option<&AppNotification>) {
        let path = RemoteKey::ActiveNotification.path().to_string();
        match notification {
            None => self.dispatch(Write::Remove { path }),
            Some(n) => match serde_json::to_value(n) {
                Ok(value) => self.dispatch(Write::Set { path, value }),
                Err(e) => warn!(error = %e, "failed to encode notification"),
            },
        }
    }

    /// Create a ledger entry remotely and return it as written.
    ///
    /// The entry is not added to any local ledger; it arrives through the
    /// subscription like everyone else's.
    pub fn create_expense(&self, draft: ExpenseDraft) -> Expense {
        let expense = draft.into_expense(self.generate_id(), Utc::now());
        self.dispatch(Write::Set {
            path: expense_path(&expense.id),
            value: expense.to_remote(),
        });
        expense
    }

    /// Merge a partial update into a ledger entry.
    pub fn update_expense(&self, id: &str, patch: &ExpensePatch) {
        if patch.is_empty() {
            return;
        }
        self.dispatch(Write::Merge {
            path: expense_path(id),
            fields: patch.to_fields(),
        });
    }

    /// Delete a ledger entry.
    pub fn remove_expense(&self, id: &str) {
        self.dispatch(Write::Remove {
            path: expense_path(id),
        });
    }

    /// Delete every ledger entry.
    pub fn clear_ledger(&self) {
        self.dispatch(Write::RemovePrefix {
            prefix: RemoteKey::ExpenseLedger.path().to_string(),
        });
    }

    /// Wait until every write queued so far has been attempted.
    ///
    /// For one-shot tools that exit right after writing. Never called on the
    /// location path.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.outbound.send(Outbound::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    /// Subscribe to one key.
    #[must_use]
    pub fn subscribe_key(&self, key: RemoteKey) -> mpsc::Receiver<RemoteChange> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        self.forward(key, tx);
        rx
    }

    /// Subscribe to all keys on one channel.
    #[must_use]
    pub fn subscribe(&self) -> mpsc::Receiver<RemoteChange> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        for key in RemoteKey::ALL {
            self.forward(key, tx.clone());
        }
        rx
    }

    fn forward(&self, key: RemoteKey, tx: mpsc::Sender<RemoteChange>) {
        let mut snapshots = self.broker.subscribe(key.path());
        tokio::spawn(async move {
            while let Some(snapshot) = snapshots.recv().await {
                let Some(change) = decode_snapshot(key, &snapshot) else {
                    continue;
                };
                if tx.send(change).await.is_err() {
                    break;
                }
            }
            debug!(key = %key, "remote subscription ended");
        });
    }
}

async fn run_writer(
    broker: Arc<dyn DocumentBroker>,
    last_waypoint: WaypointCache,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(message) = rx.recv().await {
        match message {
            Outbound::Write(write) => {
                apply_logged(broker.as_ref(), write).await;
            }
            Outbound::Waypoint { id, write } => {
                if !apply_logged(broker.as_ref(), write).await {
                    forget_waypoint(&last_waypoint, &id);
                }
            }
            Outbound::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

/// Apply one write, logging a failure. Returns whether it landed.
async fn apply_logged(broker: &dyn DocumentBroker, write: Write) -> bool {
    let path = write.path().to_string();
    match write.apply(broker).await {
        Ok(()) => true,
        Err(e) => {
            warn!(broker = broker.name(), path = %path, error = %e, "remote write failed");
            false
        }
    }
}

/// Drop `id` from the dedupe cache unless something newer replaced it.
fn forget_waypoint(cache: &Mutex<Option<String>>, id: &str) {
    let mut last = lock(cache);
    if last.as_deref() == Some(id) {
        *last = None;
    }
}

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
