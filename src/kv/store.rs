//! # KvStore: the replicated key-value seam.
//!
//! Models the slice of a replicated store the curator actually uses:
//! revisioned reads, prefix scans, guarded multi-op transactions and
//! prefix watches. Revisions increase monotonically with every write;
//! a transaction guard compares a key's modification revision, which is
//! how a curator leader fences out its stale predecessors.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Monotonic store revision.
pub type Revision = u64;

/// A key-value pair with its last modification revision.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KvEntry {
    pub key: String,
    pub value: Vec<u8>,
    pub mod_revision: Revision,
}

/// A change observed by a watcher.
#[derive(Clone, Debug)]
pub enum KvEvent {
    /// A key was created or overwritten.
    Put(KvEntry),
    /// A key was deleted.
    Delete { key: String, revision: Revision },
}

impl KvEvent {
    /// Store revision at which the change happened.
    pub fn revision(&self) -> Revision {
        match self {
            KvEvent::Put(e) => e.mod_revision,
            KvEvent::Delete { revision, .. } => *revision,
        }
    }
}

/// Transaction guard.
#[derive(Clone, Debug)]
pub enum Compare {
    /// Succeeds iff `key`'s modification revision equals `revision`.
    ModRevision { key: String, revision: Revision },
}

/// Transaction operation.
#[derive(Clone, Debug)]
pub enum Op {
    Put { key: String, value: Vec<u8> },
    Delete { key: String },
}

/// Errors surfaced by a KV backend.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum KvError {
    /// The backend is gone or unreachable.
    #[error("kv store unavailable: {0}")]
    Unavailable(String),
}

/// Stream of changes under a watched prefix, in store order.
pub struct KvWatcher {
    rx: mpsc::UnboundedReceiver<KvEvent>,
}

impl KvWatcher {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<KvEvent>) -> Self {
        Self { rx }
    }

    /// Next change, or `None` once the store side is gone.
    pub async fn next(&mut self) -> Option<KvEvent> {
        self.rx.recv().await
    }
}

/// Narrow replicated-KV interface consumed by the curator.
#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<KvEntry>, KvError>;

    /// All entries under `prefix` plus the store revision of the
    /// snapshot.
    async fn get_prefix(&self, prefix: &str) -> Result<(Vec<KvEntry>, Revision), KvError>;

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<Revision, KvError>;

    /// Returns true if the key existed.
    async fn delete(&self, key: &str) -> Result<bool, KvError>;

    /// Applies `ops` atomically iff `compare` holds; returns whether the
    /// guard held.
    async fn txn(&self, compare: Compare, ops: Vec<Op>) -> Result<bool, KvError>;

    /// Watches changes under `prefix` starting after the store's current
    /// revision. Events arrive in store order.
    async fn watch_prefix(&self, prefix: &str) -> Result<KvWatcher, KvError>;
}
