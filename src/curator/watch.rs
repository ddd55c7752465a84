//! # Watch streams.
//!
//! A watch delivers an initial snapshot terminated by
//! `PROGRESS_LAST_BACKLOGGED`, then live incremental updates translated
//! from the store watch. Events on one stream are totally ordered; node
//! deletions are delivered as tombstones. A `NodeInCluster` watch on a
//! node that does not exist yet emits nothing until the node appears.
//!
//! The store watcher is registered *before* the snapshot read, and live
//! events at or below the snapshot revision are dropped, so no update
//! can fall between snapshot and stream.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::Status;

use crate::kv::{KvError, KvEvent, KvStore};
use crate::proto;

use super::state::{id_from_key, Node, NODES_PREFIX};

/// What a watch call observes.
#[derive(Clone, Debug)]
pub(crate) enum WatchKind {
    /// One node, by ID.
    Node { id: String },
    /// The whole cluster.
    All,
}

impl WatchKind {
    fn selects(&self, id: &str) -> bool {
        match self {
            WatchKind::Node { id: want } => want == id,
            WatchKind::All => true,
        }
    }
}

/// Spawns the watch feeder task; the returned receiver is wrapped into
/// the gRPC response stream. The stream ends cleanly when `cancel`
/// fires (leadership lost) or the client goes away.
pub(crate) fn spawn(
    kv: Arc<dyn KvStore>,
    kind: WatchKind,
    cancel: CancellationToken,
) -> mpsc::Receiver<Result<proto::WatchEvent, Status>> {
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        if let Err(status) = feed(kv, kind, cancel, &tx).await {
            let _ = tx.send(Err(status)).await;
        }
    });
    rx
}

async fn feed(
    kv: Arc<dyn KvStore>,
    kind: WatchKind,
    cancel: CancellationToken,
    tx: &mpsc::Sender<Result<proto::WatchEvent, Status>>,
) -> Result<(), Status> {
    let mut watcher = kv.watch_prefix(NODES_PREFIX).await.map_err(unavailable)?;
    let (snapshot, snapshot_rev) = kv.get_prefix(NODES_PREFIX).await.map_err(unavailable)?;

    let mut nodes = Vec::new();
    for entry in snapshot {
        let Some(id) = id_from_key(&entry.key) else {
            continue;
        };
        if !kind.selects(id) {
            continue;
        }
        match Node::decode(&entry.value) {
            Ok(n) => nodes.push(n.to_proto_basic()),
            Err(_) => tracing::warn!(key = %entry.key, "skipping corrupt node record in watch"),
        }
    }
    let emit_snapshot = match &kind {
        // The whole-cluster snapshot is always delivered, even empty,
        // so consumers know when the backlog ends.
        WatchKind::All => true,
        // A single-node watch stays silent until the node exists.
        WatchKind::Node { .. } => !nodes.is_empty(),
    };
    if emit_snapshot {
        let event = proto::WatchEvent {
            nodes,
            node_tombstones: Vec::new(),
            progress: proto::watch_event::Progress::LastBacklogged as i32,
        };
        if tx.send(Ok(event)).await.is_err() {
            return Ok(());
        }
    }

    loop {
        let ev = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            ev = watcher.next() => ev,
        };
        let Some(ev) = ev else {
            return Err(Status::unavailable("store watch closed"));
        };
        if ev.revision() <= snapshot_rev {
            // Already part of the snapshot.
            continue;
        }
        let event = match ev {
            KvEvent::Put(entry) => {
                let Some(id) = id_from_key(&entry.key) else {
                    continue;
                };
                if !kind.selects(id) {
                    continue;
                }
                match Node::decode(&entry.value) {
                    Ok(n) => proto::WatchEvent {
                        nodes: vec![n.to_proto_basic()],
                        node_tombstones: Vec::new(),
                        progress: proto::watch_event::Progress::Live as i32,
                    },
                    Err(_) => {
                        tracing::warn!(key = %entry.key, "skipping corrupt node record in watch");
                        continue;
                    }
                }
            }
            KvEvent::Delete { key, .. } => {
                let Some(id) = id_from_key(&key) else {
                    continue;
                };
                if !kind.selects(id) {
                    continue;
                }
                proto::WatchEvent {
                    nodes: Vec::new(),
                    node_tombstones: vec![proto::watch_event::NodeTombstone {
                        node_id: id.to_string(),
                    }],
                    progress: proto::watch_event::Progress::Live as i32,
                }
            }
        };
        if tx.send(Ok(event)).await.is_err() {
            return Ok(());
        }
    }
}

fn unavailable(e: KvError) -> Status {
    Status::unavailable(e.to_string())
}
