//! # Directory writer.
//!
//! Owns the node-local files used to resolve cluster node names:
//!
//! 1. every cluster node gets a hosts-file line `address node-id`;
//! 2. the node's own hostname is set to its NodeID (written to a
//!    configurable hostname path — `/proc/sys/kernel/hostname` applies
//!    it on Linux);
//! 3. a `ClusterDirectory` protobuf file is persisted with the
//!    addresses of the other nodes, used to find the cluster again
//!    after a reboot.
//!
//! Cluster data comes from a `NodesInCluster` watch mirrored by a child
//! runnable; the local address comes from a watch channel. Nodes that
//! disappear from the cluster keep their last known hosts entry: stale
//! resolution is preferable to breaking connections mid-drain.

use std::collections::BTreeMap;
use std::path::PathBuf;

use prost::Message;
use tokio::sync::{mpsc, watch};
use tonic::transport::Channel;

use crate::error::RunnableError;
use crate::proto;
use crate::proto::curator_client::CuratorClient;
use crate::supervisor::{runnable_fn, BoxRunnableFuture, RunContext, Runnable, Signal};

#[derive(Clone, Debug, PartialEq)]
struct HostsEntry {
    address: String,
    local: bool,
}

/// Supervised writer of hosts file, hostname and cluster directory.
#[derive(Clone)]
pub struct DirectoryWriter {
    client: CuratorClient<Channel>,
    node_id: String,
    external_address: watch::Receiver<Option<String>>,
    hosts_path: PathBuf,
    directory_path: PathBuf,
    hostname_path: Option<PathBuf>,
}

impl DirectoryWriter {
    pub fn new(
        client: CuratorClient<Channel>,
        node_id: impl Into<String>,
        external_address: watch::Receiver<Option<String>>,
        hosts_path: PathBuf,
        directory_path: PathBuf,
    ) -> Self {
        Self {
            client,
            node_id: node_id.into(),
            external_address,
            hosts_path,
            directory_path,
            hostname_path: None,
        }
    }

    /// Also write the NodeID to this path (the machine hostname).
    pub fn with_hostname_path(mut self, path: PathBuf) -> Self {
        self.hostname_path = Some(path);
        self
    }

    async fn run_loop(mut self, ctx: RunContext) -> Result<(), RunnableError> {
        let log = ctx.logger();

        // The hostname needs no network data; set it immediately.
        if let Some(path) = &self.hostname_path {
            tokio::fs::write(path, self.node_id.as_bytes()).await?;
        }

        // Child runnable mirroring the cluster watch into a channel.
        let (cluster_tx, mut cluster_rx) = mpsc::channel::<BTreeMap<String, String>>(1);
        let watch_client = self.client.clone();
        ctx.run(
            "cluster",
            runnable_fn(move |cctx: RunContext| {
                let client = watch_client.clone();
                let tx = cluster_tx.clone();
                async move { mirror_cluster(client, tx, cctx).await }
            }),
        )
        .await?;

        let mut nodes: BTreeMap<String, HostsEntry> = BTreeMap::new();
        if let Some(addr) = self.external_address.borrow_and_update().clone() {
            nodes.insert(
                self.node_id.clone(),
                HostsEntry {
                    address: addr,
                    local: true,
                },
            );
        }
        // Write an initial hosts file even before any address is known.
        self.write_files(&nodes).await?;

        ctx.signal(Signal::Healthy).await?;

        loop {
            let mut changed = false;
            tokio::select! {
                _ = ctx.cancelled() => return Err(RunnableError::Canceled),
                res = self.external_address.changed() => {
                    res.map_err(|_| RunnableError::failed("address source closed"))?;
                    if let Some(addr) = self.external_address.borrow_and_update().clone() {
                        let entry = HostsEntry { address: addr.clone(), local: true };
                        if nodes.get(&self.node_id) != Some(&entry) {
                            log.info(format!("got new local address: {addr}"));
                            nodes.insert(self.node_id.clone(), entry);
                            changed = true;
                        }
                    }
                }
                update = cluster_rx.recv() => {
                    let Some(update) = update else {
                        return Err(RunnableError::failed("cluster mirror terminated"));
                    };
                    for (id, address) in update {
                        // The cluster's view of the local node may lag
                        // behind what we already know first-hand.
                        if id == self.node_id {
                            continue;
                        }
                        let entry = HostsEntry { address, local: false };
                        if nodes.get(&id) != Some(&entry) {
                            log.info(format!("got new cluster address: {id} is {}", entry.address));
                            nodes.insert(id, entry);
                            changed = true;
                        }
                    }
                }
            }
            if changed {
                log.info(format!("updating hosts file: {} nodes", nodes.len()));
                self.write_files(&nodes).await?;
            }
        }
    }

    async fn write_files(&self, nodes: &BTreeMap<String, HostsEntry>) -> Result<(), RunnableError> {
        tokio::fs::write(&self.hosts_path, hosts_file(nodes)).await?;
        let directory = cluster_directory(nodes);
        tokio::fs::write(&self.directory_path, directory.encode_to_vec()).await?;
        Ok(())
    }
}

impl Runnable for DirectoryWriter {
    fn run(&self, ctx: RunContext) -> BoxRunnableFuture {
        let this = self.clone();
        Box::pin(this.run_loop(ctx))
    }
}

/// Consumes a `NodesInCluster` watch, maintaining the id → address map
/// and handing a copy to the parent on every event.
async fn mirror_cluster(
    mut client: CuratorClient<Channel>,
    tx: mpsc::Sender<BTreeMap<String, String>>,
    ctx: RunContext,
) -> Result<(), RunnableError> {
    let request = proto::WatchRequest {
        kind: Some(proto::watch_request::Kind::NodesInCluster(
            proto::watch_request::NodesInCluster {},
        )),
    };
    let response = tokio::select! {
        _ = ctx.cancelled() => return Err(RunnableError::Canceled),
        res = client.watch(request) => res?,
    };
    let mut stream = response.into_inner();
    ctx.signal(Signal::Healthy).await?;

    let mut nodes: BTreeMap<String, String> = BTreeMap::new();
    loop {
        let msg = tokio::select! {
            _ = ctx.cancelled() => return Err(RunnableError::Canceled),
            msg = stream.message() => msg,
        };
        let event = match msg {
            Ok(Some(ev)) => ev,
            Ok(None) => return Err(RunnableError::failed("cluster watch closed")),
            Err(status) => return Err(status.into()),
        };
        for node in event.nodes {
            let Some(status) = node.status else {
                continue;
            };
            if status.external_address.is_empty() {
                continue;
            }
            nodes.insert(node.id, status.external_address);
        }
        for tombstone in event.node_tombstones {
            nodes.remove(&tombstone.node_id);
        }
        tokio::select! {
            _ = ctx.cancelled() => return Err(RunnableError::Canceled),
            res = tx.send(nodes.clone()) => {
                if res.is_err() {
                    return Err(RunnableError::failed("parent loop gone"));
                }
            }
        }
    }
}

/// Renders the hosts file: localhost entries plus one line per node,
/// sorted by NodeID.
fn hosts_file(nodes: &BTreeMap<String, HostsEntry>) -> String {
    let mut out = String::from("127.0.0.1 localhost\n::1 localhost\n");
    for (id, entry) in nodes {
        out.push_str(&format!("{} {}\n", entry.address, id));
    }
    out
}

/// Builds the persisted directory from the non-local entries.
fn cluster_directory(nodes: &BTreeMap<String, HostsEntry>) -> proto::ClusterDirectory {
    let mut directory = proto::ClusterDirectory::default();
    for (id, entry) in nodes {
        if entry.local {
            continue;
        }
        directory.nodes.push(proto::cluster_directory::Node {
            id: id.clone(),
            addresses: vec![entry.address.clone()],
        });
    }
    directory
}
