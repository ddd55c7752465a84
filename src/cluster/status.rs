//! # Status pusher.
//!
//! Mirrors the node's locally observable state — external address and
//! local curator presence — into the cluster via `UpdateNodeStatus`.
//! Each input arrives on its own watch channel; the loop recomputes the
//! status on any change and pushes only when something actually changed
//! and an external address is known.
//!
//! An RPC failure makes the runnable fail: the supervisor restarts it
//! with backoff and the fresh incarnation re-pushes the current state,
//! so no update is ever lost to a leader change.

use tokio::sync::watch;
use tonic::transport::Channel;

use crate::error::RunnableError;
use crate::proto;
use crate::proto::curator_client::CuratorClient;
use crate::supervisor::{BoxRunnableFuture, RunContext, Runnable, Signal};

/// Supervised status-push loop of one node.
#[derive(Clone)]
pub struct StatusPusher {
    client: CuratorClient<Channel>,
    node_id: String,
    version: String,
    external_address: watch::Receiver<Option<String>>,
    local_curator_port: watch::Receiver<Option<u16>>,
}

impl StatusPusher {
    pub fn new(
        client: CuratorClient<Channel>,
        node_id: impl Into<String>,
        external_address: watch::Receiver<Option<String>>,
        local_curator_port: watch::Receiver<Option<u16>>,
    ) -> Self {
        Self {
            client,
            node_id: node_id.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            external_address,
            local_curator_port,
        }
    }

    async fn run_loop(mut self, ctx: RunContext) -> Result<(), RunnableError> {
        let log = ctx.logger();
        let mut status = proto::NodeStatus {
            version: self.version.clone(),
            ..Default::default()
        };

        // Seed from the current input values; a restarted incarnation
        // re-pushes them.
        let mut changed = false;
        if let Some(addr) = self.external_address.borrow_and_update().clone() {
            status.external_address = addr;
            changed = true;
        }
        if let Some(port) = *self.local_curator_port.borrow_and_update() {
            status.running_curator = Some(proto::node_status::RunningCurator {
                port: i32::from(port),
            });
            changed = true;
        }

        ctx.signal(Signal::Healthy).await?;

        loop {
            if changed && !status.external_address.is_empty() {
                log.info(format!(
                    "submitting status: address={} curator={}",
                    status.external_address,
                    status.running_curator.is_some()
                ));
                self.client
                    .update_node_status(proto::UpdateNodeStatusRequest {
                        node_id: self.node_id.clone(),
                        status: Some(status.clone()),
                    })
                    .await?;
            }
            changed = false;

            tokio::select! {
                _ = ctx.cancelled() => return Err(RunnableError::Canceled),
                res = self.external_address.changed() => {
                    res.map_err(|_| RunnableError::failed("address source closed"))?;
                    if let Some(addr) = self.external_address.borrow_and_update().clone() {
                        if addr != status.external_address {
                            log.info(format!("got external address: {addr}"));
                            status.external_address = addr;
                            changed = true;
                        }
                    }
                }
                res = self.local_curator_port.changed() => {
                    res.map_err(|_| RunnableError::failed("local curator source closed"))?;
                    let port = *self.local_curator_port.borrow_and_update();
                    let current = status.running_curator.as_ref().map(|rc| rc.port);
                    match port {
                        Some(p) if current != Some(i32::from(p)) => {
                            log.info("got new local curator state: running");
                            status.running_curator =
                                Some(proto::node_status::RunningCurator { port: i32::from(p) });
                            changed = true;
                        }
                        None if current.is_some() => {
                            log.info("got new local curator state: not running");
                            status.running_curator = None;
                            changed = true;
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}

impl Runnable for StatusPusher {
    fn run(&self, ctx: RunContext) -> BoxRunnableFuture {
        let this = self.clone();
        Box::pin(this.run_loop(ctx))
    }
}
