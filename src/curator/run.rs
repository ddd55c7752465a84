//! # The curator runnable: campaign, lead, lose, repeat.
//!
//! Each consensus-member node runs one [`Curator`] under its
//! supervisor. The runnable campaigns on the election key; on winning
//! it builds a [`CuratorLeader`] (fresh heartbeat map, fenced
//! leadership) and hosts the RPC listener as a supervised child. Losing
//! leadership makes the runnable fail, which cancels the whole leader
//! subtree and lets the supervisor restart the curator — with backoff —
//! into a new campaign.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::error::RunnableError;
use crate::kv::{KvStore, LeaderElector};
use crate::rpc::tls::{ClusterCa, NodeCredentials};
use crate::supervisor::{runnable_fn, RunContext, Signal};

use super::filter::FilterEngine;
use super::leader::CuratorLeader;
use super::leadership::Leadership;
use super::service;
use super::state::CURATOR_SERVICE_PORT;

/// Configuration of a node's curator instance.
pub struct CuratorConfig {
    /// The replicated store.
    pub kv: Arc<dyn KvStore>,
    /// Election mechanism over that store.
    pub elector: Arc<dyn LeaderElector>,
    /// NodeID of the node this curator runs on.
    pub node_id: String,
    /// Cluster CA, for serving `GetClusterInfo` and AAA escrow.
    pub ca: Arc<ClusterCa>,
    /// Node filter engine backing `Management.GetNodes`.
    pub filter: Arc<dyn FilterEngine>,
    /// Owner key escrowable through AAA, if any.
    pub initial_owner_key: Option<Vec<u8>>,
    /// Listener address and credentials; `None` hosts the leader
    /// in-process only (tests).
    pub listen: Option<(SocketAddr, Arc<NodeCredentials>)>,
    /// Port advertised through `CuratorLocal.GetCurrentLeader`.
    pub curator_port: u16,
}

impl CuratorConfig {
    /// Minimal in-process configuration; no listener, default port.
    pub fn in_process(
        kv: Arc<dyn KvStore>,
        elector: Arc<dyn LeaderElector>,
        node_id: impl Into<String>,
        ca: Arc<ClusterCa>,
        filter: Arc<dyn FilterEngine>,
    ) -> Self {
        Self {
            kv,
            elector,
            node_id: node_id.into(),
            ca,
            filter,
            initial_owner_key: None,
            listen: None,
            curator_port: CURATOR_SERVICE_PORT,
        }
    }
}

/// The leader-elected cluster coordination service.
pub struct Curator {
    cfg: CuratorConfig,
    /// The current tenure's leader, for process-local consumers.
    current: std::sync::Mutex<Option<Arc<CuratorLeader>>>,
}

impl Curator {
    pub fn new(cfg: CuratorConfig) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            current: std::sync::Mutex::new(None),
        })
    }

    /// The leader of the current tenure, while this node holds it.
    pub fn current_leader(&self) -> Option<Arc<CuratorLeader>> {
        self.current.lock().ok().and_then(|c| c.clone())
    }

    /// Supervisor entry point. One incarnation spans exactly one
    /// leadership tenure.
    pub async fn run(self: Arc<Self>, ctx: RunContext) -> Result<(), RunnableError> {
        let log = ctx.logger();
        log.info("campaigning for leadership");

        let guard = tokio::select! {
            _ = ctx.cancelled() => return Err(RunnableError::Canceled),
            res = self.cfg.elector.campaign(&self.cfg.node_id) => {
                res.map_err(|e| RunnableError::failed(format!("campaign failed: {e}")))?
            }
        };
        log.info("won leadership");

        let lost = guard.lost();
        let leadership = Leadership::new(
            guard.lock().clone(),
            self.cfg.node_id.clone(),
            self.cfg.kv.clone(),
        );
        let mut leader = CuratorLeader::new(
            leadership,
            self.cfg.ca.clone(),
            self.cfg.filter.clone(),
            lost.clone(),
        )
        .with_curator_port(self.cfg.curator_port);
        if let Some(key) = &self.cfg.initial_owner_key {
            leader = leader.with_initial_owner_key(key.clone());
        }
        let leader = Arc::new(leader);
        if let Ok(mut cur) = self.current.lock() {
            *cur = Some(leader.clone());
        }

        if let Some((addr, credentials)) = &self.cfg.listen {
            let addr = *addr;
            let credentials = credentials.clone();
            let leader = leader.clone();
            let lost = lost.clone();
            ctx.run(
                "listener",
                runnable_fn(move |lctx: RunContext| {
                    let credentials = credentials.clone();
                    let leader = leader.clone();
                    let lost = lost.clone();
                    async move {
                        lctx.signal(Signal::Healthy).await?;
                        service::serve(addr, credentials.server_tls(), leader, lost)
                            .await
                            .map_err(|e| RunnableError::failed(format!("listener failed: {e}")))
                    }
                }),
            )
            .await?;
        }

        ctx.signal(Signal::Healthy).await?;

        let outcome = tokio::select! {
            _ = ctx.cancelled() => Err(RunnableError::Canceled),
            _ = lost.cancelled() => {
                log.warn("leadership lost, restarting campaign");
                Err(RunnableError::failed("leadership lost"))
            }
        };
        if let Ok(mut cur) = self.current.lock() {
            *cur = None;
        }
        // Keep the guard alive for the whole tenure.
        drop(guard);
        outcome
    }
}
