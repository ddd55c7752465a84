//! # CuratorLeader: the operations of an elected leader.
//!
//! One `CuratorLeader` exists per won election. It owns the
//! [`LeaderState`] (heartbeat map, tenure start) for exactly that
//! tenure, performs every mutation through the fenced [`Leadership`],
//! and is dropped — together with all its in-memory state — when
//! leadership is lost.
//!
//! Transport concerns (identity extraction, streaming) live in
//! [`super::service`]; everything here takes already-authenticated
//! caller attributes.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::proto;
use crate::rpc::auth::verify_escrow_proof;
use crate::rpc::tls::ClusterCa;

use super::error::CuratorError;
use super::filter::{FilterEngine, NodeView};
use super::health::LeaderState;
use super::leadership::Leadership;
use super::state::{Node, CLUSTER_UNLOCK_KEY_LEN, CURATOR_SERVICE_PORT};
use crate::cluster::node_id;

/// Leader-scoped curator implementation.
pub struct CuratorLeader {
    leadership: Arc<Leadership>,
    state: Arc<LeaderState>,
    filter: Arc<dyn FilterEngine>,
    ca: Arc<ClusterCa>,
    cancel: CancellationToken,
    initial_owner_key: Option<Vec<u8>>,
    curator_port: u16,
}

impl CuratorLeader {
    /// Builds a leader for a freshly won election. The heartbeat map
    /// starts empty: only heartbeats received under this tenure count.
    pub fn new(
        leadership: Leadership,
        ca: Arc<ClusterCa>,
        filter: Arc<dyn FilterEngine>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            leadership: Arc::new(leadership),
            state: Arc::new(LeaderState::new()),
            filter,
            ca,
            cancel,
            initial_owner_key: None,
            curator_port: CURATOR_SERVICE_PORT,
        }
    }

    /// Sets the owner key that AAA escrow will issue a certificate for.
    pub fn with_initial_owner_key(mut self, key: Vec<u8>) -> Self {
        self.initial_owner_key = Some(key);
        self
    }

    /// Overrides the advertised curator port.
    pub fn with_curator_port(mut self, port: u16) -> Self {
        self.curator_port = port;
        self
    }

    pub fn leadership(&self) -> &Arc<Leadership> {
        &self.leadership
    }

    /// This tenure's heartbeat and health memory.
    pub fn leader_state(&self) -> &Arc<LeaderState> {
        &self.state
    }

    /// Token canceled when this leadership ends; open streams terminate
    /// on it.
    pub fn canceled(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn ca_certificate_der(&self) -> &[u8] {
        self.ca.certificate_der()
    }

    pub fn curator_port(&self) -> u16 {
        self.curator_port
    }

    // ---- node-facing operations --------------------------------------

    /// Creates a NEW node record for a foreign node presenting the
    /// register ticket. `caller_key` is the Ed25519 key from the
    /// caller's ephemeral credentials.
    pub async fn register_node(
        &self,
        caller_key: &[u8],
        ticket: &[u8],
        join_key: &[u8],
    ) -> Result<(), CuratorError> {
        let expected = self.leadership.ensure_register_ticket().await?;
        if ticket != expected.as_slice() {
            return Err(CuratorError::PermissionDenied(
                "register ticket does not match".to_string(),
            ));
        }
        if join_key.len() != 32 {
            return Err(CuratorError::InvalidArgument(format!(
                "join key must be 32 bytes, got {}",
                join_key.len()
            )));
        }
        let id = node_id(caller_key);
        if let Some(existing) = self.leadership.node(&id).await? {
            // A node that crashed mid-registration may retry with the
            // same keys.
            if existing.state == proto::NodeState::New
                && existing.public_key == caller_key
                && existing.join_key == join_key
            {
                return Ok(());
            }
            return Err(CuratorError::FailedPrecondition(format!(
                "node {id} already registered"
            )));
        }
        let node = Node::new(caller_key.to_vec(), join_key.to_vec());
        self.leadership.save_node(&node).await
    }

    /// Returns the stored cluster unlock key to an UP node
    /// authenticated by its join key.
    pub async fn join_node(&self, caller_join_key: &[u8]) -> Result<Vec<u8>, CuratorError> {
        let node = self
            .leadership
            .find_node(|n| n.join_key == caller_join_key)
            .await?
            .ok_or_else(|| {
                CuratorError::PermissionDenied("join key does not match any node".to_string())
            })?;
        if node.state != proto::NodeState::Up {
            return Err(CuratorError::FailedPrecondition(format!(
                "node {} is not UP",
                node.id()
            )));
        }
        Ok(node.cluster_unlock_key)
    }

    /// STANDBY → UP: records the cluster unlock key. Idempotent once
    /// UP; the stored key is never overwritten.
    ///
    /// Accepts ephemeral credentials for either of the node's keys: a
    /// freshly registered node commits over the same identity-key
    /// connection it registered on, while a node resuming after a crash
    /// may only have its join key at hand.
    pub async fn commit_node(
        &self,
        caller_key: &[u8],
        cluster_unlock_key: &[u8],
    ) -> Result<(), CuratorError> {
        if cluster_unlock_key.len() != CLUSTER_UNLOCK_KEY_LEN {
            return Err(CuratorError::InvalidArgument(format!(
                "cluster unlock key must be {CLUSTER_UNLOCK_KEY_LEN} bytes, got {}",
                cluster_unlock_key.len()
            )));
        }
        let mut node = self
            .leadership
            .find_node(|n| n.join_key == caller_key || n.public_key == caller_key)
            .await?
            .ok_or_else(|| {
                CuratorError::PermissionDenied("caller key does not match any node".to_string())
            })?;
        match node.state {
            proto::NodeState::Up => Ok(()),
            proto::NodeState::Standby => {
                node.cluster_unlock_key = cluster_unlock_key.to_vec();
                node.state = proto::NodeState::Up;
                self.leadership.save_node(&node).await
            }
            _ => Err(CuratorError::FailedPrecondition(format!(
                "node {} is not approved",
                node.id()
            ))),
        }
    }

    /// Updates a node's self-reported status. The caller identity must
    /// match the node being updated.
    pub async fn update_node_status(
        &self,
        caller_id: &str,
        target_id: &str,
        status: proto::NodeStatus,
    ) -> Result<(), CuratorError> {
        if caller_id != target_id {
            return Err(CuratorError::PermissionDenied(format!(
                "{caller_id} may not update status of {target_id}"
            )));
        }
        let mut node = self.leadership.expect_node(target_id).await?;
        node.status = Some(status);
        self.leadership.save_node(&node).await
    }

    /// Stamps a heartbeat received from a node, scoped to this tenure.
    pub fn heartbeat_received(&self, node_id: &str) {
        self.state.record_heartbeat(node_id);
    }

    // ---- manager-facing operations -----------------------------------

    /// The cluster-wide register ticket (minted on first call).
    pub async fn get_register_ticket(&self) -> Result<Vec<u8>, CuratorError> {
        self.leadership.ensure_register_ticket().await
    }

    /// NEW → STANDBY. Idempotent: approving an approved (or UP) node
    /// succeeds without effect.
    pub async fn approve_node(&self, pubkey: &[u8]) -> Result<(), CuratorError> {
        let id = node_id(pubkey);
        let mut node = self.leadership.expect_node(&id).await?;
        match node.state {
            proto::NodeState::New => {
                node.state = proto::NodeState::Standby;
                self.leadership.save_node(&node).await
            }
            proto::NodeState::Standby | proto::NodeState::Up => Ok(()),
            _ => Err(CuratorError::FailedPrecondition(format!(
                "node {id} cannot be approved from state {:?}",
                node.state
            ))),
        }
    }

    /// Updates a node's roles; `None` leaves a role unchanged. Rejects
    /// combinations violating role invariants.
    pub async fn update_node_roles(
        &self,
        pubkey: &[u8],
        kubernetes_worker: Option<bool>,
        consensus_member: Option<bool>,
    ) -> Result<(), CuratorError> {
        let id = node_id(pubkey);
        let mut node = self.leadership.expect_node(&id).await?;
        if let Some(v) = consensus_member {
            node.roles.consensus_member = v;
        }
        if let Some(v) = kubernetes_worker {
            node.roles.kubernetes_worker = v;
        }
        if node.roles.kubernetes_worker && !node.roles.consensus_member {
            return Err(CuratorError::InvalidArgument(
                "a kubernetes worker must also be a consensus member".to_string(),
            ));
        }
        self.leadership.save_node(&node).await
    }

    /// All nodes matching the filter expression, with health computed
    /// at serve time.
    pub async fn get_nodes(&self, filter_expr: &str) -> Result<Vec<proto::Node>, CuratorError> {
        let filter = self
            .filter
            .compile(filter_expr)
            .map_err(|e| CuratorError::InvalidArgument(e.to_string()))?;
        let mut out = Vec::new();
        for node in self.leadership.nodes().await? {
            let id = node.id();
            let (health, since) = self.state.health(&id, node.state);
            let view = NodeView {
                id,
                state: node.state,
                roles: node.roles.clone(),
                health,
                time_since_heartbeat: since,
            };
            if filter.matches(&view) {
                out.push(node.to_proto(health, since));
            }
        }
        Ok(out)
    }

    /// CA certificate plus a directory of externally reachable nodes.
    pub async fn cluster_info(&self) -> Result<proto::GetClusterInfoResponse, CuratorError> {
        let mut directory = proto::ClusterDirectory::default();
        for node in self.leadership.nodes().await? {
            let Some(status) = &node.status else {
                continue;
            };
            if status.external_address.is_empty() {
                continue;
            }
            directory.nodes.push(proto::cluster_directory::Node {
                id: node.id(),
                addresses: vec![status.external_address.clone()],
            });
        }
        Ok(proto::GetClusterInfoResponse {
            ca_certificate: self.ca.certificate_der().to_vec(),
            cluster_directory: Some(directory),
        })
    }

    /// AAA escrow: issues the owner certificate to the holder of the
    /// configured initial owner key.
    pub async fn escrow(
        &self,
        owner_public_key: &[u8],
        proof: &[u8],
    ) -> Result<Vec<u8>, CuratorError> {
        let Some(expected) = &self.initial_owner_key else {
            return Err(CuratorError::FailedPrecondition(
                "cluster has no escrowable owner key".to_string(),
            ));
        };
        if owner_public_key != expected.as_slice() {
            return Err(CuratorError::PermissionDenied(
                "owner key does not match the cluster owner".to_string(),
            ));
        }
        if !verify_escrow_proof(owner_public_key, proof) {
            return Err(CuratorError::PermissionDenied(
                "invalid owner possession proof".to_string(),
            ));
        }
        self.ca
            .issue_owner_certificate(owner_public_key)
            .map_err(|e| CuratorError::Pki(e.to_string()))
    }
}
