//! # Node records and the persisted layout.
//!
//! The curator owns three key ranges in the replicated store:
//!
//! ```text
//! /nodes/<NodeID>        — NodeRecord protobuf blob, one per node
//! /registration/ticket   — the cluster-wide register ticket
//! /election/leader       — the leader-election lock
//! ```
//!
//! [`Node`] is the in-memory form of a record; it round-trips through
//! the `NodeRecord` protobuf message and projects into the public
//! [`proto::Node`] served by `Watch` and `GetNodes`.

use std::time::Duration;

use prost::Message;

use crate::cluster::node_id;
use crate::proto;

/// KV prefix of node records.
pub const NODES_PREFIX: &str = "/nodes/";
/// KV key of the register ticket.
pub const REGISTRATION_TICKET_KEY: &str = "/registration/ticket";
/// KV key of the leader-election lock.
pub const ELECTION_KEY: &str = "/election/leader";

/// Default port of a node's curator listener.
pub const CURATOR_SERVICE_PORT: u16 = 7835;

/// Length of the register ticket.
pub const REGISTER_TICKET_LEN: usize = 32;
/// Length of the cluster unlock key.
pub const CLUSTER_UNLOCK_KEY_LEN: usize = 32;

/// A cluster node as the curator knows it.
#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    /// Ed25519 identity public key; the NodeID derives from it.
    pub public_key: Vec<u8>,
    /// Ed25519 join public key authenticating pre-UP RPCs.
    pub join_key: Vec<u8>,
    /// Cluster half of the node's disk unlock key; opaque here.
    pub cluster_unlock_key: Vec<u8>,
    pub state: proto::NodeState,
    pub roles: proto::NodeRoles,
    /// Last status the node pushed, if any.
    pub status: Option<proto::NodeStatus>,
}

impl Node {
    /// A freshly registered node: state NEW, no roles, no status.
    pub fn new(public_key: Vec<u8>, join_key: Vec<u8>) -> Self {
        Self {
            public_key,
            join_key,
            cluster_unlock_key: Vec::new(),
            state: proto::NodeState::New,
            roles: proto::NodeRoles::default(),
            status: None,
        }
    }

    /// The node's stable ID, derived from its public key.
    pub fn id(&self) -> String {
        node_id(&self.public_key)
    }

    /// The record's KV key.
    pub fn kv_key(&self) -> String {
        key_for_id(&self.id())
    }

    /// Serializes into the persisted `NodeRecord` blob.
    pub fn encode(&self) -> Vec<u8> {
        proto::NodeRecord {
            public_key: self.public_key.clone(),
            join_key: self.join_key.clone(),
            cluster_unlock_key: self.cluster_unlock_key.clone(),
            state: self.state as i32,
            roles: Some(self.roles.clone()),
            status: self.status.clone(),
        }
        .encode_to_vec()
    }

    /// Deserializes a persisted `NodeRecord` blob.
    pub fn decode(bytes: &[u8]) -> Result<Self, prost::DecodeError> {
        let record = proto::NodeRecord::decode(bytes)?;
        Ok(Self {
            state: record.state(),
            public_key: record.public_key,
            join_key: record.join_key,
            cluster_unlock_key: record.cluster_unlock_key,
            roles: record.roles.unwrap_or_default(),
            status: record.status,
        })
    }

    /// Projects into the served node shape with health data attached.
    pub fn to_proto(
        &self,
        health: proto::NodeHealth,
        time_since_heartbeat: Option<Duration>,
    ) -> proto::Node {
        proto::Node {
            id: self.id(),
            public_key: self.public_key.clone(),
            state: self.state as i32,
            health: health as i32,
            roles: Some(self.roles.clone()),
            status: self.status.clone(),
            time_since_heartbeat_ms: time_since_heartbeat.map(|d| d.as_millis() as u64),
        }
    }

    /// Projection without health data, as served on watch streams.
    pub fn to_proto_basic(&self) -> proto::Node {
        self.to_proto(proto::NodeHealth::Unknown, None)
    }
}

/// KV key of a node record.
pub fn key_for_id(id: &str) -> String {
    format!("{NODES_PREFIX}{id}")
}

/// Extracts the NodeID from a record key.
pub fn id_from_key(key: &str) -> Option<&str> {
    key.strip_prefix(NODES_PREFIX).filter(|id| !id.is_empty())
}
