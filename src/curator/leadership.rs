//! # Leadership: fenced access to curator state.
//!
//! Every write a curator leader performs is a transaction guarded by
//! `Compare(lock_key.mod_rev == lock_rev)` against the election lock it
//! won. A deposed leader's guard no longer holds, so its writes fail
//! with [`CuratorError::LeaderLost`] instead of corrupting state — even
//! before it notices losing the election.

use std::sync::Arc;

use rand::RngCore;

use crate::kv::{Compare, KvStore, LeaderLock, Op};

use super::error::CuratorError;
use super::state::{key_for_id, Node, NODES_PREFIX, REGISTER_TICKET_LEN, REGISTRATION_TICKET_KEY};

/// A won election bound to the store it was won on.
pub struct Leadership {
    lock: LeaderLock,
    leader_id: String,
    kv: Arc<dyn KvStore>,
}

impl Leadership {
    pub fn new(lock: LeaderLock, leader_id: impl Into<String>, kv: Arc<dyn KvStore>) -> Self {
        Self {
            lock,
            leader_id: leader_id.into(),
            kv,
        }
    }

    /// NodeID of the node this leadership runs on.
    pub fn leader_id(&self) -> &str {
        &self.leader_id
    }

    /// The backing store (used read-only by watch streams).
    pub fn kv(&self) -> &Arc<dyn KvStore> {
        &self.kv
    }

    /// Applies `ops` under the leadership guard.
    pub async fn commit(&self, ops: Vec<Op>) -> Result<(), CuratorError> {
        let held = self
            .kv
            .txn(
                Compare::ModRevision {
                    key: self.lock.lock_key.clone(),
                    revision: self.lock.lock_rev,
                },
                ops,
            )
            .await?;
        if held {
            Ok(())
        } else {
            Err(CuratorError::LeaderLost)
        }
    }

    /// Loads one node record, if present.
    pub async fn node(&self, id: &str) -> Result<Option<Node>, CuratorError> {
        let key = key_for_id(id);
        match self.kv.get(&key).await? {
            None => Ok(None),
            Some(entry) => Node::decode(&entry.value)
                .map(Some)
                .map_err(|_| CuratorError::Corrupt { key }),
        }
    }

    /// Loads one node record or fails with `UnknownNode`.
    pub async fn expect_node(&self, id: &str) -> Result<Node, CuratorError> {
        self.node(id)
            .await?
            .ok_or_else(|| CuratorError::UnknownNode(id.to_string()))
    }

    /// Loads all node records. Corrupt blobs are skipped with a
    /// warning; one bad record must not take down the cluster surface.
    pub async fn nodes(&self) -> Result<Vec<Node>, CuratorError> {
        let (entries, _) = self.kv.get_prefix(NODES_PREFIX).await?;
        let mut nodes = Vec::with_capacity(entries.len());
        for entry in entries {
            match Node::decode(&entry.value) {
                Ok(n) => nodes.push(n),
                Err(_) => tracing::warn!(key = %entry.key, "skipping corrupt node record"),
            }
        }
        Ok(nodes)
    }

    /// Finds the first node matching a predicate.
    pub async fn find_node(
        &self,
        pred: impl Fn(&Node) -> bool,
    ) -> Result<Option<Node>, CuratorError> {
        Ok(self.nodes().await?.into_iter().find(pred))
    }

    /// Persists a node record under the leadership guard.
    pub async fn save_node(&self, node: &Node) -> Result<(), CuratorError> {
        self.commit(vec![Op::Put {
            key: node.kv_key(),
            value: node.encode(),
        }])
        .await
    }

    /// Returns the cluster register ticket, minting and persisting it on
    /// first use. Repeated calls return the same value.
    pub async fn ensure_register_ticket(&self) -> Result<Vec<u8>, CuratorError> {
        if let Some(entry) = self.kv.get(REGISTRATION_TICKET_KEY).await? {
            return Ok(entry.value);
        }
        let mut ticket = vec![0u8; REGISTER_TICKET_LEN];
        rand::rngs::OsRng.fill_bytes(&mut ticket);
        self.commit(vec![Op::Put {
            key: REGISTRATION_TICKET_KEY.to_string(),
            value: ticket.clone(),
        }])
        .await?;
        Ok(ticket)
    }
}
