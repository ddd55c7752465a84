//! # Heartbeat-driven node health.
//!
//! Health is scoped to the current leader tenure: a freshly elected
//! leader starts with an empty heartbeat map and gives every UP node
//! one [`HEARTBEAT_TIMEOUT`] window to report before declaring it timed
//! out. Timestamps live only in leader memory; they are discarded with
//! the [`LeaderState`] when leadership changes.
//!
//! Health is computed on read:
//!
//! - non-UP nodes are always UNKNOWN (they cannot heartbeat);
//! - a heartbeat recorded this tenure decides HEALTHY vs
//!   HEARTBEAT_TIMEOUT by its age;
//! - with no heartbeat recorded, tenure age decides UNKNOWN (leader too
//!   young to judge) vs HEARTBEAT_TIMEOUT.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::proto;

/// Maximum time between node heartbeats before the node is considered
/// timed out. Fixed; tests rely on the constant.
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-tenure leader memory: tenure start and heartbeat receive times.
pub struct LeaderState {
    started_at: Mutex<Instant>,
    heartbeats: Mutex<HashMap<String, Instant>>,
}

impl Default for LeaderState {
    fn default() -> Self {
        Self::new()
    }
}

impl LeaderState {
    /// A fresh tenure starting now, with no heartbeats recorded.
    pub fn new() -> Self {
        Self {
            started_at: Mutex::new(Instant::now()),
            heartbeats: Mutex::new(HashMap::new()),
        }
    }

    /// Stamps a heartbeat received from `node_id` now. Receive order is
    /// preserved per node; a later stamp always overwrites.
    pub fn record_heartbeat(&self, node_id: &str) {
        if let Ok(mut map) = self.heartbeats.lock() {
            map.insert(node_id.to_string(), Instant::now());
        }
    }

    /// Computes `(health, time since last heartbeat)` for a node in the
    /// given state.
    pub fn health(
        &self,
        node_id: &str,
        state: proto::NodeState,
    ) -> (proto::NodeHealth, Option<Duration>) {
        if state != proto::NodeState::Up {
            return (proto::NodeHealth::Unknown, None);
        }
        let now = Instant::now();
        let last = self
            .heartbeats
            .lock()
            .ok()
            .and_then(|m| m.get(node_id).copied());
        match last {
            Some(ts) => {
                let age = now.saturating_duration_since(ts);
                if age > HEARTBEAT_TIMEOUT {
                    (proto::NodeHealth::HeartbeatTimeout, Some(age))
                } else {
                    (proto::NodeHealth::Healthy, Some(age))
                }
            }
            None => {
                let started = self
                    .started_at
                    .lock()
                    .map(|s| *s)
                    .unwrap_or_else(|_| Instant::now());
                if now.saturating_duration_since(started) > HEARTBEAT_TIMEOUT {
                    (proto::NodeHealth::HeartbeatTimeout, None)
                } else {
                    (proto::NodeHealth::Unknown, None)
                }
            }
        }
    }

    /// Moves tenure start back in time. Test support for driving health
    /// transitions; returns false if the clock cannot be rewound that
    /// far.
    pub fn rewind_started_at(&self, by: Duration) -> bool {
        let Ok(mut started) = self.started_at.lock() else {
            return false;
        };
        match started.checked_sub(by) {
            Some(t) => {
                *started = t;
                true
            }
            None => false,
        }
    }

    /// Moves a node's heartbeat stamp back in time. Test support;
    /// returns false if no stamp exists or the clock cannot be rewound.
    pub fn rewind_heartbeat(&self, node_id: &str, by: Duration) -> bool {
        let Ok(mut map) = self.heartbeats.lock() else {
            return false;
        };
        match map.get(node_id).and_then(|ts| ts.checked_sub(by)) {
            Some(t) => {
                map.insert(node_id.to_string(), t);
                true
            }
            None => false,
        }
    }
}
