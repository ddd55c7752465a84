//! Cluster curator.
//!
//! The curator is the cluster's authoritative state and coordination
//! surface: node records, role assignments, heartbeats and the cluster
//! directory, leader-elected across consensus-member nodes and served
//! over authenticated gRPC.
//!
//! ## Files & responsibilities
//! - **run.rs**: [`Curator`], the campaign loop runnable; one
//!   incarnation per leadership tenure.
//! - **leader.rs**: [`CuratorLeader`], the operations of an elected
//!   leader (register/join/commit, approve/roles/ticket, status,
//!   heartbeats, cluster info, escrow).
//! - **service.rs**: tonic service adapters and the mTLS listener.
//! - **leadership.rs**: fenced store access — every write is guarded by
//!   the election lock's revision.
//! - **watch.rs**: snapshot + live watch streams with tombstones.
//! - **health.rs**: tenure-scoped heartbeat map and health computation.
//! - **state.rs**: node records and the persisted KV layout.
//! - **filter.rs**: the node-filter seam behind `GetNodes`.
//! - **error.rs**: the error taxonomy and its gRPC mapping.
//!
//! ## Leadership flow
//! ```text
//! Curator::run (supervised)
//!   ├─ elector.campaign() ──► LeaderGuard{lock_key, lock_rev}
//!   ├─ CuratorLeader::new   (fresh heartbeat map for this tenure)
//!   ├─ ctx.run("listener")  (mTLS gRPC services)
//!   └─ lost.cancelled() ──► runnable fails ──► supervisor cancels
//!                            subtree, backs off, re-campaigns
//! ```

mod error;
mod filter;
mod health;
mod leader;
mod leadership;
mod run;
mod service;
mod state;
mod watch;

pub use error::CuratorError;
pub use filter::{CompiledFilter, FilterEngine, FilterError, FnFilter, FnFilterEngine, MatchAll, NodeView};
pub use health::{LeaderState, HEARTBEAT_TIMEOUT};
pub use leader::CuratorLeader;
pub use leadership::Leadership;
pub use run::{Curator, CuratorConfig};
pub use service::{serve, CuratorService};
pub use state::{
    id_from_key, key_for_id, Node, CLUSTER_UNLOCK_KEY_LEN, CURATOR_SERVICE_PORT, ELECTION_KEY,
    NODES_PREFIX, REGISTER_TICKET_LEN, REGISTRATION_TICKET_KEY,
};
