//! # Supervision node bookkeeping.
//!
//! The processor's private records: one [`SupervisionNode`] per runnable
//! (keyed by dn) and one [`GroupRecord`] per failure unit. A runnable
//! spawned with `run` is a singleton group; `run_group` members share
//! one record and are restarted together.
//!
//! dn rules: a child's dn is `parent.dn + "." + name`; names are unique
//! within a parent across runnables *and* sub-logger reservations.

use std::collections::BTreeSet;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::SupervisorError;

use super::runnable::RunnableRef;

/// dn of the root runnable.
pub const ROOT_DN: &str = "root";

/// State of a supervision node.
///
/// ```text
/// NEW ──spawn──▶ LIVE ──healthy──▶ HEALTHY ──done──▶ DONE
///   │              │                  │
///   │              └──error/panic──▶ DEAD ──backoff──▶ NEW
///   └──parent cancel──▶ CANCELED
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeState {
    /// Created, not yet (re)spawned.
    New,
    /// An incarnation is running but has not signalled health yet.
    Live,
    /// The runnable reported steady operation; backoff is reset.
    Healthy,
    /// The runnable completed its one-shot work cleanly.
    Done,
    /// The incarnation exited due to cancellation; terminal for this
    /// incarnation.
    Canceled,
    /// The incarnation failed; the failure unit will be restarted.
    Dead,
}

impl NodeState {
    /// True for states in which no further transitions are expected from
    /// this incarnation.
    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeState::Done | NodeState::Canceled | NodeState::Dead)
    }
}

/// Identifies a failure unit: the parent dn plus the group name. The
/// root group uses an empty parent dn.
pub(crate) type GroupKey = (String, String);

/// Processor-private record of one runnable.
pub(crate) struct SupervisionNode {
    /// Parent dn; `None` for the root.
    pub parent: Option<String>,
    /// Group name within the parent.
    pub group: String,
    pub state: NodeState,
    /// Monotonic incarnation counter; bumped on every (re)spawn. API
    /// calls carrying an older incarnation are stale.
    pub incarnation: u64,
    /// Cancellation token of the current incarnation. Children derive
    /// theirs from it, so canceling a node cancels its whole subtree.
    pub token: CancellationToken,
    pub runnable: RunnableRef,
    /// Names of child runnables under the current incarnation.
    pub children: BTreeSet<String>,
    /// Sub-logger reservations; shares the namespace with `children`.
    pub reserved: BTreeSet<String>,
    /// True while an invocation task exists for this node.
    pub running: bool,
}

/// Processor-private record of one failure unit.
pub(crate) struct GroupRecord {
    /// Member child names, in spawn order.
    pub members: Vec<String>,
    /// Consecutive failures; reset when all members reach HEALTHY.
    pub failures: u32,
    /// A member died; the unit is quiescing before restart.
    pub restarting: bool,
    /// A restart timer is pending.
    pub restart_scheduled: bool,
    /// Error text of the death that triggered the current restart.
    pub last_error: Option<String>,
    /// Callers blocked in `run_group` until all members are HEALTHY.
    pub healthy_waiters: Vec<oneshot::Sender<Result<(), SupervisorError>>>,
}

/// Builds a child dn.
pub(crate) fn child_dn(parent: &str, name: &str) -> String {
    format!("{parent}.{name}")
}

/// Validates a dn segment: non-empty, no separator, printable ASCII.
pub(crate) fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
