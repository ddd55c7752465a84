//! Node lifecycle protocol.
//!
//! The client side of cluster membership: a node generates its
//! [`NodeIdentity`], registers with a ticket, commits itself once
//! approved, and then keeps the cluster informed through three
//! steady-state runnables — status pusher, heartbeat stream and
//! directory writer — bundled as the [`SteadyState`] failure unit.
//! After a reboot the node rejoins with its join key and unseals its
//! data partition with the returned cluster unlock key.
//!
//! ```text
//! supervisor
//!   └─ steady-state group
//!        ├─ status-push  — UpdateNodeStatus on local changes
//!        ├─ heartbeat    — one update per period, replies consumed
//!        └─ directory    — NodesInCluster watch → hosts file,
//!                          hostname, ClusterDirectory file
//! ```

mod directory;
mod enrolment;
mod heartbeat;
mod identity;
mod status;

pub use directory::DirectoryWriter;
pub use enrolment::{
    commit_until_up, ephemeral_channel, register, rejoin, EnrolmentError, EphemeralRole,
};
pub use heartbeat::{Heartbeater, HEARTBEAT_PERIOD};
pub use identity::{combine_unlock_keys, node_id, NodeIdentity, UNLOCK_KEY_LEN};
pub use status::StatusPusher;

use crate::error::RunnableError;
use crate::supervisor::{BoxRunnableFuture, RunContext, Runnable, RunnableRef, Signal};
use std::sync::Arc;

/// The steady-state runnables of an UP node, run as one failure unit:
/// if any of them dies, all are restarted together against a
/// freshly-dialed leader.
#[derive(Clone)]
pub struct SteadyState {
    pub status: StatusPusher,
    pub heartbeat: Heartbeater,
    pub directory: DirectoryWriter,
}

impl Runnable for SteadyState {
    fn run(&self, ctx: RunContext) -> BoxRunnableFuture {
        let this = self.clone();
        Box::pin(async move {
            ctx.run_group(vec![
                ("status-push", Arc::new(this.status) as RunnableRef),
                ("heartbeat", Arc::new(this.heartbeat) as RunnableRef),
                ("directory", Arc::new(this.directory) as RunnableRef),
            ])
            .await?;
            ctx.signal(Signal::Healthy).await?;
            ctx.cancelled().await;
            Err(RunnableError::Canceled)
        })
    }
}
