//! # clustervisor
//!
//! **clustervisor** is the control-plane core of a clustered node
//! operating system: every node runs its long-lived work under a
//! hierarchical process supervisor, and the nodes together elect a
//! **curator** — an authenticated, replicated source of truth for node
//! identity, roles, heartbeats and the cluster directory — that drives
//! the lifecycle a machine follows to become and remain a cluster
//! member.
//!
//! | Area               | Description                                                         | Key types / traits                          |
//! |--------------------|---------------------------------------------------------------------|---------------------------------------------|
//! | **Supervision**    | Tree of named, restartable runnables with backoff and panic isolation. | [`Supervisor`], [`RunContext`], [`Runnable`] |
//! | **Events**         | Broadcast lifecycle events of the tree.                             | [`Event`], [`EventKind`], [`Subscriber`]    |
//! | **Curator**        | Leader-elected cluster state service over a replicated KV.          | [`Curator`], [`CuratorLeader`]              |
//! | **Lifecycle**      | Register → approve → commit → up; heartbeats, status, directory.    | [`NodeIdentity`], [`SteadyState`]           |
//! | **Seams**          | Replaceable collaborators for store, election and filtering.        | [`KvStore`], [`LeaderElector`], [`FilterEngine`] |
//! | **Security**       | Ed25519 cluster CA, node/owner/ephemeral certificates.              | [`ClusterCa`], [`PeerIdentity`]             |
//!
//! ## Optional features
//! - `logging`: exports the built-in `LogWriter` subscriber bridging
//!   supervision events into `tracing`.
//!
//! ## Example
//! ```no_run
//! use clustervisor::{runnable_fn, RunContext, RunnableError, Signal, Supervisor, SupervisorOptions};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let sup = Supervisor::start(SupervisorOptions::default(), |ctx: RunContext| async move {
//!         let worker = runnable_fn(|ctx: RunContext| async move {
//!             ctx.signal(Signal::Healthy).await?;
//!             ctx.cancelled().await;
//!             Err(RunnableError::Canceled)
//!         });
//!         ctx.run("worker", worker).await?;
//!         ctx.signal(Signal::Healthy).await?;
//!         ctx.signal(Signal::Done).await?;
//!         Ok(())
//!     });
//!     sup.wait_settled().await.unwrap();
//! }
//! ```

pub mod cluster;
pub mod curator;
mod error;
mod events;
pub mod kv;
pub mod proto;
pub mod rpc;
mod subscribers;
mod supervisor;

// ---- Public re-exports ----

pub use cluster::{
    combine_unlock_keys, node_id, DirectoryWriter, Heartbeater, NodeIdentity, StatusPusher,
    SteadyState,
};
pub use curator::{
    Curator, CuratorConfig, CuratorError, CuratorLeader, FilterEngine, LeaderState, MatchAll,
    HEARTBEAT_TIMEOUT,
};
pub use error::{RunnableError, SupervisorError};
pub use events::{Bus, Event, EventKind};
pub use kv::{KvStore, LeaderElector, MemoryElector, MemoryKv};
pub use rpc::{ClusterCa, PeerIdentity};
pub use subscribers::{FnSubscriber, Subscriber};
pub use supervisor::{
    runnable_fn, BackoffPolicy, BoxRunnableFuture, Jitter, NodeState, RunContext, Runnable,
    RunnableRef, Signal, SubLogger, Supervisor, SupervisorOptions,
};

// Optional: expose the built-in tracing log writer.
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
