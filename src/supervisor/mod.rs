//! Hierarchical process supervisor.
//!
//! Every long-lived task on a node runs as a named, restartable
//! **runnable** arranged into a tree. A runnable is identified by its
//! dn (dotted-name path such as `root.curator.listener`), spawns
//! children through its [`RunContext`], and announces its own lifecycle
//! with [`Signal`]s. Failure handling is per **failure unit**: a single
//! `run` child is a unit of one, a `run_group` is a unit of many; when
//! any member dies, the whole unit is canceled, quiesced and restarted
//! with exponential backoff.
//!
//! ## Files & responsibilities
//! - **tree.rs**: [`Supervisor`] facade; starts the processor and the
//!   root runnable, exposes events, settling, shutdown.
//! - **processor.rs**: the single task owning all supervision state;
//!   every mutation is a message to it.
//! - **handle.rs**: [`RunContext`], the API surface runnables consume
//!   (`run`, `run_group`, `signal`, `sub_logger`, `logger`).
//! - **node.rs**: supervision-node and failure-unit records, dn rules.
//! - **backoff.rs**: restart backoff policy (exponential, capped,
//!   reset on healthy, optional jitter).
//! - **runnable.rs**: the [`Runnable`] trait and closure adapter.
//! - **logger.rs**: dn-scoped leveled logging.
//!
//! ## Wiring
//! ```text
//! Supervisor::start(options, root)
//!   ├─ spawns processor task (owns nodes/groups)
//!   └─ spawns root runnable as the singleton "root" unit
//!
//! runnable code                      processor
//!   ctx.run("child", r) ──Spawn────► register + spawn child
//!   ctx.signal(Healthy) ──Signal───► LIVE → HEALTHY (backoff reset)
//!   (returns/panics) ─────Report───► DEAD → cancel unit → quiesce
//!                                     → backoff timer → respawn unit
//! ```
//!
//! ## Example
//! ```no_run
//! use clustervisor::{runnable_fn, RunContext, RunnableError, Signal, Supervisor, SupervisorOptions};
//!
//! #[tokio::main]
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

mod backoff;
mod handle;
mod logger;
mod node;
mod processor;
mod runnable;
mod tree;

pub use backoff::{BackoffPolicy, Jitter};
pub use handle::{RunContext, Signal};
pub use logger::SubLogger;
pub use node::NodeState;
pub use runnable::{runnable_fn, BoxRunnableFuture, Runnable, RunnableRef};
pub use tree::{Supervisor, SupervisorOptions};
