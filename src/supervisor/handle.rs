//! # RunContext: the execution context handed to every runnable.
//!
//! A [`RunContext`] is a runnable's identity and its only channel into
//! the supervision runtime. It carries the runnable's dn, the current
//! incarnation and the cancellation token; all supervisor API calls
//! (`run`, `run_group`, `signal`, `sub_logger`) go through it and are
//! cancel-aware: if the caller's context is canceled while a call is
//! queued at the processor, the call unblocks with
//! [`SupervisorError::Canceled`].
//!
//! Contexts are cheap to clone, but a clone stays bound to its
//! incarnation: after a restart, calls through the old context fail with
//! [`SupervisorError::StaleContext`]. Signalling through a foreign or
//! stale context is a programming error and kills the caller when the
//! error is propagated.

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::SupervisorError;

use super::logger::SubLogger;
use super::node::child_dn;
use super::processor::ProcessorRequest;
use super::runnable::RunnableRef;

/// Self-reported steady-state announcements of a runnable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signal {
    /// The runnable reached steady operation. Resets the failure unit's
    /// backoff once all members are healthy.
    Healthy,
    /// The runnable completed its one-shot work. Must follow `Healthy`.
    Done,
}

/// Execution context of one runnable incarnation.
#[derive(Clone)]
pub struct RunContext {
    dn: String,
    incarnation: u64,
    token: CancellationToken,
    tx: mpsc::UnboundedSender<ProcessorRequest>,
}

impl RunContext {
    pub(crate) fn new(
        dn: String,
        incarnation: u64,
        token: CancellationToken,
        tx: mpsc::UnboundedSender<ProcessorRequest>,
    ) -> Self {
        Self {
            dn,
            incarnation,
            token,
            tx,
        }
    }

    /// The dotted-name path of this runnable within its tree.
    pub fn dn(&self) -> &str {
        &self.dn
    }

    /// True once this incarnation's execution context is canceled.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves when this incarnation's execution context is canceled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// A clone of the incarnation's cancellation token, for select loops
    /// and for passing into non-supervised helpers.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Spawns a single child runnable under the caller.
    ///
    /// Returns once the child is registered and running. Fails with
    /// [`SupervisorError::NameTaken`] if `name` is already used by a
    /// sibling runnable or a sub-logger reservation. Closures are
    /// wrapped with [`runnable_fn`](super::runnable_fn); shared structs
    /// go through `Arc::new`.
    pub async fn run(&self, name: &str, runnable: RunnableRef) -> Result<(), SupervisorError> {
        self.spawn(name.to_string(), vec![(name.to_string(), runnable)], false)
            .await
    }

    /// Spawns a set of children as one failure unit.
    ///
    /// Returns once **all** members have transitioned to HEALTHY; if any
    /// member dies before that, the whole unit is restarted with backoff
    /// and the call keeps waiting. The call returns an error iff the
    /// caller's context is canceled first.
    pub async fn run_group(
        &self,
        members: Vec<(&str, RunnableRef)>,
    ) -> Result<(), SupervisorError> {
        let Some((first, _)) = members.first() else {
            return Ok(());
        };
        let group = first.to_string();
        let members = members
            .into_iter()
            .map(|(n, r)| (n.to_string(), r))
            .collect();
        self.spawn(group, members, true).await
    }

    /// Announces this runnable's own state transition. See [`Signal`].
    pub async fn signal(&self, signal: Signal) -> Result<(), SupervisorError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ProcessorRequest::Signal {
                dn: self.dn.clone(),
                incarnation: self.incarnation,
                signal,
                reply,
            })
            .map_err(|_| SupervisorError::TreeShutDown)?;
        self.await_reply(rx).await
    }

    /// Reserves `name` under this runnable and returns a logger emitting
    /// at `<dn>.<name>`. The reservation shares the namespace with child
    /// runnables: a later `run` with the same name fails, and vice
    /// versa.
    pub async fn sub_logger(&self, name: &str) -> Result<SubLogger, SupervisorError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ProcessorRequest::Reserve {
                dn: self.dn.clone(),
                incarnation: self.incarnation,
                name: name.to_string(),
                reply,
            })
            .map_err(|_| SupervisorError::TreeShutDown)?;
        self.await_reply(rx).await?;
        Ok(SubLogger::new(child_dn(&self.dn, name)))
    }

    /// The leveled logger attached to this runnable's dn.
    pub fn logger(&self) -> SubLogger {
        SubLogger::new(self.dn.clone())
    }

    async fn spawn(
        &self,
        group: String,
        members: Vec<(String, RunnableRef)>,
        wait_healthy: bool,
    ) -> Result<(), SupervisorError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ProcessorRequest::Spawn {
                parent: self.dn.clone(),
                parent_incarnation: self.incarnation,
                group,
                members,
                wait_healthy,
                reply,
            })
            .map_err(|_| SupervisorError::TreeShutDown)?;
        self.await_reply(rx).await
    }

    async fn await_reply(
        &self,
        rx: oneshot::Receiver<Result<(), SupervisorError>>,
    ) -> Result<(), SupervisorError> {
        tokio::select! {
            _ = self.token.cancelled() => Err(SupervisorError::Canceled),
            res = rx => match res {
                Ok(r) => r,
                Err(_) if self.token.is_cancelled() => Err(SupervisorError::Canceled),
                Err(_) => Err(SupervisorError::TreeShutDown),
            },
        }
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("dn", &self.dn)
            .field("incarnation", &self.incarnation)
            .finish()
    }
}
