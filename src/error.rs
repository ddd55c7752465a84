//! # Error types used by the supervision runtime and runnables.
//!
//! Two enums cover the supervisor's error surface:
//!
//! - [`SupervisorError`] errors raised by the supervision runtime itself
//!   (naming collisions, stale contexts, shutdown races).
//! - [`RunnableError`] outcomes returned by individual runnable
//!   executions.
//!
//! Both types provide `as_label` helpers for logs and metrics. Curator
//! RPC errors live in [`crate::curator`] and map onto `tonic::Status`.

use std::time::Duration;

use thiserror::Error;

/// Errors produced by the supervision runtime.
///
/// These represent failures of supervisor API calls, not of the
/// supervised work itself.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// The requested child name is already in use under the same parent,
    /// either by a sibling runnable or by a sub-logger reservation.
    #[error("name '{name}' already taken under '{parent}'")]
    NameTaken {
        /// The parent runnable's dn.
        parent: String,
        /// The colliding child name.
        name: String,
    },

    /// The requested name is not a valid dn segment.
    #[error("invalid runnable name '{name}'")]
    InvalidName {
        /// The rejected name.
        name: String,
    },

    /// The call was made through a context belonging to a previous
    /// incarnation of the runnable. Signalling through a foreign or
    /// stale context is a programming error.
    #[error("stale context for '{dn}'")]
    StaleContext {
        /// The dn the stale context pointed at.
        dn: String,
    },

    /// `Signal(Done)` was sent before `Signal(Healthy)`.
    #[error("'{dn}' signalled done before healthy")]
    DoneBeforeHealthy {
        /// The offending runnable's dn.
        dn: String,
    },

    /// The caller's execution context was canceled while the call was
    /// queued at the processor.
    #[error("context canceled")]
    Canceled,

    /// The supervision tree's processor has exited.
    #[error("supervision tree shut down")]
    TreeShutDown,

    /// Shutdown grace period was exceeded; some runnables remained
    /// stuck.
    #[error("shutdown grace {grace:?} exceeded; still live: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// dns of runnables that did not exit in time.
        stuck: Vec<String>,
    },
}

impl SupervisorError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            SupervisorError::NameTaken { .. } => "supervisor_name_taken",
            SupervisorError::InvalidName { .. } => "supervisor_invalid_name",
            SupervisorError::StaleContext { .. } => "supervisor_stale_context",
            SupervisorError::DoneBeforeHealthy { .. } => "supervisor_done_before_healthy",
            SupervisorError::Canceled => "supervisor_canceled",
            SupervisorError::TreeShutDown => "supervisor_tree_shut_down",
            SupervisorError::GraceExceeded { .. } => "supervisor_grace_exceeded",
        }
    }
}

/// Outcome of a runnable execution.
///
/// A runnable that observes its execution context being canceled returns
/// [`RunnableError::Canceled`]; this is **not an error** in the
/// traditional sense and does not count as a failure for backoff
/// purposes. Everything else is a failure and triggers a restart of the
/// runnable's failure unit.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RunnableError {
    /// The runnable exited because its execution context was canceled.
    #[error("context canceled")]
    Canceled,

    /// The runnable failed; its failure unit will be restarted after
    /// backoff.
    #[error("{reason}")]
    Failed {
        /// Human-readable failure description.
        reason: String,
    },

    /// A supervisor API call made by the runnable failed.
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
}

impl RunnableError {
    /// Builds a failure outcome from any displayable reason.
    pub fn failed(reason: impl Into<String>) -> Self {
        RunnableError::Failed {
            reason: reason.into(),
        }
    }

    /// True if this outcome represents cooperative cancellation rather
    /// than a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            RunnableError::Canceled | RunnableError::Supervisor(SupervisorError::Canceled)
        )
    }

    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            RunnableError::Canceled => "runnable_canceled",
            RunnableError::Failed { .. } => "runnable_failed",
            RunnableError::Supervisor(e) => e.as_label(),
        }
    }
}

impl From<std::io::Error> for RunnableError {
    fn from(e: std::io::Error) -> Self {
        RunnableError::Failed {
            reason: e.to_string(),
        }
    }
}

impl From<tonic::Status> for RunnableError {
    fn from(s: tonic::Status) -> Self {
        RunnableError::Failed {
            reason: format!("rpc failed: {s}"),
        }
    }
}
