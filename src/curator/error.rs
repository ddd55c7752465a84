//! # Curator error taxonomy.
//!
//! Policy violations (wrong identity, bad ticket) and state-machine
//! violations surface as typed errors that map 1:1 onto gRPC status
//! codes; transient conditions (leader lost, store unavailable) map to
//! `UNAVAILABLE` and are retried by clients after redialing.

use thiserror::Error;
use tonic::Status;

use crate::kv::KvError;

/// Errors produced by curator operations.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum CuratorError {
    /// The caller's identity does not permit this operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The operation violates the node state machine.
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    /// Malformed request contents (filter expression, key sizes, role
    /// combinations).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A guarded transaction failed: this instance is no longer the
    /// leader. Clients redial and retry.
    #[error("leader lost")]
    LeaderLost,

    /// The referenced node does not exist.
    #[error("unknown node {0}")]
    UnknownNode(String),

    /// A stored node record failed to decode.
    #[error("corrupt node record at {key}")]
    Corrupt { key: String },

    /// Certificate issuance failed.
    #[error("pki failure: {0}")]
    Pki(String),

    /// The backing store failed.
    #[error(transparent)]
    Kv(#[from] KvError),
}

impl From<CuratorError> for Status {
    fn from(e: CuratorError) -> Self {
        match e {
            CuratorError::PermissionDenied(m) => Status::permission_denied(m),
            CuratorError::FailedPrecondition(m) => Status::failed_precondition(m),
            CuratorError::InvalidArgument(m) => Status::invalid_argument(m),
            CuratorError::LeaderLost => Status::unavailable("leader lost"),
            CuratorError::UnknownNode(id) => {
                Status::failed_precondition(format!("unknown node {id}"))
            }
            CuratorError::Corrupt { key } => {
                Status::internal(format!("corrupt node record at {key}"))
            }
            CuratorError::Pki(m) => Status::internal(format!("pki failure: {m}")),
            CuratorError::Kv(e) => Status::unavailable(e.to_string()),
        }
    }
}
